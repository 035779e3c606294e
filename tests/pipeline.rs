//! End-to-end settlement pipeline over the in-memory implementations:
//! create -> decide -> event -> retrying consumer -> handler -> payment
//! processor -> partner, with redelivery thrown in to exercise the
//! idempotency guarantees.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use expensed::config::ConsumerConfig;
use expensed::{
    ApprovalService, ChannelBroker, CreateExpenseRequest, Decision, EventSender,
    ExpenseApprovedHandler, ExpenseError, ExpenseService, ExpenseStatus, ExpenseStore,
    MemoryLockStore, MemoryStore, Metrics, PartnerPayment, PaymentPartner, Result,
    RetryingConsumer, Role, SettlementProcessor,
};

/// Trait-level stand-in for the partner API with the same idempotency
/// contract: one payment per external id, replays flagged as duplicates.
#[derive(Default)]
struct FakePartner {
    payments: DashMap<String, String>,
    calls: AtomicU64,
}

#[async_trait]
impl PaymentPartner for FakePartner {
    async fn execute(&self, _amount: i64, external_id: &str) -> Result<PartnerPayment> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(existing) = self.payments.get(external_id) {
            return Ok(PartnerPayment {
                partner_id: existing.clone(),
                external_id: external_id.to_string(),
                duplicate: true,
            });
        }

        let id = format!("pay-{}", self.payments.len() + 1);
        self.payments.insert(external_id.to_string(), id.clone());
        Ok(PartnerPayment {
            partner_id: id,
            external_id: external_id.to_string(),
            duplicate: false,
        })
    }
}

/// [`FakePartner`] behind a transient outage: the first `fail_first`
/// submissions are rejected with a server error.
struct FlakyPartner {
    inner: FakePartner,
    failures_left: AtomicU64,
}

#[async_trait]
impl PaymentPartner for FlakyPartner {
    async fn execute(&self, amount: i64, external_id: &str) -> Result<PartnerPayment> {
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ExpenseError::Partner { status: 503 });
        }
        self.inner.execute(amount, external_id).await
    }
}

struct Pipeline {
    store: Arc<MemoryStore>,
    metrics: Arc<Metrics>,
    expenses: ExpenseService,
    approvals: ApprovalService,
    sender: Arc<expensed::ChannelSender>,
    shutdown: watch::Sender<bool>,
    consumer: tokio::task::JoinHandle<Result<()>>,
}

fn consumer_config() -> ConsumerConfig {
    ConsumerConfig {
        topic: "expense-approved".to_string(),
        max_retries: 3,
        backoff_secs: 0,
        max_execute_secs: 5,
    }
}

fn start_pipeline_with(partner: Arc<dyn PaymentPartner>) -> Pipeline {
    let store = Arc::new(MemoryStore::new());
    let metrics = Arc::new(Metrics::new());
    let (sender, source) = ChannelBroker::new("expense-approved", 64);
    let sender = Arc::new(sender);

    let expenses = ExpenseService::new(store.clone(), sender.clone(), metrics.clone());
    let approvals = ApprovalService::new(store.clone(), sender.clone(), metrics.clone());
    let processor = Arc::new(SettlementProcessor::new(
        store.clone(),
        Arc::new(MemoryLockStore::new()),
        partner,
        Duration::from_secs(60),
        metrics.clone(),
    ));

    let handler = ExpenseApprovedHandler::new(processor);
    let consumer = RetryingConsumer::new(source, handler, consumer_config(), metrics.clone());
    let (shutdown, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(consumer.run(shutdown_rx));

    Pipeline {
        store,
        metrics,
        expenses,
        approvals,
        sender,
        shutdown,
        consumer: task,
    }
}

fn start_pipeline() -> (Pipeline, Arc<FakePartner>) {
    let partner = Arc::new(FakePartner::default());
    (start_pipeline_with(partner.clone()), partner)
}

async fn wait_for_processed(metrics: &Metrics, count: u64) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while metrics.messages_processed() < count {
        assert!(
            tokio::time::Instant::now() < deadline,
            "consumer did not drain {count} messages in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn stop(pipeline: Pipeline) {
    let _ = pipeline.shutdown.send(true);
    pipeline.consumer.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_manager_approval_settles_expense() {
    let (pipeline, partner) = start_pipeline();

    let expense = pipeline
        .expenses
        .create(CreateExpenseRequest {
            user_id: 3,
            amount: 2_500_000,
            description: "conference travel".to_string(),
            receipt_url: None,
        })
        .await
        .unwrap();
    assert_eq!(expense.status, ExpenseStatus::AwaitingApproval);

    pipeline
        .approvals
        .decide(expense.id, 1, Role::Manager, Decision::Approved, None)
        .await
        .unwrap();

    wait_for_processed(&pipeline.metrics, 1).await;

    let settled = pipeline
        .store
        .find_expense(expense.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(settled.status, ExpenseStatus::Completed);
    assert!(settled.processed_at.is_some());
    assert_eq!(partner.calls.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.metrics.settlements_completed(), 1);

    stop(pipeline).await;
}

#[tokio::test]
async fn test_auto_approved_expense_settles_without_decision() {
    let (pipeline, partner) = start_pipeline();

    let expense = pipeline
        .expenses
        .create(CreateExpenseRequest {
            user_id: 3,
            amount: 17_000,
            description: "stationery".to_string(),
            receipt_url: None,
        })
        .await
        .unwrap();
    assert_eq!(expense.status, ExpenseStatus::Approved);

    wait_for_processed(&pipeline.metrics, 1).await;

    let settled = pipeline
        .store
        .find_expense(expense.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(settled.status, ExpenseStatus::Completed);
    assert_eq!(
        partner
            .payments
            .get(&expense.idempotency_key())
            .map(|r| r.value().clone()),
        Some("pay-1".to_string())
    );

    stop(pipeline).await;
}

#[tokio::test]
async fn test_redelivered_event_is_a_noop() {
    let (pipeline, partner) = start_pipeline();

    let expense = pipeline
        .expenses
        .create(CreateExpenseRequest {
            user_id: 3,
            amount: 17_000,
            description: "snacks".to_string(),
            receipt_url: None,
        })
        .await
        .unwrap();

    wait_for_processed(&pipeline.metrics, 1).await;

    // the transport redelivers the same event
    let event = expensed::ExpenseApprovedEvent::from(
        &pipeline
            .store
            .find_expense(expense.id)
            .await
            .unwrap()
            .unwrap(),
    );
    pipeline.sender.send(&event).await.unwrap();

    wait_for_processed(&pipeline.metrics, 2).await;

    // still settled exactly once at the partner, status unchanged
    assert_eq!(partner.calls.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.metrics.settlement_noops(), 1);
    assert_eq!(
        pipeline
            .store
            .find_expense(expense.id)
            .await
            .unwrap()
            .unwrap()
            .status,
        ExpenseStatus::Completed
    );

    stop(pipeline).await;
}

#[tokio::test]
async fn test_rejected_expense_never_reaches_partner() {
    let (pipeline, partner) = start_pipeline();

    let expense = pipeline
        .expenses
        .create(CreateExpenseRequest {
            user_id: 3,
            amount: 2_000_000,
            description: "questionable gadget".to_string(),
            receipt_url: None,
        })
        .await
        .unwrap();

    pipeline
        .approvals
        .decide(expense.id, 1, Role::Manager, Decision::Rejected, None)
        .await
        .unwrap();

    // nothing to consume; give the pipeline a moment anyway
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(partner.calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        pipeline
            .store
            .find_expense(expense.id)
            .await
            .unwrap()
            .unwrap()
            .status,
        ExpenseStatus::Rejected
    );

    stop(pipeline).await;
}

#[tokio::test]
async fn test_partner_outage_is_retried_until_settled() {
    // One 503 from the partner, zero backoff: the consumer's immediate
    // retry must find the settlement lock free and finish the payment,
    // not no-op and acknowledge the message with the expense unsettled.
    let partner = Arc::new(FlakyPartner {
        inner: FakePartner::default(),
        failures_left: AtomicU64::new(1),
    });
    let pipeline = start_pipeline_with(partner.clone());

    let expense = pipeline
        .expenses
        .create(CreateExpenseRequest {
            user_id: 3,
            amount: 17_000,
            description: "printer ink".to_string(),
            receipt_url: None,
        })
        .await
        .unwrap();

    wait_for_processed(&pipeline.metrics, 1).await;

    let settled = pipeline
        .store
        .find_expense(expense.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(settled.status, ExpenseStatus::Completed);
    assert!(settled.processed_at.is_some());
    assert_eq!(partner.inner.calls.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.metrics.message_retries(), 1);
    assert_eq!(pipeline.metrics.settlements_completed(), 1);
    assert_eq!(pipeline.metrics.settlement_noops(), 0);

    stop(pipeline).await;
}
