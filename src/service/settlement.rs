//! Settlement core: from "an expense became approved" to "the partner has
//! durably executed the payment and the local record says Completed",
//! under at-least-once delivery and concurrent retries.
//!
//! Strategy for ordering the external call against the local mutation:
//! call-then-mutate. The partner is called first, with no database
//! transaction held across the HTTP request; only on success is the local
//! status updated. If the local update fails the error propagates so the
//! message is retried, and the retried partner call is a guaranteed no-op
//! through the idempotency key - only the local transition is re-applied.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::domain::ExpenseStatus;
use crate::error::Result;
use crate::lock::{LockGuard, LockStore};
use crate::partner::PaymentPartner;
use crate::service::Metrics;
use crate::store::ExpenseStore;

const LOCK_KEY_PREFIX: &str = "expense-payment:lock:";

/// Settles one approved expense. Safe to invoke any number of times for
/// the same expense: redeliveries, retries, and duplicate events all
/// collapse into a single external payment.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn execute(&self, expense_id: i64, amount: i64, idempotency_key: &str) -> Result<()>;
}

pub struct SettlementProcessor {
    store: Arc<dyn ExpenseStore>,
    lock: Arc<dyn LockStore>,
    partner: Arc<dyn PaymentPartner>,
    lock_ttl: Duration,
    metrics: Arc<Metrics>,
}

impl SettlementProcessor {
    pub fn new(
        store: Arc<dyn ExpenseStore>,
        lock: Arc<dyn LockStore>,
        partner: Arc<dyn PaymentPartner>,
        lock_ttl: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            lock,
            partner,
            lock_ttl,
            metrics,
        }
    }

    async fn settle(&self, expense_id: i64, amount: i64, idempotency_key: &str) -> Result<()> {
        // Partner first, no transaction held across the call. A duplicate
        // external id means an earlier attempt already moved the money.
        let payment = self.partner.execute(amount, idempotency_key).await?;
        if payment.duplicate {
            warn!(
                expense_id,
                external_id = idempotency_key,
                "partner had already settled this payment"
            );
        }

        let completed = self.store.complete_expense(expense_id, Utc::now()).await?;
        if !completed {
            // status moved under us between the fetch and the update
            warn!(expense_id, "expense no longer approved at completion");
        }

        info!(
            expense_id,
            partner_id = %payment.partner_id,
            external_id = idempotency_key,
            "expense settled"
        );
        self.metrics.inc_settlements_completed();
        Ok(())
    }
}

#[async_trait]
impl PaymentProcessor for SettlementProcessor {
    async fn execute(&self, expense_id: i64, amount: i64, idempotency_key: &str) -> Result<()> {
        let expense = match self.store.find_expense(expense_id).await? {
            Some(expense) => expense,
            None => {
                // stale or deleted; nothing to settle
                info!(expense_id, "expense not found, skipping settlement");
                self.metrics.inc_settlement_noops();
                return Ok(());
            }
        };

        if expense.status != ExpenseStatus::Approved {
            // most commonly a duplicate delivery of an already-completed
            // expense; anything else is unexpected but still a no-op
            info!(expense_id, status = %expense.status, "expense not approved, skipping settlement");
            self.metrics.inc_settlement_noops();
            return Ok(());
        }

        let lock_key = format!("{LOCK_KEY_PREFIX}{expense_id}");
        let guard = match LockGuard::acquire(self.lock.clone(), &lock_key, self.lock_ttl).await? {
            Some(guard) => guard,
            None => {
                // another attempt is in flight; step aside instead of racing it
                info!(expense_id, "settlement already locked by another attempt");
                self.metrics.inc_settlement_noops();
                return Ok(());
            }
        };

        // The lock must be free by the time the consumer retries a failed
        // attempt, so the release is awaited on the error path too; the
        // guard's drop-release only backstops a panic.
        let result = self.settle(expense_id, amount, idempotency_key).await;
        if let Err(err) = guard.release().await {
            warn!(expense_id, error = %err, "lock release failed; TTL will expire it");
        }
        result
    }
}
