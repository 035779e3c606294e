mod stub;

use clap::{Parser, Subcommand};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use expensed::config::LoggingConfig;
use expensed::{
    AppConfig, ApprovalService, ChannelBroker, CreateExpenseRequest, Decision,
    ExpenseApprovedHandler, ExpenseService, ExpenseStore, HttpPartner, MemoryLockStore,
    MemoryStore, Metrics, PostgresStore, Result, RetryingConsumer, Role, SettlementProcessor,
};

#[derive(Parser)]
#[command(name = "expensed", about = "Expense approval and settlement service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Run the mock settlement partner API
    PartnerStub {
        #[arg(long, default_value_t = 9999)]
        port: u16,
    },
    /// Run an in-process end-to-end settlement demo against the stub partner
    Demo {
        #[arg(long, default_value_t = 9999)]
        partner_port: u16,
        /// Number of expenses to seed
        #[arg(long, default_value_t = 6)]
        count: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load()?;
    init_logging(&config.logging);

    if let Err(errors) = config.validate() {
        for error in &errors {
            warn!("config: {error}");
        }
    }

    match cli.command {
        Commands::Migrate => {
            let store =
                PostgresStore::new(&config.database.url, config.database.max_connections).await?;
            store.migrate().await?;
        }
        Commands::PartnerStub { port } => {
            stub::serve(port, async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await?;
        }
        Commands::Demo {
            partner_port,
            count,
        } => run_demo(config, partner_port, count).await?,
    }

    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    if config.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// End-to-end pipeline in one process: stub partner, in-memory store and
/// lock, channel broker, retrying consumer. Seeds a mix of auto-approved
/// and manager-approved expenses and drains the settlement queue.
async fn run_demo(mut config: AppConfig, partner_port: u16, count: usize) -> Result<()> {
    let (stub_stop_tx, stub_stop_rx) = tokio::sync::oneshot::channel::<()>();
    let stub_task = tokio::spawn(stub::serve(partner_port, async {
        let _ = stub_stop_rx.await;
    }));

    config.partner.base_url = format!("http://127.0.0.1:{partner_port}");
    // give the stub a moment to bind
    tokio::time::sleep(Duration::from_millis(100)).await;

    let store = Arc::new(MemoryStore::new());
    let lock = Arc::new(MemoryLockStore::new());
    let partner = Arc::new(HttpPartner::new(&config.partner)?);
    let metrics = Arc::new(Metrics::new());
    let (sender, source) = ChannelBroker::new(&config.consumer.topic, 64);
    let sender = Arc::new(sender);

    let expenses = ExpenseService::new(store.clone(), sender.clone(), metrics.clone());
    let approvals = ApprovalService::new(store.clone(), sender.clone(), metrics.clone());
    let processor = Arc::new(SettlementProcessor::new(
        store.clone(),
        lock,
        partner,
        config.settlement.lock_ttl(),
        metrics.clone(),
    ));

    let handler = ExpenseApprovedHandler::new(processor);
    let consumer = RetryingConsumer::new(source, handler, config.consumer.clone(), metrics.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer_task = tokio::spawn(consumer.run(shutdown_rx));

    let mut rng = rand::thread_rng();
    let mut expected_events = 0u64;

    for i in 0..count {
        let employee_id = 100 + i as i64;
        let auto = i % 2 == 0;
        let amount = if auto {
            rng.gen_range(expensed::MIN_AMOUNT..expensed::APPROVAL_THRESHOLD)
        } else {
            rng.gen_range(expensed::APPROVAL_THRESHOLD..=expensed::MAX_AMOUNT)
        };

        let expense = expenses
            .create(CreateExpenseRequest {
                user_id: employee_id,
                amount,
                description: format!("demo expense {i}"),
                receipt_url: None,
            })
            .await?;

        if auto {
            expected_events += 1;
            continue;
        }

        // manager 1 decides; reject every third to show a decided-but-not-
        // settled expense alongside the completed ones
        let decision = if i % 3 == 0 {
            Decision::Rejected
        } else {
            Decision::Approved
        };
        approvals
            .decide(expense.id, 1, Role::Manager, decision, None)
            .await?;
        if decision == Decision::Approved {
            expected_events += 1;
        }
    }

    // drain: wait for every emitted event to be processed
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    while metrics.messages_processed() < expected_events {
        if tokio::time::Instant::now() > deadline {
            warn!("demo timed out waiting for the consumer to drain");
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let _ = shutdown_tx.send(true);
    if let Err(err) = consumer_task.await.map_err(|e| {
        expensed::ExpenseError::Internal(format!("consumer task panicked: {e}"))
    })? {
        warn!(error = %err, "consumer exited with error");
    }

    for id in 1..=count as i64 {
        if let Some(expense) = store.find_expense(id).await? {
            info!(
                expense_id = expense.id,
                amount = expense.amount,
                status = %expense.status,
                processed_at = ?expense.processed_at,
                "final state"
            );
        }
    }
    info!("{}", metrics.summary());

    let _ = stub_stop_tx.send(());
    let _ = stub_task.await;

    Ok(())
}
