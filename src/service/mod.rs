mod approval;
mod expense;
mod metrics;
mod settlement;

pub use approval::ApprovalService;
pub use expense::{CreateExpenseRequest, ExpenseService};
pub use metrics::Metrics;
pub use settlement::{PaymentProcessor, SettlementProcessor};
