use serde::{Deserialize, Serialize};

use super::Expense;

/// Emitted once an expense becomes `Approved`. May be redelivered or
/// duplicated by the transport; consumers must tolerate that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseApprovedEvent {
    pub id: i64,
    pub user_id: i64,
    pub amount: i64,
    pub idempotency_key: String,
}

impl ExpenseApprovedEvent {
    /// Partition/grouping key: events for the same expense must be
    /// processed sequentially.
    pub fn ordering_key(&self) -> String {
        format!("expense-{}", self.id)
    }
}

impl From<&Expense> for ExpenseApprovedEvent {
    fn from(expense: &Expense) -> Self {
        Self {
            id: expense.id,
            user_id: expense.user_id,
            amount: expense.amount,
            idempotency_key: expense.idempotency_key(),
        }
    }
}
