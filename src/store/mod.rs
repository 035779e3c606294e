//! Storage seams. The services only see the [`ExpenseStore`] trait; the
//! Postgres implementation owns connection pooling, transactions, and the
//! row lock used by the approval transition.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Decision, Expense, NewExpense};
use crate::error::Result;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExpenseStore: Send + Sync {
    /// Insert a new expense. The caller has already validated the amount
    /// and chosen the initial status via the auto-approval rule.
    async fn create_expense(&self, new: NewExpense) -> Result<Expense>;

    /// Fetch an expense, `None` if absent.
    async fn find_expense(&self, id: i64) -> Result<Option<Expense>>;

    /// Apply a manager decision in one transaction: lock the expense row
    /// exclusively, re-check the decision preconditions under the lock,
    /// insert the approval record, and move the expense to the decided
    /// status. Exactly one concurrent caller wins; losers fail with
    /// `AlreadyProcessed` (or the relevant precondition error) after the
    /// lock is granted. Returns the updated expense.
    async fn decide_expense(
        &self,
        id: i64,
        approver_id: i64,
        decision: Decision,
        note: Option<String>,
    ) -> Result<Expense>;

    /// Move an `Approved` expense to `Completed`, stamping `processed_at`.
    /// Conditional on the current status, so re-applying is harmless.
    /// Returns whether a row actually changed.
    async fn complete_expense(&self, id: i64, processed_at: DateTime<Utc>) -> Result<bool>;
}
