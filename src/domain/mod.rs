//! Pure domain types and status-transition rules. No I/O lives here; this
//! module is the single source of truth for amount thresholds, the expense
//! state machine, and the idempotency key format.

mod approval;
mod event;
mod expense;

pub use approval::{Approval, Decision, Role};
pub use event::ExpenseApprovedEvent;
pub use expense::{
    check_decision_preconditions, Expense, ExpenseStatus, NewExpense, APPROVAL_THRESHOLD,
    MAX_AMOUNT, MIN_AMOUNT,
};
