use std::sync::Arc;
use tracing::error;

use crate::domain::{
    Expense, ExpenseApprovedEvent, ExpenseStatus, NewExpense, APPROVAL_THRESHOLD, MAX_AMOUNT,
    MIN_AMOUNT,
};
use crate::error::{ExpenseError, Result};
use crate::messaging::EventSender;
use crate::service::Metrics;
use crate::store::ExpenseStore;

/// Submission request for a new expense
#[derive(Debug, Clone)]
pub struct CreateExpenseRequest {
    pub user_id: i64,
    pub amount: i64,
    pub description: String,
    pub receipt_url: Option<String>,
}

/// Expense creation. Amounts below the approval threshold are created
/// directly in `Approved` status and emit the approved event right away;
/// larger amounts wait for a manager decision.
pub struct ExpenseService {
    store: Arc<dyn ExpenseStore>,
    sender: Arc<dyn EventSender>,
    metrics: Arc<Metrics>,
}

impl ExpenseService {
    pub fn new(
        store: Arc<dyn ExpenseStore>,
        sender: Arc<dyn EventSender>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            sender,
            metrics,
        }
    }

    pub async fn create(&self, request: CreateExpenseRequest) -> Result<Expense> {
        if request.amount < MIN_AMOUNT {
            return Err(ExpenseError::AmountTooSmall);
        }
        if request.amount > MAX_AMOUNT {
            return Err(ExpenseError::AmountTooLarge);
        }

        let status = if request.amount >= APPROVAL_THRESHOLD {
            ExpenseStatus::AwaitingApproval
        } else {
            ExpenseStatus::Approved
        };

        let expense = self
            .store
            .create_expense(NewExpense {
                user_id: request.user_id,
                amount: request.amount,
                description: request.description,
                receipt_url: request.receipt_url,
                status,
            })
            .await?;

        // Emit only after the insert committed. A failed emit never undoes
        // the stored expense; it is logged and counted, and an external
        // reconciliation job is the backstop.
        if expense.status == ExpenseStatus::Approved {
            let event = ExpenseApprovedEvent::from(&expense);
            match self.sender.send(&event).await {
                Ok(()) => self.metrics.inc_events_emitted(),
                Err(err) => {
                    error!(
                        expense_id = expense.id,
                        topic = self.sender.topic(),
                        error = %err,
                        "failed to send expense-approved event"
                    );
                    self.metrics.inc_event_emit_failures();
                }
            }
        }

        Ok(expense)
    }
}
