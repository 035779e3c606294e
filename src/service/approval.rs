use std::sync::Arc;
use tracing::{error, info};

use crate::domain::{Decision, Expense, ExpenseApprovedEvent, Role};
use crate::error::{ExpenseError, Result};
use crate::messaging::EventSender;
use crate::service::Metrics;
use crate::store::ExpenseStore;

/// Turns a manager decision into a durable state change and, for
/// approvals, an emitted event. The store runs the decision under an
/// exclusive row lock, so at most one concurrent decision wins per
/// expense; losers surface `AlreadyProcessed`.
pub struct ApprovalService {
    store: Arc<dyn ExpenseStore>,
    sender: Arc<dyn EventSender>,
    metrics: Arc<Metrics>,
}

impl ApprovalService {
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

    pub async fn decide(
        &self,
        expense_id: i64,
        decider_id: i64,
        decider_role: Role,
        decision: Decision,
        note: Option<String>,
    ) -> Result<Expense> {
        if !decider_role.can_decide() {
            return Err(ExpenseError::Forbidden);
        }

        let note = note.map(|n| n.trim().to_string());

        let expense = self
            .store
            .decide_expense(expense_id, decider_id, decision, note)
            .await?;

        info!(expense_id, decider_id, decision = %decision, "decision recorded");

        // Emission happens strictly after the decision committed; a failed
        // emit must not undo it. Log, count, move on - the event is lost
        // for this attempt and an external reconciliation job is the
        // backstop (an outbox would be the stronger alternative).
        if decision == Decision::Approved {
            let event = ExpenseApprovedEvent::from(&expense);
            match self.sender.send(&event).await {
                Ok(()) => self.metrics.inc_events_emitted(),
                Err(err) => {
                    error!(
                        expense_id,
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
