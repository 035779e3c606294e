use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::ExpenseStore;
use crate::domain::{
    check_decision_preconditions, Approval, Decision, Expense, ExpenseStatus, NewExpense,
};
use crate::error::Result;

#[derive(Default)]
struct State {
    expenses: HashMap<i64, Expense>,
    approvals: Vec<Approval>,
    next_expense_id: i64,
    next_approval_id: i64,
}

/// In-memory [`ExpenseStore`] used by the demo pipeline and tests. A single
/// mutex stands in for the database's row lock: a decision holds it for the
/// whole check-insert-update sequence, so concurrent deciders serialize the
/// same way they would on `FOR UPDATE`.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Approvals recorded so far (test hook).
    pub async fn approvals(&self) -> Vec<Approval> {
        self.state.lock().await.approvals.clone()
    }
}

#[async_trait]
impl ExpenseStore for MemoryStore {
    async fn create_expense(&self, new: NewExpense) -> Result<Expense> {
        let mut state = self.state.lock().await;
        state.next_expense_id += 1;

        let expense = Expense {
            id: state.next_expense_id,
            user_id: new.user_id,
            amount: new.amount,
            description: new.description,
            receipt_url: new.receipt_url,
            status: new.status,
            created_at: Utc::now(),
            processed_at: None,
        };
        state.expenses.insert(expense.id, expense.clone());

        Ok(expense)
    }

    async fn find_expense(&self, id: i64) -> Result<Option<Expense>> {
        Ok(self.state.lock().await.expenses.get(&id).cloned())
    }

    async fn decide_expense(
        &self,
        id: i64,
        approver_id: i64,
        decision: Decision,
        note: Option<String>,
    ) -> Result<Expense> {
        let mut state = self.state.lock().await;

        check_decision_preconditions(state.expenses.get(&id), approver_id)?;

        state.next_approval_id += 1;
        let approval = Approval {
            id: state.next_approval_id,
            expense_id: id,
            approver_id,
            decision,
            note,
            created_at: Utc::now(),
        };
        state.approvals.push(approval);

        let status = decision.resulting_status();
        match state.expenses.get_mut(&id) {
            Some(expense) => {
                expense.status = status;
                Ok(expense.clone())
            }
            None => Err(crate::error::ExpenseError::ExpenseNotFound),
        }
    }

    async fn complete_expense(&self, id: i64, processed_at: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.lock().await;

        match state.expenses.get_mut(&id) {
            Some(expense) if expense.status == ExpenseStatus::Approved => {
                expense.status = ExpenseStatus::Completed;
                expense.processed_at = Some(processed_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
