use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ExpenseError, Result};

/// Minimum submittable amount, in minor currency units.
pub const MIN_AMOUNT: i64 = 10_000;
/// Maximum submittable amount, in minor currency units.
pub const MAX_AMOUNT: i64 = 50_000_000;
/// Amounts at or above this require a manager decision; below it the
/// expense is created directly in `Approved` status.
pub const APPROVAL_THRESHOLD: i64 = 1_000_000;

const KEY_PREFIX: &str = "EXP-";

/// Expense lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseStatus {
    AwaitingApproval,
    Approved,
    Rejected,
    Completed,
}

impl ExpenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpenseStatus::AwaitingApproval => "awaiting_approval",
            ExpenseStatus::Approved => "approved",
            ExpenseStatus::Rejected => "rejected",
            ExpenseStatus::Completed => "completed",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "awaiting_approval" => Ok(ExpenseStatus::AwaitingApproval),
            "approved" => Ok(ExpenseStatus::Approved),
            "rejected" => Ok(ExpenseStatus::Rejected),
            "completed" => Ok(ExpenseStatus::Completed),
            other => Err(ExpenseError::Internal(format!(
                "invalid expense status: {other}"
            ))),
        }
    }

    /// Check if this status can transition to another status
    pub fn can_transition_to(&self, target: ExpenseStatus) -> bool {
        use ExpenseStatus::*;

        matches!(
            (self, target),
            (AwaitingApproval, Approved) | (AwaitingApproval, Rejected) | (Approved, Completed)
        )
    }

}

impl fmt::Display for ExpenseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A submitted expense
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    pub id: i64,
    pub user_id: i64,
    /// Amount in minor currency units; validated against [`MIN_AMOUNT`] and
    /// [`MAX_AMOUNT`] at creation, not re-checked downstream.
    pub amount: i64,
    pub description: String,
    pub receipt_url: Option<String>,
    pub status: ExpenseStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Fields for a not-yet-persisted expense
#[derive(Debug, Clone)]
pub struct NewExpense {
    pub user_id: i64,
    pub amount: i64,
    pub description: String,
    pub receipt_url: Option<String>,
    pub status: ExpenseStatus,
}

impl Expense {
    pub fn requires_approval(&self) -> bool {
        self.amount >= APPROVAL_THRESHOLD
    }

    pub fn auto_approved(&self) -> bool {
        self.amount < APPROVAL_THRESHOLD
    }

    /// Idempotency token handed to the settlement partner. Stable for a
    /// given id: `"EXP-"` plus the base-36 id, uppercased and left-padded
    /// with zeros to 9 characters (id 120 -> `EXP-00000003C`).
    pub fn idempotency_key(&self) -> String {
        idempotency_key(self.id)
    }
}

/// Compute the idempotency key for an expense id.
pub fn idempotency_key(id: i64) -> String {
    format!("{KEY_PREFIX}{:0>9}", base36_upper(id))
}

fn base36_upper(mut n: i64) -> String {
    const DIGITS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

    if n <= 0 {
        return "0".to_string();
    }

    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Validate a manager decision against the locked expense row. Checks run
/// in a fixed order so concurrent losers observe the same failure; the
/// role check happens before any row is fetched and is not repeated here.
pub fn check_decision_preconditions(expense: Option<&Expense>, decider_id: i64) -> Result<()> {
    let expense = expense.ok_or(ExpenseError::ExpenseNotFound)?;

    if expense.user_id == decider_id {
        return Err(ExpenseError::Forbidden);
    }
    if expense.status != ExpenseStatus::AwaitingApproval {
        return Err(ExpenseError::AlreadyProcessed);
    }
    if !expense.requires_approval() {
        return Err(ExpenseError::NotRequireApproval);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expense(id: i64, user_id: i64, amount: i64, status: ExpenseStatus) -> Expense {
        Expense {
            id,
            user_id,
            amount,
            description: "team lunch".to_string(),
            receipt_url: None,
            status,
            created_at: Utc::now(),
            processed_at: None,
        }
    }

    #[test]
    fn test_idempotency_key_format() {
        assert_eq!(idempotency_key(120), "EXP-00000003C");
        assert_eq!(idempotency_key(8), "EXP-000000008");
        assert_eq!(idempotency_key(0), "EXP-000000000");
        assert_eq!(idempotency_key(36), "EXP-000000010");
        // 36^9 - 1 fills all nine digits
        assert_eq!(idempotency_key(101_559_956_668_415), "EXP-ZZZZZZZZZ");
    }

    #[test]
    fn test_idempotency_key_is_stable() {
        let e = expense(120, 1, 2_000_000, ExpenseStatus::Approved);
        assert_eq!(e.idempotency_key(), e.idempotency_key());
        assert_eq!(e.idempotency_key(), idempotency_key(120));
    }

    #[test]
    fn test_approval_threshold() {
        assert!(!expense(1, 1, APPROVAL_THRESHOLD - 1, ExpenseStatus::Approved).requires_approval());
        assert!(expense(1, 1, APPROVAL_THRESHOLD, ExpenseStatus::AwaitingApproval).requires_approval());
        assert!(expense(1, 1, MIN_AMOUNT, ExpenseStatus::Approved).auto_approved());
        assert!(!expense(1, 1, MAX_AMOUNT, ExpenseStatus::AwaitingApproval).auto_approved());
    }

    #[test]
    fn test_legal_transitions() {
        use ExpenseStatus::*;

        assert!(AwaitingApproval.can_transition_to(Approved));
        assert!(AwaitingApproval.can_transition_to(Rejected));
        assert!(Approved.can_transition_to(Completed));

        assert!(!Approved.can_transition_to(Rejected));
        assert!(!Completed.can_transition_to(Approved));
        assert!(!Rejected.can_transition_to(Completed));
        assert!(!AwaitingApproval.can_transition_to(Completed));
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            ExpenseStatus::AwaitingApproval,
            ExpenseStatus::Approved,
            ExpenseStatus::Rejected,
            ExpenseStatus::Completed,
        ] {
            assert_eq!(ExpenseStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(ExpenseStatus::parse("pending").is_err());
    }

    #[test]
    fn test_decision_preconditions_order() {
        assert!(matches!(
            check_decision_preconditions(None, 2),
            Err(ExpenseError::ExpenseNotFound)
        ));

        // self-approval barred even when the status check would also fail
        let own = expense(1, 2, 2_000_000, ExpenseStatus::Approved);
        assert!(matches!(
            check_decision_preconditions(Some(&own), 2),
            Err(ExpenseError::Forbidden)
        ));

        let processed = expense(1, 1, 2_000_000, ExpenseStatus::Approved);
        assert!(matches!(
            check_decision_preconditions(Some(&processed), 2),
            Err(ExpenseError::AlreadyProcessed)
        ));

        let small = expense(1, 1, MIN_AMOUNT, ExpenseStatus::AwaitingApproval);
        assert!(matches!(
            check_decision_preconditions(Some(&small), 2),
            Err(ExpenseError::NotRequireApproval)
        ));

        let ok = expense(1, 1, 2_000_000, ExpenseStatus::AwaitingApproval);
        assert!(check_decision_preconditions(Some(&ok), 2).is_ok());
    }
}
