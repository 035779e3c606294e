use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};

use super::ExpenseStore;
use crate::domain::{check_decision_preconditions, Decision, Expense, ExpenseStatus, NewExpense};
use crate::error::Result;

/// PostgreSQL storage adapter
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a PostgreSQL store from an existing connection pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn expense_from_row(row: &PgRow) -> Result<Expense> {
    let status: String = row.get("status");

    Ok(Expense {
        id: row.get("id"),
        user_id: row.get("user_id"),
        amount: row.get("amount"),
        description: row.get("description"),
        receipt_url: row.get("receipt_url"),
        status: ExpenseStatus::parse(&status)?,
        created_at: row.get("created_at"),
        processed_at: row.get("processed_at"),
    })
}

const EXPENSE_COLUMNS: &str =
    "id, user_id, amount, description, receipt_url, status, created_at, processed_at";

#[async_trait]
impl ExpenseStore for PostgresStore {
    async fn create_expense(&self, new: NewExpense) -> Result<Expense> {
        let now = Utc::now();

        let row = sqlx::query(
            r#"
            INSERT INTO expenses (user_id, amount, description, receipt_url, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(new.user_id)
        .bind(new.amount)
        .bind(&new.description)
        .bind(&new.receipt_url)
        .bind(new.status.as_str())
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        let id: i64 = row.get("id");
        debug!(expense_id = id, status = %new.status, "expense created");

        Ok(Expense {
            id,
            user_id: new.user_id,
            amount: new.amount,
            description: new.description,
            receipt_url: new.receipt_url,
            status: new.status,
            created_at: now,
            processed_at: None,
        })
    }

    async fn find_expense(&self, id: i64) -> Result<Option<Expense>> {
        let row = sqlx::query(&format!(
            "SELECT {EXPENSE_COLUMNS} FROM expenses WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(expense_from_row).transpose()
    }

    async fn decide_expense(
        &self,
        id: i64,
        approver_id: i64,
        decision: Decision,
        note: Option<String>,
    ) -> Result<Expense> {
        let mut tx = self.pool.begin().await?;

        // Exclusive row lock; concurrent deciders queue here and the
        // losers observe the updated status below.
        let row = sqlx::query(&format!(
            "SELECT {EXPENSE_COLUMNS} FROM expenses WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let expense = row.as_ref().map(expense_from_row).transpose()?;
        check_decision_preconditions(expense.as_ref(), approver_id)?;
        let mut expense = expense.ok_or(crate::error::ExpenseError::ExpenseNotFound)?;

        sqlx::query(
            r#"
            INSERT INTO approvals (expense_id, approver_id, decision, note, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(id)
        .bind(approver_id)
        .bind(decision.as_str())
        .bind(&note)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        let status = decision.resulting_status();
        sqlx::query("UPDATE expenses SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        debug!(expense_id = id, approver_id, decision = %decision, "decision committed");
        expense.status = status;
        Ok(expense)
    }

    async fn complete_expense(&self, id: i64, processed_at: DateTime<Utc>) -> Result<bool> {
        // Conditional update keeps Approved -> Completed safe to re-apply.
        let result = sqlx::query(
            r#"
            UPDATE expenses
            SET status = $1, processed_at = $2
            WHERE id = $3 AND status = $4
            "#,
        )
        .bind(ExpenseStatus::Completed.as_str())
        .bind(processed_at)
        .bind(id)
        .bind(ExpenseStatus::Approved.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
