use thiserror::Error;

/// Main error type for the expense settlement service
#[derive(Error, Debug)]
pub enum ExpenseError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Validation / policy errors, surfaced synchronously to the caller
    #[error("Forbidden")]
    Forbidden,

    #[error("Expense not found")]
    ExpenseNotFound,

    #[error("Expense already processed")]
    AlreadyProcessed,

    #[error("Expense does not require approval")]
    NotRequireApproval,

    #[error("Amount can't be less than {min} minor units", min = crate::domain::MIN_AMOUNT)]
    AmountTooSmall,

    #[error("Amount can't be greater than {max} minor units", max = crate::domain::MAX_AMOUNT)]
    AmountTooLarge,

    // Settlement partner errors (5xx and unexpected replies are retry-eligible)
    #[error("Payment partner error with status code {status}")]
    Partner { status: u16 },

    #[error("Payment partner returned an unreadable response: {0}")]
    PartnerResponse(String),

    // Messaging errors
    #[error("Event send failed: {0}")]
    EventSend(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for ExpenseError
pub type Result<T> = std::result::Result<T, ExpenseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_messages_name_the_bounds() {
        assert!(ExpenseError::AmountTooSmall.to_string().contains("10000"));
        assert!(ExpenseError::AmountTooLarge.to_string().contains("50000000"));
    }
}
