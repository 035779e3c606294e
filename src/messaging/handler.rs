use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use super::{MessageHandler, OwnedMessage};
use crate::domain::ExpenseApprovedEvent;
use crate::error::Result;
use crate::service::PaymentProcessor;

/// Decodes one approved-expense event and hands it to the payment
/// processor. Decode failures are terminal for the message: the payload
/// will not deserialize any better on a retry, so the attempts exhaust and
/// the consumer drops the message with a logged error.
pub struct ExpenseApprovedHandler {
    processor: Arc<dyn PaymentProcessor>,
}

impl ExpenseApprovedHandler {
    pub fn new(processor: Arc<dyn PaymentProcessor>) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl MessageHandler for ExpenseApprovedHandler {
    async fn handle(&self, message: &OwnedMessage) -> Result<()> {
        debug!(key = %message.key, "processing expense-approved event");

        let event: ExpenseApprovedEvent = serde_json::from_slice(&message.payload)?;

        self.processor
            .execute(event.id, event.amount, &event.idempotency_key)
            .await?;

        info!(key = %message.key, expense_id = event.id, "expense-approved event settled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExpenseError;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct RecordingProcessor {
        calls: AtomicU64,
        last_key: std::sync::Mutex<String>,
    }

    #[async_trait]
    impl PaymentProcessor for RecordingProcessor {
        async fn execute(&self, _expense_id: i64, _amount: i64, idempotency_key: &str) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_key.lock().unwrap() = idempotency_key.to_string();
            Ok(())
        }
    }

    struct FailingProcessor;

    #[async_trait]
    impl PaymentProcessor for FailingProcessor {
        async fn execute(&self, _expense_id: i64, _amount: i64, _idempotency_key: &str) -> Result<()> {
            Err(ExpenseError::Partner { status: 503 })
        }
    }

    fn message(payload: &[u8]) -> OwnedMessage {
        OwnedMessage {
            key: "expense-8".to_string(),
            payload: payload.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_valid_event_reaches_processor() {
        let processor = Arc::new(RecordingProcessor {
            calls: AtomicU64::new(0),
            last_key: std::sync::Mutex::new(String::new()),
        });
        let handler = ExpenseApprovedHandler::new(processor.clone());

        let payload =
            br#"{"id": 8, "user_id": 3, "amount": 17000, "idempotency_key": "EXP-000000008"}"#;
        handler.handle(&message(payload)).await.unwrap();

        assert_eq!(processor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*processor.last_key.lock().unwrap(), "EXP-000000008");
    }

    #[tokio::test]
    async fn test_garbage_payload_is_an_error() {
        let handler = ExpenseApprovedHandler::new(Arc::new(FailingProcessor));
        let result = handler.handle(&message(b"not json")).await;
        assert!(matches!(result, Err(ExpenseError::Json(_))));
    }

    #[tokio::test]
    async fn test_processor_error_passes_through() {
        let handler = ExpenseApprovedHandler::new(Arc::new(FailingProcessor));

        let payload =
            br#"{"id": 8, "user_id": 3, "amount": 17000, "idempotency_key": "EXP-000000008"}"#;
        let result = handler.handle(&message(payload)).await;
        assert!(matches!(result, Err(ExpenseError::Partner { status: 503 })));
    }
}
