//! Messaging seams: the event sender used after a decision commits, the
//! message source drained by the consumer, and an in-process channel broker
//! implementing both for tests and the demo pipeline. A real broker client
//! slots in behind the same traits; the transport is expected to deliver
//! at least once and to order messages per key.

mod consumer;
mod handler;

pub use consumer::RetryingConsumer;
pub use handler::ExpenseApprovedHandler;

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::domain::ExpenseApprovedEvent;
use crate::error::{ExpenseError, Result};

/// One message pulled from the broker
#[derive(Debug, Clone)]
pub struct OwnedMessage {
    /// Ordering key (expense id) the transport partitions by
    pub key: String,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait EventSender: Send + Sync {
    /// Publish one approved-expense event, keyed by its ordering key.
    async fn send(&self, event: &ExpenseApprovedEvent) -> Result<()>;

    fn topic(&self) -> &str;
}

#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Blocking read of the next message; `None` once the source is closed.
    async fn recv(&mut self) -> Result<Option<OwnedMessage>>;

    /// Acknowledge the message so the broker does not redeliver it.
    async fn commit(&mut self, message: &OwnedMessage) -> Result<()>;
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &OwnedMessage) -> Result<()>;
}

/// In-process broker over an mpsc channel; `new` hands out the producer
/// and consumer halves.
pub struct ChannelBroker;

impl ChannelBroker {
    pub fn new(topic: &str, capacity: usize) -> (ChannelSender, ChannelSource) {
        let (tx, rx) = mpsc::channel(capacity);
        let committed = Arc::new(AtomicU64::new(0));

        (
            ChannelSender {
                topic: topic.to_string(),
                tx,
            },
            ChannelSource { rx, committed },
        )
    }
}

/// Producer half of [`ChannelBroker`]
#[derive(Clone)]
pub struct ChannelSender {
    topic: String,
    tx: mpsc::Sender<OwnedMessage>,
}

#[async_trait]
impl EventSender for ChannelSender {
    async fn send(&self, event: &ExpenseApprovedEvent) -> Result<()> {
        let message = OwnedMessage {
            key: event.ordering_key(),
            payload: serde_json::to_vec(event)?,
        };

        self.tx
            .send(message)
            .await
            .map_err(|e| ExpenseError::EventSend(e.to_string()))?;

        debug!(topic = %self.topic, key = %event.ordering_key(), "event published");
        Ok(())
    }

    fn topic(&self) -> &str {
        &self.topic
    }
}

/// Consumer half of [`ChannelBroker`]
pub struct ChannelSource {
    rx: mpsc::Receiver<OwnedMessage>,
    committed: Arc<AtomicU64>,
}

impl ChannelSource {
    /// Number of committed messages (test hook).
    pub fn committed(&self) -> u64 {
        self.committed.load(Ordering::Relaxed)
    }

    /// Handle to the commit counter that stays valid after the source is
    /// moved into a consumer.
    pub fn committed_handle(&self) -> Arc<AtomicU64> {
        self.committed.clone()
    }
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn recv(&mut self) -> Result<Option<OwnedMessage>> {
        Ok(self.rx.recv().await)
    }

    async fn commit(&mut self, _message: &OwnedMessage) -> Result<()> {
        self.committed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_broker_round_trip() {
        let (sender, mut source) = ChannelBroker::new("expense-approved", 8);
        assert_eq!(sender.topic(), "expense-approved");

        let event = ExpenseApprovedEvent {
            id: 120,
            user_id: 7,
            amount: 2_500_000,
            idempotency_key: "EXP-00000003C".to_string(),
        };
        sender.send(&event).await.unwrap();
        drop(sender);

        let message = source.recv().await.unwrap().unwrap();
        assert_eq!(message.key, "expense-120");
        let decoded: ExpenseApprovedEvent = serde_json::from_slice(&message.payload).unwrap();
        assert_eq!(decoded, event);

        source.commit(&message).await.unwrap();
        assert_eq!(source.committed(), 1);

        // closed source yields None
        assert!(source.recv().await.unwrap().is_none());
    }
}
