//! Generic retrying wrapper around a message source. Each message is
//! driven through the handler under bounded retries, a fixed backoff, and
//! a fresh per-attempt execution deadline. A message whose attempts are
//! exhausted is still committed so one poison message cannot stall the
//! partition; the terminal failure is logged for manual follow-up.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

use super::{MessageHandler, MessageSource, OwnedMessage};
use crate::config::ConsumerConfig;
use crate::error::Result;
use crate::service::Metrics;

pub struct RetryingConsumer<S, H> {
    source: S,
    handler: H,
    config: ConsumerConfig,
    metrics: Arc<Metrics>,
}

impl<S, H> RetryingConsumer<S, H>
where
    S: MessageSource,
    H: MessageHandler,
{
    pub fn new(source: S, handler: H, config: ConsumerConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            source,
            handler,
            config,
            metrics,
        }
    }

    /// Consume until the shutdown flag flips or the source closes. The
    /// in-flight message always finishes its remaining attempts before the
    /// loop re-checks shutdown; the overall deadline for draining belongs
    /// to the process, not to this loop.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(topic = %self.config.topic, max_retries = self.config.max_retries, "consumer started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let message = tokio::select! {
                changed = shutdown.changed() => {
                    // a dropped shutdown sender counts as a stop request
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                received = self.source.recv() => match received? {
                    Some(message) => message,
                    None => {
                        info!(topic = %self.config.topic, "message source closed");
                        break;
                    }
                },
            };

            self.process(&message).await;
            self.source.commit(&message).await?;
            self.metrics.inc_messages_processed();
        }

        info!(topic = %self.config.topic, "consumer stopped");
        Ok(())
    }

    /// Drive one message through up to `max_retries + 1` attempts.
    async fn process(&self, message: &OwnedMessage) {
        let attempts = self.config.max_retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match timeout(self.config.max_execute(), self.handler.handle(message)).await {
                Ok(Ok(())) => return,
                Ok(Err(err)) => {
                    warn!(
                        topic = %self.config.topic,
                        key = %message.key,
                        attempt,
                        error = %err,
                        "handler attempt failed"
                    );
                    last_error = err.to_string();
                }
                Err(_) => {
                    warn!(
                        topic = %self.config.topic,
                        key = %message.key,
                        attempt,
                        deadline_secs = self.config.max_execute_secs,
                        "handler attempt timed out"
                    );
                    last_error = format!(
                        "attempt timed out after {}s",
                        self.config.max_execute_secs
                    );
                }
            }

            if attempt < attempts {
                self.metrics.inc_message_retries();
                sleep(self.config.backoff()).await;
            }
        }

        // Committed anyway below; an external reconciliation job is the
        // backstop for settlements that never made it through.
        error!(
            topic = %self.config.topic,
            key = %message.key,
            attempts,
            error = %last_error,
            "message dropped after exhausting retries"
        );
        self.metrics.inc_messages_exhausted();
    }
}
