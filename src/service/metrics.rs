use std::sync::atomic::{AtomicU64, Ordering};

/// Process-level counters for observability. Failures in the async path
/// are visible only here and in the logs; nothing is surfaced to callers.
#[derive(Default)]
pub struct Metrics {
    events_emitted: AtomicU64,
    event_emit_failures: AtomicU64,
    messages_processed: AtomicU64,
    message_retries: AtomicU64,
    messages_exhausted: AtomicU64,
    settlements_completed: AtomicU64,
    settlement_noops: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_events_emitted(&self) {
        self.events_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_event_emit_failures(&self) {
        self.event_emit_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_messages_processed(&self) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_message_retries(&self) {
        self.message_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_messages_exhausted(&self) {
        self.messages_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_settlements_completed(&self) {
        self.settlements_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_settlement_noops(&self) {
        self.settlement_noops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn events_emitted(&self) -> u64 {
        self.events_emitted.load(Ordering::Relaxed)
    }

    pub fn event_emit_failures(&self) -> u64 {
        self.event_emit_failures.load(Ordering::Relaxed)
    }

    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    pub fn message_retries(&self) -> u64 {
        self.message_retries.load(Ordering::Relaxed)
    }

    pub fn messages_exhausted(&self) -> u64 {
        self.messages_exhausted.load(Ordering::Relaxed)
    }

    pub fn settlements_completed(&self) -> u64 {
        self.settlements_completed.load(Ordering::Relaxed)
    }

    pub fn settlement_noops(&self) -> u64 {
        self.settlement_noops.load(Ordering::Relaxed)
    }

    /// Formatted snapshot for the demo summary and shutdown logs
    pub fn summary(&self) -> String {
        format!(
            "events: {} emitted / {} emit failures | messages: {} processed, {} retries, {} exhausted | settlements: {} completed, {} no-ops",
            self.events_emitted(),
            self.event_emit_failures(),
            self.messages_processed(),
            self.message_retries(),
            self.messages_exhausted(),
            self.settlements_completed(),
            self.settlement_noops(),
        )
    }
}
