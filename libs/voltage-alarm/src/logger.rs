//! Activation log writer
//!
//! Opens a row when a key becomes active and closes the most recent open row
//! when it clears. Transient sink failures are retried with the configured
//! policy before the error reaches the caller.

use std::sync::Arc;

use chrono::Utc;
use common::RetryPolicy;
use tracing::{info, warn};

use crate::error::{AlarmError, Result};
use crate::traits::LogSink;
use crate::types::{NewLogEntry, StateKey};

pub struct EventLogger {
    sink: Arc<dyn LogSink>,
    retry: RetryPolicy,
}

impl EventLogger {
    pub fn new(sink: Arc<dyn LogSink>, retry: RetryPolicy) -> Self {
        Self { sink, retry }
    }

    /// Create an ACTIVE row for `key`
    ///
    /// Returns the new row id, or `None` when the sink already holds an open
    /// row for the key (that row is adopted instead of duplicated).
    pub async fn open(
        &self,
        key: StateKey,
        label: &str,
        triggering_value: &str,
    ) -> Result<Option<i64>> {
        let entry = NewLogEntry {
            rule_id: key.rule_id,
            bit_position: key.bit,
            label: label.to_string(),
            triggering_value: triggering_value.to_string(),
            timestamp: Utc::now(),
        };

        let sink: &dyn LogSink = self.sink.as_ref();
        let entry = &entry;
        let created = self
            .retry
            .run("create alarm log", move || sink.create_log(entry), AlarmError::is_transient)
            .await;

        match created {
            Ok(id) => {
                info!(
                    "Alarm ACTIVE: {} '{}' value={} (log {})",
                    key, label, triggering_value, id
                );
                Ok(Some(id))
            },
            Err(AlarmError::DuplicateOpenLog { .. }) => {
                warn!(
                    "Alarm {} '{}' already has an open log row, keeping it",
                    key, label
                );
                Ok(None)
            },
            Err(e) => Err(e),
        }
    }

    /// Close the most recent open row for `key`
    ///
    /// Returns the closed row id, or `None` when no open row exists and the
    /// clear is dropped.
    pub async fn close(&self, key: StateKey, label: &str) -> Result<Option<i64>> {
        let sink: &dyn LogSink = self.sink.as_ref();

        let open = self
            .retry
            .run(
                "find open alarm log",
                move || sink.find_open_log(key.rule_id, key.bit),
                AlarmError::is_transient,
            )
            .await?;

        let Some(open) = open else {
            warn!("Alarm {} '{}' cleared but no open log row exists, clear dropped", key, label);
            return Ok(None);
        };

        let cleared_at = Utc::now();
        let id = open.id;
        self.retry
            .run(
                "close alarm log",
                move || sink.close_log(id, cleared_at),
                AlarmError::is_transient,
            )
            .await?;

        info!("Alarm CLEARED: {} '{}' (log {})", key, label, id);
        Ok(Some(id))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::memory_impl::MemoryLogSink;
    use crate::types::LogStatus;
    use tracing_test::traced_test;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 2,
        }
    }

    #[tokio::test]
    async fn test_open_then_close() {
        let sink = Arc::new(MemoryLogSink::new());
        let logger = EventLogger::new(sink.clone(), fast_retry());
        let key = StateKey::rule(5);

        let id = logger.open(key, "Overheat", "35").await.unwrap().unwrap();
        let closed = logger.close(key, "Overheat").await.unwrap();
        assert_eq!(closed, Some(id));

        let entries = sink.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, LogStatus::Cleared);
        assert_eq!(entries[0].triggering_value, "35");
        assert_eq!(entries[0].label, "Overheat");
        assert!(entries[0].cleared_at.is_some());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_close_without_open_row_is_dropped() {
        let sink = Arc::new(MemoryLogSink::new());
        let logger = EventLogger::new(sink.clone(), fast_retry());

        let closed = logger.close(StateKey::bit(5, 2), "Fan fault").await.unwrap();
        assert_eq!(closed, None);
        assert!(sink.entries().is_empty());
        assert!(logs_contain("clear dropped"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_duplicate_open_is_adopted() {
        let sink = Arc::new(MemoryLogSink::new());
        let logger = EventLogger::new(sink.clone(), fast_retry());
        let key = StateKey::rule(5);

        logger.open(key, "Overheat", "35").await.unwrap();
        let second = logger.open(key, "Overheat", "36").await.unwrap();
        assert_eq!(second, None);
        assert_eq!(sink.entries().len(), 1);
        assert!(logs_contain("already has an open log row"));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let sink = Arc::new(MemoryLogSink::new());
        sink.fail_next_writes(2);
        let logger = EventLogger::new(sink.clone(), fast_retry());

        let id = logger.open(StateKey::rule(1), "Overheat", "35").await.unwrap();
        assert!(id.is_some());
        assert_eq!(sink.entries().len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_return_error() {
        let sink = Arc::new(MemoryLogSink::new());
        sink.fail_next_writes(5);
        let logger = EventLogger::new(sink.clone(), fast_retry());

        let err = logger.open(StateKey::rule(1), "Overheat", "35").await.unwrap_err();
        assert!(err.is_transient());
        assert!(sink.entries().is_empty());
    }
}
