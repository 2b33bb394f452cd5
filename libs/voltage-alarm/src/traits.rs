//! Capability traits consumed by the alarm engine
//!
//! The engine only talks to the outside world through these seams. Production
//! implementations live in `transport::redis` and `repository`; in-memory
//! implementations in `transport::memory` and `memory_impl`.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::types::{LogEntry, NewLogEntry, RuleConfig};

/// Event delivered by a transport after `connect`
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Raw message body published on `topic`
    Message { topic: String, payload: Bytes },
    /// Connection was re-established; all subscriptions are gone
    Reconnected,
}

/// Publish/subscribe transport
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open the connection and return the event stream
    ///
    /// The stream ends when the transport is closed.
    async fn connect(&self) -> Result<mpsc::Receiver<TransportEvent>>;

    /// Subscribe to topics; already subscribed topics are a no-op
    async fn subscribe(&self, topics: &[String]) -> Result<()>;

    /// Unsubscribe from topics; unknown topics are a no-op
    async fn unsubscribe(&self, topics: &[String]) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Close the connection and end the event stream
    async fn close(&self) -> Result<()>;
}

/// Source of rule definitions with bit children and resolved topics
#[async_trait]
pub trait ConfigSource: Send + Sync + 'static {
    async fn list_rule_configs(&self) -> Result<Vec<RuleConfig>>;
}

/// Persistence sink for activation log rows
#[async_trait]
pub trait LogSink: Send + Sync + 'static {
    /// Insert an ACTIVE row and return its id
    ///
    /// Fails with `AlarmError::DuplicateOpenLog` when the sink enforces
    /// one open row per key and one already exists.
    async fn create_log(&self, entry: &NewLogEntry) -> Result<i64>;

    /// Most recent open row for the key, if any
    async fn find_open_log(&self, rule_id: i64, bit_position: Option<u8>)
        -> Result<Option<LogEntry>>;

    /// Mark the row CLEARED at `cleared_at`
    async fn close_log(&self, id: i64, cleared_at: DateTime<Utc>) -> Result<()>;

    /// Every currently open row
    async fn list_open_logs(&self) -> Result<Vec<LogEntry>>;
}
