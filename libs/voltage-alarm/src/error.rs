//! Alarm Engine Error Types

use thiserror::Error;

/// Result type for alarm engine operations
pub type Result<T> = std::result::Result<T, AlarmError>;

/// Alarm engine errors
#[derive(Debug, Error)]
pub enum AlarmError {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Redis error
    #[error("Redis error: {0}")]
    Redis(String),

    /// Transport error (not connected, subscription rejected, ...)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Message body could not be decoded into a document
    #[error("Decode error: {0}")]
    Decode(String),

    /// Invalid rule or engine configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An open log row already exists for this key
    #[error("Open alarm log already exists for rule {rule_id} (bit {bit_position:?})")]
    DuplicateOpenLog {
        rule_id: i64,
        bit_position: Option<u8>,
    },

    /// Log row not found or no longer open
    #[error("Alarm log not found: {0}")]
    LogNotFound(i64),

    /// Engine is not running
    #[error("Alarm engine is not running")]
    NotRunning,

    /// Engine was already started
    #[error("Alarm engine is already running")]
    AlreadyRunning,
}

impl AlarmError {
    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AlarmError::Database(_) | AlarmError::Redis(_) | AlarmError::Transport(_)
        )
    }
}

impl From<sqlx::Error> for AlarmError {
    fn from(err: sqlx::Error) -> Self {
        AlarmError::Database(err.to_string())
    }
}

impl From<redis::RedisError> for AlarmError {
    fn from(err: redis::RedisError) -> Self {
        AlarmError::Redis(err.to_string())
    }
}

impl From<serde_json::Error> for AlarmError {
    fn from(err: serde_json::Error) -> Self {
        AlarmError::Decode(err.to_string())
    }
}
