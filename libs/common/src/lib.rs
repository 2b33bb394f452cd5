//! `VoltageEMS` basic library (basic library)
//!
//! Provides basic functions shared by all services, including:
//! - logging bootstrap (console + daily rolling files)
//! - graceful shutdown signals
//! - SQLite pool construction
//! - bounded retry with exponential backoff

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub mod logging;
pub mod retry;
pub mod shutdown;

pub use logging::LogConfig;
pub use retry::RetryPolicy;

// Re-export common dependencies
pub use anyhow;
pub use tokio;
