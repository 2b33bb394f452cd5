//! Voltage Alarm - Alarm Rule Engine Library
//!
//! Evaluates user-defined alarm rules against live telemetry delivered over
//! pub/sub and records edge-triggered ACTIVE/CLEARED rows:
//! - THRESHOLD: value outside [min, max] (or above max only)
//! - DIRECT: value is `true` or `1`
//! - BIT_VALUE: independent alarms on configured bits of an integer
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐ topics ┌──────────────┐ events ┌──────────────┐
//! │ConfigLoader │───────▶│TopicSubscriber│◀──────│  Transport   │
//! │  (SQLite)   │        └──────────────┘        │ (Redis/mem)  │
//! └─────────────┘                                └──────┬───────┘
//!        │ RuleIndex                                    │ (topic, body)
//!        ▼                                              ▼
//! ┌─────────────┐ Observation ┌─────────────┐    ┌──────────────┐
//! │MessageRouter│────────────▶│ Dispatcher  │───▶│ StateStore   │
//! │extract+eval │             │(key shards) │    │ EventLogger  │
//! └─────────────┘             └─────────────┘    └──────────────┘
//! ```

pub mod dispatcher;
pub mod engine;
mod error;
pub mod evaluator;
pub mod extractor;
pub mod loader;
pub mod logger;
pub mod memory_impl;
pub mod repository;
pub mod router;
pub mod schema;
pub mod state;
pub mod subscriber;
pub mod traits;
pub mod transport;
pub mod types;

// Re-export public API
pub use dispatcher::ApplyOutcome;
pub use engine::{AlarmEngine, EngineConfig};
pub use error::{AlarmError, Result};
pub use evaluator::{evaluate, Evaluation, SkipReason};
pub use extractor::{Document, PayloadExtractor};
pub use loader::{ConfigLoader, RuleIndex};
pub use logger::EventLogger;
pub use memory_impl::{MemoryLogSink, StaticConfigSource};
pub use repository::SqliteAlarmStore;
pub use router::{MessageRouter, Observation};
pub use schema::init_schema;
pub use state::StateStore;
pub use subscriber::TopicSubscriber;
pub use traits::{ConfigSource, LogSink, Transport, TransportEvent};
pub use transport::{MemoryTransport, RedisTransport, RedisTransportConfig};

pub use types::{
    ActivationState, BitRule, LogAction, LogEntry, LogStatus, NewLogEntry, RuleConfig, RuleKind,
    RuleKindTag, StateKey, ThresholdLimits,
};
