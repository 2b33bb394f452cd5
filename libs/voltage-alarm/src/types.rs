//! Alarm engine type definitions
//!
//! Core types shared by the engine components:
//! - RuleConfig / RuleKind: read-only rule snapshots, one closed variant per rule kind
//! - StateKey / ActivationState: in-memory activation tracking
//! - LogEntry / NewLogEntry: persisted activation log rows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AlarmError;

/// Highest bit position a bit rule may reference
pub const MAX_BIT_POSITION: u8 = 31;

// ============================================================================
// Rule Configuration
// ============================================================================

/// Alarm rule snapshot as loaded from the configuration source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Unique identifier
    pub id: i64,
    /// Owning device (opaque to the engine)
    pub device_id: i64,
    /// Transport topic the rule listens on
    pub topic: String,
    /// Property name read from the extracted document
    pub key: String,
    /// Display name used in logs and log rows
    pub name: String,
    /// Kind-specific parameters
    pub kind: RuleKind,
}

/// Rule kind with only the fields each kind needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleKind {
    /// Range threshold on a numeric value
    Threshold(ThresholdLimits),
    /// Boolean alarm: active on `true` or `1`
    Direct,
    /// Independent alarms on single bits of an integer value
    BitValue { bits: Vec<BitRule> },
}

/// Threshold bounds; an absent bound never trips its side
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ThresholdLimits {
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Only the upper bound is checked
    #[serde(default)]
    pub max_only: bool,
}

/// Named sub-condition on one bit position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitRule {
    pub id: i64,
    /// Bit position, 0..=31
    pub position: u8,
    pub name: String,
}

/// Stored discriminator of a rule kind (`kind` column)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleKindTag {
    Threshold,
    Direct,
    BitValue,
}

impl FromStr for RuleKindTag {
    type Err = AlarmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "THRESHOLD" => Ok(RuleKindTag::Threshold),
            "DIRECT" => Ok(RuleKindTag::Direct),
            "BIT_VALUE" | "BITVALUE" => Ok(RuleKindTag::BitValue),
            other => Err(AlarmError::InvalidConfig(format!(
                "unknown rule kind '{}'",
                other
            ))),
        }
    }
}

// ============================================================================
// Activation State
// ============================================================================

/// Key of one independently tracked activation: a rule, or one bit of a bit rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateKey {
    pub rule_id: i64,
    pub bit: Option<u8>,
}

impl StateKey {
    pub fn rule(rule_id: i64) -> Self {
        Self { rule_id, bit: None }
    }

    pub fn bit(rule_id: i64, position: u8) -> Self {
        Self {
            rule_id,
            bit: Some(position),
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bit {
            Some(bit) => write!(f, "rule {} bit {}", self.rule_id, bit),
            None => write!(f, "rule {}", self.rule_id),
        }
    }
}

/// Remembered outcome of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ActivationState {
    /// Never observed since process start (and not hydrated)
    #[default]
    Unknown,
    Inactive,
    Active,
}

/// Log row action produced by a state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogAction {
    /// Create a new ACTIVE row
    Open,
    /// Close the most recent open row
    Close,
}

impl ActivationState {
    pub fn from_active(active: bool) -> Self {
        if active {
            ActivationState::Active
        } else {
            ActivationState::Inactive
        }
    }

    /// Next state and log action for an observation
    ///
    /// `Unknown -> Inactive` records a baseline without logging, while
    /// `Unknown -> Active` logs immediately. Self transitions are no-ops.
    pub fn advance(self, active: bool) -> (ActivationState, Option<LogAction>) {
        let next = ActivationState::from_active(active);
        let action = match (self, next) {
            (prev, next) if prev == next => None,
            (_, ActivationState::Active) => Some(LogAction::Open),
            (ActivationState::Unknown, ActivationState::Inactive) => None,
            (_, _) => Some(LogAction::Close),
        };
        (next, action)
    }
}

// ============================================================================
// Log Entries
// ============================================================================

/// Status of a log row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogStatus {
    Active,
    Cleared,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Active => "ACTIVE",
            LogStatus::Cleared => "CLEARED",
        }
    }
}

impl FromStr for LogStatus {
    type Err = AlarmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(LogStatus::Active),
            "CLEARED" => Ok(LogStatus::Cleared),
            other => Err(AlarmError::Database(format!(
                "unknown log status '{}'",
                other
            ))),
        }
    }
}

/// Persisted activation log row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,
    pub rule_id: i64,
    /// Set for bit rules only
    pub bit_position: Option<u8>,
    /// Custom name of the rule or bit at the time of activation
    pub label: String,
    pub status: LogStatus,
    /// Extracted value that triggered the activation, stringified
    pub triggering_value: String,
    pub timestamp: DateTime<Utc>,
    pub cleared_at: Option<DateTime<Utc>>,
}

impl LogEntry {
    pub fn key(&self) -> StateKey {
        StateKey {
            rule_id: self.rule_id,
            bit: self.bit_position,
        }
    }

    /// ACTIVE and not yet cleared
    pub fn is_open(&self) -> bool {
        self.status == LogStatus::Active && self.cleared_at.is_none()
    }
}

/// Row to insert when a key activates
#[derive(Debug, Clone, PartialEq)]
pub struct NewLogEntry {
    pub rule_id: i64,
    pub bit_position: Option<u8>,
    pub label: String,
    pub triggering_value: String,
    pub timestamp: DateTime<Utc>,
}
