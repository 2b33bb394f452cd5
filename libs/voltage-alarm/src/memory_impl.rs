//! In-memory `ConfigSource` and `LogSink`
//!
//! Used by tests and by embedders that do not need durable logs. The log
//! sink enforces one open row per key, like the SQLite schema does.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{AlarmError, Result};
use crate::traits::{ConfigSource, LogSink};
use crate::types::{LogEntry, LogStatus, NewLogEntry, RuleConfig};

/// Decrement a failure budget; true when this call should fail
fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

// ============================================================================
// Log Sink
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryLogSink {
    entries: Mutex<Vec<LogEntry>>,
    failing_writes: AtomicU32,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink pre-populated with rows (ids are kept as given)
    pub fn with_entries(entries: Vec<LogEntry>) -> Self {
        Self {
            entries: Mutex::new(entries),
            failing_writes: AtomicU32::new(0),
        }
    }

    /// Snapshot of all rows in insertion order
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    /// Rows for one rule (any bit)
    pub fn entries_for(&self, rule_id: i64) -> Vec<LogEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.rule_id == rule_id)
            .cloned()
            .collect()
    }

    /// Make the next `n` create/close calls fail with a transient error
    pub fn fail_next_writes(&self, n: u32) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    fn check_write(&self) -> Result<()> {
        if take_failure(&self.failing_writes) {
            return Err(AlarmError::Database("injected write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LogSink for MemoryLogSink {
    async fn create_log(&self, entry: &NewLogEntry) -> Result<i64> {
        self.check_write()?;

        let mut entries = self.entries.lock();
        let duplicate = entries.iter().any(|e| {
            e.is_open() && e.rule_id == entry.rule_id && e.bit_position == entry.bit_position
        });
        if duplicate {
            return Err(AlarmError::DuplicateOpenLog {
                rule_id: entry.rule_id,
                bit_position: entry.bit_position,
            });
        }

        let id = entries.iter().map(|e| e.id).max().unwrap_or(0) + 1;
        entries.push(LogEntry {
            id,
            rule_id: entry.rule_id,
            bit_position: entry.bit_position,
            label: entry.label.clone(),
            status: LogStatus::Active,
            triggering_value: entry.triggering_value.clone(),
            timestamp: entry.timestamp,
            cleared_at: None,
        });
        Ok(id)
    }

    async fn find_open_log(
        &self,
        rule_id: i64,
        bit_position: Option<u8>,
    ) -> Result<Option<LogEntry>> {
        let entries = self.entries.lock();
        Ok(entries
            .iter()
            .filter(|e| e.is_open() && e.rule_id == rule_id && e.bit_position == bit_position)
            .max_by_key(|e| (e.timestamp, e.id))
            .cloned())
    }

    async fn close_log(&self, id: i64, cleared_at: DateTime<Utc>) -> Result<()> {
        self.check_write()?;

        let mut entries = self.entries.lock();
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id && e.is_open())
            .ok_or(AlarmError::LogNotFound(id))?;
        entry.status = LogStatus::Cleared;
        entry.cleared_at = Some(cleared_at);
        Ok(())
    }

    async fn list_open_logs(&self) -> Result<Vec<LogEntry>> {
        Ok(self
            .entries
            .lock()
            .iter()
            .filter(|e| e.is_open())
            .cloned()
            .collect())
    }
}

// ============================================================================
// Config Source
// ============================================================================

#[derive(Debug, Default)]
pub struct StaticConfigSource {
    rules: RwLock<Vec<RuleConfig>>,
    failing_loads: AtomicU32,
    loads: AtomicU32,
}

impl StaticConfigSource {
    pub fn new(rules: Vec<RuleConfig>) -> Self {
        Self {
            rules: RwLock::new(rules),
            failing_loads: AtomicU32::new(0),
            loads: AtomicU32::new(0),
        }
    }

    /// Swap the rule set, as an authoring edit would
    pub fn replace(&self, rules: Vec<RuleConfig>) {
        *self.rules.write() = rules;
    }

    /// Make the next `n` loads fail with a transient error
    pub fn fail_next_loads(&self, n: u32) {
        self.failing_loads.store(n, Ordering::SeqCst);
    }

    /// Load attempts so far, failed ones included
    pub fn load_count(&self) -> u32 {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigSource for StaticConfigSource {
    async fn list_rule_configs(&self) -> Result<Vec<RuleConfig>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.failing_loads) {
            return Err(AlarmError::Database("injected load failure".to_string()));
        }
        Ok(self.rules.read().clone())
    }
}
