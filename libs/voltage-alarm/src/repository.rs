//! Alarm Repository - SQLite persistence for rules and activation logs
//!
//! Free functions over a `SqlitePool`, plus `SqliteAlarmStore` which exposes
//! them through the `ConfigSource` and `LogSink` traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::warn;

use crate::error::{AlarmError, Result};
use crate::traits::{ConfigSource, LogSink};
use crate::types::{
    BitRule, LogEntry, LogStatus, NewLogEntry, RuleConfig, RuleKind, RuleKindTag, ThresholdLimits,
};

const LOG_COLUMNS: &str =
    "id, rule_id, bit_position, label, status, triggering_value, timestamp, cleared_at";

// ============================================================================
// Rules
// ============================================================================

/// Load every enabled rule with its device topic and bit children
///
/// Rows with an unknown kind are skipped with a warning.
pub async fn load_rule_configs(pool: &SqlitePool) -> Result<Vec<RuleConfig>> {
    let mut bits = load_bit_rules(pool).await?;

    let rows = sqlx::query(
        r#"
        SELECT r.id, r.device_id, d.topic, r.property_key, r.kind,
               r.min_value, r.max_value, r.max_only, r.custom_name
        FROM alarm_rules r
        JOIN devices d ON d.id = r.device_id
        WHERE r.enabled = 1
        ORDER BY r.id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut rules = Vec::with_capacity(rows.len());
    for row in rows {
        let id: i64 = row.try_get("id")?;
        let kind_text: String = row.try_get("kind")?;
        let tag = match kind_text.parse::<RuleKindTag>() {
            Ok(tag) => tag,
            Err(e) => {
                warn!("Alarm rule {} skipped: {}", id, e);
                continue;
            },
        };

        let kind = match tag {
            RuleKindTag::Threshold => RuleKind::Threshold(ThresholdLimits {
                min: row.try_get("min_value")?,
                max: row.try_get("max_value")?,
                max_only: row.try_get::<bool, _>("max_only")?,
            }),
            RuleKindTag::Direct => RuleKind::Direct,
            RuleKindTag::BitValue => RuleKind::BitValue {
                bits: bits.remove(&id).unwrap_or_default(),
            },
        };

        let key: String = row.try_get("property_key")?;
        let name = row
            .try_get::<Option<String>, _>("custom_name")?
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| key.clone());

        rules.push(RuleConfig {
            id,
            device_id: row.try_get("device_id")?,
            topic: row
                .try_get::<Option<String>, _>("topic")?
                .unwrap_or_default(),
            key,
            name,
            kind,
        });
    }

    Ok(rules)
}

async fn load_bit_rules(pool: &SqlitePool) -> Result<FxHashMap<i64, Vec<BitRule>>> {
    let rows = sqlx::query(
        r#"
        SELECT id, rule_id, bit_position, custom_name
        FROM alarm_bit_rules
        ORDER BY rule_id ASC, id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut by_rule: FxHashMap<i64, Vec<BitRule>> = FxHashMap::default();
    for row in rows {
        let id: i64 = row.try_get("id")?;
        let rule_id: i64 = row.try_get("rule_id")?;
        let raw_position: i64 = row.try_get("bit_position")?;
        let Ok(position) = u8::try_from(raw_position) else {
            warn!("Bit rule {} of rule {} has invalid position {}, skipped", id, rule_id, raw_position);
            continue;
        };
        let name = row
            .try_get::<Option<String>, _>("custom_name")?
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("Bit {}", position));

        by_rule.entry(rule_id).or_default().push(BitRule { id, position, name });
    }
    Ok(by_rule)
}

// ============================================================================
// Logs
// ============================================================================

/// Insert an ACTIVE row; a second open row for the key is rejected by the
/// partial unique index and reported as `DuplicateOpenLog`
pub async fn insert_log(pool: &SqlitePool, entry: &NewLogEntry) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO alarm_logs (rule_id, bit_position, label, status, triggering_value, timestamp)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entry.rule_id)
    .bind(entry.bit_position.map(i64::from))
    .bind(&entry.label)
    .bind(LogStatus::Active.as_str())
    .bind(&entry.triggering_value)
    .bind(entry.timestamp)
    .execute(pool)
    .await;

    match result {
        Ok(done) => Ok(done.last_insert_rowid()),
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            Err(AlarmError::DuplicateOpenLog {
                rule_id: entry.rule_id,
                bit_position: entry.bit_position,
            })
        },
        Err(e) => Err(e.into()),
    }
}

/// Most recent open row for (rule, bit)
pub async fn find_open_log(
    pool: &SqlitePool,
    rule_id: i64,
    bit_position: Option<u8>,
) -> Result<Option<LogEntry>> {
    let sql = format!(
        r#"
        SELECT {LOG_COLUMNS}
        FROM alarm_logs
        WHERE rule_id = ? AND bit_position IS ? AND status = 'ACTIVE' AND cleared_at IS NULL
        ORDER BY timestamp DESC, id DESC
        LIMIT 1
        "#
    );
    let row = sqlx::query(&sql)
        .bind(rule_id)
        .bind(bit_position.map(i64::from))
        .fetch_optional(pool)
        .await?;

    row.map(hydrate_log).transpose()
}

/// Mark an open row CLEARED
pub async fn close_log(pool: &SqlitePool, id: i64, cleared_at: DateTime<Utc>) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE alarm_logs
        SET status = 'CLEARED', cleared_at = ?
        WHERE id = ? AND status = 'ACTIVE'
        "#,
    )
    .bind(cleared_at)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AlarmError::LogNotFound(id));
    }
    Ok(())
}

/// Every open row, oldest first
pub async fn list_open_logs(pool: &SqlitePool) -> Result<Vec<LogEntry>> {
    let sql = format!(
        r#"
        SELECT {LOG_COLUMNS}
        FROM alarm_logs
        WHERE status = 'ACTIVE' AND cleared_at IS NULL
        ORDER BY timestamp ASC, id ASC
        "#
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;

    let mut logs = Vec::with_capacity(rows.len());
    for row in rows {
        logs.push(hydrate_log(row)?);
    }
    Ok(logs)
}

/// Rows for one rule, newest first
pub async fn list_logs_for_rule(pool: &SqlitePool, rule_id: i64) -> Result<Vec<LogEntry>> {
    let sql = format!(
        r#"
        SELECT {LOG_COLUMNS}
        FROM alarm_logs
        WHERE rule_id = ?
        ORDER BY timestamp DESC, id DESC
        "#
    );
    let rows = sqlx::query(&sql).bind(rule_id).fetch_all(pool).await?;

    let mut logs = Vec::with_capacity(rows.len());
    for row in rows {
        logs.push(hydrate_log(row)?);
    }
    Ok(logs)
}

fn hydrate_log(row: SqliteRow) -> Result<LogEntry> {
    let bit_position = row
        .try_get::<Option<i64>, _>("bit_position")?
        .map(|raw| {
            u8::try_from(raw)
                .map_err(|_| AlarmError::Database(format!("invalid bit position {}", raw)))
        })
        .transpose()?;
    let status: String = row.try_get("status")?;

    Ok(LogEntry {
        id: row.try_get("id")?,
        rule_id: row.try_get("rule_id")?,
        bit_position,
        label: row.try_get("label")?,
        status: status.parse()?,
        triggering_value: row.try_get("triggering_value")?,
        timestamp: row.try_get("timestamp")?,
        cleared_at: row.try_get("cleared_at")?,
    })
}

// ============================================================================
// Trait adapter
// ============================================================================

/// SQLite-backed rule source and log sink
#[derive(Debug, Clone)]
pub struct SqliteAlarmStore {
    pool: SqlitePool,
}

impl SqliteAlarmStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl ConfigSource for SqliteAlarmStore {
    async fn list_rule_configs(&self) -> Result<Vec<RuleConfig>> {
        load_rule_configs(&self.pool).await
    }
}

#[async_trait]
impl LogSink for SqliteAlarmStore {
    async fn create_log(&self, entry: &NewLogEntry) -> Result<i64> {
        insert_log(&self.pool, entry).await
    }

    async fn find_open_log(
        &self,
        rule_id: i64,
        bit_position: Option<u8>,
    ) -> Result<Option<LogEntry>> {
        find_open_log(&self.pool, rule_id, bit_position).await
    }

    async fn close_log(&self, id: i64, cleared_at: DateTime<Utc>) -> Result<()> {
        close_log(&self.pool, id, cleared_at).await
    }

    async fn list_open_logs(&self) -> Result<Vec<LogEntry>> {
        list_open_logs(&self.pool).await
    }
}
