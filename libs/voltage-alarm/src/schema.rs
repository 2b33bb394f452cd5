//! SQLite schema for alarm rules and activation logs
//!
//! Rules are authored by the dashboard's REST side; the engine only reads
//! them. `alarm_logs` is written by the engine.

use sqlx::SqlitePool;
use tracing::info;

use crate::error::Result;

/// Devices table DDL (topic each device publishes on)
pub const DEVICES_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS devices (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        topic TEXT,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
"#;

/// Alarm rules table DDL (threshold columns are only used by THRESHOLD rules)
pub const ALARM_RULES_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS alarm_rules (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        device_id INTEGER NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
        property_key TEXT NOT NULL,
        kind TEXT NOT NULL,
        min_value REAL,
        max_value REAL,
        max_only INTEGER NOT NULL DEFAULT 0,
        custom_name TEXT,
        enabled INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
"#;

/// Bit rules table DDL (children of BIT_VALUE rules)
pub const ALARM_BIT_RULES_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS alarm_bit_rules (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        rule_id INTEGER NOT NULL REFERENCES alarm_rules(id) ON DELETE CASCADE,
        bit_position INTEGER NOT NULL CHECK (bit_position BETWEEN 0 AND 31),
        custom_name TEXT,
        UNIQUE (rule_id, bit_position)
    )
"#;

/// Activation log table DDL
pub const ALARM_LOGS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS alarm_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        rule_id INTEGER NOT NULL,
        bit_position INTEGER,
        label TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL CHECK (status IN ('ACTIVE', 'CLEARED')),
        triggering_value TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        cleared_at TEXT
    )
"#;

/// Lookup index for the most recent open row of a key
pub const ALARM_LOGS_KEY_INDEX: &str = r#"
    CREATE INDEX IF NOT EXISTS idx_alarm_logs_key
    ON alarm_logs(rule_id, bit_position, status)
"#;

/// At most one open row per (rule, bit)
pub const ALARM_LOGS_OPEN_UNIQUE_INDEX: &str = r#"
    CREATE UNIQUE INDEX IF NOT EXISTS uq_alarm_logs_open
    ON alarm_logs(rule_id, COALESCE(bit_position, -1))
    WHERE status = 'ACTIVE'
"#;

/// Create every table and index (idempotent)
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    for ddl in [
        DEVICES_TABLE,
        ALARM_RULES_TABLE,
        ALARM_BIT_RULES_TABLE,
        ALARM_LOGS_TABLE,
        ALARM_LOGS_KEY_INDEX,
        ALARM_LOGS_OPEN_UNIQUE_INDEX,
    ] {
        sqlx::query(ddl).execute(pool).await?;
    }
    info!("Alarm schema initialized");
    Ok(())
}
