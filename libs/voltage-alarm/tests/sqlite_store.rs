//! SQLite store tests against an in-memory database

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::sync::Arc;

use chrono::Utc;
use common::sqlite::{connect_in_memory, SqlitePool};
use voltage_alarm::repository::{self, SqliteAlarmStore};
use voltage_alarm::{
    init_schema, AlarmEngine, AlarmError, ApplyOutcome, ConfigSource, EngineConfig, LogSink,
    LogStatus, MemoryTransport, NewLogEntry, RuleKind,
};

async fn setup() -> SqlitePool {
    let pool = connect_in_memory().await.unwrap();
    init_schema(&pool).await.unwrap();

    sqlx::query(
        r#"
        INSERT INTO devices (id, name, topic) VALUES
            (1, 'boiler', 'site/boiler'),
            (2, 'pump', 'site/pump'),
            (3, 'orphan', NULL)
        "#,
    )
    .execute(&pool)
    .await
    .unwrap();

    sqlx::query(
        r#"
        INSERT INTO alarm_rules
            (id, device_id, property_key, kind, min_value, max_value, max_only, custom_name, enabled)
        VALUES
            (10, 1, 'temp', 'THRESHOLD', 10.0, 80.0, 0, 'Boiler temperature', 1),
            (11, 1, 'flame', 'DIRECT', NULL, NULL, 0, NULL, 1),
            (12, 2, 'status', 'BIT_VALUE', NULL, NULL, 0, 'Pump status', 1),
            (13, 2, 'speed', 'RANGE', NULL, NULL, 0, 'Legacy', 1),
            (14, 2, 'pressure', 'THRESHOLD', NULL, 6.5, 1, 'Disabled', 0),
            (15, 3, 'x', 'DIRECT', NULL, NULL, 0, 'No topic', 1)
        "#,
    )
    .execute(&pool)
    .await
    .unwrap();

    sqlx::query(
        r#"
        INSERT INTO alarm_bit_rules (id, rule_id, bit_position, custom_name) VALUES
            (100, 12, 3, 'Overload'),
            (101, 12, 0, NULL)
        "#,
    )
    .execute(&pool)
    .await
    .unwrap();

    pool
}

fn new_entry(rule_id: i64, bit: Option<u8>, value: &str) -> NewLogEntry {
    NewLogEntry {
        rule_id,
        bit_position: bit,
        label: format!("rule {}", rule_id),
        triggering_value: value.to_string(),
        timestamp: Utc::now(),
    }
}

#[tokio::test]
async fn loads_enabled_rules_with_topics_and_bits() {
    let pool = setup().await;
    let rules = repository::load_rule_configs(&pool).await.unwrap();

    // 13 has an unknown kind, 14 is disabled
    let ids: Vec<i64> = rules.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![10, 11, 12, 15]);

    let boiler = &rules[0];
    assert_eq!(boiler.topic, "site/boiler");
    assert_eq!(boiler.name, "Boiler temperature");
    let RuleKind::Threshold(limits) = boiler.kind else {
        panic!("expected threshold");
    };
    assert_eq!(limits.min, Some(10.0));
    assert_eq!(limits.max, Some(80.0));
    assert!(!limits.max_only);

    // Missing custom name falls back to the property key
    assert_eq!(rules[1].name, "flame");
    assert_eq!(rules[1].kind, RuleKind::Direct);

    let RuleKind::BitValue { bits } = &rules[2].kind else {
        panic!("expected bit rule");
    };
    let positions: Vec<u8> = bits.iter().map(|b| b.position).collect();
    assert_eq!(positions, vec![3, 0]);
    assert_eq!(bits[0].name, "Overload");
    assert_eq!(bits[1].name, "Bit 0");

    // Device without topic is loaded with an empty topic; the index drops it
    assert_eq!(rules[3].topic, "");
}

#[tokio::test]
async fn store_as_config_source_builds_index() {
    let pool = setup().await;
    let store = SqliteAlarmStore::new(pool);

    let rules = store.list_rule_configs().await.unwrap();
    let index = voltage_alarm::RuleIndex::build(rules);
    assert_eq!(index.topics(), vec!["site/boiler", "site/pump"]);
    assert_eq!(index.rule_count(), 3);
    assert_eq!(index.rules_for("site/boiler").len(), 2);
}

#[tokio::test]
async fn create_find_close_log() {
    let store = SqliteAlarmStore::new(setup().await);

    let id = store.create_log(&new_entry(10, None, "95.5")).await.unwrap();
    let open = store.find_open_log(10, None).await.unwrap().unwrap();
    assert_eq!(open.id, id);
    assert_eq!(open.status, LogStatus::Active);
    assert_eq!(open.triggering_value, "95.5");
    assert_eq!(open.label, "rule 10");
    assert!(open.cleared_at.is_none());

    // Bit and non-bit keys of the same rule are distinct
    assert!(store.find_open_log(10, Some(0)).await.unwrap().is_none());

    store.close_log(id, Utc::now()).await.unwrap();
    assert!(store.find_open_log(10, None).await.unwrap().is_none());

    let history = repository::list_logs_for_rule(store.pool(), 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, LogStatus::Cleared);
    assert!(history[0].cleared_at.unwrap() >= history[0].timestamp);

    let err = store.close_log(id, Utc::now()).await.unwrap_err();
    assert!(matches!(err, AlarmError::LogNotFound(_)));
}

#[tokio::test]
async fn unique_index_rejects_second_open_row() {
    let store = SqliteAlarmStore::new(setup().await);

    store.create_log(&new_entry(12, Some(3), "8")).await.unwrap();
    store.create_log(&new_entry(12, Some(0), "9")).await.unwrap();
    store.create_log(&new_entry(11, None, "true")).await.unwrap();

    let err = store.create_log(&new_entry(12, Some(3), "8")).await.unwrap_err();
    assert!(matches!(
        err,
        AlarmError::DuplicateOpenLog {
            rule_id: 12,
            bit_position: Some(3)
        }
    ));
    let err = store.create_log(&new_entry(11, None, "1")).await.unwrap_err();
    assert!(matches!(err, AlarmError::DuplicateOpenLog { .. }));

    // Once closed, the key may open again
    let open = store.find_open_log(11, None).await.unwrap().unwrap();
    store.close_log(open.id, Utc::now()).await.unwrap();
    store.create_log(&new_entry(11, None, "1")).await.unwrap();

    let open_rows = store.list_open_logs().await.unwrap();
    assert_eq!(open_rows.len(), 3);
}

#[tokio::test]
async fn engine_over_sqlite_store() {
    let store = Arc::new(SqliteAlarmStore::new(setup().await));
    let transport = Arc::new(MemoryTransport::new());
    let engine = AlarmEngine::new(
        transport.clone(),
        store.clone(),
        store.clone(),
        EngineConfig::default(),
    );
    engine.start().await.unwrap();
    assert_eq!(transport.subscriptions(), vec!["site/boiler", "site/pump"]);

    let outcomes = engine
        .process("site/pump", br#"{"status": "0x9"}"#)
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, ApplyOutcome::Activated { log_id: Some(_) })));

    engine
        .process("site/pump", br#"{"status": 1}"#)
        .await
        .unwrap();

    let history = repository::list_logs_for_rule(store.pool(), 12).await.unwrap();
    assert_eq!(history.len(), 2);
    let overload = history.iter().find(|l| l.bit_position == Some(3)).unwrap();
    assert_eq!(overload.status, LogStatus::Cleared);
    assert_eq!(overload.label, "Overload");
    assert_eq!(overload.triggering_value, "0x9");
    let bit0 = history.iter().find(|l| l.bit_position == Some(0)).unwrap();
    assert_eq!(bit0.status, LogStatus::Active);

    engine.stop().await.unwrap();

    // A fresh engine hydrates bit 0 from its open row and clears it without a new row;
    // bit 3 was closed, so it starts unknown and only records a baseline
    let restarted = AlarmEngine::new(
        Arc::new(MemoryTransport::new()),
        store.clone(),
        store.clone(),
        EngineConfig::default(),
    );
    restarted.start().await.unwrap();
    let outcomes = restarted
        .process("site/pump", br#"{"status": 0}"#)
        .await
        .unwrap();
    assert_eq!(
        outcomes,
        vec![
            ApplyOutcome::Baseline,
            ApplyOutcome::Cleared {
                log_id: Some(bit0.id)
            }
        ]
    );
    assert!(store.list_open_logs().await.unwrap().is_empty());
    restarted.stop().await.unwrap();
}
