//! SQLite pool construction with settings tuned for edge deployment

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub use sqlx::SqlitePool;

/// Open (creating if missing) the database at `db_path`
///
/// WAL journaling keeps readers (the dashboard's REST side) from blocking the
/// alarm writer; foreign keys are enforced on every connection.
pub async fn connect(db_path: impl AsRef<Path>, max_connections: u32) -> Result<SqlitePool> {
    let db_path = db_path.as_ref();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory {:?}", parent))?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open SQLite database {}", db_path.display()))?;

    info!("SQLite database connected: {}", db_path.display());
    Ok(pool)
}

/// Single-connection in-memory pool (each in-memory connection is its own database)
pub async fn connect_in_memory() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .in_memory(true)
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .context("Failed to open in-memory SQLite database")
}

/// Check that the database answers queries
pub async fn ping(pool: &SqlitePool) -> Result<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .context("SQLite ping failed")?;
    Ok(())
}
