//! AlarmSrv main program
//!
//! Composition root: configuration, logging, database, transport, engine.

use std::path::PathBuf;
use std::sync::Arc;

use alarmsrv::AlarmSrvConfig;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::sqlite::{self, SqlitePool};
use tracing::{error, info};
use voltage_alarm::{
    init_schema, AlarmEngine, ConfigLoader, RedisTransport, SqliteAlarmStore,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "AlarmSrv - alarm rule evaluation service")]
struct Args {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "ALARMSRV_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Validate configuration and database, print rule counts
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = AlarmSrvConfig::load(args.config.as_deref())?;
    config.validate()?;

    let _log_guard = common::logging::init_with_config(&config.log_config())
        .context("Failed to initialize logging")?;

    info!("Starting AlarmSrv v{}", env!("CARGO_PKG_VERSION"));

    let result = match args.command {
        Some(Commands::Check) => check(&config).await,
        None => run_service(&config).await,
    };
    if let Err(e) = &result {
        error!("AlarmSrv failed: {:#}", e);
    }
    result
}

async fn open_database(config: &AlarmSrvConfig) -> Result<SqlitePool> {
    let pool = sqlite::connect(&config.database.path, config.database.max_connections).await?;
    if config.database.init_schema {
        init_schema(&pool)
            .await
            .context("Failed to initialize alarm schema")?;
    }
    Ok(pool)
}

/// Check mode: configuration, database and rules, without Redis
async fn check(config: &AlarmSrvConfig) -> Result<()> {
    let pool = open_database(config).await?;
    sqlite::ping(&pool).await?;

    let store = Arc::new(SqliteAlarmStore::new(pool));
    let index = ConfigLoader::new(store)
        .load_all()
        .await
        .context("Failed to load alarm rules")?;

    println!("Configuration OK");
    println!("  database: {}", config.database.path.display());
    println!("  redis:    {}", config.redis.url);
    println!("  rules:    {}", index.rule_count());
    println!("  topics:   {}", index.topic_count());
    for topic in index.topics() {
        println!("    {} ({} rules)", topic, index.rules_for(&topic).len());
    }
    Ok(())
}

/// Service mode: run the engine until a shutdown signal
async fn run_service(config: &AlarmSrvConfig) -> Result<()> {
    let shutdown = common::shutdown::shutdown_token();
    let pool = open_database(config).await?;
    let store = Arc::new(SqliteAlarmStore::new(pool.clone()));
    let transport = Arc::new(
        RedisTransport::new(config.redis.clone()).context("Invalid Redis configuration")?,
    );

    let engine = AlarmEngine::new(transport, store.clone(), store, config.engine.clone());
    engine
        .start()
        .await
        .context("Failed to start alarm engine")?;

    info!("AlarmSrv running, press Ctrl+C to stop");
    shutdown.cancelled().await;
    info!("Stopping AlarmSrv");

    engine.stop().await.context("Failed to stop alarm engine")?;
    pool.close().await;
    info!("AlarmSrv stopped");
    Ok(())
}
