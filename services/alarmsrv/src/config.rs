//! AlarmSrv Configuration
//!
//! Layered with figment, later layers win:
//! 1. built-in defaults
//! 2. YAML file (`--config`, else `config/alarmsrv.yaml` when present)
//! 3. `ALARMSRV_` environment variables, `__` between levels
//!    (e.g. `ALARMSRV_REDIS__URL`, `ALARMSRV_ENGINE__WORKERS`)

use anyhow::{bail, Context, Result};
use common::LogConfig;
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use voltage_alarm::{EngineConfig, RedisTransportConfig};

/// Default configuration file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/alarmsrv.yaml";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "ALARMSRV_";

/// Complete service configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlarmSrvConfig {
    pub service: ServiceConfig,
    pub redis: RedisTransportConfig,
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "alarmsrv".to_string(),
        }
    }
}

/// SQLite database holding rules and alarm logs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    /// Create missing tables on startup
    pub init_schema: bool,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/voltage.db"),
            init_schema: true,
            max_connections: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// Directory for daily rolling log files
    pub dir: Option<PathBuf>,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
            json: false,
        }
    }
}

impl AlarmSrvConfig {
    /// Load defaults, the YAML file and `ALARMSRV_` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, ENV_PREFIX)
    }

    fn load_with_env(path: Option<&Path>, env_prefix: &str) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(AlarmSrvConfig::default()));

        match path {
            Some(path) => {
                if !path.exists() {
                    bail!("Configuration file not found: {}", path.display());
                }
                figment = figment.merge(Yaml::file(path));
            },
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    figment = figment.merge(Yaml::file(default_path));
                }
            },
        }

        figment
            .merge(Env::prefixed(env_prefix).split("__"))
            .extract()
            .context("Failed to load alarmsrv configuration")
    }

    /// Reject values the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.redis.url.trim().is_empty() {
            bail!("redis.url must not be empty");
        }
        if self.database.path.as_os_str().is_empty() {
            bail!("database.path must not be empty");
        }
        if self.engine.workers == 0 {
            bail!("engine.workers must be at least 1");
        }
        if self.engine.queue_capacity == 0 {
            bail!("engine.queue_capacity must be at least 1");
        }
        if self.engine.persist_retry.max_attempts == 0 {
            bail!("engine.persist_retry.max_attempts must be at least 1");
        }
        if self.engine.reload_retry.max_attempts == 0 {
            bail!("engine.reload_retry.max_attempts must be at least 1");
        }
        Ok(())
    }

    /// Logging settings with the service name as file prefix
    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            service_name: self.service.name.clone(),
            level: self.logging.level.clone(),
            dir: self.logging.dir.clone(),
            json: self.logging.json,
        }
    }
}
