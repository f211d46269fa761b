//! Configuration management for the transaction risk pipeline
//!
//! Values come from three layers: built-in defaults, an optional TOML file
//! and `RISK_PIPELINE__<SECTION>__<KEY>` environment variables.

use crate::types::alert::RiskRule;
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use sqlx::postgres::PgConnectOptions;
use std::path::Path;
use std::time::Duration;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Environment variable that overrides the configuration file path
pub const CONFIG_PATH_ENV: &str = "RISK_PIPELINE_CONFIG";

/// Prefix for per-key environment overrides
pub const ENV_PREFIX: &str = "RISK_PIPELINE";

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub narrator: NarratorConfig,
    pub rules: RiskRule,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

/// Source database configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub user: String,
    /// Usually supplied through `RISK_PIPELINE__DATABASE__PASSWORD`
    pub password: String,
    pub host: String,
    pub port: u16,
    /// Database (service) name
    pub service_name: String,
    /// Fully-qualified table to extract
    pub table: String,
    /// Rows per page
    pub page_size: usize,
    /// Upper bound for the whole extraction
    pub timeout_secs: u64,
}

impl DatabaseConfig {
    /// Connection parameters for sqlx
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.service_name)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            user: "datae".to_string(),
            password: String::new(),
            host: "localhost".to_string(),
            port: 5432,
            service_name: "xepdb1".to_string(),
            table: "DATAE.TRANSACCIONES".to_string(),
            page_size: 100_000,
            timeout_secs: 600,
        }
    }
}

/// Narration service configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NarratorConfig {
    /// Chat-completion endpoint
    pub endpoint: String,
    /// Model identifier sent with each request
    pub model: String,
    /// Environment variable holding the bearer token, read at call time
    pub api_key_env: String,
    /// Number of alerts included in the prompt
    pub sample_size: usize,
    pub timeout_secs: u64,
}

impl NarratorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for NarratorConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://openrouter.ai/api/v1/chat/completions".to_string(),
            model: "deepseek/deepseek-chat".to_string(),
            api_key_env: "OPENROUTER_API_KEY".to_string(),
            sample_size: 10,
            timeout_secs: 120,
        }
    }
}

/// Output artifact configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Parquet file receiving the alert subset, overwritten each run
    pub alerts_path: String,
    /// Number of alerts shown in the console preview
    pub preview_rows: usize,
    pub write_timeout_secs: u64,
}

impl OutputConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            alerts_path: "alertas_fraude_criticas.parquet".to_string(),
            preview_rows: 10,
            write_timeout_secs: 60,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default file location (or the path in
    /// `RISK_PIPELINE_CONFIG`) plus environment overrides
    pub fn load() -> Result<Self> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from_path(path)
    }

    /// Load configuration from a specific path; a missing file falls back
    /// to defaults
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make a stage meaningless
    pub fn validate(&self) -> Result<()> {
        if self.database.page_size == 0 {
            anyhow::bail!("database.page_size must be greater than zero");
        }
        if self.narrator.sample_size == 0 {
            anyhow::bail!("narrator.sample_size must be greater than zero");
        }
        if self.output.alerts_path.trim().is_empty() {
            anyhow::bail!("output.alerts_path must not be empty");
        }

        // A zero timeout fails every run before any I/O happens
        let timeouts = [
            ("database.timeout_secs", self.database.timeout_secs),
            ("narrator.timeout_secs", self.narrator.timeout_secs),
            ("output.write_timeout_secs", self.output.write_timeout_secs),
        ];
        for (key, secs) in timeouts {
            if secs == 0 {
                anyhow::bail!("{} must be greater than zero", key);
            }
        }
        Ok(())
    }
}
