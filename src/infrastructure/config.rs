use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::domain::error::ReconcileError;
use crate::domain::value_objects::ExcludedColumns;

/// Prefix of environment overrides, e.g. `DRIFTCHECK__TARGET__PASSWORD`.
pub const ENV_PREFIX: &str = "DRIFTCHECK";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub source: DbConfig,
    pub target: DbConfig,
    #[serde(default)]
    pub reconcile: ReconcileOptions,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    /// Database driver: "postgres" (default), "mysql", "mariadb", or "sqlite".
    #[serde(default = "default_driver")]
    pub driver: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    pub dbname: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// Schema (PostgreSQL) or database (MySQL) to compare. Ignored by SQLite.
    #[serde(default)]
    pub schema: String,
}

fn default_driver() -> String {
    "postgres".to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

/// Engine options, the `[reconcile]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconcileOptions {
    /// Hex characters of the pk hash used as bucket key.
    pub span_key_length: usize,
    /// Concurrent table comparisons, and concurrent span drill-downs per table.
    pub concurrency_limit: usize,
    pub quiet: bool,
    /// 0..=3
    pub verbosity: u8,
    /// When false, the first differing object cancels the comparisons not yet started.
    pub run_all_mismatches_before_reporting: bool,
    pub skip_object_list_check: bool,
    pub skip_row_count_check: bool,
    pub skip_data_check: bool,
    /// 0 disables the per-table timeout.
    pub table_timeout_secs: u64,
    /// Tables to reconcile; empty means every table both schemas share.
    pub tables: Vec<TableConfig>,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            span_key_length: 8,
            concurrency_limit: 4,
            quiet: false,
            verbosity: 1,
            run_all_mismatches_before_reporting: true,
            skip_object_list_check: false,
            skip_row_count_check: false,
            skip_data_check: false,
            table_timeout_secs: 0,
            tables: Vec::new(),
        }
    }
}

impl ReconcileOptions {
    pub fn validate(&self) -> Result<(), ReconcileError> {
        if !(1..=32).contains(&self.span_key_length) {
            return Err(ReconcileError::invalid_config(format!(
                "span_key_length must be within 1..=32, got {}",
                self.span_key_length
            )));
        }
        if self.concurrency_limit == 0 {
            return Err(ReconcileError::invalid_config(
                "concurrency_limit must be at least 1",
            ));
        }
        if self.verbosity > 3 {
            return Err(ReconcileError::invalid_config(format!(
                "verbosity must be within 0..=3, got {}",
                self.verbosity
            )));
        }
        Ok(())
    }

    /// Configured entry for `name`, if any.
    pub fn table(&self, name: &str) -> Option<&TableConfig> {
        self.tables.iter().find(|t| t.name == name)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TableConfig {
    pub name: String,
    /// Overrides the introspected primary key when non-empty.
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub excluded_columns: ExcludedColumns,
}

impl TableConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: Vec::new(),
            excluded_columns: ExcludedColumns::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    pub dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: "./out".to_string(),
        }
    }
}

impl DbConfig {
    /// Build a sqlx-compatible connection URL from this config.
    pub fn url(&self) -> String {
        match self.driver.as_str() {
            "mysql" | "mariadb" => format!(
                "mysql://{}:{}@{}:{}/{}",
                self.user, self.password, self.host, self.port, self.dbname
            ),
            "sqlite" => format!("sqlite://{}", self.dbname),
            _ => format!(
                "postgres://{}:{}@{}:{}/{}",
                self.user, self.password, self.host, self.port, self.dbname
            ),
        }
    }
}

impl AppConfig {
    /// Load a TOML file, apply `DRIFTCHECK__…` environment overrides and validate.
    pub fn load(path: &str) -> Result<Self> {
        Self::load_with_env(path, ENV_PREFIX)
    }

    fn load_with_env(path: &str, env_prefix: &str) -> Result<Self> {
        let raw = Config::builder()
            .add_source(File::new(path, FileFormat::Toml))
            .add_source(
                Environment::with_prefix(env_prefix)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read config file: {}", path))?;
        Self::finish(raw)
    }

    /// Parse a TOML document without touching the environment.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let raw = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .with_context(|| "Failed to parse config TOML")?;
        Self::finish(raw)
    }

    fn finish(raw: Config) -> Result<Self> {
        let cfg: AppConfig = raw
            .try_deserialize()
            .with_context(|| "Failed to parse config TOML")?;
        cfg.reconcile.validate()?;
        Ok(cfg)
    }
}
