use anyhow::Result;
use std::sync::{Arc, Mutex};

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;

// ─── Log level ────────────────────────────────────────────────────────────────

/// Controls the verbosity of driftcheck's internal tracing output.
///
/// Pass to [`init_tracing`] before calling any async entry point.
///
/// | Variant | `tracing` level | When to use                                 |
/// |---------|-----------------|---------------------------------------------|
/// | `Error` | `error`         | `quiet` / CI scripting                      |
/// | `Info`  | `info`          | Default, shows per-table outcomes           |
/// | `Debug` | `debug`         | verbosity 2, bucket counts and SQL queries  |
/// | `Trace` | `trace`         | verbosity 3                                 |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// `quiet` wins over any verbosity.
    pub fn from_options(quiet: bool, verbosity: u8) -> Self {
        match (quiet, verbosity) {
            (true, _) => LogLevel::Error,
            (false, 0 | 1) => LogLevel::Info,
            (false, 2) => LogLevel::Debug,
            (false, _) => LogLevel::Trace,
        }
    }
}

/// Initialise the global `tracing` subscriber for driftcheck.
///
/// This is a convenience wrapper around `tracing_subscriber`. It respects
/// `RUST_LOG` when set, falling back to `level` otherwise.
///
/// Call this **once** at application startup. Library consumers who manage
/// their own subscriber should skip this and configure tracing themselves.
///
/// Only available when the `cli` feature is enabled (pulls in
/// `tracing-subscriber`).
#[cfg(feature = "cli")]
pub fn init_tracing(level: LogLevel) {
    use tracing_subscriber::fmt::format::FmtSpan;

    let default_filter = match level {
        LogLevel::Error => "driftcheck=error",
        LogLevel::Info => "driftcheck=info",
        LogLevel::Debug => "driftcheck=debug",
        LogLevel::Trace => "driftcheck=trace",
    };

    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

// ─── Public API Facade ───

pub use application::monitoring::PerfReport;
pub use application::reconcile::Reconciler;
pub use domain::error::{ReconcileError, Side};
pub use domain::ports::{Database, DdlSource, ObjectLister, QueryDialect, RowSource};
pub use domain::repair::{BoundStatement, RepairStatement, TableRef};
pub use domain::report::{
    CheckState, ObjectReport, RunReport, SchemaReport, Summary, TableReport, TableStatus,
};
pub use domain::row::{KeyValues, RowMap};
pub use domain::structure_diff::{StructureDiff, StructureState};
pub use domain::value_objects::{ColumnName, ObjectDescriptor, ObjectType, TableName};
pub use infrastructure::config::{
    AppConfig, DbConfig, OutputConfig, ReconcileOptions, TableConfig,
};
pub use infrastructure::memory::MemoryDatabase;

use crate::application::monitoring::MonitoringDatabase;
use crate::infrastructure::db::client::connect;
use crate::infrastructure::db::dialect::query_dialect;

// ─── Public entry points ───

/// Compare the two configured databases and build the run report.
///
/// Use [`run_with_timing`] if you also want a performance report.
pub async fn run(cfg: &AppConfig) -> Result<RunReport> {
    let (report, _) = run_with_timing(cfg).await?;
    Ok(report)
}

/// Compare the two configured databases, with performance timing.
///
/// Returns the `RunReport` and a [`PerfReport`] containing per-side fetch
/// timings and per-table comparison times.
pub async fn run_with_timing(cfg: &AppConfig) -> Result<(RunReport, PerfReport)> {
    cfg.reconcile.validate()?;
    let perf = PerfReport::new();

    let (source, target) = tokio::try_join!(
        build_db(&cfg.source, Side::Source, Arc::clone(&perf)),
        build_db(&cfg.target, Side::Target, Arc::clone(&perf)),
    )?;

    let report = compare(
        source,
        target,
        &cfg.source.schema,
        &cfg.target.schema,
        &cfg.target.driver,
        cfg.reconcile.clone(),
        &perf,
    )
    .await?;

    let perf = perf.lock().map(|r| r.clone()).unwrap_or_default();
    Ok((report, perf))
}

/// Compare two already-open databases, e.g. [`MemoryDatabase`]s or custom
/// adapters. `driver` names the target's SQL dialect.
pub async fn run_databases(
    source: Arc<dyn Database>,
    target: Arc<dyn Database>,
    driver: &str,
    options: ReconcileOptions,
) -> Result<RunReport> {
    let source_schema = source.schema().unwrap_or_default().to_string();
    let target_schema = target.schema().unwrap_or_default().to_string();
    compare(
        source,
        target,
        &source_schema,
        &target_schema,
        driver,
        options,
        &PerfReport::new(),
    )
    .await
}

// ─── Private helpers ───────────────────────────────────────────────────────────

async fn compare(
    source: Arc<dyn Database>,
    target: Arc<dyn Database>,
    source_schema: &str,
    target_schema: &str,
    driver: &str,
    options: ReconcileOptions,
    perf: &Arc<Mutex<PerfReport>>,
) -> Result<RunReport> {
    let reconciler = Reconciler::new(source, target, query_dialect(driver), options)?;
    let schema = reconciler.compare_schema().await?;
    for table in &schema.tables {
        PerfReport::record_table(perf, table);
    }
    Ok(RunReport::new(source_schema, target_schema, driver, schema))
}

/// Connect to a DB and wrap it in the monitoring decorator.
///
/// The shared `report` accumulates timings from both sides of the run,
/// giving a unified view across source and target.
async fn build_db(
    cfg: &DbConfig,
    side: Side,
    report: Arc<Mutex<PerfReport>>,
) -> Result<Arc<dyn Database>> {
    let db = Arc::new(connect(cfg).await?);
    Ok(Arc::new(MonitoringDatabase::new(db, side, report)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn log_level_follows_quiet_and_verbosity() {
        assert_eq!(LogLevel::from_options(true, 3), LogLevel::Error);
        assert_eq!(LogLevel::from_options(false, 0), LogLevel::Info);
        assert_eq!(LogLevel::from_options(false, 1), LogLevel::Info);
        assert_eq!(LogLevel::from_options(false, 2), LogLevel::Debug);
        assert_eq!(LogLevel::from_options(false, 3), LogLevel::Trace);
    }

    #[tokio::test]
    async fn in_memory_databases_can_be_compared_end_to_end() {
        let row = |id: i64, name: &str| {
            RowMap::from([("id".to_string(), json!(id)), ("name".to_string(), json!(name))])
        };
        let table = |rows| {
            MemoryDatabase::new()
                .with_schema("shop")
                .with_table("users", &[("id", "INT"), ("name", "VARCHAR(50)")], &["id"])
                .with_rows("users", rows)
        };
        let source = table(vec![row(1, "A"), row(2, "B")]);
        let target = table(vec![row(1, "A"), row(3, "C")]);

        let report = run_databases(
            Arc::new(source),
            Arc::new(target),
            "mysql",
            ReconcileOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(report.source_schema, "shop");
        assert_eq!(report.summary.total_inserts, 1);
        assert_eq!(report.summary.total_deletes, 1);
        assert_eq!(report.summary.structure_diffs, 0);
        let users = &report.schema.tables[0];
        assert_eq!(
            users.repair_sql(query_dialect("mysql").as_ref()),
            vec![
                "INSERT INTO `shop`.`users` (`id`, `name`) VALUES (2, 'B')",
                "DELETE FROM `shop`.`users` WHERE `id` = 3",
            ]
        );
    }

    #[tokio::test]
    async fn invalid_options_are_rejected_before_comparing() {
        let opts = ReconcileOptions {
            span_key_length: 0,
            ..Default::default()
        };
        let err = run_databases(
            Arc::new(MemoryDatabase::new()),
            Arc::new(MemoryDatabase::new()),
            "postgres",
            opts,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("span_key_length"));
    }
}
