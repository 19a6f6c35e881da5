//! # driftcheck: library usage example
//!
//! Two ways to drive driftcheck from Rust code:
//!
//! 1. **From a config file**: connects to both databases, mirrors the CLI
//! 2. **Already-open databases**: any `Database` adapter; here two in-memory
//!    stores, so the example runs without a server
//!
//! Run with a config file:
//!   cargo run --example reconcile_as_lib -- driftcheck.toml
//!
//! Run against the built-in in-memory databases:
//!   cargo run --example reconcile_as_lib

use std::sync::Arc;

use anyhow::Result;
use driftcheck::{
    domain::ports::OutputWriter,
    infrastructure::db::dialect::query_dialect,
    presentation::writers::{write_to_file, writer_for},
    AppConfig, MemoryDatabase, ReconcileOptions, RowMap, RunReport, TableStatus,
};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(String::as_str) {
        Some(path) => from_config_file(path).await,
        None => in_memory().await,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pattern 1: load config from a TOML file (what the CLI does)
// ─────────────────────────────────────────────────────────────────────────────
async fn from_config_file(path: &str) -> Result<()> {
    println!("=== Pattern 1: from config file ({path}) ===\n");

    let cfg = AppConfig::load(path)?;
    let report = driftcheck::run(&cfg).await?;

    let writer = writer_for("sql").ok_or_else(|| anyhow::anyhow!("sql writer missing"))?;
    let file = write_to_file(&*writer, &report, &cfg.output.dir)?;
    println!("Repair script: {}", file.display());

    print_summary(&report);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Pattern 2: compare two databases the caller already holds
// ─────────────────────────────────────────────────────────────────────────────
async fn in_memory() -> Result<()> {
    println!("=== Pattern 2: in-memory databases ===\n");

    let user = |id: i64, name: &str| {
        RowMap::from([("id".to_string(), json!(id)), ("name".to_string(), json!(name))])
    };
    let db = |rows| {
        MemoryDatabase::new()
            .with_schema("shop")
            .with_table("users", &[("id", "INT"), ("name", "VARCHAR(50)")], &["id"])
            .with_rows("users", rows)
    };
    let source = db(vec![user(1, "Ada"), user(2, "Brian"), user(4, "Dora")]);
    let target = db(vec![user(1, "Ada"), user(3, "Cyril"), user(4, "Dorothy")]);

    let report = driftcheck::run_databases(
        Arc::new(source),
        Arc::new(target),
        "mysql",
        ReconcileOptions::default(),
    )
    .await?;

    inspect(&report);

    // The same script the CLI would write, kept in memory
    if let Some(writer) = writer_for("sql") {
        let script = writer.format(&report)?;
        println!("Repair script: {} bytes", script.len());
    }

    print_summary(&report);
    Ok(())
}

fn inspect(report: &RunReport) {
    let dialect = query_dialect(&report.driver);

    for diff in report.schema.structure_diffs.iter().filter(|d| !d.is_identical()) {
        println!("━━ {} ({:?}) ━━", diff.object, diff.state);
        for stmt in &diff.repair_statements {
            println!("  {}", stmt);
        }
        for note in &diff.notes {
            println!("  note: {}", note);
        }
    }

    for table in &report.schema.tables {
        match &table.status {
            TableStatus::Identical => continue,
            TableStatus::Skipped { reason } => println!("━━ {} skipped: {} ━━", table.table, reason),
            TableStatus::Failed { error } => println!("━━ {} failed: {} ━━", table.table, error),
            TableStatus::Differs | TableStatus::Unverified => {
                println!("━━ {} ━━", table.table);
                for sql in table.repair_sql(dialect.as_ref()) {
                    println!("  {};", sql);
                }
            }
        }
        println!();
    }
}

fn print_summary(report: &RunReport) {
    let s = &report.summary;
    println!("\n── summary ──────────────────────");
    println!("  run     : {}", report.run_id);
    println!("  tables  : {} compared, {} identical", s.tables_compared, s.tables_identical);
    println!("  updates : {}", s.total_updates);
    println!("  inserts : {}", s.total_inserts);
    println!("  deletes : {}", s.total_deletes);
    println!("  schema  : {} structural difference(s)", s.structure_diffs);
}
