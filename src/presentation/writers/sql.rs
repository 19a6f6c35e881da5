use std::fmt::Write as FmtWrite;

use anyhow::Result;

use crate::domain::{
    ports::OutputWriter,
    report::{RunReport, TableStatus},
    structure_diff::StructureDiff,
};
use crate::infrastructure::db::dialect::query_dialect;

const RULE: &str = "-- ============================================";

/// Renders a run as one repair script: structural repairs first, then data
/// repairs per table, wrapped in a single transaction. Nothing is executed.
pub struct SqlWriter;

impl OutputWriter for SqlWriter {
    fn format(&self, report: &RunReport) -> Result<String> {
        let dialect = query_dialect(&report.driver);
        let s = &report.summary;
        let mut sql = String::new();

        writeln!(sql, "-- Run: {}", report.run_id)?;
        writeln!(sql, "-- Source: {}", report.source_schema)?;
        writeln!(sql, "-- Target: {}", report.target_schema)?;
        writeln!(sql, "-- Driver: {}", report.driver)?;
        writeln!(sql, "-- Generated: {}", report.created_at)?;
        writeln!(
            sql,
            "-- Summary: {} updates, {} inserts, {} deletes, {} structural differences",
            s.total_updates, s.total_inserts, s.total_deletes, s.structure_diffs
        )?;
        writeln!(sql)?;
        writeln!(sql, "BEGIN;")?;
        writeln!(sql)?;

        let structural: Vec<&StructureDiff> = report
            .schema
            .structure_diffs
            .iter()
            .filter(|d| !d.is_identical())
            .collect();
        if !structural.is_empty() {
            writeln!(sql, "{}", RULE)?;
            writeln!(sql, "-- Structure")?;
            writeln!(sql, "{}", RULE)?;
            writeln!(sql)?;
            for diff in structural {
                write_structure(&mut sql, diff)?;
            }
        }

        for table in &report.schema.tables {
            match &table.status {
                TableStatus::Identical | TableStatus::Skipped { .. } => continue,
                TableStatus::Failed { error } => {
                    writeln!(sql, "{}", RULE)?;
                    writeln!(sql, "-- Table: {} (failed: {})", table.table, error)?;
                    writeln!(sql, "{}", RULE)?;
                    writeln!(sql)?;
                    continue;
                }
                TableStatus::Differs | TableStatus::Unverified => {}
            }

            let (updates, inserts, deletes) = table.counts();
            writeln!(sql, "{}", RULE)?;
            writeln!(
                sql,
                "-- Table: {} ({} updates, {} inserts, {} deletes)",
                table.table, updates, inserts, deletes
            )?;
            if !table.unverified_spans.is_empty() {
                let spans: Vec<String> =
                    table.unverified_spans.iter().map(|s| s.to_string()).collect();
                writeln!(sql, "-- Unverified spans, repairs incomplete: {}", spans.join(", "))?;
            }
            writeln!(sql, "{}", RULE)?;
            writeln!(sql)?;

            for stmt in table.repair_sql(dialect.as_ref()) {
                writeln!(sql, "{};", stmt)?;
            }
            writeln!(sql)?;
        }

        writeln!(sql, "COMMIT;")?;
        Ok(sql)
    }

    fn extension(&self) -> &'static str {
        "sql"
    }
}

fn write_structure(sql: &mut String, diff: &StructureDiff) -> std::fmt::Result {
    writeln!(sql, "-- {} ({:?})", diff.object, diff.state)?;
    for note in &diff.notes {
        writeln!(sql, "-- note: {}", note)?;
    }
    if diff.unsupported {
        writeln!(sql, "-- manual review required: not every difference has a repair")?;
    }
    for stmt in &diff.repair_statements {
        writeln!(sql, "{}", stmt)?;
    }
    writeln!(sql)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
