use anyhow::Result;
use serde::Serialize;

use crate::application::monitoring::PerfReport;
use crate::domain::{
    ports::{OutputWriter, QueryDialect},
    repair::{BoundStatement, RepairStatement},
    report::{RunReport, TableReport},
};
use crate::infrastructure::db::dialect::query_dialect;

// ─── Serialisation view types ─────────────────────────────────────────────────
//
// These mirror the report but add rendered SQL to each repair statement.
// They are presentation-only: the domain types are never modified.

#[derive(Serialize)]
struct JsonRun<'a> {
    #[serde(flatten)]
    report: &'a RunReport,
    repairs: Vec<JsonTableRepairs<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    perf: Option<&'a PerfReport>,
}

#[derive(Serialize)]
struct JsonTableRepairs<'a> {
    table: &'a str,
    statements: Vec<JsonStatement<'a>>,
}

#[derive(Serialize)]
struct JsonStatement<'a> {
    #[serde(flatten)]
    statement: &'a RepairStatement,
    sql: String,
    bound: BoundStatement,
}

fn table_repairs<'a>(table: &'a TableReport, dialect: &dyn QueryDialect) -> JsonTableRepairs<'a> {
    JsonTableRepairs {
        table: &table.table,
        statements: table
            .statements
            .iter()
            .map(|s| JsonStatement {
                statement: s,
                sql: s.to_sql(dialect),
                bound: s.parameterized(dialect),
            })
            .collect(),
    }
}

// ─── Writer ───────────────────────────────────────────────────────────────────

/// Machine-readable run report, with each repair rendered both inline and
/// with bind placeholders.
#[derive(Default)]
pub struct JsonWriter {
    perf: Option<PerfReport>,
}

impl JsonWriter {
    pub fn with_perf(perf: PerfReport) -> Self {
        Self { perf: Some(perf) }
    }
}

impl OutputWriter for JsonWriter {
    fn format(&self, report: &RunReport) -> Result<String> {
        let dialect = query_dialect(&report.driver);

        let view = JsonRun {
            report,
            repairs: report
                .schema
                .tables
                .iter()
                .filter(|t| !t.statements.is_empty())
                .map(|t| table_repairs(t, dialect.as_ref()))
                .collect(),
            perf: self.perf.as_ref(),
        };

        Ok(serde_json::to_string_pretty(&view)?)
    }

    fn extension(&self) -> &'static str {
        "json"
    }
}
