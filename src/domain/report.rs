use chrono::Utc;
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

use crate::domain::error::ReconcileError;
use crate::domain::ports::QueryDialect;
use crate::domain::repair::RepairStatement;
use crate::domain::structure_diff::StructureDiff;
use crate::domain::value_objects::{ObjectDescriptor, Span};

/// Cell of the per-object status grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckState {
    Pass,
    Fail,
    Skip,
    /// The check does not apply to this object.
    NotRun,
}

impl fmt::Display for CheckState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CheckState::Pass => "PASS",
            CheckState::Fail => "FAIL",
            CheckState::Skip => "SKIP",
            CheckState::NotRun => "-",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TableStatus {
    Identical,
    Differs,
    /// At least one span could not be fetched; never reported identical.
    Unverified,
    Skipped { reason: String },
    Failed { error: ReconcileError },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RowCountCheck {
    pub state: CheckState,
    pub source: Option<u64>,
    pub target: Option<u64>,
}

impl RowCountCheck {
    pub fn skipped() -> Self {
        Self {
            state: CheckState::Skip,
            source: None,
            target: None,
        }
    }

    pub fn from_counts(source: u64, target: u64) -> Self {
        Self {
            state: if source == target {
                CheckState::Pass
            } else {
                CheckState::Fail
            },
            source: Some(source),
            target: Some(target),
        }
    }
}

/// Bucket-level statistics of one table comparison.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SpanStats {
    pub source_spans: usize,
    pub target_spans: usize,
    pub changed: usize,
    pub source_only: usize,
    pub target_only: usize,
}

/// Result of reconciling the rows of one table.
#[derive(Debug, Clone, Serialize)]
pub struct TableReport {
    pub table: String,
    pub status: TableStatus,
    pub row_count: RowCountCheck,
    pub spans: SpanStats,
    /// Ordered updates, then inserts, then deletes; each group by primary key.
    pub statements: Vec<RepairStatement>,
    pub unverified_spans: Vec<Span>,
    pub duration_ms: u128,
}

impl TableReport {
    pub fn new(table: impl Into<String>, status: TableStatus) -> Self {
        Self {
            table: table.into(),
            status,
            row_count: RowCountCheck::skipped(),
            spans: SpanStats::default(),
            statements: Vec::new(),
            unverified_spans: Vec::new(),
            duration_ms: 0,
        }
    }

    pub fn failed(table: impl Into<String>, error: ReconcileError) -> Self {
        Self::new(table, TableStatus::Failed { error })
    }

    pub fn skipped(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(
            table,
            TableStatus::Skipped {
                reason: reason.into(),
            },
        )
    }

    pub fn is_identical(&self) -> bool {
        self.status == TableStatus::Identical
    }

    /// Differs, could not be verified, or failed.
    pub fn has_mismatch(&self) -> bool {
        matches!(
            self.status,
            TableStatus::Differs | TableStatus::Unverified | TableStatus::Failed { .. }
        )
    }

    pub fn error(&self) -> Option<&ReconcileError> {
        match &self.status {
            TableStatus::Failed { error } => Some(error),
            _ => None,
        }
    }

    pub fn repair_sql(&self, dialect: &dyn QueryDialect) -> Vec<String> {
        self.statements.iter().map(|s| s.to_sql(dialect)).collect()
    }

    /// `(updates, inserts, deletes)`
    pub fn counts(&self) -> (usize, usize, usize) {
        self.statements
            .iter()
            .fold((0, 0, 0), |(u, i, d), s| match s {
                RepairStatement::Update { .. } => (u + 1, i, d),
                RepairStatement::Insert { .. } => (u, i + 1, d),
                RepairStatement::Delete { .. } => (u, i, d + 1),
            })
    }

    /// Data check cell for the status grid.
    pub fn data_check(&self) -> CheckState {
        match self.status {
            TableStatus::Identical => CheckState::Pass,
            TableStatus::Skipped { .. } => CheckState::Skip,
            _ => CheckState::Fail,
        }
    }
}

/// One row of the status grid: definition, row count and data checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectReport {
    pub object: ObjectDescriptor,
    pub definition: CheckState,
    pub row_count: CheckState,
    pub data: CheckState,
}

impl ObjectReport {
    pub fn has_failure(&self) -> bool {
        [self.definition, self.row_count, self.data].contains(&CheckState::Fail)
    }
}

/// Result of a whole-schema comparison.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchemaReport {
    pub structure_diffs: Vec<StructureDiff>,
    pub objects: Vec<ObjectReport>,
    pub tables: Vec<TableReport>,
}

impl SchemaReport {
    pub fn is_identical(&self) -> bool {
        self.structure_diffs.iter().all(|d| d.is_identical())
            && self.tables.iter().all(|t| {
                t.is_identical() || matches!(t.status, TableStatus::Skipped { .. })
            })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub tables_compared: usize,
    pub tables_identical: usize,
    pub tables_failed: usize,
    pub structure_diffs: usize,
    pub total_updates: usize,
    pub total_inserts: usize,
    pub total_deletes: usize,
    pub total_changes: usize,
}

/// Everything produced by one run, ready for the writers.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub source_schema: String,
    pub target_schema: String,
    /// Driver of the target database; selects the repair script dialect.
    pub driver: String,
    pub created_at: String,
    pub schema: SchemaReport,
    pub summary: Summary,
}

impl RunReport {
    pub fn new(source_schema: &str, target_schema: &str, driver: &str, schema: SchemaReport) -> Self {
        let (mut total_updates, mut total_inserts, mut total_deletes) = (0, 0, 0);
        for t in &schema.tables {
            let (u, i, d) = t.counts();
            total_updates += u;
            total_inserts += i;
            total_deletes += d;
        }

        let summary = Summary {
            tables_compared: schema.tables.len(),
            tables_identical: schema.tables.iter().filter(|t| t.is_identical()).count(),
            tables_failed: schema.tables.iter().filter(|t| t.error().is_some()).count(),
            structure_diffs: schema
                .structure_diffs
                .iter()
                .filter(|d| !d.is_identical())
                .count(),
            total_updates,
            total_inserts,
            total_deletes,
            total_changes: total_updates + total_inserts + total_deletes,
        };

        RunReport {
            run_id: format!(
                "run_{}_{}",
                Utc::now().format("%Y%m%d_%H%M%S"),
                Uuid::new_v4().simple()
            ),
            source_schema: source_schema.to_string(),
            target_schema: target_schema.to_string(),
            driver: driver.to_string(),
            created_at: Utc::now().to_rfc3339(),
            schema,
            summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::Side;
    use crate::domain::repair::TableRef;
    use serde_json::json;

    fn delete(id: i64) -> RepairStatement {
        RepairStatement::Delete {
            table: TableRef::new(None, "users"),
            key: vec![("id".into(), json!(id))],
        }
    }

    #[test]
    fn failed_table_is_never_identical() {
        let t = TableReport::failed(
            "users",
            ReconcileError::Connection {
                side: Side::Source,
                message: "boom".into(),
            },
        );
        assert!(!t.is_identical());
        assert!(t.statements.is_empty());
        assert_eq!(t.data_check(), CheckState::Fail);
    }

    #[test]
    fn summary_totals_statements_by_kind() {
        let mut t = TableReport::new("users", TableStatus::Differs);
        t.statements = vec![delete(3), delete(4)];
        let run = RunReport::new(
            "src",
            "tgt",
            "postgres",
            SchemaReport {
                tables: vec![t, TableReport::new("orders", TableStatus::Identical)],
                ..Default::default()
            },
        );
        assert_eq!(run.summary.total_deletes, 2);
        assert_eq!(run.summary.total_changes, 2);
        assert_eq!(run.summary.tables_compared, 2);
        assert_eq!(run.summary.tables_identical, 1);
        assert!(run.run_id.starts_with("run_"));
    }

    #[test]
    fn check_state_renders_grid_cells() {
        assert_eq!(CheckState::Pass.to_string(), "PASS");
        assert_eq!(CheckState::NotRun.to_string(), "-");
    }
}
