use crate::domain::error::Side;
use crate::domain::ports::{Database, DdlSource, ObjectLister, RowSource};
use crate::domain::{
    report::TableReport,
    row::{KeyValues, RowMap, SignedKey},
    value_objects::{ColumnName, ObjectDescriptor, TableName, TableSchema, TableShape},
};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{info, instrument};

// ─── PerfReport ──────────────────────────────────────────────────────────────

/// A single timed operation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OpTiming {
    /// Operation name: "fetch_signatures", "fetch_rows", "fetch_rows_by_key",
    /// "row_count", "describe_table" or "compare_table".
    pub operation: &'static str,
    /// Side the operation ran against; `None` for whole-table comparisons.
    pub side: Option<Side>,
    /// Table this operation was performed on.
    pub table: String,
    /// Elapsed wall time in milliseconds.
    pub duration_ms: u128,
    /// Number of rows involved (fetched, counted or repaired).
    pub rows: usize,
}

/// Accumulated performance timings for a single run.
///
/// Shared across all decorator instances for one run via `Arc<Mutex<_>>`.
/// After the run, pass to [`crate::presentation::cli_summary::print_perf_summary`]
/// to render a human-readable table.
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct PerfReport {
    pub timings: Vec<OpTiming>,
    pub total_rows_fetched: usize,
    pub total_ms: u128,
}

impl PerfReport {
    pub fn new() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::default()))
    }

    fn record(report: &Arc<Mutex<Self>>, timing: OpTiming) {
        if let Ok(mut r) = report.lock() {
            // fetches overlap with the comparison that issued them
            if timing.operation == "compare_table" {
                r.total_ms += timing.duration_ms;
            }
            if matches!(
                timing.operation,
                "fetch_signatures" | "fetch_rows" | "fetch_rows_by_key"
            ) {
                r.total_rows_fetched += timing.rows;
            }
            r.timings.push(timing);
        }
    }

    /// Record the wall time of a finished table comparison.
    pub fn record_table(report: &Arc<Mutex<Self>>, table: &TableReport) {
        Self::record(
            report,
            OpTiming {
                operation: "compare_table",
                side: None,
                table: table.table.clone(),
                duration_ms: table.duration_ms,
                rows: table.statements.len(),
            },
        );
    }

    /// Timings of one operation kind, in recording order.
    pub fn operations<'a>(&'a self, operation: &'a str) -> impl Iterator<Item = &'a OpTiming> {
        self.timings.iter().filter(move |t| t.operation == operation)
    }
}

// ─── MonitoringDatabase ──────────────────────────────────────────────────────

/// Decorator: wraps any `Database`, measures wall time per row-level call,
/// and appends the result to the shared `PerfReport`.
pub struct MonitoringDatabase {
    inner: Arc<dyn Database>,
    side: Side,
    report: Arc<Mutex<PerfReport>>,
}

impl MonitoringDatabase {
    pub fn new(inner: Arc<dyn Database>, side: Side, report: Arc<Mutex<PerfReport>>) -> Self {
        Self {
            inner,
            side,
            report,
        }
    }

    fn timed(&self, operation: &'static str, table: &TableName, start: Instant, rows: usize) {
        let duration_ms = start.elapsed().as_millis();
        info!(side = %self.side, table = %table.0, rows, duration_ms, "{} completed", operation);
        PerfReport::record(
            &self.report,
            OpTiming {
                operation,
                side: Some(self.side),
                table: table.0.clone(),
                duration_ms,
                rows,
            },
        );
    }
}

#[async_trait]
impl RowSource for MonitoringDatabase {
    fn schema(&self) -> Option<&str> {
        self.inner.schema()
    }

    fn content_digest(&self) -> Option<&'static str> {
        self.inner.content_digest()
    }

    #[instrument(
        name = "describe_table",
        skip(self, table),
        fields(db.side = %self.side, db.table = %table.0),
        level = "debug"
    )]
    async fn describe_table(&self, table: &TableName) -> Result<TableShape> {
        let start = Instant::now();
        let shape = self.inner.describe_table(table).await?;
        self.timed("describe_table", table, start, 0);
        Ok(shape)
    }

    #[instrument(
        name = "fetch_signatures",
        skip(self, table, schema),
        fields(db.side = %self.side, db.table = %table.0),
        level = "info"
    )]
    async fn fetch_signatures(
        &self,
        table: &TableName,
        schema: &TableSchema,
        in_database: bool,
    ) -> Result<Vec<SignedKey>> {
        let start = Instant::now();
        let signed = self.inner.fetch_signatures(table, schema, in_database).await?;
        self.timed("fetch_signatures", table, start, signed.len());
        Ok(signed)
    }

    #[instrument(
        name = "fetch_rows",
        skip(self, table, projection, order_by),
        fields(db.side = %self.side, db.table = %table.0),
        level = "info"
    )]
    async fn fetch_rows(
        &self,
        table: &TableName,
        projection: &[ColumnName],
        order_by: &[ColumnName],
    ) -> Result<Vec<RowMap>> {
        let start = Instant::now();
        let rows = self.inner.fetch_rows(table, projection, order_by).await?;
        self.timed("fetch_rows", table, start, rows.len());
        Ok(rows)
    }

    #[instrument(
        name = "fetch_rows_by_key",
        skip(self, table, projection, key_columns, keys),
        fields(db.side = %self.side, db.table = %table.0, keys = keys.len()),
        level = "debug"
    )]
    async fn fetch_rows_by_key(
        &self,
        table: &TableName,
        projection: &[ColumnName],
        key_columns: &[ColumnName],
        keys: &[KeyValues],
    ) -> Result<Vec<RowMap>> {
        let start = Instant::now();
        let rows = self
            .inner
            .fetch_rows_by_key(table, projection, key_columns, keys)
            .await?;
        self.timed("fetch_rows_by_key", table, start, rows.len());
        Ok(rows)
    }

    async fn row_count(&self, table: &TableName) -> Result<u64> {
        let start = Instant::now();
        let n = self.inner.row_count(table).await?;
        self.timed("row_count", table, start, n as usize);
        Ok(n)
    }
}

#[async_trait]
impl DdlSource for MonitoringDatabase {
    async fn create_statement(&self, object: &ObjectDescriptor) -> Result<String> {
        self.inner.create_statement(object).await
    }
}

#[async_trait]
impl ObjectLister for MonitoringDatabase {
    async fn list_objects(&self) -> Result<Vec<ObjectDescriptor>> {
        self.inner.list_objects().await
    }
}
