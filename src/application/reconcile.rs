use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::application::bucket_diff::diff_buckets;
use crate::application::ddl_diff::{diff_definitions, missing_in_source, missing_in_target};
use crate::application::object_set::{compare_object_sets, type_counts};
use crate::application::repair_sql::{generate_repairs, RepairInput};
use crate::application::row_diff::{classify_span, SpanClassification};
use crate::domain::{
    error::{ReconcileError, Side},
    ports::{Database, QueryDialect},
    repair::TableRef,
    report::{
        CheckState, ObjectReport, RowCountCheck, SchemaReport, SpanStats, TableReport,
        TableStatus,
    },
    row::{CompareRow, KeyValues},
    signature::{hash_row, keyed_row},
    span_summary::{SpanSummary, SpanSummaryBuilder},
    structure_diff::{StructureDiff, StructureState},
    value_objects::{ColumnName, ObjectDescriptor, ObjectType, Span, TableName, TableSchema, TableShape},
};
use crate::infrastructure::config::{ReconcileOptions, TableConfig};

// ─── Schema resolution ───

/// Derive the column layout both sides are hashed with.
///
/// The key is the configured override or else the introspected one, and must
/// agree across sides. Compare columns follow the source's column order minus
/// exclusions and must all exist on the target.
pub fn resolve_schema(
    cfg: &TableConfig,
    source: &TableShape,
    target: &TableShape,
) -> Result<TableSchema, ReconcileError> {
    for (side, shape) in [(Side::Source, source), (Side::Target, target)] {
        if shape.columns.is_empty() {
            return Err(ReconcileError::invalid_schema(format!(
                "table {} not found in {}",
                cfg.name, side
            )));
        }
    }

    let pick = |shape: &TableShape| {
        if cfg.primary_key.is_empty() {
            shape.primary_key.clone()
        } else {
            cfg.primary_key.clone()
        }
    };
    let (source_key, target_key) = (pick(source), pick(target));
    if source_key != target_key {
        return Err(ReconcileError::SchemaMismatch {
            table: cfg.name.clone(),
            source_key,
            target_key,
        });
    }
    if source_key.is_empty() {
        return Err(ReconcileError::invalid_schema(format!(
            "table {} has no primary key; configure primary_key",
            cfg.name
        )));
    }
    if let Some(k) = source_key
        .iter()
        .find(|k| !source.has_column(k) || !target.has_column(k))
    {
        return Err(ReconcileError::invalid_schema(format!(
            "primary key column {} not found in {}",
            k, cfg.name
        )));
    }

    let compare: Vec<ColumnName> = source
        .column_names()
        .filter(|c| !cfg.excluded_columns.contains(c))
        .map(|c| ColumnName(c.to_string()))
        .collect();
    if compare.is_empty() {
        return Err(ReconcileError::invalid_schema(format!(
            "every column of {} is excluded",
            cfg.name
        )));
    }
    if let Some(missing) = compare.iter().find(|c| !target.has_column(c.as_str())) {
        return Err(ReconcileError::invalid_schema(format!(
            "column {} of {} not found in target",
            missing.0, cfg.name
        )));
    }

    Ok(TableSchema::new(
        source_key.into_iter().map(ColumnName).collect(),
        compare,
    ))
}

/// Digests are only comparable when both sides compute the same one.
fn hash_in_database(source: Option<&str>, target: Option<&str>) -> bool {
    matches!((source, target), (Some(s), Some(t)) if s == t)
}

// ─── Side scan ───

/// Summaries plus per-bucket signatures of one side of one table.
struct SideScan {
    summaries: Vec<SpanSummary>,
    buckets: HashMap<Span, Vec<CompareRow>>,
}

async fn scan(
    db: &dyn Database,
    side: Side,
    table: &TableName,
    schema: &TableSchema,
    in_database: bool,
    span_len: usize,
) -> Result<SideScan, ReconcileError> {
    let signed = db
        .fetch_signatures(table, schema, in_database)
        .await
        .map_err(|e| match e.downcast::<ReconcileError>() {
            Ok(err) => err,
            Err(e) => ReconcileError::connection(side, &e),
        })?;

    let mut builder = SpanSummaryBuilder::new();
    let mut buckets: HashMap<Span, Vec<CompareRow>> = HashMap::new();
    let rows = signed.len();
    for s in signed {
        let cr = keyed_row(s, span_len);
        builder.push(&cr)?;
        buckets.entry(cr.span.clone()).or_default().push(cr);
    }
    debug!(table = %table, %side, rows, spans = builder.len(), in_database, "scan completed");

    Ok(SideScan {
        summaries: builder.finish(),
        buckets,
    })
}

/// Fetch the source version of every updated or inserted row of one bucket.
async fn fetch_span_rows(
    source: Arc<dyn Database>,
    table: TableName,
    schema: Arc<TableSchema>,
    projection: Arc<Vec<ColumnName>>,
    span: &Span,
    class: SpanClassification,
) -> Result<RepairInput> {
    let update_hashes: HashSet<&str> = class
        .updates
        .iter()
        .map(|r| r.signature.pk_hash.as_str())
        .collect();
    let insert_hashes: HashSet<&str> = class
        .inserts
        .iter()
        .map(|r| r.signature.pk_hash.as_str())
        .collect();
    let keys: Vec<KeyValues> = class
        .updates
        .iter()
        .chain(class.inserts.iter())
        .map(|r| r.key.clone())
        .collect();

    let rows = source
        .fetch_rows_by_key(&table, &projection, &schema.pk_columns, &keys)
        .await
        .with_context(|| format!("Failed to fetch rows of span {} in {}", span, table))?;

    let mut input = RepairInput {
        deletes: class.deletes.iter().map(|r| r.key.clone()).collect(),
        ..Default::default()
    };
    for row in rows {
        let sig = hash_row(&row, &schema)?;
        if update_hashes.contains(sig.pk_hash.as_str()) {
            input.updates.push(row);
        } else if insert_hashes.contains(sig.pk_hash.as_str()) {
            input.inserts.push(row);
        }
    }
    Ok(input)
}

// ─── Reconciler ───

/// Sequences object, definition and row reconciliation between two databases.
///
/// Cheap to clone; clones share the same connections and cancellation token.
#[derive(Clone)]
pub struct Reconciler {
    source: Arc<dyn Database>,
    target: Arc<dyn Database>,
    dialect: Arc<dyn QueryDialect>,
    options: Arc<ReconcileOptions>,
    cancel: CancellationToken,
}

impl Reconciler {
    /// `dialect` is the target's; structural repairs are rendered with it.
    /// Fails with `InvalidConfig` when `options` do not validate.
    pub fn new(
        source: Arc<dyn Database>,
        target: Arc<dyn Database>,
        dialect: Arc<dyn QueryDialect>,
        options: ReconcileOptions,
    ) -> Result<Self, ReconcileError> {
        options.validate()?;
        Ok(Self {
            source,
            target,
            dialect,
            options: Arc::new(options),
            cancel: CancellationToken::new(),
        })
    }

    /// Cancelling this token (or a parent of it) stops every comparison.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// Reconcile the rows of one table. Never fails: errors are recorded on
    /// the report as `TableStatus::Failed` with no repair statements.
    pub async fn compare_table(&self, cfg: &TableConfig) -> TableReport {
        let token = self.cancel.child_token();
        let start = Instant::now();
        let secs = self.options.table_timeout_secs;
        let work = self.reconcile_table(cfg);

        let outcome = if secs == 0 {
            tokio::select! {
                _ = token.cancelled() => Err(ReconcileError::Cancelled { table: cfg.name.clone() }),
                r = work => r,
            }
        } else {
            tokio::select! {
                _ = token.cancelled() => Err(ReconcileError::Cancelled { table: cfg.name.clone() }),
                r = tokio::time::timeout(Duration::from_secs(secs), work) => {
                    r.unwrap_or_else(|_| Err(ReconcileError::Timeout { table: cfg.name.clone(), secs }))
                }
            }
        };

        let mut report = outcome.unwrap_or_else(|e| {
            warn!(table = %cfg.name, error = %e, "table comparison failed");
            TableReport::failed(cfg.name.clone(), e)
        });
        report.duration_ms = start.elapsed().as_millis();

        let (updates, inserts, deletes) = report.counts();
        info!(
            table = %report.table,
            status = ?report.status,
            updates,
            inserts,
            deletes,
            unverified = report.unverified_spans.len(),
            duration_ms = report.duration_ms,
            "table reconciled"
        );
        report
    }

    /// Reconcile several tables, at most `concurrency_limit` at a time.
    ///
    /// Reports come back in input order. Without
    /// `run_all_mismatches_before_reporting`, the first mismatch marks every
    /// comparison that has not started yet as skipped.
    pub async fn compare_tables(&self, tables: &[TableConfig]) -> Result<Vec<TableReport>> {
        let permits = Arc::new(Semaphore::new(self.options.concurrency_limit));
        let stop = CancellationToken::new();
        let mut handles = Vec::with_capacity(tables.len());

        for cfg in tables {
            let this = self.clone();
            let cfg = cfg.clone();
            let permits = Arc::clone(&permits);
            let stop = stop.clone();

            let handle = tokio::spawn(async move {
                let _permit = permits.acquire_owned().await?;
                if stop.is_cancelled() {
                    return Ok(TableReport::skipped(
                        cfg.name,
                        "skipped after an earlier mismatch",
                    ));
                }
                let report = this.compare_table(&cfg).await;
                if !this.options.run_all_mismatches_before_reporting && report.has_mismatch() {
                    stop.cancel();
                }
                Ok::<_, anyhow::Error>(report)
            });
            handles.push(handle);
        }

        let mut reports = Vec::with_capacity(handles.len());
        for h in handles {
            reports.push(h.await??);
        }
        Ok(reports)
    }

    #[instrument(name = "reconcile_table", skip(self, cfg), fields(db.table = %cfg.name), level = "info")]
    async fn reconcile_table(&self, cfg: &TableConfig) -> Result<TableReport, ReconcileError> {
        let table = TableName(cfg.name.clone());

        let (source_shape, target_shape) = tokio::join!(
            self.source.describe_table(&table),
            self.target.describe_table(&table)
        );
        let source_shape = source_shape.map_err(|e| ReconcileError::connection(Side::Source, &e))?;
        let target_shape = target_shape.map_err(|e| ReconcileError::connection(Side::Target, &e))?;
        let schema = Arc::new(resolve_schema(cfg, &source_shape, &target_shape)?);

        let mut report = TableReport::new(cfg.name.clone(), TableStatus::Identical);

        if !self.options.skip_row_count_check {
            let (s, t) = tokio::join!(
                self.source.row_count(&table),
                self.target.row_count(&table)
            );
            let s = s.map_err(|e| ReconcileError::connection(Side::Source, &e))?;
            let t = t.map_err(|e| ReconcileError::connection(Side::Target, &e))?;
            report.row_count = RowCountCheck::from_counts(s, t);
            if report.row_count.state == CheckState::Fail {
                info!(table = %table, source = s, target = t, "row counts differ");
            }
        }

        if self.options.skip_data_check {
            report.status = TableStatus::Skipped {
                reason: "data check disabled".to_string(),
            };
            return Ok(report);
        }

        let projection = Arc::new(schema.projection());
        let span_len = self.options.span_key_length;
        let in_database =
            hash_in_database(self.source.content_digest(), self.target.content_digest());
        let (source_scan, target_scan) = tokio::join!(
            scan(self.source.as_ref(), Side::Source, &table, &schema, in_database, span_len),
            scan(self.target.as_ref(), Side::Target, &table, &schema, in_database, span_len)
        );
        let mut source_scan = source_scan?;
        let mut target_scan = target_scan?;

        let buckets = diff_buckets(&source_scan.summaries, &target_scan.summaries);
        report.spans = SpanStats {
            source_spans: source_scan.summaries.len(),
            target_spans: target_scan.summaries.len(),
            changed: buckets.changed.len(),
            source_only: buckets.source_only.len(),
            target_only: buckets.target_only.len(),
        };
        if buckets.is_identical() {
            return Ok(report);
        }
        debug!(
            table = %table,
            changed = buckets.changed.len(),
            source_only = buckets.source_only.len(),
            target_only = buckets.target_only.len(),
            "buckets differ"
        );

        let mut work: Vec<(Span, SpanClassification)> = Vec::with_capacity(buckets.span_count());
        for span in &buckets.changed {
            let s = source_scan.buckets.remove(span).unwrap_or_default();
            let t = target_scan.buckets.remove(span).unwrap_or_default();
            work.push((span.clone(), classify_span(&s, &t)));
        }
        for span in &buckets.source_only {
            let rows = source_scan.buckets.remove(span).unwrap_or_default();
            work.push((span.clone(), SpanClassification::all_inserts(rows)));
        }
        for span in &buckets.target_only {
            let rows = target_scan.buckets.remove(span).unwrap_or_default();
            work.push((span.clone(), SpanClassification::all_deletes(rows)));
        }

        let mut input = RepairInput::default();
        let mut unverified = Vec::new();
        let mut pending: HashSet<Span> = HashSet::new();
        let permits = Arc::new(Semaphore::new(self.options.concurrency_limit));
        let mut tasks = JoinSet::new();

        for (span, class) in work {
            if class.updates.is_empty() && class.inserts.is_empty() {
                input.deletes.extend(class.deletes.into_iter().map(|r| r.key));
                continue;
            }
            pending.insert(span.clone());
            let source = Arc::clone(&self.source);
            let table = table.clone();
            let schema = Arc::clone(&schema);
            let projection = Arc::clone(&projection);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let result = fetch_span_rows(source, table, schema, projection, &span, class).await;
                (span, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((span, Ok(part))) => {
                    pending.remove(&span);
                    input.updates.extend(part.updates);
                    input.inserts.extend(part.inserts);
                    input.deletes.extend(part.deletes);
                }
                Ok((span, Err(e))) => {
                    warn!(table = %table, span = %span, error = %format!("{:#}", e), "span could not be verified");
                    pending.remove(&span);
                    unverified.push(span);
                }
                Err(e) => warn!(table = %table, error = %e, "span task failed"),
            }
        }
        // spans whose task panicked never reported back
        unverified.extend(pending);
        unverified.sort();

        let table_ref = TableRef::new(self.target.schema(), cfg.name.clone());
        report.statements = generate_repairs(&table_ref, &schema.pk_columns, input);
        report.status = if unverified.is_empty() {
            TableStatus::Differs
        } else {
            TableStatus::Unverified
        };
        report.unverified_spans = unverified;
        Ok(report)
    }

    /// Diff object lists and definitions, then reconcile the rows of every
    /// table whose definition matches.
    #[instrument(name = "compare_schema", skip(self), level = "info")]
    pub async fn compare_schema(&self) -> Result<SchemaReport> {
        let opts = Arc::clone(&self.options);
        let mut structure_diffs: Vec<StructureDiff> = Vec::new();
        let candidates: Vec<ObjectDescriptor>;
        let listed: Vec<ObjectDescriptor>;

        if opts.skip_object_list_check {
            candidates = if opts.tables.is_empty() {
                self.source
                    .list_objects()
                    .await
                    .with_context(|| "Failed to list source objects")?
                    .into_iter()
                    .filter(|o| o.object_type == ObjectType::Table)
                    .collect()
            } else {
                opts.tables
                    .iter()
                    .map(|t| ObjectDescriptor::table(t.name.clone()))
                    .collect()
            };
            listed = candidates.clone();
        } else {
            let (s, t) = tokio::join!(self.source.list_objects(), self.target.list_objects());
            let s = s.with_context(|| "Failed to list source objects")?;
            let t = t.with_context(|| "Failed to list target objects")?;
            let sets = compare_object_sets(&s, &t);

            info!(
                common = sets.common.len(),
                only_source = sets.only_source.len(),
                only_target = sets.only_target.len(),
                "object lists compared"
            );
            if opts.verbosity >= 2 {
                for (object_type, count) in type_counts(&sets.common) {
                    info!(%object_type, count, "common objects");
                }
            }

            for object in &sets.only_source {
                let ddl = match self.source.create_statement(object).await {
                    Ok(ddl) => Some(ddl),
                    Err(e) => {
                        warn!(object = %object, error = %format!("{:#}", e), "source definition unavailable");
                        None
                    }
                };
                structure_diffs.push(missing_in_target(object, ddl.as_deref()));
            }
            for object in &sets.only_target {
                structure_diffs.push(missing_in_source(object, self.dialect.as_ref()));
            }
            structure_diffs.extend(self.diff_common_objects(&sets.common).await?);
            structure_diffs.sort_by(|a, b| a.object.cmp(&b.object));

            candidates = sets
                .common
                .iter()
                .filter(|o| o.object_type.holds_rows())
                .cloned()
                .collect();
            listed = sets
                .common
                .into_iter()
                .chain(sets.only_source)
                .chain(sets.only_target)
                .collect();
        }

        let differs: HashSet<&ObjectDescriptor> = structure_diffs
            .iter()
            .filter(|d| !d.is_identical())
            .map(|d| &d.object)
            .collect();
        let stop_early = !opts.run_all_mismatches_before_reporting && !differs.is_empty();

        let mut tables = Vec::new();
        let mut to_run = Vec::new();
        for object in &candidates {
            if !opts.tables.is_empty() && opts.table(&object.name).is_none() {
                continue;
            }
            let cfg = opts
                .table(&object.name)
                .cloned()
                .unwrap_or_else(|| TableConfig::new(object.name.clone()));

            if object.object_type == ObjectType::View && cfg.primary_key.is_empty() {
                tables.push(TableReport::skipped(cfg.name, "view has no primary key configured"));
            } else if differs.contains(object) {
                tables.push(TableReport::skipped(cfg.name, "definition differs"));
            } else if stop_early {
                tables.push(TableReport::skipped(cfg.name, "skipped after an earlier mismatch"));
            } else {
                to_run.push(cfg);
            }
        }
        tables.extend(self.compare_tables(&to_run).await?);
        tables.sort_by(|a, b| a.table.cmp(&b.table));
        record_key_mismatches(&candidates, &tables, &mut structure_diffs);

        let objects = status_grid(
            &listed,
            &structure_diffs,
            &tables,
            opts.skip_object_list_check,
        );

        Ok(SchemaReport {
            structure_diffs,
            objects,
            tables,
        })
    }

    async fn diff_common_objects(&self, common: &[ObjectDescriptor]) -> Result<Vec<StructureDiff>> {
        let permits = Arc::new(Semaphore::new(self.options.concurrency_limit));
        let mut handles = Vec::with_capacity(common.len());

        for object in common {
            let this = self.clone();
            let object = object.clone();
            let permits = Arc::clone(&permits);
            handles.push(tokio::spawn(async move {
                let _permit = permits.acquire_owned().await?;
                let (s, t) = tokio::join!(
                    this.source.create_statement(&object),
                    this.target.create_statement(&object)
                );
                let diff = match (s, t) {
                    (Ok(s), Ok(t)) => diff_definitions(&object, &s, &t, this.dialect.as_ref()),
                    (Err(e), _) | (_, Err(e)) => {
                        warn!(object = %object, error = %format!("{:#}", e), "definition unavailable");
                        StructureDiff {
                            object,
                            state: StructureState::Differs,
                            diff_count: 1,
                            repair_statements: Vec::new(),
                            notes: vec![format!("definition unavailable: {:#}", e)],
                            unsupported: true,
                        }
                    }
                };
                Ok::<_, anyhow::Error>(diff)
            }));
        }

        let mut diffs = Vec::with_capacity(handles.len());
        for h in handles {
            diffs.push(h.await??);
        }
        Ok(diffs)
    }
}

/// Tables whose primary keys disagree count as structural differences, also
/// when their definitions were not diffed.
fn record_key_mismatches(
    candidates: &[ObjectDescriptor],
    tables: &[TableReport],
    diffs: &mut Vec<StructureDiff>,
) {
    for table in tables {
        let Some(err @ ReconcileError::SchemaMismatch { .. }) = table.error() else {
            continue;
        };
        let Some(object) = candidates.iter().find(|o| o.name == table.table) else {
            continue;
        };
        let diff = StructureDiff::key_mismatch(object.clone(), err.to_string());
        match diffs.iter_mut().find(|d| d.object == *object) {
            Some(existing) => *existing = diff,
            None => diffs.push(diff),
        }
    }
    diffs.sort_by(|a, b| a.object.cmp(&b.object));
}

/// One row per listed object: definition, row count and data checks.
fn status_grid(
    listed: &[ObjectDescriptor],
    structure_diffs: &[StructureDiff],
    tables: &[TableReport],
    definitions_skipped: bool,
) -> Vec<ObjectReport> {
    let defs: HashMap<&ObjectDescriptor, &StructureDiff> =
        structure_diffs.iter().map(|d| (&d.object, d)).collect();
    let by_name: HashMap<&str, &TableReport> =
        tables.iter().map(|t| (t.table.as_str(), t)).collect();

    let mut sorted: Vec<&ObjectDescriptor> = listed.iter().collect();
    sorted.sort();
    sorted.dedup();

    sorted
        .into_iter()
        .map(|object| {
            let definition = if definitions_skipped {
                CheckState::Skip
            } else {
                match defs.get(object) {
                    Some(d) if d.is_identical() => CheckState::Pass,
                    Some(_) => CheckState::Fail,
                    None => CheckState::NotRun,
                }
            };
            let table = object
                .object_type
                .holds_rows()
                .then(|| by_name.get(object.name.as_str()))
                .flatten();
            ObjectReport {
                object: object.clone(),
                definition,
                row_count: table.map_or(CheckState::NotRun, |t| t.row_count.state),
                data: table.map_or(CheckState::NotRun, |t| t.data_check()),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repair::RepairStatement;
    use crate::domain::row::RowMap;
    use crate::infrastructure::db::dialect::{MysqlDialect, SqliteDialect};
    use crate::infrastructure::memory::MemoryDatabase;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;

    fn user(id: i64, name: &str) -> RowMap {
        RowMap::from([("id".to_string(), json!(id)), ("name".to_string(), json!(name))])
    }

    fn users(rows: Vec<RowMap>) -> MemoryDatabase {
        MemoryDatabase::new()
            .with_table("users", &[("id", "INT"), ("name", "VARCHAR(50)")], &["id"])
            .with_rows("users", rows)
    }

    fn reconciler(source: MemoryDatabase, target: MemoryDatabase, options: ReconcileOptions) -> Reconciler {
        Reconciler::new(Arc::new(source), Arc::new(target), Arc::new(SqliteDialect), options)
            .unwrap()
    }

    /// `(updates, inserts, deletes)` as sets of rendered keys.
    fn classified(statements: &[RepairStatement]) -> [BTreeMap<String, ()>; 3] {
        let mut out: [BTreeMap<String, ()>; 3] = Default::default();
        for s in statements {
            let (slot, key) = match s {
                RepairStatement::Update { key, .. } => (0, format!("{:?}", key)),
                RepairStatement::Insert { columns, values, .. } => {
                    let key: Vec<(String, Value)> = columns
                        .iter()
                        .cloned()
                        .zip(values.iter().cloned())
                        .filter(|(c, _)| c == "id" || c == "tenant")
                        .collect();
                    (1, format!("{:?}", key))
                }
                RepairStatement::Delete { key, .. } => (2, format!("{:?}", key)),
            };
            out[slot].insert(key, ());
        }
        out
    }

    // ─── Schema resolution ───

    fn shape(cols: &[&str], pk: &[&str]) -> TableShape {
        TableShape {
            columns: cols.iter().map(|c| (c.to_string(), "TEXT".to_string())).collect(),
            primary_key: pk.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[test]
    fn schema_follows_source_order_minus_exclusions() {
        let mut cfg = TableConfig::new("users");
        cfg.excluded_columns.0.push("updated_at".into());
        let s = resolve_schema(
            &cfg,
            &shape(&["id", "name", "updated_at"], &["id"]),
            &shape(&["name", "id", "updated_at"], &["id"]),
        )
        .unwrap();
        assert_eq!(s.pk_columns, vec![ColumnName("id".into())]);
        assert_eq!(
            s.compare_columns,
            vec![ColumnName("id".into()), ColumnName("name".into())]
        );
    }

    #[test]
    fn differing_keys_are_a_schema_mismatch() {
        let err = resolve_schema(
            &TableConfig::new("users"),
            &shape(&["id", "email"], &["id"]),
            &shape(&["id", "email"], &["email"]),
        )
        .unwrap_err();
        assert!(matches!(err, ReconcileError::SchemaMismatch { .. }));
    }

    #[test]
    fn configured_key_overrides_introspection() {
        let mut cfg = TableConfig::new("v_users");
        cfg.primary_key = vec!["id".into()];
        let s = resolve_schema(&cfg, &shape(&["id", "name"], &[]), &shape(&["id", "name"], &[])).unwrap();
        assert_eq!(s.pk_columns, vec![ColumnName("id".into())]);
    }

    #[test]
    fn missing_key_or_column_is_invalid() {
        let cfg = TableConfig::new("logs");
        let no_key = resolve_schema(&cfg, &shape(&["msg"], &[]), &shape(&["msg"], &[]));
        assert!(matches!(no_key, Err(ReconcileError::InvalidSchema(_))));

        let missing = resolve_schema(
            &TableConfig::new("users"),
            &shape(&["id", "phone"], &["id"]),
            &shape(&["id"], &["id"]),
        );
        assert!(matches!(missing, Err(ReconcileError::InvalidSchema(m)) if m.contains("phone")));

        let absent = resolve_schema(&cfg, &shape(&["id"], &["id"]), &TableShape::default());
        assert!(matches!(absent, Err(ReconcileError::InvalidSchema(m)) if m.contains("not found")));
    }

    // ─── Table comparison ───

    #[tokio::test]
    async fn insert_and_delete_are_generated_for_users() {
        let r = reconciler(
            users(vec![user(1, "A"), user(2, "B")]),
            users(vec![user(1, "A"), user(3, "C")]),
            ReconcileOptions::default(),
        );
        let report = r.compare_table(&TableConfig::new("users")).await;

        assert_eq!(report.status, TableStatus::Differs);
        assert!(!report.is_identical());
        assert_eq!(
            report.repair_sql(&SqliteDialect),
            vec![
                r#"INSERT INTO "users" ("id", "name") VALUES (2, 'B')"#,
                r#"DELETE FROM "users" WHERE "id" = 3"#,
            ]
        );
        assert_eq!(report.row_count.state, CheckState::Pass);
    }

    #[tokio::test]
    async fn identical_tables_produce_nothing() {
        let db = users(vec![user(1, "A"), user(2, "B")]);
        let r = reconciler(db.duplicate(), db, ReconcileOptions::default());
        let report = r.compare_table(&TableConfig::new("users")).await;
        assert!(report.is_identical());
        assert!(report.statements.is_empty());
        assert_eq!(report.spans.changed, 0);
    }

    #[tokio::test]
    async fn composite_key_update_sets_only_non_key_columns() {
        let orders = |total: i64| {
            MemoryDatabase::new()
                .with_table("orders", &[("tenant", "TEXT"), ("id", "INT"), ("total", "INT")], &["tenant", "id"])
                .with_rows(
                    "orders",
                    vec![RowMap::from([
                        ("tenant".to_string(), json!("acme")),
                        ("id".to_string(), json!(7)),
                        ("total".to_string(), json!(total)),
                    ])],
                )
        };
        let r = reconciler(orders(150), orders(100), ReconcileOptions::default());
        let report = r.compare_table(&TableConfig::new("orders")).await;
        assert_eq!(
            report.repair_sql(&SqliteDialect),
            vec![r#"UPDATE "orders" SET "total" = 150 WHERE "tenant" = 'acme' AND "id" = 7"#]
        );
    }

    #[tokio::test]
    async fn excluded_columns_are_neither_compared_nor_written() {
        let rows = |ts: &str| {
            vec![RowMap::from([
                ("id".to_string(), json!(1)),
                ("name".to_string(), json!("A")),
                ("updated_at".to_string(), json!(ts)),
            ])]
        };
        let db = |ts| {
            MemoryDatabase::new()
                .with_table("users", &[("id", "INT"), ("name", "TEXT"), ("updated_at", "TEXT")], &["id"])
                .with_rows("users", rows(ts))
        };
        let mut cfg = TableConfig::new("users");
        cfg.excluded_columns.0.push("updated_at".into());
        let r = reconciler(db("2024-01-01"), db("2025-06-30"), ReconcileOptions::default());
        assert!(r.compare_table(&cfg).await.is_identical());
    }

    #[tokio::test]
    async fn schema_mismatch_fails_the_table_without_statements() {
        let target = MemoryDatabase::new()
            .with_table("users", &[("id", "INT"), ("name", "VARCHAR(50)")], &["name"])
            .with_rows("users", vec![user(1, "A")]);
        let r = reconciler(users(vec![user(1, "A")]), target, ReconcileOptions::default());
        let report = r.compare_table(&TableConfig::new("users")).await;
        assert!(matches!(
            report.error(),
            Some(ReconcileError::SchemaMismatch { .. })
        ));
        assert!(report.statements.is_empty());
    }

    #[tokio::test]
    async fn failed_span_fetch_marks_table_unverified() {
        let source = users(vec![user(1, "A"), user(2, "B")]).failing_key_fetch("users");
        let target = users(vec![user(1, "A"), user(2, "X"), user(3, "C")]);
        let r = reconciler(source, target, ReconcileOptions::default());
        let report = r.compare_table(&TableConfig::new("users")).await;

        assert_eq!(report.status, TableStatus::Unverified);
        assert!(!report.is_identical());
        assert!(!report.unverified_spans.is_empty());
        // the target-only row needs no source fetch and is still repaired
        assert!(report
            .repair_sql(&SqliteDialect)
            .contains(&r#"DELETE FROM "users" WHERE "id" = 3"#.to_string()));
        assert!(report.statements.iter().all(|s| s.kind() != "update"));
    }

    #[tokio::test]
    async fn row_count_mismatch_is_reported_alongside_data() {
        let r = reconciler(
            users(vec![user(1, "A"), user(2, "B")]),
            users(vec![user(1, "A")]),
            ReconcileOptions::default(),
        );
        let report = r.compare_table(&TableConfig::new("users")).await;
        assert_eq!(report.row_count.state, CheckState::Fail);
        assert_eq!(report.row_count.source, Some(2));
        assert_eq!(report.counts(), (0, 1, 0));
    }

    #[tokio::test]
    async fn skipped_checks_are_reported_as_skipped() {
        let opts = ReconcileOptions {
            skip_row_count_check: true,
            skip_data_check: true,
            ..Default::default()
        };
        let r = reconciler(users(vec![user(1, "A")]), users(vec![]), opts);
        let report = r.compare_table(&TableConfig::new("users")).await;
        assert_eq!(report.row_count.state, CheckState::Skip);
        assert_eq!(report.data_check(), CheckState::Skip);
        assert!(report.statements.is_empty());
    }

    #[tokio::test]
    async fn slow_table_times_out() {
        let opts = ReconcileOptions {
            table_timeout_secs: 1,
            ..Default::default()
        };
        let slow = users(vec![user(1, "A")]).with_fetch_delay(Duration::from_secs(30));
        let r = reconciler(users(vec![user(1, "A")]), slow, opts);
        let report = r.compare_table(&TableConfig::new("users")).await;
        assert!(matches!(
            report.error(),
            Some(ReconcileError::Timeout { secs: 1, .. })
        ));
    }

    #[tokio::test]
    async fn cancelled_token_stops_comparisons() {
        let token = CancellationToken::new();
        let slow = users(vec![user(1, "A")]).with_fetch_delay(Duration::from_secs(30));
        let r = reconciler(users(vec![]), slow, ReconcileOptions::default())
            .with_cancellation(token.clone());
        token.cancel();
        let report = r.compare_table(&TableConfig::new("users")).await;
        assert!(matches!(
            report.error(),
            Some(ReconcileError::Cancelled { .. })
        ));
    }

    // ─── Properties over generated tables ───

    /// Deterministic 64-bit LCG.
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self, bound: u64) -> u64 {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (self.0 >> 33) % bound
        }
    }

    fn random_pair(seed: u64) -> (Vec<RowMap>, Vec<RowMap>) {
        let mut rng = Lcg(seed);
        let (mut source, mut target) = (Vec::new(), Vec::new());
        for id in 0..60i64 {
            let name = format!("n{}", rng.next(5));
            match rng.next(10) {
                0 | 1 => source.push(user(id, &name)),
                2 | 3 => target.push(user(id, &name)),
                4 | 5 => {
                    source.push(user(id, &name));
                    target.push(user(id, &format!("{}x", name)));
                }
                _ => {
                    source.push(user(id, &name));
                    target.push(user(id, &name));
                }
            }
        }
        (source, target)
    }

    /// Key sets a naive full comparison would produce.
    fn brute_force(source: &[RowMap], target: &[RowMap]) -> [BTreeMap<String, ()>; 3] {
        let by_id = |rows: &[RowMap]| -> BTreeMap<i64, RowMap> {
            rows.iter()
                .map(|r| (r["id"].as_i64().unwrap_or_default(), r.clone()))
                .collect()
        };
        let (s, t) = (by_id(source), by_id(target));
        let key = |id: &i64| format!("{:?}", vec![("id".to_string(), json!(id))]);
        let mut out: [BTreeMap<String, ()>; 3] = Default::default();
        for (id, row) in &s {
            match t.get(id) {
                Some(other) if other != row => {
                    out[0].insert(key(id), ());
                }
                Some(_) => {}
                None => {
                    out[1].insert(key(id), ());
                }
            }
        }
        for id in t.keys().filter(|id| !s.contains_key(*id)) {
            out[2].insert(key(id), ());
        }
        out
    }

    #[tokio::test]
    async fn classification_matches_a_full_comparison() {
        for seed in 1..=12u64 {
            for span_key_length in [1, 2, 8] {
                let (source, target) = random_pair(seed);
                let opts = ReconcileOptions {
                    span_key_length,
                    ..Default::default()
                };
                let r = reconciler(users(source.clone()), users(target.clone()), opts);
                let report = r.compare_table(&TableConfig::new("users")).await;

                let got = classified(&report.statements);
                let want = brute_force(&source, &target);
                assert_eq!(got, want, "seed {} span length {}", seed, span_key_length);

                let (u, i, d) = report.counts();
                assert_eq!(u + i + d, got.iter().map(|s| s.len()).sum::<usize>());
                // no key lands in more than one class
                for a in 0..3 {
                    for b in (a + 1)..3 {
                        assert!(got[a].keys().all(|k| !got[b].contains_key(k)));
                    }
                }
            }
        }
    }

    #[tokio::test]
    async fn applying_the_repairs_converges() {
        for seed in [3u64, 17, 99] {
            let (source, target) = random_pair(seed);
            let source = Arc::new(users(source));
            let target = Arc::new(users(target));
            let r = Reconciler::new(
                source.clone(),
                target.clone(),
                Arc::new(SqliteDialect),
                ReconcileOptions {
                    span_key_length: 2,
                    ..Default::default()
                },
            )
            .unwrap();
            let cfg = TableConfig::new("users");

            let first = r.compare_table(&cfg).await;
            assert!(!first.is_identical());
            target.apply(&first.statements).unwrap();

            let second = r.compare_table(&cfg).await;
            assert!(second.is_identical(), "seed {}: {:?}", seed, second.statements);
        }
    }

    // ─── Multi-table and schema runs ───

    #[tokio::test]
    async fn tables_are_reported_in_input_order() {
        let source = users(vec![user(1, "A")])
            .with_table("orders", &[("id", "INT")], &["id"]);
        let target = users(vec![user(1, "A")])
            .with_table("orders", &[("id", "INT")], &["id"]);
        let r = reconciler(source, target, ReconcileOptions::default());
        let reports = r
            .compare_tables(&[TableConfig::new("users"), TableConfig::new("orders"), TableConfig::new("ghost")])
            .await
            .unwrap();
        let names: Vec<&str> = reports.iter().map(|t| t.table.as_str()).collect();
        assert_eq!(names, vec!["users", "orders", "ghost"]);
        assert!(reports[0].is_identical() && reports[1].is_identical());
        // a failing sibling does not affect the others
        assert!(matches!(reports[2].error(), Some(ReconcileError::InvalidSchema(_))));
    }

    #[tokio::test]
    async fn fail_fast_skips_tables_not_yet_started() {
        let opts = ReconcileOptions {
            concurrency_limit: 1,
            run_all_mismatches_before_reporting: false,
            ..Default::default()
        };
        let table = |name: &str, db: MemoryDatabase, rows| {
            db.with_table(name, &[("id", "INT"), ("name", "TEXT")], &["id"])
                .with_rows(name, rows)
        };
        let source = table("b", table("a", MemoryDatabase::new(), vec![user(1, "A")]), vec![user(1, "A")]);
        let target = table("b", table("a", MemoryDatabase::new(), vec![]), vec![user(1, "A")]);
        let r = reconciler(source, target, opts);
        let reports = r
            .compare_tables(&[TableConfig::new("a"), TableConfig::new("b")])
            .await
            .unwrap();
        assert_eq!(reports[0].status, TableStatus::Differs);
        assert!(matches!(reports[1].status, TableStatus::Skipped { .. }));
    }

    fn clients(with_phone: bool) -> MemoryDatabase {
        let mut cols = vec![("id", "INT"), ("name", "VARCHAR(50)")];
        if with_phone {
            cols.push(("phone", "VARCHAR(20)"));
        }
        users(vec![user(1, "A")])
            .with_table("clients", &cols, &["id"])
            .with_object(
                ObjectDescriptor::new(ObjectType::View, "v_users"),
                "CREATE VIEW `v_users` AS SELECT `id`, `name` FROM `users`",
            )
    }

    #[tokio::test]
    async fn schema_run_diffs_definitions_then_rows() {
        let source = clients(true).with_object(
            ObjectDescriptor::new(ObjectType::Trigger, "trg_audit"),
            "CREATE TRIGGER `trg_audit` AFTER INSERT ON `users` FOR EACH ROW SET @n = 1",
        );
        let target = clients(false).with_rows("users", vec![user(9, "Z")]);
        let r = Reconciler::new(
            Arc::new(source),
            Arc::new(target),
            Arc::new(MysqlDialect),
            ReconcileOptions::default(),
        )
        .unwrap();
        let report = r.compare_schema().await.unwrap();

        let clients_diff = report
            .structure_diffs
            .iter()
            .find(|d| d.object == ObjectDescriptor::table("clients"))
            .unwrap();
        assert_eq!(clients_diff.state, StructureState::Differs);
        assert_eq!(
            clients_diff.repair_statements,
            vec!["ALTER TABLE `clients` ADD `phone` VARCHAR(20);"]
        );
        let trigger = report
            .structure_diffs
            .iter()
            .find(|d| d.object.object_type == ObjectType::Trigger)
            .unwrap();
        assert_eq!(trigger.state, StructureState::MissingInTarget);

        // clients is skipped because its definition differs; the view has no key
        let status = |name: &str| {
            report
                .tables
                .iter()
                .find(|t| t.table == name)
                .map(|t| t.status.clone())
        };
        assert!(matches!(status("clients"), Some(TableStatus::Skipped { .. })));
        assert!(matches!(status("v_users"), Some(TableStatus::Skipped { .. })));
        assert_eq!(status("users"), Some(TableStatus::Differs));

        let grid: Vec<(String, CheckState, CheckState)> = report
            .objects
            .iter()
            .map(|o| (o.object.to_string(), o.definition, o.data))
            .collect();
        assert_eq!(
            grid,
            vec![
                ("TABLE:clients".to_string(), CheckState::Fail, CheckState::Skip),
                ("TABLE:users".to_string(), CheckState::Pass, CheckState::Fail),
                ("TRIGGER:trg_audit".to_string(), CheckState::Fail, CheckState::NotRun),
                ("VIEW:v_users".to_string(), CheckState::Pass, CheckState::Skip),
            ]
        );
    }

    #[tokio::test]
    async fn configured_view_key_enables_row_check() {
        let db = clients(false);
        let mut opts = ReconcileOptions::default();
        let mut view = TableConfig::new("v_users");
        view.primary_key = vec!["id".into()];
        opts.tables = vec![view];
        let r = reconciler(db.duplicate(), db, opts);
        let report = r.compare_schema().await.unwrap();
        // only configured objects are row-checked, and the keyed view is not skipped
        assert_eq!(report.tables.len(), 1);
        assert_eq!(report.tables[0].table, "v_users");
        assert!(!matches!(report.tables[0].status, TableStatus::Skipped { .. }));
    }

    #[tokio::test]
    async fn object_list_check_can_be_skipped() {
        let opts = ReconcileOptions {
            skip_object_list_check: true,
            ..Default::default()
        };
        let r = reconciler(clients(true), clients(false), opts);
        let report = r.compare_schema().await.unwrap();
        assert!(report.structure_diffs.is_empty());
        assert!(report.objects.iter().all(|o| o.definition == CheckState::Skip));
        assert_eq!(report.tables.len(), 2);
    }

    #[tokio::test]
    async fn key_mismatch_is_a_structural_difference() {
        let source = users(vec![user(1, "A")]);
        let target = MemoryDatabase::new()
            .with_table("users", &[("id", "INT"), ("name", "VARCHAR(50)")], &["name"])
            .with_rows("users", vec![user(1, "A")]);
        let opts = ReconcileOptions {
            skip_object_list_check: true,
            ..Default::default()
        };
        let report = reconciler(source, target, opts).compare_schema().await.unwrap();

        assert!(matches!(
            report.tables[0].error(),
            Some(ReconcileError::SchemaMismatch { .. })
        ));
        assert_eq!(report.structure_diffs.len(), 1);
        let d = &report.structure_diffs[0];
        assert_eq!(d.object, ObjectDescriptor::table("users"));
        assert_eq!(d.state, StructureState::Differs);
        assert!(d.unsupported);
        assert!(d.repair_statements.is_empty());
        assert!(d.notes[0].contains("primary key"), "{:?}", d.notes);
        assert!(!report.is_identical());
    }

    #[tokio::test]
    async fn zero_concurrency_is_rejected_up_front() {
        let result = Reconciler::new(
            Arc::new(users(vec![])),
            Arc::new(users(vec![])),
            Arc::new(SqliteDialect),
            ReconcileOptions {
                concurrency_limit: 0,
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(ReconcileError::InvalidConfig(_))));
    }

    #[test]
    fn database_digests_need_the_same_name_on_both_sides() {
        assert!(hash_in_database(Some("mysql:sha2"), Some("mysql:sha2")));
        assert!(!hash_in_database(Some("mysql:sha2"), Some("mariadb:sha2")));
        assert!(!hash_in_database(Some("postgres:sha256"), None));
        assert!(!hash_in_database(None, None));
    }

    #[tokio::test]
    async fn scans_hash_in_database_only_when_both_sides_agree() {
        let source = Arc::new(users(vec![user(1, "A"), user(2, "B")]).with_content_digest("pg"));
        let target = Arc::new(users(vec![user(1, "A")]).with_content_digest("pg"));
        let r = Reconciler::new(
            source.clone(),
            target.clone(),
            Arc::new(SqliteDialect),
            ReconcileOptions::default(),
        )
        .unwrap();
        let report = r.compare_table(&TableConfig::new("users")).await;
        assert_eq!(report.counts(), (0, 1, 0));
        assert_eq!(source.signature_scans(), vec![true]);
        assert_eq!(target.signature_scans(), vec![true]);

        let plain = Arc::new(users(vec![user(1, "A")]));
        let r = Reconciler::new(
            source.clone(),
            plain.clone(),
            Arc::new(SqliteDialect),
            ReconcileOptions::default(),
        )
        .unwrap();
        r.compare_table(&TableConfig::new("users")).await;
        assert_eq!(source.signature_scans(), vec![true, false]);
        assert_eq!(plain.signature_scans(), vec![false]);
    }
}
