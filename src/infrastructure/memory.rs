use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use crate::domain::ports::{DdlSource, ObjectLister, RowSource};
use crate::domain::repair::RepairStatement;
use crate::domain::row::{cmp_keys, KeyValues, RowMap, SignedKey};
use crate::domain::signature::signed_key;
use crate::domain::value_objects::{
    ColumnName, ObjectDescriptor, TableName, TableSchema, TableShape,
};

#[derive(Debug, Clone, Default)]
struct MemoryTable {
    shape: TableShape,
    rows: Vec<RowMap>,
}

impl MemoryTable {
    fn key_of(&self, row: &RowMap) -> KeyValues {
        self.shape
            .primary_key
            .iter()
            .map(|c| row.get(c).cloned().unwrap_or_default())
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
struct State {
    tables: BTreeMap<String, MemoryTable>,
    /// Definitions of every listed object, tables included.
    objects: BTreeMap<ObjectDescriptor, String>,
}

/// In-memory database implementing every port, for tests and dry runs.
///
/// Repair statements can be applied back to it, so a comparison followed by
/// `apply` followed by a second comparison proves the script converges.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    schema: Option<String>,
    state: RwLock<State>,
    failing_key_fetches: HashSet<String>,
    fetch_delay: Option<Duration>,
    content_digest: Option<&'static str>,
    /// `in_database` flag of every signature scan, in call order.
    signature_scans: Mutex<Vec<bool>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Register a table. Its CREATE text is derived from the column list.
    pub fn with_table(self, name: &str, columns: &[(&str, &str)], primary_key: &[&str]) -> Self {
        let shape = TableShape {
            columns: columns
                .iter()
                .map(|(n, t)| (n.to_string(), t.to_string()))
                .collect(),
            primary_key: primary_key.iter().map(|c| c.to_string()).collect(),
        };
        let ddl = render_create_table(name, &shape);
        {
            let mut state = self.write();
            state.tables.insert(
                name.to_string(),
                MemoryTable {
                    shape,
                    rows: Vec::new(),
                },
            );
            state.objects.insert(ObjectDescriptor::table(name), ddl);
        }
        self
    }

    pub fn with_rows(self, table: &str, rows: Vec<RowMap>) -> Self {
        if let Some(t) = self.write().tables.get_mut(table) {
            t.rows.extend(rows);
        }
        self
    }

    /// Register a non-table object, or override a table's CREATE text.
    pub fn with_object(self, object: ObjectDescriptor, ddl: impl Into<String>) -> Self {
        self.write().objects.insert(object, ddl.into());
        self
    }

    /// Make every `fetch_rows_by_key` on `table` fail.
    pub fn failing_key_fetch(mut self, table: &str) -> Self {
        self.failing_key_fetches.insert(table.to_string());
        self
    }

    /// Delay every row fetch.
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    /// Advertise an in-database content digest under `name`. Digests are
    /// still computed in-process.
    pub fn with_content_digest(mut self, name: &'static str) -> Self {
        self.content_digest = Some(name);
        self
    }

    /// Deep copy of schema and rows; failure injection is not copied.
    pub fn duplicate(&self) -> Self {
        Self {
            schema: self.schema.clone(),
            state: RwLock::new(self.read().clone()),
            content_digest: self.content_digest,
            ..Default::default()
        }
    }

    /// `in_database` flag of every signature scan so far.
    pub fn signature_scans(&self) -> Vec<bool> {
        self.signature_scans
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Current rows of `table`, in insertion order.
    pub fn rows(&self, table: &str) -> Vec<RowMap> {
        self.read()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Execute repair statements in order.
    pub fn apply(&self, statements: &[RepairStatement]) -> Result<()> {
        let mut state = self.write();
        for stmt in statements {
            let name = &stmt.table().name;
            let table = state
                .tables
                .get_mut(name)
                .ok_or_else(|| anyhow!("no such table: {}", name))?;
            match stmt {
                RepairStatement::Update { set, key, .. } => {
                    let row = table
                        .rows
                        .iter_mut()
                        .find(|r| matches_key(r, key))
                        .ok_or_else(|| anyhow!("UPDATE matched no row in {}", name))?;
                    for (col, v) in set {
                        row.insert(col.clone(), v.clone());
                    }
                }
                RepairStatement::Insert {
                    columns, values, ..
                } => {
                    let row: RowMap = columns.iter().cloned().zip(values.iter().cloned()).collect();
                    let key = table.key_of(&row);
                    if table.rows.iter().any(|r| table.key_of(r) == key) {
                        bail!("duplicate primary key in {}", name);
                    }
                    table.rows.push(row);
                }
                RepairStatement::Delete { key, .. } => {
                    table.rows.retain(|r| !matches_key(r, key));
                }
            }
        }
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    async fn delay(&self) {
        if let Some(d) = self.fetch_delay {
            tokio::time::sleep(d).await;
        }
    }

    fn table(&self, table: &TableName) -> Result<MemoryTable> {
        self.read()
            .tables
            .get(&table.0)
            .cloned()
            .ok_or_else(|| anyhow!("no such table: {}", table))
    }
}

fn matches_key(row: &RowMap, key: &[(String, serde_json::Value)]) -> bool {
    key.iter().all(|(c, v)| row.get(c).map_or(v.is_null(), |x| x == v))
}

fn project(row: &RowMap, projection: &[ColumnName]) -> RowMap {
    projection
        .iter()
        .map(|c| (c.0.clone(), row.get(&c.0).cloned().unwrap_or_default()))
        .collect()
}

fn render_create_table(name: &str, shape: &TableShape) -> String {
    let mut lines: Vec<String> = shape
        .columns
        .iter()
        .map(|(n, t)| format!("  `{}` {}", n, t))
        .collect();
    if !shape.primary_key.is_empty() {
        let pk: Vec<String> = shape.primary_key.iter().map(|c| format!("`{}`", c)).collect();
        lines.push(format!("  PRIMARY KEY ({})", pk.join(",")));
    }
    format!("CREATE TABLE `{}` (\n{}\n)", name, lines.join(",\n"))
}

#[async_trait]
impl RowSource for MemoryDatabase {
    fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    fn content_digest(&self) -> Option<&'static str> {
        self.content_digest
    }

    async fn describe_table(&self, table: &TableName) -> Result<TableShape> {
        Ok(self
            .read()
            .tables
            .get(&table.0)
            .map(|t| t.shape.clone())
            .unwrap_or_default())
    }

    async fn fetch_rows(
        &self,
        table: &TableName,
        projection: &[ColumnName],
        order_by: &[ColumnName],
    ) -> Result<Vec<RowMap>> {
        self.delay().await;
        let t = self.table(table)?;
        let mut rows: Vec<RowMap> = t.rows.iter().map(|r| project(r, projection)).collect();
        if !order_by.is_empty() {
            let key = |r: &RowMap| -> KeyValues {
                order_by
                    .iter()
                    .map(|c| r.get(&c.0).cloned().unwrap_or_default())
                    .collect()
            };
            rows.sort_by(|a, b| cmp_keys(&key(a), &key(b)));
        }
        Ok(rows)
    }

    async fn fetch_signatures(
        &self,
        table: &TableName,
        schema: &TableSchema,
        in_database: bool,
    ) -> Result<Vec<SignedKey>> {
        if let Ok(mut scans) = self.signature_scans.lock() {
            scans.push(in_database);
        }
        let rows = self
            .fetch_rows(table, &schema.projection(), &schema.pk_columns)
            .await?;
        let mut signed = Vec::with_capacity(rows.len());
        for row in &rows {
            signed.push(signed_key(row, schema)?);
        }
        Ok(signed)
    }

    async fn fetch_rows_by_key(
        &self,
        table: &TableName,
        projection: &[ColumnName],
        key_columns: &[ColumnName],
        keys: &[KeyValues],
    ) -> Result<Vec<RowMap>> {
        self.delay().await;
        if self.failing_key_fetches.contains(&table.0) {
            bail!("connection reset while reading {}", table);
        }
        let t = self.table(table)?;
        Ok(t.rows
            .iter()
            .filter(|r| {
                let k: KeyValues = key_columns
                    .iter()
                    .map(|c| r.get(&c.0).cloned().unwrap_or_default())
                    .collect();
                keys.contains(&k)
            })
            .map(|r| project(r, projection))
            .collect())
    }

    async fn row_count(&self, table: &TableName) -> Result<u64> {
        Ok(self.table(table)?.rows.len() as u64)
    }
}

#[async_trait]
impl DdlSource for MemoryDatabase {
    async fn create_statement(&self, object: &ObjectDescriptor) -> Result<String> {
        self.read()
            .objects
            .get(object)
            .cloned()
            .ok_or_else(|| anyhow!("{} does not exist", object))
    }
}

#[async_trait]
impl ObjectLister for MemoryDatabase {
    async fn list_objects(&self) -> Result<Vec<ObjectDescriptor>> {
        Ok(self.read().objects.keys().cloned().collect())
    }
}
