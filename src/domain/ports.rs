use crate::domain::{
    report::RunReport,
    row::{KeyValues, RowMap, SignedKey},
    signature::signed_key,
    value_objects::{ColumnName, ObjectDescriptor, TableName, TableSchema, TableShape},
};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Port: read access to the rows of one database (implemented by
/// SqlxDatabase and MemoryDatabase).
///
/// Every adapter is bound to one schema; table names are unqualified.
#[async_trait]
pub trait RowSource: Send + Sync {
    /// Schema the adapter reads from, used to qualify repair statements.
    fn schema(&self) -> Option<&str> {
        None
    }

    /// Name of the content digest this adapter can compute inside the
    /// database, if any. Two adapters' database digests are only comparable
    /// when both report the same name.
    fn content_digest(&self) -> Option<&'static str> {
        None
    }

    async fn describe_table(&self, table: &TableName) -> Result<TableShape>;

    /// Key values and content digest of every row, ordered by key.
    ///
    /// With `_in_database` set the digest is computed by the database, so only
    /// keys and digests are transferred. The default fetches the projected
    /// rows and hashes them locally.
    async fn fetch_signatures(
        &self,
        table: &TableName,
        schema: &TableSchema,
        _in_database: bool,
    ) -> Result<Vec<SignedKey>> {
        let rows = self
            .fetch_rows(table, &schema.projection(), &schema.pk_columns)
            .await?;
        let mut signed = Vec::with_capacity(rows.len());
        for row in &rows {
            signed.push(signed_key(row, schema)?);
        }
        Ok(signed)
    }

    /// Fetch `projection` for every row, ordered by `order_by` when non-empty.
    async fn fetch_rows(
        &self,
        table: &TableName,
        projection: &[ColumnName],
        order_by: &[ColumnName],
    ) -> Result<Vec<RowMap>>;

    /// Fetch `projection` for the rows whose `key_columns` match one of `keys`.
    async fn fetch_rows_by_key(
        &self,
        table: &TableName,
        projection: &[ColumnName],
        key_columns: &[ColumnName],
        keys: &[KeyValues],
    ) -> Result<Vec<RowMap>>;

    async fn row_count(&self, table: &TableName) -> Result<u64>;
}

/// Port: CREATE statement text of a schema object.
#[async_trait]
pub trait DdlSource: Send + Sync {
    async fn create_statement(&self, object: &ObjectDescriptor) -> Result<String>;
}

/// Port: every named object in the bound schema.
#[async_trait]
pub trait ObjectLister: Send + Sync {
    async fn list_objects(&self) -> Result<Vec<ObjectDescriptor>>;
}

/// Everything the orchestrator needs from one side of the comparison.
pub trait Database: RowSource + DdlSource + ObjectLister {}
impl<T: RowSource + DdlSource + ObjectLister + ?Sized> Database for T {}

/// Port: output formatting (implemented by SqlWriter)
pub trait OutputWriter: Send + Sync {
    /// Serializes the run report to a string
    fn format(&self, report: &RunReport) -> Result<String>;
    /// Extension of the produced file (e.g. "sql")
    fn extension(&self) -> &'static str;
}

/// SQL dialect: identifier quoting and literal formatting.
///
/// Pure string manipulation with no sqlx dependency, so repair statements can
/// be rendered anywhere. Implemented per driver in
/// `infrastructure::db::dialect`.
pub trait QueryDialect: Send + Sync {
    /// Return the driver name as a lowercase string ("postgres", "mysql", …).
    /// Used for output metadata only, never for branching logic.
    fn name(&self) -> &'static str;

    /// Quote an identifier (table, column, schema) per dialect.
    /// - MySQL / MariaDB → backtick: `` `col` ``
    /// - PostgreSQL / SQLite → double-quote: `"col"`
    fn quote_ident(&self, s: &str) -> String;

    /// Return the `schema.` prefix for a qualified table reference.
    /// SQLite has no schema namespace, so it returns `""`.
    fn schema_prefix(&self, schema: &str) -> String {
        format!("{}.", self.quote_ident(schema))
    }

    /// Bind placeholder for the `n`-th parameter (1-based).
    fn placeholder(&self, _n: usize) -> String {
        "?".to_string()
    }

    /// Format a JSON `Value` as an SQL literal for this dialect.
    /// - NULL          → `NULL`
    /// - Bool          → `TRUE` / `FALSE`
    /// - Number        → bare number
    /// - String        → `'escaped'`
    /// - Object/Array  → `'json'` with `::jsonb` cast on PostgreSQL only
    fn sql_literal(&self, val: &Value) -> String {
        match val {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => format!("'{}'", s.replace('\'', "''")),
            Value::Array(_) | Value::Object(_) => {
                let json_str = serde_json::to_string(val)
                    .unwrap_or_default()
                    .replace('\'', "''");
                self.json_literal(&json_str)
            }
        }
    }

    /// Render a pre-serialised JSON string as a dialect-appropriate literal.
    /// Override in PostgreSQL to append `::jsonb`.
    fn json_literal(&self, json_str: &str) -> String {
        format!("'{}'", json_str)
    }
}
