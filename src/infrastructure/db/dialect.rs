use anyhow::Result;
use serde_json::{json, Value};
use sqlx::any::AnyRow;
use sqlx::{Column, Row, TypeInfo};
use std::sync::Arc;

pub use crate::domain::ports::QueryDialect;
use crate::domain::value_objects::{ObjectDescriptor, ObjectType};

// ─────────────────────────────────────────────────────────────────────────────
// Traits
// ─────────────────────────────────────────────────────────────────────────────

/// Catalog query with its string binds, in placeholder order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogQuery {
    pub sql: String,
    pub binds: Vec<String>,
}

impl CatalogQuery {
    fn new(sql: impl Into<String>, binds: &[&str]) -> Self {
        Self {
            sql: sql.into(),
            binds: binds.iter().map(|b| b.to_string()).collect(),
        }
    }
}

/// How the CREATE text of one object is obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateQuery {
    /// The statement is column `column` of the first returned row,
    /// preceded by `prefix`.
    Text {
        query: CatalogQuery,
        column: usize,
        prefix: String,
    },
    /// `CREATE TABLE` rebuilt from `(column_name, definition)` rows.
    TableColumns(CatalogQuery),
    Unsupported,
}

/// Catalog SQL and type handling. Infrastructure only: the orchestrator
/// never sees these queries, only their results through the ports.
pub trait CatalogSql: QueryDialect {
    /// Return `true` if this dialect supports `information_schema.columns`
    /// introspection, enabling the typed SELECT path.
    /// Defaults to `true`; override to `false` for SQLite.
    fn needs_introspection(&self) -> bool {
        true
    }

    /// Produce the cast expression that coerces an unsupported column type to
    /// a string readable by `sqlx::AnyRow`.
    /// - PostgreSQL  : `"col"::TEXT AS "col"`
    /// - MySQL/MariaDB : `CONVERT(\`col\` USING utf8mb4) AS \`col\``
    fn cast_to_text(&self, col_quoted: &str) -> String;

    /// Return `true` if `data_type` (an `information_schema.data_type` value)
    /// is natively decodable by `sqlx::AnyRow` without any explicit cast.
    fn is_native_type(&self, data_type: &str) -> bool;

    /// `(column_name, data_type)` rows in ordinal order.
    fn columns_query(&self, schema: &str, table: &str) -> CatalogQuery;

    /// Primary key column names in key order.
    fn primary_key_query(&self, schema: &str, table: &str) -> CatalogQuery;

    /// `(object_type, object_name)` rows for every object of the schema.
    fn list_objects_query(&self, schema: &str) -> CatalogQuery;

    fn create_query(&self, schema: &str, object: &ObjectDescriptor) -> CreateQuery;

    /// Name of the in-database content digest, `None` when the database has
    /// no digest function and rows are hashed locally.
    fn content_digest(&self) -> Option<&'static str> {
        None
    }

    /// Expression computing the content digest over `cols_quoted`: the first
    /// 32 hex chars of SHA-256 over the `/`-joined values, NULL as `''`.
    fn content_digest_expr(&self, _cols_quoted: &[String]) -> Option<String> {
        None
    }
}

/// Row decoder: read a single `AnyRow` column into a `serde_json::Value`.
///
/// Implemented per driver. Lives in infrastructure only; callers outside
/// this module receive `Value`s, never raw `AnyRow`s.
pub trait RowDecoder: Send + Sync {
    /// Decode the column at `idx` using `type_hint` (an `information_schema`
    /// `data_type` string) to reconstruct the correct `Value` variant.
    fn decode_column(&self, row: &AnyRow, idx: usize, type_hint: &str) -> Result<Value>;
}

// ─────────────────────────────────────────────────────────────────────────────
// PostgreSQL
// ─────────────────────────────────────────────────────────────────────────────

pub struct PostgresDialect;

impl QueryDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn quote_ident(&self, s: &str) -> String {
        format!("\"{}\"", s.replace('"', "\"\""))
    }

    fn placeholder(&self, n: usize) -> String {
        format!("${}", n)
    }

    fn json_literal(&self, json_str: &str) -> String {
        format!("'{}'::jsonb", json_str)
    }
}

impl CatalogSql for PostgresDialect {
    fn content_digest(&self) -> Option<&'static str> {
        Some("postgres:sha256")
    }

    fn content_digest_expr(&self, cols_quoted: &[String]) -> Option<String> {
        Some(Self::digest_over(cols_quoted))
    }

    fn cast_to_text(&self, col_quoted: &str) -> String {
        format!("{}::TEXT AS {}", col_quoted, col_quoted)
    }

    fn is_native_type(&self, data_type: &str) -> bool {
        matches!(
            data_type.to_lowercase().as_str(),
            "boolean" | "smallint" | "integer" | "bigint" | "real" | "double precision"
        )
    }

    fn columns_query(&self, schema: &str, table: &str) -> CatalogQuery {
        CatalogQuery::new(
            "SELECT column_name::TEXT, data_type::TEXT \
             FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2 \
             ORDER BY ordinal_position",
            &[schema, table],
        )
    }

    fn primary_key_query(&self, schema: &str, table: &str) -> CatalogQuery {
        CatalogQuery::new(
            "SELECT kcu.column_name::TEXT \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu \
               ON tc.constraint_name = kcu.constraint_name \
              AND tc.table_schema = kcu.table_schema \
              AND tc.table_name = kcu.table_name \
             WHERE tc.constraint_type = 'PRIMARY KEY' \
               AND tc.table_schema = $1 AND tc.table_name = $2 \
             ORDER BY kcu.ordinal_position",
            &[schema, table],
        )
    }

    fn list_objects_query(&self, schema: &str) -> CatalogQuery {
        CatalogQuery::new(
            "SELECT table_type::TEXT, table_name::TEXT \
             FROM information_schema.tables WHERE table_schema = $1 \
             UNION \
             SELECT 'TRIGGER', trigger_name::TEXT \
             FROM information_schema.triggers WHERE trigger_schema = $1 \
             UNION \
             SELECT routine_type::TEXT, routine_name::TEXT \
             FROM information_schema.routines \
             WHERE routine_schema = $1 AND routine_type IS NOT NULL",
            &[schema],
        )
    }

    fn create_query(&self, schema: &str, object: &ObjectDescriptor) -> CreateQuery {
        let name = object.name.as_str();
        match object.object_type {
            ObjectType::Table => CreateQuery::TableColumns(CatalogQuery::new(
                "SELECT column_name::TEXT, \
                 (CASE WHEN character_maximum_length IS NOT NULL \
                       THEN data_type || '(' || character_maximum_length || ')' \
                       ELSE data_type END \
                  || CASE WHEN is_nullable = 'NO' THEN ' NOT NULL' ELSE '' END \
                  || COALESCE(' DEFAULT ' || column_default, ''))::TEXT \
                 FROM information_schema.columns \
                 WHERE table_schema = $1 AND table_name = $2 \
                 ORDER BY ordinal_position",
                &[schema, name],
            )),
            ObjectType::View => CreateQuery::Text {
                query: CatalogQuery::new(
                    "SELECT pg_get_viewdef(format('%I.%I', $1::TEXT, $2::TEXT)::regclass, true)",
                    &[schema, name],
                ),
                column: 0,
                prefix: format!("CREATE VIEW {} AS\n", self.quote_ident(name)),
            },
            ObjectType::Function | ObjectType::Procedure => CreateQuery::Text {
                query: CatalogQuery::new(
                    "SELECT pg_get_functiondef(p.oid) \
                     FROM pg_proc p JOIN pg_namespace n ON n.oid = p.pronamespace \
                     WHERE n.nspname = $1 AND p.proname = $2 \
                     ORDER BY p.oid LIMIT 1",
                    &[schema, name],
                ),
                column: 0,
                prefix: String::new(),
            },
            ObjectType::Trigger => CreateQuery::Text {
                query: CatalogQuery::new(
                    "SELECT pg_get_triggerdef(t.oid, true) \
                     FROM pg_trigger t \
                     JOIN pg_class c ON c.oid = t.tgrelid \
                     JOIN pg_namespace n ON n.oid = c.relnamespace \
                     WHERE n.nspname = $1 AND t.tgname = $2 AND NOT t.tgisinternal \
                     LIMIT 1",
                    &[schema, name],
                ),
                column: 0,
                prefix: String::new(),
            },
            ObjectType::Event => CreateQuery::Unsupported,
        }
    }
}

impl PostgresDialect {
    fn digest_over(cols_quoted: &[String]) -> String {
        let parts: Vec<String> = cols_quoted
            .iter()
            .map(|c| format!("coalesce({}::text, '')", c))
            .collect();
        format!(
            "left(encode(sha256(convert_to(concat_ws('/', {}), 'UTF8')), 'hex'), 32)",
            parts.join(", ")
        )
    }
}

impl RowDecoder for PostgresDialect {
    fn decode_column(&self, row: &AnyRow, idx: usize, type_hint: &str) -> Result<Value> {
        col_to_json(row, idx, type_hint)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MySQL / MariaDB
// ─────────────────────────────────────────────────────────────────────────────

pub struct MysqlDialect;

impl QueryDialect for MysqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_ident(&self, s: &str) -> String {
        format!("`{}`", s.replace('`', "``"))
    }
    // json_literal: default (no ::jsonb cast)
}

impl CatalogSql for MysqlDialect {
    fn content_digest(&self) -> Option<&'static str> {
        Some("mysql:sha2")
    }

    fn content_digest_expr(&self, cols_quoted: &[String]) -> Option<String> {
        Some(Self::digest_over(cols_quoted))
    }

    fn cast_to_text(&self, col_quoted: &str) -> String {
        // CAST(col AS CHAR) and CONVERT(col USING utf8mb4) both return BLOB
        // to sqlx AnyRow; we detect BLOB in the mapper and read Vec<u8>.
        format!("CONVERT({} USING utf8mb4) AS {}", col_quoted, col_quoted)
    }

    fn is_native_type(&self, data_type: &str) -> bool {
        matches!(
            data_type.to_lowercase().as_str(),
            "int" | "mediumint" | "bigint" | "float" | "double"
        )
    }

    fn columns_query(&self, schema: &str, table: &str) -> CatalogQuery {
        CatalogQuery::new(
            "SELECT column_name, data_type \
             FROM information_schema.columns \
             WHERE table_schema = ? AND table_name = ? \
             ORDER BY ordinal_position",
            &[schema, table],
        )
    }

    fn primary_key_query(&self, schema: &str, table: &str) -> CatalogQuery {
        CatalogQuery::new(
            "SELECT column_name \
             FROM information_schema.key_column_usage \
             WHERE table_schema = ? AND table_name = ? AND constraint_name = 'PRIMARY' \
             ORDER BY ordinal_position",
            &[schema, table],
        )
    }

    fn list_objects_query(&self, schema: &str) -> CatalogQuery {
        CatalogQuery::new(
            "SELECT table_type, table_name FROM information_schema.tables \
             WHERE table_schema = ? \
             UNION \
             SELECT 'TRIGGER', trigger_name FROM information_schema.triggers \
             WHERE trigger_schema = ? \
             UNION \
             SELECT routine_type, routine_name FROM information_schema.routines \
             WHERE routine_schema = ? \
             UNION \
             SELECT 'EVENT', event_name FROM information_schema.events \
             WHERE event_schema = ?",
            &[schema, schema, schema, schema],
        )
    }

    fn create_query(&self, schema: &str, object: &ObjectDescriptor) -> CreateQuery {
        // SHOW CREATE result columns: name first, statement in 1 (tables,
        // views), 2 (routines, triggers) or 3 (events).
        let column = match object.object_type {
            ObjectType::Table | ObjectType::View => 1,
            ObjectType::Function | ObjectType::Procedure | ObjectType::Trigger => 2,
            ObjectType::Event => 3,
        };
        let prefix = if schema.is_empty() {
            String::new()
        } else {
            self.schema_prefix(schema)
        };
        CreateQuery::Text {
            query: CatalogQuery::new(
                format!(
                    "SHOW CREATE {} {}{}",
                    object.object_type,
                    prefix,
                    self.quote_ident(&object.name)
                ),
                &[],
            ),
            column,
            prefix: String::new(),
        }
    }
}

impl MysqlDialect {
    fn digest_over(cols_quoted: &[String]) -> String {
        let parts: Vec<String> = cols_quoted
            .iter()
            .map(|c| format!("COALESCE(CAST({} AS CHAR), '')", c))
            .collect();
        format!("LEFT(SHA2(CONCAT_WS('/', {}), 256), 32)", parts.join(", "))
    }
}

impl RowDecoder for MysqlDialect {
    fn decode_column(&self, row: &AnyRow, idx: usize, type_hint: &str) -> Result<Value> {
        // MySQL returns non-native columns as BLOB regardless of any SQL cast.
        // Detect at runtime and read raw bytes, then reinterpret using the type hint.
        let anyrow_type = row.column(idx).type_info().name();
        if anyrow_type == "BLOB" {
            blob_to_json(row, idx, type_hint)
        } else {
            col_to_json(row, idx, type_hint)
        }
    }
}

// MariaDB shares MySQL's wire protocol and AnyRow behaviour.
pub struct MariadbDialect;

impl QueryDialect for MariadbDialect {
    fn name(&self) -> &'static str {
        "mariadb"
    }

    fn quote_ident(&self, s: &str) -> String {
        MysqlDialect.quote_ident(s)
    }
}

impl CatalogSql for MariadbDialect {
    fn cast_to_text(&self, col_quoted: &str) -> String {
        MysqlDialect.cast_to_text(col_quoted)
    }

    fn is_native_type(&self, data_type: &str) -> bool {
        MysqlDialect.is_native_type(data_type)
    }

    fn columns_query(&self, schema: &str, table: &str) -> CatalogQuery {
        MysqlDialect.columns_query(schema, table)
    }

    fn primary_key_query(&self, schema: &str, table: &str) -> CatalogQuery {
        MysqlDialect.primary_key_query(schema, table)
    }

    fn list_objects_query(&self, schema: &str) -> CatalogQuery {
        MysqlDialect.list_objects_query(schema)
    }

    fn create_query(&self, schema: &str, object: &ObjectDescriptor) -> CreateQuery {
        MysqlDialect.create_query(schema, object)
    }

    // Same SQL as MySQL, but value-to-text casts may differ between servers.
    fn content_digest(&self) -> Option<&'static str> {
        Some("mariadb:sha2")
    }

    fn content_digest_expr(&self, cols_quoted: &[String]) -> Option<String> {
        MysqlDialect.content_digest_expr(cols_quoted)
    }
}

impl RowDecoder for MariadbDialect {
    fn decode_column(&self, row: &AnyRow, idx: usize, type_hint: &str) -> Result<Value> {
        MysqlDialect.decode_column(row, idx, type_hint)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SQLite
// ─────────────────────────────────────────────────────────────────────────────

pub struct SqliteDialect;

impl QueryDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn quote_ident(&self, s: &str) -> String {
        format!("\"{}\"", s.replace('"', "\"\""))
    }

    fn schema_prefix(&self, _schema: &str) -> String {
        // SQLite has no schema namespace
        String::new()
    }
    // json_literal: default (no ::jsonb cast)
}

impl CatalogSql for SqliteDialect {
    fn needs_introspection(&self) -> bool {
        false
    }

    fn cast_to_text(&self, col_quoted: &str) -> String {
        format!("CAST({} AS TEXT) AS {}", col_quoted, col_quoted)
    }

    fn is_native_type(&self, data_type: &str) -> bool {
        // SQLite uses type affinity: all common storage classes are native.
        matches!(
            data_type.to_uppercase().as_str(),
            "INTEGER" | "INT" | "REAL" | "NUMERIC" | "TEXT" | "BLOB"
        )
    }

    fn columns_query(&self, _schema: &str, table: &str) -> CatalogQuery {
        CatalogQuery::new(
            "SELECT name, type FROM pragma_table_info(?) ORDER BY cid",
            &[table],
        )
    }

    fn primary_key_query(&self, _schema: &str, table: &str) -> CatalogQuery {
        CatalogQuery::new(
            "SELECT name FROM pragma_table_info(?) WHERE pk > 0 ORDER BY pk",
            &[table],
        )
    }

    fn list_objects_query(&self, _schema: &str) -> CatalogQuery {
        CatalogQuery::new(
            "SELECT upper(type), name FROM sqlite_master \
             WHERE type IN ('table', 'view', 'trigger') AND name NOT LIKE 'sqlite_%'",
            &[],
        )
    }

    fn create_query(&self, _schema: &str, object: &ObjectDescriptor) -> CreateQuery {
        match object.object_type {
            ObjectType::Table | ObjectType::View | ObjectType::Trigger => CreateQuery::Text {
                query: CatalogQuery::new(
                    "SELECT sql FROM sqlite_master WHERE type = ? AND name = ?",
                    &[
                        object.object_type.as_str().to_lowercase().as_str(),
                        object.name.as_str(),
                    ],
                ),
                column: 0,
                prefix: String::new(),
            },
            _ => CreateQuery::Unsupported,
        }
    }
}

impl RowDecoder for SqliteDialect {
    fn decode_column(&self, row: &AnyRow, idx: usize, type_hint: &str) -> Result<Value> {
        col_to_json(row, idx, type_hint)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Factory
// ─────────────────────────────────────────────────────────────────────────────

/// Resolve the dialect (QueryDialect + CatalogSql + RowDecoder) from a driver name string.
/// Returns `Box<dyn Dialect>` where `Dialect` is the combined supertrait alias.
pub fn from_driver(driver: &str) -> Box<dyn Dialect> {
    match driver {
        "mysql" => Box::new(MysqlDialect),
        "mariadb" => Box::new(MariadbDialect),
        "sqlite" => Box::new(SqliteDialect),
        _ => Box::new(PostgresDialect),
    }
}

/// The rendering-only view of [`from_driver`], for repair statements.
pub fn query_dialect(driver: &str) -> Arc<dyn QueryDialect> {
    match driver {
        "mysql" => Arc::new(MysqlDialect),
        "mariadb" => Arc::new(MariadbDialect),
        "sqlite" => Arc::new(SqliteDialect),
        _ => Arc::new(PostgresDialect),
    }
}

/// Combined supertrait, an alias so callers only store one object.
pub trait Dialect: CatalogSql + RowDecoder {}
impl Dialect for PostgresDialect {}
impl Dialect for MysqlDialect {}
impl Dialect for MariadbDialect {}
impl Dialect for SqliteDialect {}

// ─────────────────────────────────────────────────────────────────────────────
// Shared decoding helpers (private to this module)
// ─────────────────────────────────────────────────────────────────────────────

/// Decode a BLOB column (MySQL/MariaDB non-native types) as raw UTF-8 bytes,
/// then reinterpret the string using the `information_schema` type hint.
fn blob_to_json(row: &AnyRow, idx: usize, type_hint: &str) -> Result<Value> {
    let bytes: Option<Vec<u8>> = row.try_get(idx)?;
    let Some(b) = bytes else {
        return Ok(Value::Null);
    };
    let s = String::from_utf8_lossy(&b).into_owned();
    Ok(match type_hint.to_uppercase().as_str() {
        "DECIMAL" | "NUMERIC" => parse_number(s),
        "JSON" | "JSONB" => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        "TINYINT" | "SMALLINT" => s
            .parse::<i64>()
            .map(|v| json!(v))
            .unwrap_or(Value::String(s)),
        _ => Value::String(s),
    })
}

/// DECIMAL/NUMERIC text back to a number; exact text kept when it does not
/// round-trip through f64.
fn parse_number(s: String) -> Value {
    match s.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
        Some(n) if n.to_string() == s => Value::Number(n),
        _ => Value::String(s),
    }
}

/// Decode a column whose AnyRow type is supported natively or has been
/// cast to TEXT in the SELECT query.
fn col_to_json(row: &AnyRow, idx: usize, type_name: &str) -> Result<Value> {
    let v = match type_name.to_uppercase().as_str() {
        // ── Booleans ──────────────────────────────────────────────────────────
        "BOOL" | "BOOLEAN" => row
            .try_get::<Option<bool>, _>(idx)?
            .map_or(Value::Null, Value::Bool),

        // ── Integers ──────────────────────────────────────────────────────────
        "INT2" | "SMALLINT" | "SMALLSERIAL" => row
            .try_get::<Option<i32>, _>(idx)?
            .map_or(Value::Null, |v| json!(v)),

        "TINYINT" => match row.try_get::<Option<String>, _>(idx)? {
            None => Value::Null,
            Some(s) => s
                .parse::<i32>()
                .map(|v| json!(v))
                .unwrap_or_else(|_| Value::String(s)),
        },

        "INT4" | "INT" | "INTEGER" | "SERIAL" => row
            .try_get::<Option<i32>, _>(idx)?
            .map_or(Value::Null, |v| json!(v)),

        "INT8" | "BIGINT" | "BIGSERIAL" => row
            .try_get::<Option<i64>, _>(idx)?
            .map_or(Value::Null, |v| json!(v)),

        // ── Floats ────────────────────────────────────────────────────────────
        "FLOAT4" | "REAL" | "FLOAT" => row
            .try_get::<Option<f32>, _>(idx)?
            .map_or(Value::Null, |v| json!(v as f64)),

        "FLOAT8" | "DOUBLE" | "DOUBLE PRECISION" => row
            .try_get::<Option<f64>, _>(idx)?
            .map_or(Value::Null, |v| json!(v)),

        // ── NUMERIC / DECIMAL → cast to TEXT in SELECT, parse back to Number ─
        "NUMERIC" | "DECIMAL" => match row.try_get::<Option<String>, _>(idx)? {
            None => Value::Null,
            Some(s) => parse_number(s),
        },

        // ── JSON / JSONB → cast to TEXT in SELECT, parse back to Value ────────
        "JSON" | "JSONB" => match row.try_get::<Option<String>, _>(idx)? {
            None => Value::Null,
            Some(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        },

        // ── SQLite NULL storage class ─────────────────────────────────────────
        "NULL" => Value::Null,

        // ── Everything else: TEXT, VARCHAR, CHAR, UUID, TIMESTAMP, DATE, ARRAY …
        _ => row
            .try_get::<Option<String>, _>(idx)?
            .map_or(Value::Null, Value::String),
    };
    Ok(v)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
