use crate::domain::row::KeyValues;
use crate::domain::value_objects::{ColumnName, Schema, TableName};
use crate::infrastructure::db::dialect::{CatalogSql, QueryDialect};

/// Keys per `fetch_rows_by_key` statement.
pub const KEY_BATCH_SIZE: usize = 500;

/// Column alias of the in-database content digest.
pub const SIGN_ALIAS: &str = "driftcheck_sign";

// ─────────────────────────────────────────────────────────────────────────────
// Query builders
// ─────────────────────────────────────────────────────────────────────────────

/// Unqualified when no schema is configured.
fn qualified<D: QueryDialect + ?Sized>(schema: &Schema, table: &TableName, dialect: &D) -> String {
    if schema.0.is_empty() {
        return dialect.quote_ident(&table.0);
    }
    format!(
        "{}{}",
        dialect.schema_prefix(&schema.0),
        dialect.quote_ident(&table.0)
    )
}

/// SELECT-list expressions for `projection`. Every column whose
/// `information_schema.data_type` is not natively supported by
/// `sqlx::AnyRow` is wrapped in the dialect cast expression (e.g. `::TEXT`
/// for PostgreSQL, `CONVERT(… USING utf8mb4)` for MySQL). Columns with no
/// known type (SQLite, where `col_types` is empty) are selected as is.
pub fn select_list<D: CatalogSql + ?Sized>(
    projection: &[ColumnName],
    col_types: &[(String, String)],
    dialect: &D,
) -> Vec<String> {
    projection
        .iter()
        .map(|col| {
            let q = dialect.quote_ident(&col.0);
            match col_types.iter().find(|(name, _)| name == &col.0) {
                Some((_, data_type)) if !dialect.is_native_type(data_type) => {
                    dialect.cast_to_text(&q)
                }
                _ => q,
            }
        })
        .collect()
}

/// Build a `SELECT <exprs> FROM <schema>.<table> ORDER BY <order_by>` query.
/// `ORDER BY` is omitted when `order_by` is empty to avoid a SQL syntax error.
pub fn build_select_query<D: QueryDialect + ?Sized>(
    schema: &Schema,
    table: &TableName,
    select_exprs: &[String],
    order_by: &[ColumnName],
    dialect: &D,
) -> String {
    let base = format!(
        "SELECT {} FROM {}",
        select_exprs.join(", "),
        qualified(schema, table, dialect)
    );
    let order_cols: Vec<String> = order_by.iter().map(|c| dialect.quote_ident(&c.0)).collect();
    if order_cols.is_empty() {
        base
    } else {
        format!("{} ORDER BY {}", base, order_cols.join(", "))
    }
}

/// Key columns plus the in-database digest of `compare_columns`, ordered by
/// key. `None` when the dialect cannot hash in the database.
pub fn build_signature_query<D: CatalogSql + ?Sized>(
    schema: &Schema,
    table: &TableName,
    key_exprs: &[String],
    compare_columns: &[ColumnName],
    order_by: &[ColumnName],
    dialect: &D,
) -> Option<String> {
    let quoted: Vec<String> = compare_columns
        .iter()
        .map(|c| dialect.quote_ident(&c.0))
        .collect();
    let digest = dialect.content_digest_expr(&quoted)?;
    let mut exprs = key_exprs.to_vec();
    exprs.push(format!("{} AS {}", digest, dialect.quote_ident(SIGN_ALIAS)));
    Some(build_select_query(schema, table, &exprs, order_by, dialect))
}

/// `WHERE` predicate matching any of `keys`. Single-column keys use `IN`;
/// composite keys an OR of AND-conjunctions. NULL key parts use `IS NULL`.
pub fn build_key_filter<D: QueryDialect + ?Sized>(
    key_columns: &[ColumnName],
    keys: &[KeyValues],
    dialect: &D,
) -> String {
    if let [col] = key_columns {
        let q = dialect.quote_ident(&col.0);
        let (nulls, values): (Vec<_>, Vec<_>) =
            keys.iter().filter_map(|k| k.first()).partition(|v| v.is_null());
        let mut parts = Vec::new();
        if !values.is_empty() {
            let list: Vec<String> = values.iter().map(|v| dialect.sql_literal(v)).collect();
            parts.push(format!("{} IN ({})", q, list.join(", ")));
        }
        if !nulls.is_empty() {
            parts.push(format!("{} IS NULL", q));
        }
        return parts.join(" OR ");
    }

    keys.iter()
        .map(|key| {
            let conds: Vec<String> = key_columns
                .iter()
                .zip(key)
                .map(|(col, v)| {
                    let q = dialect.quote_ident(&col.0);
                    if v.is_null() {
                        format!("{} IS NULL", q)
                    } else {
                        format!("{} = {}", q, dialect.sql_literal(v))
                    }
                })
                .collect();
            format!("({})", conds.join(" AND "))
        })
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// One SELECT per batch of at most `KEY_BATCH_SIZE` keys.
pub fn build_select_by_key_queries<D: QueryDialect + ?Sized>(
    schema: &Schema,
    table: &TableName,
    select_exprs: &[String],
    key_columns: &[ColumnName],
    keys: &[KeyValues],
    dialect: &D,
) -> Vec<String> {
    keys.chunks(KEY_BATCH_SIZE)
        .map(|batch| {
            format!(
                "SELECT {} FROM {} WHERE {}",
                select_exprs.join(", "),
                qualified(schema, table, dialect),
                build_key_filter(key_columns, batch, dialect)
            )
        })
        .collect()
}

pub fn build_count_query<D: QueryDialect + ?Sized>(
    schema: &Schema,
    table: &TableName,
    dialect: &D,
) -> String {
    format!("SELECT COUNT(*) FROM {}", qualified(schema, table, dialect))
}

/// `CREATE TABLE` text from `(column_name, definition)` pairs and the key.
pub fn assemble_create_table<D: QueryDialect + ?Sized>(
    table: &str,
    columns: &[(String, String)],
    primary_key: &[String],
    dialect: &D,
) -> String {
    let mut lines: Vec<String> = columns
        .iter()
        .map(|(name, def)| format!("  {} {}", dialect.quote_ident(name), def))
        .collect();
    if !primary_key.is_empty() {
        let cols: Vec<String> = primary_key.iter().map(|c| dialect.quote_ident(c)).collect();
        lines.push(format!("  PRIMARY KEY ({})", cols.join(", ")));
    }
    format!(
        "CREATE TABLE {} (\n{}\n)",
        dialect.quote_ident(table),
        lines.join(",\n")
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
