use serde::Serialize;
use serde_json::Value;

use crate::domain::ports::QueryDialect;

/// Target table of a repair statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableRef {
    pub schema: Option<String>,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.filter(|s| !s.is_empty()).map(str::to_string),
            name: name.into(),
        }
    }

    pub fn render(&self, dialect: &dyn QueryDialect) -> String {
        let prefix = self
            .schema
            .as_deref()
            .map(|s| dialect.schema_prefix(s))
            .unwrap_or_default();
        format!("{}{}", prefix, dialect.quote_ident(&self.name))
    }
}

/// One generated data fix. Never executed by the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RepairStatement {
    Update {
        table: TableRef,
        set: Vec<(String, Value)>,
        key: Vec<(String, Value)>,
    },
    Insert {
        table: TableRef,
        columns: Vec<String>,
        values: Vec<Value>,
    },
    Delete {
        table: TableRef,
        key: Vec<(String, Value)>,
    },
}

/// SQL text with bind placeholders plus the values to bind, in order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundStatement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl RepairStatement {
    pub fn table(&self) -> &TableRef {
        match self {
            RepairStatement::Update { table, .. }
            | RepairStatement::Insert { table, .. }
            | RepairStatement::Delete { table, .. } => table,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RepairStatement::Update { .. } => "update",
            RepairStatement::Insert { .. } => "insert",
            RepairStatement::Delete { .. } => "delete",
        }
    }

    /// Render with inline literals, for human-readable repair scripts.
    pub fn to_sql(&self, dialect: &dyn QueryDialect) -> String {
        match self {
            RepairStatement::Update { table, set, key } => {
                let assignments = set
                    .iter()
                    .map(|(c, v)| format!("{} = {}", dialect.quote_ident(c), dialect.sql_literal(v)))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "UPDATE {} SET {} WHERE {}",
                    table.render(dialect),
                    assignments,
                    key_where_clause(key, dialect)
                )
            }
            RepairStatement::Insert {
                table,
                columns,
                values,
            } => {
                let cols: Vec<String> = columns.iter().map(|c| dialect.quote_ident(c)).collect();
                let vals: Vec<String> = values.iter().map(|v| dialect.sql_literal(v)).collect();
                format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    table.render(dialect),
                    cols.join(", "),
                    vals.join(", ")
                )
            }
            RepairStatement::Delete { table, key } => format!(
                "DELETE FROM {} WHERE {}",
                table.render(dialect),
                key_where_clause(key, dialect)
            ),
        }
    }

    /// Render with bind placeholders, for execution through a driver.
    ///
    /// NULL key values become `IS NULL` and bind nothing.
    pub fn parameterized(&self, dialect: &dyn QueryDialect) -> BoundStatement {
        let mut params = Vec::new();
        let mut bind = |v: &Value, params: &mut Vec<Value>| {
            params.push(v.clone());
            dialect.placeholder(params.len())
        };

        let sql = match self {
            RepairStatement::Update { table, set, key } => {
                let assignments = set
                    .iter()
                    .map(|(c, v)| format!("{} = {}", dialect.quote_ident(c), bind(v, &mut params)))
                    .collect::<Vec<_>>()
                    .join(", ");
                let predicate = bound_where_clause(key, dialect, &mut params, &mut bind);
                format!(
                    "UPDATE {} SET {} WHERE {}",
                    table.render(dialect),
                    assignments,
                    predicate
                )
            }
            RepairStatement::Insert {
                table,
                columns,
                values,
            } => {
                let cols: Vec<String> = columns.iter().map(|c| dialect.quote_ident(c)).collect();
                let slots: Vec<String> = values.iter().map(|v| bind(v, &mut params)).collect();
                format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    table.render(dialect),
                    cols.join(", "),
                    slots.join(", ")
                )
            }
            RepairStatement::Delete { table, key } => {
                let predicate = bound_where_clause(key, dialect, &mut params, &mut bind);
                format!("DELETE FROM {} WHERE {}", table.render(dialect), predicate)
            }
        };

        BoundStatement { sql, params }
    }
}

/// AND-conjunction over every key column. NULL renders as `IS NULL`.
pub fn key_where_clause(key: &[(String, Value)], dialect: &dyn QueryDialect) -> String {
    key.iter()
        .map(|(col, val)| {
            let col_q = dialect.quote_ident(col);
            if val.is_null() {
                format!("{} IS NULL", col_q)
            } else {
                format!("{} = {}", col_q, dialect.sql_literal(val))
            }
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn bound_where_clause(
    key: &[(String, Value)],
    dialect: &dyn QueryDialect,
    params: &mut Vec<Value>,
    bind: &mut impl FnMut(&Value, &mut Vec<Value>) -> String,
) -> String {
    key.iter()
        .map(|(col, val)| {
            let col_q = dialect.quote_ident(col);
            if val.is_null() {
                format!("{} IS NULL", col_q)
            } else {
                format!("{} = {}", col_q, bind(val, params))
            }
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}
