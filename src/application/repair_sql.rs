use serde_json::Value;

use crate::domain::repair::{RepairStatement, TableRef};
use crate::domain::row::{cmp_keys, KeyValues, RowMap};
use crate::domain::value_objects::ColumnName;

/// Classified rows of one table, ready to be turned into statements.
#[derive(Debug, Clone, Default)]
pub struct RepairInput {
    /// Source version of rows whose content differs.
    pub updates: Vec<RowMap>,
    /// Source rows absent from the target.
    pub inserts: Vec<RowMap>,
    /// Keys of target rows absent from the source.
    pub deletes: Vec<KeyValues>,
}

/// Build UPDATE/INSERT/DELETE statements for one target table.
///
/// Output order is updates, inserts, deletes; each group sorted by primary key.
pub fn generate_repairs(
    table: &TableRef,
    pk_columns: &[ColumnName],
    input: RepairInput,
) -> Vec<RepairStatement> {
    let mut out = Vec::with_capacity(input.updates.len() + input.inserts.len() + input.deletes.len());

    let mut updates: Vec<(KeyValues, RowMap)> = input
        .updates
        .into_iter()
        .map(|r| (key_of(&r, pk_columns), r))
        .collect();
    updates.sort_by(|a, b| cmp_keys(&a.0, &b.0));
    for (key, row) in updates {
        let set: Vec<(String, Value)> = row
            .into_iter()
            .filter(|(c, _)| !pk_columns.iter().any(|pk| pk.0 == *c))
            .collect();
        if set.is_empty() {
            continue;
        }
        out.push(RepairStatement::Update {
            table: table.clone(),
            set,
            key: pair_key(pk_columns, key),
        });
    }

    let mut inserts: Vec<(KeyValues, RowMap)> = input
        .inserts
        .into_iter()
        .map(|r| (key_of(&r, pk_columns), r))
        .collect();
    inserts.sort_by(|a, b| cmp_keys(&a.0, &b.0));
    for (_, row) in inserts {
        let (columns, values) = row.into_iter().unzip();
        out.push(RepairStatement::Insert {
            table: table.clone(),
            columns,
            values,
        });
    }

    let mut deletes = input.deletes;
    deletes.sort_by(|a, b| cmp_keys(a, b));
    for key in deletes {
        out.push(RepairStatement::Delete {
            table: table.clone(),
            key: pair_key(pk_columns, key),
        });
    }

    out
}

fn key_of(row: &RowMap, pk_columns: &[ColumnName]) -> KeyValues {
    pk_columns
        .iter()
        .map(|c| row.get(c.as_str()).cloned().unwrap_or(Value::Null))
        .collect()
}

fn pair_key(pk_columns: &[ColumnName], key: KeyValues) -> Vec<(String, Value)> {
    pk_columns.iter().map(|c| c.0.clone()).zip(key).collect()
}
