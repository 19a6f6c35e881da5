use anyhow::Result;
use sqlx::any::AnyRow;
use sqlx::{Column, Row, TypeInfo};
use std::collections::HashMap;

use crate::domain::row::RowMap;
use crate::infrastructure::db::dialect::RowDecoder;

/// Convert a sqlx `AnyRow` into a `RowMap`, keeping the SELECT column order.
///
/// `col_types` maps column names to their `information_schema.data_type` values.
/// `decoder` is the dialect-specific `RowDecoder` that knows how to turn an
/// AnyRow column index + type hint into the correct `serde_json::Value`.
pub fn row_to_map<D: RowDecoder + ?Sized>(
    row: &AnyRow,
    col_types: &HashMap<String, String>,
    decoder: &D,
) -> Result<RowMap> {
    let mut map = RowMap::with_capacity(row.columns().len());
    for col in row.columns() {
        let name = col.name().to_string();
        // Prefer the information_schema type hint; SQLite has none and falls
        // back to the AnyRow type name.
        let anyrow_type = col.type_info().name();
        let type_hint = col_types
            .get(&name)
            .map(|s| s.as_str())
            .unwrap_or(anyrow_type);

        let value = decoder.decode_column(row, col.ordinal(), type_hint)?;
        map.insert(name, value);
    }
    Ok(map)
}
