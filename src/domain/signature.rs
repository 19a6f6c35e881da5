use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::domain::error::ReconcileError;
use crate::domain::row::{CompareRow, KeyValues, RowMap, RowSignature, SignedKey};
use crate::domain::value_objects::{ColumnName, Span, TableSchema};

/// Separator placed between column values before hashing.
pub const VALUE_SEPARATOR: &str = "/";

/// 128-bit digest of `input`: the first 16 bytes of SHA-256, lowercase hex.
pub fn digest128(input: &str) -> String {
    let hash = Sha256::digest(input.as_bytes());
    hash[..16].iter().map(|b| format!("{:02x}", b)).collect()
}

/// Text contributed by one cell. NULL contributes the empty string.
fn value_text(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => serde_json::to_string(v).unwrap_or_default(),
    }
}

fn joined(row: &RowMap, cols: &[ColumnName]) -> Result<String, ReconcileError> {
    let mut parts = Vec::with_capacity(cols.len());
    for col in cols {
        let v = row.get(col.as_str()).ok_or_else(|| {
            ReconcileError::invalid_schema(format!("column {} not present in row", col.0))
        })?;
        parts.push(value_text(v));
    }
    Ok(parts.join(VALUE_SEPARATOR))
}

fn check_schema(schema: &TableSchema) -> Result<(), ReconcileError> {
    if schema.pk_columns.is_empty() {
        return Err(ReconcileError::invalid_schema("primary key column list is empty"));
    }
    if schema.compare_columns.is_empty() {
        return Err(ReconcileError::invalid_schema("compare column list is empty"));
    }
    Ok(())
}

/// Compute `(compare_sign, pk_hash)` for one row.
pub fn hash_row(row: &RowMap, schema: &TableSchema) -> Result<RowSignature, ReconcileError> {
    check_schema(schema)?;
    Ok(RowSignature {
        compare_sign: digest128(&joined(row, &schema.compare_columns)?),
        pk_hash: digest128(&joined(row, &schema.pk_columns)?),
    })
}

/// `pk_hash[0:span_len]`, clamped to the digest length.
pub fn span_of(pk_hash: &str, span_len: usize) -> Span {
    let end = span_len.min(pk_hash.len());
    Span(pk_hash[..end].to_string())
}

/// `pk_hash` of key values already pulled out of a row.
pub fn key_hash(key: &[Value]) -> String {
    let parts: Vec<String> = key.iter().map(value_text).collect();
    digest128(&parts.join(VALUE_SEPARATOR))
}

/// Key values and local content digest of one fetched row.
pub fn signed_key(row: &RowMap, schema: &TableSchema) -> Result<SignedKey, ReconcileError> {
    check_schema(schema)?;
    let key: KeyValues = schema
        .pk_columns
        .iter()
        .map(|c| {
            row.get(c.as_str()).cloned().ok_or_else(|| {
                ReconcileError::invalid_schema(format!("column {} not present in row", c.0))
            })
        })
        .collect::<Result<_, _>>()?;
    Ok(SignedKey {
        key,
        compare_sign: digest128(&joined(row, &schema.compare_columns)?),
    })
}

/// Derive `pk_hash` and bucket for a scanned key. The content digest is kept
/// as given, whether it was computed locally or by the database.
pub fn keyed_row(signed: SignedKey, span_len: usize) -> CompareRow {
    let pk_hash = key_hash(&signed.key);
    let span = span_of(&pk_hash, span_len);
    CompareRow {
        key: signed.key,
        signature: RowSignature {
            compare_sign: signed.compare_sign.to_ascii_lowercase(),
            pk_hash,
        },
        span,
    }
}

/// Hash a row and pair it with its bucket and key values.
pub fn compare_row(
    row: &RowMap,
    schema: &TableSchema,
    span_len: usize,
) -> Result<CompareRow, ReconcileError> {
    Ok(keyed_row(signed_key(row, schema)?, span_len))
}
