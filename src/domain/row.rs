use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;

use crate::domain::value_objects::Span;

/// One row: column name -> value, in the order the columns were projected.
///
/// Insertion order is preserved so INSERT column and value lists built from
/// the same map always line up.
pub type RowMap = IndexMap<String, Value>;

/// Primary-key values of one row, ordered like `TableSchema::pk_columns`.
pub type KeyValues = Vec<Value>;

/// Content and identity digests of one row, both 32 lowercase hex chars.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RowSignature {
    pub compare_sign: String,
    pub pk_hash: String,
}

impl Ord for RowSignature {
    fn cmp(&self, other: &Self) -> Ordering {
        self.pk_hash
            .cmp(&other.pk_hash)
            .then_with(|| self.compare_sign.cmp(&other.compare_sign))
    }
}

impl PartialOrd for RowSignature {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// What a signature scan returns for one row: its key values and the digest
/// of its compare columns. Nothing else about the row leaves the database.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignedKey {
    pub key: KeyValues,
    pub compare_sign: String,
}

/// Per-row working record for one reconciliation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompareRow {
    pub key: KeyValues,
    pub signature: RowSignature,
    pub span: Span,
}

/// Total order over cell values used to sort repair statements by key.
///
/// NULL sorts first, numbers compare numerically, everything else falls back
/// to its textual form.
pub fn cmp_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(i), Some(j)) => i.cmp(&j),
            _ => {
                let (fx, fy) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
                fx.partial_cmp(&fy).unwrap_or(Ordering::Equal)
            }
        },
        (Value::Number(_), _) => Ordering::Less,
        (_, Value::Number(_)) => Ordering::Greater,
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

/// Lexicographic comparison of two composite keys.
pub fn cmp_keys(a: &[Value], b: &[Value]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        match cmp_values(x, y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    a.len().cmp(&b.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_keys_sort_numerically() {
        let mut keys = vec![vec![json!(10)], vec![json!(2)], vec![Value::Null], vec![json!(1)]];
        keys.sort_by(|a, b| cmp_keys(a, b));
        assert_eq!(
            keys,
            vec![vec![Value::Null], vec![json!(1)], vec![json!(2)], vec![json!(10)]]
        );
    }

    #[test]
    fn composite_keys_compare_column_by_column() {
        let a = vec![json!("a"), json!(5)];
        let b = vec![json!("a"), json!(7)];
        let c = vec![json!("b"), json!(1)];
        assert_eq!(cmp_keys(&a, &b), Ordering::Less);
        assert_eq!(cmp_keys(&b, &c), Ordering::Less);
        assert_eq!(cmp_keys(&a, &a), Ordering::Equal);
    }

    #[test]
    fn signatures_order_by_pk_hash_first() {
        let a = RowSignature {
            compare_sign: "ff".into(),
            pk_hash: "00".into(),
        };
        let b = RowSignature {
            compare_sign: "00".into(),
            pk_hash: "01".into(),
        };
        assert!(a < b);
    }
}
