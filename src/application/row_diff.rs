use std::collections::{BTreeSet, HashSet};

use crate::domain::row::{CompareRow, RowSignature};

/// Rows of one bucket, classified.
///
/// `updates` and `inserts` carry the source row, `deletes` the target row.
/// Each group is sorted by pk hash.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpanClassification {
    pub updates: Vec<CompareRow>,
    pub inserts: Vec<CompareRow>,
    pub deletes: Vec<CompareRow>,
}

impl SpanClassification {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.inserts.is_empty() && self.deletes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.updates.len() + self.inserts.len() + self.deletes.len()
    }

    /// Every row of a bucket the target lacks.
    pub fn all_inserts(mut rows: Vec<CompareRow>) -> Self {
        rows.sort_by(|a, b| a.signature.cmp(&b.signature));
        Self {
            inserts: rows,
            ..Default::default()
        }
    }

    /// Every row of a bucket the source lacks.
    pub fn all_deletes(mut rows: Vec<CompareRow>) -> Self {
        rows.sort_by(|a, b| a.signature.cmp(&b.signature));
        Self {
            deletes: rows,
            ..Default::default()
        }
    }
}

/// Exact-diff the signatures of one bucket present on both sides.
///
/// A source row whose pk hash also appears among the target's differing rows
/// is an update; any other differing source row is an insert. A differing
/// target row is a delete only when its pk hash is absent from the source's
/// differing rows, so no key is classified twice.
pub fn classify_span(source: &[CompareRow], target: &[CompareRow]) -> SpanClassification {
    let sig_source: HashSet<&RowSignature> = source.iter().map(|r| &r.signature).collect();
    let sig_target: HashSet<&RowSignature> = target.iter().map(|r| &r.signature).collect();

    let diff_source: Vec<&CompareRow> = dedup_sorted(
        source
            .iter()
            .filter(|r| !sig_target.contains(&r.signature)),
    );
    let diff_target: Vec<&CompareRow> = dedup_sorted(
        target
            .iter()
            .filter(|r| !sig_source.contains(&r.signature)),
    );

    let pk_source: HashSet<&str> = diff_source
        .iter()
        .map(|r| r.signature.pk_hash.as_str())
        .collect();
    let pk_target: HashSet<&str> = diff_target
        .iter()
        .map(|r| r.signature.pk_hash.as_str())
        .collect();

    let mut out = SpanClassification::default();
    for row in diff_source {
        if pk_target.contains(row.signature.pk_hash.as_str()) {
            out.updates.push(row.clone());
        } else {
            out.inserts.push(row.clone());
        }
    }
    for row in diff_target {
        if !pk_source.contains(row.signature.pk_hash.as_str()) {
            out.deletes.push(row.clone());
        }
    }
    out
}

/// Set semantics on the signature, ordered by pk hash.
fn dedup_sorted<'a>(rows: impl Iterator<Item = &'a CompareRow>) -> Vec<&'a CompareRow> {
    let mut seen = BTreeSet::new();
    let mut out: Vec<&CompareRow> = rows.filter(|r| seen.insert(r.signature.clone())).collect();
    out.sort_by(|a, b| a.signature.cmp(&b.signature));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::row::RowMap;
    use crate::domain::signature::compare_row;
    use crate::domain::value_objects::{ColumnName, TableSchema};
    use serde_json::{json, Value};

    fn schema() -> TableSchema {
        TableSchema::new(
            vec![ColumnName("id".into())],
            vec![ColumnName("id".into()), ColumnName("name".into())],
        )
    }

    fn cr(id: i64, name: &str) -> CompareRow {
        let r: RowMap = [
            ("id".to_string(), json!(id)),
            ("name".to_string(), json!(name)),
        ]
        .into_iter()
        .collect();
        compare_row(&r, &schema(), 8).unwrap()
    }

    fn keys(rows: &[CompareRow]) -> Vec<Value> {
        let mut k: Vec<Value> = rows.iter().map(|r| r.key[0].clone()).collect();
        k.sort_by_key(|v| v.as_i64());
        k
    }

    #[test]
    fn users_scenario() {
        let source = vec![cr(1, "A"), cr(2, "B")];
        let target = vec![cr(1, "A"), cr(3, "C")];
        let c = classify_span(&source, &target);
        assert!(c.updates.is_empty());
        assert_eq!(keys(&c.inserts), vec![json!(2)]);
        assert_eq!(keys(&c.deletes), vec![json!(3)]);
    }

    #[test]
    fn changed_content_is_an_update_not_insert_and_delete() {
        let source = vec![cr(1, "A"), cr(2, "new")];
        let target = vec![cr(1, "A"), cr(2, "old")];
        let c = classify_span(&source, &target);
        assert_eq!(keys(&c.updates), vec![json!(2)]);
        assert_eq!(c.updates[0].key, vec![json!(2)]);
        assert!(c.inserts.is_empty());
        assert!(c.deletes.is_empty());
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn identical_buckets_classify_nothing() {
        let rows = vec![cr(1, "A"), cr(2, "B"), cr(3, "C")];
        assert!(classify_span(&rows, &rows.clone()).is_empty());
    }

    #[test]
    fn duplicate_signatures_collapse() {
        let source = vec![cr(5, "x"), cr(5, "x")];
        let c = classify_span(&source, &[]);
        assert_eq!(c.inserts.len(), 1);
    }

    #[test]
    fn groups_are_sorted_by_pk_hash() {
        let source: Vec<CompareRow> = (0..20).map(|i| cr(i, "s")).collect();
        let c = classify_span(&source, &[]);
        let hashes: Vec<&str> = c.inserts.iter().map(|r| r.signature.pk_hash.as_str()).collect();
        let mut sorted = hashes.clone();
        sorted.sort();
        assert_eq!(hashes, sorted);
    }

    #[test]
    fn one_sided_helpers() {
        let c = SpanClassification::all_deletes(vec![cr(9, "z"), cr(8, "y")]);
        assert_eq!(c.deletes.len(), 2);
        assert!(c.inserts.is_empty() && c.updates.is_empty());
    }
}
