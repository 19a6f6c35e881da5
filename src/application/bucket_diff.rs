use serde::Serialize;
use std::collections::{BTreeSet, HashSet};

use crate::domain::span_summary::SpanSummary;
use crate::domain::value_objects::Span;

/// Buckets that need attention after comparing two summary sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BucketDiff {
    /// Present in both mismatch sets: needs row-level drill-down.
    pub changed: BTreeSet<Span>,
    /// Only the source has this bucket: every row is an insert.
    pub source_only: BTreeSet<Span>,
    /// Only the target has this bucket: every row is a delete.
    pub target_only: BTreeSet<Span>,
}

impl BucketDiff {
    /// No mismatching summary on either side.
    pub fn is_identical(&self) -> bool {
        self.changed.is_empty() && self.source_only.is_empty() && self.target_only.is_empty()
    }

    pub fn span_count(&self) -> usize {
        self.changed.len() + self.source_only.len() + self.target_only.len()
    }
}

/// Compare source and target summaries by full value (span, count, all sums).
pub fn diff_buckets(source: &[SpanSummary], target: &[SpanSummary]) -> BucketDiff {
    let a: HashSet<&SpanSummary> = source.iter().collect();
    let b: HashSet<&SpanSummary> = target.iter().collect();

    let spans_a: BTreeSet<Span> = a.difference(&b).map(|s| s.span.clone()).collect();
    let spans_b: BTreeSet<Span> = b.difference(&a).map(|s| s.span.clone()).collect();

    let changed: BTreeSet<Span> = spans_a.intersection(&spans_b).cloned().collect();
    let source_only = spans_a.difference(&changed).cloned().collect();
    let target_only = spans_b.difference(&changed).cloned().collect();

    BucketDiff {
        changed,
        source_only,
        target_only,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(span: &str, count: u64, s1: u64) -> SpanSummary {
        SpanSummary {
            span: Span(span.to_string()),
            row_count: count,
            sums: [s1, 2, 3, 4],
        }
    }

    fn spans(names: &[&str]) -> BTreeSet<Span> {
        names.iter().map(|n| Span(n.to_string())).collect()
    }

    #[test]
    fn equal_sets_are_identical() {
        let a = vec![summary("00", 1, 10), summary("01", 2, 20)];
        let d = diff_buckets(&a, &a.clone());
        assert!(d.is_identical());
        assert_eq!(d.span_count(), 0);
    }

    #[test]
    fn differing_sums_mark_span_changed() {
        let a = vec![summary("00", 1, 10), summary("01", 2, 20)];
        let b = vec![summary("00", 1, 10), summary("01", 2, 21)];
        let d = diff_buckets(&a, &b);
        assert_eq!(d.changed, spans(&["01"]));
        assert!(d.source_only.is_empty());
        assert!(d.target_only.is_empty());
    }

    #[test]
    fn differing_count_alone_marks_span_changed() {
        let a = vec![summary("aa", 3, 10)];
        let b = vec![summary("aa", 2, 10)];
        assert_eq!(diff_buckets(&a, &b).changed, spans(&["aa"]));
    }

    #[test]
    fn one_sided_spans_are_split_out() {
        let a = vec![summary("00", 1, 10), summary("0a", 1, 5)];
        let b = vec![summary("00", 1, 10), summary("ff", 4, 7)];
        let d = diff_buckets(&a, &b);
        assert!(d.changed.is_empty());
        assert_eq!(d.source_only, spans(&["0a"]));
        assert_eq!(d.target_only, spans(&["ff"]));
        assert!(!d.is_identical());
    }

    #[test]
    fn empty_target_makes_every_span_source_only() {
        let a = vec![summary("00", 1, 10), summary("01", 1, 11)];
        let d = diff_buckets(&a, &[]);
        assert_eq!(d.source_only, spans(&["00", "01"]));
        assert!(d.changed.is_empty() && d.target_only.is_empty());
    }
}
