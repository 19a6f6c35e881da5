use serde::Serialize;
use std::collections::BTreeMap;

use crate::domain::error::ReconcileError;
use crate::domain::row::{CompareRow, RowSignature};
use crate::domain::value_objects::Span;

/// Aggregate of every row in one bucket: row count plus the per-word sums of
/// the rows' content digests.
///
/// Equal summaries are a probabilistic, not exact, proof that the bucket holds
/// the same rows on both sides. A 128-bit digest collision, or two different
/// row multisets whose word sums coincide, would go unnoticed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SpanSummary {
    pub span: Span,
    pub row_count: u64,
    pub sums: [u64; 4],
}

/// Split a 32-char hex digest into four big-endian 32-bit words.
pub fn digest_words(sig: &RowSignature) -> Result<[u32; 4], ReconcileError> {
    let hex = &sig.compare_sign;
    if hex.len() != 32 || !hex.is_ascii() {
        return Err(ReconcileError::invalid_schema(format!(
            "malformed content digest {:?}",
            hex
        )));
    }
    let mut words = [0u32; 4];
    for (i, w) in words.iter_mut().enumerate() {
        *w = u32::from_str_radix(&hex[8 * i..8 * i + 8], 16).map_err(|_| {
            ReconcileError::invalid_schema(format!("malformed content digest {:?}", hex))
        })?;
    }
    Ok(words)
}

#[derive(Debug, Default, Clone, Copy)]
struct Accumulator {
    count: u64,
    sums: [u64; 4],
}

/// Streaming per-span accumulator for one side of one table.
#[derive(Debug, Default)]
pub struct SpanSummaryBuilder {
    buckets: BTreeMap<Span, Accumulator>,
}

impl SpanSummaryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, row: &CompareRow) -> Result<(), ReconcileError> {
        let words = digest_words(&row.signature)?;
        let acc = self.buckets.entry(row.span.clone()).or_default();
        acc.count += 1;
        for (sum, w) in acc.sums.iter_mut().zip(words) {
            *sum = sum.wrapping_add(u64::from(w));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Summaries sorted by span.
    pub fn finish(self) -> Vec<SpanSummary> {
        self.buckets
            .into_iter()
            .map(|(span, acc)| SpanSummary {
                span,
                row_count: acc.count,
                sums: acc.sums,
            })
            .collect()
    }
}

/// Summarise a full set of rows in one call.
pub fn summarize<'a>(
    rows: impl IntoIterator<Item = &'a CompareRow>,
) -> Result<Vec<SpanSummary>, ReconcileError> {
    let mut builder = SpanSummaryBuilder::new();
    for row in rows {
        builder.push(row)?;
    }
    Ok(builder.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::row::RowMap;
    use crate::domain::signature::{compare_row, digest128};
    use crate::domain::value_objects::{ColumnName, TableSchema};
    use serde_json::json;

    fn rows(n: i64) -> Vec<CompareRow> {
        let schema = TableSchema::new(
            vec![ColumnName("id".into())],
            vec![ColumnName("id".into()), ColumnName("v".into())],
        );
        (0..n)
            .map(|i| {
                let r: RowMap = [("id".to_string(), json!(i)), ("v".to_string(), json!(i * 7))]
                    .into_iter()
                    .collect();
                // 1-char spans force many rows into each bucket
                compare_row(&r, &schema, 1).unwrap()
            })
            .collect()
    }

    #[test]
    fn words_are_parsed_big_endian_per_group() {
        let sig = RowSignature {
            compare_sign: "0000000100000002000000030000000f".into(),
            pk_hash: digest128("x"),
        };
        assert_eq!(digest_words(&sig).unwrap(), [1, 2, 3, 15]);
    }

    #[test]
    fn malformed_digest_is_rejected() {
        let sig = RowSignature {
            compare_sign: "zz".into(),
            pk_hash: String::new(),
        };
        assert!(digest_words(&sig).is_err());
    }

    #[test]
    fn counts_and_sums_per_span() {
        let input = rows(200);
        let summaries = summarize(&input).unwrap();
        let total: u64 = summaries.iter().map(|s| s.row_count).sum();
        assert_eq!(total, 200);
        for s in &summaries {
            let members: Vec<&CompareRow> = input.iter().filter(|r| r.span == s.span).collect();
            assert_eq!(s.row_count, members.len() as u64);
            let mut expected = [0u64; 4];
            for m in members {
                let w = digest_words(&m.signature).unwrap();
                for i in 0..4 {
                    expected[i] += u64::from(w[i]);
                }
            }
            assert_eq!(s.sums, expected);
        }
    }

    #[test]
    fn shuffled_input_gives_same_summaries() {
        let input = rows(300);
        let forward = summarize(&input).unwrap();

        let mut reversed = input.clone();
        reversed.reverse();
        assert_eq!(summarize(&reversed).unwrap(), forward);

        // deterministic interleave: odds then evens
        let interleaved: Vec<CompareRow> = input
            .iter()
            .skip(1)
            .step_by(2)
            .chain(input.iter().step_by(2))
            .cloned()
            .collect();
        assert_eq!(summarize(&interleaved).unwrap(), forward);
    }

    #[test]
    fn empty_input_has_no_spans() {
        let empty: Vec<CompareRow> = vec![];
        assert!(summarize(&empty).unwrap().is_empty());
    }
}
