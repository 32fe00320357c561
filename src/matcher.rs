//! Nearest-neighbor search over enrolled embeddings.
//!
//! The scan is linear, O(N·D) per query. The first record reaching the
//! highest similarity wins (strict `>`), so ties resolve in scan order; both
//! shipped stores scan in insertion order. The winner is accepted only if its
//! similarity is at least the threshold.

use std::convert::Infallible;

use serde::Serialize;

use crate::error::StoreError;
use crate::similarity::cosine_similarity;
use crate::store::{EmbeddingRecord, VectorStore};

/// Below every cosine similarity, so the first comparable record always
/// replaces it.
const SENTINEL: f32 = -2.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MatchResult {
    Match {
        record: EmbeddingRecord,
        similarity: f32,
    },
    NoMatch,
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchResult::Match { .. })
    }

    pub fn record(&self) -> Option<&EmbeddingRecord> {
        match self {
            MatchResult::Match { record, .. } => Some(record),
            MatchResult::NoMatch => None,
        }
    }

    pub fn similarity(&self) -> Option<f32> {
        match self {
            MatchResult::Match { similarity, .. } => Some(*similarity),
            MatchResult::NoMatch => None,
        }
    }
}

/// Scan fallible records, stopping at the first error.
///
/// Records whose dimensionality differs from the query cannot be compared
/// and are skipped with a warning.
pub fn try_best_match<I, E>(query: &[f32], records: I, threshold: f32) -> Result<MatchResult, E>
where
    I: IntoIterator<Item = Result<EmbeddingRecord, E>>,
{
    let mut best_similarity = SENTINEL;
    let mut best: Option<EmbeddingRecord> = None;
    let mut scanned = 0usize;

    for record in records {
        let record = record?;
        scanned += 1;

        if record.dim() != query.len() {
            log::warn!(
                "skipping {}: dimension {} does not match query dimension {}",
                record.identifier,
                record.dim(),
                query.len()
            );
            continue;
        }

        let similarity = cosine_similarity(query, &record.embedding);
        log::trace!("{}: {:.4}", record.identifier, similarity);

        if similarity > best_similarity {
            best_similarity = similarity;
            best = Some(record);
        }
    }

    log::debug!(
        "scanned {} record(s), best similarity {:.4}",
        scanned,
        best_similarity
    );

    Ok(match best {
        Some(record) if best_similarity >= threshold => MatchResult::Match {
            record,
            similarity: best_similarity,
        },
        _ => MatchResult::NoMatch,
    })
}

pub fn best_match<I>(query: &[f32], records: I, threshold: f32) -> MatchResult
where
    I: IntoIterator<Item = EmbeddingRecord>,
{
    match try_best_match(query, records.into_iter().map(Ok::<_, Infallible>), threshold) {
        Ok(result) => result,
        Err(never) => match never {},
    }
}

/// Best match among everything in `store`.
pub fn search(
    store: &dyn VectorStore,
    query: &[f32],
    threshold: f32,
) -> Result<MatchResult, StoreError> {
    try_best_match(query, store.fetch_all()?, threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn rec(id: &str, v: &[f32]) -> EmbeddingRecord {
        EmbeddingRecord::new(id, v.to_vec())
    }

    #[test]
    fn empty_store_never_matches() {
        for threshold in [-1.0, 0.0, 0.7, 1.0] {
            assert_eq!(best_match(&[1.0, 0.0], Vec::new(), threshold), MatchResult::NoMatch);
        }
    }

    #[test]
    fn single_record_against_threshold() {
        let r = rec("only.png", &[1.0, 1.0]);
        let query = [1.0, 0.0];
        let s = cosine_similarity(&query, &r.embedding);

        let hit = best_match(&query, vec![r.clone()], s);
        assert_eq!(
            hit,
            MatchResult::Match {
                record: r.clone(),
                similarity: s
            }
        );

        let miss = best_match(&query, vec![r], s + 0.01);
        assert_eq!(miss, MatchResult::NoMatch);
        assert_eq!(miss.record(), None);
        assert_eq!(miss.similarity(), None);
    }

    #[test]
    fn exact_query_finds_alice() {
        let v1 = [0.2, 0.9, -0.1, 0.4];
        let v2 = [-0.7, 0.1, 0.6, 0.0];
        let store: MemoryStore = vec![rec("alice.png", &v1), rec("bob.png", &v2)]
            .into_iter()
            .collect();

        let result = search(&store, &v1, 0.70).unwrap();
        assert!(result.is_match());
        assert_eq!(result.record().unwrap().identifier, "alice.png");
        assert_eq!(format!("{:.3}", result.similarity().unwrap()), "1.000");
    }

    #[test]
    fn ties_keep_the_first_record() {
        let records = vec![
            rec("first.png", &[1.0, 0.0]),
            rec("second.png", &[2.0, 0.0]),
            rec("third.png", &[0.0, 1.0]),
        ];
        let result = best_match(&[3.0, 0.0], records, 0.5);
        assert_eq!(result.record().unwrap().identifier, "first.png");
    }

    #[test]
    fn highest_similarity_wins_regardless_of_position() {
        let records = vec![
            rec("far.png", &[0.0, 1.0]),
            rec("near.png", &[1.0, 0.1]),
            rec("mid.png", &[1.0, 1.0]),
        ];
        let result = best_match(&[1.0, 0.0], records, -1.0);
        assert_eq!(result.record().unwrap().identifier, "near.png");
    }

    #[test]
    fn negative_similarities_still_compete() {
        let records = vec![rec("a.png", &[-1.0, 0.0]), rec("b.png", &[-1.0, -1.0])];
        let result = best_match(&[1.0, 0.0], records, -1.0);
        assert_eq!(result.record().unwrap().identifier, "b.png");
        assert!(result.similarity().unwrap() < 0.0);
    }

    #[test]
    fn zero_vector_record_scores_zero() {
        let result = best_match(&[1.0, 0.0], vec![rec("blank.png", &[0.0, 0.0])], 0.0);
        assert_eq!(result.similarity(), Some(0.0));
    }

    #[test]
    fn mismatched_dimensions_are_skipped() {
        let records = vec![rec("short.png", &[1.0]), rec("ok.png", &[0.5, 0.5])];
        let result = best_match(&[1.0, 0.0], records, 0.0);
        assert_eq!(result.record().unwrap().identifier, "ok.png");

        let only_bad = vec![rec("long.png", &[1.0, 0.0, 0.0])];
        assert_eq!(best_match(&[1.0, 0.0], only_bad, -1.0), MatchResult::NoMatch);
    }

    #[test]
    fn store_errors_abort_the_scan() {
        let records: Vec<Result<EmbeddingRecord, StoreError>> = vec![
            Ok(rec("a.png", &[1.0, 0.0])),
            Err(StoreError::Corrupt {
                offset: 12,
                reason: "bad".into(),
            }),
        ];
        let err = try_best_match(&[1.0, 0.0], records, 0.0).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { offset: 12, .. }));
    }

    #[test]
    fn serializes_with_outcome_tag() {
        let json = serde_json::to_value(MatchResult::NoMatch).unwrap();
        assert_eq!(json, serde_json::json!({ "outcome": "no_match" }));

        let hit = MatchResult::Match {
            record: rec("alice.png", &[1.0]),
            similarity: 1.0,
        };
        let json = serde_json::to_value(hit).unwrap();
        assert_eq!(json["outcome"], "match");
        assert_eq!(json["record"]["identifier"], "alice.png");
    }
}
