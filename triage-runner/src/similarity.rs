// Copyright (c) The autotriage Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Propose labels for new failures from similar, already labeled failures.

use crate::{
    config::SimilarityConfig,
    errors::{DisplayErrorChain, IndexError},
    run::RunDocument,
};
use itertools::Itertools;
use std::collections::HashMap;
use tracing::{debug, warn};

/// A labeled historical failure stored in a [`VectorIndex`].
#[derive(Clone, Debug, PartialEq)]
pub struct IndexedFailure {
    /// The label given to the failure.
    pub label: String,

    /// The failure log.
    pub text: String,
}

/// Nearest-neighbor search over labeled failures.
pub trait VectorIndex {
    /// Returns up to `k` failures most similar to `text`, most relevant first, with their
    /// relevance scores.
    fn similarity_search_with_relevance_scores(
        &self,
        text: &str,
        k: usize,
    ) -> Result<Vec<(IndexedFailure, f64)>, IndexError>;
}

/// Proposes labels for failure logs.
pub struct SimilarityLabeler {
    index: Box<dyn VectorIndex>,
    max_candidates: usize,
}

impl SimilarityLabeler {
    /// Creates a labeler over `index`.
    pub fn new(index: Box<dyn VectorIndex>, config: &SimilarityConfig) -> Self {
        Self {
            index,
            max_candidates: config.max_candidates,
        }
    }

    /// Returns up to `max-candidates` distinct labels for `text`, best first.
    ///
    /// Hits with a negative relevance score are dropped. Index errors are logged and produce no
    /// labels.
    pub fn propose(&self, text: Option<&str>) -> Vec<String> {
        let Some(text) = text.map(str::trim).filter(|text| !text.is_empty()) else {
            return Vec::new();
        };

        let hits = match self
            .index
            .similarity_search_with_relevance_scores(text, self.max_candidates)
        {
            Ok(hits) => hits,
            Err(err) => {
                warn!(
                    "similarity search failed, proposing no labels: {}",
                    DisplayErrorChain::new(err)
                );
                return Vec::new();
            }
        };

        let labels: Vec<String> = hits
            .into_iter()
            .filter(|(_, score)| *score >= 0.0)
            .map(|(failure, _)| failure.label)
            .unique()
            .take(self.max_candidates)
            .collect();
        debug!("proposed {} labels", labels.len());
        labels
    }
}

/// An in-process index scoring failures by cosine similarity of their term frequencies.
#[derive(Clone, Debug, Default)]
pub struct TermVectorIndex {
    entries: Vec<TermVector>,
}

#[derive(Clone, Debug)]
struct TermVector {
    failure: IndexedFailure,
    terms: HashMap<String, f64>,
    norm: f64,
}

impl TermVector {
    fn new(text: &str) -> (HashMap<String, f64>, f64) {
        let mut terms: HashMap<String, f64> = HashMap::new();
        for token in tokenize(text) {
            *terms.entry(token).or_default() += 1.0;
        }
        let norm = terms.values().map(|count| count * count).sum::<f64>().sqrt();
        (terms, norm)
    }
}

fn cosine(a: &HashMap<String, f64>, a_norm: f64, b: &HashMap<String, f64>, b_norm: f64) -> f64 {
    let dot: f64 = a
        .iter()
        .filter_map(|(term, count)| b.get(term).map(|other| count * other))
        .sum();
    dot / (a_norm * b_norm)
}

/// Scores how similar two failure logs are, from 0 to 1, by the same term-frequency cosine
/// [`TermVectorIndex`] ranks with.
///
/// Returns `None` if either log has no terms.
pub fn log_similarity(a: &str, b: &str) -> Option<f64> {
    let (a_terms, a_norm) = TermVector::new(a);
    let (b_terms, b_norm) = TermVector::new(b);
    if a_norm == 0.0 || b_norm == 0.0 {
        return None;
    }
    Some(cosine(&a_terms, a_norm, &b_terms, b_norm))
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|token| token.len() > 1)
        .map(str::to_lowercase)
}

impl TermVectorIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an index over the labeled failures in `documents`.
    pub fn from_documents<'a>(documents: impl IntoIterator<Item = &'a RunDocument>) -> Self {
        let mut index = Self::new();
        for document in documents {
            for testcase in &document.testcases {
                if !testcase.status.needs_triage() || testcase.label.is_empty() {
                    continue;
                }
                if let Some(logs) = testcase.logs.as_deref().filter(|logs| !logs.is_empty()) {
                    index.add(&testcase.label, logs);
                }
            }
        }
        debug!("indexed {} labeled failures", index.len());
        index
    }

    /// Adds a labeled failure.
    pub fn add(&mut self, label: impl Into<String>, text: impl Into<String>) {
        let text = text.into();
        let (terms, norm) = TermVector::new(&text);
        if norm == 0.0 {
            return;
        }
        self.entries.push(TermVector {
            failure: IndexedFailure {
                label: label.into(),
                text,
            },
            terms,
            norm,
        });
    }

    /// The number of indexed failures.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl VectorIndex for TermVectorIndex {
    fn similarity_search_with_relevance_scores(
        &self,
        text: &str,
        k: usize,
    ) -> Result<Vec<(IndexedFailure, f64)>, IndexError> {
        let (query, query_norm) = TermVector::new(text);
        if query_norm == 0.0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f64)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| (idx, cosine(&query, query_norm, &entry.terms, entry.norm)))
            .collect();
        // Stable, so ties keep insertion order.
        scored.sort_by(|(_, a), (_, b)| b.total_cmp(a));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(idx, score)| (self.entries[idx].failure.clone(), score))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    struct FixedIndex(Result<Vec<(IndexedFailure, f64)>, IndexError>);

    impl VectorIndex for FixedIndex {
        fn similarity_search_with_relevance_scores(
            &self,
            _text: &str,
            k: usize,
        ) -> Result<Vec<(IndexedFailure, f64)>, IndexError> {
            self.0
                .clone()
                .map(|hits| hits.into_iter().take(k).collect())
        }
    }

    fn hit(label: &str, score: f64) -> (IndexedFailure, f64) {
        (
            IndexedFailure {
                label: label.to_owned(),
                text: String::new(),
            },
            score,
        )
    }

    fn labeler(index: impl VectorIndex + 'static) -> SimilarityLabeler {
        SimilarityLabeler::new(Box::new(index), &SimilarityConfig::default())
    }

    #[test]
    fn drops_negative_scores_and_duplicates() {
        let labeler = labeler(FixedIndex(Ok(vec![
            hit("bgp flap", 0.9),
            hit("bgp flap", 0.8),
            hit("unrelated", -0.1),
            hit("isis", 0.0),
        ])));
        assert_eq!(labeler.propose(Some("session down")), ["bgp flap", "isis"]);
    }

    #[test_case(None; "absent")]
    #[test_case(Some(""); "empty")]
    #[test_case(Some("  \n"); "whitespace")]
    fn no_text_no_labels(text: Option<&str>) {
        let labeler = labeler(FixedIndex(Ok(vec![hit("bgp flap", 0.9)])));
        assert!(labeler.propose(text).is_empty());
    }

    #[test]
    fn index_error_is_no_labels() {
        let labeler = labeler(FixedIndex(Err(IndexError::new("index offline"))));
        assert!(labeler.propose(Some("session down")).is_empty());
    }

    #[test]
    fn empty_corpus_is_no_labels() {
        assert!(labeler(TermVectorIndex::new())
            .propose(Some("session down"))
            .is_empty());
    }

    #[test]
    fn term_index_ranks_by_overlap() {
        let mut index = TermVectorIndex::new();
        index.add("bgp flap", "bgp_test.go:42: BGP session to neighbor went down");
        index.add("isis adjacency", "isis_test.go:88: ISIS adjacency never came up");
        index.add("bgp flap dup", "BGP session to neighbor went down again");
        index.add("empty", "!");
        assert_eq!(index.len(), 3);

        let hits = index
            .similarity_search_with_relevance_scores("BGP session went down", 2)
            .expect("search succeeds");
        let labels: Vec<_> = hits.iter().map(|(failure, _)| failure.label.as_str()).collect();
        assert_eq!(labels, ["bgp flap dup", "bgp flap"]);
        assert!(hits.iter().all(|(_, score)| (0.0..=1.0).contains(score)));

        let labeler = labeler(index);
        assert_eq!(
            labeler.propose(Some("ISIS adjacency down")),
            ["isis adjacency", "bgp flap dup", "bgp flap"]
        );
    }

    #[test]
    fn log_similarity_scores() {
        let log = "bgp_test.go:42: BGP session to neighbor went down";
        let same = log_similarity(log, &log.to_uppercase()).expect("both logs have terms");
        assert!((same - 1.0).abs() < 1e-9, "identical terms score 1, got {same}");

        let unrelated = log_similarity(log, "ISIS adjacency never came up")
            .expect("both logs have terms");
        assert_eq!(unrelated, 0.0);

        let partial = log_similarity(log, "BGP session flapped").expect("both logs have terms");
        assert!(partial > 0.0 && partial < 1.0, "partial overlap, got {partial}");

        assert_eq!(log_similarity(log, ""), None);
        assert_eq!(log_similarity("!", log), None);
    }
}
