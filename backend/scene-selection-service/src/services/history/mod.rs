use crate::models::{CandidateItem, HistoryRecord};
use crate::services::features::{FeatureVector, Vectorize};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Append-only rating log, the preference model's training set.
///
/// Re-rating the same block appends another sample instead of replacing the
/// old one, so recent feedback gains weight as the log grows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryStore {
    records: Vec<HistoryRecord>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record for every rated candidate; returns how many were added.
    pub fn append_rated(&mut self, candidates: &[CandidateItem]) -> usize {
        let before = self.records.len();
        self.records
            .extend(candidates.iter().filter_map(HistoryRecord::from_candidate));
        let added = self.records.len() - before;

        debug!(added = added, total = self.records.len(), "History appended");
        added
    }

    pub fn records(&self) -> &[HistoryRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// (features, rating) pairs over the whole log.
    pub fn training_pairs(&self) -> Vec<(FeatureVector, f64)> {
        self.records
            .iter()
            .map(|r| (r.vectorize(), r.rating.as_f64()))
            .collect()
    }
}
