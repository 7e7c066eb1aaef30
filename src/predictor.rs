//! Scoring and prediction.
//!
//! A [`Predictor`] owns an immutable weight snapshot and turns a tag set
//! into per-label scores, softmax probabilities, and an accept/reject
//! decision. Scoring is pure: persistence is always the caller's business.

use std::collections::HashMap;
use std::sync::Arc;

use serde::ser::{Serialize, SerializeStruct, Serializer};

use crate::model::{LabelId, PairKey, TagId, WeightSnapshot};

/// Outcome of scoring one tag set.
#[derive(Debug, Clone)]
pub struct Prediction {
    /// Accepted label, or `None` when the best candidate fell below its
    /// threshold. The confidence is retained either way.
    pub label: Option<String>,
    pub confidence: f64,
    /// Full probability distribution by label name.
    pub probabilities: HashMap<String, f64>,
}

impl Prediction {
    pub fn labeled(&self) -> bool {
        self.label.is_some()
    }
}

// Machine output carries an explicit `labeled` flag so consumers never have
// to infer acceptance from a null label.
impl Serialize for Prediction {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("Prediction", 4)?;
        state.serialize_field("labeled", &self.labeled())?;
        state.serialize_field("label", &self.label)?;
        state.serialize_field("confidence", &self.confidence)?;
        state.serialize_field("probabilities", &self.probabilities)?;
        state.end()
    }
}

/// Scores tag sets against a fixed weight snapshot.
#[derive(Debug, Clone)]
pub struct Predictor {
    snapshot: Arc<WeightSnapshot>,
}

impl Predictor {
    pub fn new(snapshot: Arc<WeightSnapshot>) -> Self {
        Self { snapshot }
    }

    pub fn snapshot(&self) -> &WeightSnapshot {
        &self.snapshot
    }

    /// Raw per-label scores: the sum of single-tag weights over all tags,
    /// plus the scaled sum of pair weights over unordered pairs of the first
    /// `max_tags_for_pairs` tags (sorted). The cap bounds pair enumeration
    /// at O(n^2); tags beyond it still contribute single-tag weight.
    pub fn score(&self, tags: &[String]) -> HashMap<LabelId, f64> {
        let snapshot = &*self.snapshot;
        let mut scores: HashMap<LabelId, f64> =
            snapshot.labels.keys().map(|id| (*id, 0.0)).collect();

        let tag_ids: Vec<TagId> = {
            let mut names: Vec<&String> = tags.iter().collect();
            names.sort();
            names.dedup();
            names
                .into_iter()
                .filter_map(|name| snapshot.tag_ids.get(name).copied())
                .collect()
        };

        for label in snapshot.labels.keys() {
            let mut score = 0.0;
            for tag in &tag_ids {
                if let Some(weight) = snapshot.tag_weights.get(&(*tag, *label)) {
                    score += weight;
                }
            }

            if !snapshot.pair_weights.is_empty() {
                let capped = &tag_ids[..tag_ids.len().min(snapshot.max_tags_for_pairs)];
                let mut pair_score = 0.0;
                for i in 0..capped.len() {
                    for j in (i + 1)..capped.len() {
                        let key = PairKey::new(capped[i], capped[j]);
                        if let Some(weight) = snapshot.pair_weights.get(&(key, *label)) {
                            pair_score += weight;
                        }
                    }
                }
                score += snapshot.pair_multiplier * pair_score;
            }

            scores.insert(*label, score);
        }
        scores
    }

    /// Score, normalize, and apply thresholds.
    pub fn predict(&self, tags: &[String]) -> Prediction {
        let snapshot = &*self.snapshot;
        if snapshot.labels.is_empty() {
            return Prediction {
                label: None,
                confidence: 0.0,
                probabilities: HashMap::new(),
            };
        }

        let scores = self.score(tags);
        let probabilities = softmax(&scores);

        // Highest probability wins; ties break on label name so the result
        // is deterministic.
        let (best_id, confidence) = probabilities
            .iter()
            .max_by(|a, b| {
                a.1.partial_cmp(b.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| {
                        let a_name = snapshot.label_name(*a.0).unwrap_or_default();
                        let b_name = snapshot.label_name(*b.0).unwrap_or_default();
                        b_name.cmp(a_name)
                    })
            })
            .map(|(id, p)| (*id, *p))
            .expect("non-empty label set");

        let best_name = snapshot
            .label_name(best_id)
            .unwrap_or_default()
            .to_string();
        let threshold = snapshot
            .label_thresholds
            .get(&best_id)
            .copied()
            .unwrap_or(snapshot.min_confidence)
            .max(snapshot.min_confidence);

        let by_name = probabilities
            .iter()
            .filter_map(|(id, p)| snapshot.label_name(*id).map(|name| (name.to_string(), *p)))
            .collect();

        Prediction {
            label: (confidence >= threshold).then_some(best_name),
            confidence,
            probabilities: by_name,
        }
    }
}

/// Softmax with max-subtraction for numerical stability. An empty score map
/// yields an empty distribution; a uniform score map yields a uniform one.
pub fn softmax(scores: &HashMap<LabelId, f64>) -> HashMap<LabelId, f64> {
    if scores.is_empty() {
        return HashMap::new();
    }
    let max = scores
        .values()
        .fold(f64::NEG_INFINITY, |acc, v| acc.max(*v));
    let exps: HashMap<LabelId, f64> = scores
        .iter()
        .map(|(id, score)| (*id, (score - max).exp()))
        .collect();
    let sum: f64 = exps.values().sum();
    exps.into_iter().map(|(id, e)| (id, e / sum)).collect()
}
