//! Core model types: model kinds, label sources, typed weight keys, and the
//! immutable weight snapshot handed to scoring workers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The four fixed rating levels, ordered from least to most restricted.
pub const RATING_LABELS: [&str; 4] = ["general", "sensitive", "questionable", "explicit"];

/// Which classifier a store belongs to. Both kinds share the same schema and
/// algorithms; they differ only in label policy and default thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Content rating: a closed set of four levels.
    Rating,
    /// Character identity: open-ended, labels created on demand.
    Character,
}

impl ModelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rating => "rating",
            Self::Character => "character",
        }
    }

    /// File name of this model's weight store within the data directory.
    pub fn store_file_name(self) -> &'static str {
        match self {
            Self::Rating => "rating_model.db",
            Self::Character => "character_model.db",
        }
    }

    /// Labels that exist before any training data is seen. Empty for the
    /// character model, which creates labels on demand.
    pub fn fixed_labels(self) -> &'static [&'static str] {
        match self {
            Self::Rating => &RATING_LABELS,
            Self::Character => &[],
        }
    }

    /// Default acceptance threshold for a label, used when no
    /// `threshold_<label>` config entry overrides it. Stricter ratings
    /// require more confidence before a machine label sticks.
    pub fn default_label_threshold(self, label: &str) -> f64 {
        match self {
            Self::Rating => match label {
                "general" => 0.50,
                "sensitive" => 0.55,
                "questionable" => 0.60,
                "explicit" => 0.70,
                _ => 0.60,
            },
            Self::Character => 0.60,
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Origin of a label assignment. Only trusted sources feed training; only
/// user assignments count as corrections for staleness tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LabelSource {
    /// A human set or confirmed this label.
    User,
    /// Original upstream metadata carried in at import time.
    Import,
    /// The classifier itself wrote this label.
    AiInference,
}

impl LabelSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Import => "import",
            Self::AiInference => "ai_inference",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "import" => Some(Self::Import),
            "ai_inference" => Some(Self::AiInference),
            _ => None,
        }
    }

    /// Trusted sources are usable as training ground truth. Machine-predicted
    /// labels are excluded to avoid feedback contamination.
    pub fn is_trusted(self) -> bool {
        !matches!(self, Self::AiInference)
    }
}

/// Surrogate key for a tag row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagId(pub i64);

/// Surrogate key for a label row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelId(pub i64);

/// Canonically ordered tag pair. The constructor enforces `first < second`
/// so (a, b) and (b, a) always collapse to one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairKey {
    pub first: TagId,
    pub second: TagId,
}

impl PairKey {
    pub fn new(a: TagId, b: TagId) -> Self {
        if a <= b {
            Self { first: a, second: b }
        } else {
            Self { first: b, second: a }
        }
    }
}

/// Read-only view of a trained model: everything a worker needs to score a
/// tag set without touching the store. Built once per run and shared behind
/// an `Arc`; workers never mutate it.
#[derive(Debug, Clone, Default)]
pub struct WeightSnapshot {
    /// Label id -> display name.
    pub labels: HashMap<LabelId, String>,
    /// Tag name -> id, for resolving incoming tag sets.
    pub tag_ids: HashMap<String, TagId>,
    pub tag_weights: HashMap<(TagId, LabelId), f64>,
    pub pair_weights: HashMap<(PairKey, LabelId), f64>,
    /// Scale factor applied to the pair-weight sum at scoring time.
    pub pair_multiplier: f64,
    /// Global confidence floor.
    pub min_confidence: f64,
    /// Per-label acceptance thresholds (already merged with defaults).
    pub label_thresholds: HashMap<LabelId, f64>,
    /// Pair scoring considers at most this many tags per item (sorted),
    /// bounding pair enumeration at O(n^2).
    pub max_tags_for_pairs: usize,
}

impl WeightSnapshot {
    /// True when training has never populated this model.
    pub fn is_untrained(&self) -> bool {
        self.tag_weights.is_empty() && self.pair_weights.is_empty()
    }

    pub fn label_name(&self, id: LabelId) -> Option<&str> {
        self.labels.get(&id).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_key_canonicalizes_order() {
        let a = TagId(7);
        let b = TagId(3);
        let key = PairKey::new(a, b);
        assert_eq!(key.first, TagId(3));
        assert_eq!(key.second, TagId(7));
        assert_eq!(key, PairKey::new(b, a));
    }

    #[test]
    fn rating_thresholds_tighten_with_severity() {
        let m = ModelKind::Rating;
        assert!(
            m.default_label_threshold("explicit") > m.default_label_threshold("general")
        );
    }

    #[test]
    fn ai_inference_is_not_trusted() {
        assert!(LabelSource::User.is_trusted());
        assert!(LabelSource::Import.is_trusted());
        assert!(!LabelSource::AiInference.is_trusted());
    }

    #[test]
    fn label_source_round_trips_through_str() {
        for source in [LabelSource::User, LabelSource::Import, LabelSource::AiInference] {
            assert_eq!(LabelSource::parse(source.as_str()), Some(source));
        }
        assert_eq!(LabelSource::parse("robot"), None);
    }
}
