//! Weight training.
//!
//! Computes log-likelihood-ratio weights for individual tags and for frequent
//! tag pairs from trusted-labeled items, then replaces the weight tables
//! wholesale. Training is idempotent and non-incremental: the same labeled
//! data always produces the same weights.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use itertools::Itertools;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::ClassifierConfig;
use crate::error::{Result, TagwiseError};
use crate::items::ItemStore;
use crate::loader::{self, DEFAULT_BATCH_SIZE};
use crate::model::ModelKind;
use crate::staleness;
use crate::store::{PairWeightRow, TagWeightRow, WeightStore};

/// Floor applied to probabilities before taking the log, so a zero count
/// yields a large finite weight instead of an infinity.
pub const EPSILON: f64 = 1e-10;

/// Hard-coded significance floor: weights this close to zero carry no signal
/// and are dropped regardless of the configurable pruning threshold.
pub const SIGNIFICANCE_FLOOR: f64 = 0.01;

/// Summary of one completed training run.
#[derive(Debug, Clone, Serialize)]
pub struct TrainReport {
    pub training_samples: u64,
    pub unique_tags: u64,
    pub unique_pairs: u64,
    pub tag_weights_count: u64,
    pub pair_weights_count: u64,
    pub duration_seconds: f64,
}

/// Train the model from every trusted-labeled item in the item store.
///
/// Fails with [`TagwiseError::InsufficientData`] before any state is written
/// when fewer than `min_training_samples` labeled items exist.
pub fn train(
    store: &mut WeightStore,
    items: &dyn ItemStore,
    cfg: &ClassifierConfig,
) -> Result<TrainReport> {
    let model = store.model();
    let started = Instant::now();

    let have = items.count_labeled(model)?;
    let need = cfg.min_training_samples();
    if have < need {
        return Err(TagwiseError::InsufficientData { have, need });
    }

    info!(model = %model, samples = have, "training started");

    // Pass 1: per-label, per-tag and per-(tag, label) counts.
    let counts = collect_counts(items, model)?;

    // Labels are created on first use, even when every weight row for them
    // ends up pruned; scoring needs the full label set.
    for label in counts.label_counts.keys() {
        store.intern_label(label)?;
    }

    let pruning = cfg.pruning_threshold();
    let tag_rows = tag_weight_rows(&counts, pruning);

    // Pass 2: mine frequent pairs, then weight them with the same formula.
    let frequent: HashSet<String> = counts
        .tag_counts
        .iter()
        .filter(|(_, count)| **count >= cfg.min_tag_frequency())
        .map(|(tag, _)| tag.clone())
        .collect();
    let pairs = collect_pair_counts(items, model, &frequent)?;
    let kept_pairs = select_frequent_pairs(
        &pairs,
        cfg.min_pair_cooccurrence(),
        cfg.max_pair_count(),
    );
    let pair_rows = pair_weight_rows(&counts, &pairs, &kept_pairs, pruning);

    let (tag_weights_count, pair_weights_count) = store.replace_weights(&tag_rows, &pair_rows)?;

    let now = chrono::Utc::now().to_rfc3339();
    store.metadata_set("last_trained_at", &now)?;
    store.metadata_set("training_samples", &counts.total.to_string())?;
    store.metadata_set("unique_tags", &counts.tag_counts.len().to_string())?;
    store.metadata_set("unique_pairs", &kept_pairs.len().to_string())?;
    staleness::reset_pending_corrections(store)?;

    let report = TrainReport {
        training_samples: counts.total,
        unique_tags: counts.tag_counts.len() as u64,
        unique_pairs: kept_pairs.len() as u64,
        tag_weights_count: tag_weights_count as u64,
        pair_weights_count: pair_weights_count as u64,
        duration_seconds: started.elapsed().as_secs_f64(),
    };
    info!(
        model = %model,
        tag_weights = report.tag_weights_count,
        pair_weights = report.pair_weights_count,
        "training finished"
    );
    Ok(report)
}

#[derive(Debug, Default)]
struct TrainingCounts {
    total: u64,
    label_counts: HashMap<String, u64>,
    tag_counts: HashMap<String, u64>,
    tag_label_counts: HashMap<(String, String), u64>,
}

fn collect_counts(items: &dyn ItemStore, model: ModelKind) -> Result<TrainingCounts> {
    let mut counts = TrainingCounts::default();
    loader::for_each_labeled(items, model, DEFAULT_BATCH_SIZE, |item| {
        counts.total += 1;
        *counts.label_counts.entry(item.label.clone()).or_default() += 1;
        for tag in &item.tags {
            *counts.tag_counts.entry(tag.clone()).or_default() += 1;
            *counts
                .tag_label_counts
                .entry((tag.clone(), item.label.clone()))
                .or_default() += 1;
        }
    })?;
    Ok(counts)
}

#[derive(Debug, Default)]
struct PairCounts {
    /// Canonical (a < b by name) pair -> total co-occurrence.
    totals: HashMap<(String, String), u64>,
    /// (pair, label) -> co-occurrence among items with that label.
    by_label: HashMap<((String, String), String), u64>,
}

fn collect_pair_counts(
    items: &dyn ItemStore,
    model: ModelKind,
    frequent: &HashSet<String>,
) -> Result<PairCounts> {
    let mut pairs = PairCounts::default();
    if frequent.is_empty() {
        return Ok(pairs);
    }

    loader::for_each_labeled(items, model, DEFAULT_BATCH_SIZE, |item| {
        let mut tags: Vec<&String> = item
            .tags
            .iter()
            .filter(|tag| frequent.contains(*tag))
            .collect();
        tags.sort();
        tags.dedup();

        for (a, b) in tags.iter().tuple_combinations() {
            let key = ((*a).clone(), (*b).clone());
            *pairs.totals.entry(key.clone()).or_default() += 1;
            *pairs
                .by_label
                .entry((key, item.label.clone()))
                .or_default() += 1;
        }
    })?;
    Ok(pairs)
}

/// Pairs co-occurring often enough, capped to the top `max_pairs` by
/// co-occurrence. Ties break on the pair name for deterministic output.
fn select_frequent_pairs(
    pairs: &PairCounts,
    min_cooccurrence: u64,
    max_pairs: usize,
) -> Vec<(String, String)> {
    let mut candidates: Vec<(&(String, String), u64)> = pairs
        .totals
        .iter()
        .filter(|(_, count)| **count >= min_cooccurrence)
        .map(|(key, count)| (key, *count))
        .collect();
    candidates.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    candidates.truncate(max_pairs);
    candidates.into_iter().map(|(key, _)| key.clone()).collect()
}

/// `ln(p_given / p_not_given)` with both probabilities floored at EPSILON.
fn log_likelihood_ratio(with: u64, label_count: u64, without: u64, rest_count: u64) -> f64 {
    let p_given = floored_ratio(with, label_count);
    let p_not_given = floored_ratio(without, rest_count);
    (p_given / p_not_given).ln()
}

fn floored_ratio(num: u64, denom: u64) -> f64 {
    if denom == 0 {
        return EPSILON;
    }
    (num as f64 / denom as f64).max(EPSILON)
}

fn tag_weight_rows(counts: &TrainingCounts, pruning: f64) -> Vec<TagWeightRow> {
    let mut rows = Vec::new();
    for (label, label_count) in &counts.label_counts {
        let rest_count = counts.total - label_count;
        for (tag, tag_count) in &counts.tag_counts {
            let with = counts
                .tag_label_counts
                .get(&(tag.clone(), label.clone()))
                .copied()
                .unwrap_or(0);
            let without = tag_count - with;
            let weight = log_likelihood_ratio(with, *label_count, without, rest_count);
            if weight.abs() <= SIGNIFICANCE_FLOOR || weight.abs() < pruning {
                continue;
            }
            rows.push(TagWeightRow {
                tag: tag.clone(),
                label: label.clone(),
                weight,
                sample_count: with as i64,
            });
        }
    }
    debug!(rows = rows.len(), "computed tag weight rows");
    rows
}

fn pair_weight_rows(
    counts: &TrainingCounts,
    pairs: &PairCounts,
    kept: &[(String, String)],
    pruning: f64,
) -> Vec<PairWeightRow> {
    let mut rows = Vec::new();
    for pair in kept {
        let total = pairs.totals.get(pair).copied().unwrap_or(0);
        for (label, label_count) in &counts.label_counts {
            let rest_count = counts.total - label_count;
            let with = pairs
                .by_label
                .get(&(pair.clone(), label.clone()))
                .copied()
                .unwrap_or(0);
            let without = total - with;
            let weight = log_likelihood_ratio(with, *label_count, without, rest_count);
            if weight.abs() <= SIGNIFICANCE_FLOOR || weight.abs() < pruning {
                continue;
            }
            rows.push(PairWeightRow {
                tag1: pair.0.clone(),
                tag2: pair.1.clone(),
                label: label.clone(),
                weight,
                co_occurrence_count: with as i64,
            });
        }
    }
    debug!(rows = rows.len(), "computed pair weight rows");
    rows
}
