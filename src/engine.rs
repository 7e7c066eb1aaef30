//! Classifier engine service object.
//!
//! [`ClassifierEngine`] owns one model's weight store and a handle to the
//! item collection, and exposes the operations collaborators consume:
//! train, infer one, infer all, stats, and the single label-mutation entry
//! point. There is no ambient global state; callers hold the engine.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::config::{ClassifierConfig, Settings};
use crate::error::{Result, TagwiseError};
use crate::infer::{self, BatchOptions, InferReport, ProgressFn};
use crate::items::{ItemStore, SqliteItemStore};
use crate::jobs::{JobTracker, spawn};
use crate::model::{LabelSource, ModelKind};
use crate::predictor::{Prediction, Predictor};
use crate::staleness;
use crate::store::WeightStore;
use crate::trainer::{self, TrainReport};

/// Result of a [`ClassifierEngine::set_label`] call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelChange {
    pub old_label: Option<String>,
    pub new_label: Option<String>,
}

/// Everything `get_stats` reports.
#[derive(Debug, Clone, Serialize)]
pub struct ModelStats {
    pub model: ModelKind,
    pub trained: bool,
    pub metadata: HashMap<String, String>,
    pub config: HashMap<String, f64>,
    pub label_distribution: HashMap<String, u64>,
    pub pending_corrections: u64,
    pub stale: bool,
    pub unlabeled_count: u64,
}

/// Outcome of the nuclear recovery path.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryReport {
    pub cleared_machine_labels: u64,
    pub train: TrainReport,
    pub infer: InferReport,
}

pub struct ClassifierEngine {
    store: WeightStore,
    items: Box<dyn ItemStore>,
    batch: BatchOptions,
}

impl std::fmt::Debug for ClassifierEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassifierEngine")
            .field("model", &self.store.model())
            .finish_non_exhaustive()
    }
}

impl ClassifierEngine {
    pub fn new(store: WeightStore, items: Box<dyn ItemStore>) -> Self {
        Self {
            store,
            items,
            batch: BatchOptions::default(),
        }
    }

    /// Open both stores at the paths the settings dictate.
    pub fn open(settings: &Settings, model: ModelKind) -> Result<Self> {
        let store = WeightStore::open(settings.weight_store_path(model), model)?;
        let items = SqliteItemStore::open(settings.items_path())?;
        let mut engine = Self::new(store, Box::new(items));
        engine.batch = BatchOptions {
            batch_size: settings.batch_size,
            workers: settings.effective_workers(),
            limit: None,
        };
        Ok(engine)
    }

    pub fn model(&self) -> ModelKind {
        self.store.model()
    }

    pub fn store(&self) -> &WeightStore {
        &self.store
    }

    pub fn items(&self) -> &dyn ItemStore {
        self.items.as_ref()
    }

    pub fn set_batch_options(&mut self, batch: BatchOptions) {
        self.batch = batch;
    }

    /// Retrain from all trusted-labeled items. Replaces every weight row and
    /// resets the pending-correction counter.
    pub fn train(&mut self) -> Result<TrainReport> {
        let cfg = ClassifierConfig::load(&self.store)?;
        trainer::train(&mut self.store, self.items.as_ref(), &cfg)
    }

    /// Classify one item, persisting the label when accepted.
    pub fn infer_one(&self, item_id: i64) -> Result<Prediction> {
        let tags = self
            .items
            .item_tags(item_id)?
            .ok_or(TagwiseError::ItemNotFound(item_id))?;

        let snapshot = self.store.load_snapshot()?;
        if snapshot.is_untrained() {
            return Err(TagwiseError::ModelNotTrained);
        }

        let prediction = Predictor::new(Arc::new(snapshot)).predict(&tags);
        if let Some(label) = prediction.label.as_deref() {
            self.items.write_label(
                self.model(),
                item_id,
                Some(label),
                LabelSource::AiInference,
                Some(prediction.confidence),
            )?;
        }
        Ok(prediction)
    }

    /// Classify every unlabeled item with the configured worker pool.
    pub fn infer_all(&self, progress: Option<&ProgressFn<'_>>) -> Result<InferReport> {
        let snapshot = self.store.load_snapshot()?;
        if snapshot.is_untrained() {
            return Err(TagwiseError::ModelNotTrained);
        }
        infer::run(
            self.items.as_ref(),
            self.model(),
            Arc::new(snapshot),
            &self.batch,
            progress,
        )
    }

    /// Change or clear an item's label. The sole mutation entry point for
    /// item labels; prior label tags are always cleared first. User-sourced
    /// calls bump the correction counter, machine-sourced calls never do.
    pub fn set_label(
        &self,
        item_id: i64,
        label: Option<&str>,
        source: LabelSource,
        confidence: Option<f64>,
    ) -> Result<LabelChange> {
        if let Some(label) = label {
            let fixed = self.model().fixed_labels();
            if !fixed.is_empty() && !fixed.contains(&label) {
                return Err(TagwiseError::UnknownLabel(label.to_string()));
            }
        }

        let old_label = self
            .items
            .current_label(self.model(), item_id)?
            .map(|assignment| assignment.label);
        self.items
            .write_label(self.model(), item_id, label, source, confidence)?;

        if source == LabelSource::User {
            staleness::record_correction(&self.store)?;
        }

        Ok(LabelChange {
            old_label,
            new_label: label.map(str::to_string),
        })
    }

    pub fn pending_corrections(&self) -> Result<u64> {
        staleness::pending_corrections(&self.store)
    }

    pub fn is_stale(&self) -> Result<bool> {
        let cfg = ClassifierConfig::load(&self.store)?;
        staleness::is_stale(&self.store, cfg.staleness_threshold())
    }

    pub fn get_stats(&self) -> Result<ModelStats> {
        let cfg = ClassifierConfig::load(&self.store)?;
        let metadata = self.store.metadata_all()?;
        let trained = metadata.contains_key("last_trained_at");
        Ok(ModelStats {
            model: self.model(),
            trained,
            config: cfg.effective(),
            label_distribution: self.items.label_distribution(self.model())?,
            pending_corrections: staleness::pending_corrections(&self.store)?,
            stale: staleness::is_stale(&self.store, cfg.staleness_threshold())?,
            unlabeled_count: self.items.count_unlabeled(self.model())?,
            metadata,
        })
    }

    /// Disaster recovery: clear every machine-applied label, retrain from
    /// trusted data, and re-infer the whole unlabeled population.
    pub fn recover(&mut self, progress: Option<&ProgressFn<'_>>) -> Result<RecoveryReport> {
        let cleared = self.items.clear_machine_labels(self.model())?;
        info!(model = %self.model(), cleared, "cleared machine labels for recovery");
        let train = self.train()?;
        let infer = self.infer_all(progress)?;
        Ok(RecoveryReport {
            cleared_machine_labels: cleared,
            train,
            infer,
        })
    }
}

/// Run training as a polled background job. The job opens its own engine so
/// the caller's connections stay free.
pub fn spawn_train(tracker: &JobTracker, settings: Settings, model: ModelKind) -> String {
    spawn(tracker, &format!("train_{model}"), move |handle| {
        handle.progress(0.0, "loading training data");
        let mut engine = ClassifierEngine::open(&settings, model)?;
        let report = engine.train()?;
        handle.progress(100.0, "training complete");
        Ok(serde_json::to_value(report)?)
    })
}

/// Run batch inference as a polled background job.
pub fn spawn_infer_all(
    tracker: &JobTracker,
    settings: Settings,
    model: ModelKind,
    limit: Option<u64>,
) -> String {
    spawn(tracker, &format!("infer_all_{model}"), move |handle| {
        let mut engine = ClassifierEngine::open(&settings, model)?;
        engine.set_batch_options(BatchOptions {
            batch_size: settings.batch_size.max(1),
            workers: settings.effective_workers(),
            limit,
        });

        let report = engine.infer_all(Some(&|processed, total| {
            let percent = if total == 0 {
                100.0
            } else {
                (processed as f32 / total as f32) * 100.0
            };
            handle.progress(percent, &format!("{processed}/{total} items"));
        }))?;
        Ok(serde_json::to_value(report)?)
    })
}
