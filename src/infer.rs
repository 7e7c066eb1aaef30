//! Batch inference orchestrator.
//!
//! Streams unlabeled items in bounded batches, fans each batch out to a pool
//! of worker threads that score against a shared immutable snapshot, then
//! persists accepted labels once per batch. Workers never touch the store;
//! only the orchestrator writes. A panicking chunk is logged and skipped,
//! never fatal to the run.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::error::{Result, TagwiseError};
use crate::items::{ItemStore, TaggedItem};
use crate::loader::UnlabeledCursor;
use crate::model::{LabelSource, ModelKind, WeightSnapshot};
use crate::predictor::{Prediction, Predictor};

/// Options for one batch-inference run.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Items fetched from the item store per page.
    pub batch_size: usize,
    /// Worker threads scoring each page.
    pub workers: usize,
    /// Stop after this many items, if set.
    pub limit: Option<u64>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: 200,
            workers: std::thread::available_parallelism()
                .map(std::num::NonZero::get)
                .unwrap_or(1),
            limit: None,
        }
    }
}

/// Summary of one batch-inference run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InferReport {
    /// Items pulled from the unlabeled population.
    pub processed: u64,
    /// Items that received a label.
    pub labeled: u64,
    /// Items scored but below their label's threshold; left unlabeled.
    pub skipped_low_confidence: u64,
    /// Items lost to failed worker chunks; left unlabeled.
    pub failed: u64,
    /// Accepted labels by name.
    pub by_label: HashMap<String, u64>,
    pub duration_seconds: f64,
}

/// Incremental progress signal: (processed, total).
pub type ProgressFn<'a> = dyn Fn(u64, u64) + Send + Sync + 'a;

/// Classify every unlabeled item of the given model, bounded by
/// `options.limit` when set.
pub fn run(
    items: &dyn ItemStore,
    model: ModelKind,
    snapshot: Arc<WeightSnapshot>,
    options: &BatchOptions,
    progress: Option<&ProgressFn<'_>>,
) -> Result<InferReport> {
    let predictor = Predictor::new(snapshot);
    run_with_scorer(
        items,
        model,
        Arc::new(move |item: &TaggedItem| predictor.predict(&item.tags)),
        options,
        progress,
    )
}

/// The orchestrator proper, generic over the per-item scorer so chunk
/// failure handling can be driven without a faulty snapshot.
pub(crate) fn run_with_scorer<S>(
    items: &dyn ItemStore,
    model: ModelKind,
    scorer: Arc<S>,
    options: &BatchOptions,
    progress: Option<&ProgressFn<'_>>,
) -> Result<InferReport>
where
    S: Fn(&TaggedItem) -> Prediction + Send + Sync + 'static,
{
    let started = Instant::now();
    let unlabeled = items.count_unlabeled(model)?;
    let total = options.limit.map_or(unlabeled, |l| l.min(unlabeled));

    let mut report = InferReport::default();
    if total == 0 {
        report.duration_seconds = started.elapsed().as_secs_f64();
        return Ok(report);
    }

    info!(model = %model, total, workers = options.workers, "batch inference started");

    let mut cursor = UnlabeledCursor::new(items, model, options.batch_size, options.limit);
    while let Some(batch) = cursor.next_batch()? {
        let batch_len = batch.len() as u64;
        let results = score_batch(batch, Arc::clone(&scorer), options.workers.max(1));

        let mut accepted: Vec<(i64, Prediction)> = Vec::new();
        for outcome in results {
            match outcome {
                ChunkOutcome::Scored(scored) => {
                    for (item_id, prediction) in scored {
                        report.processed += 1;
                        if prediction.labeled() {
                            accepted.push((item_id, prediction));
                        } else {
                            report.skipped_low_confidence += 1;
                        }
                    }
                }
                ChunkOutcome::Failed { items, error } => {
                    warn!(items, %error, "inference chunk failed, items left unlabeled");
                    report.processed += items;
                    report.failed += items;
                }
            }
            if let Some(progress) = progress {
                progress(report.processed, total);
            }
        }

        // One persistence pass per batch bounds write amplification.
        for (item_id, prediction) in accepted {
            let label = prediction.label.as_deref().unwrap_or_default();
            items.write_label(
                model,
                item_id,
                Some(label),
                LabelSource::AiInference,
                Some(prediction.confidence),
            )?;
            *report.by_label.entry(label.to_string()).or_default() += 1;
            report.labeled += 1;
        }
        debug!(batch = batch_len, labeled = report.labeled, "batch persisted");
    }

    report.duration_seconds = started.elapsed().as_secs_f64();
    info!(
        model = %model,
        processed = report.processed,
        labeled = report.labeled,
        skipped = report.skipped_low_confidence,
        failed = report.failed,
        "batch inference finished"
    );
    Ok(report)
}

enum ChunkOutcome {
    Scored(Vec<(i64, Prediction)>),
    Failed { items: u64, error: TagwiseError },
}

/// Split a batch into per-worker chunks and score them in parallel. Each
/// worker gets its own `Arc` handle to the scorer; no shared mutable state.
/// A panicking chunk surfaces as [`TagwiseError::WorkerFailure`].
fn score_batch<S>(batch: Vec<TaggedItem>, scorer: Arc<S>, workers: usize) -> Vec<ChunkOutcome>
where
    S: Fn(&TaggedItem) -> Prediction + Send + Sync + 'static,
{
    let chunk_size = (batch.len() / workers).max(1);
    let chunks: Vec<Vec<TaggedItem>> = batch
        .chunks(chunk_size)
        .map(<[TaggedItem]>::to_vec)
        .collect();

    let (sender, receiver) = crossbeam_channel::unbounded();
    let mut handles = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let scorer = Arc::clone(&scorer);
        let sender = sender.clone();
        handles.push(std::thread::spawn(move || {
            let len = chunk.len() as u64;
            let outcome = match catch_unwind(AssertUnwindSafe(|| {
                let score = scorer.as_ref();
                chunk
                    .iter()
                    .map(|item| (item.id, score(item)))
                    .collect::<Vec<(i64, Prediction)>>()
            })) {
                Ok(scored) => ChunkOutcome::Scored(scored),
                Err(panic) => ChunkOutcome::Failed {
                    items: len,
                    error: TagwiseError::WorkerFailure(panic_message(panic.as_ref())),
                },
            };
            // The receiver outlives all workers; a send failure means the
            // orchestrator is gone and there is nothing left to report to.
            let _ = sender.send(outcome);
        }));
    }
    drop(sender);

    let outcomes: Vec<ChunkOutcome> = receiver.iter().collect();
    for handle in handles {
        let _ = handle.join();
    }
    outcomes
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "worker panicked".to_string()
    }
}
