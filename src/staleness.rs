//! Correction tracking and retrain signalling.
//!
//! Every human-sourced label change bumps a counter in model metadata;
//! machine-applied labels never do. Once the counter reaches the configured
//! threshold the model is considered stale and retraining should be offered
//! or auto-triggered. Training resets the counter.

use tracing::debug;

use crate::error::Result;
use crate::store::WeightStore;

pub const PENDING_CORRECTIONS_KEY: &str = "pending_corrections";

/// Corrections accumulated since the last training run.
pub fn pending_corrections(store: &WeightStore) -> Result<u64> {
    let raw = store.metadata_get(PENDING_CORRECTIONS_KEY)?;
    Ok(raw.and_then(|v| v.parse().ok()).unwrap_or(0))
}

/// Record one user-sourced correction. Returns the new count.
pub fn record_correction(store: &WeightStore) -> Result<u64> {
    let next = pending_corrections(store)? + 1;
    store.metadata_set(PENDING_CORRECTIONS_KEY, &next.to_string())?;
    debug!(pending = next, "recorded user correction");
    Ok(next)
}

/// Zero the counter, called on training completion.
pub fn reset_pending_corrections(store: &WeightStore) -> Result<()> {
    store.metadata_set(PENDING_CORRECTIONS_KEY, "0")?;
    Ok(())
}

/// True when accumulated corrections have reached the threshold.
pub fn is_stale(store: &WeightStore, threshold: u64) -> Result<bool> {
    if threshold == 0 {
        return Ok(false);
    }
    Ok(pending_corrections(store)? >= threshold)
}
