//! Batched retrieval of items from the item store.
//!
//! Both training and batch inference stream items in bounded pages so the
//! full population never sits in memory at once.

use crate::error::Result;
use crate::items::{ItemStore, LabeledItem, TaggedItem};
use crate::model::ModelKind;

/// Default page size for both labeled and unlabeled retrieval.
pub const DEFAULT_BATCH_SIZE: usize = 200;

/// Stream every trusted-labeled item through the callback, one bounded page
/// at a time. Returns the total number of items visited.
pub fn for_each_labeled<F>(
    store: &dyn ItemStore,
    model: ModelKind,
    batch_size: usize,
    mut visit: F,
) -> Result<u64>
where
    F: FnMut(&LabeledItem),
{
    let batch_size = batch_size.max(1);
    let mut offset = 0u64;
    let mut total = 0u64;
    loop {
        let batch = store.labeled_batch(model, batch_size, offset)?;
        if batch.is_empty() {
            return Ok(total);
        }
        let len = batch.len() as u64;
        for item in &batch {
            visit(item);
        }
        total += len;
        offset += len;
    }
}

/// Keyset-paginated cursor over unlabeled items, ordered by id. Immune to
/// labels being written behind it, unlike offset pagination.
pub struct UnlabeledCursor<'a> {
    store: &'a dyn ItemStore,
    model: ModelKind,
    batch_size: usize,
    after_id: i64,
    remaining: Option<u64>,
}

impl<'a> UnlabeledCursor<'a> {
    pub fn new(
        store: &'a dyn ItemStore,
        model: ModelKind,
        batch_size: usize,
        limit: Option<u64>,
    ) -> Self {
        Self {
            store,
            model,
            batch_size: batch_size.max(1),
            after_id: 0,
            remaining: limit,
        }
    }

    /// Fetch the next page, or `None` when the population (or the configured
    /// limit) is exhausted.
    pub fn next_batch(&mut self) -> Result<Option<Vec<TaggedItem>>> {
        let want = match self.remaining {
            Some(0) => return Ok(None),
            Some(remaining) => (remaining as usize).min(self.batch_size),
            None => self.batch_size,
        };

        let batch = self.store.unlabeled_after(self.model, self.after_id, want)?;
        if batch.is_empty() {
            return Ok(None);
        }

        if let Some(last) = batch.last() {
            self.after_id = last.id;
        }
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= batch.len() as u64;
        }
        Ok(Some(batch))
    }
}
