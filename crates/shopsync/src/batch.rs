//! Slicing fetched rows into augmentation batches.

use serde::{Deserialize, Serialize};

use crate::resource::Row;

/// Rows fetched from REST but not yet augmented and emitted.
///
/// `processing` is the slice submitted (or about to be resubmitted) to the
/// augmentation call; `remaining` waits for later ticks. Together they form a
/// stable FIFO queue in the page's original item order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PendingBatch {
    #[serde(default)]
    pub processing: Vec<Row>,
    #[serde(default)]
    pub remaining: Vec<Row>,
}

impl PendingBatch {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.processing.is_empty() && self.remaining.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.processing.len() + self.remaining.len()
    }

    /// Collapse back into one ordered pool: `processing ++ remaining`.
    pub fn into_pool(self) -> Vec<Row> {
        let mut pool = self.processing;
        pool.extend(self.remaining);
        pool
    }
}

/// Split `pool` into the first `size` rows and the rest, preserving order.
///
/// A `size` of zero is treated as one so every call makes progress.
pub fn extract(mut pool: Vec<Row>, size: usize) -> PendingBatch {
    let size = size.max(1);
    let remaining = if pool.len() > size {
        pool.split_off(size)
    } else {
        Vec::new()
    };
    PendingBatch {
        processing: pool,
        remaining,
    }
}
