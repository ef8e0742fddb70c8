//! Progress events for ticks and update batches.
//!
//! Callers that only want log output can pass [`logging_callback`]; anything
//! richer (progress bars, metrics) receives the raw [`SyncProgress`] stream.

use std::time::Duration;

/// Progress events emitted while a tick or an update batch runs.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum SyncProgress {
    /// A REST page was fetched and mapped.
    FetchedPage {
        url: String,
        count: usize,
        /// Whether the API advertised a further page.
        has_next: bool,
    },

    /// Budget headroom was read before the job's first augmentation.
    BudgetProbed { available: u32, maximum: u32 },

    /// Admission control declined to spend budget this tick.
    Deferred { retry_after: Duration },

    /// An augmentation batch succeeded.
    BatchAugmented {
        batch_size: usize,
        emitted: usize,
        remaining: usize,
        actual_cost: Option<u32>,
    },

    /// An augmentation batch was refused for cost; it will be retried smaller.
    CostExceeded {
        actual_cost: u32,
        max_cost: u32,
        batch_size: usize,
        next_batch_size: usize,
        retry_count: u32,
    },

    /// One update in a batch succeeded.
    UpdateApplied { key: String },

    /// One update in a batch failed; siblings continue.
    UpdateFailed { key: String, error: String },

    /// A tick finished.
    TickComplete {
        rows: usize,
        /// `true` when the job has no further ticks.
        done: bool,
    },

    /// Non-fatal problem worth surfacing.
    Warning { message: String },
}

/// Callback receiving progress events.
pub type ProgressCallback = Box<dyn Fn(SyncProgress) + Send + Sync>;

/// Emit a progress event if a callback is provided.
#[inline]
pub fn emit(on_progress: Option<&ProgressCallback>, event: SyncProgress) {
    if let Some(cb) = on_progress {
        cb(event);
    }
}

/// A callback that forwards every event to `tracing`.
pub fn logging_callback() -> ProgressCallback {
    Box::new(log_event)
}

fn log_event(event: SyncProgress) {
    match event {
        SyncProgress::FetchedPage {
            url,
            count,
            has_next,
        } => {
            tracing::debug!(url = %url, count, has_next, "Fetched page");
        }

        SyncProgress::BudgetProbed { available, maximum } => {
            tracing::debug!(available, maximum, "Probed cost budget");
        }

        SyncProgress::Deferred { retry_after } => {
            tracing::info!(retry_after_secs = retry_after.as_secs(), "Deferred tick, budget too low");
        }

        SyncProgress::BatchAugmented {
            batch_size,
            emitted,
            remaining,
            actual_cost,
        } => {
            tracing::debug!(batch_size, emitted, remaining, actual_cost = ?actual_cost, "Augmented batch");
        }

        SyncProgress::CostExceeded {
            actual_cost,
            max_cost,
            batch_size,
            next_batch_size,
            retry_count,
        } => {
            tracing::warn!(
                actual_cost,
                max_cost,
                batch_size,
                next_batch_size,
                retry_count,
                "Query cost exceeded, shrinking batch"
            );
        }

        SyncProgress::UpdateApplied { key } => {
            tracing::debug!(key = %key, "Applied update");
        }

        SyncProgress::UpdateFailed { key, error } => {
            tracing::warn!(key = %key, error = %error, "Update failed");
        }

        SyncProgress::TickComplete { rows, done } => {
            tracing::info!(rows, done, "Tick complete");
        }

        SyncProgress::Warning { message } => {
            tracing::warn!(message = %message, "Warning");
        }
    }
}
