//! The cross-tick progress token.
//!
//! A [`SyncContinuation`] is the only state carried between ticks. It is
//! replaced, never mutated in place: each tick derives a fresh value from
//! the previous one plus what happened during the tick.
//!
//! Encoding is JSON. Optional fields are omitted when absent and written
//! when present (including `0`), because absence drives state transitions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::batch::PendingBatch;
use crate::budget::MeasuredCost;
use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncContinuation {
    /// REST page to fetch next; `None` once pagination is exhausted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_rest_cursor: Option<Url>,

    /// A due REST fetch held back while a GraphQL batch drains.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_rest_cursor: Option<Url>,

    /// Set while the next tick must drain `pending_batch` instead of fetching.
    #[serde(default)]
    pub skip_rest_fetch: bool,

    /// Set while the current REST page is in batch-augmentation mode.
    #[serde(default, rename = "graphQlLock")]
    pub graphql_lock: bool,

    /// Consecutive cost overruns for the current batch.
    #[serde(default)]
    pub retry_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_measured_cost: Option<MeasuredCost>,

    /// Batch size that produced `last_measured_cost`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_batch_size: Option<usize>,

    /// One-shot override set by cost-overrun recovery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forced_batch_size: Option<usize>,

    #[serde(default)]
    pub pending_batch: PendingBatch,

    /// Opaque collaborator state, carried through untouched.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl SyncContinuation {
    /// Continuation for a job's first tick, positioned at `first_page`.
    pub fn start(first_page: Url) -> Self {
        Self {
            next_rest_cursor: Some(first_page),
            ..Self::default()
        }
    }

    /// The REST page to fetch when the engine next leaves drain mode.
    ///
    /// A deferred cursor always wins over a fresh one so no page is skipped.
    pub fn due_rest_cursor(&self) -> Option<&Url> {
        self.scheduled_rest_cursor
            .as_ref()
            .or(self.next_rest_cursor.as_ref())
    }

    /// No REST pages, no pending rows and no outstanding retry.
    pub fn is_terminal(&self) -> bool {
        self.due_rest_cursor().is_none() && self.pending_batch.is_empty() && self.retry_count == 0
    }

    /// Fresh continuation that keeps cost telemetry and collaborator state.
    pub(crate) fn carry_forward(&self) -> Self {
        Self {
            last_measured_cost: self.last_measured_cost,
            last_batch_size: self.last_batch_size,
            extra: self.extra.clone(),
            ..Self::default()
        }
    }

    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(SyncError::from)
    }

    pub fn decode(token: &str) -> Result<Self> {
        serde_json::from_str(token).map_err(|e| SyncError::invalid_continuation(e.to_string()))
    }

    /// Encode an optional continuation; `None` stays `None` (job complete).
    pub fn encode_opt(continuation: Option<&Self>) -> Result<Option<String>> {
        continuation.map(Self::encode).transpose()
    }

    /// Decode an optional token; an absent or blank token starts a new job.
    pub fn decode_opt(token: Option<&str>) -> Result<Option<Self>> {
        match token.map(str::trim) {
            None | Some("") => Ok(None),
            Some(t) => Self::decode(t).map(Some),
        }
    }
}
