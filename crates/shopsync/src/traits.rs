use async_trait::async_trait;
use url::Url;

use crate::budget::{Budget, MeasuredCost};
use crate::error::Result;
use crate::resource::Row;

/// One REST page, already mapped to rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub rows: Vec<Row>,
    /// `rel="next"` target, if the API advertised one.
    pub next_cursor: Option<Url>,
}

/// Augmented rows plus the telemetry of the call that produced them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AugmentResult {
    /// Rows present in the response, in the order of the submitted batch.
    pub rows: Vec<Row>,
    /// `None` when the response carried no cost block.
    pub cost: Option<MeasuredCost>,
}

/// Fetches one REST page.
///
/// Failures surface as remote request errors; implementations never retry.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Page>;
}

/// Reads current GraphQL budget headroom.
#[async_trait]
pub trait BudgetProbe: Send + Sync {
    /// `Ok(None)` means the API answered without cost telemetry.
    async fn probe(&self) -> Result<Option<Budget>>;
}

/// Enriches a batch of rows with one GraphQL call.
///
/// A call that would overrun the budget fails with
/// [`SyncError::CostExceeded`](crate::error::SyncError::CostExceeded) and does
/// no partial work.
#[async_trait]
pub trait BatchAugmentor: Send + Sync {
    /// Whether this job needs augmentation at all.
    fn is_required(&self) -> bool;

    async fn augment(&self, batch: &[Row]) -> Result<AugmentResult>;
}
