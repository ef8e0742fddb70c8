//! The tick-based continuation engine.
//!
//! Each call to [`ContinuationEngine::run_tick`] does at most one REST page
//! fetch and one augmentation call, then hands back the rows it produced and
//! the continuation for the next tick. Two axes of progress are tracked:
//!
//! - **REST pagination**: `next_rest_cursor`, or `scheduled_rest_cursor`
//!   while a page's rows are still being augmented.
//! - **GraphQL batching**: `pending_batch`, sliced into budget-sized batches.
//!
//! ```text
//!            +-------------+   rows left    +-------------+
//!  start --> | FETCH_PAGE  | -------------> | DRAIN_BATCH | --+
//!            +-------------+                +-------------+   |
//!               ^      |  no next page         |   ^    |     | cost exceeded
//!               |      v                       |   |    v     v
//!               |    DONE  <-------------------+   |  +-------------+
//!               +----------- page drained          +--| RETRY_BATCH |
//!                                                     +-------------+
//! ```

use std::sync::Arc;

use url::Url;

use crate::batch::{PendingBatch, extract};
use crate::budget::{Admission, Budget, Deferral, admit};
use crate::client::ShopClient;
use crate::config::SyncSettings;
use crate::continuation::SyncContinuation;
use crate::error::{Result, SyncError};
use crate::graphql::{GraphQlAugmentor, GraphQlBudgetProbe};
use crate::progress::{ProgressCallback, SyncProgress, emit};
use crate::resource::{Row, SyncResource};
use crate::rest::RestPageFetcher;
use crate::traits::{AugmentResult, BatchAugmentor, BudgetProbe, PageFetcher};

/// What one tick produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutcome {
    /// Rows to hand to the consumer, in page order.
    pub rows: Vec<Row>,
    /// Progress for the next tick; `None` once the job is complete.
    pub continuation: Option<SyncContinuation>,
    /// Set when the tick was deferred for budget; the engine never sleeps.
    pub deferral: Option<Deferral>,
}

impl TickOutcome {
    #[inline]
    pub fn is_done(&self) -> bool {
        self.continuation.is_none()
    }
}

/// Everything a tick knows once its rows are in hand.
#[derive(Debug)]
struct TickContext {
    previous: SyncContinuation,
    pool: Vec<Row>,
    /// REST page to visit once `pool` is drained.
    next_cursor: Option<Url>,
}

/// Drives a sync job one tick at a time.
pub struct ContinuationEngine {
    fetcher: Box<dyn PageFetcher>,
    probe: Box<dyn BudgetProbe>,
    augmentor: Box<dyn BatchAugmentor>,
    start_url: Url,
    settings: SyncSettings,
}

impl ContinuationEngine {
    pub fn new(
        fetcher: impl PageFetcher + 'static,
        probe: impl BudgetProbe + 'static,
        augmentor: impl BatchAugmentor + 'static,
        start_url: Url,
        settings: SyncSettings,
    ) -> Self {
        Self {
            fetcher: Box::new(fetcher),
            probe: Box::new(probe),
            augmentor: Box::new(augmentor),
            start_url,
            settings,
        }
    }

    /// Engine for one Shopify resource, backed by the REST and GraphQL Admin APIs.
    ///
    /// The resource's first page gets `limit={rest_page_limit}` unless it
    /// already carries a `limit`.
    pub fn for_resource<R>(client: ShopClient, resource: R, settings: SyncSettings) -> Self
    where
        R: SyncResource + 'static,
    {
        let resource: Arc<dyn SyncResource> = Arc::new(resource);
        let start_url = with_page_limit(resource.rest_page_url(), settings.rest_page_limit);

        Self::new(
            RestPageFetcher::new(client.clone(), Arc::clone(&resource)),
            GraphQlBudgetProbe::new(client.clone()),
            GraphQlAugmentor::new(client, resource),
            start_url,
            settings,
        )
    }

    pub fn start_url(&self) -> &Url {
        &self.start_url
    }

    /// Run one tick. `None` starts a new job.
    pub async fn run_tick(&self, previous: Option<SyncContinuation>) -> Result<TickOutcome> {
        self.run_tick_with_progress(previous, None).await
    }

    /// Run one tick, reporting progress events.
    ///
    /// On error the caller should keep `previous`; it remains a valid
    /// starting point for a later attempt.
    pub async fn run_tick_with_progress(
        &self,
        previous: Option<SyncContinuation>,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<TickOutcome> {
        let outcome = self.tick(previous, on_progress).await?;
        emit(
            on_progress,
            SyncProgress::TickComplete {
                rows: outcome.rows.len(),
                done: outcome.is_done(),
            },
        );
        Ok(outcome)
    }

    async fn tick(
        &self,
        previous: Option<SyncContinuation>,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<TickOutcome> {
        let previous = previous.unwrap_or_else(|| SyncContinuation::start(self.start_url.clone()));
        if previous.is_terminal() {
            tracing::debug!("Continuation is terminal, nothing to do");
            return Ok(TickOutcome::default());
        }

        let augment = self.augmentor.is_required();
        let mut budget = None;
        if augment && previous.last_measured_cost.is_none() && previous.forced_batch_size.is_none()
        {
            match self.admission(on_progress).await? {
                (_, Some(deferral)) => {
                    return Ok(TickOutcome {
                        rows: Vec::new(),
                        continuation: Some(previous),
                        deferral: Some(deferral),
                    });
                }
                (probed, None) => budget = probed,
            }
        }

        let ctx = self.collect_rows(previous, on_progress).await?;

        if !augment {
            tracing::debug!(rows = ctx.pool.len(), "Emitting page without augmentation");
            let continuation = advance_to_next_page(&ctx.previous, ctx.next_cursor);
            return Ok(TickOutcome {
                rows: ctx.pool,
                continuation,
                deferral: None,
            });
        }

        self.augment_batch(ctx, budget.as_ref(), on_progress).await
    }

    /// Probe the budget and decide whether this tick may spend it.
    ///
    /// Missing telemetry lets the tick proceed with default sizing.
    async fn admission(
        &self,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<(Option<Budget>, Option<Deferral>)> {
        let Some(budget) = self.probe.probe().await? else {
            emit(
                on_progress,
                SyncProgress::Warning {
                    message: "Budget probe returned no telemetry; using default batch size"
                        .to_string(),
                },
            );
            return Ok((None, None));
        };

        emit(
            on_progress,
            SyncProgress::BudgetProbed {
                available: budget.available,
                maximum: budget.maximum,
            },
        );

        match admit(&budget, self.settings.default_restore_rate) {
            Admission::Proceed => Ok((Some(budget), None)),
            Admission::Defer(deferral) => {
                tracing::info!(
                    available = budget.available,
                    maximum = budget.maximum,
                    retry_after_secs = deferral.retry_after.as_secs(),
                    "Budget below admission floor, deferring tick"
                );
                emit(
                    on_progress,
                    SyncProgress::Deferred {
                        retry_after: deferral.retry_after,
                    },
                );
                Ok((Some(budget), Some(deferral)))
            }
        }
    }

    /// Build the row pool: pending rows, plus a fresh page unless draining.
    async fn collect_rows(
        &self,
        previous: SyncContinuation,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<TickContext> {
        let next_cursor = previous.due_rest_cursor().cloned();
        let mut pool = previous.pending_batch.clone().into_pool();

        if previous.skip_rest_fetch {
            tracing::debug!(pending = pool.len(), "Draining pending rows");
            return Ok(TickContext {
                previous,
                pool,
                next_cursor,
            });
        }

        let Some(url) = next_cursor else {
            return Ok(TickContext {
                previous,
                pool,
                next_cursor: None,
            });
        };

        let page = self.fetcher.fetch(&url).await?;
        tracing::debug!(
            url = %url,
            count = page.rows.len(),
            has_next = page.next_cursor.is_some(),
            "Fetched REST page"
        );
        emit(
            on_progress,
            SyncProgress::FetchedPage {
                url: url.to_string(),
                count: page.rows.len(),
                has_next: page.next_cursor.is_some(),
            },
        );

        pool.extend(page.rows);
        Ok(TickContext {
            previous,
            pool,
            next_cursor: page.next_cursor,
        })
    }

    async fn augment_batch(
        &self,
        ctx: TickContext,
        budget: Option<&Budget>,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<TickOutcome> {
        let sizing = self.settings.batch_sizing();
        let size = sizing.next_batch_size(
            ctx.previous.forced_batch_size,
            ctx.previous.last_measured_cost,
            ctx.previous.last_batch_size,
            budget,
        );

        let TickContext {
            previous,
            pool,
            next_cursor,
        } = ctx;
        let batch = extract(pool, size);

        if batch.processing.is_empty() {
            return Ok(TickOutcome {
                rows: Vec::new(),
                continuation: advance_to_next_page(&previous, next_cursor),
                deferral: None,
            });
        }

        match self.augmentor.augment(&batch.processing).await {
            Ok(result) => {
                emit(
                    on_progress,
                    SyncProgress::BatchAugmented {
                        batch_size: batch.processing.len(),
                        emitted: result.rows.len(),
                        remaining: batch.remaining.len(),
                        actual_cost: result.cost.map(|c| c.actual_cost),
                    },
                );
                let (rows, continuation) = after_augmented(&previous, batch, result, next_cursor);
                Ok(TickOutcome {
                    rows,
                    continuation,
                    deferral: None,
                })
            }
            Err(SyncError::CostExceeded {
                actual_cost,
                max_cost,
            }) => {
                let batch_size = batch.processing.len();
                let retry_count = previous.retry_count.saturating_add(1);
                if retry_count > self.settings.max_cost_retries {
                    return Err(SyncError::CostRetriesExhausted {
                        attempts: retry_count,
                        batch_size,
                    });
                }

                let next_batch_size = sizing.recovery_batch_size(actual_cost, max_cost, batch_size);
                tracing::warn!(
                    actual_cost,
                    max_cost,
                    batch_size,
                    next_batch_size,
                    retry_count,
                    "Augmentation exceeded cost budget"
                );
                emit(
                    on_progress,
                    SyncProgress::CostExceeded {
                        actual_cost,
                        max_cost,
                        batch_size,
                        next_batch_size,
                        retry_count,
                    },
                );

                Ok(TickOutcome {
                    rows: Vec::new(),
                    continuation: Some(after_cost_exceeded(
                        &previous,
                        batch,
                        next_cursor,
                        next_batch_size,
                    )),
                    deferral: None,
                })
            }
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for ContinuationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContinuationEngine")
            .field("start_url", &self.start_url.as_str())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Continuation for moving on to the next REST page, or `None` when there is none.
fn advance_to_next_page(
    previous: &SyncContinuation,
    next_cursor: Option<Url>,
) -> Option<SyncContinuation> {
    next_cursor.map(|url| SyncContinuation {
        next_rest_cursor: Some(url),
        ..previous.carry_forward()
    })
}

fn after_augmented(
    previous: &SyncContinuation,
    batch: PendingBatch,
    result: AugmentResult,
    next_cursor: Option<Url>,
) -> (Vec<Row>, Option<SyncContinuation>) {
    let last_batch_size = result.cost.map(|_| batch.processing.len());
    let telemetry = SyncContinuation {
        last_measured_cost: result.cost,
        last_batch_size,
        extra: previous.extra.clone(),
        ..SyncContinuation::default()
    };

    let continuation = if !batch.remaining.is_empty() {
        Some(SyncContinuation {
            scheduled_rest_cursor: next_cursor,
            skip_rest_fetch: true,
            graphql_lock: true,
            pending_batch: PendingBatch {
                processing: Vec::new(),
                remaining: batch.remaining,
            },
            ..telemetry
        })
    } else {
        next_cursor.map(|url| SyncContinuation {
            next_rest_cursor: Some(url),
            ..telemetry
        })
    };

    (result.rows, continuation)
}

/// Keep the whole batch for a retry at `forced_batch_size`.
fn after_cost_exceeded(
    previous: &SyncContinuation,
    batch: PendingBatch,
    next_cursor: Option<Url>,
    forced_batch_size: usize,
) -> SyncContinuation {
    SyncContinuation {
        next_rest_cursor: None,
        scheduled_rest_cursor: next_cursor,
        skip_rest_fetch: true,
        graphql_lock: true,
        retry_count: previous.retry_count.saturating_add(1),
        last_measured_cost: previous.last_measured_cost,
        last_batch_size: previous.last_batch_size,
        forced_batch_size: Some(forced_batch_size),
        pending_batch: batch,
        extra: previous.extra.clone(),
    }
}

/// Add `limit` to a collection URL that lacks one.
fn with_page_limit(mut url: Url, limit: u32) -> Url {
    if limit > 0 && !url.query_pairs().any(|(k, _)| k == "limit") {
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string());
    }
    url
}
