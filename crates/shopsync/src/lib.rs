//! Shopsync - incremental, tick-based sync for the Shopify Admin API.
//!
//! A sync job pages through a REST collection and, when the resource needs
//! it, enriches every row with data from the cost-metered GraphQL API. Work
//! is split into short ticks: each tick takes the previous
//! [`SyncContinuation`], does one bounded step, and returns rows plus the next
//! continuation. Interrupting and resuming a job from any returned
//! continuation yields the same rows as an uninterrupted run.
//!
//! # Example
//!
//! ```ignore
//! use shopsync::{Config, ContinuationEngine, ShopClient, SyncContinuation};
//!
//! let config = Config::load();
//! let client = ShopClient::from_config(&config)?;
//! let engine = ContinuationEngine::for_resource(client, Products, config.sync.clone());
//!
//! let previous = SyncContinuation::decode_opt(stored_token.as_deref())?;
//! let outcome = engine.run_tick(previous).await?;
//! sink.write(outcome.rows);
//! let next_token = SyncContinuation::encode_opt(outcome.continuation.as_ref())?;
//! ```

pub mod batch;
pub mod budget;
pub mod client;
pub mod config;
pub mod continuation;
pub mod engine;
pub mod error;
pub mod graphql;
pub mod http;
pub mod pagination;
pub mod progress;
pub mod rate_limit;
pub mod resource;
pub mod rest;
pub mod traits;
pub mod update;

pub use batch::{PendingBatch, extract};
pub use budget::{Admission, BatchSizing, Budget, Deferral, MeasuredCost, admit};
pub use client::ShopClient;
pub use config::{Config, SyncSettings};
pub use continuation::SyncContinuation;
pub use engine::{ContinuationEngine, TickOutcome};
pub use error::{Result, SyncError, UserError, short_error_message};
pub use graphql::{GraphQlAugmentor, GraphQlBudgetProbe, GraphQlResponse};
pub use http::{HttpError, HttpRequest, HttpResponse, HttpTransport};
pub use progress::{ProgressCallback, SyncProgress, emit, logging_callback};
pub use rate_limit::{ApiRateLimiter, rate_limits};
pub use resource::{GraphQlRequest, RequestBuilder, Row, RowMapper, SyncResource};
pub use rest::RestPageFetcher;
pub use traits::{AugmentResult, BatchAugmentor, BudgetProbe, Page, PageFetcher};
pub use update::{
    UpdateOperation, UpdateOutcome, UpdateReport, run_updates, run_updates_with_config,
};
