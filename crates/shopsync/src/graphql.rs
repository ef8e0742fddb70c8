//! GraphQL envelope parsing, cost telemetry, and the GraphQL-backed
//! [`BudgetProbe`] and [`BatchAugmentor`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::budget::{Budget, MeasuredCost};
use crate::client::ShopClient;
use crate::error::{Result, SyncError};
use crate::resource::{GraphQlRequest, Row, SyncResource};
use crate::traits::{AugmentResult, BatchAugmentor, BudgetProbe};

const MAX_COST_EXCEEDED: &str = "MAX_COST_EXCEEDED";
const THROTTLED: &str = "THROTTLED";

/// Cheapest query that still reports `extensions.cost`.
const BUDGET_PROBE_QUERY: &str = "{ shop { id } }";

/// Top-level GraphQL response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphQlResponse {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub errors: Vec<GraphQlErrorEntry>,
    #[serde(default)]
    pub extensions: Option<ResponseExtensions>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphQlErrorEntry {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub extensions: Option<Value>,
}

impl GraphQlErrorEntry {
    pub fn code(&self) -> Option<&str> {
        self.extensions.as_ref()?.get("code")?.as_str()
    }

    fn extension_number(&self, key: &str) -> Option<f64> {
        self.extensions.as_ref()?.get(key)?.as_f64()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseExtensions {
    #[serde(default)]
    pub cost: Option<QueryCost>,
}

/// `extensions.cost`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryCost {
    #[serde(default)]
    pub requested_query_cost: Option<f64>,
    /// `null` when the query was not executed.
    #[serde(default)]
    pub actual_query_cost: Option<f64>,
    #[serde(default)]
    pub throttle_status: Option<ThrottleStatus>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThrottleStatus {
    pub maximum_available: f64,
    pub currently_available: f64,
    #[serde(default)]
    pub restore_rate: f64,
}

#[inline]
fn points(value: f64) -> u32 {
    // `as` saturates and maps NaN to zero.
    value.max(0.0).floor() as u32
}

fn cost_pair(cost: Option<f64>, max: Option<f64>) -> (u32, u32) {
    match (cost, max) {
        (Some(cost), Some(max)) => (points(cost), points(max)),
        (Some(known), None) | (None, Some(known)) => (points(known), points(known)),
        (None, None) => (1, 1),
    }
}

impl GraphQlResponse {
    pub fn cost(&self) -> Option<&QueryCost> {
        self.extensions.as_ref()?.cost.as_ref()
    }

    fn throttle_status(&self) -> Option<ThrottleStatus> {
        self.cost()?.throttle_status
    }

    /// Budget headroom reported by the throttle status, if any.
    pub fn budget(&self) -> Option<Budget> {
        let status = self.throttle_status()?;
        let budget = Budget::new(
            points(status.currently_available),
            points(status.maximum_available),
        );
        Some(if status.restore_rate > 0.0 {
            budget.with_restore_rate(status.restore_rate)
        } else {
            budget
        })
    }

    /// Telemetry for an executed query: actual cost against the bucket size.
    pub fn measured_cost(&self) -> Option<MeasuredCost> {
        let actual = self.cost()?.actual_query_cost?;
        let status = self.throttle_status()?;
        Some(MeasuredCost {
            actual_cost: points(actual),
            max_cost: points(status.maximum_available),
        })
    }

    /// `(cost, max_cost)` when the query was refused for budget reasons.
    ///
    /// `MAX_COST_EXCEEDED` carries both numbers in the error extensions. A
    /// `THROTTLED` refusal compares the requested cost with what is currently
    /// available. The error code alone decides the classification; missing
    /// numbers fall back to an equal pair, which shrinks the next batch by the
    /// recovery factor only.
    pub fn cost_exceeded(&self) -> Option<(u32, u32)> {
        let requested = self.cost().and_then(|c| c.requested_query_cost);
        let status = self.throttle_status();

        self.errors.iter().find_map(|error| match error.code()? {
            MAX_COST_EXCEEDED => {
                let cost = error.extension_number("cost").or(requested);
                let max = error
                    .extension_number("maxCost")
                    .or(status.map(|s| s.maximum_available));
                Some(cost_pair(cost, max))
            }
            THROTTLED => Some(cost_pair(
                requested,
                status.map(|s| s.currently_available),
            )),
            _ => None,
        })
    }

    /// Unwrap `data`, classifying any errors.
    pub fn into_data(self) -> Result<Value> {
        if let Some((actual_cost, max_cost)) = self.cost_exceeded() {
            return Err(SyncError::CostExceeded {
                actual_cost,
                max_cost,
            });
        }

        if !self.errors.is_empty() {
            let message = self
                .errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(SyncError::graphql(message));
        }

        self.data
            .ok_or_else(|| SyncError::graphql("response carried neither data nor errors"))
    }
}

/// [`BudgetProbe`] backed by a trivial `shop` query.
#[derive(Debug, Clone)]
pub struct GraphQlBudgetProbe {
    client: ShopClient,
}

impl GraphQlBudgetProbe {
    pub fn new(client: ShopClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BudgetProbe for GraphQlBudgetProbe {
    async fn probe(&self) -> Result<Option<Budget>> {
        let response = self
            .client
            .graphql(&GraphQlRequest::new(BUDGET_PROBE_QUERY))
            .await?;

        if !response.errors.is_empty() {
            tracing::debug!(errors = response.errors.len(), "Budget probe returned errors");
        }

        let budget = response.budget();
        if budget.is_none() {
            tracing::debug!("Budget probe response had no throttle status");
        }
        Ok(budget)
    }
}

/// [`BatchAugmentor`] that fetches each row's node by global id.
pub struct GraphQlAugmentor {
    client: ShopClient,
    resource: Arc<dyn SyncResource>,
}

impl GraphQlAugmentor {
    pub fn new(client: ShopClient, resource: Arc<dyn SyncResource>) -> Self {
        Self { client, resource }
    }

    /// Sorted, duplicate-free global ids for a batch.
    pub fn graphql_ids(&self, batch: &[Row]) -> Vec<String> {
        let mut ids: Vec<String> = batch
            .iter()
            .map(|row| self.resource.graphql_id(&row.id))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

#[async_trait]
impl BatchAugmentor for GraphQlAugmentor {
    fn is_required(&self) -> bool {
        self.resource.supports_augmentation()
    }

    async fn augment(&self, batch: &[Row]) -> Result<AugmentResult> {
        if batch.is_empty() {
            return Ok(AugmentResult::default());
        }

        let ids = self.graphql_ids(batch);
        let request = self.resource.augmentation_request(&ids);
        let response = self.client.graphql(&request).await?;
        let cost = response.measured_cost();
        let data = response.into_data()?;

        let nodes: HashMap<&str, &Value> = self
            .resource
            .augmentation_nodes(&data)
            .into_iter()
            .filter_map(|node| Some((node.get("id")?.as_str()?, node)))
            .collect();

        let mut rows = Vec::with_capacity(batch.len());
        for row in batch {
            let gid = self.resource.graphql_id(&row.id);
            match nodes.get(gid.as_str()) {
                Some(node) => rows.push(self.resource.merge_augmentation(row.clone(), node)),
                None => tracing::debug!(id = %row.id, "Row missing from augmentation response"),
            }
        }

        tracing::debug!(
            requested = ids.len(),
            returned = nodes.len(),
            emitted = rows.len(),
            actual_cost = cost.map(|c| c.actual_cost),
            "Augmented batch"
        );

        Ok(AugmentResult { rows, cost })
    }
}

impl std::fmt::Debug for GraphQlAugmentor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphQlAugmentor")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}
