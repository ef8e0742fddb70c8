//! Concurrent write batches.
//!
//! Each operation is an independent GraphQL mutation. All of them run to
//! completion; one item's failure never cancels its siblings.

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::Semaphore;

use crate::client::ShopClient;
use crate::config::HttpConfig;
use crate::error::{Result, SyncError, UserError};
use crate::progress::{ProgressCallback, SyncProgress, emit};
use crate::resource::GraphQlRequest;

const METAFIELDS_SET_MUTATION: &str = "mutation MetafieldsSet($metafields: [MetafieldsSetInput!]!) { \
metafieldsSet(metafields: $metafields) { metafields { id namespace key } userErrors { field message } } }";

/// One mutation in an update batch.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOperation {
    /// Caller's handle for the item, echoed in the outcome.
    pub key: String,
    /// Top-level field of `data` holding the mutation payload.
    pub payload_key: String,
    pub request: GraphQlRequest,
}

impl UpdateOperation {
    pub fn new(
        key: impl Into<String>,
        payload_key: impl Into<String>,
        request: GraphQlRequest,
    ) -> Self {
        Self {
            key: key.into(),
            payload_key: payload_key.into(),
            request,
        }
    }

    /// `metafieldsSet` for one owner; `metafields` is a `[MetafieldsSetInput!]` array.
    pub fn metafields_set(key: impl Into<String>, metafields: Value) -> Self {
        Self::new(
            key,
            "metafieldsSet",
            GraphQlRequest::new(METAFIELDS_SET_MUTATION)
                .with_variables(json!({ "metafields": metafields })),
        )
    }
}

/// Result for one operation.
#[derive(Debug)]
pub struct UpdateOutcome {
    pub key: String,
    /// The mutation payload on success.
    pub result: Result<Value>,
}

impl UpdateOutcome {
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Summary of an update batch; `outcomes` follows submission order.
#[derive(Debug, Default)]
pub struct UpdateReport {
    pub applied: usize,
    pub failed: usize,
    pub outcomes: Vec<UpdateOutcome>,
}

impl UpdateReport {
    pub fn failures(&self) -> impl Iterator<Item = &UpdateOutcome> {
        self.outcomes.iter().filter(|o| !o.is_ok())
    }
}

/// Run every operation with at most `concurrency` in flight.
pub async fn run_updates(
    client: &ShopClient,
    operations: Vec<UpdateOperation>,
    concurrency: usize,
) -> UpdateReport {
    run_updates_with_progress(client, operations, concurrency, None).await
}

/// [`run_updates`] with the in-flight limit taken from `http.update_concurrency`.
pub async fn run_updates_with_config(
    client: &ShopClient,
    operations: Vec<UpdateOperation>,
    http: &HttpConfig,
) -> UpdateReport {
    run_updates(client, operations, http.update_concurrency).await
}

pub async fn run_updates_with_progress(
    client: &ShopClient,
    operations: Vec<UpdateOperation>,
    concurrency: usize,
    on_progress: Option<&ProgressCallback>,
) -> UpdateReport {
    let mut report = UpdateReport::default();
    if operations.is_empty() {
        return report;
    }

    let concurrency = concurrency.clamp(1, operations.len());
    let semaphore = Arc::new(Semaphore::new(concurrency));
    tracing::debug!(count = operations.len(), concurrency, "Submitting update batch");

    let mut handles = Vec::with_capacity(operations.len());
    for operation in operations {
        let client = client.clone();
        let semaphore = Arc::clone(&semaphore);
        let key = operation.key.clone();

        let handle = tokio::spawn(async move {
            let _permit = match semaphore.acquire().await {
                Ok(permit) => permit,
                Err(_) => return Err(SyncError::internal("Semaphore closed unexpectedly")),
            };
            apply(&client, &operation).await
        });

        handles.push((key, handle));
    }

    for (key, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(SyncError::internal(format!("Update task failed: {e}"))),
        };

        match &result {
            Ok(_) => {
                report.applied += 1;
                emit(on_progress, SyncProgress::UpdateApplied { key: key.clone() });
            }
            Err(e) => {
                report.failed += 1;
                emit(
                    on_progress,
                    SyncProgress::UpdateFailed {
                        key: key.clone(),
                        error: e.to_string(),
                    },
                );
            }
        }
        report.outcomes.push(UpdateOutcome { key, result });
    }

    tracing::info!(applied = report.applied, failed = report.failed, "Update batch complete");
    report
}

async fn apply(client: &ShopClient, operation: &UpdateOperation) -> Result<Value> {
    let data = client.graphql(&operation.request).await?.into_data()?;
    let payload = data
        .get(&operation.payload_key)
        .filter(|p| !p.is_null())
        .cloned()
        .ok_or_else(|| {
            SyncError::graphql(format!("response has no `{}` payload", operation.payload_key))
        })?;

    let errors = user_errors(&payload)?;
    if !errors.is_empty() {
        return Err(SyncError::RemoteUser { errors });
    }
    Ok(payload)
}

fn user_errors(payload: &Value) -> Result<Vec<UserError>> {
    match payload.get("userErrors") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(errors) => Ok(serde_json::from_value(errors.clone())?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::admin_base_url;
    use crate::http::{HttpMethod, HttpResponse, MockTransport};

    const GRAPHQL_URL: &str = "https://demo.myshopify.com/admin/api/2024-10/graphql.json";

    fn client(transport: &MockTransport) -> ShopClient {
        ShopClient::new_with_transport(
            admin_base_url("demo.myshopify.com", "2024-10").unwrap(),
            "shpat_test",
            None,
            Arc::new(transport.clone()),
        )
    }

    fn metafield(owner: u32) -> Value {
        json!([{
            "ownerId": format!("gid://shopify/Product/{owner}"),
            "namespace": "custom",
            "key": "color",
            "type": "single_line_text_field",
            "value": "red"
        }])
    }

    #[tokio::test]
    async fn test_each_outcome_is_collected_independently() {
        let transport = MockTransport::new();
        // Responses for one URL are served FIFO; concurrency 1 keeps them in order.
        transport.push_json(
            HttpMethod::Post,
            GRAPHQL_URL,
            json!({"data": {"metafieldsSet": {"metafields": [{"id": "gid://shopify/Metafield/1"}], "userErrors": []}}}),
            Vec::new(),
        );
        transport.push_json(
            HttpMethod::Post,
            GRAPHQL_URL,
            json!({"data": {"metafieldsSet": {"metafields": null, "userErrors": [
                {"field": ["metafields", "0", "value"], "message": "is invalid"}
            ]}}}),
            Vec::new(),
        );
        transport.push_response(
            HttpMethod::Post,
            GRAPHQL_URL,
            HttpResponse {
                status: 502,
                headers: Vec::new(),
                body: b"Bad Gateway".to_vec(),
            },
        );
        transport.push_json(
            HttpMethod::Post,
            GRAPHQL_URL,
            json!({"data": {"metafieldsSet": {"metafields": [], "userErrors": []}}}),
            Vec::new(),
        );

        let operations = (1..=4)
            .map(|i| UpdateOperation::metafields_set(format!("product-{i}"), metafield(i)))
            .collect();
        let report = run_updates(&client(&transport), operations, 1).await;

        assert_eq!(report.applied, 2);
        assert_eq!(report.failed, 2);
        let keys: Vec<&str> = report.outcomes.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, ["product-1", "product-2", "product-3", "product-4"]);

        match &report.outcomes[1].result {
            Err(SyncError::RemoteUser { errors }) => {
                assert_eq!(errors[0].to_string(), "metafields.0.value: is invalid");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(matches!(
            report.outcomes[2].result,
            Err(SyncError::RemoteRequest { status: 502, .. })
        ));
        assert!(report.outcomes[3].is_ok());
        assert_eq!(report.failures().count(), 2);
    }

    #[tokio::test]
    async fn test_configured_concurrency_bounds_the_batch() {
        let transport = MockTransport::new();
        transport.push_json(
            HttpMethod::Post,
            GRAPHQL_URL,
            json!({"data": {"metafieldsSet": {"userErrors": [{"field": null, "message": "Owner not found"}]}}}),
            Vec::new(),
        );
        transport.push_json(
            HttpMethod::Post,
            GRAPHQL_URL,
            json!({"data": {"metafieldsSet": {"userErrors": []}}}),
            Vec::new(),
        );

        let http = HttpConfig {
            update_concurrency: 1,
            ..HttpConfig::default()
        };
        let operations = vec![
            UpdateOperation::metafields_set("missing", metafield(1)),
            UpdateOperation::metafields_set("present", metafield(2)),
        ];
        let report = run_updates_with_config(&client(&transport), operations, &http).await;

        assert_eq!((report.applied, report.failed), (1, 1));
        assert!(matches!(
            report.outcomes[0].result,
            Err(SyncError::RemoteUser { .. })
        ));
        assert!(report.outcomes[1].is_ok());
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_payload_is_an_error() {
        let transport = MockTransport::new();
        transport.push_json(HttpMethod::Post, GRAPHQL_URL, json!({"data": {}}), Vec::new());

        let report = run_updates(
            &client(&transport),
            vec![UpdateOperation::metafields_set("p", metafield(1))],
            4,
        )
        .await;
        assert_eq!(report.failed, 1);
        assert!(matches!(report.outcomes[0].result, Err(SyncError::GraphQl { .. })));
    }

    #[tokio::test]
    async fn test_empty_batch_sends_nothing() {
        let transport = MockTransport::new();
        let report = run_updates(&client(&transport), Vec::new(), 4).await;
        assert_eq!(report.applied + report.failed, 0);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_progress_reports_each_item() {
        let transport = MockTransport::new();
        for _ in 0..3 {
            transport.push_json(
                HttpMethod::Post,
                GRAPHQL_URL,
                json!({"data": {"metafieldsSet": {"userErrors": []}}}),
                Vec::new(),
            );
        }

        let applied = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&applied);
        let callback: ProgressCallback = Box::new(move |event| {
            if let SyncProgress::UpdateApplied { .. } = event {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        });

        let operations = (1..=3)
            .map(|i| UpdateOperation::metafields_set(i.to_string(), metafield(i)))
            .collect();
        let report =
            run_updates_with_progress(&client(&transport), operations, 3, Some(&callback)).await;

        assert_eq!(report.applied, 3);
        assert_eq!(applied.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[test]
    fn test_metafields_set_request_shape() {
        let op = UpdateOperation::metafields_set("p", metafield(7));
        assert_eq!(op.payload_key, "metafieldsSet");
        assert!(op.request.query.contains("metafieldsSet(metafields: $metafields)"));
        assert_eq!(
            op.request.variables["metafields"][0]["ownerId"],
            "gid://shopify/Product/7"
        );
    }
}
