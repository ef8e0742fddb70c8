//! End-to-end ticks against an in-memory shop speaking the Admin API wire format.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};
use shopsync::http::{HttpMethod, header_get};
use shopsync::{
    ContinuationEngine, GraphQlRequest, HttpError, HttpRequest, HttpResponse, HttpTransport,
    RequestBuilder, Row, RowMapper, ShopClient, SyncContinuation, SyncSettings, TickOutcome,
    client::admin_base_url, resource::id_from_value,
};
use url::Url;

const SHOP: &str = "test-shop.myshopify.com";
const PRODUCTS_PATH: &str = "/admin/api/2024-10/products.json";
const GRAPHQL_PATH: &str = "/admin/api/2024-10/graphql.json";
const COST_PER_ID: usize = 5;

struct ShopState {
    product_ids: Vec<u64>,
    /// Largest `nodes(ids:)` list accepted before `MAX_COST_EXCEEDED`.
    max_ids_per_query: usize,
    currently_available: f64,
    requests: Vec<HttpRequest>,
}

#[derive(Clone)]
struct FakeShop {
    state: Arc<Mutex<ShopState>>,
}

impl FakeShop {
    fn new(product_count: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(ShopState {
                product_ids: (1..=product_count).map(|i| 1000 + i).collect(),
                max_ids_per_query: usize::MAX,
                currently_available: 1000.0,
                requests: Vec::new(),
            })),
        }
    }

    fn with_max_ids_per_query(self, max: usize) -> Self {
        self.state.lock().unwrap().max_ids_per_query = max;
        self
    }

    fn with_available(self, available: f64) -> Self {
        self.state.lock().unwrap().currently_available = available;
        self
    }

    fn requests(&self) -> Vec<HttpRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    fn product_ids(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.product_ids.iter().map(u64::to_string).collect()
    }

    fn client(&self) -> ShopClient {
        ShopClient::new_with_transport(
            admin_base_url(SHOP, "2024-10").unwrap(),
            "shpat_integration",
            None,
            Arc::new(self.clone()),
        )
    }
}

fn json_response(body: Value, headers: Vec<(String, String)>) -> HttpResponse {
    HttpResponse {
        status: 200,
        headers,
        body: body.to_string().into_bytes(),
    }
}

fn cost_extensions(requested: usize, actual: Option<usize>, available: f64) -> Value {
    json!({
        "cost": {
            "requestedQueryCost": requested,
            "actualQueryCost": actual,
            "throttleStatus": {
                "maximumAvailable": 1000.0,
                "currentlyAvailable": available,
                "restoreRate": 50.0
            }
        }
    })
}

impl ShopState {
    fn products_page(&self, url: &Url) -> HttpResponse {
        let query: HashMap<String, String> = url.query_pairs().into_owned().collect();
        let limit: usize = query.get("limit").and_then(|l| l.parse().ok()).unwrap_or(50);
        let offset: usize = query
            .get("page_info")
            .and_then(|p| p.parse().ok())
            .unwrap_or(0);

        let items: Vec<Value> = self
            .product_ids
            .iter()
            .skip(offset)
            .take(limit)
            .map(|id| json!({"id": id, "title": format!("Product {id}")}))
            .collect();

        let mut headers = Vec::new();
        if offset + limit < self.product_ids.len() {
            headers.push((
                "Link".to_string(),
                format!(
                    "<https://{SHOP}{PRODUCTS_PATH}?limit={limit}&page_info={}>; rel=\"next\"",
                    offset + limit
                ),
            ));
        }
        json_response(json!({ "products": items }), headers)
    }

    fn graphql(&self, body: &[u8]) -> HttpResponse {
        let request: Value = serde_json::from_slice(body).unwrap_or(Value::Null);
        let query = request["query"].as_str().unwrap_or_default();

        if !query.contains("nodes") {
            return json_response(
                json!({
                    "data": {"shop": {"id": "gid://shopify/Shop/1"}},
                    "extensions": cost_extensions(1, Some(1), self.currently_available)
                }),
                Vec::new(),
            );
        }

        let ids: Vec<&str> = request["variables"]["ids"]
            .as_array()
            .map(|ids| ids.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        let cost = ids.len() * COST_PER_ID;

        if ids.len() > self.max_ids_per_query {
            return json_response(
                json!({
                    "errors": [{
                        "message": format!("Query cost is {cost}, which exceeds the single query max cost limit"),
                        "extensions": {
                            "code": "MAX_COST_EXCEEDED",
                            "cost": cost,
                            "maxCost": self.max_ids_per_query * COST_PER_ID
                        }
                    }]
                }),
                Vec::new(),
            );
        }

        let nodes: Vec<Value> = ids
            .iter()
            .map(|gid| {
                json!({
                    "id": gid,
                    "metafields": {"edges": [{"node": {
                        "namespace": "custom",
                        "key": "source",
                        "value": gid,
                        "type": "single_line_text_field"
                    }}]}
                })
            })
            .collect();

        json_response(
            json!({
                "data": {"nodes": nodes},
                "extensions": cost_extensions(cost, Some(cost), 1000.0 - cost as f64)
            }),
            Vec::new(),
        )
    }
}

#[async_trait]
impl HttpTransport for FakeShop {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let url = Url::parse(&request.url).map_err(|e| HttpError::Transport(e.to_string()))?;
        let mut state = self.state.lock().unwrap();
        state.requests.push(request.clone());

        let response = match (request.method, url.path()) {
            (HttpMethod::Get, PRODUCTS_PATH) => state.products_page(&url),
            (HttpMethod::Post, GRAPHQL_PATH) => state.graphql(&request.body),
            _ => HttpResponse {
                status: 404,
                headers: Vec::new(),
                body: b"{\"errors\":\"Not Found\"}".to_vec(),
            },
        };
        Ok(response)
    }
}

struct Products {
    page_limit: usize,
}

impl RowMapper for Products {
    fn map_row(&self, raw: &Value) -> Option<Row> {
        let id = id_from_value(raw.get("id")?)?;
        Some(Row::new(id).with_field("title", raw.get("title").cloned().unwrap_or(Value::Null)))
    }
}

impl RequestBuilder for Products {
    fn rest_page_url(&self) -> Url {
        Url::parse(&format!(
            "https://{SHOP}{PRODUCTS_PATH}?limit={}",
            self.page_limit
        ))
        .unwrap()
    }

    fn rest_collection_key(&self) -> &str {
        "products"
    }

    fn supports_augmentation(&self) -> bool {
        true
    }

    fn graphql_id(&self, row_id: &str) -> String {
        format!("gid://shopify/Product/{row_id}")
    }

    fn augmentation_request(&self, graphql_ids: &[String]) -> GraphQlRequest {
        GraphQlRequest::new(
            "query Augment($ids: [ID!]!) { nodes(ids: $ids) { id ... on Product { \
             metafields(first: 10) { edges { node { namespace key value type } } } } } }",
        )
        .with_variables(json!({ "ids": graphql_ids }))
    }
}

fn engine(shop: &FakeShop, default_batch_size: usize) -> ContinuationEngine {
    engine_with_page_limit(shop, default_batch_size, 4)
}

fn engine_with_page_limit(
    shop: &FakeShop,
    default_batch_size: usize,
    page_limit: usize,
) -> ContinuationEngine {
    ContinuationEngine::for_resource(
        shop.client(),
        Products { page_limit },
        SyncSettings {
            default_batch_size,
            ..SyncSettings::default()
        },
    )
}

/// Tick until done, persisting the continuation as a string between ticks.
async fn run_to_completion(engine: &ContinuationEngine) -> (Vec<Row>, usize) {
    let mut token: Option<String> = None;
    let mut rows = Vec::new();

    for tick in 1..=200 {
        let previous = SyncContinuation::decode_opt(token.as_deref()).unwrap();
        let TickOutcome {
            rows: emitted,
            continuation,
            deferral,
        } = engine.run_tick(previous).await.unwrap();
        assert!(deferral.is_none());
        rows.extend(emitted);

        token = SyncContinuation::encode_opt(continuation.as_ref()).unwrap();
        if token.is_none() {
            return (rows, tick);
        }
    }
    panic!("sync did not terminate");
}

fn sorted_ids(rows: &[Row]) -> Vec<String> {
    let mut ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
    ids.sort();
    ids
}

#[tokio::test]
async fn test_uninterrupted_sync_emits_every_product_once() {
    let shop = FakeShop::new(10);
    let (rows, _) = run_to_completion(&engine(&shop, 3)).await;

    let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
    assert_eq!(ids, shop.product_ids());
    for row in &rows {
        let metafields = row.get("metafields").and_then(Value::as_array).unwrap();
        assert_eq!(
            metafields[0]["value"],
            format!("gid://shopify/Product/{}", row.id)
        );
    }
}

#[tokio::test]
async fn test_lost_ticks_do_not_change_the_result() {
    let shop = FakeShop::new(11);
    let (expected, _) = run_to_completion(&engine(&shop, 3)).await;

    // Every other tick "crashes" after running: its rows and continuation are
    // discarded and the tick is replayed from the last persisted token.
    let engine = engine(&shop, 3);
    let mut token: Option<String> = None;
    let mut committed = Vec::new();
    let mut attempts = 0;

    loop {
        attempts += 1;
        assert!(attempts < 400, "sync did not terminate");

        let previous = SyncContinuation::decode_opt(token.as_deref()).unwrap();
        let outcome = engine.run_tick(previous).await.unwrap();
        if attempts % 2 == 0 {
            continue;
        }

        committed.extend(outcome.rows);
        token = SyncContinuation::encode_opt(outcome.continuation.as_ref()).unwrap();
        if token.is_none() {
            break;
        }
    }

    assert_eq!(sorted_ids(&committed), sorted_ids(&expected));
    assert_eq!(committed, expected);
}

#[tokio::test]
async fn test_cost_overruns_recover_and_complete() {
    let shop = FakeShop::new(12).with_max_ids_per_query(4);
    let (rows, ticks) = run_to_completion(&engine_with_page_limit(&shop, 10, 12)).await;

    let mut expected = shop.product_ids();
    expected.sort();
    assert_eq!(sorted_ids(&rows), expected);

    let refused = shop
        .requests()
        .iter()
        .filter(|r| r.method == HttpMethod::Post)
        .filter(|r| {
            let body: Value = serde_json::from_slice(&r.body).unwrap();
            body["variables"]["ids"].as_array().map_or(0, Vec::len) > 4
        })
        .count();
    assert!(refused >= 1);
    assert!(ticks > 3);
}

#[tokio::test]
async fn test_low_budget_defers_first_tick() {
    let shop = FakeShop::new(5).with_available(10.0);
    let engine = engine(&shop, 3);

    let outcome = engine.run_tick(None).await.unwrap();
    assert!(outcome.rows.is_empty());
    let deferral = outcome.deferral.expect("deferral hint");
    assert_eq!(deferral.retry_after.as_secs(), 20);

    let continuation = outcome.continuation.expect("job is not finished");
    assert_eq!(continuation.next_rest_cursor.as_ref(), Some(engine.start_url()));
    assert!(
        shop.requests().iter().all(|r| r.method == HttpMethod::Post),
        "no REST page may be fetched while deferred"
    );
}

#[tokio::test]
async fn test_requests_carry_access_token() {
    let shop = FakeShop::new(2);
    run_to_completion(&engine(&shop, 3)).await;

    let requests = shop.requests();
    assert!(!requests.is_empty());
    for request in requests {
        assert_eq!(
            header_get(&request.headers, "x-shopify-access-token"),
            Some("shpat_integration")
        );
    }
}
