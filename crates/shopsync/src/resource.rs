//! Rows and the per-resource collaborators the engine depends on.
//!
//! The engine never looks inside a [`Row`] beyond its identifier. Everything
//! resource-specific (field mapping, REST collection names, GraphQL query
//! shape) sits behind [`RowMapper`] and [`RequestBuilder`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

/// One output record, keyed by the REST identifier of the item.
///
/// Serialized as `{"id": .., "fields": {..}}` so a mapped column named `id`
/// never collides with the key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Row {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// GraphQL request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQlRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub variables: Value,
}

impl GraphQlRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            variables: Value::Null,
        }
    }

    #[must_use]
    pub fn with_variables(mut self, variables: Value) -> Self {
        self.variables = variables;
        self
    }
}

/// Turns raw API items into rows.
pub trait RowMapper: Send + Sync {
    /// Map one item of a REST page. Items without a usable identifier yield `None`
    /// and are skipped.
    fn map_row(&self, raw: &Value) -> Option<Row>;

    /// Fold the GraphQL node fetched for `row` into it.
    ///
    /// The default copies the node's `metafields` connection into a flat
    /// `metafields` array of `{namespace, key, value, type}` objects.
    fn merge_augmentation(&self, mut row: Row, node: &Value) -> Row {
        row.fields
            .insert("metafields".to_string(), flatten_connection(node.get("metafields")));
        row
    }
}

/// Supplies request URLs and bodies for one resource kind.
pub trait RequestBuilder: Send + Sync {
    /// First REST page, with page size and filters already in the query string.
    fn rest_page_url(&self) -> Url;

    /// Key of the item array in a REST page body, e.g. `"products"`.
    fn rest_collection_key(&self) -> &str;

    /// Whether rows of this resource need GraphQL augmentation.
    fn supports_augmentation(&self) -> bool {
        false
    }

    /// GraphQL global id for a REST id, e.g. `gid://shopify/Product/42`.
    fn graphql_id(&self, row_id: &str) -> String;

    /// Augmentation query for a sorted, duplicate-free list of global ids.
    fn augmentation_request(&self, graphql_ids: &[String]) -> GraphQlRequest;

    /// Nodes returned by the augmentation query. Defaults to `data.nodes`.
    fn augmentation_nodes<'a>(&self, data: &'a Value) -> Vec<&'a Value> {
        data.get("nodes")
            .and_then(Value::as_array)
            .map(|nodes| nodes.iter().filter(|n| !n.is_null()).collect())
            .unwrap_or_default()
    }
}

/// A resource that can both build requests and map their results.
pub trait SyncResource: RowMapper + RequestBuilder {}

impl<T: RowMapper + RequestBuilder> SyncResource for T {}

/// Flatten a GraphQL connection (`{edges: [{node}]}` or `{nodes: [...]}`) into an array.
pub fn flatten_connection(connection: Option<&Value>) -> Value {
    let Some(connection) = connection else {
        return Value::Array(Vec::new());
    };

    if let Some(nodes) = connection.get("nodes").and_then(Value::as_array) {
        return Value::Array(nodes.clone());
    }

    let nodes = connection
        .get("edges")
        .and_then(Value::as_array)
        .map(|edges| {
            edges
                .iter()
                .filter_map(|edge| edge.get("node").cloned())
                .collect()
        })
        .unwrap_or_default();
    Value::Array(nodes)
}

/// Read an item identifier that may arrive as a JSON number or string.
pub fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}
