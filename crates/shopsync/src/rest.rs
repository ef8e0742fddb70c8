//! REST page fetching.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use crate::client::ShopClient;
use crate::error::Result;
use crate::pagination::next_page_url;
use crate::resource::SyncResource;
use crate::traits::{Page, PageFetcher};

/// [`PageFetcher`] reading one resource's collection endpoint.
pub struct RestPageFetcher {
    client: ShopClient,
    resource: Arc<dyn SyncResource>,
}

impl RestPageFetcher {
    pub fn new(client: ShopClient, resource: Arc<dyn SyncResource>) -> Self {
        Self { client, resource }
    }
}

#[async_trait]
impl PageFetcher for RestPageFetcher {
    async fn fetch(&self, url: &Url) -> Result<Page> {
        let response = self.client.get(url).await?;
        let next_cursor = next_page_url(response.header("link"));
        let body: Value = serde_json::from_slice(&response.body)?;

        let key = self.resource.rest_collection_key();
        let items = match body.get(key).and_then(Value::as_array) {
            Some(items) => items.as_slice(),
            None => {
                tracing::warn!(key, url = %url, "REST page has no item array");
                &[]
            }
        };

        let mut rows = Vec::with_capacity(items.len());
        let mut skipped = 0usize;
        for item in items {
            match self.resource.map_row(item) {
                Some(row) => rows.push(row),
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            tracing::debug!(skipped, "Skipped REST items without an identifier");
        }

        Ok(Page { rows, next_cursor })
    }
}

impl std::fmt::Debug for RestPageFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestPageFetcher")
            .field("client", &self.client)
            .field("collection", &self.resource.rest_collection_key())
            .finish()
    }
}
