//! Admin API client shared by the REST and GraphQL sides of a sync.

use std::sync::Arc;

use url::Url;

use crate::config::{Config, HttpConfig};
use crate::error::{Result, SyncError};
use crate::graphql::GraphQlResponse;
use crate::http::reqwest_transport::ReqwestTransport;
use crate::http::{HttpHeaders, HttpRequest, HttpResponse, HttpTransport};
use crate::rate_limit::ApiRateLimiter;
use crate::resource::GraphQlRequest;

const ACCESS_TOKEN_HEADER: &str = "X-Shopify-Access-Token";

/// Authenticated client for one shop's Admin API.
///
/// Cloning is cheap; clones share the transport and the rate limiter.
#[derive(Clone)]
pub struct ShopClient {
    transport: Arc<dyn HttpTransport>,
    /// `https://{domain}/admin/api/{version}/`
    base_url: Url,
    access_token: Arc<String>,
    rate_limiter: Option<ApiRateLimiter>,
}

impl ShopClient {
    /// Create a client backed by reqwest.
    ///
    /// `domain` may be a bare host (`demo.myshopify.com`) or a full origin.
    /// Timeout and request rate come from `http`.
    pub fn new(
        domain: &str,
        api_version: &str,
        access_token: &str,
        http: &HttpConfig,
    ) -> Result<Self> {
        let transport = ReqwestTransport::with_timeout(http.timeout())?;
        Ok(Self::new_with_transport(
            admin_base_url(domain, api_version)?,
            access_token,
            ApiRateLimiter::from_config(http.requests_per_second),
            Arc::new(transport),
        ))
    }

    /// Create a client from loaded configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let domain = config
            .shop
            .domain
            .as_deref()
            .ok_or_else(|| SyncError::config("shop.domain is not set"))?;
        let token = config
            .shop
            .access_token
            .as_deref()
            .ok_or_else(|| SyncError::config("shop.access_token is not set"))?;

        Self::new(domain, &config.shop.api_version, token, &config.http)
    }

    pub fn new_with_transport(
        base_url: Url,
        access_token: &str,
        rate_limiter: Option<ApiRateLimiter>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            transport,
            base_url,
            access_token: Arc::new(access_token.to_string()),
            rate_limiter,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve a path such as `products.json?limit=250` against the Admin API root.
    pub fn admin_url(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    pub fn graphql_url(&self) -> Result<Url> {
        self.admin_url("graphql.json")
    }

    fn headers(&self) -> HttpHeaders {
        vec![
            ("Accept".to_string(), "application/json".to_string()),
            (
                ACCESS_TOKEN_HEADER.to_string(),
                self.access_token.as_str().to_string(),
            ),
        ]
    }

    async fn wait_for_rate_limit(&self) {
        if let Some(ref limiter) = self.rate_limiter {
            limiter.wait().await;
        }
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.wait_for_rate_limit().await;
        tracing::trace!(method = request.method.as_str(), url = %request.url, "Sending request");

        let response = self.transport.send(request).await?;
        if !response.is_success() {
            return Err(SyncError::remote_request(response.status, response.body_text()));
        }
        Ok(response)
    }

    /// GET an absolute URL (REST pages arrive as absolute cursor URLs).
    pub async fn get(&self, url: &Url) -> Result<HttpResponse> {
        self.send(HttpRequest::get(url.as_str(), self.headers()))
            .await
    }

    /// POST a GraphQL document and decode the envelope.
    ///
    /// Only HTTP failures are errors here; GraphQL-level `errors` are left for
    /// the caller to classify.
    pub async fn graphql(&self, request: &GraphQlRequest) -> Result<GraphQlResponse> {
        let body = serde_json::to_vec(request)?;
        let url = self.graphql_url()?;
        let response = self
            .send(HttpRequest::post_json(url.as_str(), self.headers(), body))
            .await?;
        Ok(serde_json::from_slice(&response.body)?)
    }
}

impl std::fmt::Debug for ShopClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShopClient")
            .field("base_url", &self.base_url.as_str())
            .field("rate_limiter", &self.rate_limiter)
            .finish_non_exhaustive()
    }
}

/// Build `https://{domain}/admin/api/{version}/`.
pub fn admin_base_url(domain: &str, api_version: &str) -> Result<Url> {
    let domain = domain.trim().trim_end_matches('/');
    let origin = if domain.starts_with("http://") || domain.starts_with("https://") {
        domain.to_string()
    } else {
        format!("https://{domain}")
    };
    Ok(Url::parse(&format!(
        "{origin}/admin/api/{}/",
        api_version.trim_matches('/')
    ))?)
}
