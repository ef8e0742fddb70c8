//! Proactive request pacing.
//!
//! The REST Admin API enforces a leaky bucket per app and shop (40 requests,
//! refilling at 2 per second on standard plans). Pacing requests up front
//! keeps a tick's page fetch from being rejected with 429, which the engine
//! would otherwise surface as a failed tick.

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

type GovernorRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Default request rates (requests per second).
pub mod rate_limits {
    /// Standard plan REST refill rate.
    pub const REST_DEFAULT_RPS: u32 = 2;
}

/// Shared pacing limiter, cheap to clone.
///
/// ```ignore
/// let limiter = ApiRateLimiter::new(rate_limits::REST_DEFAULT_RPS);
/// limiter.wait().await;
/// transport.send(request).await?;
/// ```
#[derive(Clone)]
pub struct ApiRateLimiter {
    inner: Arc<GovernorRateLimiter>,
    requests_per_second: NonZeroU32,
}

impl ApiRateLimiter {
    /// A limiter allowing `requests_per_second` (zero is treated as one).
    pub fn new(requests_per_second: u32) -> Self {
        let rps = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            inner: Arc::new(RateLimiter::direct(Quota::per_second(rps))),
            requests_per_second: rps,
        }
    }

    /// A limiter from a config value where `0` means "no pacing".
    pub fn from_config(requests_per_second: u32) -> Option<Self> {
        (requests_per_second > 0).then(|| Self::new(requests_per_second))
    }

    pub fn requests_per_second(&self) -> u32 {
        self.requests_per_second.get()
    }

    /// Wait until the limiter admits another request.
    pub async fn wait(&self) {
        self.inner.until_ready().await;
    }
}

impl std::fmt::Debug for ApiRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiRateLimiter")
            .field("requests_per_second", &self.requests_per_second)
            .finish()
    }
}
