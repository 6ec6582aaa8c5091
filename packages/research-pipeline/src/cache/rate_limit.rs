//! Per-domain request pacing.
//!
//! One keyed governor limiter per requests-per-second value, keyed by domain.
//! Jobs configured with the same rate share a bucket for a domain, so two jobs
//! hammering the same site are paced together.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use tokio::sync::Mutex;

/// Domain-keyed rate limiter shared by every fetch through the cache.
#[derive(Default)]
pub struct DomainRateLimiter {
    buckets: Mutex<HashMap<NonZeroU32, Arc<DefaultKeyedRateLimiter<String>>>>,
}

impl DomainRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until `domain` may be fetched again at `requests_per_second`.
    ///
    /// Requests are spaced evenly; there is no burst allowance.
    /// A rate of zero is treated as one request per second.
    pub async fn until_ready(&self, domain: &str, requests_per_second: u32) {
        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let limiter = {
            let mut buckets = self.buckets.lock().await;
            buckets
                .entry(rate)
                .or_insert_with(|| {
                    let quota = Quota::per_second(rate).allow_burst(NonZeroU32::MIN);
                    Arc::new(RateLimiter::keyed(quota))
                })
                .clone()
        };
        limiter.until_key_ready(&domain.to_string()).await;
    }
}
