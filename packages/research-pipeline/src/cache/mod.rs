//! Content cache and domain rate limiting.

pub mod content_cache;
pub mod rate_limit;

pub use content_cache::{CachedBody, ContentCache, FetchOptions};
pub use rate_limit::DomainRateLimiter;
