//! Page fetcher trait.

use async_trait::async_trait;

use crate::error::FetchResult;

/// Result of a conditional GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// 2xx with a body
    Fetched {
        status: u16,
        body: String,
        etag: Option<String>,
        content_type: Option<String>,
    },
    /// 304 for the supplied ETag
    NotModified,
}

/// Performs network fetches for the content cache and discovery.
///
/// Implementations return `FetchError::Status` for non-2xx responses other
/// than 304, so callers never see an error page as a body.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// GET `url`, sending `If-None-Match` when `etag` is given.
    async fn fetch(&self, url: &str, etag: Option<&str>) -> FetchResult<FetchOutcome>;

    /// User agent the fetcher identifies as (used for robots.txt matching).
    fn user_agent(&self) -> &str;
}
