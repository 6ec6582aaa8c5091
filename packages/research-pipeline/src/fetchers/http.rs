//! reqwest-backed page fetcher.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderName, CONTENT_TYPE, ETAG, IF_NONE_MATCH, USER_AGENT};
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::error::{FetchError, FetchResult};
use crate::traits::fetcher::{FetchOutcome, PageFetcher};

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) ResearchPipeline/1.0";

/// HTTP fetcher with conditional-GET support.
///
/// Redirects are followed by reqwest; per-request deadlines are applied by the
/// content cache, the client timeout here is only a backstop.
pub struct HttpFetcher {
    client: reqwest::Client,
    user_agent: String,
}

impl HttpFetcher {
    pub fn new() -> FetchResult<Self> {
        Self::with_user_agent(DEFAULT_USER_AGENT)
    }

    pub fn with_user_agent(user_agent: impl Into<String>) -> FetchResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| FetchError::Network {
                url: String::new(),
                reason: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            user_agent: user_agent.into(),
        })
    }

    /// Use a preconfigured client.
    pub fn with_client(client: reqwest::Client, user_agent: impl Into<String>) -> Self {
        Self {
            client,
            user_agent: user_agent.into(),
        }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, etag: Option<&str>) -> FetchResult<FetchOutcome> {
        debug!(url = %url, conditional = etag.is_some(), "HTTP fetch starting");

        let mut request = self.client.get(url).header(USER_AGENT, &self.user_agent);
        if let Some(etag) = etag {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response = request.send().await.map_err(|e| {
            warn!(url = %url, error = %e, "HTTP request failed");
            if e.is_timeout() {
                FetchError::Timeout {
                    url: url.to_string(),
                }
            } else {
                FetchError::Network {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            return Ok(FetchOutcome::NotModified);
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let header = |name: HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        };
        let etag = header(ETAG);
        let content_type = header(CONTENT_TYPE);

        let body = response.text().await.map_err(|e| FetchError::Network {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        debug!(url = %url, bytes = body.len(), "HTTP fetch complete");

        Ok(FetchOutcome::Fetched {
            status: status.as_u16(),
            body,
            etag,
            content_type,
        })
    }

    fn user_agent(&self) -> &str {
        &self.user_agent
    }
}
