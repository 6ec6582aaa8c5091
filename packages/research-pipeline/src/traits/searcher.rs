//! Web search provider trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::job::DateWindow;

/// One page of a search.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    /// Zero-based page index
    pub page: usize,
    pub page_size: usize,
    pub window: Option<DateWindow>,
    pub include_domains: Vec<String>,
    pub region: String,
    pub language: String,
}

/// A ranked search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub snippet: Option<String>,
}

/// Search provider returning a ranked URL list.
#[async_trait]
pub trait WebSearcher: Send + Sync {
    /// Provider name used in config toggles and logs.
    fn name(&self) -> &str;

    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>>;
}
