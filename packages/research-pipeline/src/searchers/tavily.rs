//! Tavily search API.
//!
//! Tavily has no paging: page 0 returns up to `page_size` results and any
//! later page is empty, which ends the search for this provider.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::search_error;
use crate::error::Result;
use crate::security::SecretString;
use crate::traits::searcher::{SearchHit, SearchRequest, WebSearcher};

const DEFAULT_BASE_URL: &str = "https://api.tavily.com";
/// Tavily rejects larger `max_results`.
const MAX_RESULTS: usize = 20;

pub struct TavilySearcher {
    client: Client,
    api_key: SecretString,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    query: &'a str,
    max_results: usize,
    topic: &'static str,
    search_depth: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    include_domains: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    days: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: Option<String>,
}

impl TavilySearcher {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

fn build_request(request: &SearchRequest) -> TavilyRequest<'_> {
    // Tavily filters by age in days, counted back from today.
    let days = request.window.map(|w| {
        let today = chrono::Utc::now().date_naive();
        (today - w.start).num_days().max(1)
    });
    TavilyRequest {
        query: &request.query,
        max_results: request.page_size.clamp(1, MAX_RESULTS),
        topic: "news",
        search_depth: "basic",
        include_domains: request.include_domains.clone(),
        days,
    }
}

fn into_hits(response: TavilyResponse) -> Vec<SearchHit> {
    response
        .results
        .into_iter()
        .map(|r| SearchHit {
            url: r.url,
            title: r.title,
            snippet: r.content,
        })
        .collect()
}

#[async_trait]
impl WebSearcher for TavilySearcher {
    fn name(&self) -> &str {
        "tavily"
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        if request.page > 0 {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .bearer_auth(self.api_key.expose())
            .json(&build_request(request))
            .send()
            .await
            .map_err(|e| search_error("tavily", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(search_error("tavily", format!("HTTP {}: {}", status, body)));
        }

        let parsed: TavilyResponse = response
            .json()
            .await
            .map_err(|e| search_error("tavily", e))?;
        let hits = into_hits(parsed);
        debug!(query = %request.query, hits = hits.len(), "tavily search");
        Ok(hits)
    }
}
