//! SerpAPI Google News search.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::search_error;
use crate::error::Result;
use crate::security::SecretString;
use crate::traits::searcher::{SearchHit, SearchRequest, WebSearcher};
use crate::types::job::DateWindow;

const DEFAULT_BASE_URL: &str = "https://serpapi.com";

pub struct SerpApiSearcher {
    client: Client,
    api_key: SecretString,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SerpResponse {
    #[serde(default)]
    news_results: Vec<SerpResult>,
    #[serde(default)]
    organic_results: Vec<SerpResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SerpResult {
    link: Option<String>,
    #[serde(default)]
    title: String,
    snippet: Option<String>,
}

impl SerpApiSearcher {
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

/// Google custom date range, `cdr:1,cd_min:MM/DD/YYYY,cd_max:MM/DD/YYYY`.
fn date_range(window: &DateWindow) -> String {
    format!(
        "cdr:1,cd_min:{},cd_max:{}",
        window.start.format("%m/%d/%Y"),
        window.end.format("%m/%d/%Y")
    )
}

/// Query parameters without the API key.
fn query_params(request: &SearchRequest) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("engine", "google".to_string()),
        ("q", request.query.clone()),
        ("tbm", "nws".to_string()),
        ("num", request.page_size.to_string()),
        ("start", (request.page * request.page_size).to_string()),
        ("gl", request.region.clone()),
        ("hl", request.language.clone()),
    ];
    if let Some(window) = &request.window {
        params.push(("tbs", date_range(window)));
    }
    params
}

fn into_hits(response: SerpResponse) -> Vec<SearchHit> {
    response
        .news_results
        .into_iter()
        .chain(response.organic_results)
        .filter_map(|r| {
            Some(SearchHit {
                url: r.link?,
                title: r.title,
                snippet: r.snippet,
            })
        })
        .collect()
}

#[async_trait]
impl WebSearcher for SerpApiSearcher {
    fn name(&self) -> &str {
        "serpapi"
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        let mut params = query_params(request);
        params.push(("api_key", self.api_key.expose().to_string()));

        let response = self
            .client
            .get(format!("{}/search.json", self.base_url))
            .query(&params)
            .send()
            .await
            .map_err(|e| search_error("serpapi", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(search_error("serpapi", format!("HTTP {}: {}", status, body)));
        }

        let parsed: SerpResponse = response
            .json()
            .await
            .map_err(|e| search_error("serpapi", e))?;

        // "No results" comes back as an error string on a 200.
        if let Some(error) = &parsed.error {
            if parsed.news_results.is_empty() && parsed.organic_results.is_empty() {
                debug!(error = %error, page = request.page, "serpapi returned no results");
                return Ok(Vec::new());
            }
        }

        let hits = into_hits(parsed);
        debug!(query = %request.query, page = request.page, hits = hits.len(), "serpapi search");
        Ok(hits)
    }
}
