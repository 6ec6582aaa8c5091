//! Testing utilities including mock implementations.
//!
//! These are useful for exercising the pipeline without real network or
//! model calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::error::{ExtractionError, ExtractionResult, FetchError, FetchResult, PipelineError, Result};
use crate::traits::{
    fetcher::{FetchOutcome, PageFetcher},
    model::LanguageModel,
    searcher::{SearchHit, SearchRequest, WebSearcher},
};

/// Scripted response for one URL.
#[derive(Debug, Clone)]
pub enum MockResponse {
    Page { body: String, etag: Option<String> },
    NotModified,
    Status(u16),
    NetworkError,
}

/// A mock fetcher with scripted responses and call tracking.
///
/// Unknown URLs answer 404. An optional gate holds every fetch until the
/// test releases permits, which lets tests observe in-flight work.
#[derive(Default)]
pub struct MockFetcher {
    responses: RwLock<HashMap<String, MockResponse>>,
    calls: RwLock<Vec<(String, Option<String>)>>,
    delay: Option<Duration>,
    gate: Option<Arc<Semaphore>>,
    in_flight: AtomicUsize,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: &str, body: impl Into<String>) -> Self {
        self.set_response(
            url,
            MockResponse::Page {
                body: body.into(),
                etag: None,
            },
        );
        self
    }

    pub fn with_page_etag(self, url: &str, body: impl Into<String>, etag: &str) -> Self {
        self.set_response(
            url,
            MockResponse::Page {
                body: body.into(),
                etag: Some(etag.to_string()),
            },
        );
        self
    }

    pub fn with_response(self, url: &str, response: MockResponse) -> Self {
        self.set_response(url, response);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Hold each fetch until a permit is available on `gate`.
    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn set_response(&self, url: &str, response: MockResponse) {
        self.responses
            .write()
            .unwrap()
            .insert(url.to_string(), response);
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.calls
            .read()
            .unwrap()
            .iter()
            .filter(|(u, _)| u == url)
            .count()
    }

    /// ETag sent with the most recent call for `url`.
    pub fn last_etag(&self, url: &str) -> Option<String> {
        self.calls
            .read()
            .unwrap()
            .iter()
            .rev()
            .find(|(u, _)| u == url)
            .and_then(|(_, etag)| etag.clone())
    }

    /// Fetches that have started and not yet returned.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageFetcher for MockFetcher {
    async fn fetch(&self, url: &str, etag: Option<&str>) -> FetchResult<FetchOutcome> {
        self.calls
            .write()
            .unwrap()
            .push((url.to_string(), etag.map(str::to_string)));
        self.in_flight.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                drop(permit);
            }
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let response = self.responses.read().unwrap().get(url).cloned();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match response {
            Some(MockResponse::Page { body, etag }) => Ok(FetchOutcome::Fetched {
                status: 200,
                body,
                etag,
                content_type: Some("text/html".to_string()),
            }),
            Some(MockResponse::NotModified) => Ok(FetchOutcome::NotModified),
            Some(MockResponse::Status(status)) => Err(FetchError::Status {
                url: url.to_string(),
                status,
            }),
            Some(MockResponse::NetworkError) => Err(FetchError::Network {
                url: url.to_string(),
                reason: "connection reset".to_string(),
            }),
            None => Err(FetchError::Status {
                url: url.to_string(),
                status: 404,
            }),
        }
    }

    fn user_agent(&self) -> &str {
        "MockFetcher/1.0"
    }
}

/// A mock language model.
///
/// Returns the first scripted response whose needle appears in the prompt,
/// otherwise the default response.
pub struct MockModel {
    rules: RwLock<Vec<(String, String)>>,
    default_response: String,
    fail: bool,
    delay: Option<Duration>,
    prompts: RwLock<Vec<String>>,
}

impl Default for MockModel {
    fn default() -> Self {
        Self::new()
    }
}

impl MockModel {
    /// Model that reports every article as an incident and accepts every QA review.
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(vec![(
                "ACCEPT or REJECT".to_string(),
                "ACCEPT\nConcrete incident.".to_string(),
            )]),
            default_response: Self::incident_json("Attackers breached the target.", true),
            fail: false,
            delay: None,
            prompts: RwLock::new(Vec::new()),
        }
    }

    /// Model whose every call fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn with_default_response(mut self, response: impl Into<String>) -> Self {
        self.default_response = response.into();
        self
    }

    /// Respond with `response` when the prompt contains `needle`.
    ///
    /// Rules added later take precedence.
    pub fn with_rule(self, needle: impl Into<String>, response: impl Into<String>) -> Self {
        self.rules
            .write()
            .unwrap()
            .insert(0, (needle.into(), response.into()));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.prompts.read().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.read().unwrap().clone()
    }

    /// JSON extraction response with the given summary.
    pub fn incident_json(summary: &str, incident: bool) -> String {
        serde_json::json!({
            "summary": summary,
            "date": "2025-03-04",
            "targets": "Example Corp",
            "method": "Ransomware",
            "exploit_used": "",
            "incident": incident,
        })
        .to_string()
    }
}

#[async_trait]
impl LanguageModel for MockModel {
    async fn complete(&self, prompt: &str) -> ExtractionResult<String> {
        self.prompts.write().unwrap().push(prompt.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(ExtractionError::Model("mock model unavailable".to_string()));
        }
        let rules = self.rules.read().unwrap();
        let response = rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| self.default_response.clone());
        Ok(response)
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }
}

/// A mock search provider returning scripted pages.
pub struct MockSearcher {
    name: String,
    pages: Vec<Vec<SearchHit>>,
    fail: bool,
    requests: RwLock<Vec<SearchRequest>>,
}

impl MockSearcher {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            pages: Vec::new(),
            fail: false,
            requests: RwLock::new(Vec::new()),
        }
    }

    /// Add a result page of `(url, title)` hits.
    pub fn with_page(mut self, hits: &[(&str, &str)]) -> Self {
        self.pages.push(
            hits.iter()
                .map(|(url, title)| SearchHit {
                    url: url.to_string(),
                    title: title.to_string(),
                    snippet: None,
                })
                .collect(),
        );
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.read().unwrap().len()
    }

    pub fn requests(&self) -> Vec<SearchRequest> {
        self.requests.read().unwrap().clone()
    }
}

#[async_trait]
impl WebSearcher for MockSearcher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        self.requests.write().unwrap().push(request.clone());
        if self.fail {
            return Err(PipelineError::Search {
                provider: self.name.clone(),
                reason: "mock failure".to_string(),
            });
        }
        Ok(self.pages.get(request.page).cloned().unwrap_or_default())
    }
}

/// Minimal article HTML for tests.
pub fn article_html(title: &str, body: &str) -> String {
    format!(
        "<html><head><title>{}</title></head><body><article><p>{}</p></article></body></html>",
        title, body
    )
}
