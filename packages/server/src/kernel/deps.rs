//! Server dependencies: stores, fetcher, cache, discovery and models.
//!
//! Everything external sits behind a pipeline trait so tests can build the
//! same container from mocks.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use research_pipeline::fetchers::HttpFetcher;
use research_pipeline::searchers::{SerpApiSearcher, TavilySearcher};
use research_pipeline::{
    CacheStore, ContentCache, Discovery, EventBus, JobRegistry, MemoryStore, ModelRegistry,
    Orchestrator, PageFetcher, PipelineConfig, RecordStore, StaticModelRegistry, WebSearcher,
};

use crate::config::Config;

/// Shared services behind every route.
#[derive(Clone)]
pub struct ServerDeps {
    pub orchestrator: Orchestrator,
    pub registry: Arc<JobRegistry>,
    pub cache: Arc<ContentCache>,
}

/// Collaborators a `ServerDeps` is assembled from.
pub struct DepsParts {
    pub records: Arc<dyn RecordStore>,
    pub cache_store: Arc<dyn CacheStore>,
    pub fetcher: Arc<dyn PageFetcher>,
    pub searchers: Vec<Arc<dyn WebSearcher>>,
    pub models: Arc<dyn ModelRegistry>,
    pub defaults: PipelineConfig,
    pub cache_global_concurrency: usize,
    pub job_retention: Duration,
}

impl ServerDeps {
    pub fn new(parts: DepsParts) -> Self {
        let cache = Arc::new(ContentCache::new(
            parts.cache_store,
            parts.fetcher,
            parts.cache_global_concurrency,
        ));
        let registry = Arc::new(
            JobRegistry::new(parts.records, EventBus::new()).with_retention(parts.job_retention),
        );
        let discovery = Arc::new(Discovery::new(cache.clone(), parts.searchers));
        let orchestrator = Orchestrator::new(
            registry.clone(),
            cache.clone(),
            discovery,
            parts.models,
            parts.defaults,
        );
        Self {
            orchestrator,
            registry,
            cache,
        }
    }

    /// Build production dependencies from configuration.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let (records, cache_store) = stores(config).await?;

        let fetcher: Arc<dyn PageFetcher> = Arc::new(match &config.user_agent {
            Some(ua) => HttpFetcher::with_user_agent(ua.clone()),
            None => HttpFetcher::new(),
        }
        .context("Failed to build HTTP client")?);

        let mut searchers: Vec<Arc<dyn WebSearcher>> = Vec::new();
        if let Some(key) = &config.tavily_api_key {
            searchers.push(Arc::new(TavilySearcher::new(key.clone())));
        }
        if let Some(key) = &config.serpapi_api_key {
            searchers.push(Arc::new(SerpApiSearcher::new(key.clone())));
        }
        if searchers.is_empty() {
            tracing::warn!("No search provider keys set; search mode needs seed URLs");
        }

        let models = model_registry(config);
        tracing::info!(servers = ?models.servers(), "Model servers registered");

        Ok(Self::new(DepsParts {
            records,
            cache_store,
            fetcher,
            searchers,
            models: Arc::new(models),
            defaults: config.pipeline_defaults()?,
            cache_global_concurrency: config.cache_global_concurrency,
            job_retention: config.job_retention,
        }))
    }
}

fn model_registry(config: &Config) -> StaticModelRegistry {
    let mut models = StaticModelRegistry::new();
    for (name, url) in &config.ollama_servers {
        models = models.with_ollama(name.clone(), url.clone());
    }
    for server in &config.openai_servers {
        models = models.with_openai(
            server.name.clone(),
            server.base_url.clone(),
            server.api_key.clone(),
        );
    }
    if let Some(key) = &config.gemini_api_key {
        models = models.with_gemini("gemini", key.clone());
    }
    models
}

#[cfg(feature = "sqlite")]
async fn stores(config: &Config) -> Result<(Arc<dyn RecordStore>, Arc<dyn CacheStore>)> {
    if let Some(url) = &config.database_url {
        tracing::info!("Connecting to database...");
        let store = Arc::new(
            research_pipeline::stores::SqliteStore::new(url)
                .await
                .context("Failed to open database")?,
        );
        tracing::info!("Database connected");
        return Ok((store.clone(), store));
    }
    let store = Arc::new(MemoryStore::new());
    Ok((store.clone(), store))
}

#[cfg(not(feature = "sqlite"))]
async fn stores(config: &Config) -> Result<(Arc<dyn RecordStore>, Arc<dyn CacheStore>)> {
    if config.database_url.is_some() {
        anyhow::bail!("DATABASE_URL is set but the server was built without the sqlite feature");
    }
    let store = Arc::new(MemoryStore::new());
    Ok((store.clone(), store))
}
