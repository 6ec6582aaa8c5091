//! Research Pipeline Orchestrator
//!
//! Turns a free-text query into a curated markdown report of security
//! incidents. A job discovers candidate articles (search providers, RSS,
//! sitemaps, a bounded crawl), fetches them through a shared content cache,
//! scores and extracts them with a language model, de-duplicates drafts,
//! runs a QA gate and assembles the accepted drafts into a report.
//!
//! # Usage
//!
//! ```rust,ignore
//! use research_pipeline::{ContentCache, Discovery, EventBus, JobRegistry, MemoryStore};
//! use research_pipeline::{Orchestrator, PipelineConfig, StartJob, StaticModelRegistry};
//!
//! let store = Arc::new(MemoryStore::new());
//! let cache = Arc::new(ContentCache::new(store.clone(), Arc::new(HttpFetcher::new()?), 8));
//! let registry = Arc::new(JobRegistry::new(store, EventBus::new()));
//! let discovery = Arc::new(Discovery::new(cache.clone(), searchers));
//! let orchestrator = Orchestrator::new(registry, cache, discovery, models, PipelineConfig::default());
//!
//! let job_id = orchestrator.start(request).await?;
//! ```
//!
//! # Modules
//!
//! - [`registry`] - Job records, state machine and counters
//! - [`discovery`] - Candidate sources
//! - [`cache`] - Content cache with TTL, ETag revalidation and domain pacing
//! - [`pipeline`] - Worker stages, QA gate, report assembly and orchestration
//! - [`events`] - Per-job event stream with replay
//! - [`stores`] - Storage implementations
//! - [`testing`] - Mock fetcher, model and searcher

pub mod ai;
pub mod cache;
pub mod discovery;
pub mod error;
pub mod events;
pub mod fetchers;
pub mod pipeline;
pub mod registry;
pub mod searchers;
pub mod security;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;
pub mod urls;

// Re-export core types at crate root
pub use cache::{ContentCache, FetchOptions};
pub use discovery::{Candidate, CandidateSource, Discovery};
pub use error::{ExtractionError, FetchError, PipelineError, Result};
pub use events::EventBus;
pub use pipeline::{Orchestrator, StartJob};
pub use registry::JobRegistry;
pub use stores::MemoryStore;
pub use traits::{
    fetcher::{FetchOutcome, PageFetcher},
    model::{LanguageModel, ModelRegistry},
    searcher::{SearchHit, SearchRequest, WebSearcher},
    store::{CacheStore, RecordStore},
};
pub use ai::StaticModelRegistry;
pub use types::{
    cache::{CacheEntry, DomainRollup, RefetchSummary},
    config::{DiscoveryMode, PipelineConfig, QaPreset},
    draft::{AttackMethod, Draft, IncidentFields, QaStatus},
    event::{EventKind, JobEvent, LogLevel},
    job::{DateWindow, FailureReason, Job, JobId, JobStatus, ServerType},
    report::ResearchReport,
};
