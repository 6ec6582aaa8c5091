//! Per-candidate processing: fetch, score, extract, draft and QA.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::cache::{ContentCache, FetchOptions};
use crate::discovery::Candidate;
use crate::error::{ExtractionError, ExtractionResult, Result};
use crate::fetchers::html::{extract_title, html_to_text};
use crate::pipeline::{extract, qa, score};
use crate::registry::{DraftInsert, JobRegistry};
use crate::traits::model::LanguageModel;
use crate::types::cache::hash_content;
use crate::types::draft::{IncidentFields, NewDraft, QaStatus};
use crate::types::event::LogLevel;
use crate::types::job::{Counter, DomainField, Job, JobId, JobStatus};
use crate::urls::domain_of;

/// Title used when neither the hint nor the page has one.
pub const UNTITLED: &str = "Untitled Incident";

/// Leading body characters hashed for content dedup.
const HASHED_PREFIX_CHARS: usize = 5_000;

/// Everything a worker needs for one job run.
pub struct WorkerContext {
    pub job: Job,
    pub registry: Arc<JobRegistry>,
    pub cache: Arc<ContentCache>,
    pub model: Arc<dyn LanguageModel>,
    /// Raised on target reached or cancel; no new candidate is dispatched after it
    pub halt: CancellationToken,
    /// Candidates enqueued but not yet fully processed
    pub pending: watch::Sender<usize>,
    sequence: AtomicU64,
}

/// How a candidate left the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Aggregator,
    FetchFailed,
    Filtered,
    ExtractionFailed,
    NotIncident,
    Duplicate,
    Rejected,
    Accepted,
    JobClosed,
}

impl WorkerContext {
    pub fn new(
        job: Job,
        registry: Arc<JobRegistry>,
        cache: Arc<ContentCache>,
        model: Arc<dyn LanguageModel>,
        halt: CancellationToken,
    ) -> Self {
        Self {
            job,
            registry,
            cache,
            model,
            halt,
            pending: watch::channel(0).0,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> JobId {
        self.job.id
    }

    fn fetch_options(&self) -> FetchOptions {
        let fetch = &self.job.config.fetch;
        FetchOptions {
            ttl_hours: fetch.cache_ttl_hours,
            force_bypass: fetch.force_bypass,
            per_domain_rps: fetch.per_domain_rps,
            timeout: Duration::from_secs(fetch.fetch_timeout_secs),
        }
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.job.config.fetch.extraction_timeout_secs)
    }

    /// Run one candidate end to end and release its pending slot.
    pub async fn process(&self, candidate: Candidate) -> Result<Disposition> {
        let result = self.process_inner(&candidate).await;
        self.pending.send_modify(|n| *n = n.saturating_sub(1));
        result
    }

    async fn process_inner(&self, candidate: &Candidate) -> Result<Disposition> {
        let id = self.id();
        let cfg = &self.job.config;
        let registry = &self.registry;

        if score::is_aggregator(
            &candidate.url,
            candidate.title_hint.as_deref(),
            &cfg.aggregator_keywords,
        ) {
            registry
                .log(id, LogLevel::Info, format!("skipping aggregator: {}", candidate.url))
                .await;
            return Ok(Disposition::Aggregator);
        }

        registry.advance_to(id, JobStatus::Fetching).await?;
        let domain = domain_of(&candidate.url).unwrap_or_default();
        let fetched = match self.cache.fetch(&candidate.url, &self.fetch_options()).await {
            Ok(fetched) => fetched,
            Err(e) => {
                registry.increment(id, Counter::Errors, 1).await?;
                registry
                    .record_domain(id, &domain, DomainField::Errors, 1)
                    .await?;
                registry
                    .log(id, LogLevel::Warning, format!("fetch failed: {}", e))
                    .await;
                return Ok(Disposition::FetchFailed);
            }
        };
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        registry.increment(id, Counter::Fetched, 1).await?;
        registry
            .record_domain(id, &domain, DomainField::Fetched, 1)
            .await?;

        let text = html_to_text(&fetched.body);
        let title = candidate
            .title_hint
            .clone()
            .or_else(|| extract_title(&fetched.body))
            .unwrap_or_else(|| UNTITLED.to_string());
        if candidate.title_hint.is_none()
            && score::is_aggregator(&candidate.url, Some(&title), &cfg.aggregator_keywords)
        {
            registry
                .log(id, LogLevel::Info, format!("skipping aggregator: {}", title))
                .await;
            return Ok(Disposition::Aggregator);
        }

        let scored = score::score(&title, &text, &candidate.url, &cfg.scoring);
        if scored.score < cfg.scoring.min_score
            || (cfg.filters.require_regional && !scored.is_relevant())
        {
            registry.increment(id, Counter::Filtered, 1).await?;
            registry
                .log(
                    id,
                    LogLevel::Debug,
                    format!("filtered (score {:.2}): {}", scored.score, candidate.url),
                )
                .await;
            return Ok(Disposition::Filtered);
        }

        registry.advance_to(id, JobStatus::Parsing).await?;
        let fields = match self.extract_fields(&text).await {
            Ok(fields) => fields,
            Err(e) => {
                registry.increment(id, Counter::Errors, 1).await?;
                registry
                    .log(
                        id,
                        LogLevel::Warning,
                        format!("extraction failed for {}: {}", candidate.url, e),
                    )
                    .await;
                return Ok(Disposition::ExtractionFailed);
            }
        };
        registry.increment(id, Counter::Parsed, 1).await?;
        let fields = extract::post_process(fields, &text);

        if !fields.incident && cfg.filters.require_incident {
            registry.increment(id, Counter::Filtered, 1).await?;
            registry
                .log(id, LogLevel::Info, format!("not an incident: {}", title))
                .await;
            return Ok(Disposition::NotIncident);
        }

        registry.advance_to(id, JobStatus::Drafting).await?;
        let hashed: String = text.chars().take(HASHED_PREFIX_CHARS).collect();
        let insert = registry
            .insert_draft(
                id,
                NewDraft {
                    title,
                    source_url: candidate.url.clone(),
                    fields,
                    relevance: scored.relevance,
                    score: scored.score,
                    sequence,
                    content_hash: hash_content(&hashed),
                },
            )
            .await?;
        let draft = match insert {
            DraftInsert::Inserted(draft) => draft,
            DraftInsert::Duplicate(key) => {
                registry
                    .log(
                        id,
                        LogLevel::Info,
                        format!("duplicate ({:?}): {}", key, candidate.url),
                    )
                    .await;
                return Ok(Disposition::Duplicate);
            }
            DraftInsert::JobClosed => return Ok(Disposition::JobClosed),
        };

        registry.advance_to(id, JobStatus::Qa).await?;
        let decision = qa::review(
            &draft,
            &cfg.qa,
            self.model.as_ref(),
            self.extraction_timeout(),
        )
        .await;
        let recorded = registry.record_qa(id, draft.id, &decision).await?;
        if recorded.target_reached {
            self.halt.cancel();
        }

        if decision.status == QaStatus::Accepted {
            registry
                .log(
                    id,
                    LogLevel::Info,
                    format!(
                        "accepted {}/{}: {}",
                        recorded.accepted_count, self.job.target_count, draft.title
                    ),
                )
                .await;
            Ok(Disposition::Accepted)
        } else {
            registry
                .log(
                    id,
                    LogLevel::Info,
                    format!("QA rejected {}: {}", draft.title, decision.message),
                )
                .await;
            Ok(Disposition::Rejected)
        }
    }

    async fn extract_fields(&self, text: &str) -> ExtractionResult<IncidentFields> {
        let prompt = extract::render_prompt(&self.job.config.extraction_prompt, text);
        let raw = tokio::time::timeout(self.extraction_timeout(), self.model.complete(&prompt))
            .await
            .map_err(|_| ExtractionError::Timeout)??;
        extract::parse_response(&raw)
    }
}
