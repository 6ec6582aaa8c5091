//! Job orchestration: producer, worker pool and finalizer.
//!
//! Per job, one producer task feeds a bounded queue that a pool of
//! `global_concurrency` workers drains. A halt token (child of the job's
//! cancel token) stops dispatch when the target is reached or the job is
//! cancelled. Once the queue is drained or the run halted, workers still
//! busy get a grace period before they are aborted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::ContentCache;
use crate::discovery::query::resolve_window;
use crate::discovery::{Candidate, Discovery};
use crate::error::Result;
use crate::pipeline::qa;
use crate::pipeline::report::build_markdown;
use crate::pipeline::worker::WorkerContext;
use crate::registry::JobRegistry;
use crate::traits::model::ModelRegistry;
use crate::types::config::{DiscoveryMode, PipelineConfig};
use crate::types::draft::QaStatus;
use crate::types::event::LogLevel;
use crate::types::job::{FailureReason, Job, JobId, JobStatus, NewJob, ServerType};
use crate::types::report::ResearchReport;

/// Request to start a research job.
#[derive(Debug, Clone)]
pub struct StartJob {
    pub query: String,
    pub target_count: u32,
    pub seed_urls: Vec<String>,
    pub focus_on_seed: bool,
    pub server_type: ServerType,
    pub server_name: String,
    pub model_name: String,
    /// JSON object merged over the server's default config
    pub config: Option<Value>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

/// Starts jobs and drives them to a terminal status.
#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<JobRegistry>,
    cache: Arc<ContentCache>,
    discovery: Arc<Discovery>,
    models: Arc<dyn ModelRegistry>,
    defaults: Arc<PipelineConfig>,
    runs: Arc<Mutex<HashMap<JobId, JoinHandle<()>>>>,
}

enum Flow {
    Continue,
    Stop,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<JobRegistry>,
        cache: Arc<ContentCache>,
        discovery: Arc<Discovery>,
        models: Arc<dyn ModelRegistry>,
        defaults: PipelineConfig,
    ) -> Self {
        Self {
            registry,
            cache,
            discovery,
            models,
            defaults: Arc::new(defaults),
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn defaults(&self) -> &PipelineConfig {
        &self.defaults
    }

    /// Validate, register and spawn a job. Returns once the job is queued.
    pub async fn start(&self, request: StartJob) -> Result<JobId> {
        let config = match &request.config {
            Some(patch) => self.defaults.overlay(patch)?,
            None => (*self.defaults).clone(),
        };
        let window = resolve_window(
            &request.query,
            request.start_date,
            request.end_date,
            config.window_days,
            Utc::now().date_naive(),
        )?;

        let job = self
            .registry
            .create(NewJob {
                query: request.query,
                target_count: request.target_count,
                seed_urls: request.seed_urls,
                focus_on_seed: request.focus_on_seed,
                server_type: request.server_type,
                server_name: request.server_name,
                model_name: request.model_name,
                config,
                window,
            })
            .await?;

        let id = job.id;
        let this = self.clone();
        // Held across the spawn so the run cannot deregister before it is registered.
        let mut runs = self.runs.lock().await;
        let handle = tokio::spawn(async move {
            if let Err(e) = this.run(job).await {
                warn!(job_id = %id, error = %e, "job run ended with error");
            }
            this.runs.lock().await.remove(&id);
        });
        runs.insert(id, handle);
        Ok(id)
    }

    /// Wait for a job's run task to finish.
    pub async fn join(&self, id: JobId) {
        let handle = self.runs.lock().await.remove(&id);
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn run(&self, job: Job) -> Result<()> {
        let id = job.id;
        let registry = &self.registry;

        let model = match self
            .models
            .resolve(job.server_type, &job.server_name, &job.model_name)
            .await
        {
            Ok(model) => model,
            Err(e) => {
                registry
                    .log(id, LogLevel::Error, format!("model unavailable: {}", e))
                    .await;
                registry.fail(id, FailureReason::ModelUnavailable).await?;
                return Ok(());
            }
        };

        registry.transition(id, JobStatus::Discovering).await?;
        let cancel = registry.cancel_token(id).await?;
        let halt = cancel.child_token();
        let concurrency = job.config.fetch.global_concurrency.max(1);
        let grace = exhaustion_grace(&job.config);

        let ctx = Arc::new(WorkerContext::new(
            job,
            registry.clone(),
            self.cache.clone(),
            model,
            halt.clone(),
        ));

        let (tx, rx) = mpsc::channel::<Candidate>(concurrency * 4);
        let rx = Arc::new(Mutex::new(rx));
        let drained = CancellationToken::new();

        let mut workers = JoinSet::new();
        for _ in 0..concurrency {
            workers.spawn(worker_loop(ctx.clone(), rx.clone(), drained.clone()));
        }
        let producer = tokio::spawn(produce(ctx.clone(), self.discovery.clone(), tx));

        let deadline = async {
            tokio::select! {
                _ = drained.cancelled() => {}
                _ = halt.cancelled() => {}
            }
            tokio::time::sleep(grace).await;
        };
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                joined = workers.join_next() => match joined {
                    None => break,
                    Some(Err(e)) if e.is_panic() => warn!(job_id = %id, "worker panicked"),
                    Some(_) => {}
                },
                _ = &mut deadline => {
                    if !workers.is_empty() {
                        registry
                            .log(
                                id,
                                LogLevel::Warning,
                                format!("aborting {} worker(s) after {:?} grace", workers.len(), grace),
                            )
                            .await;
                        workers.abort_all();
                        while workers.join_next().await.is_some() {}
                    }
                    break;
                }
            }
        }

        halt.cancel();
        producer.abort();
        if let Err(e) = producer.await {
            if e.is_panic() {
                warn!(job_id = %id, "producer panicked");
            }
        }

        self.finalize(&ctx, cancel.is_cancelled()).await
    }

    async fn finalize(&self, ctx: &WorkerContext, cancelled: bool) -> Result<()> {
        let id = ctx.id();
        let registry = &self.registry;

        // Drafts left pending by aborted workers.
        if !cancelled {
            for draft in registry.drafts(id).await? {
                if draft.qa_status != QaStatus::Pending {
                    continue;
                }
                let decision = qa::review(
                    &draft,
                    &ctx.job.config.qa,
                    ctx.model.as_ref(),
                    ctx.extraction_timeout(),
                )
                .await;
                registry.record_qa(id, draft.id, &decision).await?;
            }
        }

        let job = registry.get(id).await?;
        let drafts = registry.drafts(id).await?;
        let accepted = drafts
            .iter()
            .filter(|d| d.qa_status == QaStatus::Accepted)
            .count();

        if accepted == 0 {
            if cancelled {
                registry.transition(id, JobStatus::Canceled).await?;
            } else if job.counters.discovered == 0 {
                registry
                    .log(id, LogLevel::Error, "no candidates discovered")
                    .await;
                registry.fail(id, FailureReason::NoCandidates).await?;
            } else {
                registry
                    .log(id, LogLevel::Error, "no drafts were accepted")
                    .await;
                registry.fail(id, FailureReason::NoAcceptedDrafts).await?;
            }
            return Ok(());
        }

        let report = ResearchReport {
            id: Uuid::now_v7(),
            job_id: id,
            query: job.query.clone(),
            result: build_markdown(&job.config.report.title, &job.window, &drafts),
            server_name: job.server_name.clone(),
            model_name: job.model_name.clone(),
            draft_count: accepted,
            created_at: Utc::now(),
        };
        let research_id = report.id;
        match registry.finalize(id, report).await {
            Ok(job) => {
                registry
                    .log(
                        id,
                        LogLevel::Info,
                        format!(
                            "finalized: research_id={}, accepted={}/{}",
                            research_id, job.accepted_count, job.target_count
                        ),
                    )
                    .await;
                info!(job_id = %id, research_id = %research_id, accepted, "job finalized");
            }
            Err(e) => {
                registry
                    .log(id, LogLevel::Error, format!("finalize failed: {}", e))
                    .await;
                registry.fail(id, FailureReason::FinalizeFailed).await?;
            }
        }
        Ok(())
    }
}

/// Grace for busy workers once dispatch has stopped.
pub fn exhaustion_grace(config: &PipelineConfig) -> Duration {
    match config.fetch.exhaustion_grace_secs {
        Some(secs) => Duration::from_secs(secs),
        None => Duration::from_secs(
            config.fetch.fetch_timeout_secs + 2 * config.fetch.extraction_timeout_secs + 5,
        ),
    }
}

async fn worker_loop(
    ctx: Arc<WorkerContext>,
    rx: Arc<Mutex<mpsc::Receiver<Candidate>>>,
    drained: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = ctx.halt.cancelled() => return,
            next = async { rx.lock().await.recv().await } => next,
        };
        let Some(candidate) = next else {
            drained.cancel();
            return;
        };
        // Halt may have fired while this candidate was being received.
        if ctx.halt.is_cancelled() {
            return;
        }
        let url = candidate.url.clone();
        if let Err(e) = ctx.process(candidate).await {
            warn!(job_id = %ctx.id(), url = %url, error = %e, "candidate processing failed");
        }
    }
}

/// Discovery stages for the job's mode, in the order they run.
#[derive(Debug, Clone, Copy)]
enum Stage {
    SearchPage(usize),
    Rss,
    Sitemaps,
    Crawl,
}

fn stages(config: &PipelineConfig) -> Vec<Stage> {
    match config.discovery.mode {
        DiscoveryMode::Search => (0..config.discovery.max_search_pages)
            .map(Stage::SearchPage)
            .collect(),
        DiscoveryMode::ApiFree => vec![Stage::Rss, Stage::Sitemaps, Stage::Crawl],
    }
}

async fn produce(ctx: Arc<WorkerContext>, discovery: Arc<Discovery>, tx: mpsc::Sender<Candidate>) {
    let id = ctx.id();
    let job = &ctx.job;
    let registry = &ctx.registry;
    let budget = job.config.candidate_budget(job.target_count);
    let mut enqueued = 0usize;

    let seeds = Discovery::seeds(&job.seed_urls);
    let had_seeds = !seeds.is_empty();
    if had_seeds {
        let (flow, added) = enqueue(&ctx, &tx, seeds, budget).await;
        enqueued += added;
        registry
            .log(id, LogLevel::Info, format!("enqueued {} seed URL(s)", added))
            .await;
        if matches!(flow, Flow::Stop) {
            return;
        }

        if job.focus_on_seed {
            let mut pending = ctx.pending.subscribe();
            tokio::select! {
                _ = pending.wait_for(|n| *n == 0) => {}
                _ = ctx.halt.cancelled() => return,
            }
            match registry.get(id).await {
                Ok(snapshot) if !snapshot.target_reached() => {
                    registry
                        .log(
                            id,
                            LogLevel::Info,
                            "seeds exhausted below target, continuing discovery",
                        )
                        .await
                }
                _ => return,
            }
        }
    }

    if job.config.discovery.mode == DiscoveryMode::Search && !discovery.has_search_providers(job) {
        if !had_seeds {
            registry
                .log(id, LogLevel::Warning, "no search providers enabled and no seed URLs")
                .await;
        }
        return;
    }

    for stage in stages(&job.config) {
        if ctx.halt.is_cancelled() || enqueued >= budget {
            break;
        }
        let batch = match stage {
            Stage::SearchPage(page) => discovery.search_page(job, page).await,
            Stage::Rss => discovery.rss(job).await,
            Stage::Sitemaps => discovery.sitemaps(job).await,
            Stage::Crawl => discovery.crawl(job).await,
        };
        for failure in &batch.failures {
            registry
                .log(
                    id,
                    LogLevel::Warning,
                    format!("{} failed: {}", failure.source, failure.reason),
                )
                .await;
        }
        if batch.candidates.is_empty() && matches!(stage, Stage::SearchPage(_)) {
            break;
        }
        let (flow, added) = enqueue(&ctx, &tx, batch.candidates, budget - enqueued).await;
        enqueued += added;
        if matches!(flow, Flow::Stop) {
            return;
        }
    }

    if enqueued >= budget {
        registry
            .log(id, LogLevel::Info, format!("candidate budget of {} reached", budget))
            .await;
    }
}

/// Push up to `limit` unseen candidates onto the queue.
async fn enqueue(
    ctx: &WorkerContext,
    tx: &mpsc::Sender<Candidate>,
    candidates: Vec<Candidate>,
    limit: usize,
) -> (Flow, usize) {
    let mut added = 0usize;
    for candidate in candidates {
        if added >= limit {
            break;
        }
        if ctx.halt.is_cancelled() {
            return (Flow::Stop, added);
        }
        match ctx.registry.mark_discovered(ctx.id(), &candidate.url).await {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                warn!(job_id = %ctx.id(), error = %e, "could not record candidate");
                return (Flow::Stop, added);
            }
        }
        ctx.pending.send_modify(|n| *n += 1);
        let sent = tokio::select! {
            sent = tx.send(candidate) => sent.is_ok(),
            _ = ctx.halt.cancelled() => false,
        };
        if !sent {
            ctx.pending.send_modify(|n| *n = n.saturating_sub(1));
            return (Flow::Stop, added);
        }
        added += 1;
    }
    (Flow::Continue, added)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grace_defaults_to_fetch_plus_two_extractions() {
        let mut config = PipelineConfig::default();
        config.fetch.fetch_timeout_secs = 10;
        config.fetch.extraction_timeout_secs = 20;
        assert_eq!(exhaustion_grace(&config), Duration::from_secs(55));

        config.fetch.exhaustion_grace_secs = Some(3);
        assert_eq!(exhaustion_grace(&config), Duration::from_secs(3));
    }

    #[test]
    fn test_stages_follow_mode() {
        let mut config = PipelineConfig::default();
        config.discovery.mode = DiscoveryMode::Search;
        config.discovery.max_search_pages = 3;
        assert_eq!(stages(&config).len(), 3);

        config.discovery.mode = DiscoveryMode::ApiFree;
        assert!(matches!(
            stages(&config).as_slice(),
            [Stage::Rss, Stage::Sitemaps, Stage::Crawl]
        ));
    }
}
