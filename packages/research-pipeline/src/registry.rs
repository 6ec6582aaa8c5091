//! Job registry and state machine.
//!
//! Jobs live in a map behind an `RwLock`; each job's mutable state sits
//! behind its own `Mutex`, so mutations of one job are serialized without a
//! global lock. Every successful mutation publishes one event and writes the
//! snapshot through to the record store. Mutations of a terminal job are
//! no-ops.
//!
//! Terminal jobs stay resident for a retention period and are then evicted
//! together with their event channel. Reads of an evicted job are served
//! from the record store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::events::EventBus;
use crate::pipeline::dedup::{title_key, DraftIndex, DuplicateKey};
use crate::pipeline::qa::QaDecision;
use crate::traits::store::RecordStore;
use crate::types::draft::{Draft, NewDraft, QaStatus};
use crate::types::event::{EventKind, LogLevel};
use crate::types::job::{
    Counter, DomainField, FailureReason, Job, JobId, JobStatus, NewJob,
};
use crate::types::report::ResearchReport;
use crate::urls::canon_url;

struct JobState {
    job: Job,
    drafts: Vec<Draft>,
    index: DraftIndex,
    seen_urls: HashSet<String>,
}

struct JobHandle {
    state: Mutex<JobState>,
    cancel: CancellationToken,
}

/// Result of offering a draft to the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum DraftInsert {
    Inserted(Draft),
    Duplicate(DuplicateKey),
    /// The job already reached a terminal status
    JobClosed,
}

/// Result of recording a QA decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QaRecorded {
    /// False when the draft was already decided or the job is closed
    pub applied: bool,
    pub accepted_count: u32,
    pub target_reached: bool,
}

/// How long a terminal job stays in memory before eviction.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(15 * 60);

type JobMap = Arc<RwLock<HashMap<JobId, Arc<JobHandle>>>>;

/// Owner of all job state.
pub struct JobRegistry {
    jobs: JobMap,
    records: Arc<dyn RecordStore>,
    events: EventBus,
    retention: Duration,
}

impl JobRegistry {
    pub fn new(records: Arc<dyn RecordStore>, events: EventBus) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            records,
            events,
            retention: DEFAULT_RETENTION,
        }
    }

    /// Keep terminal jobs resident for `retention` before evicting them.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Whether the job's live state is still held in memory.
    pub async fn is_resident(&self, id: JobId) -> bool {
        self.jobs.read().await.contains_key(&id)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Validate and register a new job in `queued`.
    pub async fn create(&self, input: NewJob) -> Result<Job> {
        if input.query.trim().is_empty() {
            return Err(PipelineError::invalid_config("query must not be empty"));
        }
        if input.target_count == 0 {
            return Err(PipelineError::invalid_config("target_count must be positive"));
        }
        input.config.validate(!input.seed_urls.is_empty())?;

        let job = Job::new(input);
        let handle = Arc::new(JobHandle {
            state: Mutex::new(JobState {
                job: job.clone(),
                drafts: Vec::new(),
                index: DraftIndex::new(),
                seen_urls: HashSet::new(),
            }),
            cancel: CancellationToken::new(),
        });
        self.jobs.write().await.insert(job.id, handle);
        self.events.open(job.id).await;

        self.persist(&job).await;
        self.events
            .publish(
                job.id,
                EventKind::Status {
                    status: JobStatus::Queued,
                    reason: None,
                },
            )
            .await;
        info!(job_id = %job.id, query = %job.query, target = job.target_count, "job created");
        Ok(job)
    }

    async fn handle(&self, id: JobId) -> Result<Arc<JobHandle>> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| PipelineError::not_found("job", id))
    }

    /// Snapshot of a job; falls back to the record store for jobs from a
    /// previous process.
    pub async fn get(&self, id: JobId) -> Result<Job> {
        if let Ok(handle) = self.handle(id).await {
            return Ok(handle.state.lock().await.job.clone());
        }
        self.records
            .load_job(id)
            .await?
            .ok_or_else(|| PipelineError::not_found("job", id))
    }

    /// All jobs, newest first.
    pub async fn list(&self) -> Result<Vec<Job>> {
        let handles: Vec<Arc<JobHandle>> = self.jobs.read().await.values().cloned().collect();
        let mut jobs = Vec::with_capacity(handles.len());
        for handle in handles {
            jobs.push(handle.state.lock().await.job.clone());
        }
        let live: HashSet<JobId> = jobs.iter().map(|j| j.id).collect();
        for stored in self.records.list_jobs().await? {
            if !live.contains(&stored.id) {
                jobs.push(stored);
            }
        }
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    /// Token cancelled when the job is cancelled.
    pub async fn cancel_token(&self, id: JobId) -> Result<CancellationToken> {
        Ok(self.handle(id).await?.cancel.clone())
    }

    /// Request cooperative cancellation. Idempotent.
    pub async fn cancel(&self, id: JobId) -> Result<Job> {
        let handle = match self.handle(id).await {
            Ok(handle) => handle,
            // Jobs from a previous process are already settled.
            Err(_) => return self.get(id).await,
        };
        let mut state = handle.state.lock().await;
        if state.job.status.is_terminal() || state.job.cancel_requested {
            return Ok(state.job.clone());
        }
        state.job.cancel_requested = true;
        state.job.updated_at = Utc::now();
        handle.cancel.cancel();

        self.persist(&state.job).await;
        self.emit_log(id, LogLevel::Warning, "cancellation requested".to_string())
            .await;
        Ok(state.job.clone())
    }

    /// Strict transition: forward moves only, never out of a terminal status.
    pub async fn transition(&self, id: JobId, status: JobStatus) -> Result<Job> {
        let handle = self.handle(id).await?;
        let mut state = handle.state.lock().await;
        let from = state.job.status;
        if !from.can_transition_to(status) {
            return Err(PipelineError::InvalidTransition { from, to: status });
        }
        self.apply_status(&mut state.job, status, None).await;
        Ok(state.job.clone())
    }

    /// Lenient forward move; returns false when already at or past `status`.
    pub async fn advance_to(&self, id: JobId, status: JobStatus) -> Result<bool> {
        let handle = self.handle(id).await?;
        let mut state = handle.state.lock().await;
        let from = state.job.status;
        if from.is_terminal() || from.rank() >= status.rank() {
            return Ok(false);
        }
        self.apply_status(&mut state.job, status, None).await;
        Ok(true)
    }

    async fn apply_status(&self, job: &mut Job, status: JobStatus, reason: Option<FailureReason>) {
        let now = Utc::now();
        job.status = status;
        job.updated_at = now;
        if status.is_terminal() {
            job.finished_at = Some(now);
        }
        if reason.is_some() {
            job.failure_reason = reason;
        }
        self.persist(job).await;
        self.events
            .publish(job.id, EventKind::Status { status, reason })
            .await;
        info!(job_id = %job.id, status = %status, "job status changed");
        if status.is_terminal() {
            self.schedule_eviction(job.id);
        }
    }

    /// Drop a terminal job's in-memory state once the retention period ends.
    fn schedule_eviction(&self, id: JobId) {
        let jobs = self.jobs.clone();
        let events = self.events.clone();
        let retention = self.retention;
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            jobs.write().await.remove(&id);
            events.remove(id).await;
            debug!(job_id = %id, "evicted terminal job");
        });
    }

    pub async fn increment(&self, id: JobId, counter: Counter, delta: u64) -> Result<()> {
        let handle = self.handle(id).await?;
        let mut state = handle.state.lock().await;
        if state.job.status.is_terminal() {
            return Ok(());
        }
        state.job.counters.add(counter, delta);
        self.touch_and_report(&mut state.job).await;
        Ok(())
    }

    pub async fn record_domain(
        &self,
        id: JobId,
        domain: &str,
        field: DomainField,
        delta: u64,
    ) -> Result<()> {
        let handle = self.handle(id).await?;
        let mut state = handle.state.lock().await;
        if state.job.status.is_terminal() {
            return Ok(());
        }
        state
            .job
            .per_domain_stats
            .entry(domain.to_string())
            .or_default()
            .add(field, delta);
        self.touch_and_report(&mut state.job).await;
        Ok(())
    }

    /// Record a discovered URL. Returns false if the job already saw it.
    pub async fn mark_discovered(&self, id: JobId, url: &str) -> Result<bool> {
        let Some(canon) = canon_url(url) else {
            return Ok(false);
        };
        let handle = self.handle(id).await?;
        let mut state = handle.state.lock().await;
        if state.job.status.is_terminal() || !state.seen_urls.insert(canon) {
            return Ok(false);
        }
        state.job.counters.add(Counter::Discovered, 1);
        self.touch_and_report(&mut state.job).await;
        Ok(true)
    }

    /// De-duplicate and insert a draft atomically.
    pub async fn insert_draft(&self, id: JobId, input: NewDraft) -> Result<DraftInsert> {
        let handle = self.handle(id).await?;
        let mut state = handle.state.lock().await;
        if state.job.status.is_terminal() {
            return Ok(DraftInsert::JobClosed);
        }

        let fields = input.fields;
        let draft = Draft {
            id: Uuid::now_v7(),
            job_id: id,
            title_key: title_key(&input.title),
            canonical_url: canon_url(&input.source_url).unwrap_or_else(|| input.source_url.clone()),
            title: input.title,
            date: fields.date,
            source_url: input.source_url,
            summary: fields.summary,
            targets: fields.targets,
            method: fields.method,
            exploit_used: fields.exploit_used,
            incident: fields.incident,
            relevance: input.relevance,
            score: input.score,
            qa_status: QaStatus::Pending,
            qa_message: None,
            sequence: input.sequence,
            content_hash: input.content_hash,
            created_at: Utc::now(),
        };

        if let Some(key) = state.index.duplicate_of(&draft) {
            state.job.counters.add(Counter::Duplicates, 1);
            self.touch_and_report(&mut state.job).await;
            debug!(job_id = %id, url = %draft.source_url, key = ?key, "duplicate draft");
            return Ok(DraftInsert::Duplicate(key));
        }

        state.index.insert(&draft);
        state.drafts.push(draft.clone());
        state.job.counters.add(Counter::Drafts, 1);
        if let Err(e) = self.records.save_draft(&draft).await {
            warn!(job_id = %id, draft_id = %draft.id, error = %e, "failed to persist draft");
        }
        self.touch_and_report(&mut state.job).await;
        Ok(DraftInsert::Inserted(draft))
    }

    /// Set a draft's QA decision once.
    pub async fn record_qa(
        &self,
        id: JobId,
        draft_id: Uuid,
        decision: &QaDecision,
    ) -> Result<QaRecorded> {
        let handle = self.handle(id).await?;
        let mut state = handle.state.lock().await;
        let JobState { job, drafts, .. } = &mut *state;

        let unchanged = QaRecorded {
            applied: false,
            accepted_count: job.accepted_count,
            target_reached: job.target_reached(),
        };
        if job.status.is_terminal() {
            return Ok(unchanged);
        }
        let draft = drafts
            .iter_mut()
            .find(|d| d.id == draft_id)
            .ok_or_else(|| PipelineError::not_found("draft", draft_id))?;
        if draft.qa_status != QaStatus::Pending || decision.status == QaStatus::Pending {
            return Ok(unchanged);
        }

        draft.qa_status = decision.status;
        draft.qa_message = Some(decision.message.clone());
        if let Err(e) = self.records.save_draft(draft).await {
            warn!(job_id = %id, draft_id = %draft_id, error = %e, "failed to persist QA decision");
        }
        let title = draft.title.clone();

        if decision.status == QaStatus::Accepted {
            job.accepted_count += 1;
            info!(
                job_id = %id,
                accepted = job.accepted_count,
                target = job.target_count,
                title = %title,
                "draft accepted"
            );
        } else {
            debug!(job_id = %id, title = %title, reason = %decision.message, "draft rejected");
        }
        self.touch_and_report(job).await;

        Ok(QaRecorded {
            applied: true,
            accepted_count: job.accepted_count,
            target_reached: job.target_reached(),
        })
    }

    /// Drafts of a job in insertion order.
    pub async fn drafts(&self, id: JobId) -> Result<Vec<Draft>> {
        if let Ok(handle) = self.handle(id).await {
            return Ok(handle.state.lock().await.drafts.clone());
        }
        if self.records.load_job(id).await?.is_none() {
            return Err(PipelineError::not_found("job", id));
        }
        self.records.drafts_for_job(id).await
    }

    /// Persist the report and move the job to `finalized`.
    ///
    /// A persistence error leaves the job untouched and is returned.
    pub async fn finalize(&self, id: JobId, report: ResearchReport) -> Result<Job> {
        let handle = self.handle(id).await?;
        let mut state = handle.state.lock().await;
        let from = state.job.status;
        if !from.can_transition_to(JobStatus::Finalized) {
            return Err(PipelineError::InvalidTransition {
                from,
                to: JobStatus::Finalized,
            });
        }
        self.records.save_research(&report).await?;
        state.job.research_id = Some(report.id);
        self.apply_status(&mut state.job, JobStatus::Finalized, None)
            .await;
        Ok(state.job.clone())
    }

    /// Move the job to `failed`. No-op for terminal jobs.
    pub async fn fail(&self, id: JobId, reason: FailureReason) -> Result<Job> {
        let handle = self.handle(id).await?;
        let mut state = handle.state.lock().await;
        if state.job.status.is_terminal() {
            return Ok(state.job.clone());
        }
        self.apply_status(&mut state.job, JobStatus::Failed, Some(reason))
            .await;
        Ok(state.job.clone())
    }

    pub async fn research(&self, research_id: Uuid) -> Result<ResearchReport> {
        self.records
            .load_research(research_id)
            .await?
            .ok_or_else(|| PipelineError::not_found("research", research_id))
    }

    /// Append a log event for the job and mirror it to tracing.
    pub async fn log(&self, id: JobId, level: LogLevel, message: impl Into<String>) {
        self.emit_log(id, level, message.into()).await;
    }

    async fn emit_log(&self, id: JobId, level: LogLevel, message: String) {
        match level {
            LogLevel::Debug => debug!(job_id = %id, "{}", message),
            LogLevel::Info => info!(job_id = %id, "{}", message),
            LogLevel::Warning => warn!(job_id = %id, "{}", message),
            LogLevel::Error => error!(job_id = %id, "{}", message),
        }
        self.events
            .publish(id, EventKind::Log { level, message })
            .await;
    }

    async fn touch_and_report(&self, job: &mut Job) {
        job.updated_at = Utc::now();
        self.persist(job).await;
        self.events
            .publish(
                job.id,
                EventKind::Progress {
                    status: job.status,
                    accepted_count: job.accepted_count,
                    counters: job.counters.clone(),
                    domains: job.per_domain_stats.clone(),
                },
            )
            .await;
    }

    async fn persist(&self, job: &Job) {
        if let Err(e) = self.records.save_job(job).await {
            warn!(job_id = %job.id, error = %e, "failed to persist job snapshot");
        }
    }
}
