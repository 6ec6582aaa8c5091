//! Job model and lifecycle types.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::config::PipelineConfig;

/// Unique identifier for a job.
pub type JobId = Uuid;

/// Job lifecycle status.
///
/// Non-terminal states are ordered; a job only moves forward through them.
/// The three terminal states are reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Discovering,
    Fetching,
    Parsing,
    Drafting,
    Qa,
    Finalized,
    Failed,
    Canceled,
}

impl JobStatus {
    /// Position in the forward ordering. Terminal states share the last rank.
    pub fn rank(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Discovering => 1,
            Self::Fetching => 2,
            Self::Parsing => 3,
            Self::Drafting => 4,
            Self::Qa => 5,
            Self::Finalized | Self::Failed | Self::Canceled => 6,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finalized | Self::Failed | Self::Canceled)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.is_terminal() || next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Discovering => "discovering",
            Self::Fetching => "fetching",
            Self::Parsing => "parsing",
            Self::Drafting => "drafting",
            Self::Qa => "qa",
            Self::Finalized => "finalized",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a job ended in `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    NoCandidates,
    NoAcceptedDrafts,
    ModelUnavailable,
    FinalizeFailed,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoCandidates => "NoCandidates",
            Self::NoAcceptedDrafts => "NoAcceptedDrafts",
            Self::ModelUnavailable => "ModelUnavailable",
            Self::FinalizeFailed => "FinalizeFailed",
        };
        f.write_str(s)
    }
}

/// Kind of inference server a job's model lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerType {
    Ollama,
    Openai,
    Gemini,
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ollama => "ollama",
            Self::Openai => "openai",
            Self::Gemini => "gemini",
        };
        f.write_str(s)
    }
}

/// Job-level counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounters {
    pub discovered: u64,
    pub fetched: u64,
    pub parsed: u64,
    pub drafts: u64,
    pub duplicates: u64,
    pub errors: u64,
    pub filtered: u64,
}

/// Counter names accepted by `JobRegistry::increment`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Counter {
    Discovered,
    Fetched,
    Parsed,
    Drafts,
    Duplicates,
    Errors,
    Filtered,
}

impl JobCounters {
    pub fn add(&mut self, counter: Counter, delta: u64) {
        let slot = match counter {
            Counter::Discovered => &mut self.discovered,
            Counter::Fetched => &mut self.fetched,
            Counter::Parsed => &mut self.parsed,
            Counter::Drafts => &mut self.drafts,
            Counter::Duplicates => &mut self.duplicates,
            Counter::Errors => &mut self.errors,
            Counter::Filtered => &mut self.filtered,
        };
        *slot = slot.saturating_add(delta);
    }
}

/// Per-domain fetch statistics for one job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainCounters {
    pub fetched: u64,
    pub errors: u64,
}

/// Field names accepted by `JobRegistry::record_domain`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainField {
    Fetched,
    Errors,
}

impl DomainCounters {
    pub fn add(&mut self, field: DomainField, delta: u64) {
        match field {
            DomainField::Fetched => self.fetched = self.fetched.saturating_add(delta),
            DomainField::Errors => self.errors = self.errors.saturating_add(delta),
        }
    }
}

/// Inclusive date window a job researches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    /// Window covering the last `days` days up to `today`.
    pub fn trailing(today: NaiveDate, days: u32) -> Self {
        let start = today - chrono::Duration::days(i64::from(days));
        Self { start, end: today }
    }

    /// Header label such as `Mar 1 - Mar 7, 2025`.
    pub fn label(&self) -> String {
        use chrono::Datelike;
        let start = self.start.format("%b %-d");
        let end = self.end.format("%b %-d, %Y");
        if self.start.year() == self.end.year() {
            format!("{} - {}", start, end)
        } else {
            format!("{}, {} - {}", start, self.start.year(), end)
        }
    }
}

/// One pipeline execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub query: String,
    pub target_count: u32,
    pub seed_urls: Vec<String>,
    pub focus_on_seed: bool,
    pub server_type: ServerType,
    pub server_name: String,
    pub model_name: String,
    pub config: PipelineConfig,
    pub window: DateWindow,
    pub status: JobStatus,
    pub failure_reason: Option<FailureReason>,
    pub accepted_count: u32,
    pub counters: JobCounters,
    pub per_domain_stats: BTreeMap<String, DomainCounters>,
    pub research_id: Option<Uuid>,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Validated input for creating a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub query: String,
    pub target_count: u32,
    pub seed_urls: Vec<String>,
    pub focus_on_seed: bool,
    pub server_type: ServerType,
    pub server_name: String,
    pub model_name: String,
    pub config: PipelineConfig,
    pub window: DateWindow,
}

impl Job {
    pub fn new(input: NewJob) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            query: input.query,
            target_count: input.target_count,
            seed_urls: input.seed_urls,
            focus_on_seed: input.focus_on_seed,
            server_type: input.server_type,
            server_name: input.server_name,
            model_name: input.model_name,
            config: input.config,
            window: input.window,
            status: JobStatus::Queued,
            failure_reason: None,
            accepted_count: 0,
            counters: JobCounters::default(),
            per_domain_stats: BTreeMap::new(),
            research_id: None,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    pub fn target_reached(&self) -> bool {
        self.accepted_count >= self.target_count
    }
}
