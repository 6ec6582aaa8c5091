//! Storage traits.
//!
//! `CacheStore` backs the shared content cache. `RecordStore` persists jobs,
//! drafts and research reports so they survive restarts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::types::{
    cache::{CacheEntry, DomainRollup},
    draft::Draft,
    job::{Job, JobId},
    report::ResearchReport,
};

/// Durable store of fetched URL bodies.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, url: &str) -> Result<Option<CacheEntry>>;

    /// Insert or overwrite the entry for `entry.url`.
    async fn put(&self, entry: CacheEntry) -> Result<()>;

    /// Refresh TTL after a 304. Returns the updated entry if it exists.
    async fn touch(
        &self,
        url: &str,
        ttl_expires_at: DateTime<Utc>,
        status: u16,
    ) -> Result<Option<CacheEntry>>;

    /// Entries for one domain, most recently fetched first.
    async fn entries_for_domain(
        &self,
        domain: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CacheEntry>>;

    /// Rollups for all domains with at least one entry or recorded error.
    async fn domain_rollups(&self) -> Result<Vec<DomainRollup>>;

    async fn record_error(&self, domain: &str) -> Result<()>;

    /// Returns the number of entries removed.
    async fn delete_domain(&self, domain: &str) -> Result<u64>;

    async fn delete_all(&self) -> Result<u64>;
}

/// Persistence for job, draft and research records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn save_job(&self, job: &Job) -> Result<()>;

    async fn load_job(&self, id: JobId) -> Result<Option<Job>>;

    async fn list_jobs(&self) -> Result<Vec<Job>>;

    /// Insert or update a draft.
    async fn save_draft(&self, draft: &Draft) -> Result<()>;

    async fn drafts_for_job(&self, job_id: JobId) -> Result<Vec<Draft>>;

    async fn save_research(&self, report: &ResearchReport) -> Result<()>;

    async fn load_research(&self, id: Uuid) -> Result<Option<ResearchReport>>;
}
