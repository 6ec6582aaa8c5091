//! In-memory storage implementation for testing and development.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;
use crate::traits::store::{CacheStore, RecordStore};
use crate::types::{
    cache::{CacheEntry, DomainRollup},
    draft::Draft,
    job::{Job, JobId},
    report::ResearchReport,
};

/// In-memory storage for cache entries and pipeline records.
///
/// Useful for testing and development. Not suitable for production
/// as data is lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
    domain_errors: RwLock<HashMap<String, u64>>,
    jobs: RwLock<HashMap<JobId, Job>>,
    drafts: RwLock<HashMap<Uuid, Draft>>,
    research: RwLock<HashMap<Uuid, ResearchReport>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of cached entries.
    pub async fn entry_count(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, url: &str) -> Result<Option<CacheEntry>> {
        Ok(self.entries.read().await.get(url).cloned())
    }

    async fn put(&self, entry: CacheEntry) -> Result<()> {
        self.entries.write().await.insert(entry.url.clone(), entry);
        Ok(())
    }

    async fn touch(
        &self,
        url: &str,
        ttl_expires_at: DateTime<Utc>,
        status: u16,
    ) -> Result<Option<CacheEntry>> {
        let mut entries = self.entries.write().await;
        Ok(entries.get_mut(url).map(|entry| {
            entry.ttl_expires_at = ttl_expires_at;
            entry.status = status;
            entry.clone()
        }))
    }

    async fn entries_for_domain(
        &self,
        domain: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CacheEntry>> {
        let entries = self.entries.read().await;
        let mut matching: Vec<CacheEntry> = entries
            .values()
            .filter(|e| e.domain == domain)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.fetched_at.cmp(&a.fetched_at).then(a.url.cmp(&b.url)));
        Ok(matching.into_iter().skip(offset).take(limit).collect())
    }

    async fn domain_rollups(&self) -> Result<Vec<DomainRollup>> {
        let entries = self.entries.read().await;
        let errors = self.domain_errors.read().await;

        let mut rollups: HashMap<String, DomainRollup> = HashMap::new();
        for entry in entries.values() {
            let rollup = rollups
                .entry(entry.domain.clone())
                .or_insert_with(|| empty_rollup(&entry.domain));
            rollup.entries += 1;
            rollup.total_bytes += entry.bytes;
            rollup.last_fetched = rollup.last_fetched.max(Some(entry.fetched_at));
        }
        for (domain, count) in errors.iter() {
            rollups
                .entry(domain.clone())
                .or_insert_with(|| empty_rollup(domain))
                .errors = *count;
        }

        let mut rollups: Vec<DomainRollup> = rollups.into_values().collect();
        rollups.sort_by(|a, b| a.domain.cmp(&b.domain));
        Ok(rollups)
    }

    async fn record_error(&self, domain: &str) -> Result<()> {
        *self
            .domain_errors
            .write()
            .await
            .entry(domain.to_string())
            .or_default() += 1;
        Ok(())
    }

    async fn delete_domain(&self, domain: &str) -> Result<u64> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.domain != domain);
        self.domain_errors.write().await.remove(domain);
        Ok((before - entries.len()) as u64)
    }

    async fn delete_all(&self) -> Result<u64> {
        let mut entries = self.entries.write().await;
        let count = entries.len() as u64;
        entries.clear();
        self.domain_errors.write().await.clear();
        Ok(count)
    }
}

fn empty_rollup(domain: &str) -> DomainRollup {
    DomainRollup {
        domain: domain.to_string(),
        entries: 0,
        last_fetched: None,
        total_bytes: 0,
        errors: 0,
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn save_job(&self, job: &Job) -> Result<()> {
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn load_job(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn list_jobs(&self) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn save_draft(&self, draft: &Draft) -> Result<()> {
        self.drafts.write().await.insert(draft.id, draft.clone());
        Ok(())
    }

    async fn drafts_for_job(&self, job_id: JobId) -> Result<Vec<Draft>> {
        let mut drafts: Vec<Draft> = self
            .drafts
            .read()
            .await
            .values()
            .filter(|d| d.job_id == job_id)
            .cloned()
            .collect();
        drafts.sort_by_key(|d| d.sequence);
        Ok(drafts)
    }

    async fn save_research(&self, report: &ResearchReport) -> Result<()> {
        self.research.write().await.insert(report.id, report.clone());
        Ok(())
    }

    async fn load_research(&self, id: Uuid) -> Result<Option<ResearchReport>> {
        Ok(self.research.read().await.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(url: &str, domain: &str, bytes: u64) -> CacheEntry {
        let now = Utc::now();
        CacheEntry {
            url: url.to_string(),
            domain: domain.to_string(),
            status: 200,
            fetched_at: now,
            etag: None,
            content_type: None,
            bytes,
            ttl_expires_at: now + Duration::hours(1),
            body: "x".repeat(bytes as usize),
        }
    }

    #[tokio::test]
    async fn test_rollups_derive_from_entries() {
        let store = MemoryStore::new();
        store.put(entry("https://a.com/1", "a.com", 10)).await.unwrap();
        store.put(entry("https://a.com/2", "a.com", 5)).await.unwrap();
        store.put(entry("https://b.com/1", "b.com", 7)).await.unwrap();
        store.record_error("b.com").await.unwrap();

        let rollups = store.domain_rollups().await.unwrap();
        assert_eq!(rollups.len(), 2);
        assert_eq!(rollups[0].domain, "a.com");
        assert_eq!(rollups[0].entries, 2);
        assert_eq!(rollups[0].total_bytes, 15);
        assert_eq!(rollups[1].errors, 1);
    }

    #[tokio::test]
    async fn test_delete_domain_only_touches_that_domain() {
        let store = MemoryStore::new();
        store.put(entry("https://a.com/1", "a.com", 1)).await.unwrap();
        store.put(entry("https://b.com/1", "b.com", 1)).await.unwrap();

        assert_eq!(store.delete_domain("a.com").await.unwrap(), 1);
        assert!(store.get("https://a.com/1").await.unwrap().is_none());
        assert!(store.get("https://b.com/1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_entries_paginate() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .put(entry(&format!("https://a.com/{}", i), "a.com", 1))
                .await
                .unwrap();
        }
        let page = store.entries_for_domain("a.com", 2, 4).await.unwrap();
        assert_eq!(page.len(), 1);
    }

    #[tokio::test]
    async fn test_touch_missing_returns_none() {
        let store = MemoryStore::new();
        let touched = store
            .touch("https://nowhere.com/", Utc::now(), 304)
            .await
            .unwrap();
        assert!(touched.is_none());
    }
}
