//! Shared content cache.
//!
//! Serves fresh bodies without network access, revalidates stale ones with
//! the stored ETag, and paces network fetches per domain under a global
//! concurrency ceiling. All writes for one URL are serialized.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard, Semaphore};
use tracing::{debug, info, warn};

use crate::cache::rate_limit::DomainRateLimiter;
use crate::error::{FetchError, FetchResult, PipelineError, Result};
use crate::traits::fetcher::{FetchOutcome, PageFetcher};
use crate::traits::store::CacheStore;
use crate::types::cache::{
    ttl_expiry, CacheEntry, DomainRollup, RefetchSummary, MAX_CACHE_TTL_HOURS,
};
use crate::urls::domain_of;

/// Per-call fetch policy.
#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    pub ttl_hours: u32,
    pub force_bypass: bool,
    pub per_domain_rps: u32,
    pub timeout: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            ttl_hours: 24,
            force_bypass: false,
            per_domain_rps: 1,
            timeout: Duration::from_secs(10),
        }
    }
}

impl FetchOptions {
    /// Reject options the cache cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.ttl_hours > MAX_CACHE_TTL_HOURS {
            return Err(PipelineError::invalid_config(format!(
                "ttl_hours must be at most {}",
                MAX_CACHE_TTL_HOURS
            )));
        }
        Ok(())
    }

    fn expiry(&self) -> FetchResult<chrono::DateTime<Utc>> {
        ttl_expiry(Utc::now(), self.ttl_hours).ok_or(FetchError::InvalidTtl {
            ttl_hours: self.ttl_hours,
        })
    }
}

/// Body returned from the cache.
#[derive(Debug, Clone)]
pub struct CachedBody {
    pub body: String,
    /// The body came from storage rather than a fresh download
    pub from_cache: bool,
    /// A conditional request confirmed the stored body (304)
    pub revalidated: bool,
    pub entry: CacheEntry,
}

/// Content cache shared across jobs.
pub struct ContentCache {
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn PageFetcher>,
    limiter: DomainRateLimiter,
    permits: Arc<Semaphore>,
    url_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ContentCache {
    /// Create a cache allowing at most `global_concurrency` concurrent network fetches.
    pub fn new(
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn PageFetcher>,
        global_concurrency: usize,
    ) -> Self {
        Self {
            store,
            fetcher,
            limiter: DomainRateLimiter::new(),
            permits: Arc::new(Semaphore::new(global_concurrency.max(1))),
            url_locks: Mutex::new(HashMap::new()),
        }
    }

    /// User agent of the underlying fetcher, for robots.txt matching.
    pub fn user_agent(&self) -> &str {
        self.fetcher.user_agent()
    }

    /// Fetch `url`, serving from cache when fresh.
    pub async fn fetch(&self, url: &str, opts: &FetchOptions) -> FetchResult<CachedBody> {
        let domain = domain_of(url).ok_or_else(|| FetchError::InvalidUrl {
            url: url.to_string(),
        })?;
        opts.expiry()?;

        let guard = self.lock_url(url).await;
        let result = self.fetch_locked(url, &domain, opts).await;
        drop(guard);
        self.release_url(url).await;
        result
    }

    async fn fetch_locked(
        &self,
        url: &str,
        domain: &str,
        opts: &FetchOptions,
    ) -> FetchResult<CachedBody> {
        let existing = self.store.get(url).await.map_err(storage_error)?;
        let now = Utc::now();

        if let Some(entry) = &existing {
            if !opts.force_bypass && entry.is_fresh(now) {
                debug!(url = %url, "cache hit");
                return Ok(CachedBody {
                    body: entry.body.clone(),
                    from_cache: true,
                    revalidated: false,
                    entry: entry.clone(),
                });
            }
        }

        let etag = existing.as_ref().and_then(|e| e.etag.clone());
        let outcome = match self.network_fetch(url, domain, etag.as_deref(), opts).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(url = %url, error = %err, "fetch failed; keeping prior cache entry");
                if let Err(e) = self.store.record_error(domain).await {
                    warn!(domain = %domain, error = %e, "failed to record domain error");
                }
                return Err(err);
            }
        };

        let ttl_expires_at = opts.expiry()?;

        match (outcome, existing) {
            (FetchOutcome::NotModified, Some(_)) => {
                let entry = self
                    .store
                    .touch(url, ttl_expires_at, 304)
                    .await
                    .map_err(storage_error)?
                    .ok_or_else(|| FetchError::Storage(format!("entry vanished for {}", url)))?;
                debug!(url = %url, "revalidated with 304");
                Ok(CachedBody {
                    body: entry.body.clone(),
                    from_cache: true,
                    revalidated: true,
                    entry,
                })
            }
            (FetchOutcome::NotModified, None) => {
                if let Err(e) = self.store.record_error(domain).await {
                    warn!(domain = %domain, error = %e, "failed to record domain error");
                }
                Err(FetchError::Status {
                    url: url.to_string(),
                    status: 304,
                })
            }
            (
                FetchOutcome::Fetched {
                    status,
                    body,
                    etag,
                    content_type,
                },
                _,
            ) => {
                let entry = CacheEntry {
                    url: url.to_string(),
                    domain: domain.to_string(),
                    status,
                    fetched_at: Utc::now(),
                    etag,
                    content_type,
                    bytes: body.len() as u64,
                    ttl_expires_at,
                    body,
                };
                self.store.put(entry.clone()).await.map_err(storage_error)?;
                Ok(CachedBody {
                    body: entry.body.clone(),
                    from_cache: false,
                    revalidated: false,
                    entry,
                })
            }
        }
    }

    /// GET `url` without reading or writing the cache.
    ///
    /// Paced and bounded like any other network fetch. Used for feeds,
    /// sitemaps, robots.txt and crawl pages, which are not stored.
    pub async fn fetch_uncached(&self, url: &str, opts: &FetchOptions) -> FetchResult<String> {
        let domain = domain_of(url).ok_or_else(|| FetchError::InvalidUrl {
            url: url.to_string(),
        })?;
        match self.network_fetch(url, &domain, None, opts).await? {
            FetchOutcome::Fetched { body, .. } => Ok(body),
            FetchOutcome::NotModified => Ok(String::new()),
        }
    }

    async fn network_fetch(
        &self,
        url: &str,
        domain: &str,
        etag: Option<&str>,
        opts: &FetchOptions,
    ) -> FetchResult<FetchOutcome> {
        // A request waiting on its domain's pace must not hold a global permit.
        self.limiter.until_ready(domain, opts.per_domain_rps).await;
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| FetchError::Storage("fetch permits closed".to_string()))?;

        match tokio::time::timeout(opts.timeout, self.fetcher.fetch(url, etag)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                url: url.to_string(),
            }),
        }
    }

    async fn lock_url(&self, url: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.url_locks.lock().await;
            locks
                .entry(url.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    async fn release_url(&self, url: &str) {
        let mut locks = self.url_locks.lock().await;
        if let Some(lock) = locks.get(url) {
            // Only the map holds it: nobody is waiting on this URL.
            if Arc::strong_count(lock) == 1 {
                locks.remove(url);
            }
        }
    }

    // Admin surface

    pub async fn list_domains(&self) -> Result<Vec<DomainRollup>> {
        self.store.domain_rollups().await
    }

    pub async fn list_entries(
        &self,
        domain: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CacheEntry>> {
        self.store.entries_for_domain(domain, limit, offset).await
    }

    pub async fn clear_domain(&self, domain: &str) -> Result<u64> {
        let deleted = self.store.delete_domain(domain).await?;
        info!(domain = %domain, deleted, "cleared cache for domain");
        Ok(deleted)
    }

    pub async fn clear_all(&self) -> Result<u64> {
        let deleted = self.store.delete_all().await?;
        info!(deleted, "cleared entire cache");
        Ok(deleted)
    }

    /// Refetch one URL with the given TTL and bypass semantics.
    pub async fn refetch_url(&self, url: &str, opts: &FetchOptions) -> Result<CachedBody> {
        opts.validate()?;
        Ok(self.fetch(url, opts).await?)
    }

    /// Refetch up to `limit` cached URLs of `domain`, most recent first.
    pub async fn refetch_domain(
        &self,
        domain: &str,
        limit: usize,
        opts: &FetchOptions,
    ) -> Result<RefetchSummary> {
        opts.validate()?;
        let entries = self.store.entries_for_domain(domain, limit, 0).await?;
        let mut summary = RefetchSummary {
            domain: domain.to_string(),
            attempted: entries.len(),
            ..Default::default()
        };

        for entry in entries {
            match self.fetch(&entry.url, opts).await {
                Ok(body) if body.revalidated => summary.not_modified += 1,
                Ok(body) if body.from_cache => summary.from_cache += 1,
                Ok(_) => summary.refetched += 1,
                Err(e) => {
                    warn!(url = %entry.url, error = %e, "domain refetch failed for URL");
                    summary.errors += 1;
                }
            }
        }

        info!(
            domain = %domain,
            attempted = summary.attempted,
            refetched = summary.refetched,
            errors = summary.errors,
            "domain refetch complete"
        );
        Ok(summary)
    }
}

fn storage_error(err: crate::error::PipelineError) -> FetchError {
    FetchError::Storage(err.to_string())
}
