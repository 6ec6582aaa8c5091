//! SQLite storage implementation.
//!
//! A file-based storage backend using SQLite. Good for:
//! - Local development
//! - Single-server deployments
//!
//! Jobs, drafts and reports are stored as JSON documents next to the columns
//! used for lookups. Cache entries are stored column by column.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::traits::store::{CacheStore, RecordStore};
use crate::types::{
    cache::{CacheEntry, DomainRollup},
    draft::Draft,
    job::{Job, JobId},
    report::ResearchReport,
};

/// SQLite-backed cache and record store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SQLite store with the given connection URL.
    ///
    /// # Example URLs
    /// - `sqlite::memory:` - In-memory database (ephemeral)
    /// - `sqlite://./research.db?mode=rwc` - Create if not exists
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::connect(database_url, 5).await
    }

    /// Create an in-memory SQLite store (for testing).
    ///
    /// Each in-memory connection is its own database, so the pool holds one.
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:", 1).await
    }

    async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(PipelineError::storage)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                url TEXT PRIMARY KEY,
                domain TEXT NOT NULL,
                status INTEGER NOT NULL,
                fetched_at TEXT NOT NULL,
                etag TEXT,
                content_type TEXT,
                bytes INTEGER NOT NULL,
                ttl_expires_at TEXT NOT NULL,
                body TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_cache_entries_domain ON cache_entries(domain)",
            r#"
            CREATE TABLE IF NOT EXISTS cache_domain_errors (
                domain TEXT PRIMARY KEY,
                errors INTEGER NOT NULL DEFAULT 0
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS research_jobs (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                document TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS research_drafts (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                document TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_research_drafts_job ON research_drafts(job_id)",
            r#"
            CREATE TABLE IF NOT EXISTS research_reports (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL,
                document TEXT NOT NULL
            )
            "#,
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(PipelineError::storage)?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[derive(Debug, FromRow)]
struct EntryRow {
    url: String,
    domain: String,
    status: i64,
    fetched_at: String,
    etag: Option<String>,
    content_type: Option<String>,
    bytes: i64,
    ttl_expires_at: String,
    body: String,
}

impl EntryRow {
    fn into_entry(self) -> Result<CacheEntry> {
        Ok(CacheEntry {
            url: self.url,
            domain: self.domain,
            status: u16::try_from(self.status).map_err(PipelineError::storage)?,
            fetched_at: parse_time(&self.fetched_at)?,
            etag: self.etag,
            content_type: self.content_type,
            bytes: u64::try_from(self.bytes).map_err(PipelineError::storage)?,
            ttl_expires_at: parse_time(&self.ttl_expires_at)?,
            body: self.body,
        })
    }
}

#[derive(Debug, FromRow)]
struct RollupRow {
    domain: String,
    entries: i64,
    last_fetched: Option<String>,
    total_bytes: i64,
    errors: i64,
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| PipelineError::storage(format!("Invalid date: {}", e)))
}

fn from_document<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| PipelineError::storage(format!("Invalid JSON: {}", e)))
}

const ENTRY_COLUMNS: &str =
    "url, domain, status, fetched_at, etag, content_type, bytes, ttl_expires_at, body";

#[async_trait]
impl CacheStore for SqliteStore {
    async fn get(&self, url: &str) -> Result<Option<CacheEntry>> {
        let row = sqlx::query_as::<_, EntryRow>(&format!(
            "SELECT {} FROM cache_entries WHERE url = ?",
            ENTRY_COLUMNS
        ))
        .bind(url)
        .fetch_optional(&self.pool)
        .await
        .map_err(PipelineError::storage)?;

        row.map(EntryRow::into_entry).transpose()
    }

    async fn put(&self, entry: CacheEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cache_entries (url, domain, status, fetched_at, etag, content_type, bytes, ttl_expires_at, body)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                domain = excluded.domain,
                status = excluded.status,
                fetched_at = excluded.fetched_at,
                etag = excluded.etag,
                content_type = excluded.content_type,
                bytes = excluded.bytes,
                ttl_expires_at = excluded.ttl_expires_at,
                body = excluded.body
            "#,
        )
        .bind(&entry.url)
        .bind(&entry.domain)
        .bind(i64::from(entry.status))
        .bind(entry.fetched_at.to_rfc3339())
        .bind(&entry.etag)
        .bind(&entry.content_type)
        .bind(entry.bytes as i64)
        .bind(entry.ttl_expires_at.to_rfc3339())
        .bind(&entry.body)
        .execute(&self.pool)
        .await
        .map_err(PipelineError::storage)?;
        Ok(())
    }

    async fn touch(
        &self,
        url: &str,
        ttl_expires_at: DateTime<Utc>,
        status: u16,
    ) -> Result<Option<CacheEntry>> {
        sqlx::query("UPDATE cache_entries SET ttl_expires_at = ?, status = ? WHERE url = ?")
            .bind(ttl_expires_at.to_rfc3339())
            .bind(i64::from(status))
            .bind(url)
            .execute(&self.pool)
            .await
            .map_err(PipelineError::storage)?;
        self.get(url).await
    }

    async fn entries_for_domain(
        &self,
        domain: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CacheEntry>> {
        let rows = sqlx::query_as::<_, EntryRow>(&format!(
            "SELECT {} FROM cache_entries WHERE domain = ? ORDER BY fetched_at DESC, url ASC LIMIT ? OFFSET ?",
            ENTRY_COLUMNS
        ))
        .bind(domain)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(PipelineError::storage)?;

        rows.into_iter().map(EntryRow::into_entry).collect()
    }

    async fn domain_rollups(&self) -> Result<Vec<DomainRollup>> {
        let rows = sqlx::query_as::<_, RollupRow>(
            r#"
            SELECT d.domain AS domain,
                   COALESCE(c.entries, 0) AS entries,
                   c.last_fetched AS last_fetched,
                   COALESCE(c.total_bytes, 0) AS total_bytes,
                   COALESCE(e.errors, 0) AS errors
            FROM (
                SELECT domain FROM cache_entries
                UNION
                SELECT domain FROM cache_domain_errors
            ) d
            LEFT JOIN (
                SELECT domain, COUNT(*) AS entries, MAX(fetched_at) AS last_fetched, SUM(bytes) AS total_bytes
                FROM cache_entries GROUP BY domain
            ) c ON c.domain = d.domain
            LEFT JOIN cache_domain_errors e ON e.domain = d.domain
            ORDER BY d.domain
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(PipelineError::storage)?;

        rows.into_iter()
            .map(|r| {
                Ok(DomainRollup {
                    domain: r.domain,
                    entries: r.entries.max(0) as u64,
                    last_fetched: r.last_fetched.as_deref().map(parse_time).transpose()?,
                    total_bytes: r.total_bytes.max(0) as u64,
                    errors: r.errors.max(0) as u64,
                })
            })
            .collect()
    }

    async fn record_error(&self, domain: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cache_domain_errors (domain, errors) VALUES (?, 1)
            ON CONFLICT(domain) DO UPDATE SET errors = errors + 1
            "#,
        )
        .bind(domain)
        .execute(&self.pool)
        .await
        .map_err(PipelineError::storage)?;
        Ok(())
    }

    async fn delete_domain(&self, domain: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE domain = ?")
            .bind(domain)
            .execute(&self.pool)
            .await
            .map_err(PipelineError::storage)?;
        sqlx::query("DELETE FROM cache_domain_errors WHERE domain = ?")
            .bind(domain)
            .execute(&self.pool)
            .await
            .map_err(PipelineError::storage)?;
        Ok(result.rows_affected())
    }

    async fn delete_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cache_entries")
            .execute(&self.pool)
            .await
            .map_err(PipelineError::storage)?;
        sqlx::query("DELETE FROM cache_domain_errors")
            .execute(&self.pool)
            .await
            .map_err(PipelineError::storage)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn save_job(&self, job: &Job) -> Result<()> {
        let document = serde_json::to_string(job)?;
        sqlx::query(
            r#"
            INSERT INTO research_jobs (id, created_at, document) VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET document = excluded.document
            "#,
        )
        .bind(job.id.to_string())
        .bind(job.created_at.to_rfc3339())
        .bind(document)
        .execute(&self.pool)
        .await
        .map_err(PipelineError::storage)?;
        Ok(())
    }

    async fn load_job(&self, id: JobId) -> Result<Option<Job>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT document FROM research_jobs WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(PipelineError::storage)?;
        row.map(|(doc,)| from_document(&doc)).transpose()
    }

    async fn list_jobs(&self) -> Result<Vec<Job>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT document FROM research_jobs ORDER BY created_at DESC")
                .fetch_all(&self.pool)
                .await
                .map_err(PipelineError::storage)?;
        rows.iter().map(|(doc,)| from_document(doc)).collect()
    }

    async fn save_draft(&self, draft: &Draft) -> Result<()> {
        let document = serde_json::to_string(draft)?;
        sqlx::query(
            r#"
            INSERT INTO research_drafts (id, job_id, sequence, document) VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET document = excluded.document
            "#,
        )
        .bind(draft.id.to_string())
        .bind(draft.job_id.to_string())
        .bind(draft.sequence as i64)
        .bind(document)
        .execute(&self.pool)
        .await
        .map_err(PipelineError::storage)?;
        Ok(())
    }

    async fn drafts_for_job(&self, job_id: JobId) -> Result<Vec<Draft>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT document FROM research_drafts WHERE job_id = ? ORDER BY sequence ASC",
        )
        .bind(job_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(PipelineError::storage)?;
        rows.iter().map(|(doc,)| from_document(doc)).collect()
    }

    async fn save_research(&self, report: &ResearchReport) -> Result<()> {
        let document = serde_json::to_string(report)?;
        sqlx::query("INSERT INTO research_reports (id, job_id, document) VALUES (?, ?, ?)")
            .bind(report.id.to_string())
            .bind(report.job_id.to_string())
            .bind(document)
            .execute(&self.pool)
            .await
            .map_err(PipelineError::storage)?;
        Ok(())
    }

    async fn load_research(&self, id: Uuid) -> Result<Option<ResearchReport>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT document FROM research_reports WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(PipelineError::storage)?;
        row.map(|(doc,)| from_document(&doc)).transpose()
    }
}
