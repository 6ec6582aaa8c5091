//! Typed errors for the research pipeline.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so the HTTP layer can
//! map each variant to a status code.

use thiserror::Error;

use crate::types::job::JobStatus;

/// Errors surfaced by pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed job start request or config overlay
    #[error("invalid config: {reason}")]
    InvalidConfig { reason: String },

    /// Unknown job, draft, research or domain id
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Network or cache failure for one URL
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// Model call or parse failure for one candidate
    #[error("extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    /// Discovery produced nothing usable
    #[error("no candidates discovered")]
    NoCandidates,

    /// Pipeline ran but nothing cleared scoring and QA
    #[error("no accepted drafts")]
    NoAcceptedDrafts,

    /// Status change that violates the job ordering
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// Model server or model could not be resolved
    #[error("model unavailable: {server_type}/{server_name}/{model_name}")]
    ModelUnavailable {
        server_type: String,
        server_name: String,
        model_name: String,
    },

    /// Search provider request failed
    #[error("search provider {provider} failed: {reason}")]
    Search { provider: String, reason: String },

    /// Storage operation failed
    #[error("storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// JSON parsing error
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string().into())
    }
}

/// Errors from fetching a single URL.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// URL could not be parsed or has no host
    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },

    /// Server answered with a non-success status
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    /// Transport failure
    #[error("network error for {url}: {reason}")]
    Network { url: String, reason: String },

    /// Request exceeded its deadline
    #[error("timeout fetching: {url}")]
    Timeout { url: String },

    /// TTL too large to compute an expiry
    #[error("cache TTL of {ttl_hours} hours is out of range")]
    InvalidTtl { ttl_hours: u32 },

    /// Cache store failed while reading or writing the entry
    #[error("cache storage error: {0}")]
    Storage(String),
}

/// Errors from the extraction model call or its output.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    /// Model server returned an error or was unreachable
    #[error("model error: {0}")]
    Model(String),

    /// Model call exceeded its deadline
    #[error("model call timed out")]
    Timeout,

    /// Model output could not be parsed into incident fields
    #[error("unparseable model output: {reason}")]
    Parse { reason: String },
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Result type alias for fetch operations.
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Result type alias for model operations.
pub type ExtractionResult<T> = std::result::Result<T, ExtractionError>;
