use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job::JobId;

/// Finalized research artifact assembled from accepted drafts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchReport {
    pub id: Uuid,
    pub job_id: JobId,
    pub query: String,
    /// Markdown body
    pub result: String,
    pub server_name: String,
    pub model_name: String,
    pub draft_count: usize,
    pub created_at: DateTime<Utc>,
}
