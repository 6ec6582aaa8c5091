//! Per-job progress and log events.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::job::{DomainCounters, FailureReason, JobCounters, JobStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// Event payload shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// Human-readable log line
    Log { level: LogLevel, message: String },
    /// Machine-readable counters snapshot
    Progress {
        status: JobStatus,
        accepted_count: u32,
        counters: JobCounters,
        domains: BTreeMap<String, DomainCounters>,
    },
    /// Status transition
    Status {
        status: JobStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<FailureReason>,
    },
}

/// One event as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    /// Monotonic sequence within the job, starting at 1
    pub seq: u64,
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl JobEvent {
    pub fn event_name(&self) -> &'static str {
        match self.kind {
            EventKind::Log { .. } => "log",
            EventKind::Progress { .. } => "progress",
            EventKind::Status { .. } => "status",
        }
    }

    /// True for the status event that closes a job's stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, EventKind::Status { status, .. } if status.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event_shape() {
        let event = JobEvent {
            seq: 3,
            ts: Utc::now(),
            kind: EventKind::Log {
                level: LogLevel::Warning,
                message: "feed failed".into(),
            },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "log");
        assert_eq!(value["level"], "warning");
        assert_eq!(value["seq"], 3);
        assert_eq!(event.event_name(), "log");
    }

    #[test]
    fn test_terminal_status_event() {
        let event = JobEvent {
            seq: 1,
            ts: Utc::now(),
            kind: EventKind::Status {
                status: JobStatus::Failed,
                reason: Some(FailureReason::NoCandidates),
            },
        };
        assert!(event.is_terminal());
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["reason"], "NoCandidates");
    }
}
