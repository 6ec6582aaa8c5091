//! QA gate deciding which drafts reach the report.

use std::time::Duration;

use tracing::debug;

use crate::traits::model::LanguageModel;
use crate::types::config::{QaConfig, QaPreset};
use crate::types::draft::{Draft, QaStatus};

/// Outcome of reviewing one draft.
#[derive(Debug, Clone, PartialEq)]
pub struct QaDecision {
    pub status: QaStatus,
    pub message: String,
}

impl QaDecision {
    fn accept(message: impl Into<String>) -> Self {
        Self {
            status: QaStatus::Accepted,
            message: message.into(),
        }
    }

    fn reject(message: impl Into<String>) -> Self {
        Self {
            status: QaStatus::Rejected,
            message: message.into(),
        }
    }
}

/// Review a draft under the job's QA settings.
///
/// Only the strict preset calls the model; a model failure rejects.
pub async fn review(
    draft: &Draft,
    cfg: &QaConfig,
    model: &dyn LanguageModel,
    timeout: Duration,
) -> QaDecision {
    if !cfg.enabled {
        return QaDecision::accept("QA disabled");
    }

    match cfg.preset {
        QaPreset::Lenient => {
            if draft.score < cfg.lenient_min_score {
                QaDecision::reject(format!(
                    "score {:.2} below {:.2}",
                    draft.score, cfg.lenient_min_score
                ))
            } else if draft.summary.trim().is_empty() {
                QaDecision::reject("missing summary")
            } else {
                QaDecision::accept("passed lenient checks")
            }
        }
        QaPreset::Strict => {
            if let Some(reason) = policy_violation(draft, cfg) {
                return QaDecision::reject(reason);
            }
            let prompt = review_prompt(draft, &cfg.instructions);
            match tokio::time::timeout(timeout, model.complete(&prompt)).await {
                Err(_) => QaDecision::reject("QA model timed out"),
                Ok(Err(e)) => QaDecision::reject(format!("QA model error: {}", e)),
                Ok(Ok(response)) => {
                    debug!(draft_id = %draft.id, "QA verdict received");
                    parse_verdict(&response)
                }
            }
        }
    }
}

fn policy_violation(draft: &Draft, cfg: &QaConfig) -> Option<String> {
    if draft.score < cfg.min_score {
        return Some(format!("score {:.2} below {:.2}", draft.score, cfg.min_score));
    }
    if cfg.require_summary && draft.summary.trim().is_empty() {
        return Some("missing summary".to_string());
    }
    if cfg.require_incident && !draft.incident {
        return Some("not an incident".to_string());
    }
    None
}

fn review_prompt(draft: &Draft, instructions: &str) -> String {
    format!(
        "{}\n\nTitle: {}\nSummary: {}\nDate of Incident: {}\nTargets: {}\nMethod: {}\nExploit Used: {}\nSource: {}\nScore: {:.2}\n",
        instructions,
        draft.title,
        draft.summary,
        draft.date.as_deref().unwrap_or("unknown"),
        draft.targets,
        draft.method.map(|m| m.label()).unwrap_or("unknown"),
        draft.exploit_used,
        draft.source_url,
        draft.score,
    )
}

/// Read ACCEPT/REJECT from a model answer. Unclear answers reject.
pub fn parse_verdict(response: &str) -> QaDecision {
    let trimmed = response.trim();
    let upper = trimmed.to_uppercase();

    let accepted = if upper.starts_with("ACCEPT") {
        true
    } else if upper.starts_with("REJECT") {
        false
    } else if upper.contains("REJECT") {
        false
    } else if upper.contains("ACCEPT") {
        true
    } else {
        return QaDecision::reject(format!("unclear QA verdict: {}", first_line(trimmed)));
    };

    let verdict = if accepted { "ACCEPT" } else { "REJECT" };
    let reason = match upper.find(verdict) {
        Some(pos) => trimmed
            .get(pos + verdict.len()..)
            .unwrap_or_default()
            .trim_start_matches(|c: char| c.is_alphabetic())
            .trim_start_matches([':', '-', '.', ' ', '\n', '\r'])
            .trim()
            .to_string(),
        None => String::new(),
    };
    let reason = if reason.is_empty() {
        verdict.to_lowercase()
    } else {
        first_line(&reason).to_string()
    };

    if accepted {
        QaDecision::accept(reason)
    } else {
        QaDecision::reject(reason)
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default().trim()
}
