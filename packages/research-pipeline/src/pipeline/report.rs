//! Markdown report assembly.

use std::cmp::Ordering;

use crate::types::draft::{Draft, QaStatus};
use crate::types::job::DateWindow;

const SECTION_BREAK: &str = "\n<br><br>\n\n";

/// Accepted drafts ordered by score, highest first; ties keep fetch order.
pub fn ordered_accepted(drafts: &[Draft]) -> Vec<&Draft> {
    let mut accepted: Vec<&Draft> = drafts
        .iter()
        .filter(|d| d.qa_status == QaStatus::Accepted)
        .collect();
    accepted.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(a.sequence.cmp(&b.sequence))
    });
    accepted
}

/// Render the final report for the accepted drafts.
pub fn build_markdown(title: &str, window: &DateWindow, drafts: &[Draft]) -> String {
    let mut out = format!("# {} ({})\n{}", title, window.label(), SECTION_BREAK);
    for (idx, draft) in ordered_accepted(drafts).into_iter().enumerate() {
        out.push_str(&section(idx + 1, draft));
    }
    out
}

fn section(idx: usize, draft: &Draft) -> String {
    let mut lines = vec![
        format!("## {}. {}\n", idx, draft.title),
        format!("**{}**\n", draft.summary),
    ];
    let mut field = |label: &str, value: &str| {
        if !value.trim().is_empty() {
            lines.push(format!("- {}: {}", label, value.trim()));
        }
    };
    field("Date of Incident", draft.date.as_deref().unwrap_or_default());
    field("Targets", &draft.targets);
    field("Method", draft.method.map(|m| m.label()).unwrap_or_default());
    field("Exploit Used", &draft.exploit_used);
    field("Relevance", draft.relevance.as_deref().unwrap_or_default());
    field("Source", &draft.source_url);

    let mut body = lines.join("\n");
    body.push('\n');
    body.push_str(SECTION_BREAK);
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::draft::AttackMethod;
    use chrono::{NaiveDate, Utc};
    use uuid::Uuid;

    fn draft(title: &str, score: f64, sequence: u64, status: QaStatus) -> Draft {
        Draft {
            id: Uuid::now_v7(),
            job_id: Uuid::now_v7(),
            title: title.to_string(),
            date: Some("March 4, 2025".to_string()),
            source_url: format!("https://example.com/{}", sequence),
            summary: format!("{} summary", title),
            targets: "Example Corp".to_string(),
            method: Some(AttackMethod::Ransomware),
            exploit_used: String::new(),
            incident: true,
            relevance: None,
            score,
            qa_status: status,
            qa_message: None,
            sequence,
            canonical_url: format!("https://example.com/{}", sequence),
            title_key: title.to_lowercase(),
            content_hash: String::new(),
            created_at: Utc::now(),
        }
    }

    fn window() -> DateWindow {
        DateWindow {
            start: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2025, 3, 7).unwrap(),
        }
    }

    #[test]
    fn test_order_by_score_then_sequence() {
        let drafts = vec![
            draft("Low", 1.0, 0, QaStatus::Accepted),
            draft("TieLater", 3.0, 5, QaStatus::Accepted),
            draft("Rejected", 9.0, 1, QaStatus::Rejected),
            draft("TieEarlier", 3.0, 2, QaStatus::Accepted),
        ];
        let titles: Vec<_> = ordered_accepted(&drafts).iter().map(|d| d.title.as_str()).collect();
        assert_eq!(titles, vec!["TieEarlier", "TieLater", "Low"]);
    }

    #[test]
    fn test_markdown_layout() {
        let drafts = vec![
            draft("Second", 1.0, 1, QaStatus::Accepted),
            draft("First", 2.0, 0, QaStatus::Accepted),
        ];
        let md = build_markdown("Cyber Threats and Risks", &window(), &drafts);

        assert!(md.starts_with("# Cyber Threats and Risks (Mar 1 - Mar 7, 2025)\n"));
        let first = md.find("## 1. First").unwrap();
        let second = md.find("## 2. Second").unwrap();
        assert!(first < second);
        assert!(md.contains("**First summary**"));
        assert!(md.contains("- Method: Ransomware"));
        assert!(md.contains("- Source: https://example.com/0"));
        assert!(!md.contains("- Exploit Used:"));
    }
}
