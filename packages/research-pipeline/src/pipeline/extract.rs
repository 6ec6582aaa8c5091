//! Prompt rendering and parsing of model extraction output.
//!
//! Models are asked for JSON, but small local models often wrap it in code
//! fences or answer with `Label: value` lines instead. Both are accepted.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde_json::Value;

use crate::error::{ExtractionError, ExtractionResult};
use crate::types::config::ARTICLE_PLACEHOLDER;
use crate::types::draft::{AttackMethod, IncidentFields};

/// Article text beyond this many characters is cut before prompting.
pub const MAX_ARTICLE_CHARS: usize = 12_000;

static CVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bCVE-\d{4}-\d{4,7}\b").expect("valid regex"));

/// Substitute the (truncated) article into the prompt template.
pub fn render_prompt(template: &str, article: &str) -> String {
    let truncated = match article.char_indices().nth(MAX_ARTICLE_CHARS) {
        Some((idx, _)) => &article[..idx],
        None => article,
    };
    template.replace(ARTICLE_PLACEHOLDER, truncated)
}

/// Parse a model response into incident fields.
pub fn parse_response(raw: &str) -> ExtractionResult<IncidentFields> {
    let fields = match json_object(raw) {
        Some(obj) => from_json(&obj),
        None => from_labeled_lines(raw),
    };
    if fields.summary.trim().is_empty() {
        return Err(ExtractionError::Parse {
            reason: "response has no summary".to_string(),
        });
    }
    Ok(fields)
}

/// Apply date prettifying and merge CVE ids found in the page.
pub fn post_process(mut fields: IncidentFields, page_text: &str) -> IncidentFields {
    fields.date = fields.date.as_deref().and_then(prettify_date);
    fields.exploit_used = merge_cves(&fields.exploit_used, page_text);
    fields
}

fn json_object(raw: &str) -> Option<serde_json::Map<String, Value>> {
    let trimmed = raw.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end().trim_end_matches("```"))
        .unwrap_or(trimmed);

    let start = unfenced.find('{')?;
    let end = unfenced.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&unfenced[start..=end]).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn from_json(obj: &serde_json::Map<String, Value>) -> IncidentFields {
    let text = |keys: &[&str]| -> String {
        keys.iter()
            .find_map(|k| obj.get(*k))
            .map(value_text)
            .unwrap_or_default()
    };

    let incident = ["incident", "is_incident"]
        .iter()
        .find_map(|k| obj.get(*k))
        .map(|v| match v {
            Value::Bool(b) => *b,
            other => truthy(&value_text(other)),
        })
        .unwrap_or(false);

    let date = text(&["date", "date_of_incident", "incident_date"]);
    IncidentFields {
        summary: text(&["summary"]),
        date: non_empty(date),
        targets: text(&["targets", "target"]),
        method: AttackMethod::parse_loose(&text(&["method", "attack_method"])),
        exploit_used: text(&["exploit_used", "exploit", "exploits"]),
        incident,
    }
}

fn from_labeled_lines(raw: &str) -> IncidentFields {
    let mut fields = IncidentFields::default();
    for line in raw.lines() {
        let line = line.trim().trim_start_matches(['-', '*', ' ']);
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().trim_matches('*').trim().to_string();
        let label: String = label
            .chars()
            .filter(|c| c.is_alphabetic())
            .flat_map(|c| c.to_lowercase())
            .collect();
        match label.as_str() {
            "summary" => fields.summary = value,
            "dateofincident" | "date" | "incidentdate" => fields.date = non_empty(value),
            "targets" | "target" => fields.targets = value,
            "method" | "attackmethod" => fields.method = AttackMethod::parse_loose(&value),
            "exploitused" | "exploit" => fields.exploit_used = value,
            "incident" | "isincident" => fields.incident = truthy(&value),
            _ => {}
        }
    }
    fields
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        Value::Array(items) => items
            .iter()
            .map(value_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

fn truthy(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "true" | "yes" | "y" | "1"
    )
}

fn non_empty(value: String) -> Option<String> {
    let lower = value.trim().to_lowercase();
    if lower.is_empty() || matches!(lower.as_str(), "unknown" | "n/a" | "none" | "null") {
        None
    } else {
        Some(value.trim().to_string())
    }
}

/// `2025-03-04` becomes `March 4, 2025`; anything else passes through.
pub fn prettify_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let head = raw.get(..10).unwrap_or(raw);
    for format in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(head, format) {
            return Some(date.format("%B %-d, %Y").to_string());
        }
    }
    Some(raw.to_string())
}

/// Append CVE ids from the page that the model left out.
pub fn merge_cves(exploit_used: &str, page_text: &str) -> String {
    let present = exploit_used.to_uppercase();
    let mut extra: Vec<String> = Vec::new();
    for m in CVE.find_iter(page_text) {
        let id = m.as_str().to_uppercase();
        if !present.contains(&id) && !extra.contains(&id) {
            extra.push(id);
        }
    }
    if extra.is_empty() {
        return exploit_used.to_string();
    }
    let extra = extra.join(", ");
    if exploit_used.trim().is_empty() {
        extra
    } else {
        format!("{}; {}", exploit_used.trim(), extra)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_prompt_truncates_by_chars() {
        let article = "é".repeat(MAX_ARTICLE_CHARS + 10);
        let prompt = render_prompt("Article: {ARTICLE}", &article);
        assert_eq!(prompt.chars().count(), "Article: ".len() + MAX_ARTICLE_CHARS);
    }

    #[test]
    fn test_parse_fenced_json() {
        let raw = "```json\n{\"summary\": \"Hospital hit by ransomware.\", \"date\": \"2025-03-04\", \"targets\": \"Hospital\", \"method\": \"ransomware\", \"exploit_used\": null, \"incident\": \"yes\"}\n```";
        let fields = parse_response(raw).unwrap();
        assert_eq!(fields.summary, "Hospital hit by ransomware.");
        assert_eq!(fields.method, Some(AttackMethod::Ransomware));
        assert_eq!(fields.exploit_used, "");
        assert!(fields.incident);
    }

    #[test]
    fn test_parse_labeled_lines() {
        let raw = "**Summary:** Council suffered a data breach.\n\
                   Date of Incident: unknown\n\
                   Targets: City council\n\
                   Method: Data breach\n\
                   Exploit Used: CVE-2024-1234\n\
                   Incident?: Yes";
        let fields = parse_response(raw).unwrap();
        assert_eq!(fields.summary, "Council suffered a data breach.");
        assert_eq!(fields.date, None);
        assert_eq!(fields.targets, "City council");
        assert_eq!(fields.method, Some(AttackMethod::DataBreach));
        assert!(fields.incident);
    }

    #[test]
    fn test_missing_summary_is_parse_error() {
        assert!(matches!(
            parse_response("I cannot help with that."),
            Err(ExtractionError::Parse { .. })
        ));
        assert!(parse_response("{\"summary\": \"\"}").is_err());
    }

    #[test]
    fn test_prettify_date() {
        assert_eq!(prettify_date("2025-03-04").as_deref(), Some("March 4, 2025"));
        assert_eq!(
            prettify_date("2025-03-04T10:00:00Z").as_deref(),
            Some("March 4, 2025")
        );
        assert_eq!(prettify_date("early March").as_deref(), Some("early March"));
        assert_eq!(prettify_date("  "), None);
    }

    #[test]
    fn test_merge_cves() {
        let page = "Attackers used cve-2024-3400 and CVE-2023-4966, plus CVE-2024-3400 again.";
        assert_eq!(
            merge_cves("", page),
            "CVE-2024-3400, CVE-2023-4966"
        );
        assert_eq!(
            merge_cves("Exploited CVE-2024-3400 in PAN-OS", page),
            "Exploited CVE-2024-3400 in PAN-OS; CVE-2023-4966"
        );
        assert_eq!(merge_cves("phishing kit", "no ids here"), "phishing kit");
    }

    #[test]
    fn test_post_process() {
        let fields = IncidentFields {
            summary: "s".to_string(),
            date: Some("2025-01-09".to_string()),
            ..Default::default()
        };
        let fields = post_process(fields, "see CVE-2025-0001");
        assert_eq!(fields.date.as_deref(), Some("January 9, 2025"));
        assert_eq!(fields.exploit_used, "CVE-2025-0001");
    }
}
