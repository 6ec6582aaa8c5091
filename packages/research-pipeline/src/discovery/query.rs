//! Research window resolution and search query rendering.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::error::{PipelineError, Result};
use crate::types::job::DateWindow;

static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4}-\d{2}-\d{2})\b").expect("valid regex"));

/// Work out the job's date window.
///
/// Explicit dates win; otherwise two ISO dates in the query text define it;
/// otherwise the trailing `window_days` ending today.
pub fn resolve_window(
    query: &str,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    window_days: u32,
    today: NaiveDate,
) -> Result<DateWindow> {
    let window = match (start, end) {
        (Some(start), Some(end)) => DateWindow { start, end },
        (Some(start), None) => DateWindow { start, end: today },
        (None, Some(end)) => DateWindow {
            start: end - chrono::Duration::days(i64::from(window_days)),
            end,
        },
        (None, None) => match dates_in_query(query) {
            Some(window) => window,
            None => DateWindow::trailing(today, window_days),
        },
    };

    if window.start > window.end {
        return Err(PipelineError::invalid_config(format!(
            "start_date {} is after end_date {}",
            window.start, window.end
        )));
    }
    Ok(window)
}

fn dates_in_query(query: &str) -> Option<DateWindow> {
    let mut dates: Vec<NaiveDate> = ISO_DATE
        .captures_iter(query)
        .filter_map(|c| NaiveDate::parse_from_str(c.get(1)?.as_str(), "%Y-%m-%d").ok())
        .take(2)
        .collect();
    if dates.len() < 2 {
        return None;
    }
    dates.sort();
    Some(DateWindow {
        start: dates[0],
        end: dates[1],
    })
}

/// Substitute `{QUERY}`, `{START_DATE}` and `{END_DATE}` into the template.
pub fn render_query(template: &str, query: &str, window: &DateWindow) -> String {
    if template.trim().is_empty() {
        return query.to_string();
    }
    let rendered = template
        .replace("{QUERY}", query)
        .replace("{START_DATE}", &window.start.to_string())
        .replace("{END_DATE}", &window.end.to_string());
    if template.contains("{QUERY}") {
        rendered
    } else {
        format!("{} {}", query, rendered)
    }
}

/// Append focus terms as an OR group.
pub fn with_focus_terms(query: &str, focus_terms: &[String]) -> String {
    if focus_terms.is_empty() {
        return query.to_string();
    }
    format!("{} ({})", query, focus_terms.join(" OR "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_explicit_dates_win() {
        let window = resolve_window(
            "incidents 2024-01-01 to 2024-01-31",
            Some(date("2025-03-01")),
            Some(date("2025-03-07")),
            7,
            date("2025-06-01"),
        )
        .unwrap();
        assert_eq!(window.start, date("2025-03-01"));
        assert_eq!(window.end, date("2025-03-07"));
    }

    #[test]
    fn test_dates_from_query() {
        let window = resolve_window(
            "cyber incidents 2025-03-07 back to 2025-03-01",
            None,
            None,
            7,
            date("2025-06-01"),
        )
        .unwrap();
        assert_eq!(window.start, date("2025-03-01"));
        assert_eq!(window.end, date("2025-03-07"));
    }

    #[test]
    fn test_trailing_default() {
        let window = resolve_window("cyber incidents", None, None, 7, date("2025-06-08")).unwrap();
        assert_eq!(window.start, date("2025-06-01"));
        assert_eq!(window.end, date("2025-06-08"));
    }

    #[test]
    fn test_inverted_window_rejected() {
        let err = resolve_window(
            "q",
            Some(date("2025-03-07")),
            Some(date("2025-03-01")),
            7,
            date("2025-06-01"),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig { .. }));
    }

    #[test]
    fn test_render_query() {
        let window = DateWindow {
            start: date("2025-03-01"),
            end: date("2025-03-07"),
        };
        assert_eq!(
            render_query("{QUERY} from {START_DATE} to {END_DATE}", "ransomware", &window),
            "ransomware from 2025-03-01 to 2025-03-07"
        );
        assert_eq!(
            render_query("after:{START_DATE}", "ransomware", &window),
            "ransomware after:2025-03-01"
        );
        assert_eq!(render_query("", "ransomware", &window), "ransomware");
    }

    #[test]
    fn test_focus_terms() {
        let terms = vec!["breach".to_string(), "CVE".to_string()];
        assert_eq!(with_focus_terms("q", &terms), "q (breach OR CVE)");
        assert_eq!(with_focus_terms("q", &[]), "q");
    }
}
