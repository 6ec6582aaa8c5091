//! RSS 2.0 and Atom feed item extraction.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;

use crate::fetchers::html::decode_entities;

/// One feed item.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedItem {
    pub url: String,
    pub title: String,
    pub published: Option<DateTime<Utc>>,
}

static ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(item|entry)\b[^>]*>(.*?)</(?:item|entry)>").expect("valid regex")
});
static CDATA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!\[CDATA\[(.*?)\]\]>").expect("valid regex"));
static ATOM_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<link\b([^>]*)/?>"#).expect("valid regex")
});
static HREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)href\s*=\s*["']([^"']+)["']"#).expect("valid regex"));
static REL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)rel\s*=\s*["']([^"']+)["']"#).expect("valid regex"));

/// Extract items from an RSS or Atom document.
///
/// Items without a usable link are skipped. Dates are taken from
/// `pubDate`, `published`, `updated` or `dc:date`, in that order.
pub fn parse_feed(xml: &str) -> Vec<FeedItem> {
    ITEM.captures_iter(xml)
        .filter_map(|cap| {
            let body = cap.get(2)?.as_str();
            let url = item_link(body)?;
            let title = element_text(body, "title").unwrap_or_default();
            let published = ["pubDate", "published", "updated", "dc:date"]
                .iter()
                .filter_map(|tag| element_text(body, tag))
                .find_map(|raw| parse_feed_date(&raw));
            Some(FeedItem {
                url,
                title,
                published,
            })
        })
        .collect()
}

fn item_link(body: &str) -> Option<String> {
    if let Some(text) = element_text(body, "link").filter(|t| t.starts_with("http")) {
        return Some(text);
    }
    // Atom: prefer rel="alternate" or no rel
    for cap in ATOM_LINK.captures_iter(body) {
        let attrs = cap.get(1).map(|m| m.as_str()).unwrap_or("");
        let rel = REL
            .captures(attrs)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_lowercase());
        if matches!(rel.as_deref(), None | Some("alternate")) {
            if let Some(href) = HREF.captures(attrs).and_then(|c| c.get(1)) {
                return Some(decode_entities(href.as_str()));
            }
        }
    }
    ["guid", "id"]
        .iter()
        .filter_map(|tag| element_text(body, tag))
        .find(|t| t.starts_with("http"))
}

fn element_text(body: &str, tag: &str) -> Option<String> {
    let pattern = format!(r"(?is)<{}\b[^>]*>(.*?)</{}>", regex::escape(tag), regex::escape(tag));
    let re = Regex::new(&pattern).ok()?;
    let raw = re.captures(body)?.get(1)?.as_str();
    let unwrapped = CDATA.replace_all(raw, "$1");
    let text = decode_entities(unwrapped.trim());
    (!text.is_empty()).then_some(text)
}

/// Parse RFC 2822, RFC 3339 or bare `YYYY-MM-DD` dates.
pub fn parse_feed_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|d| d.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw.get(..10)?, "%Y-%m-%d")
                .ok()?
                .and_hms_opt(0, 0, 0)
                .map(|d| d.and_utc())
        })
}
