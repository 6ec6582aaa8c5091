//! Lightweight HTML helpers: text extraction, titles and links.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

static STRIP_BLOCKS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    ["script", "style", "nav", "header", "footer", "noscript"]
        .iter()
        .map(|tag| {
            Regex::new(&format!(r"(?is)<{tag}\b[^>]*>.*?</{tag}>")).expect("valid block regex")
        })
        .collect()
});
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]+>").expect("valid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
static TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid regex"));
static ANCHOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\s+[^>]*href\s*=\s*["']([^"']+)["'][^>]*>(.*?)</a>"#)
        .expect("valid regex")
});

/// Reduce an HTML document to readable plain text.
///
/// Boilerplate blocks are dropped before tags are stripped.
pub fn html_to_text(html: &str) -> String {
    let mut text = html.to_string();
    for pattern in STRIP_BLOCKS.iter() {
        text = pattern.replace_all(&text, " ").into_owned();
    }
    let text = TAG.replace_all(&text, " ");
    let text = decode_entities(&text);
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

/// Extract the `<title>` text.
pub fn extract_title(html: &str) -> Option<String> {
    TITLE
        .captures(html)
        .and_then(|cap| cap.get(1))
        .map(|m| decode_entities(WHITESPACE.replace_all(m.as_str(), " ").trim()))
        .filter(|t| !t.is_empty())
}

/// Extract `(absolute_url, anchor_text)` pairs, resolved against `base`.
pub fn extract_links(html: &str, base: &Url) -> Vec<(String, String)> {
    ANCHOR
        .captures_iter(html)
        .filter_map(|cap| {
            let href = cap.get(1)?.as_str().trim();
            if href.starts_with('#')
                || href.starts_with("javascript:")
                || href.starts_with("mailto:")
                || href.starts_with("tel:")
            {
                return None;
            }
            let resolved = base.join(href).ok()?;
            let text = cap
                .get(2)
                .map(|m| {
                    let stripped = TAG.replace_all(m.as_str(), " ");
                    WHITESPACE.replace_all(&stripped, " ").trim().to_string()
                })
                .unwrap_or_default();
            Some((resolved.to_string(), decode_entities(&text)))
        })
        .collect()
}

/// Decode the handful of entities that show up in titles and body text.
pub fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&rsquo;", "'")
        .replace("&amp;", "&")
}
