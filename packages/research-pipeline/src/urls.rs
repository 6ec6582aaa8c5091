//! URL normalization and classification helpers.

use url::Url;

/// Canonical form used for dedup: scheme, lowercased host and path, without
/// query, fragment, default port or trailing slash.
pub fn canon_url(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw.trim()).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let host = parsed.host_str()?.to_lowercase();
    let port = parsed
        .port()
        .map(|p| format!(":{}", p))
        .unwrap_or_default();
    let path = parsed.path().trim_end_matches('/');
    Some(format!("{}://{}{}{}", parsed.scheme(), host, port, path))
}

/// Registrable-ish domain of a URL: lowercased host with `www.` removed.
pub fn domain_of(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw.trim()).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
}

/// True if `url`'s host is `domain` or a subdomain of it.
pub fn same_domain(url: &str, domain: &str) -> bool {
    let domain = domain.trim().trim_start_matches("www.").to_lowercase();
    match domain_of(url) {
        Some(host) => host == domain || host.ends_with(&format!(".{}", domain)),
        None => false,
    }
}

const MEDIA_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".webp", ".svg", ".mp4", ".mp3", ".avi", ".mov", ".wmv",
    ".pdf", ".zip", ".rar", ".7z", ".xml", ".css", ".js",
];

const LISTING_SEGMENTS: &[&str] = &["/tag/", "/category/", "/page/", "/author/", "/feed", "/search"];

/// Heuristic filter for links that are probably articles rather than media,
/// listing pages or feeds.
pub fn looks_like_article(url: &str) -> bool {
    let lower = url.to_lowercase();
    let path = lower.split(['?', '#']).next().unwrap_or(&lower);
    if MEDIA_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return false;
    }
    if LISTING_SEGMENTS.iter().any(|seg| path.contains(seg)) {
        return false;
    }
    match Url::parse(url) {
        Ok(parsed) => !parsed.path().trim_matches('/').is_empty(),
        Err(_) => false,
    }
}

/// Include/exclude keyword filter over free text (case-insensitive).
///
/// An empty include list admits everything not excluded.
pub fn passes_keyword_filter(text: &str, include: &[String], exclude: &[String]) -> bool {
    let lower = text.to_lowercase();
    if !include.is_empty() && !include.iter().any(|k| lower.contains(&k.to_lowercase())) {
        return false;
    }
    !exclude.iter().any(|k| lower.contains(&k.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_canon_url_strips_query_fragment_and_slash() {
        assert_eq!(
            canon_url("https://WWW.Example.com/news/story/?utm=1#top").as_deref(),
            Some("https://www.example.com/news/story")
        );
        assert_eq!(
            canon_url("http://example.com:8080/a/").as_deref(),
            Some("http://example.com:8080/a")
        );
        assert_eq!(canon_url("ftp://example.com/file"), None);
        assert_eq!(canon_url("not a url"), None);
    }

    #[test]
    fn test_domain_of_strips_www() {
        assert_eq!(domain_of("https://www.darkreading.com/x").as_deref(), Some("darkreading.com"));
        assert_eq!(domain_of("https://news.sbs.com.au/").as_deref(), Some("news.sbs.com.au"));
    }

    #[test]
    fn test_same_domain_accepts_subdomains() {
        assert!(same_domain("https://blog.example.com/a", "example.com"));
        assert!(same_domain("https://www.example.com/a", "example.com"));
        assert!(!same_domain("https://notexample.com/a", "example.com"));
    }

    #[test]
    fn test_looks_like_article() {
        assert!(looks_like_article("https://example.com/2025/03/ransomware-attack"));
        assert!(!looks_like_article("https://example.com/"));
        assert!(!looks_like_article("https://example.com/tag/ransomware"));
        assert!(!looks_like_article("https://example.com/report.pdf"));
    }

    #[test]
    fn test_keyword_filter() {
        let include = vec!["breach".to_string()];
        let exclude = vec!["sponsored".to_string()];
        assert!(passes_keyword_filter("Major BREACH at bank", &include, &exclude));
        assert!(!passes_keyword_filter("Sponsored breach webinar", &include, &exclude));
        assert!(!passes_keyword_filter("Weather today", &include, &exclude));
        assert!(passes_keyword_filter("Anything", &[], &[]));
    }

    proptest! {
        #[test]
        fn canon_url_is_idempotent(path in "[a-z0-9/]{0,20}", query in "[a-z0-9=&]{0,10}") {
            let raw = format!("https://Example.com/{}?{}", path, query);
            if let Some(once) = canon_url(&raw) {
                prop_assert_eq!(canon_url(&once), Some(once.clone()));
            }
        }
    }
}
