//! Sitemap parsing on top of the `sitemap` crate.

use std::io::Cursor;

use chrono::{DateTime, Utc};
use sitemap::reader::{SiteMapEntity, SiteMapReader};
use sitemap::structs::LastMod;
use tracing::warn;

/// Parsed contents of one sitemap document.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SitemapDocument {
    /// Page URLs with their `lastmod`, if any
    pub urls: Vec<(String, Option<DateTime<Utc>>)>,
    /// Nested sitemaps listed by an index
    pub nested: Vec<String>,
}

/// Parse a `urlset` or `sitemapindex` document.
pub fn parse_sitemap(xml: &str) -> SitemapDocument {
    let mut doc = SitemapDocument::default();

    for entity in SiteMapReader::new(Cursor::new(xml.as_bytes())) {
        match entity {
            SiteMapEntity::Url(entry) => {
                let lastmod = match entry.lastmod {
                    LastMod::DateTime(dt) => Some(dt.with_timezone(&Utc)),
                    _ => None,
                };
                if let Some(url) = entry.loc.get_url() {
                    doc.urls.push((url.to_string(), lastmod));
                }
            }
            SiteMapEntity::SiteMap(entry) => {
                if let Some(url) = entry.loc.get_url() {
                    doc.nested.push(url.to_string());
                }
            }
            SiteMapEntity::Err(error) => {
                warn!(error = %error, "skipping malformed sitemap entity");
            }
        }
    }

    doc
}

/// Conventional sitemap locations for a domain.
pub fn candidate_locations(domain: &str) -> Vec<String> {
    ["sitemap.xml", "sitemap_index.xml", "sitemap-index.xml"]
        .iter()
        .map(|path| format!("https://{}/{}", domain, path))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_urlset() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>https://example.com/2025/03/breach</loc><lastmod>2025-03-04T10:00:00+00:00</lastmod></url>
  <url><loc>https://example.com/about</loc></url>
</urlset>"#;

        let doc = parse_sitemap(xml);
        assert_eq!(doc.urls.len(), 2);
        assert_eq!(doc.urls[0].0, "https://example.com/2025/03/breach");
        assert!(doc.urls[0].1.is_some());
        assert!(doc.urls[1].1.is_none());
        assert!(doc.nested.is_empty());
    }

    #[test]
    fn test_parse_index() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sitemap><loc>https://example.com/post-sitemap.xml</loc></sitemap>
</sitemapindex>"#;

        let doc = parse_sitemap(xml);
        assert_eq!(doc.nested, vec!["https://example.com/post-sitemap.xml"]);
        assert!(doc.urls.is_empty());
    }

    #[test]
    fn test_candidate_locations() {
        let locations = candidate_locations("example.com");
        assert_eq!(locations[0], "https://example.com/sitemap.xml");
        assert_eq!(locations.len(), 3);
    }
}
