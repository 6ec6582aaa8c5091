//! Bounded same-domain crawl for allow-listed domains.

use std::collections::{HashSet, VecDeque};

use tracing::{debug, info};
use url::Url;

use super::{Candidate, CandidateSource, Discovery, DiscoveryBatch};
use crate::fetchers::html::extract_links;
use crate::types::job::Job;
use crate::urls::{canon_url, looks_like_article, passes_keyword_filter, same_domain};

/// Deepest link-follow level the crawler accepts.
pub const MAX_CRAWL_DEPTH: u8 = 2;

impl Discovery {
    /// Breadth-first crawl from each allow-listed domain's home page.
    ///
    /// Only article-looking links on the same domain become candidates.
    /// At most `max_pages_per_domain` pages are fetched and the same number
    /// of candidates kept per domain.
    pub async fn crawl(&self, job: &Job) -> DiscoveryBatch {
        let discovery = &job.config.discovery;
        let max_depth = discovery.crawl_depth.min(MAX_CRAWL_DEPTH);
        let budget = discovery.max_pages_per_domain;
        let mut batch = DiscoveryBatch::default();

        for domain in &discovery.crawl_domains {
            let robots = if discovery.respect_robots {
                Some(self.robots_for(domain, job).await)
            } else {
                None
            };

            let start = format!("https://{}/", domain);
            let mut queue: VecDeque<(String, u8)> = VecDeque::from([(start, 0)]);
            let mut visited: HashSet<String> = HashSet::new();
            let mut kept: HashSet<String> = HashSet::new();
            let mut pages = 0usize;
            let mut first_error = None;

            while let Some((page_url, depth)) = queue.pop_front() {
                if pages >= budget || kept.len() >= budget {
                    break;
                }
                let Some(canon) = canon_url(&page_url) else {
                    continue;
                };
                if !visited.insert(canon) {
                    continue;
                }

                let html = match self.get_text(&page_url, job).await {
                    Ok(html) => html,
                    Err(e) => {
                        debug!(url = %page_url, error = %e, "crawl fetch failed");
                        if pages == 0 {
                            first_error = Some(e);
                        }
                        continue;
                    }
                };
                pages += 1;

                let Ok(base) = Url::parse(&page_url) else {
                    continue;
                };
                for (link, anchor) in extract_links(&html, &base) {
                    if !same_domain(&link, domain) || !looks_like_article(&link) {
                        continue;
                    }
                    if let Some(robots) = &robots {
                        if !self.allowed(robots, &link) {
                            continue;
                        }
                    }
                    let Some(link_canon) = canon_url(&link) else {
                        continue;
                    };
                    if depth < max_depth {
                        queue.push_back((link.clone(), depth + 1));
                    }
                    if kept.len() >= budget || kept.contains(&link_canon) {
                        continue;
                    }
                    let haystack = format!("{} {}", link, anchor);
                    if !passes_keyword_filter(
                        &haystack,
                        &discovery.include_keywords,
                        &discovery.exclude_keywords,
                    ) {
                        continue;
                    }
                    kept.insert(link_canon);
                    batch
                        .candidates
                        .push(Candidate::new(link, Some(anchor), CandidateSource::Crawl));
                }
            }

            if let (0, Some(e)) = (pages, first_error) {
                batch.fail(format!("crawl:{}", domain), e);
                continue;
            }
            info!(domain = %domain, pages, found = kept.len(), "crawled domain");
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::*;
    use crate::cache::ContentCache;
    use crate::stores::MemoryStore;
    use crate::testing::MockFetcher;
    use crate::types::config::PipelineConfig;
    use crate::types::job::{DateWindow, NewJob, ServerType};

    fn crawl_job(depth: u8, budget: usize) -> Job {
        let mut config = PipelineConfig::default();
        config.fetch.per_domain_rps = 100;
        config.discovery.crawl_domains = vec!["example.com".to_string()];
        config.discovery.crawl_depth = depth;
        config.discovery.max_pages_per_domain = budget;
        Job::new(NewJob {
            query: "breach".to_string(),
            target_count: 3,
            seed_urls: Vec::new(),
            focus_on_seed: false,
            server_type: ServerType::Ollama,
            server_name: "local".to_string(),
            model_name: "llama3".to_string(),
            config,
            window: DateWindow::trailing(Utc::now().date_naive(), 7),
        })
    }

    fn site() -> MockFetcher {
        MockFetcher::new()
            .with_page(
                "https://example.com/robots.txt",
                "User-agent: *\nDisallow: /members/\n",
            )
            .with_page(
                "https://example.com/",
                r#"<a href="/news/breach-at-bank">Breach at bank</a>
                   <a href="/members/report">Members only</a>
                   <a href="https://elsewhere.org/story">Offsite</a>
                   <a href="/logo.png">Logo</a>
                   <a href="/news/archive">Archive</a>"#,
            )
            .with_page(
                "https://example.com/news/archive",
                r#"<a href="/news/older-incident">Older incident</a>"#,
            )
    }

    fn discovery(fetcher: MockFetcher) -> Discovery {
        let cache = Arc::new(ContentCache::new(
            Arc::new(MemoryStore::new()),
            Arc::new(fetcher),
            4,
        ));
        Discovery::new(cache, Vec::new())
    }

    #[tokio::test]
    async fn test_depth_zero_keeps_home_page_links() {
        let batch = discovery(site()).crawl(&crawl_job(0, 30)).await;
        let urls: Vec<_> = batch.candidates.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://example.com/news/breach-at-bank",
                "https://example.com/news/archive"
            ]
        );
        assert_eq!(batch.candidates[0].title_hint.as_deref(), Some("Breach at bank"));
    }

    #[tokio::test]
    async fn test_deeper_crawl_follows_links() {
        let batch = discovery(site()).crawl(&crawl_job(2, 30)).await;
        assert!(batch
            .candidates
            .iter()
            .any(|c| c.url == "https://example.com/news/older-incident"));
    }

    #[tokio::test]
    async fn test_budget_caps_candidates() {
        let batch = discovery(site()).crawl(&crawl_job(2, 1)).await;
        assert_eq!(batch.candidates.len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_domain_reports_failure() {
        let batch = discovery(MockFetcher::new()).crawl(&crawl_job(1, 30)).await;
        assert!(batch.candidates.is_empty());
        assert_eq!(batch.failures.len(), 1);
    }
}
