//! Candidate discovery.
//!
//! Search mode pages through the enabled providers. API-free mode reads
//! RSS/Atom feeds, sitemaps and a bounded crawl of allow-listed domains.
//! Every source reports failures instead of aborting, so one dead feed
//! never stops the job.

pub mod crawl;
pub mod query;
pub mod robots;
pub mod rss;
pub mod sitemap;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::{ContentCache, FetchOptions};
use crate::error::FetchResult;
use crate::traits::searcher::{SearchRequest, WebSearcher};
use crate::types::job::Job;
use crate::urls::{canon_url, passes_keyword_filter};

use self::query::{render_query, with_focus_terms};
use self::robots::{RobotsCache, RobotsTxt};

/// Where a candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    Seed,
    Search,
    Rss,
    Sitemap,
    Crawl,
}

/// A URL to fetch, score and extract.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub url: String,
    pub title_hint: Option<String>,
    pub source: CandidateSource,
}

impl Candidate {
    pub fn new(url: impl Into<String>, title_hint: Option<String>, source: CandidateSource) -> Self {
        Self {
            url: url.into(),
            title_hint: title_hint.filter(|t| !t.trim().is_empty()),
            source,
        }
    }
}

/// A source that could not be read.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFailure {
    pub source: String,
    pub reason: String,
}

/// Candidates from one discovery step plus any source failures.
#[derive(Debug, Default)]
pub struct DiscoveryBatch {
    pub candidates: Vec<Candidate>,
    pub failures: Vec<SourceFailure>,
}

impl DiscoveryBatch {
    fn fail(&mut self, source: impl Into<String>, reason: impl ToString) {
        let source = source.into();
        let reason = reason.to_string();
        warn!(source = %source, reason = %reason, "discovery source failed");
        self.failures.push(SourceFailure { source, reason });
    }
}

/// Discovery front end shared by all jobs.
pub struct Discovery {
    cache: Arc<ContentCache>,
    searchers: Vec<Arc<dyn WebSearcher>>,
    robots: RobotsCache,
}

impl Discovery {
    pub fn new(cache: Arc<ContentCache>, searchers: Vec<Arc<dyn WebSearcher>>) -> Self {
        Self {
            cache,
            searchers,
            robots: RobotsCache::default(),
        }
    }

    /// Seed URLs as candidates, dropping anything that isn't http(s).
    pub fn seeds(seed_urls: &[String]) -> Vec<Candidate> {
        seed_urls
            .iter()
            .filter(|url| canon_url(url).is_some())
            .map(|url| Candidate::new(url.trim(), None, CandidateSource::Seed))
            .collect()
    }

    /// Whether any configured provider is enabled for this job.
    pub fn has_search_providers(&self, job: &Job) -> bool {
        self.searchers.iter().any(|s| provider_enabled(job, s.name()))
    }

    /// One page across all enabled providers, merged by canonical URL.
    ///
    /// An empty candidate list means the search is exhausted.
    pub async fn search_page(&self, job: &Job, page: usize) -> DiscoveryBatch {
        let cfg = &job.config;
        let rendered = render_query(&cfg.query_template, &job.query, &job.window);
        let request = SearchRequest {
            query: with_focus_terms(&rendered, &cfg.search.focus_terms),
            page,
            page_size: cfg.discovery.search_page_size,
            window: Some(job.window),
            include_domains: cfg.search.include_domains.clone(),
            region: cfg.search.region.clone(),
            language: cfg.search.language.clone(),
        };

        let mut batch = DiscoveryBatch::default();
        let mut seen = HashSet::new();
        for searcher in self.searchers.iter().filter(|s| provider_enabled(job, s.name())) {
            match searcher.search(&request).await {
                Ok(hits) => {
                    debug!(provider = searcher.name(), page, hits = hits.len(), "search page");
                    for hit in hits {
                        let Some(canon) = canon_url(&hit.url) else {
                            continue;
                        };
                        if seen.insert(canon) {
                            batch.candidates.push(Candidate::new(
                                hit.url,
                                Some(hit.title),
                                CandidateSource::Search,
                            ));
                        }
                    }
                }
                Err(e) => batch.fail(format!("search:{}", searcher.name()), e),
            }
        }
        batch
    }

    /// Items from the configured RSS/Atom feeds.
    pub async fn rss(&self, job: &Job) -> DiscoveryBatch {
        let discovery = &job.config.discovery;
        let cutoff = recency_cutoff(job);
        let mut batch = DiscoveryBatch::default();

        for feed in &discovery.rss_feeds {
            let xml = match self.get_text(feed, job).await {
                Ok(xml) => xml,
                Err(e) => {
                    batch.fail(format!("rss:{}", feed), e);
                    continue;
                }
            };
            let items = rss::parse_feed(&xml);
            let before = batch.candidates.len();
            for item in items {
                if !is_recent(item.published, cutoff) {
                    continue;
                }
                let haystack = format!("{} {}", item.url, item.title);
                if !passes_keyword_filter(
                    &haystack,
                    &discovery.include_keywords,
                    &discovery.exclude_keywords,
                ) {
                    continue;
                }
                batch
                    .candidates
                    .push(Candidate::new(item.url, Some(item.title), CandidateSource::Rss));
            }
            info!(feed = %feed, found = batch.candidates.len() - before, "read feed");
        }
        batch
    }

    /// URLs from sitemaps of the configured domains.
    pub async fn sitemaps(&self, job: &Job) -> DiscoveryBatch {
        let discovery = &job.config.discovery;
        let cutoff = recency_cutoff(job);
        let mut batch = DiscoveryBatch::default();

        for domain in &discovery.sitemap_domains {
            let robots = self.robots_for(domain, job).await;
            let mut locations: Vec<String> = robots.sitemaps().to_vec();
            for location in sitemap::candidate_locations(domain) {
                if !locations.contains(&location) {
                    locations.push(location);
                }
            }

            let mut urls = Vec::new();
            let mut readable = 0usize;
            for location in &locations {
                let Ok(xml) = self.get_text(location, job).await else {
                    debug!(location = %location, "sitemap location unavailable");
                    continue;
                };
                readable += 1;
                let doc = sitemap::parse_sitemap(&xml);
                urls.extend(doc.urls);
                for nested in doc.nested {
                    match self.get_text(&nested, job).await {
                        Ok(xml) => urls.extend(sitemap::parse_sitemap(&xml).urls),
                        Err(e) => debug!(sitemap = %nested, error = %e, "nested sitemap failed"),
                    }
                }
            }

            if readable == 0 {
                batch.fail(format!("sitemap:{}", domain), "no sitemap could be read");
                continue;
            }

            let mut seen = HashSet::new();
            let mut kept = 0usize;
            for (url, lastmod) in urls {
                if kept >= discovery.max_pages_per_domain {
                    break;
                }
                if !is_recent(lastmod, cutoff) {
                    continue;
                }
                if !passes_keyword_filter(
                    &url,
                    &discovery.include_keywords,
                    &discovery.exclude_keywords,
                ) {
                    continue;
                }
                if discovery.respect_robots && !self.allowed(&robots, &url) {
                    continue;
                }
                let Some(canon) = canon_url(&url) else {
                    continue;
                };
                if seen.insert(canon) {
                    kept += 1;
                    batch
                        .candidates
                        .push(Candidate::new(url, None, CandidateSource::Sitemap));
                }
            }
            info!(domain = %domain, found = kept, "read sitemaps");
        }
        batch
    }

    /// GET a discovery resource through the cache's pacer and global ceiling.
    ///
    /// Feeds, sitemaps and robots.txt are never stored, so the cache only
    /// holds article bodies.
    async fn get_text(&self, url: &str, job: &Job) -> FetchResult<String> {
        let fetch = &job.config.fetch;
        let opts = FetchOptions {
            ttl_hours: fetch.cache_ttl_hours,
            force_bypass: true,
            per_domain_rps: fetch.per_domain_rps,
            timeout: Duration::from_secs(fetch.fetch_timeout_secs),
        };
        self.cache.fetch_uncached(url, &opts).await
    }

    /// Parsed robots.txt for `domain`; unreadable files allow everything.
    async fn robots_for(&self, domain: &str, job: &Job) -> Arc<RobotsTxt> {
        if let Some(robots) = self.robots.get(domain).await {
            return robots;
        }
        let url = format!("https://{}/robots.txt", domain);
        let robots = match self.get_text(&url, job).await {
            Ok(content) => RobotsTxt::parse(&content),
            Err(e) => {
                debug!(domain = %domain, error = %e, "robots.txt unavailable");
                RobotsTxt::default()
            }
        };
        self.robots.insert(domain, robots).await
    }

    fn allowed(&self, robots: &RobotsTxt, url: &str) -> bool {
        let path = url::Url::parse(url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| "/".to_string());
        robots.is_allowed(self.cache.user_agent(), &path)
    }
}

fn provider_enabled(job: &Job, name: &str) -> bool {
    match name {
        "tavily" => job.config.search.tavily,
        "serpapi" => job.config.search.serpapi,
        _ => true,
    }
}

fn recency_cutoff(job: &Job) -> DateTime<Utc> {
    Utc::now() - chrono::Duration::days(i64::from(job.config.discovery.recency_days))
}

/// Undated items are kept.
fn is_recent(published: Option<DateTime<Utc>>, cutoff: DateTime<Utc>) -> bool {
    published.map_or(true, |at| at >= cutoff)
}
