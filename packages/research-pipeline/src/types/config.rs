//! Pipeline configuration snapshot.
//!
//! A job takes an immutable copy of this at creation time. Defaults come from
//! the server, optionally overlaid with a per-job JSON patch.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::types::cache::MAX_CACHE_TTL_HOURS;

/// Placeholder the extraction prompt substitutes with article text.
pub const ARTICLE_PLACEHOLDER: &str = "{ARTICLE}";

/// Tunable policy for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Search query template with `{QUERY}`, `{START_DATE}`, `{END_DATE}`
    pub query_template: String,
    /// Days covered when no explicit window is given
    pub window_days: u32,
    pub discovery: DiscoveryConfig,
    pub fetch: FetchConfig,
    pub search: SearchConfig,
    pub scoring: ScoringConfig,
    pub filters: FilterFlags,
    /// URL or title fragments marking roundup/digest/op-ed content
    pub aggregator_keywords: Vec<String>,
    /// Extraction prompt with an `{ARTICLE}` placeholder
    pub extraction_prompt: String,
    pub qa: QaConfig,
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMode {
    ApiFree,
    Search,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub mode: DiscoveryMode,
    /// Feed and sitemap items older than this are dropped
    pub recency_days: u32,
    /// Link-follow depth for allow-listed crawls (at most 2)
    pub crawl_depth: u8,
    pub max_pages_per_domain: usize,
    pub max_search_pages: usize,
    pub search_page_size: usize,
    /// Candidate budget; defaults to `max(100, 5 * target_count)`
    pub max_candidates: Option<usize>,
    pub rss_feeds: Vec<String>,
    pub sitemap_domains: Vec<String>,
    /// Allow-list of domains the crawler may visit
    pub crawl_domains: Vec<String>,
    pub include_keywords: Vec<String>,
    pub exclude_keywords: Vec<String>,
    pub respect_robots: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub per_domain_rps: u32,
    /// Worker pool size for a job
    pub global_concurrency: usize,
    pub cache_ttl_hours: u32,
    pub force_bypass: bool,
    pub fetch_timeout_secs: u64,
    pub extraction_timeout_secs: u64,
    /// Override for how long to wait on in-flight workers at finalize
    pub exhaustion_grace_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub tavily: bool,
    pub serpapi: bool,
    /// Terms OR-ed onto the rendered query to focus results
    pub focus_terms: Vec<String>,
    /// Domains Tavily is restricted to (empty means unrestricted)
    pub include_domains: Vec<String>,
    /// SerpAPI `gl` country code
    pub region: String,
    /// SerpAPI `hl` language code
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub min_score: f64,
    /// Keyword to weight; each distinct keyword counts once
    pub incident_keywords: IndexMap<String, f64>,
    /// Domain to multiplier; unlisted domains weigh 1.0
    pub domain_weights: HashMap<String, f64>,
    pub regional_bias: f64,
    pub regional_terms: Vec<String>,
    /// Fallback relevance terms for widely used platforms
    pub global_platform_terms: Vec<String>,
    pub regional_note: String,
    pub platform_note: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterFlags {
    pub require_incident: bool,
    #[serde(alias = "require_au")]
    pub require_regional: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QaPreset {
    Strict,
    Lenient,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QaConfig {
    pub enabled: bool,
    pub preset: QaPreset,
    /// Rule prompt for strict review
    pub instructions: String,
    pub min_score: f64,
    pub lenient_min_score: f64,
    pub require_summary: bool,
    pub require_incident: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub title: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            query_template: "{QUERY} {START_DATE} to {END_DATE}".to_string(),
            window_days: 7,
            discovery: DiscoveryConfig::default(),
            fetch: FetchConfig::default(),
            search: SearchConfig::default(),
            scoring: ScoringConfig::default(),
            filters: FilterFlags::default(),
            aggregator_keywords: strings(&[
                "weekly", "digest", "roundup", "round-up", "op-ed", "opinion", "newsletter",
                "this week in", "recap",
            ]),
            extraction_prompt: DEFAULT_EXTRACTION_PROMPT.to_string(),
            qa: QaConfig::default(),
            report: ReportConfig::default(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            mode: DiscoveryMode::Search,
            recency_days: 14,
            crawl_depth: 1,
            max_pages_per_domain: 30,
            max_search_pages: 5,
            search_page_size: 30,
            max_candidates: None,
            rss_feeds: Vec::new(),
            sitemap_domains: Vec::new(),
            crawl_domains: Vec::new(),
            include_keywords: Vec::new(),
            exclude_keywords: Vec::new(),
            respect_robots: true,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            per_domain_rps: 1,
            global_concurrency: 4,
            cache_ttl_hours: 24,
            force_bypass: false,
            fetch_timeout_secs: 10,
            extraction_timeout_secs: 60,
            exhaustion_grace_secs: None,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            tavily: true,
            serpapi: true,
            focus_terms: strings(&[
                "ransomware", "\"data breach\"", "breach", "cyberattack", "exploit",
                "vulnerability", "malware", "\"zero-day\"", "CVE",
            ]),
            include_domains: strings(&[
                "cyberdaily.au",
                "sbs.com.au",
                "infosecurity-magazine.com",
                "crowdstrike.com",
                "blackpointcyber.com",
                "thehackernews.com",
                "darkreading.com",
            ]),
            region: "au".to_string(),
            language: "en".to_string(),
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let incident_keywords = [
            ("ransomware", 2.0),
            ("data breach", 2.0),
            ("breach", 1.0),
            ("cyberattack", 1.5),
            ("attack", 0.5),
            ("exploit", 1.0),
            ("vulnerability", 1.0),
            ("malware", 1.0),
            ("ddos", 1.0),
            ("zero-day", 1.5),
            ("cve-", 1.0),
        ]
        .into_iter()
        .map(|(k, w)| (k.to_string(), w))
        .collect();

        Self {
            min_score: 1.0,
            incident_keywords,
            domain_weights: HashMap::new(),
            regional_bias: 1.5,
            regional_terms: strings(&["australia", "australian", ".au"]),
            global_platform_terms: strings(&[
                "windows", "apple", "ios", "macos", "azure", "aws", "google cloud", "vmware",
                "esxi",
            ]),
            regional_note: "Relevant to Australian organizations and sectors.".to_string(),
            platform_note:
                "Global incident impacting widely used platforms; likely to affect Australian businesses."
                    .to_string(),
        }
    }
}

impl Default for FilterFlags {
    fn default() -> Self {
        Self {
            require_incident: true,
            require_regional: false,
        }
    }
}

impl Default for QaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            preset: QaPreset::Lenient,
            instructions: DEFAULT_QA_INSTRUCTIONS.to_string(),
            min_score: 1.0,
            lenient_min_score: 0.5,
            require_summary: true,
            require_incident: true,
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            title: "Cyber Threats and Risks".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Deep-merge a JSON patch over this config and validate the result.
    pub fn overlay(&self, patch: &serde_json::Value) -> Result<Self> {
        if !patch.is_object() {
            return Err(PipelineError::invalid_config("config must be a JSON object"));
        }
        let mut patch = patch.clone();
        if let Some(filters) = patch.get_mut("filters").and_then(|f| f.as_object_mut()) {
            if let Some(value) = filters.remove("require_au") {
                filters.entry("require_regional").or_insert(value);
            }
        }
        let mut base = serde_json::to_value(self)?;
        merge_json(&mut base, &patch);
        serde_json::from_value(base)
            .map_err(|e| PipelineError::invalid_config(format!("config: {}", e)))
    }

    /// Check invariants the pipeline relies on.
    pub fn validate(&self, has_seeds: bool) -> Result<()> {
        let fail = |reason: &str| Err(PipelineError::invalid_config(reason));

        if self.fetch.global_concurrency == 0 {
            return fail("fetch.global_concurrency must be at least 1");
        }
        if self.fetch.per_domain_rps == 0 {
            return fail("fetch.per_domain_rps must be at least 1");
        }
        if self.fetch.fetch_timeout_secs == 0 || self.fetch.extraction_timeout_secs == 0 {
            return fail("timeouts must be positive");
        }
        if self.fetch.cache_ttl_hours > MAX_CACHE_TTL_HOURS {
            return Err(PipelineError::invalid_config(format!(
                "fetch.cache_ttl_hours must be at most {}",
                MAX_CACHE_TTL_HOURS
            )));
        }
        if self.discovery.crawl_depth > 2 {
            return fail("discovery.crawl_depth must be at most 2");
        }
        if self.discovery.search_page_size == 0 {
            return fail("discovery.search_page_size must be at least 1");
        }
        if !self.scoring.min_score.is_finite() || !self.scoring.regional_bias.is_finite() {
            return fail("scoring values must be finite");
        }
        if !self.extraction_prompt.contains(ARTICLE_PLACEHOLDER) {
            return fail("extraction_prompt must contain {ARTICLE}");
        }
        if self.discovery.mode == DiscoveryMode::ApiFree
            && !has_seeds
            && self.discovery.rss_feeds.is_empty()
            && self.discovery.sitemap_domains.is_empty()
            && self.discovery.crawl_domains.is_empty()
        {
            return fail("api_free discovery needs rss_feeds, sitemap_domains or crawl_domains");
        }
        Ok(())
    }

    /// Candidate budget for a job with the given target.
    pub fn candidate_budget(&self, target_count: u32) -> usize {
        self.discovery
            .max_candidates
            .unwrap_or_else(|| (target_count as usize * 5).max(100))
    }
}

fn merge_json(base: &mut serde_json::Value, patch: &serde_json::Value) {
    match (base, patch) {
        (serde_json::Value::Object(base), serde_json::Value::Object(patch)) => {
            for (key, value) in patch {
                match base.get_mut(key) {
                    Some(slot) if slot.is_object() && value.is_object() => merge_json(slot, value),
                    _ => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

const DEFAULT_EXTRACTION_PROMPT: &str = r#"You are a cybersecurity analyst extracting discrete incident details.
Return ONLY a JSON object with these keys:
  "summary": one sentence,
  "date": incident date as YYYY-MM-DD or a natural date,
  "targets": affected entities,
  "method": one of [Ransomware, Phishing, Data breach, DDoS, Vulnerability exploitation, Supply chain compromise, Credential stuffing, Business email compromise, Vishing, Malware/Backdoor, Espionage],
  "exploit_used": CVE IDs and/or exploit mechanism, empty if unknown,
  "incident": true if the article describes an actual incident, false for commentary

Article: {ARTICLE}"#;

const DEFAULT_QA_INSTRUCTIONS: &str = r#"You review extracted cybersecurity incident records before publication.
Accept only records describing a concrete, recent incident with a clear summary and an identifiable target.
Reject commentary, vendor marketing, roundups and records whose summary does not match the title.
Answer with ACCEPT or REJECT on the first line, followed by a one-sentence reason."#;
