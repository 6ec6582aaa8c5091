//! Keyword relevance scoring and aggregator detection.

use std::collections::HashMap;

use crate::types::config::ScoringConfig;
use crate::urls::domain_of;

/// Scoring result for one page.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreOutcome {
    pub score: f64,
    /// Why the page matters to the audience, if it does
    pub relevance: Option<String>,
}

impl ScoreOutcome {
    pub fn is_relevant(&self) -> bool {
        self.relevance.is_some()
    }
}

/// Score a page from its title, body text and URL.
///
/// Each configured keyword contributes its weight once when present. The
/// sum is multiplied by the domain weight and, for relevant pages, by the
/// regional bias.
pub fn score(title: &str, text: &str, url: &str, cfg: &ScoringConfig) -> ScoreOutcome {
    let haystack = format!("{} {}", title, text).to_lowercase();

    let base: f64 = cfg
        .incident_keywords
        .iter()
        .filter(|(keyword, _)| haystack.contains(&keyword.to_lowercase()))
        .map(|(_, weight)| *weight)
        .sum();

    let mut score = base * domain_weight(url, &cfg.domain_weights);

    let with_url = format!("{} {}", haystack, url.to_lowercase());
    let relevance = if contains_any(&with_url, &cfg.regional_terms) {
        Some(cfg.regional_note.clone())
    } else if contains_any(&haystack, &cfg.global_platform_terms) {
        Some(cfg.platform_note.clone())
    } else {
        None
    };
    if relevance.is_some() {
        score *= cfg.regional_bias;
    }

    ScoreOutcome { score, relevance }
}

/// Weight for the URL's host or its nearest listed parent domain.
pub fn domain_weight(url: &str, weights: &HashMap<String, f64>) -> f64 {
    if weights.is_empty() {
        return 1.0;
    }
    let Some(mut host) = domain_of(url) else {
        return 1.0;
    };
    let normalized: HashMap<String, f64> = weights
        .iter()
        .map(|(k, v)| (k.trim().trim_start_matches("www.").to_lowercase(), *v))
        .collect();
    loop {
        if let Some(weight) = normalized.get(&host) {
            return *weight;
        }
        match host.split_once('.') {
            Some((_, parent)) if parent.contains('.') => host = parent.to_string(),
            _ => return 1.0,
        }
    }
}

/// Roundups, digests and opinion pieces rarely describe one incident.
pub fn is_aggregator(url: &str, title: Option<&str>, keywords: &[String]) -> bool {
    let haystack = format!("{} {}", url, title.unwrap_or_default()).to_lowercase();
    contains_any(&haystack, keywords)
}

fn contains_any(haystack: &str, terms: &[String]) -> bool {
    terms
        .iter()
        .any(|t| !t.is_empty() && haystack.contains(&t.to_lowercase()))
}
