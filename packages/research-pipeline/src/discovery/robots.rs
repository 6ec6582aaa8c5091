//! robots.txt parsing and a per-domain cache of parsed rules.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

/// Parsed robots.txt rules.
#[derive(Debug, Clone, Default)]
pub struct RobotsTxt {
    /// Rules per user-agent (lowercase)
    rules: HashMap<String, AgentRules>,
    /// Rules for `*`
    default_rules: AgentRules,
    /// `Sitemap:` lines
    sitemaps: Vec<String>,
}

#[derive(Debug, Clone, Default)]
struct AgentRules {
    disallow: Vec<String>,
    allow: Vec<String>,
}

impl RobotsTxt {
    pub fn parse(content: &str) -> Self {
        let mut robots = Self::default();
        let mut current_agents: Vec<String> = Vec::new();
        let mut current_rules = AgentRules::default();
        // A user-agent line after rules starts a new group.
        let mut in_rules = false;

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((directive, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();

            match directive.trim().to_lowercase().as_str() {
                "user-agent" => {
                    if in_rules {
                        robots.commit(&current_agents, &current_rules);
                        current_agents.clear();
                        current_rules = AgentRules::default();
                        in_rules = false;
                    }
                    current_agents.push(value.to_lowercase());
                }
                "disallow" => {
                    in_rules = true;
                    if !value.is_empty() {
                        current_rules.disallow.push(value.to_string());
                    }
                }
                "allow" => {
                    in_rules = true;
                    if !value.is_empty() {
                        current_rules.allow.push(value.to_string());
                    }
                }
                "sitemap" => robots.sitemaps.push(value.to_string()),
                _ => {}
            }
        }
        robots.commit(&current_agents, &current_rules);
        robots
    }

    fn commit(&mut self, agents: &[String], rules: &AgentRules) {
        for agent in agents {
            if agent == "*" {
                self.default_rules = rules.clone();
            } else {
                self.rules.insert(agent.clone(), rules.clone());
            }
        }
    }

    /// Check if a path is allowed for a user-agent. Longest match wins.
    pub fn is_allowed(&self, user_agent: &str, path: &str) -> bool {
        let agent_lower = user_agent.to_lowercase();
        let rules = self
            .rules
            .iter()
            .find(|(name, _)| agent_lower.contains(name.as_str()))
            .map(|(_, rules)| rules)
            .unwrap_or(&self.default_rules);

        let longest = |prefixes: &[String]| {
            prefixes
                .iter()
                .filter(|p| path.starts_with(p.as_str()))
                .map(|p| p.len())
                .max()
        };

        match (longest(&rules.allow), longest(&rules.disallow)) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(allow), Some(disallow)) => allow >= disallow,
        }
    }

    pub fn sitemaps(&self) -> &[String] {
        &self.sitemaps
    }
}

/// Cache of parsed robots.txt per domain with a fixed TTL.
pub struct RobotsCache {
    entries: Mutex<HashMap<String, (Instant, Arc<RobotsTxt>)>>,
    ttl: Duration,
}

impl Default for RobotsCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}

impl RobotsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub async fn get(&self, domain: &str) -> Option<Arc<RobotsTxt>> {
        let entries = self.entries.lock().await;
        entries
            .get(domain)
            .filter(|(at, _)| at.elapsed() < self.ttl)
            .map(|(_, robots)| robots.clone())
    }

    pub async fn insert(&self, domain: &str, robots: RobotsTxt) -> Arc<RobotsTxt> {
        debug!(domain = %domain, sitemaps = robots.sitemaps.len(), "cached robots.txt");
        let robots = Arc::new(robots);
        self.entries
            .lock()
            .await
            .insert(domain.to_string(), (Instant::now(), robots.clone()));
        robots
    }
}
