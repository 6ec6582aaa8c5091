use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use research_pipeline::security::SecretString;
use research_pipeline::PipelineConfig;

/// An OpenAI-compatible inference server.
#[derive(Debug, Clone)]
pub struct OpenAiServer {
    pub name: String,
    pub base_url: String,
    pub api_key: Option<SecretString>,
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// `sqlite:` URL; memory stores when unset
    pub database_url: Option<String>,
    pub tavily_api_key: Option<SecretString>,
    pub serpapi_api_key: Option<SecretString>,
    pub ollama_servers: Vec<(String, String)>,
    pub openai_servers: Vec<OpenAiServer>,
    pub gemini_api_key: Option<SecretString>,
    pub cache_global_concurrency: usize,
    /// How long finished jobs stay in memory before reads go to the store
    pub job_retention: Duration,
    pub user_agent: Option<String>,
    pub pipeline_defaults_path: Option<PathBuf>,
    pub cors_origins: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            database_url: non_empty("DATABASE_URL"),
            tavily_api_key: non_empty("TAVILY_API_KEY").map(SecretString::from),
            serpapi_api_key: non_empty("SERPAPI_API_KEY").map(SecretString::from),
            ollama_servers: parse_ollama_servers(&env::var("OLLAMA_SERVERS").unwrap_or_default())
                .context("OLLAMA_SERVERS must look like name=url,...")?,
            openai_servers: parse_openai_servers(&env::var("OPENAI_SERVERS").unwrap_or_default())
                .context("OPENAI_SERVERS must look like name=url|key,...")?,
            gemini_api_key: non_empty("GEMINI_API_KEY").map(SecretString::from),
            cache_global_concurrency: env::var("CACHE_GLOBAL_CONCURRENCY")
                .unwrap_or_else(|_| "8".to_string())
                .parse()
                .context("CACHE_GLOBAL_CONCURRENCY must be a valid number")?,
            job_retention: Duration::from_secs(
                env::var("JOB_RETENTION_SECS")
                    .unwrap_or_else(|_| "900".to_string())
                    .parse()
                    .context("JOB_RETENTION_SECS must be a valid number")?,
            ),
            user_agent: non_empty("HTTP_USER_AGENT"),
            pipeline_defaults_path: non_empty("PIPELINE_DEFAULTS_PATH").map(PathBuf::from),
            cors_origins: env::var("CORS_ORIGINS")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        })
    }

    /// Pipeline defaults, optionally overridden by the JSON file at
    /// `PIPELINE_DEFAULTS_PATH`.
    pub fn pipeline_defaults(&self) -> Result<PipelineConfig> {
        let Some(path) = &self.pipeline_defaults_path else {
            return Ok(PipelineConfig::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        parse_pipeline_defaults(&raw).with_context(|| format!("Invalid defaults in {}", path.display()))
    }
}

/// Overlay a JSON document on the built-in pipeline defaults.
pub fn parse_pipeline_defaults(raw: &str) -> Result<PipelineConfig> {
    let patch: serde_json::Value = serde_json::from_str(raw)?;
    let config = PipelineConfig::default().overlay(&patch)?;
    // Seeds may supply API-free sources per job.
    config.validate(true)?;
    Ok(config)
}

/// `name=url,name=url`
pub fn parse_ollama_servers(raw: &str) -> Result<Vec<(String, String)>> {
    entries(raw)
        .map(|(name, value)| {
            if name.is_empty() || value.is_empty() {
                bail!("expected name=url, got {:?}", value);
            }
            Ok((name, value.to_string()))
        })
        .collect()
}

/// `name=url|key,name=url`
pub fn parse_openai_servers(raw: &str) -> Result<Vec<OpenAiServer>> {
    entries(raw)
        .map(|(name, value)| {
            let (base_url, api_key) = match value.split_once('|') {
                Some((url, key)) => (url.trim(), Some(key.trim())),
                None => (value, None),
            };
            if name.is_empty() || base_url.is_empty() {
                bail!("server {:?} has no name or URL", name);
            }
            Ok(OpenAiServer {
                name,
                base_url: base_url.to_string(),
                api_key: api_key.filter(|k| !k.is_empty()).map(SecretString::from),
            })
        })
        .collect()
}

fn entries(raw: &str) -> impl Iterator<Item = (String, &str)> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((name, value)) => (name.trim().to_string(), value.trim()),
            None => (String::new(), entry),
        })
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ollama_servers() {
        let servers = parse_ollama_servers("local=http://localhost:11434, gpu=http://10.0.0.5:11434").unwrap();
        assert_eq!(
            servers,
            vec![
                ("local".to_string(), "http://localhost:11434".to_string()),
                ("gpu".to_string(), "http://10.0.0.5:11434".to_string()),
            ]
        );
        assert!(parse_ollama_servers("").unwrap().is_empty());
        assert!(parse_ollama_servers("http://localhost:11434").is_err());
    }

    #[test]
    fn test_parse_openai_servers_with_optional_key() {
        let servers =
            parse_openai_servers("openai=https://api.openai.com/v1|sk-test,vllm=http://gpu:8000/v1").unwrap();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].name, "openai");
        assert_eq!(servers[0].api_key.as_ref().map(|k| k.expose()), Some("sk-test"));
        assert_eq!(servers[1].base_url, "http://gpu:8000/v1");
        assert!(servers[1].api_key.is_none());
    }

    #[test]
    fn test_openai_server_without_url_rejected() {
        assert!(parse_openai_servers("broken=|key").is_err());
    }

    #[test]
    fn test_pipeline_defaults_overlay() {
        let config = parse_pipeline_defaults(r#"{"fetch": {"global_concurrency": 2}}"#).unwrap();
        assert_eq!(config.fetch.global_concurrency, 2);
        assert_eq!(config.fetch.per_domain_rps, PipelineConfig::default().fetch.per_domain_rps);

        assert!(parse_pipeline_defaults(r#"{"fetch": {"global_concurrency": 0}}"#).is_err());
    }
}
