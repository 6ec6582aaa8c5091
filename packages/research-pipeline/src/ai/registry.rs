//! Model registry built from static server configuration.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::ollama::OllamaModel;
use super::openai::{OpenAiCompatibleModel, GEMINI_BASE_URL};
use crate::error::{PipelineError, Result};
use crate::security::SecretString;
use crate::traits::model::{LanguageModel, ModelRegistry};
use crate::types::job::ServerType;

/// A configured model server.
#[derive(Debug, Clone)]
pub enum ServerEndpoint {
    Ollama {
        base_url: String,
    },
    OpenAi {
        base_url: String,
        api_key: Option<SecretString>,
    },
}

/// Resolves named servers registered at startup.
///
/// Prebuilt models can be registered directly; they answer for any model
/// name on their server.
#[derive(Default)]
pub struct StaticModelRegistry {
    client: Client,
    servers: HashMap<(ServerType, String), ServerEndpoint>,
    prebuilt: HashMap<(ServerType, String), Arc<dyn LanguageModel>>,
}

impl StaticModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ollama(mut self, name: impl Into<String>, base_url: impl Into<String>) -> Self {
        self.servers.insert(
            (ServerType::Ollama, name.into()),
            ServerEndpoint::Ollama {
                base_url: base_url.into(),
            },
        );
        self
    }

    pub fn with_openai(
        mut self,
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<SecretString>,
    ) -> Self {
        self.servers.insert(
            (ServerType::Openai, name.into()),
            ServerEndpoint::OpenAi {
                base_url: base_url.into(),
                api_key,
            },
        );
        self
    }

    pub fn with_gemini(mut self, name: impl Into<String>, api_key: SecretString) -> Self {
        self.servers.insert(
            (ServerType::Gemini, name.into()),
            ServerEndpoint::OpenAi {
                base_url: GEMINI_BASE_URL.to_string(),
                api_key: Some(api_key),
            },
        );
        self
    }

    pub fn with_model(
        mut self,
        server_type: ServerType,
        name: impl Into<String>,
        model: Arc<dyn LanguageModel>,
    ) -> Self {
        self.prebuilt.insert((server_type, name.into()), model);
        self
    }

    /// Registered `(type, name)` pairs, sorted.
    pub fn servers(&self) -> Vec<(ServerType, String)> {
        let mut all: Vec<_> = self
            .servers
            .keys()
            .chain(self.prebuilt.keys())
            .cloned()
            .collect();
        all.sort_by(|a, b| (a.0.to_string(), &a.1).cmp(&(b.0.to_string(), &b.1)));
        all.dedup();
        all
    }
}

#[async_trait]
impl ModelRegistry for StaticModelRegistry {
    async fn resolve(
        &self,
        server_type: ServerType,
        server_name: &str,
        model_name: &str,
    ) -> Result<Arc<dyn LanguageModel>> {
        let unavailable = || PipelineError::ModelUnavailable {
            server_type: server_type.to_string(),
            server_name: server_name.to_string(),
            model_name: model_name.to_string(),
        };

        let key = (server_type, server_name.to_string());
        if let Some(model) = self.prebuilt.get(&key) {
            return Ok(model.clone());
        }
        if model_name.trim().is_empty() {
            return Err(unavailable());
        }

        let endpoint = self.servers.get(&key).ok_or_else(unavailable)?;
        debug!(server_type = %server_type, server = %server_name, model = %model_name, "resolved model");
        let model: Arc<dyn LanguageModel> = match endpoint {
            ServerEndpoint::Ollama { base_url } => {
                Arc::new(OllamaModel::new(self.client.clone(), base_url, model_name))
            }
            ServerEndpoint::OpenAi { base_url, api_key } => Arc::new(OpenAiCompatibleModel::new(
                self.client.clone(),
                base_url,
                api_key.clone(),
                model_name,
            )),
        };
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockModel;

    #[tokio::test]
    async fn test_resolve_registered_server() {
        let registry = StaticModelRegistry::new().with_ollama("local", "http://localhost:11434");
        let model = registry
            .resolve(ServerType::Ollama, "local", "llama3")
            .await
            .unwrap();
        assert_eq!(model.model_name(), "llama3");
    }

    #[tokio::test]
    async fn test_unknown_server_is_unavailable() {
        let registry = StaticModelRegistry::new().with_ollama("local", "http://localhost:11434");
        let err = registry
            .resolve(ServerType::Openai, "local", "gpt-4o")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::ModelUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_prebuilt_model_answers_any_name() {
        let registry = StaticModelRegistry::new().with_model(
            ServerType::Ollama,
            "mock",
            Arc::new(MockModel::new()),
        );
        assert!(registry.resolve(ServerType::Ollama, "mock", "").await.is_ok());
        assert_eq!(registry.servers(), vec![(ServerType::Ollama, "mock".to_string())]);
    }
}
