//! Ollama `/api/generate` client.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ExtractionError, ExtractionResult};
use crate::traits::model::LanguageModel;

/// One model on one Ollama server.
#[derive(Clone)]
pub struct OllamaModel {
    client: Client,
    base_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

impl OllamaModel {
    /// `base_url` may be the server root or the full `/api/generate` URL.
    pub fn new(client: Client, base_url: &str, model: impl Into<String>) -> Self {
        let base_url = base_url
            .trim_end_matches('/')
            .trim_end_matches("/api/generate")
            .to_string();
        Self {
            client,
            base_url,
            model: model.into(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }
}

#[async_trait]
impl LanguageModel for OllamaModel {
    async fn complete(&self, prompt: &str) -> ExtractionResult<String> {
        let start = std::time::Instant::now();
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions { temperature: 0.0 },
        };

        let response = self
            .client
            .post(self.endpoint())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(model = %self.model, error = %e, "Ollama request failed");
                ExtractionError::Model(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(model = %self.model, status = %status, "Ollama API error");
            return Err(ExtractionError::Model(format!(
                "Ollama returned {}: {}",
                status, body
            )));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ExtractionError::Parse {
                reason: e.to_string(),
            })?;

        debug!(
            model = %self.model,
            duration_ms = start.elapsed().as_millis(),
            "Ollama completion"
        );
        Ok(parsed.response)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_normalization() {
        let client = Client::new();
        for base in [
            "http://localhost:11434",
            "http://localhost:11434/",
            "http://localhost:11434/api/generate",
        ] {
            let model = OllamaModel::new(client.clone(), base, "llama3");
            assert_eq!(model.endpoint(), "http://localhost:11434/api/generate");
        }
    }

    #[test]
    fn test_request_shape() {
        let body = serde_json::to_value(GenerateRequest {
            model: "llama3",
            prompt: "hi",
            stream: false,
            options: GenerateOptions { temperature: 0.0 },
        })
        .unwrap();
        assert_eq!(body["stream"], false);
        assert_eq!(body["model"], "llama3");
    }
}
