//! OpenAI-compatible `/chat/completions` client.
//!
//! Used for OpenAI itself, self-hosted compatible servers and Gemini's
//! OpenAI-compatible endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ExtractionError, ExtractionResult};
use crate::security::SecretString;
use crate::traits::model::LanguageModel;

/// Gemini's OpenAI-compatible base URL.
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

const SYSTEM_PROMPT: &str = "You are a precise cyber threat intelligence analyst.";

#[derive(Clone)]
pub struct OpenAiCompatibleModel {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiCompatibleModel {
    pub fn new(
        client: Client,
        base_url: &str,
        api_key: Option<SecretString>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            model: model.into(),
        }
    }

    pub fn gemini(client: Client, api_key: SecretString, model: impl Into<String>) -> Self {
        Self::new(client, GEMINI_BASE_URL, Some(api_key), model)
    }
}

fn first_content(response: ChatResponse) -> ExtractionResult<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| ExtractionError::Parse {
            reason: "completion had no choices".to_string(),
        })
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleModel {
    async fn complete(&self, prompt: &str) -> ExtractionResult<String> {
        let start = std::time::Instant::now();
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.0,
        };

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose());
        }

        let response = builder.send().await.map_err(|e| {
            warn!(model = %self.model, error = %e, "chat completion request failed");
            ExtractionError::Model(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(model = %self.model, status = %status, "chat completion API error");
            return Err(ExtractionError::Model(format!(
                "API returned {}: {}",
                status, body
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ExtractionError::Parse {
                reason: e.to_string(),
            })?;
        let content = first_content(parsed)?;

        debug!(
            model = %self.model,
            duration_ms = start.elapsed().as_millis(),
            "chat completion"
        );
        Ok(content)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_content() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"ACCEPT"}}]}"#;
        assert_eq!(first_content(serde_json::from_str(raw).unwrap()).unwrap(), "ACCEPT");

        let empty = r#"{"choices":[]}"#;
        assert!(matches!(
            first_content(serde_json::from_str(empty).unwrap()),
            Err(ExtractionError::Parse { .. })
        ));
    }

    #[test]
    fn test_blank_key_is_dropped() {
        let model = OpenAiCompatibleModel::new(
            Client::new(),
            "http://localhost:8000/v1/",
            Some(SecretString::new("")),
            "qwen",
        );
        assert!(model.api_key.is_none());
        assert_eq!(model.base_url, "http://localhost:8000/v1");
    }
}
