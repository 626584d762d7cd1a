//! Ollama chat client for narrative generation.

use super::{NarrativeContext, NarrativeService};
use crate::error::NarrativeError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Configuration for the narrator.
#[derive(Debug, Clone)]
pub struct NarratorConfig {
    pub ollama_url: String,
    pub model_name: String,
    /// Overrides the routine's temperature when set.
    pub temperature: Option<f32>,
    pub timeout_seconds: u64,
}

impl Default for NarratorConfig {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".to_string(),
            model_name: "llama3.2:latest".to_string(),
            temperature: None,
            timeout_seconds: 120,
        }
    }
}

/// Message in the chat history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

/// Ollama chat API request.
#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

/// Ollama chat API response.
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

/// Narrative service backed by a local Ollama model.
pub struct OllamaNarrator {
    config: NarratorConfig,
    http_client: reqwest::Client,
}

impl OllamaNarrator {
    pub fn new(config: NarratorConfig) -> Result<Self> {
        info!(
            "Initializing narrator with model {} at {}",
            config.model_name, config.ollama_url
        );

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            config,
            http_client,
        })
    }

    fn build_request(&self, context: &NarrativeContext) -> OllamaChatRequest {
        OllamaChatRequest {
            model: self.config.model_name.clone(),
            messages: vec![
                ChatMessage::new("system", context.system_prompt.clone()),
                ChatMessage::new("user", context.user_prompt()),
            ],
            stream: false,
            options: OllamaOptions {
                temperature: self.config.temperature.unwrap_or(context.temperature),
            },
        }
    }
}

#[async_trait]
impl NarrativeService for OllamaNarrator {
    async fn generate(&self, context: &NarrativeContext) -> Result<String, NarrativeError> {
        let url = format!("{}/api/chat", self.config.ollama_url.trim_end_matches('/'));
        let request = self.build_request(context);

        debug!("Sending narrative request for {}", context.routine);

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NarrativeError::Timeout(self.config.timeout_seconds)
                } else if e.is_connect() {
                    NarrativeError::ServiceUnavailable(format!(
                        "cannot connect to Ollama at {}",
                        self.config.ollama_url
                    ))
                } else {
                    NarrativeError::ServiceUnavailable(format!("failed to send request: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(NarrativeError::ServiceUnavailable(format!(
                "Ollama API error {}: {}",
                status, body
            )));
        }

        let chat_response: OllamaChatResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                NarrativeError::Timeout(self.config.timeout_seconds)
            } else {
                NarrativeError::ServiceUnavailable(format!("failed to parse Ollama response: {}", e))
            }
        })?;

        let content = chat_response.message.content.trim().to_string();
        if content.is_empty() {
            return Err(NarrativeError::ServiceUnavailable(
                "model returned an empty response".to_string(),
            ));
        }

        Ok(content)
    }

    fn model(&self) -> &str {
        &self.config.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MetricsBundle, RoutineId};
    use crate::routines::RoutineCatalog;
    use crate::sources::FetchParams;
    use chrono::NaiveDate;

    fn context() -> NarrativeContext {
        let catalog = RoutineCatalog::standard().unwrap();
        let params = FetchParams::window(NaiveDate::from_ymd_opt(2025, 6, 30).unwrap(), 30, 100);
        NarrativeContext::new(
            catalog.get(RoutineId::Growth).unwrap(),
            "growth plan",
            &params,
            &MetricsBundle::default(),
            None,
            &[],
        )
    }

    #[test]
    fn test_narrator_config_default() {
        let config = NarratorConfig::default();
        assert_eq!(config.model_name, "llama3.2:latest");
        assert!(config.temperature.is_none());
    }

    #[test]
    fn test_request_uses_routine_temperature_unless_overridden() {
        let narrator = OllamaNarrator::new(NarratorConfig::default()).unwrap();
        let request = narrator.build_request(&context());
        assert_eq!(request.options.temperature, 0.7);
        assert_eq!(request.messages[0].role, "system");
        assert!(!request.stream);

        let narrator = OllamaNarrator::new(NarratorConfig {
            temperature: Some(0.1),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(narrator.build_request(&context()).options.temperature, 0.1);
    }

    #[tokio::test]
    async fn test_unreachable_service_is_unavailable() {
        let narrator = OllamaNarrator::new(NarratorConfig {
            ollama_url: "http://127.0.0.1:9".to_string(),
            timeout_seconds: 2,
            ..Default::default()
        })
        .unwrap();

        let result = narrator.generate(&context()).await;
        assert!(matches!(result, Err(NarrativeError::ServiceUnavailable(_))));
    }

    #[test]
    fn test_response_shape() {
        let json = r#"{"model": "llama3.2", "message": {"role": "assistant", "content": " Hi "}, "done": true}"#;
        let parsed: OllamaChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.message.content, " Hi ");
    }
}
