//! Inference host adapter (Ollama chat API)
//!
//! The pipeline treats inference as an opaque function from prompt text to
//! completion text. Timeouts, connection failures, and empty output all map
//! to retryable analysis errors.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::InferenceConfig;
use crate::error::{AnalysisError, Error, Result};

/// Capability interface over the inference host
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// One stateless completion call
    async fn complete(
        &self,
        system: &str,
        prompt: &str,
    ) -> std::result::Result<String, AnalysisError>;
}

/// HTTP client for an Ollama-compatible `/api/chat` endpoint
pub struct OllamaInferenceClient {
    http_client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
    timeout: Duration,
}

impl OllamaInferenceClient {
    /// Create a new client from configuration
    ///
    /// The per-call deadline is enforced by the analysis pool, so the
    /// HTTP client carries the same timeout as a backstop.
    pub fn new(config: &InferenceConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }
}

#[async_trait]
impl InferenceClient for OllamaInferenceClient {
    async fn complete(
        &self,
        system: &str,
        prompt: &str,
    ) -> std::result::Result<String, AnalysisError> {
        let url = format!("{}/api/chat", self.base_url);

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            stream: false,
            options: ChatOptions {
                temperature: self.temperature,
            },
        };

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AnalysisError::Timeout(self.timeout)
                } else {
                    AnalysisError::ServiceUnavailable(format!("HTTP request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(AnalysisError::ServiceUnavailable(format!(
                "API error ({}): {}",
                status, error_text
            )));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::InvalidResponse(format!("failed to parse: {}", e)))?;

        let content = body.message.content.trim().to_string();
        if content.is_empty() {
            return Err(AnalysisError::InvalidResponse(
                "empty completion".to_string(),
            ));
        }

        Ok(content)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}
