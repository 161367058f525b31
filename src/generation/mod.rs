//! Generative language-model client used to phrase grounded answers.
//!
//! The Ollama adapter issues a single non-streaming `/api/generate` request per prompt.
//! No retries happen here; callers decide what a failure means.

use crate::config::{Config, get_config};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced while asking the language model for an answer.
#[derive(Debug, Error)]
pub enum GenerationClientError {
    /// Provider was unreachable or could not be constructed.
    #[error("Generation provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response.
    #[error("Failed to generate answer: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

/// Interface implemented by generative model backends.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Complete `prompt` and return the model's text.
    async fn generate(&self, prompt: &str) -> Result<String, GenerationClientError>;
}

/// Build a generation client for the given configuration.
pub fn generation_client_for(
    config: &Config,
) -> Result<Arc<dyn GenerationClient>, GenerationClientError> {
    tracing::debug!(
        model = %config.generation_model,
        url = %config.ollama_url,
        "Building generation client"
    );
    Ok(Arc::new(OllamaGenerationClient::new(
        config.ollama_url.clone(),
        config.generation_model.clone(),
    )?))
}

/// Build a generation client from the process-wide configuration.
pub fn get_generation_client() -> Result<Arc<dyn GenerationClient>, GenerationClientError> {
    generation_client_for(get_config())
}

/// Generation client backed by a local Ollama runtime.
pub struct OllamaGenerationClient {
    http: Client,
    base_url: String,
    model: String,
}

impl OllamaGenerationClient {
    /// Build a client for `model` served at `base_url`.
    pub fn new(base_url: String, model: String) -> Result<Self, GenerationClientError> {
        let http = Client::builder()
            .user_agent("agentic-rag/generate")
            .build()
            .map_err(|error| GenerationClientError::ProviderUnavailable(error.to_string()))?;
        Ok(Self {
            http,
            base_url,
            model,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    done: bool,
}

#[async_trait]
impl GenerationClient for OllamaGenerationClient {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationClientError> {
        let payload = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": 0.2,
            }
        });

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                GenerationClientError::ProviderUnavailable(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(GenerationClientError::ProviderUnavailable(format!(
                "Ollama endpoint {} returned 404",
                self.endpoint()
            )));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationClientError::GenerationFailed(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        let body: OllamaResponse = response.json().await.map_err(|error| {
            GenerationClientError::InvalidResponse(format!(
                "failed to decode Ollama response: {error}"
            ))
        })?;

        if !body.done {
            return Err(GenerationClientError::InvalidResponse(
                "Ollama response incomplete (streaming not supported)".into(),
            ));
        }

        Ok(body.response.trim().to_string())
    }
}
