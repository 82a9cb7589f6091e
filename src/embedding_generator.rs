//! Embedding backends.
//!
//! The engine only sees `EmbeddingBackend`; it never knows how vectors are
//! produced. `OllamaBackend` talks to an Ollama server over HTTP.

use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::errors::{BackendError, ServiceError, ServiceResult};

/// Computes an embedding vector for a piece of normalized text
pub trait EmbeddingBackend: Send + Sync {
    fn compute<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<f32>, BackendError>>;

    /// Short name used in logs
    fn name(&self) -> &str;
}

/// Request payload for Ollama embedding API
#[derive(Debug, Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

/// Response from Ollama embedding API
#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

/// Connection settings for `OllamaBackend`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
    /// Connect timeout; the overall call is bounded by the dispatcher
    pub connect_timeout_ms: u64,
    /// Keep-alive duration for pooled connections (seconds)
    pub keep_alive_seconds: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            connect_timeout_ms: 5_000,
            keep_alive_seconds: 60,
        }
    }
}

/// HTTP backend calling `POST {base_url}/api/embeddings`
#[derive(Clone)]
pub struct OllamaBackend {
    client: Client,
    config: OllamaConfig,
    endpoint: String,
}

impl OllamaBackend {
    pub fn new(config: OllamaConfig) -> ServiceResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .pool_idle_timeout(Duration::from_secs(config.keep_alive_seconds))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| ServiceError::config(format!("failed to build HTTP client: {}", e)))?;

        let endpoint = format!("{}/api/embeddings", config.base_url.trim_end_matches('/'));

        Ok(Self {
            client,
            config,
            endpoint,
        })
    }

    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    async fn request_embedding(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        let request = OllamaEmbeddingRequest {
            model: &self.config.model,
            prompt: text,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| BackendError::Request { message: e.to_string() })?;

        if !response.status().is_success() {
            let status_code = response.status().as_u16();
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(BackendError::Api { status_code, message });
        }

        let body: OllamaEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse { reason: e.to_string() })?;

        if body.embedding.is_empty() {
            return Err(BackendError::InvalidResponse {
                reason: "empty embedding vector".to_string(),
            });
        }

        Ok(body.embedding)
    }
}

impl EmbeddingBackend for OllamaBackend {
    fn compute<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<f32>, BackendError>> {
        Box::pin(self.request_embedding(text))
    }

    fn name(&self) -> &str {
        "ollama"
    }
}
