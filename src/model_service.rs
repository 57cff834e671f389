//! Client seam for the external chat and embedding model service.
//!
//! The pipeline only sees the [`ModelService`] trait; production wires
//! the HTTP implementation, tests wire deterministic mocks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Chat call envelope: everything the service needs to generate text.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Model identifier understood by the service.
    pub model: String,
    /// System prompt establishing the task.
    pub system: String,
    /// User prompt carrying the text to analyze.
    pub prompt: String,
    /// Context-window hint in tokens.
    pub num_ctx: u32,
}

/// Failure from a single model-service call.
///
/// `retryable` separates transient transport/server trouble from
/// rejections that will fail identically on retry (4xx).
#[derive(Debug)]
pub struct ModelServiceError {
    message: String,
    retryable: bool,
}

impl ModelServiceError {
    /// A failure worth retrying (timeouts, connection loss, 5xx).
    pub fn transient(message: impl Into<String>) -> Self {
        Self { message: message.into(), retryable: true }
    }

    /// A failure that will not improve on retry (4xx, bad payloads).
    pub fn permanent(message: impl Into<String>) -> Self {
        Self { message: message.into(), retryable: false }
    }

    /// Whether a retry has any chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

impl fmt::Display for ModelServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ModelServiceError {}

/// Chat and embedding operations offered by the external model service.
#[async_trait]
pub trait ModelService: Send + Sync {
    /// Generates text for a chat request and returns the raw response.
    async fn chat(&self, request: &ChatRequest) -> Result<String, ModelServiceError>;

    /// Embeds a single text into a dense vector.
    async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>, ModelServiceError>;
}

const CHAT_TIMEOUT: Duration = Duration::from_secs(120);
const EMBED_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for an Ollama-shaped model service.
pub struct HttpModelService {
    base_url: String,
    chat_client: reqwest::Client,
    embed_client: reqwest::Client,
}

impl HttpModelService {
    /// Builds clients for the service at `base_url`, with chat and
    /// embedding timeouts tuned to their respective latencies.
    pub fn new(base_url: &str) -> Result<Self, ModelServiceError> {
        let chat_client = reqwest::Client::builder()
            .timeout(CHAT_TIMEOUT)
            .build()
            .map_err(|e| ModelServiceError::permanent(format!("chat client: {e}")))?;
        let embed_client = reqwest::Client::builder()
            .timeout(EMBED_TIMEOUT)
            .build()
            .map_err(|e| ModelServiceError::permanent(format!("embed client: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            chat_client,
            embed_client,
        })
    }

    fn classify(err: reqwest::Error) -> ModelServiceError {
        if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            ModelServiceError::transient(err.to_string())
        } else {
            ModelServiceError::permanent(err.to_string())
        }
    }

    fn classify_status(status: reqwest::StatusCode, body: &str) -> ModelServiceError {
        let message = format!("model service returned {status}: {body}");
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            ModelServiceError::transient(message)
        } else {
            ModelServiceError::permanent(message)
        }
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    options: GenerateOptions,
    format: &'a str,
    stream: bool,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_ctx: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

#[async_trait]
impl ModelService for HttpModelService {
    async fn chat(&self, request: &ChatRequest) -> Result<String, ModelServiceError> {
        let body = GenerateRequest {
            model: &request.model,
            prompt: &request.prompt,
            system: &request.system,
            options: GenerateOptions { temperature: 0.0, num_ctx: request.num_ctx },
            format: "json",
            stream: false,
        };

        let url = format!("{}/api/generate", self.base_url);
        tracing::debug!(model = %request.model, num_ctx = request.num_ctx, "chat request");

        let response = self
            .chat_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(Self::classify)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &body));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ModelServiceError::permanent(format!("chat response parse: {e}")))?;
        Ok(parsed.response)
    }

    async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>, ModelServiceError> {
        if text.is_empty() {
            return Err(ModelServiceError::permanent("empty text for embedding"));
        }

        let body = EmbeddingRequest { model, prompt: text };
        let url = format!("{}/api/embeddings", self.base_url);

        let response = self
            .embed_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(Self::classify)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &body));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ModelServiceError::permanent(format!("embedding response parse: {e}")))?;
        Ok(parsed.embedding)
    }
}
