//! Closed error taxonomy shared by every pipeline stage.

use axum::http::StatusCode;
use thiserror::Error;

/// Every failure a request can surface, mapped one-to-one onto the HTTP
/// error contract. Stages return these directly; the server layer only
/// translates them into status codes and response envelopes.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The extractor produced zero concepts across all chunks.
    #[error("no concepts could be extracted from the provided text")]
    NoConceptsExtracted,

    /// Embedding vectors within one run disagree on dimension.
    #[error("embedding vectors disagree on dimension")]
    EmbeddingDimensionMismatch,

    /// Fetching the source URL failed (network, status, content type).
    #[error("failed to fetch url: {0}")]
    UrlFetch(String),

    /// The readability pass produced no usable article body.
    #[error("failed to extract article content: {0}")]
    ContentExtraction(String),

    /// The request itself was malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A chat or embedding call failed after its retry budget.
    #[error("model service call failed: {0}")]
    ModelService(String),

    /// The repository or blob store rejected a persistence call.
    #[error("storage operation failed: {0}")]
    Storage(String),

    /// The client went away before the pipeline finished.
    #[error("request was cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Short machine-readable kind carried in error envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoConceptsExtracted => "no_concepts_extracted",
            Self::EmbeddingDimensionMismatch => "embedding_dimension_mismatch",
            Self::UrlFetch(_) => "url_fetch",
            Self::ContentExtraction(_) => "content_extraction",
            Self::InvalidRequest(_) => "invalid_request",
            Self::ModelService(_) => "model_service",
            Self::Storage(_) => "storage",
            Self::Cancelled => "cancelled",
        }
    }

    /// HTTP status the error maps to at the boundary.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NoConceptsExtracted
            | Self::EmbeddingDimensionMismatch
            | Self::UrlFetch(_)
            | Self::ContentExtraction(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::ModelService(_) | Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            // 499: client closed request (no named constant in the http crate).
            Self::Cancelled => StatusCode::from_u16(499).expect("static status code"),
        }
    }
}
