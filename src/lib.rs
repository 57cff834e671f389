#![warn(missing_docs)]
//! Core library for the mindmesh text-to-3D concept map service.

pub mod article;
pub mod cdn;
pub mod concepts;
pub mod embeddings;
pub mod error;
pub mod keywords;
pub mod layout;
pub mod merge;
pub mod model_service;
pub mod pipeline;
pub mod repository;
pub mod segment;
pub mod server;

pub use article::{ArticleScraper, ScrapedArticle};
pub use cdn::{Cdn, GitHubCdn, InMemoryCdn};
pub use concepts::{Concept, ConceptExtractor};
pub use embeddings::{Embedding, EmbeddingClient};
pub use error::PipelineError;
pub use keywords::{CandidateKeyword, KeywordExtractor};
pub use model_service::{ChatRequest, HttpModelService, ModelService, ModelServiceError};
pub use pipeline::{ConceptGroup, Pipeline, PipelineConfig, Source, TextReference, VectorizeRequest};
pub use repository::{InMemoryRepository, Repository};
pub use server::{router, AppState};
