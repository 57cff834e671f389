//! Request coordinator: resolves the input source, fans out the NLP and
//! model stages, and assembles positioned concept groups.

use crate::article::{derive_filename, ArticleScraper};
use crate::cdn::Cdn;
use crate::concepts::ConceptExtractor;
use crate::embeddings::EmbeddingClient;
use crate::error::PipelineError;
use crate::keywords::KeywordExtractor;
use crate::layout::layout_positions;
use crate::merge::{connections, group_similarity, merge_concepts, LINK_THRESHOLD, MERGE_THRESHOLD};
use crate::model_service::ModelService;
use crate::repository::Repository;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Candidate keyphrases handed to the concept extractor as hints.
const MAX_CANDIDATES: usize = 20;

/// Weight of member importance in the group importance score; the
/// remainder comes from connectivity.
const IMPORTANCE_WEIGHT: f32 = 0.7;
const CONNECTIVITY_WEIGHT: f32 = 0.3;

/// The input to vectorize: pasted text or a URL to scrape.
#[derive(Debug, Clone)]
pub enum Source {
    /// Raw text supplied by the client.
    Text(String),
    /// Article URL to fetch and reduce to text.
    Url(String),
}

/// One vectorize invocation.
#[derive(Debug, Clone)]
pub struct VectorizeRequest {
    /// Text or URL input.
    pub source: Source,
    /// Owner of the produced concepts.
    pub user_id: Uuid,
    /// Optional filename for the stored text blob.
    pub filename: Option<String>,
}

/// A positioned group of merged concepts: the output unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptGroup {
    /// Member concept names, largest importance first.
    pub concepts: Vec<String>,
    /// Position in 3D space.
    pub reduced_embedding: Vec<f32>,
    /// Indices of groups with above-threshold centroid similarity.
    pub connections: Vec<usize>,
    /// Blended importance in [0, 1].
    pub importance_score: f32,
    /// Index of the group in the output array.
    pub group_id: usize,
}

/// Persisted record of one uploaded text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextReference {
    /// Identifier of the stored text.
    pub text_id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// Stored filename.
    pub filename: String,
    /// Public URL of the uploaded blob.
    pub url: String,
    /// Original article URL when the input was scraped.
    pub source_url: Option<String>,
    /// Concept names extracted from the text.
    pub concepts: Vec<String>,
    /// Upload time (ISO-8601 on the wire).
    pub upload_timestamp: DateTime<Utc>,
    /// Byte size of the stored text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
}

/// Tunables for one pipeline instance.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Chat model used for concept extraction.
    pub chat_model: String,
    /// Embedding model.
    pub embed_model: String,
    /// Cap on concurrent model-service calls.
    pub max_concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chat_model: "phi3.5".to_string(),
            embed_model: "snowflake-arctic-embed2".to_string(),
            max_concurrency: 16,
        }
    }
}

/// Orchestrates scrape → keywords → extraction → embeddings → merge →
/// layout → persistence for one request at a time.
pub struct Pipeline {
    scraper: ArticleScraper,
    keywords: Arc<KeywordExtractor>,
    extractor: ConceptExtractor,
    embeddings: EmbeddingClient,
    repository: Arc<dyn Repository>,
    cdn: Arc<dyn Cdn>,
}

impl Pipeline {
    /// Wires a pipeline over process-wide service handles.
    pub fn new(
        service: Arc<dyn ModelService>,
        repository: Arc<dyn Repository>,
        cdn: Arc<dyn Cdn>,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        Ok(Self {
            scraper: ArticleScraper::new()?,
            keywords: Arc::new(KeywordExtractor::new()),
            extractor: ConceptExtractor::new(
                Arc::clone(&service),
                Arc::clone(&semaphore),
                &config.chat_model,
            ),
            embeddings: EmbeddingClient::new(service, semaphore, &config.embed_model),
            repository,
            cdn,
        })
    }

    /// Runs the full pipeline and returns positioned concept groups.
    pub async fn vectorize(
        &self,
        request: VectorizeRequest,
    ) -> Result<Vec<ConceptGroup>, PipelineError> {
        let (text, source_url, title) = match &request.source {
            Source::Text(text) => (text.clone(), None, String::new()),
            Source::Url(url) => {
                let article = self.scraper.fetch(url).await?;
                (article.body, Some(url.clone()), article.title)
            }
        };

        if text.trim().is_empty() {
            return Err(PipelineError::InvalidRequest("text is empty".into()));
        }

        tracing::info!(user = %request.user_id, chars = text.len(), "vectorizing text");

        // Keyword scoring is CPU-bound; run it off the async thread while
        // previously stored concepts load for future dedup.
        let keywords = Arc::clone(&self.keywords);
        let keyword_text = text.clone();
        let candidate_task =
            tokio::task::spawn_blocking(move || keywords.extract(&keyword_text, MAX_CANDIDATES));
        let stored_task = self.repository.load_user_concepts(request.user_id);
        let (candidates, stored) = tokio::join!(candidate_task, stored_task);
        let candidates = candidates.map_err(|_| PipelineError::Cancelled)?;
        match stored {
            Ok(stored) => {
                tracing::debug!(count = stored.len(), "loaded stored concepts")
            }
            Err(err) => tracing::warn!(error = %err, "loading stored concepts failed"),
        }

        let concepts = self.extractor.extract(&text, &candidates).await?;

        let names: Vec<String> = concepts.iter().map(|c| c.name.clone()).collect();
        let embeddings = self.embeddings.embed_all(&names).await?;

        let groups = merge_concepts(&concepts, &embeddings, MERGE_THRESHOLD);
        let similarity = group_similarity(&groups);
        let centroids: Vec<_> = groups.iter().map(|g| g.centroid.clone()).collect();
        let positions = layout_positions(&centroids, &similarity);

        let group_count = groups.len();
        let output: Vec<ConceptGroup> = groups
            .iter()
            .zip(positions)
            .enumerate()
            .map(|(group_id, (group, position))| {
                let links = connections(&similarity, group_id, LINK_THRESHOLD);
                let connectivity = if group_count > 1 {
                    links.len() as f32 / (group_count - 1) as f32
                } else {
                    0.0
                };
                let importance_score = (IMPORTANCE_WEIGHT * group.max_importance
                    + CONNECTIVITY_WEIGHT * connectivity)
                    .clamp(0.0, 1.0);
                ConceptGroup {
                    concepts: group.names.clone(),
                    reduced_embedding: position.to_vec(),
                    connections: links,
                    importance_score,
                    group_id,
                }
            })
            .collect();

        self.persist(&request, &text, source_url, &title, &names).await?;

        tracing::info!(groups = output.len(), "vectorize complete");
        Ok(output)
    }

    /// Stored texts of `user_id` that produced `concept`.
    pub async fn texts_by_concept(
        &self,
        user_id: Uuid,
        concept: &str,
    ) -> Result<Vec<TextReference>, PipelineError> {
        self.repository
            .find_texts_by_concept(user_id, concept)
            .await
            .map_err(|e| PipelineError::Storage(e.to_string()))
    }

    /// Uploads the text body and records the reference plus concepts.
    async fn persist(
        &self,
        request: &VectorizeRequest,
        text: &str,
        source_url: Option<String>,
        title: &str,
        names: &[String],
    ) -> Result<(), PipelineError> {
        let text_id = Uuid::new_v4();
        let filename = request.filename.clone().unwrap_or_else(|| match &source_url {
            Some(url) => derive_filename(title, url),
            None => format!("text-{text_id}.txt"),
        });

        let url = self
            .cdn
            .upload_text(request.user_id, &filename, text)
            .await
            .map_err(|e| PipelineError::Storage(e.to_string()))?;

        let reference = TextReference {
            text_id,
            user_id: request.user_id,
            filename,
            url,
            source_url,
            concepts: names.to_vec(),
            upload_timestamp: Utc::now(),
            file_size: Some(text.len() as u64),
        };

        self.repository
            .save_text_reference(&reference)
            .await
            .map_err(|e| PipelineError::Storage(e.to_string()))?;
        self.repository
            .save_user_concepts(request.user_id, names)
            .await
            .map_err(|e| PipelineError::Storage(e.to_string()))?;
        Ok(())
    }
}
