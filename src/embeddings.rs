//! Concurrent embedding generation with bounded fan-out and retries.

use crate::error::PipelineError;
use crate::model_service::ModelService;
use futures_util::future::join_all;
use ndarray::Array1;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Dense vector produced by the model service for one concept.
pub type Embedding = Array1<f32>;

/// Retries per request on transient failures.
const MAX_RETRIES: usize = 2;
/// First backoff delay; doubles each attempt.
const BACKOFF_BASE: Duration = Duration::from_millis(200);
/// Backoff jitter spread: each delay is scaled by 1 ± this fraction.
const JITTER_FRACTION: f64 = 0.25;

/// Issues one embedding request per concept, bounded by a shared
/// semaphore, and reassembles results in input order.
pub struct EmbeddingClient {
    service: Arc<dyn ModelService>,
    semaphore: Arc<Semaphore>,
    model: String,
}

impl EmbeddingClient {
    /// Builds a client embedding through `model` on `service`.
    pub fn new(service: Arc<dyn ModelService>, semaphore: Arc<Semaphore>, model: &str) -> Self {
        Self {
            service,
            semaphore,
            model: model.to_string(),
        }
    }

    /// Embeds every text concurrently. Any request failing past its
    /// retry budget fails the whole batch; so do vectors that disagree
    /// on dimension.
    pub async fn embed_all(&self, texts: &[String]) -> Result<Vec<Embedding>, PipelineError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        tracing::info!(count = texts.len(), "embedding concepts");

        let futures = texts.iter().enumerate().map(|(index, text)| async move {
            let _permit = self
                .semaphore
                .acquire()
                .await
                .map_err(|_| PipelineError::Cancelled)?;
            let vector = self.embed_with_retry(text).await?;
            Ok::<(usize, Vec<f32>), PipelineError>((index, vector))
        });

        let mut ordered: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        for result in join_all(futures).await {
            let (index, vector) = result?;
            ordered[index] = Some(vector);
        }

        let vectors: Vec<Vec<f32>> = ordered
            .into_iter()
            .map(|v| v.ok_or_else(|| PipelineError::ModelService("missing embedding".into())))
            .collect::<Result<_, _>>()?;

        let dim = vectors[0].len();
        if dim == 0 || vectors.iter().any(|v| v.len() != dim) {
            return Err(PipelineError::EmbeddingDimensionMismatch);
        }

        Ok(vectors.into_iter().map(Array1::from).collect())
    }

    async fn embed_with_retry(&self, text: &str) -> Result<Vec<f32>, PipelineError> {
        let mut attempt = 0;
        loop {
            match self.service.embed(&self.model, text).await {
                Ok(vector) => return Ok(vector),
                Err(err) if err.is_retryable() && attempt < MAX_RETRIES => {
                    let delay = backoff_delay(attempt);
                    tracing::debug!(attempt, ?delay, error = %err, "retrying embedding");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(PipelineError::ModelService(err.to_string())),
            }
        }
    }
}

/// Exponential backoff with jitter: `base · 2^attempt · (1 ± 0.25)`.
fn backoff_delay(attempt: usize) -> Duration {
    let base = BACKOFF_BASE.as_millis() as f64 * (1u64 << attempt.min(16)) as f64;
    let jitter = rand::thread_rng().gen_range(1.0 - JITTER_FRACTION..=1.0 + JITTER_FRACTION);
    Duration::from_millis((base * jitter) as u64)
}
