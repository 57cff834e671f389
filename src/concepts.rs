//! LLM-driven concept extraction with an adaptive strategy: one call
//! for short texts, chunked concurrent calls merged by name otherwise.

use crate::error::PipelineError;
use crate::keywords::CandidateKeyword;
use crate::model_service::{ChatRequest, ModelService};
use crate::segment::chunk_text;
use futures_util::future::join_all;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use tokio::sync::Semaphore;

/// Inputs shorter than this go to the model in a single call.
const SINGLE_SHOT_LIMIT: usize = 6000;
const CHUNK_SIZE: usize = 2000;
const CHUNK_OVERLAP: usize = 200;

/// Weight of the LLM importance when a concept matches an NLP candidate.
const LLM_BLEND_WEIGHT: f32 = 0.7;
const NLP_BLEND_WEIGHT: f32 = 0.3;

static PUNCT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s']").expect("punct regex"));
static APOS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s'|'\s").expect("apostrophe regex"));
static SPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("space regex"));

/// A normalized phrase extracted from text with an importance in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct Concept {
    /// Lowercased phrase with punctuation stripped and spaces collapsed.
    pub name: String,
    /// Importance weight in [0, 1].
    pub importance: f32,
}

/// Strips punctuation, collapses whitespace, and lowercases a phrase.
pub fn normalize_name(raw: &str) -> String {
    let text = PUNCT_RE.replace_all(raw, " ");
    let text = APOS_RE.replace_all(&text, " ");
    let text = SPACE_RE.replace_all(&text, " ");
    text.trim().to_lowercase()
}

/// Extracts `(concept, importance)` pairs through the model service.
pub struct ConceptExtractor {
    service: Arc<dyn ModelService>,
    semaphore: Arc<Semaphore>,
    model: String,
}

impl ConceptExtractor {
    /// Builds an extractor calling `model` on `service`, with chunk
    /// fan-out bounded by `semaphore`.
    pub fn new(service: Arc<dyn ModelService>, semaphore: Arc<Semaphore>, model: &str) -> Self {
        Self {
            service,
            semaphore,
            model: model.to_string(),
        }
    }

    /// Extracts concepts from `text`, blending importances with the NLP
    /// candidate scores. Fails with `NoConceptsExtracted` when nothing
    /// survives parsing across all chunks.
    pub async fn extract(
        &self,
        text: &str,
        candidates: &[CandidateKeyword],
    ) -> Result<Vec<Concept>, PipelineError> {
        let hints = build_candidate_hints(candidates);

        let merged = if text.len() < SINGLE_SHOT_LIMIT {
            self.call_model(text, &hints).await?
        } else {
            let chunks = chunk_text(text, CHUNK_SIZE, CHUNK_OVERLAP);
            tracing::info!(
                chars = text.len(),
                chunks = chunks.len(),
                "long input, extracting per chunk"
            );

            let futures = chunks.iter().map(|chunk| async {
                let _permit = self
                    .semaphore
                    .acquire()
                    .await
                    .map_err(|_| PipelineError::Cancelled)?;
                self.call_model(chunk, &hints).await
            });
            let results: Result<Vec<Vec<Concept>>, PipelineError> =
                join_all(futures).await.into_iter().collect();
            merge_chunk_concepts(results?)
        };

        if merged.is_empty() {
            return Err(PipelineError::NoConceptsExtracted);
        }

        let mut blended = blend_with_candidates(merged, candidates);
        blended.sort_by(|a, b| {
            b.importance
                .partial_cmp(&a.importance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.name.cmp(&b.name))
        });
        tracing::debug!(count = blended.len(), "extracted concepts");
        Ok(blended)
    }

    /// One chat round-trip: prompt, parse, normalize, dedup.
    async fn call_model(&self, text: &str, hints: &str) -> Result<Vec<Concept>, PipelineError> {
        let system = format!(
            "You are a concept extractor that identifies the core intellectual themes in a text.\n\
             Given a text and statistically-identified candidate keywords:\n\n\
             1. Identify the central themes and ideas, not just mentioned terms\n\
             2. Validate which candidates represent meaningful concepts in context\n\
             3. Add important conceptual themes the statistics missed\n\
             4. Prefer domain-specific phrases over generic single words\n\
             5. Rate each concept's importance: 1.0 = central thesis, 0.7 = major supporting theme, 0.3 = mentioned topic\n\
             6. Return 5-15 concepts total, each a word or short phrase of 1-3 words\n\
             {hints}\n\
             Output ONLY valid JSON of the form {{\"concepts\": [{{\"name\": \"...\", \"importance\": 0.8}}]}}."
        );
        let prompt = format!(
            "Extract the key concepts from this text. Rate each concept's importance from 0.0 to 1.0:\n\n{text}"
        );

        let request = ChatRequest {
            model: self.model.clone(),
            system,
            prompt,
            num_ctx: compute_num_ctx(text.len()),
        };

        let response = self
            .service
            .chat(&request)
            .await
            .map_err(|e| PipelineError::ModelService(e.to_string()))?;

        Ok(parse_concepts(&response))
    }
}

/// Context-window hint: roughly a token per three characters plus room
/// for the prompt scaffolding, floored at the model's default.
fn compute_num_ctx(text_len: usize) -> u32 {
    std::cmp::max(4096, (text_len / 3 + 1024) as u32)
}

fn build_candidate_hints(candidates: &[CandidateKeyword]) -> String {
    if candidates.is_empty() {
        return String::new();
    }
    let mut hints =
        String::from("\nCandidate keywords (from statistical analysis of the full text):\n");
    for candidate in candidates.iter().take(20) {
        hints.push_str(&format!("- \"{}\" (score: {:.2})\n", candidate.phrase, candidate.score));
    }
    hints
}

/// Parses a model response leniently: strict JSON first, then bullet
/// lists, then comma-separated fragments. Entries longer than three
/// words are dropped; a missing importance defaults to 0.5.
fn parse_concepts(response: &str) -> Vec<Concept> {
    #[derive(Deserialize)]
    struct Entry {
        name: String,
        importance: Option<f64>,
    }

    #[derive(Deserialize)]
    struct Envelope {
        concepts: Vec<serde_json::Value>,
    }

    let mut concepts: Vec<Concept> = Vec::new();

    if let Ok(envelope) = serde_json::from_str::<Envelope>(response) {
        for value in envelope.concepts {
            match value {
                serde_json::Value::Object(_) => {
                    if let Ok(entry) = serde_json::from_value::<Entry>(value) {
                        push_concept(&mut concepts, &entry.name, entry.importance);
                    }
                }
                serde_json::Value::String(s) => push_concept(&mut concepts, &s, None),
                _ => {}
            }
        }
    } else {
        // Recovery pass for models that ignored the schema.
        for line in response.lines() {
            let trimmed = line.trim();
            if let Some(item) = trimmed
                .strip_prefix("- ")
                .or_else(|| trimmed.strip_prefix("* "))
                .or_else(|| trimmed.strip_prefix("• "))
            {
                push_concept(&mut concepts, item, None);
            }
        }
        if concepts.is_empty() && response.contains(',') && !response.contains('{') {
            for fragment in response.split(',') {
                push_concept(&mut concepts, fragment, None);
            }
        }
    }

    dedup_by_name(concepts)
}

fn push_concept(concepts: &mut Vec<Concept>, raw: &str, importance: Option<f64>) {
    let name = normalize_name(raw);
    if name.is_empty() || name.split_whitespace().count() > 3 {
        return;
    }
    let importance = importance.map(|i| (i as f32).clamp(0.0, 1.0)).unwrap_or(0.5);
    concepts.push(Concept { name, importance });
}

/// Keeps one concept per name, preferring the higher importance.
fn dedup_by_name(concepts: Vec<Concept>) -> Vec<Concept> {
    let mut best: HashMap<String, Concept> = HashMap::new();
    for concept in concepts {
        match best.entry(concept.name.clone()) {
            std::collections::hash_map::Entry::Occupied(mut e) => {
                if concept.importance > e.get().importance {
                    *e.get_mut() = concept;
                }
            }
            std::collections::hash_map::Entry::Vacant(e) => {
                e.insert(concept);
            }
        }
    }
    best.into_values().collect()
}

/// Merges per-chunk results by normalized name, keeping the maximum
/// importance on collision.
fn merge_chunk_concepts(chunk_results: Vec<Vec<Concept>>) -> Vec<Concept> {
    dedup_by_name(chunk_results.into_iter().flatten().collect())
}

/// Replaces each importance with `0.7·llm + 0.3·nlp` when the concept's
/// name matches a candidate phrase; otherwise the LLM score stands.
fn blend_with_candidates(concepts: Vec<Concept>, candidates: &[CandidateKeyword]) -> Vec<Concept> {
    let by_phrase: HashMap<String, f32> = candidates
        .iter()
        .map(|c| (normalize_name(&c.phrase), c.score))
        .collect();

    concepts
        .into_iter()
        .map(|mut concept| {
            if let Some(nlp_score) = by_phrase.get(&concept.name) {
                concept.importance = (LLM_BLEND_WEIGHT * concept.importance
                    + NLP_BLEND_WEIGHT * nlp_score)
                    .clamp(0.0, 1.0);
            }
            concept
        })
        .collect()
}
