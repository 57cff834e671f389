//! Storage seam for user concepts and text references.
//!
//! The column-store client is an external collaborator; the pipeline
//! only sees this trait. The in-memory implementation backs tests and
//! deployments without storage nodes.

use crate::pipeline::TextReference;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;
use uuid::Uuid;

/// Failure from a repository operation.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct RepositoryError(pub String);

/// Persistence operations the coordinator depends on.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Records concept names for a user.
    async fn save_user_concepts(
        &self,
        user_id: Uuid,
        concepts: &[String],
    ) -> Result<(), RepositoryError>;

    /// Records an uploaded text and its extracted concepts.
    async fn save_text_reference(&self, reference: &TextReference) -> Result<(), RepositoryError>;

    /// Texts of a user that produced the given concept.
    async fn find_texts_by_concept(
        &self,
        user_id: Uuid,
        concept: &str,
    ) -> Result<Vec<TextReference>, RepositoryError>;

    /// All concept names previously stored for a user.
    async fn load_user_concepts(&self, user_id: Uuid) -> Result<Vec<String>, RepositoryError>;
}

/// Map-backed repository for tests and storage-less deployments.
#[derive(Default)]
pub struct InMemoryRepository {
    concepts: RwLock<HashMap<Uuid, Vec<String>>>,
    references: RwLock<HashMap<Uuid, Vec<TextReference>>>,
}

impl InMemoryRepository {
    /// Builds an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a user's stored references, for assertions in tests.
    pub fn references_for(&self, user_id: Uuid) -> Vec<TextReference> {
        self.references
            .read()
            .unwrap()
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn save_user_concepts(
        &self,
        user_id: Uuid,
        concepts: &[String],
    ) -> Result<(), RepositoryError> {
        let mut store = self.concepts.write().unwrap();
        let entry = store.entry(user_id).or_default();
        for concept in concepts {
            if !entry.contains(concept) {
                entry.push(concept.clone());
            }
        }
        Ok(())
    }

    async fn save_text_reference(&self, reference: &TextReference) -> Result<(), RepositoryError> {
        self.references
            .write()
            .unwrap()
            .entry(reference.user_id)
            .or_default()
            .push(reference.clone());
        Ok(())
    }

    async fn find_texts_by_concept(
        &self,
        user_id: Uuid,
        concept: &str,
    ) -> Result<Vec<TextReference>, RepositoryError> {
        Ok(self
            .references
            .read()
            .unwrap()
            .get(&user_id)
            .map(|refs| {
                refs.iter()
                    .filter(|r| r.concepts.iter().any(|c| c == concept))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn load_user_concepts(&self, user_id: Uuid) -> Result<Vec<String>, RepositoryError> {
        Ok(self
            .concepts
            .read()
            .unwrap()
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }
}
