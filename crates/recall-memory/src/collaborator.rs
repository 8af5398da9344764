//! Collaborator seams.
//!
//! The store never talks to a model server directly.  Text is turned into
//! vectors by an [`Embedder`] and near-duplicate facts are merged by a
//! [`TextGenerator`]; both are injected at construction so tests can swap in
//! in-process fakes.  `recall-runtime` provides the HTTP-backed
//! implementations.

use async_trait::async_trait;
use recall_types::CollaboratorError;

/// Converts text into a fixed-dimension embedding vector.
///
/// # Contract
///
/// * Every call made against one model returns vectors of the same length.
/// * A failure aborts the store operation that requested the embedding.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CollaboratorError>;
}

/// Produces text from a short prompt.  Used only to merge two facts.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, CollaboratorError>;
}
