mod hash_provider;

pub use hash_provider::HashEmbeddingProvider;

use async_trait::async_trait;

/// A text embedding plus the identity of the model that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingVector {
    pub vector: Vec<f32>,
    pub provider: String,
    pub model: String,
}

/// Collaborator the Registry Service calls to turn text into vectors: a
/// trait-object-injected collaborator, so the service only ever sees this
/// interface, never a concrete backend.
///
/// Concrete network-backed providers (OpenAI, a local model server) are out
/// of scope here — only the interface and a deterministic provider usable in
/// tests and in deployments with no real embedding backend configured.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Stable identifier written into `SemanticEmbedding.provider`.
    fn name(&self) -> &str;

    /// Model identifier written into `SemanticEmbedding.model`.
    fn model(&self) -> &str;

    /// Dimensionality every vector this provider returns will have.
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> anyhow::Result<EmbeddingVector>;
}
