// src/embeddings/mod.rs
// Embedding provider module (OpenAI embeddings API)

mod openai;

pub use openai::{OpenAiEmbeddings, EmbeddingModel};

use crate::error::Result;
use async_trait::async_trait;

/// Batch embedding seam used by the index writer
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed texts in order. All-or-nothing: an error means no vectors were
    /// produced for this call.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Vector dimensionality
    fn dimensions(&self) -> usize;

    /// Model name for display/logging
    fn model_name(&self) -> String;
}
