use anyhow::Result;
use async_trait::async_trait;
use fastembed::{EmbeddingModel as FastEmbedModel, InitOptions, TextEmbedding};
use std::sync::Arc;

pub type Embedding = Vec<f32>;

/// The contract with the embedding service: UTF-8 text in, one fixed-length
/// vector out. Dimensionality must stay constant for a store's lifetime;
/// failures propagate unmodified, no retry.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Embedding>;
}

/// Local provider backed by a fastembed ONNX model (no network after the
/// initial model download).
#[derive(Clone)]
pub struct LocalEmbedder {
    model: Arc<TextEmbedding>,
}

impl LocalEmbedder {
    pub fn new() -> Result<Self> {
        let mut options = InitOptions::default();
        options.model_name = FastEmbedModel::MultilingualE5Small;
        options.show_download_progress = false;

        let model = TextEmbedding::try_new(options)?;

        Ok(Self {
            model: Arc::new(model),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let embeddings = self.model.embed(vec![text], None)?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Failed to generate embedding"))
    }
}

/// Calculate cosine similarity between two vectors.
/// Returns a value between -1.0 and 1.0 (1.0 = identical direction).
/// Mismatched lengths or a zero vector yield 0.0, never a division by zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}
