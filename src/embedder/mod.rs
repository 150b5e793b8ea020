/// Embedder trait and shared types for text embedding.
///
/// The model itself is a black box behind [`Embedder`]; callers only rely on
/// the dimensionality and on batch results being index-aligned with inputs.
pub mod mock;
pub mod onnx;
pub mod tokenizer;

use crate::config::ModelConfig;
use mock::MockEmbedder;
use onnx::OnnxEmbedder;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Errors that can occur during embedding operations.
#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("model load failed: {0}")]
    ModelLoadFailed(String),

    #[error("tokenizer error: {0}")]
    TokenizerError(String),

    #[error("backend returned {actual} embeddings for {expected} inputs")]
    BatchMismatch { expected: usize, actual: usize },
}

/// Trait for text embedding implementations.
///
/// All implementations must be `Send + Sync` to allow concurrent use
/// behind `Arc`.
pub trait Embedder: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;

    /// Embed multiple text strings into vectors.
    ///
    /// The result at index `i` belongs to `texts[i]`.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError>;

    /// Return the dimensionality of the embedding vectors.
    fn dimensions(&self) -> usize;
}

/// L2-normalize a vector in place. Zero vectors are left untouched.
pub(crate) fn l2_normalize(vec: &mut [f32]) {
    let norm_sq: f32 = vec.iter().map(|v| v * v).sum();
    if norm_sq == 0.0 {
        return;
    }

    let inv_norm = 1.0 / norm_sq.sqrt();
    for v in vec.iter_mut() {
        *v *= inv_norm;
    }
}

/// Build the embedder described by `model`.
///
/// A missing model is an error. Mock vectors are only produced when
/// `model.mock` is set, since anything stored with them is never re-embedded.
pub fn from_config(model: &ModelConfig) -> Result<Arc<dyn Embedder>, EmbedderError> {
    if model.mock {
        warn!(
            "Using mock embeddings ({} dimensions); results are not semantic",
            model.dimensions
        );
        return Ok(Arc::new(MockEmbedder::new(model.dimensions)));
    }

    info!("Loading {} from {}", model.name, model.dir.display());
    let embedder = OnnxEmbedder::new(&model.dir, model.dimensions, model.max_length)?
        .with_token_type_ids(model.token_type_ids);
    Ok(Arc::new(embedder))
}
