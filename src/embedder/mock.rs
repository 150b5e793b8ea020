/// Mock embedder for testing purposes.
///
/// Generates deterministic embeddings based on text hash.
use std::hash::{DefaultHasher, Hash, Hasher};

use super::{Embedder, EmbedderError, l2_normalize};

/// Default input width in characters before truncation kicks in.
const DEFAULT_MAX_CHARS: usize = 2048;

/// A mock embedder that produces deterministic vectors from text hashes.
///
/// Useful for testing without loading a real ONNX model. Input longer than
/// `max_chars` is truncated, the way a real model truncates to its token
/// window.
pub struct MockEmbedder {
    pub dimensions: usize,
    pub max_chars: usize,
}

impl MockEmbedder {
    /// Create a new `MockEmbedder` with the given dimensionality.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            max_chars: DEFAULT_MAX_CHARS,
        }
    }

    /// Override the truncation width.
    #[must_use]
    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }

    fn truncate<'t>(&self, text: &'t str) -> &'t str {
        match text.char_indices().nth(self.max_chars) {
            Some((idx, _)) => &text[..idx],
            None => text,
        }
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Embedder for MockEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let text = self.truncate(text);

        let mut embedding = Vec::with_capacity(self.dimensions);
        let mut seed = {
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            hasher.finish()
        };
        // Re-hash every 8 components so the vector is not a repeating pattern
        for i in 0..self.dimensions {
            if i % 8 == 0 && i > 0 {
                let mut hasher = DefaultHasher::new();
                seed.hash(&mut hasher);
                seed = hasher.finish();
            }
            let byte = seed.to_le_bytes()[i % 8];
            embedding.push(f32::from(byte) / 255.0 - 0.5);
        }

        l2_normalize(&mut embedding);
        Ok(embedding)
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_embed_dimensions() {
        let embedder = MockEmbedder::new(384);
        let result = embedder.embed("hello world").unwrap();
        assert_eq!(result.len(), 384);
    }

    #[test]
    fn test_mock_embed_deterministic() {
        let embedder = MockEmbedder::new(64);
        let a = embedder.embed("hello").unwrap();
        let b = embedder.embed("hello").unwrap();
        assert_eq!(a, b, "same input should produce same output");
    }

    #[test]
    fn test_mock_embed_different_inputs() {
        let embedder = MockEmbedder::new(64);
        let a = embedder.embed("hello").unwrap();
        let b = embedder.embed("world").unwrap();
        assert_ne!(a, b, "different inputs should produce different outputs");
    }

    #[test]
    fn test_mock_embed_normalized() {
        let embedder = MockEmbedder::new(128);
        let vec = embedder.embed("test normalization").unwrap();
        let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!(
            (norm - 1.0).abs() < 0.01,
            "vector should be approximately unit length, got {norm}"
        );
    }

    #[test]
    fn test_mock_embed_batch_is_index_aligned() {
        let embedder = MockEmbedder::new(32);
        let texts = ["int a();", "void b() {}", "int a();", "struct C {};"];
        let batch = embedder.embed_batch(&texts).unwrap();
        assert_eq!(batch.len(), texts.len());
        for (text, vector) in texts.iter().zip(&batch) {
            assert_eq!(vector, &embedder.embed(text).unwrap());
        }
    }

    #[test]
    fn test_mock_truncates_long_input() {
        let embedder = MockEmbedder::new(16).with_max_chars(10);
        let long = "x".repeat(10_000);
        let a = embedder.embed(&long).unwrap();
        let b = embedder.embed("xxxxxxxxxx").unwrap();
        assert_eq!(a, b, "input beyond the window should be ignored");
    }

    #[test]
    fn test_mock_default_dimensions() {
        let embedder = MockEmbedder::default();
        assert_eq!(embedder.dimensions(), 256);
    }
}
