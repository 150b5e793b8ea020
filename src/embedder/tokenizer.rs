/// Tokenizer wrapper around HuggingFace `tokenizers` crate.
///
/// Produces input ids and attention masks for the ONNX embedder. Truncation
/// to the model window is configured up front so over-length source code is
/// silently cut instead of rejected.
use std::path::Path;

use anyhow::Result;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

/// Wrapper around a HuggingFace tokenizer with fixed truncation width.
pub struct ModelTokenizer {
    inner: Tokenizer,
    max_length: usize,
}

/// Output of a tokenization operation.
#[derive(Debug, Clone)]
pub struct TokenizerOutput {
    /// Token IDs (input_ids for the model).
    pub input_ids: Vec<i64>,
    /// Attention mask (1 for real tokens, 0 for padding).
    pub attention_mask: Vec<i64>,
}

impl ModelTokenizer {
    /// Load a tokenizer from a `tokenizer.json` file in the model directory.
    pub fn from_model_dir(model_dir: &Path, max_length: usize) -> Result<Self> {
        let tokenizer_path = model_dir.join("tokenizer.json");

        anyhow::ensure!(
            tokenizer_path.exists(),
            "tokenizer.json not found in {}",
            model_dir.display()
        );
        anyhow::ensure!(max_length > 0, "max_length must be positive");

        let mut inner = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("failed to load tokenizer: {e}"))?;

        inner
            .with_truncation(Some(TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("failed to configure truncation: {e}"))?;

        // Pad every batch to its longest member
        inner.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..Default::default()
        }));

        Ok(Self { inner, max_length })
    }

    /// Tokenize a single text, returning input IDs and attention mask.
    pub fn tokenize(&self, text: &str) -> Result<TokenizerOutput> {
        let encoding = self
            .inner
            .encode(text, true)
            .map_err(|e| anyhow::anyhow!("failed to encode text: {e}"))?;

        Ok(TokenizerOutput {
            input_ids: encoding.get_ids().iter().map(|&id| i64::from(id)).collect(),
            attention_mask: encoding
                .get_attention_mask()
                .iter()
                .map(|&m| i64::from(m))
                .collect(),
        })
    }

    /// Tokenize multiple texts in a batch. All outputs share one length.
    pub fn tokenize_batch(&self, texts: &[&str]) -> Result<Vec<TokenizerOutput>> {
        let encodings = self
            .inner
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("failed to encode batch: {e}"))?;

        let results = encodings
            .iter()
            .map(|enc| TokenizerOutput {
                input_ids: enc.get_ids().iter().map(|&id| i64::from(id)).collect(),
                attention_mask: enc
                    .get_attention_mask()
                    .iter()
                    .map(|&m| i64::from(m))
                    .collect(),
            })
            .collect();

        Ok(results)
    }

    /// Get the vocabulary size.
    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(false)
    }

    /// Get the configured maximum sequence length.
    #[must_use]
    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Requires a downloaded model directory.
    /// Run with: cargo test tokenizer -- --ignored
    #[test]
    #[ignore]
    fn test_tokenize_batch_pads_to_common_length() {
        let model_dir = Path::new("resources/models/codet5p-110m-embedding");
        if !model_dir.join("tokenizer.json").exists() {
            eprintln!("Skipping: model files not downloaded");
            return;
        }

        let tokenizer = ModelTokenizer::from_model_dir(model_dir, 512).unwrap();
        let outputs = tokenizer
            .tokenize_batch(&["int a;", "void hello() { return; }"])
            .unwrap();

        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].input_ids.len(), outputs[1].input_ids.len());
    }

    #[test]
    #[ignore]
    fn test_tokenize_truncates() {
        let model_dir = Path::new("resources/models/codet5p-110m-embedding");
        if !model_dir.join("tokenizer.json").exists() {
            return;
        }

        let tokenizer = ModelTokenizer::from_model_dir(model_dir, 16).unwrap();
        let long = "int x = 1; ".repeat(500);
        let output = tokenizer.tokenize(&long).unwrap();
        assert!(output.input_ids.len() <= 16);
    }

    #[test]
    fn test_tokenizer_missing_file() {
        let result = ModelTokenizer::from_model_dir(Path::new("/nonexistent/path"), 512);
        assert!(result.is_err());
    }
}
