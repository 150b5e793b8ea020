/// ONNX Runtime embedder using the `ort` crate.
///
/// Runs batched inference over a code embedding model. Models that already
/// emit pooled embeddings (`[batch, dim]`, e.g. CodeT5+ embedding) are used
/// as-is; models that emit hidden states (`[batch, seq, hidden]`) are mean
/// pooled with the attention mask. Results are L2-normalized.
use std::path::Path;
use std::sync::Mutex;

use ort::session::Session;
use ort::value::Tensor;
use tracing::{debug, info};

use super::tokenizer::{ModelTokenizer, TokenizerOutput};
use super::{Embedder, EmbedderError, l2_normalize};

/// ONNX-backed embedder implementing the `Embedder` trait.
pub struct OnnxEmbedder {
    session: Mutex<Session>,
    tokenizer: ModelTokenizer,
    dimensions: usize,
    use_token_type_ids: bool,
}

impl OnnxEmbedder {
    /// Create a new `OnnxEmbedder` by loading a model from the given directory.
    ///
    /// Expects `model.onnx` and `tokenizer.json` in `model_dir`.
    pub fn new(
        model_dir: &Path,
        dimensions: usize,
        max_length: usize,
    ) -> Result<Self, EmbedderError> {
        let model_path = model_dir.join("model.onnx");

        if !model_path.exists() {
            return Err(EmbedderError::ModelLoadFailed(format!(
                "model.onnx not found in {}",
                model_dir.display()
            )));
        }

        info!("Initializing ONNX Runtime...");

        let session = Session::builder()
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("session builder error: {e}")))?
            .with_intra_threads(4)
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("thread config error: {e}")))?
            .with_inter_threads(4)
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("thread config error: {e}")))?
            .commit_from_file(&model_path)
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("model load error: {e}")))?;

        info!("ONNX model loaded successfully");

        let tokenizer = ModelTokenizer::from_model_dir(model_dir, max_length)
            .map_err(|e| EmbedderError::TokenizerError(e.to_string()))?;

        info!(
            "Tokenizer loaded (vocab size: {}, max length: {})",
            tokenizer.vocab_size(),
            tokenizer.max_length()
        );

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            dimensions,
            use_token_type_ids: false,
        })
    }

    /// Feed an all-zero `token_type_ids` input (BERT-style encoders).
    #[must_use]
    pub fn with_token_type_ids(mut self, enabled: bool) -> Self {
        self.use_token_type_ids = enabled;
        self
    }

    fn run_batch(&self, tokens: &[TokenizerOutput]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let batch = tokens.len();
        let seq_len = tokens.first().map_or(0, |t| t.input_ids.len());
        if tokens.iter().any(|t| t.input_ids.len() != seq_len) {
            return Err(EmbedderError::TokenizerError(
                "batch was not padded to a common length".to_string(),
            ));
        }

        let input_ids: Vec<i64> = tokens
            .iter()
            .flat_map(|t| t.input_ids.iter().copied())
            .collect();
        let attention_mask: Vec<i64> = tokens
            .iter()
            .flat_map(|t| t.attention_mask.iter().copied())
            .collect();

        let input_ids_val = Tensor::from_array(([batch, seq_len], input_ids))
            .map_err(|e| EmbedderError::InferenceFailed(format!("input_ids error: {e}")))?;
        let attention_mask_val = Tensor::from_array(([batch, seq_len], attention_mask.clone()))
            .map_err(|e| EmbedderError::InferenceFailed(format!("attention_mask error: {e}")))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| EmbedderError::InferenceFailed(format!("lock poisoned: {e}")))?;

        let outputs = if self.use_token_type_ids {
            let token_type_ids_val =
                Tensor::from_array(([batch, seq_len], vec![0i64; batch * seq_len])).map_err(
                    |e| EmbedderError::InferenceFailed(format!("token_type_ids error: {e}")),
                )?;
            session.run(ort::inputs![
                "input_ids" => input_ids_val,
                "attention_mask" => attention_mask_val,
                "token_type_ids" => token_type_ids_val,
            ])
        } else {
            session.run(ort::inputs![
                "input_ids" => input_ids_val,
                "attention_mask" => attention_mask_val,
            ])
        }
        .map_err(|e| EmbedderError::InferenceFailed(format!("inference failed: {e}")))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("output extraction: {e}")))?;
        let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
        debug!("ONNX output shape: {dims:?}");

        let mut embeddings = match dims.as_slice() {
            [rows, dim] => {
                self.check_dim(*dim)?;
                data.chunks(*dim)
                    .take(*rows)
                    .map(<[f32]>::to_vec)
                    .collect::<Vec<_>>()
            }
            [rows, seq, hidden] => {
                self.check_dim(*hidden)?;
                let stride = seq * hidden;
                (0..*rows)
                    .map(|r| {
                        mean_pooling(
                            &data[r * stride..(r + 1) * stride],
                            &attention_mask[r * seq_len..(r + 1) * seq_len],
                            *seq,
                            *hidden,
                        )
                    })
                    .collect::<Vec<_>>()
            }
            other => {
                return Err(EmbedderError::InferenceFailed(format!(
                    "unexpected output shape {other:?}"
                )));
            }
        };

        if embeddings.len() != batch {
            return Err(EmbedderError::BatchMismatch {
                expected: batch,
                actual: embeddings.len(),
            });
        }

        for embedding in &mut embeddings {
            l2_normalize(embedding);
        }
        Ok(embeddings)
    }

    fn check_dim(&self, actual: usize) -> Result<(), EmbedderError> {
        if actual == self.dimensions {
            Ok(())
        } else {
            Err(EmbedderError::InferenceFailed(format!(
                "model produced {actual}-dimensional output, expected {}",
                self.dimensions
            )))
        }
    }
}

impl Embedder for OnnxEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let mut batch = self.embed_batch(&[text])?;
        batch.pop().ok_or(EmbedderError::BatchMismatch {
            expected: 1,
            actual: 0,
        })
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let tokens = self
            .tokenizer
            .tokenize_batch(texts)
            .map_err(|e| EmbedderError::TokenizerError(format!("tokenization failed: {e}")))?;

        self.run_batch(&tokens)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Mean pooling over hidden states weighted by attention mask.
///
/// `hidden_data` is one row with shape `[seq_len, hidden_size]`.
fn mean_pooling(
    hidden_data: &[f32],
    attention_mask: &[i64],
    seq_len: usize,
    hidden_size: usize,
) -> Vec<f32> {
    let mut result = vec![0.0f32; hidden_size];
    let mut mask_sum: f32 = 0.0;

    for t in 0..seq_len.min(attention_mask.len()) {
        let mask = attention_mask[t] as f32;
        mask_sum += mask;

        for h in 0..hidden_size {
            result[h] += hidden_data[t * hidden_size + h] * mask;
        }
    }

    if mask_sum > 0.0 {
        for v in &mut result {
            *v /= mask_sum;
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_pooling_simple() {
        let hidden = vec![1.0, 2.0, 3.0];
        let mask = vec![1i64];
        let result = mean_pooling(&hidden, &mask, 1, 3);
        assert_eq!(result, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_mean_pooling_with_padding() {
        // second token is padding
        let hidden = vec![1.0, 2.0, 10.0, 20.0];
        let mask = vec![1i64, 0i64];
        let result = mean_pooling(&hidden, &mask, 2, 2);
        assert_eq!(result, vec![1.0, 2.0]);
    }

    #[test]
    fn test_missing_model_is_load_error() {
        let err = OnnxEmbedder::new(Path::new("/nonexistent/model"), 256, 512)
            .err()
            .expect("loading from a missing directory must fail");
        assert!(matches!(err, EmbedderError::ModelLoadFailed(_)));
    }

    /// Requires downloaded model files.
    #[test]
    #[ignore]
    fn test_onnx_embed_batch_order() {
        let model_dir = Path::new("resources/models/codet5p-110m-embedding");
        if !model_dir.join("model.onnx").exists() {
            eprintln!("Skipping: model files not downloaded");
            return;
        }

        let embedder = OnnxEmbedder::new(model_dir, 256, 512).unwrap();
        let texts = ["int add(int a, int b) { return a + b; }", "void f() {}"];
        let batch = embedder.embed_batch(&texts).unwrap();
        assert_eq!(batch.len(), 2);
        for (text, vector) in texts.iter().zip(&batch) {
            let single = embedder.embed(text).unwrap();
            let dot: f32 = single.iter().zip(vector).map(|(a, b)| a * b).sum();
            assert!(dot > 0.99, "batched and single embeddings should agree");
        }
    }
}
