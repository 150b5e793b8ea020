//! Record ids for extracted chunks.
use super::extractor::Chunk;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

/// How a chunk's record id is derived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdStrategy {
    /// Hash of file, span and code; survives files being added or removed.
    #[default]
    Content,
    /// Position of the chunk in the intermediate log. Any change earlier in
    /// the stream shifts every later id.
    Ordinal,
}

impl IdStrategy {
    pub fn chunk_id(self, codebase: &str, ordinal: usize, chunk: &Chunk) -> String {
        match self {
            Self::Content => content_id(codebase, chunk),
            Self::Ordinal => ordinal_id(codebase, ordinal),
        }
    }
}

/// `{codebase}_{32 hex digits}` from SHA-256 over `(file, start, end, code)`.
pub fn content_id(codebase: &str, chunk: &Chunk) -> String {
    let mut hasher = Sha256::new();
    hasher.update(chunk.file.as_bytes());
    hasher.update([0u8]);
    hasher.update(chunk.start_line.to_string().as_bytes());
    hasher.update([0u8]);
    hasher.update(chunk.end_line.to_string().as_bytes());
    hasher.update([0u8]);
    hasher.update(chunk.code.as_bytes());
    let digest = hasher.finalize();

    let mut id = String::with_capacity(codebase.len() + 33);
    id.push_str(codebase);
    id.push('_');
    for byte in &digest[..16] {
        let _ = write!(id, "{byte:02x}");
    }
    id
}

pub fn ordinal_id(codebase: &str, ordinal: usize) -> String {
    format!("{codebase}_{ordinal}")
}
