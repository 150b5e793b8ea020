//! Source extraction and the two-phase indexing pipeline.
pub mod chunk_id;
pub mod chunk_log;
pub mod extractor;
pub mod languages;
pub mod pipeline;

pub use chunk_id::IdStrategy;
pub use extractor::{Chunk, ExtractError, ExtractStats, Extractor};
pub use pipeline::{Pipeline, PipelineError, RunReport, extract_codebase};
