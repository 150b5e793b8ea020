//! # codebase-rag: function-level code index
//!
//! Splits a codebase into function chunks with Tree-sitter, embeds each chunk
//! and stores it in a local SQLite + sqlite-vec index for similarity search.
//!
//! ## Architecture
//!
//! - **[`config`]**: Configuration loading and validation
//! - **[`db`]**: Vector index (idempotent upsert, nearest-neighbour query)
//! - **[`embedder`]**: Text embedding via ONNX Runtime, or a deterministic mock
//! - **[`indexer`]**: Function extraction, the JSONL chunk log and the pipeline driver

pub mod config;
pub mod db;
pub mod embedder;
pub mod indexer;
