use crate::config::{CodebaseConfig, Config};
use crate::db::{Db, IndexError, Metadata, QueryResult};
use crate::embedder::{Embedder, EmbedderError};
use crate::indexer::chunk_log::{ChunkLogReader, ChunkLogWriter, LogError};
use crate::indexer::extractor::{Chunk, ExtractError, ExtractStats, Extractor};
use serde_json::json;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex as TokioMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const FILE_PROGRESS_EVERY: usize = 100;
const BATCH_PROGRESS_EVERY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Extract,
    Embed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Extract => f.write_str("extract"),
            Self::Embed => f.write_str("embed"),
        }
    }
}

/// Fatal pipeline failures. Each names the phase and the failing unit.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("unknown codebase: {0}")]
    UnknownCodebase(String),

    #[error("extract phase: {0}")]
    Extractor(#[from] ExtractError),

    #[error("chunk log: {0}")]
    Log(#[from] LogError),

    /// A line of the intermediate log is not a valid chunk record.
    #[error("embed phase, log line {line}: {message}")]
    Schema { line: usize, message: String },

    #[error("embed phase, batch {batch}: {source}")]
    Embedding {
        batch: usize,
        #[source]
        source: EmbedderError,
    },

    #[error("embed phase, batch {batch}: {source}")]
    Index {
        batch: usize,
        #[source]
        source: IndexError,
    },

    #[error("index '{actual}' does not belong to codebase '{codebase}' (expected '{expected}')")]
    CollectionMismatch {
        codebase: String,
        expected: String,
        actual: String,
    },

    #[error("embedder produces {embedder} dimensions but the index expects {index}")]
    DimensionMismatch { embedder: usize, index: usize },

    #[error("query embedding failed: {0}")]
    QueryEmbedding(#[source] EmbedderError),

    #[error("query failed: {0}")]
    Query(#[source] IndexError),

    #[error("{0} phase cancelled")]
    Cancelled(Phase),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractReport {
    pub stats: ExtractStats,
    pub log_path: PathBuf,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StoreReport {
    pub batches: usize,
    pub chunks: usize,
    pub inserted: usize,
    pub skipped_existing: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub extract: ExtractReport,
    pub store: StoreReport,
}

/// Drives extraction, embedding and storage for one codebase at a time.
///
/// The index handle and embedder are created by the caller and shared; the
/// pipeline never owns global state.
pub struct Pipeline {
    config: Arc<Config>,
    db: Arc<TokioMutex<Db>>,
    embedder: Arc<dyn Embedder>,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(
        config: Arc<Config>,
        db: Arc<TokioMutex<Db>>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            config,
            db,
            embedder,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned token, e.g. one cancelled on Ctrl-C.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Extract then embed-and-store.
    pub async fn run(&self, codebase: &str) -> Result<RunReport, PipelineError> {
        let extract = self.extract(codebase).await?;
        let store = self.embed_and_store(codebase).await?;
        Ok(RunReport { extract, store })
    }

    /// Phase A: write every chunk of the codebase to its intermediate log.
    pub async fn extract(&self, codebase: &str) -> Result<ExtractReport, PipelineError> {
        extract_codebase(&self.config, codebase, self.cancel.clone()).await
    }

    /// Phase B: stream the intermediate log into the vector index.
    pub async fn embed_and_store(&self, codebase: &str) -> Result<StoreReport, PipelineError> {
        let cb = self.codebase(codebase)?;
        self.check_index(codebase).await?;

        let log_path = self.config.chunk_log_path(codebase, &cb.language);
        let reader = ChunkLogReader::open(&log_path)?;
        let batch_size = self.config.batch_size.max(1);

        info!(
            "Embedding chunks from {} (batch size {batch_size})",
            log_path.display()
        );

        let mut report = StoreReport::default();
        let mut batch: Vec<(usize, Chunk)> = Vec::with_capacity(batch_size);

        for (ordinal, record) in reader.enumerate() {
            let chunk = record.map_err(|e| match e {
                LogError::Schema { line, message } => PipelineError::Schema { line, message },
                other => PipelineError::Log(other),
            })?;
            batch.push((ordinal, chunk));

            if batch.len() == batch_size {
                let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                self.process_batch(codebase, &cb.language, full, &mut report)
                    .await?;
            }
        }

        if !batch.is_empty() {
            self.process_batch(codebase, &cb.language, batch, &mut report)
                .await?;
        }

        info!(
            "Finished storing chunks for {codebase}: {} chunks in {} batches, {} new, {} already present",
            report.chunks,
            report.batches,
            report.inserted,
            report.skipped_existing
        );
        Ok(report)
    }

    /// Embed `text` and return its nearest stored chunks.
    pub async fn search(&self, text: &str, top_k: usize) -> Result<QueryResult, PipelineError> {
        let embedder = Arc::clone(&self.embedder);
        let text = text.to_string();
        let embedding = tokio::task::spawn_blocking(move || embedder.embed(&text))
            .await?
            .map_err(PipelineError::QueryEmbedding)?;

        let db = self.db.lock().await;
        db.query(&embedding, top_k).map_err(PipelineError::Query)
    }

    async fn process_batch(
        &self,
        codebase: &str,
        language: &str,
        batch: Vec<(usize, Chunk)>,
        report: &mut StoreReport,
    ) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled(Phase::Embed));
        }

        let batch_index = report.batches;
        let total = batch.len();
        let ids: Vec<String> = batch
            .iter()
            .map(|(ordinal, chunk)| self.config.id_strategy.chunk_id(codebase, *ordinal, chunk))
            .collect();

        // Skip embedding work for chunks stored by an earlier run
        let existing = {
            let db = self.db.lock().await;
            db.existing_ids(&ids)
                .map_err(|source| PipelineError::Index {
                    batch: batch_index,
                    source,
                })?
        };

        let (ids, chunks): (Vec<String>, Vec<Chunk>) = ids
            .into_iter()
            .zip(batch.into_iter().map(|(_, chunk)| chunk))
            .filter(|(id, _)| !existing.contains(id))
            .unzip();

        let mut inserted = 0;
        if !chunks.is_empty() {
            let documents: Vec<String> = chunks.iter().map(|c| c.code.clone()).collect();
            let embeddings = self.embed_documents(batch_index, documents.clone()).await?;
            let metadatas: Vec<Metadata> =
                chunks.iter().map(|c| chunk_metadata(c, language)).collect();

            let mut db = self.db.lock().await;
            inserted = db
                .upsert(&ids, &embeddings, &metadatas, &documents)
                .map_err(|source| PipelineError::Index {
                    batch: batch_index,
                    source,
                })?;
        } else {
            debug!("batch {batch_index}: all {total} chunks already stored");
        }

        report.batches += 1;
        report.chunks += total;
        report.inserted += inserted;
        report.skipped_existing += total - inserted;

        if report.batches % BATCH_PROGRESS_EVERY == 0 {
            info!(
                "Processed {} batches ({} chunks)...",
                report.batches, report.chunks
            );
        }
        Ok(())
    }

    /// Run the embedder off the async runtime; results stay index-aligned.
    async fn embed_documents(
        &self,
        batch_index: usize,
        documents: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, PipelineError> {
        let expected = documents.len();
        let embedder = Arc::clone(&self.embedder);
        let embeddings = tokio::task::spawn_blocking(move || {
            let texts: Vec<&str> = documents.iter().map(String::as_str).collect();
            embedder.embed_batch(&texts)
        })
        .await?
        .map_err(|source| PipelineError::Embedding {
            batch: batch_index,
            source,
        })?;

        if embeddings.len() != expected {
            return Err(PipelineError::Embedding {
                batch: batch_index,
                source: EmbedderError::BatchMismatch {
                    expected,
                    actual: embeddings.len(),
                },
            });
        }
        Ok(embeddings)
    }

    fn codebase(&self, name: &str) -> Result<&CodebaseConfig, PipelineError> {
        self.config
            .codebase(name)
            .ok_or_else(|| PipelineError::UnknownCodebase(name.to_string()))
    }

    async fn check_index(&self, codebase: &str) -> Result<(), PipelineError> {
        let db = self.db.lock().await;
        let expected = Config::collection_name(codebase);
        if db.collection() != expected {
            return Err(PipelineError::CollectionMismatch {
                codebase: codebase.to_string(),
                expected,
                actual: db.collection().to_string(),
            });
        }
        if db.dimensions() != self.embedder.dimensions() {
            return Err(PipelineError::DimensionMismatch {
                embedder: self.embedder.dimensions(),
                index: db.dimensions(),
            });
        }
        Ok(())
    }
}

/// Phase A without an index or embedder. Parsing and file I/O run on the
/// blocking pool.
pub async fn extract_codebase(
    config: &Config,
    codebase: &str,
    cancel: CancellationToken,
) -> Result<ExtractReport, PipelineError> {
    let cb = config
        .codebase(codebase)
        .cloned()
        .ok_or_else(|| PipelineError::UnknownCodebase(codebase.to_string()))?;
    let log_path = config.chunk_log_path(codebase, &cb.language);

    tokio::task::spawn_blocking(move || write_chunk_log(&cb, log_path, &cancel)).await?
}

fn write_chunk_log(
    cb: &CodebaseConfig,
    log_path: PathBuf,
    cancel: &CancellationToken,
) -> Result<ExtractReport, PipelineError> {
    let mut extractor = Extractor::new(&cb.language, &cb.path)?;

    info!(
        "Extracting {} functions from {} into {}",
        cb.language,
        cb.path.display(),
        log_path.display()
    );

    let mut writer = ChunkLogWriter::create(&log_path)?;
    let mut stats = ExtractStats::default();

    for path in extractor.source_files() {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled(Phase::Extract));
        }

        for chunk in extractor.extract_counted(&path, &mut stats) {
            writer.write(&chunk)?;
        }

        if stats.files_seen % FILE_PROGRESS_EVERY == 0 {
            info!("Processed {} files...", stats.files_seen);
        }
    }

    let written = writer.finish()?;
    info!(
        "Finished processing {} files ({} skipped) from {}: {} chunks written to {}",
        stats.files_seen,
        stats.files_skipped,
        cb.path.display(),
        written,
        log_path.display()
    );

    Ok(ExtractReport { stats, log_path })
}

/// Flat metadata stored next to each chunk.
pub fn chunk_metadata(chunk: &Chunk, language: &str) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("file".to_string(), json!(chunk.file));
    metadata.insert("start".to_string(), json!(chunk.start_line));
    metadata.insert("end".to_string(), json!(chunk.end_line));
    metadata.insert("language".to_string(), json!(language));
    metadata
}
