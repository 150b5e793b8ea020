//! Vector index backed by SQLite and sqlite-vec.
//!
//! One database file holds one collection. Records are keyed by a string id
//! and never updated in place; see [`Db::upsert`].
use rusqlite::{Connection, OptionalExtension, params};
use sqlite_vec::sqlite3_vec_init;
use std::path::{Path, PathBuf};
use std::sync::Once;
use thiserror::Error;
use tracing::info;

pub mod models;
pub mod records;
pub mod search;

pub use models::{DistanceMetric, IndexRecord, Metadata, QueryResult};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS collection_info (
    name TEXT PRIMARY KEY,
    dimensions INTEGER NOT NULL,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS records (
    pk INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    document TEXT NOT NULL,
    metadata TEXT NOT NULL,
    indexed_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_records_id ON records(id);
"#;

/// Errors raised by the vector index.
#[derive(Error, Debug)]
pub enum IndexError {
    /// The batch or query was rejected before touching storage.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("metadata serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IndexError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

static INIT_VEC: Once = Once::new();

/// Initialize the sqlite-vec extension. Safe to call multiple times.
fn init_sqlite_vec() {
    INIT_VEC.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// A single persistent collection of embedded records.
pub struct Db {
    pub(crate) conn: Connection,
    collection: String,
    dimensions: usize,
    metric: DistanceMetric,
}

impl Db {
    /// Open (or create) the collection stored under `dir`.
    ///
    /// The collection's dimension is fixed on first open; reopening with a
    /// different dimension is rejected.
    pub fn open<P: AsRef<Path>>(
        dir: P,
        collection: &str,
        dimensions: usize,
        metric: DistanceMetric,
    ) -> Result<Self, IndexError> {
        let dir = dir.as_ref();
        validate_collection_name(collection)?;
        std::fs::create_dir_all(dir)?;

        let path = Self::database_path(dir, collection);
        info!("Initializing vector index: {}", path.display());

        init_sqlite_vec();
        let conn = Connection::open(&path)?;
        Self::init(conn, collection, dimensions, metric)
    }

    /// Open an in-memory collection (useful for testing).
    pub fn open_in_memory(
        collection: &str,
        dimensions: usize,
        metric: DistanceMetric,
    ) -> Result<Self, IndexError> {
        validate_collection_name(collection)?;
        init_sqlite_vec();
        let conn = Connection::open_in_memory()?;
        Self::init(conn, collection, dimensions, metric)
    }

    /// Location of the database file for `collection` inside `dir`.
    #[must_use]
    pub fn database_path(dir: &Path, collection: &str) -> PathBuf {
        dir.join(format!("{collection}.db"))
    }

    fn init(
        conn: Connection,
        collection: &str,
        dimensions: usize,
        metric: DistanceMetric,
    ) -> Result<Self, IndexError> {
        if dimensions == 0 {
            return Err(IndexError::validation("dimensions must be positive"));
        }

        let vec_version: String = conn.query_row("SELECT vec_version()", [], |row| row.get(0))?;
        info!("sqlite-vec version: {}", vec_version);

        conn.execute_batch(SCHEMA_SQL)?;

        let stored: Option<(String, i64)> = conn
            .query_row(
                "SELECT name, dimensions FROM collection_info LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match stored {
            Some((name, stored_dims)) => {
                if name != collection {
                    return Err(IndexError::validation(format!(
                        "database holds collection '{name}', not '{collection}'"
                    )));
                }
                if stored_dims as usize != dimensions {
                    return Err(IndexError::validation(format!(
                        "collection '{collection}' has dimension {stored_dims}, requested {dimensions}"
                    )));
                }
            }
            None => {
                conn.execute(
                    "INSERT INTO collection_info (name, dimensions) VALUES (?, ?)",
                    params![collection, dimensions as i64],
                )?;
            }
        }

        // Dimension is a usize, so formatting it into DDL is safe
        conn.execute_batch(&format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS vec_records USING vec0(embedding FLOAT[{dimensions}]);"
        ))?;

        info!("Collection '{collection}' ready (dimension {dimensions}, metric {metric})");

        Ok(Self {
            conn,
            collection: collection.to_string(),
            dimensions,
            metric,
        })
    }

    /// Name of the collection held by this database.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Embedding dimension shared by every record.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Distance metric used by [`Db::query`].
    #[must_use]
    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }
}

fn validate_collection_name(name: &str) -> Result<(), IndexError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(IndexError::validation(format!(
            "invalid collection name '{name}'"
        )))
    }
}

/// Helper to serialize a float32 vector into bytes for vec0 virtual table
pub fn serialize_vector(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}
