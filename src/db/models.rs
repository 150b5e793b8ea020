use serde::{Deserialize, Serialize};
use std::fmt;

/// Flat metadata attached to a record: strings, numbers, booleans or null.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// A stored record as returned by [`crate::db::Db::get`].
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    pub metadata: Metadata,
    pub document: String,
}

/// Ranked matches for one query vector, index-aligned across fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub ids: Vec<String>,
    pub documents: Vec<String>,
    pub metadatas: Vec<Metadata>,
    pub distances: Vec<f64>,
}

impl QueryResult {
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Matched documents joined by blank lines, nearest first.
    #[must_use]
    pub fn context(&self) -> String {
        self.documents.join("\n\n")
    }
}

/// Distance function used to rank query results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    L2,
}

impl DistanceMetric {
    /// sqlite-vec scalar function computing this distance.
    pub(crate) fn sql_function(self) -> &'static str {
        match self {
            Self::Cosine => "vec_distance_cosine",
            Self::L2 => "vec_distance_l2",
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cosine => f.write_str("cosine"),
            Self::L2 => f.write_str("l2"),
        }
    }
}
