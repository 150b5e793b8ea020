use super::{Db, IndexError, models::*, serialize_vector};
use rusqlite::{OptionalExtension, params};
use std::collections::HashSet;
use tracing::debug;

impl Db {
    /// Insert records whose ids are not yet present.
    ///
    /// The whole batch is validated first: equal lengths, flat metadata and
    /// embeddings of the collection dimension. An invalid batch writes
    /// nothing. Ids that already exist, or that repeat earlier in the same
    /// batch, are skipped without error, which makes the call safe to retry.
    /// Returns the number of records inserted.
    pub fn upsert<S: AsRef<str>, D: AsRef<str>>(
        &mut self,
        ids: &[S],
        embeddings: &[Vec<f32>],
        metadatas: &[Metadata],
        documents: &[D],
    ) -> Result<usize, IndexError> {
        validate_batch(self.dimensions(), ids, embeddings, metadatas, documents)?;

        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            // Read-then-filter: only safe with a single writer per collection
            let mut exists = tx.prepare("SELECT 1 FROM records WHERE id = ?")?;
            let mut insert_record =
                tx.prepare("INSERT INTO records (id, document, metadata) VALUES (?, ?, ?)")?;
            let mut insert_vector =
                tx.prepare("INSERT INTO vec_records (rowid, embedding) VALUES (?, ?)")?;

            let mut seen = HashSet::new();
            for (i, id) in ids.iter().enumerate() {
                let id = id.as_ref();
                if !seen.insert(id) || exists.exists(params![id])? {
                    debug!("skipping existing record {id}");
                    continue;
                }

                let metadata_json = serde_json::to_string(&metadatas[i])?;
                let pk = insert_record.insert(params![id, documents[i].as_ref(), metadata_json])?;
                insert_vector.execute(params![pk, serialize_vector(&embeddings[i])])?;
                inserted += 1;
            }
        }
        tx.commit()?;

        Ok(inserted)
    }

    /// Subset of `ids` already stored in the collection.
    pub fn existing_ids<S: AsRef<str>>(&self, ids: &[S]) -> Result<HashSet<String>, IndexError> {
        let mut stmt = self.conn.prepare("SELECT 1 FROM records WHERE id = ?")?;
        let mut found = HashSet::new();
        for id in ids {
            if stmt.exists(params![id.as_ref()])? {
                found.insert(id.as_ref().to_string());
            }
        }
        Ok(found)
    }

    pub fn contains(&self, id: &str) -> Result<bool, IndexError> {
        Ok(self
            .conn
            .prepare("SELECT 1 FROM records WHERE id = ?")?
            .exists(params![id])?)
    }

    /// Number of records in the collection.
    pub fn count(&self) -> Result<usize, IndexError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Fetch a single record, embedding included.
    pub fn get(&self, id: &str) -> Result<Option<IndexRecord>, IndexError> {
        let row: Option<(String, String, Vec<u8>)> = self
            .conn
            .query_row(
                r#"
                SELECT r.document, r.metadata, v.embedding
                FROM records r
                JOIN vec_records v ON v.rowid = r.pk
                WHERE r.id = ?
                "#,
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((document, metadata, blob)) = row else {
            return Ok(None);
        };

        Ok(Some(IndexRecord {
            id: id.to_string(),
            embedding: deserialize_vector(&blob),
            metadata: serde_json::from_str(&metadata)?,
            document,
        }))
    }
}

/// Reject a batch before any write happens.
fn validate_batch<S: AsRef<str>, D: AsRef<str>>(
    dimensions: usize,
    ids: &[S],
    embeddings: &[Vec<f32>],
    metadatas: &[Metadata],
    documents: &[D],
) -> Result<(), IndexError> {
    let n = ids.len();
    if embeddings.len() != n || metadatas.len() != n || documents.len() != n {
        return Err(IndexError::validation(format!(
            "input lengths must match: {} ids, {} embeddings, {} metadatas, {} documents",
            n,
            embeddings.len(),
            metadatas.len(),
            documents.len()
        )));
    }

    for (i, id) in ids.iter().enumerate() {
        if id.as_ref().is_empty() {
            return Err(IndexError::validation(format!("id at index {i} is empty")));
        }
    }

    for (i, embedding) in embeddings.iter().enumerate() {
        if embedding.len() != dimensions {
            return Err(IndexError::validation(format!(
                "embedding at index {i} has dimension {}, expected {dimensions}",
                embedding.len()
            )));
        }
        if embedding.iter().any(|v| !v.is_finite()) {
            return Err(IndexError::validation(format!(
                "embedding at index {i} contains a non-finite value"
            )));
        }
    }

    for (i, metadata) in metadatas.iter().enumerate() {
        if let Some((key, _)) = metadata.iter().find(|(_, v)| is_nested(v)) {
            return Err(IndexError::validation(format!(
                "metadata at index {i} is not flat: key '{key}' holds a nested value"
            )));
        }
    }

    Ok(())
}

fn is_nested(value: &serde_json::Value) -> bool {
    value.is_array() || value.is_object()
}

pub(crate) fn deserialize_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}
