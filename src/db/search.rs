use super::{Db, IndexError, models::*, serialize_vector};
use rusqlite::params;

impl Db {
    /// Return the `top_k` records nearest to `query_vector`.
    ///
    /// Results are ordered by ascending distance under the collection's
    /// metric. Asking for more results than there are records is not an
    /// error; the result is simply shorter.
    pub fn query(&self, query_vector: &[f32], top_k: usize) -> Result<QueryResult, IndexError> {
        if query_vector.len() != self.dimensions() {
            return Err(IndexError::validation(format!(
                "query has dimension {}, collection expects {}",
                query_vector.len(),
                self.dimensions()
            )));
        }
        if top_k == 0 {
            return Ok(QueryResult::default());
        }

        let sql = format!(
            r#"
            SELECT
                r.id,
                r.document,
                r.metadata,
                {}(v.embedding, ?) AS distance
            FROM vec_records v
            JOIN records r ON v.rowid = r.pk
            ORDER BY distance ASC
            LIMIT ?
            "#,
            self.metric().sql_function()
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![serialize_vector(query_vector), top_k as i64],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                ))
            },
        )?;

        let mut result = QueryResult::default();
        for row in rows {
            let (id, document, metadata, distance) = row?;
            result.ids.push(id);
            result.documents.push(document);
            result.metadatas.push(serde_json::from_str(&metadata)?);
            result.distances.push(distance);
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(file: &str) -> Metadata {
        let mut m = Metadata::new();
        m.insert("file".to_string(), json!(file));
        m
    }

    fn seeded(metric: DistanceMetric) -> Db {
        let mut db = Db::open_in_memory("search_chunks", 3, metric).unwrap();
        db.upsert(
            &["near", "far"],
            &[vec![1.0, 0.1, 0.0], vec![0.0, 0.0, 1.0]],
            &[meta("near.cpp"), meta("far.cpp")],
            &["int near();", "int far();"],
        )
        .unwrap();
        db
    }

    #[test]
    fn test_query_ranks_by_distance() {
        let db = seeded(DistanceMetric::Cosine);
        let result = db.query(&[1.0, 0.0, 0.0], 2).unwrap();

        assert_eq!(result.ids, vec!["near", "far"]);
        assert_eq!(result.documents[0], "int near();");
        assert_eq!(result.metadatas[0]["file"], json!("near.cpp"));
        assert!(result.distances[0] < result.distances[1]);
    }

    #[test]
    fn test_query_top_k_clamped() {
        let db = seeded(DistanceMetric::Cosine);
        let result = db.query(&[0.3, 0.3, 0.3], 5).unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result.documents.len(), 2);
        assert_eq!(result.metadatas.len(), 2);
        assert_eq!(result.distances.len(), 2);
    }

    #[test]
    fn test_query_top_k_limits() {
        let db = seeded(DistanceMetric::L2);
        let result = db.query(&[0.0, 0.0, 1.0], 1).unwrap();
        assert_eq!(result.ids, vec!["far"]);
        assert!(result.distances[0].abs() < 1e-6);
    }

    #[test]
    fn test_query_zero_top_k_and_empty_store() {
        let db = seeded(DistanceMetric::Cosine);
        assert!(db.query(&[1.0, 0.0, 0.0], 0).unwrap().is_empty());

        let empty = Db::open_in_memory("empty", 3, DistanceMetric::Cosine).unwrap();
        assert!(empty.query(&[1.0, 0.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_query_dimension_mismatch() {
        let db = seeded(DistanceMetric::Cosine);
        let result = db.query(&[1.0, 0.0], 1);
        assert!(matches!(result, Err(IndexError::Validation(_))));
    }

    #[test]
    fn test_context_joins_documents() {
        let db = seeded(DistanceMetric::Cosine);
        let result = db.query(&[1.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(result.context(), "int near();\n\nint far();");
    }
}
