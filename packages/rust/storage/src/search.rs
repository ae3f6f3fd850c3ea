//! Candidate lookup for entity alignment and node embedding storage.

use libsql::params;
use medgraph_shared::{Label, MedGraphError, NodeId, Result};

use crate::{Storage, db_err};

/// Upper bound on trigrams OR'ed into one FTS query.
const MAX_TRIGRAMS: usize = 32;

/// A node offered to the aligner, with its text attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub id: NodeId,
    pub text: String,
}

/// A node together with its stored embedding.
#[derive(Debug, Clone)]
pub struct EmbeddedNode {
    pub id: NodeId,
    pub text: String,
    pub vector: Vec<f32>,
}

/// A node that has no embedding for a given model yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEmbedding {
    pub label: Label,
    pub id: NodeId,
    pub text: String,
}

impl Storage {
    /// Nodes of `label` whose text lexically overlaps `mention`.
    ///
    /// Collects containment matches in either direction, then trigram FTS
    /// matches, deduplicated in that order. At most `limit` of each kind.
    pub async fn keyword_candidates(
        &self,
        label: Label,
        mention: &str,
        limit: usize,
    ) -> Result<Vec<Candidate>> {
        let mention = mention.trim();
        if mention.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let limit = limit as i64;

        let mut results: Vec<Candidate> = Vec::new();
        let mut rows = self
            .conn
            .query(
                "SELECT id, COALESCE(name, description) AS text FROM nodes
                 WHERE label = ?1
                   AND COALESCE(name, description, '') <> ''
                   AND (instr(COALESCE(name, description), ?2) > 0
                        OR instr(?2, COALESCE(name, description)) > 0)
                 ORDER BY length(COALESCE(name, description)), id
                 LIMIT ?3",
                params![label.as_str(), mention, limit],
            )
            .await
            .map_err(db_err)?;
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(Candidate {
                id: NodeId(row.get::<String>(0).map_err(db_err)?),
                text: row.get::<String>(1).map_err(db_err)?,
            });
        }

        if let Some(fts_query) = trigram_query(mention) {
            let mut rows = self
                .conn
                .query(
                    "SELECT n.id, COALESCE(n.name, n.description) FROM nodes_fts f
                     JOIN nodes n ON n.rowid = f.rowid
                     WHERE nodes_fts MATCH ?1 AND f.label = ?2
                     ORDER BY bm25(nodes_fts), n.id
                     LIMIT ?3",
                    params![fts_query.as_str(), label.as_str(), limit],
                )
                .await
                .map_err(db_err)?;
            while let Some(row) = rows.next().await.map_err(db_err)? {
                let id = NodeId(row.get::<String>(0).map_err(db_err)?);
                if results.iter().any(|c| c.id == id) {
                    continue;
                }
                results.push(Candidate {
                    id,
                    text: row.get::<String>(1).map_err(db_err)?,
                });
            }
        }

        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Embeddings
    // -----------------------------------------------------------------------

    /// Store the embedding of a node for one model, replacing any previous one.
    pub async fn upsert_embedding(
        &self,
        label: Label,
        id: &NodeId,
        model: &str,
        vector: &[f32],
    ) -> Result<()> {
        self.check_writable()?;
        if vector.is_empty() {
            return Err(MedGraphError::validation(format!(
                "empty embedding for {label} {id}"
            )));
        }
        self.conn
            .execute(
                "INSERT INTO node_embeddings (label, id, model, dim, vector)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(label, id, model) DO UPDATE SET
                   dim = excluded.dim,
                   vector = excluded.vector",
                params![
                    label.as_str(),
                    id.as_str(),
                    model,
                    vector.len() as i64,
                    encode_vector(vector),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// All nodes of `label` that have an embedding for `model`.
    pub async fn label_embeddings(&self, label: Label, model: &str) -> Result<Vec<EmbeddedNode>> {
        let mut rows = self
            .conn
            .query(
                "SELECT n.id, COALESCE(n.name, n.description, ''), e.vector
                 FROM node_embeddings e
                 JOIN nodes n ON n.label = e.label AND n.id = e.id
                 WHERE e.label = ?1 AND e.model = ?2
                 ORDER BY n.id",
                params![label.as_str(), model],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let blob = row.get::<Vec<u8>>(2).map_err(db_err)?;
            results.push(EmbeddedNode {
                id: NodeId(row.get::<String>(0).map_err(db_err)?),
                text: row.get::<String>(1).map_err(db_err)?,
                vector: decode_vector(&blob)?,
            });
        }
        Ok(results)
    }

    /// Nodes with non-empty text and no embedding for `model`, up to `limit`.
    pub async fn nodes_missing_embedding(
        &self,
        model: &str,
        limit: usize,
    ) -> Result<Vec<PendingEmbedding>> {
        let mut rows = self
            .conn
            .query(
                "SELECT n.label, n.id, COALESCE(n.name, n.description) FROM nodes n
                 WHERE COALESCE(n.name, n.description, '') <> ''
                   AND NOT EXISTS (
                     SELECT 1 FROM node_embeddings e
                     WHERE e.label = n.label AND e.id = n.id AND e.model = ?1
                   )
                 ORDER BY n.label, n.id
                 LIMIT ?2",
                params![model, limit as i64],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let label: String = row.get(0).map_err(db_err)?;
            results.push(PendingEmbedding {
                label: label.parse()?,
                id: NodeId(row.get::<String>(1).map_err(db_err)?),
                text: row.get::<String>(2).map_err(db_err)?,
            });
        }
        Ok(results)
    }

    /// Number of stored embeddings for `model`.
    pub async fn count_embeddings(&self, model: &str) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM node_embeddings WHERE model = ?1",
                params![model],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).map_err(db_err)?.max(0) as u64),
            Ok(None) => Ok(0),
            Err(e) => Err(db_err(e)),
        }
    }
}

/// Build an FTS5 query OR-ing the quoted trigrams of `text`.
///
/// Returns `None` below three characters, where the trigram tokenizer
/// cannot match anything.
fn trigram_query(text: &str) -> Option<String> {
    let chars: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
    if chars.len() < 3 {
        return None;
    }
    let mut grams: Vec<String> = Vec::new();
    for window in chars.windows(3) {
        let gram: String = window.iter().collect();
        let quoted = format!("\"{}\"", gram.replace('"', "\"\""));
        if !grams.contains(&quoted) {
            grams.push(quoted);
        }
        if grams.len() == MAX_TRIGRAMS {
            break;
        }
    }
    Some(grams.join(" OR "))
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(MedGraphError::Storage(format!(
            "corrupt embedding blob of {} bytes",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{disease, test_storage};
    use medgraph_shared::GraphNode;

    async fn seed_departments(storage: &Storage) {
        for (id, name) in [
            ("department_1", "挂号预约"),
            ("department_2", "内科"),
            ("department_3", "呼吸内科"),
        ] {
            let node = GraphNode::named(Label::Department, NodeId::from(id), name).unwrap();
            storage.upsert_node(&node).await.unwrap();
        }
    }

    #[test]
    fn trigram_query_quotes_and_dedupes() {
        assert_eq!(trigram_query("ab"), None);
        assert_eq!(trigram_query("流行感冒").unwrap(), r#""流行感" OR "行感冒""#);
        assert_eq!(trigram_query("aaaa").unwrap(), r#""aaa""#);
        assert_eq!(trigram_query(r#"a"bc"#).unwrap(), r#""a""b" OR """bc""#);
    }

    #[tokio::test]
    async fn row_errors_mid_scan_are_reported() {
        let storage = test_storage().await;
        storage
            .upsert_disease(&disease("disease_1", "感冒", ""))
            .await
            .unwrap();
        // Vector column fails to evaluate once the scan starts stepping rows
        storage
            .conn
            .execute_batch(
                "DROP TABLE node_embeddings;
                 CREATE VIEW node_embeddings AS
                   SELECT label, id, 'm' AS model, 2 AS dim,
                          json(CASE WHEN id <> '' THEN '{' END) AS vector
                   FROM nodes;",
            )
            .await
            .unwrap();

        assert!(storage.label_embeddings(Label::Disease, "m").await.is_err());
    }

    #[test]
    fn vector_blob_round_trips() {
        let v = vec![0.5_f32, -1.25, 3.0];
        assert_eq!(decode_vector(&encode_vector(&v)).unwrap(), v);
        assert!(decode_vector(&[1, 2, 3]).is_err());
    }

    #[tokio::test]
    async fn containment_matches_both_directions() {
        let storage = test_storage().await;
        seed_departments(&storage).await;

        // node text inside mention
        let found = storage
            .keyword_candidates(Label::Department, "我想看内科", 10)
            .await
            .unwrap();
        assert_eq!(found[0].text, "内科");

        // mention inside node text
        let found = storage
            .keyword_candidates(Label::Department, "挂号", 10)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, NodeId::from("department_1"));
    }

    #[tokio::test]
    async fn fts_finds_partial_overlap() {
        let storage = test_storage().await;
        storage
            .upsert_disease(&disease("disease_1", "流行性感冒", ""))
            .await
            .unwrap();
        storage
            .upsert_disease(&disease("disease_2", "肺炎", ""))
            .await
            .unwrap();

        let found = storage
            .keyword_candidates(Label::Disease, "流行性感冒病毒", 10)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, NodeId::from("disease_1"));

        let found = storage
            .keyword_candidates(Label::Disease, "性感冒了", 10)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].text, "流行性感冒");
    }

    #[tokio::test]
    async fn candidates_are_scoped_to_label() {
        let storage = test_storage().await;
        seed_departments(&storage).await;
        let found = storage
            .keyword_candidates(Label::Symptom, "内科", 10)
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn embeddings_round_trip_and_backfill_queue() {
        let storage = test_storage().await;
        seed_departments(&storage).await;
        assert_eq!(
            storage
                .nodes_missing_embedding("test-model", 10)
                .await
                .unwrap()
                .len(),
            3
        );

        storage
            .upsert_embedding(
                Label::Department,
                &NodeId::from("department_2"),
                "test-model",
                &[0.6, 0.8],
            )
            .await
            .unwrap();

        let stored = storage
            .label_embeddings(Label::Department, "test-model")
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].text, "内科");
        assert_eq!(stored[0].vector, vec![0.6, 0.8]);

        let pending = storage
            .nodes_missing_embedding("test-model", 10)
            .await
            .unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|p| p.id.as_str() != "department_2"));
        assert_eq!(storage.count_embeddings("test-model").await.unwrap(), 1);
        assert_eq!(storage.count_embeddings("other-model").await.unwrap(), 0);
    }
}
