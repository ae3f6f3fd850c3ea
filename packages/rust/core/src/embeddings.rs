//! Embedding backfill for the vector side of entity alignment.

use serde::Serialize;
use tracing::{info, instrument};

use medgraph_llm::Embedder;
use medgraph_shared::{MedGraphError, Result};
use medgraph_storage::Storage;

/// Outcome of a backfill run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BackfillReport {
    pub model: String,
    pub embedded: usize,
    pub batches: usize,
}

/// Progress callback for embedding backfill.
pub trait BackfillProgress: Send + Sync {
    /// Called after each stored batch with the running total.
    fn batch_done(&self, embedded: usize, pending: u64);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentBackfill;

impl BackfillProgress for SilentBackfill {
    fn batch_done(&self, _embedded: usize, _pending: u64) {}
}

/// Embed every node that has no vector for the embedder's model yet.
#[instrument(skip_all, fields(model = %embedder.model(), batch_size = batch_size))]
pub async fn backfill_embeddings(
    storage: &Storage,
    embedder: &dyn Embedder,
    batch_size: usize,
    progress: &dyn BackfillProgress,
) -> Result<BackfillReport> {
    if batch_size == 0 {
        return Err(MedGraphError::config("embedding batch_size must be > 0"));
    }
    let model = embedder.model().to_string();
    let mut report = BackfillReport {
        model: model.clone(),
        ..BackfillReport::default()
    };

    loop {
        let pending = storage.nodes_missing_embedding(&model, batch_size).await?;
        if pending.is_empty() {
            break;
        }

        let texts: Vec<String> = pending.iter().map(|p| p.text.clone()).collect();
        let vectors = embedder.embed(&texts).await?;
        if vectors.len() != pending.len() {
            return Err(MedGraphError::Network(format!(
                "embedder returned {} vectors for {} texts",
                vectors.len(),
                pending.len()
            )));
        }

        for (node, vector) in pending.iter().zip(&vectors) {
            storage
                .upsert_embedding(node.label, &node.id, &model, vector)
                .await?;
        }

        report.embedded += pending.len();
        report.batches += 1;
        let remaining = storage
            .count_nodes(None)
            .await?
            .saturating_sub(storage.count_embeddings(&model).await?);
        progress.batch_done(report.embedded, remaining);
    }

    info!(embedded = report.embedded, batches = report.batches, "embedding backfill complete");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeEmbedder, seeded_storage};
    use medgraph_shared::Label;

    #[tokio::test]
    async fn backfill_embeds_every_node_once() {
        let storage = seeded_storage().await;
        let embedder = FakeEmbedder::new().with("感冒", vec![1.0, 0.0]);
        let nodes = storage.count_nodes(None).await.unwrap() as usize;

        let report = backfill_embeddings(&storage, &embedder, 2, &SilentBackfill)
            .await
            .unwrap();
        assert_eq!(report.embedded, nodes);
        assert_eq!(report.batches, nodes.div_ceil(2));

        let stored = storage
            .label_embeddings(Label::Disease, embedder.model())
            .await
            .unwrap();
        let flu = stored.iter().find(|n| n.text == "感冒").expect("embedded");
        assert_eq!(flu.vector, vec![1.0, 0.0]);

        // Second run has nothing left to do
        let again = backfill_embeddings(&storage, &embedder, 2, &SilentBackfill)
            .await
            .unwrap();
        assert_eq!(again.embedded, 0);
    }

    #[tokio::test]
    async fn zero_batch_size_is_rejected() {
        let storage = seeded_storage().await;
        let embedder = FakeEmbedder::new();
        assert!(
            backfill_embeddings(&storage, &embedder, 0, &SilentBackfill)
                .await
                .is_err()
        );
    }
}
