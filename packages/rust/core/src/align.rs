//! Hybrid entity alignment: raw mentions to canonical node text.
//!
//! Each node found by either side of the search is scored with the larger
//! of its lexical and vector similarity. The best node by score, then by
//! id, supplies the canonical value.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, instrument, warn};

use medgraph_llm::{Embedder, cosine_similarity};
use medgraph_shared::{AlignmentMissPolicy, Label, MedGraphError, NodeId, Result, ServingConfig};
use medgraph_storage::Storage;

use crate::query::EntityMention;

/// A mention bound to the value the query will use.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedEntity {
    pub param_name: String,
    pub label: Label,
    /// The mention as the model wrote it.
    pub raw: String,
    /// Canonical node text, or the raw mention when left unresolved.
    pub value: String,
    /// `None` when the mention was kept unresolved.
    pub node_id: Option<NodeId>,
    pub score: f32,
}

/// A scored search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub id: NodeId,
    pub text: String,
    pub score: f32,
}

/// Resolves mentions against the store, optionally with embeddings.
pub struct EntityAligner {
    storage: Arc<Storage>,
    embedder: Option<Arc<dyn Embedder>>,
    candidate_pool: usize,
    on_miss: AlignmentMissPolicy,
    store_timeout: Duration,
}

impl EntityAligner {
    pub fn new(
        storage: Arc<Storage>,
        embedder: Option<Arc<dyn Embedder>>,
        candidate_pool: usize,
        on_miss: AlignmentMissPolicy,
    ) -> Self {
        Self {
            storage,
            embedder,
            candidate_pool,
            on_miss,
            store_timeout: ServingConfig::default().store_timeout(),
        }
    }

    /// Bound on each search call against the store.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Resolve every mention, returning a new list in input order.
    #[instrument(skip_all, fields(mentions = mentions.len()))]
    pub async fn align(&self, mentions: &[EntityMention]) -> Result<Vec<ResolvedEntity>> {
        let mut resolved = Vec::with_capacity(mentions.len());
        for mention in mentions {
            let entity = match self.best_match(mention.label, &mention.entity).await? {
                Some(hit) => {
                    debug!(
                        raw = %mention.entity,
                        aligned = %hit.text,
                        id = %hit.id,
                        score = hit.score,
                        "entity aligned"
                    );
                    ResolvedEntity {
                        param_name: mention.param_name.clone(),
                        label: mention.label,
                        raw: mention.entity.clone(),
                        value: hit.text,
                        node_id: Some(hit.id),
                        score: hit.score,
                    }
                }
                None => match self.on_miss {
                    AlignmentMissPolicy::Error => {
                        return Err(MedGraphError::Alignment(format!(
                            "no {} matches '{}'",
                            mention.label, mention.entity
                        )));
                    }
                    AlignmentMissPolicy::KeepRaw => {
                        warn!(label = %mention.label, raw = %mention.entity, "no match, keeping raw mention");
                        ResolvedEntity {
                            param_name: mention.param_name.clone(),
                            label: mention.label,
                            raw: mention.entity.clone(),
                            value: mention.entity.clone(),
                            node_id: None,
                            score: 0.0,
                        }
                    }
                },
            };
            resolved.push(entity);
        }
        Ok(resolved)
    }

    /// Top-ranked node of `label` for `mention`, if any node is found.
    pub async fn best_match(&self, label: Label, mention: &str) -> Result<Option<Match>> {
        Ok(self.rank(label, mention).await?.into_iter().next())
    }

    /// All hits of the hybrid search, best first.
    pub async fn rank(&self, label: Label, mention: &str) -> Result<Vec<Match>> {
        let mut merged: HashMap<NodeId, Match> = HashMap::new();

        let candidates = self
            .storage
            .within(
                "align",
                self.store_timeout,
                self.storage.keyword_candidates(label, mention, self.candidate_pool),
            )
            .await?;
        for candidate in candidates {
            let score = dice_similarity(mention, &candidate.text);
            merge(&mut merged, candidate.id, candidate.text, score);
        }

        if let Some(embedder) = &self.embedder {
            let query = embedder.embed_one(mention).await?;
            let mut scored: Vec<Match> = self
                .storage
                .within(
                    "align",
                    self.store_timeout,
                    self.storage.label_embeddings(label, embedder.model()),
                )
                .await?
                .into_iter()
                .map(|node| Match {
                    score: cosine_similarity(&query, &node.vector),
                    id: node.id,
                    text: node.text,
                })
                .collect();
            sort_matches(&mut scored);
            scored.truncate(self.candidate_pool);
            for hit in scored {
                merge(&mut merged, hit.id, hit.text, hit.score);
            }
        }

        let mut ranked: Vec<Match> = merged.into_values().collect();
        sort_matches(&mut ranked);
        Ok(ranked)
    }
}

fn merge(merged: &mut HashMap<NodeId, Match>, id: NodeId, text: String, score: f32) {
    merged
        .entry(id.clone())
        .and_modify(|m| m.score = m.score.max(score))
        .or_insert(Match { id, text, score });
}

/// Score descending, then id ascending.
fn sort_matches(matches: &mut [Match]) {
    matches.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
}

/// Dice coefficient over character bigrams, case-insensitive.
///
/// Identical strings score 1.0. A single-character string counts as one gram.
pub fn dice_similarity(a: &str, b: &str) -> f32 {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a == b {
        return 1.0;
    }
    let ga = bigrams(&a);
    let gb = bigrams(&b);
    if ga.is_empty() || gb.is_empty() {
        return 0.0;
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for g in &gb {
        *counts.entry(g.as_str()).or_default() += 1;
    }
    let mut overlap = 0;
    for g in &ga {
        if let Some(n) = counts.get_mut(g.as_str()) {
            if *n > 0 {
                *n -= 1;
                overlap += 1;
            }
        }
    }
    (2 * overlap) as f32 / (ga.len() + gb.len()) as f32
}

fn bigrams(s: &str) -> Vec<String> {
    let chars: Vec<char> = s.chars().filter(|c| !c.is_whitespace()).collect();
    match chars.len() {
        0 => Vec::new(),
        1 => vec![chars[0].to_string()],
        _ => chars.windows(2).map(|w| w.iter().collect()).collect(),
    }
}
