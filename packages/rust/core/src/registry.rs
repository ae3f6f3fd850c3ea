//! Entity identity assignment for one ingestion run.

use std::collections::HashMap;

use medgraph_shared::{IdStrategy, Label, MedGraphError, NodeId, Result};
use sha2::{Digest, Sha256};

/// Hex characters of the digest used for content-hash ids.
const SHORT_HASH_LEN: usize = 16;

/// Maps `(label, name)` pairs to node ids.
///
/// The mapping lives for one ingestion run and is not safe for concurrent
/// writers. With [`IdStrategy::ContentHash`] the same pair yields the same id
/// in every run; with [`IdStrategy::Sequential`] ids follow first-seen order.
#[derive(Debug)]
pub struct EntityIdRegistry {
    strategy: IdStrategy,
    by_name: HashMap<Label, HashMap<String, NodeId>>,
    /// Issued id -> name, used to detect short-hash collisions.
    by_id: HashMap<Label, HashMap<NodeId, String>>,
}

impl EntityIdRegistry {
    pub fn new(strategy: IdStrategy) -> Self {
        Self {
            strategy,
            by_name: HashMap::new(),
            by_id: HashMap::new(),
        }
    }

    /// Return the id of `(label, name)`, allocating one on first sight.
    ///
    /// Surrounding whitespace is not significant. An empty name is rejected.
    pub fn get_or_create_id(&mut self, label: Label, name: &str) -> Result<NodeId> {
        let name = name.trim();
        if name.is_empty() {
            return Err(MedGraphError::validation(format!(
                "cannot assign an id to an empty {label} name"
            )));
        }

        if let Some(id) = self.by_name.get(&label).and_then(|m| m.get(name)) {
            return Ok(id.clone());
        }

        let issued = self.by_id.entry(label).or_default();
        let id = match self.strategy {
            IdStrategy::Sequential => {
                NodeId(format!("{}_{}", label.id_prefix(), issued.len() + 1))
            }
            IdStrategy::ContentHash => {
                let digest = content_digest(label, name);
                let short = NodeId(format!(
                    "{}_{}",
                    label.id_prefix(),
                    &digest[..SHORT_HASH_LEN]
                ));
                if issued.contains_key(&short) {
                    NodeId(format!("{}_{digest}", label.id_prefix()))
                } else {
                    short
                }
            }
        };

        issued.insert(id.clone(), name.to_string());
        self.by_name
            .entry(label)
            .or_default()
            .insert(name.to_string(), id.clone());
        Ok(id)
    }

    /// Number of distinct names registered under `label`.
    pub fn len(&self, label: Label) -> usize {
        self.by_name.get(&label).map_or(0, HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.values().all(HashMap::is_empty)
    }
}

/// SHA-256 over `label || 0x1F || name`, lowercase hex.
fn content_digest(label: Label, name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(label.as_str().as_bytes());
    hasher.update([0x1F]);
    hasher.update(name.as_bytes());
    format!("{:x}", hasher.finalize())
}
