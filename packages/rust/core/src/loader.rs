//! Graph ingestion: flat disease records to typed node and relation writes.
//!
//! Node writes are issued per record as soon as the record is read.
//! Relations are collected across the whole run, grouped by
//! `(type, start label, end label)` and flushed one batch per group.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use medgraph_shared::{
    DiseaseNode, GraphNode, IdStrategy, Label, LabelKind, MedGraphError, MedicalRecord, NodeId,
    RelationKind, RelationPair, Result,
};
use medgraph_storage::Storage;

use crate::registry::EntityIdRegistry;
use crate::source::{self, RecordSet, SkippedRecord};

/// Key of one relation batch.
type BatchKey = (RelationKind, Label, Label);

// ---------------------------------------------------------------------------
// Report and progress
// ---------------------------------------------------------------------------

/// A relation batch the store refused.
#[derive(Debug, Clone, Serialize)]
pub struct FailedBatch {
    pub relation: RelationKind,
    pub start_label: Label,
    pub end_label: Label,
    pub relations: usize,
    pub reason: String,
}

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub records_seen: usize,
    pub records_written: usize,
    pub skipped: Vec<SkippedRecord>,
    pub nodes_written: usize,
    /// Relations derived from the source, duplicates included.
    pub relations_submitted: usize,
    /// Relations that did not exist in the store before this run.
    pub relations_created: u64,
    pub relation_batches: usize,
    pub failed_batches: Vec<FailedBatch>,
    pub elapsed_ms: u64,
}

/// Progress callback for ingestion.
pub trait IngestProgress: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after each record, written or skipped.
    fn record_done(&self, current: usize, total: usize);
    /// Called after each relation batch is flushed.
    fn batch_written(&self, relation: RelationKind, relations: usize);
    /// Called when the run completes.
    fn done(&self, report: &IngestReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl IngestProgress for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn record_done(&self, _current: usize, _total: usize) {}
    fn batch_written(&self, _relation: RelationKind, _relations: usize) {}
    fn done(&self, _report: &IngestReport) {}
}

// ---------------------------------------------------------------------------
// GraphLoader
// ---------------------------------------------------------------------------

/// Writes records into the graph store, assigning ids through one registry.
pub struct GraphLoader<'a> {
    storage: &'a Storage,
    registry: EntityIdRegistry,
}

impl<'a> GraphLoader<'a> {
    pub fn new(storage: &'a Storage, strategy: IdStrategy) -> Self {
        Self {
            storage,
            registry: EntityIdRegistry::new(strategy),
        }
    }

    /// Upsert a Disease node with its name and description.
    pub async fn write_disease_node(&self, node: &DiseaseNode) -> Result<()> {
        self.storage
            .upsert_disease(node)
            .await
            .map_err(write_error)
    }

    /// Upsert a node of a named category other than Disease.
    pub async fn write_named_node(&self, node: &GraphNode) -> Result<()> {
        if node.label.kind() != LabelKind::Named || node.label == Label::Disease {
            return Err(MedGraphError::validation(format!(
                "{} is not a named non-disease category",
                node.label
            )));
        }
        self.storage.upsert_node(node).await.map_err(write_error)
    }

    /// Upsert a node of a described category.
    pub async fn write_desc_node(&self, node: &GraphNode) -> Result<()> {
        if node.label.kind() != LabelKind::Described {
            return Err(MedGraphError::validation(format!(
                "{} is not a described category",
                node.label
            )));
        }
        self.storage.upsert_node(node).await.map_err(write_error)
    }

    /// Upsert a batch of relations sharing one `(type, start, end)` triple.
    /// Returns the number of relations newly created.
    pub async fn write_relation_batch(
        &self,
        kind: RelationKind,
        start_label: Label,
        end_label: Label,
        pairs: &[RelationPair],
    ) -> Result<u64> {
        self.storage
            .upsert_relations(kind, start_label, end_label, pairs)
            .await
            .map_err(write_error)
    }

    /// Load every record of `set`, then flush the grouped relations.
    ///
    /// A record whose node writes fail is skipped along with all of its
    /// relations; a failing relation batch is reported and the rest still run.
    #[instrument(skip_all, fields(records = set.records.len()))]
    pub async fn ingest(&mut self, set: RecordSet, progress: &dyn IngestProgress) -> IngestReport {
        let start = Instant::now();
        let total = set.records.len() + set.skipped.len();
        let mut report = IngestReport {
            records_seen: total,
            skipped: set.skipped,
            ..IngestReport::default()
        };
        for skipped in &report.skipped {
            warn!(line = skipped.line, reason = %skipped.reason, "skipping record");
        }

        progress.phase("Writing nodes");
        let mut batches: BTreeMap<BatchKey, Vec<RelationPair>> = BTreeMap::new();
        let mut done = report.skipped.len();

        for source in &set.records {
            let name = source.record.name.clone();
            match self.load_record(&source.record).await {
                Ok((nodes, relations)) => {
                    report.records_written += 1;
                    report.nodes_written += nodes;
                    report.relations_submitted += relations.len();
                    for (kind, pair) in relations {
                        let (start_label, end_label) = kind.endpoints();
                        batches
                            .entry((kind, start_label, end_label))
                            .or_default()
                            .push(pair);
                    }
                }
                Err(e) => {
                    warn!(line = source.line, name = ?name, error = %e, "skipping record");
                    report.skipped.push(SkippedRecord {
                        line: source.line,
                        name,
                        reason: e.to_string(),
                    });
                }
            }
            done += 1;
            progress.record_done(done, total);
        }

        progress.phase("Writing relations");
        for ((kind, start_label, end_label), pairs) in &batches {
            report.relation_batches += 1;
            match self
                .write_relation_batch(*kind, *start_label, *end_label, pairs)
                .await
            {
                Ok(created) => {
                    debug!(relation = %kind, submitted = pairs.len(), created, "relation batch written");
                    report.relations_created += created;
                    progress.batch_written(*kind, pairs.len());
                }
                Err(e) => {
                    warn!(relation = %kind, error = %e, "relation batch failed");
                    report.failed_batches.push(FailedBatch {
                        relation: *kind,
                        start_label: *start_label,
                        end_label: *end_label,
                        relations: pairs.len(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        report.elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            written = report.records_written,
            skipped = report.skipped.len(),
            nodes = report.nodes_written,
            relations = report.relations_submitted,
            created = report.relations_created,
            batches = report.relation_batches,
            "ingestion complete"
        );
        progress.done(&report);
        report
    }

    /// Write the nodes of one record and return its relations.
    async fn load_record(
        &mut self,
        record: &MedicalRecord,
    ) -> Result<(usize, Vec<(RelationKind, RelationPair)>)> {
        let name = record
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| MedGraphError::validation("record has no name"))?;

        let disease_id = self.registry.get_or_create_id(Label::Disease, name)?;
        self.write_disease_node(&DiseaseNode {
            id: disease_id.clone(),
            name: name.to_string(),
            desc: record.desc.clone().unwrap_or_default(),
        })
        .await?;

        let mut nodes = 1;
        let mut relations = Vec::new();
        for kind in RelationKind::ALL {
            let (start_label, end_label) = kind.endpoints();
            // The disease sits at the start unless the relation points at it
            let disease_is_start = start_label == Label::Disease;
            let other_label = if disease_is_start { end_label } else { start_label };

            for value in attribute_values(record, kind) {
                let other_id = self.write_attribute_node(other_label, value).await?;
                nodes += 1;
                let pair = if disease_is_start {
                    RelationPair {
                        start_id: disease_id.clone(),
                        end_id: other_id,
                    }
                } else {
                    RelationPair {
                        start_id: other_id,
                        end_id: disease_id.clone(),
                    }
                };
                relations.push((kind, pair));
            }
        }
        Ok((nodes, relations))
    }

    async fn write_attribute_node(&mut self, label: Label, text: &str) -> Result<NodeId> {
        let text = text.trim();
        let id = self.registry.get_or_create_id(label, text)?;
        if label == Label::Disease {
            // Stub for an accompanying disease; its own record fills the description
            self.write_disease_node(&DiseaseNode {
                id: id.clone(),
                name: text.to_string(),
                desc: String::new(),
            })
            .await?;
        } else if label.kind() == LabelKind::Named {
            self.write_named_node(&GraphNode::named(label, id.clone(), text)?)
                .await?;
        } else {
            self.write_desc_node(&GraphNode::described(label, id.clone(), text)?)
                .await?;
        }
        Ok(id)
    }
}

/// Non-empty values of the attribute group feeding `kind`.
fn attribute_values(record: &MedicalRecord, kind: RelationKind) -> Vec<&str> {
    let values: Vec<&str> = match kind {
        RelationKind::Accompany => list(&record.accompany),
        RelationKind::Belong => list(&record.department),
        RelationKind::Have => list(&record.symptom),
        RelationKind::LeadTo => scalar(&record.cause),
        RelationKind::CommonUse => list(&record.drug),
        RelationKind::Eat => list(&record.eat),
        RelationKind::NoEat => list(&record.not_eat),
        RelationKind::Transmit => scalar(&record.way),
        RelationKind::Prevent => scalar(&record.prevent),
        RelationKind::ToCheck => list(&record.check),
        RelationKind::ToTreat => list(&record.treat),
        RelationKind::CommonOn => scalar(&record.people),
        RelationKind::TreatDuration => scalar(&record.duration),
    };
    values.into_iter().filter(|v| !v.trim().is_empty()).collect()
}

fn list(values: &[String]) -> Vec<&str> {
    values.iter().map(String::as_str).collect()
}

fn scalar(value: &Option<String>) -> Vec<&str> {
    value.as_deref().into_iter().collect()
}

/// Store failures during ingestion surface as write errors.
fn write_error(e: MedGraphError) -> MedGraphError {
    match e {
        MedGraphError::Storage(msg) => MedGraphError::IngestionWrite(msg),
        other => other,
    }
}

/// Read a JSON Lines dataset and ingest it, recording the run in the store.
#[instrument(skip_all, fields(path = %path.display(), strategy = ?strategy))]
pub async fn ingest_file(
    storage: &Storage,
    path: &Path,
    strategy: IdStrategy,
    progress: &dyn IngestProgress,
) -> Result<IngestReport> {
    progress.phase("Reading dataset");
    let set = source::read_records(path)?;
    info!(records = set.records.len(), "dataset loaded");

    let run_id = storage.insert_ingest_run(&path.display().to_string()).await?;
    let mut loader = GraphLoader::new(storage, strategy);
    let mut report = loader.ingest(set, progress).await;
    report.run_id = Some(run_id.clone());

    let stats = serde_json::to_string(&report)
        .map_err(|e| MedGraphError::Storage(format!("failed to encode run stats: {e}")))?;
    storage.finish_ingest_run(&run_id, &stats).await?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{SourceRecord, parse_records};
    use std::sync::Mutex;
    use uuid::Uuid;

    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("medgraph_core_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn record_set(lines: &str) -> RecordSet {
        parse_records(lines.as_bytes()).expect("parse")
    }

    #[tokio::test]
    async fn flu_record_yields_expected_graph() {
        let storage = test_storage().await;
        let mut loader = GraphLoader::new(&storage, IdStrategy::Sequential);
        let report = loader
            .ingest(
                record_set(r#"{"name":"flu","symptom":["fever","cough"]}"#),
                &SilentProgress,
            )
            .await;

        assert_eq!(report.records_written, 1);
        assert_eq!(report.nodes_written, 3);
        assert_eq!(report.relations_created, 2);
        assert_eq!(report.relation_batches, 1);

        let flu = storage
            .get_node(Label::Disease, &NodeId::from("disease_1"))
            .await
            .unwrap()
            .expect("disease_1");
        assert_eq!(flu.name.as_deref(), Some("flu"));
        let fever = storage
            .get_node(Label::Symptom, &NodeId::from("symptom_1"))
            .await
            .unwrap()
            .expect("symptom_1");
        assert_eq!(fever.name.as_deref(), Some("fever"));
        let cough = storage
            .get_node(Label::Symptom, &NodeId::from("symptom_2"))
            .await
            .unwrap()
            .expect("symptom_2");
        assert_eq!(cough.name.as_deref(), Some("cough"));

        let have = storage.list_relations(RelationKind::Have).await.unwrap();
        assert_eq!(
            have,
            vec![
                RelationPair {
                    start_id: NodeId::from("disease_1"),
                    end_id: NodeId::from("symptom_1"),
                },
                RelationPair {
                    start_id: NodeId::from("disease_1"),
                    end_id: NodeId::from("symptom_2"),
                },
            ]
        );
    }

    #[tokio::test]
    async fn reingesting_creates_no_duplicates() {
        let storage = test_storage().await;
        let input = r#"{"name":"flu","desc":"viral","symptom":["fever"],"cause":"virus","drug":["oseltamivir"]}"#;

        let mut loader = GraphLoader::new(&storage, IdStrategy::ContentHash);
        loader.ingest(record_set(input), &SilentProgress).await;
        let nodes = storage.count_nodes(None).await.unwrap();
        let relations = storage.count_relations(None).await.unwrap();
        assert_eq!(nodes, 4);
        assert_eq!(relations, 3);

        // A fresh loader reproduces content-hash ids
        let mut again = GraphLoader::new(&storage, IdStrategy::ContentHash);
        let report = again.ingest(record_set(input), &SilentProgress).await;
        assert_eq!(report.relations_submitted, 3);
        assert_eq!(report.relations_created, 0);
        assert_eq!(storage.count_nodes(None).await.unwrap(), nodes);
        assert_eq!(storage.count_relations(None).await.unwrap(), relations);
    }

    #[tokio::test]
    async fn relation_direction_follows_relation_kind() {
        let storage = test_storage().await;
        let mut loader = GraphLoader::new(&storage, IdStrategy::Sequential);
        loader
            .ingest(
                record_set(
                    r#"{"name":"flu","cause":"virus","prevent":"wash hands","check":["blood test"],"people":"children"}"#,
                ),
                &SilentProgress,
            )
            .await;

        let lead_to = storage.list_relations(RelationKind::LeadTo).await.unwrap();
        assert_eq!(lead_to[0].start_id, NodeId::from("cause_1"));
        assert_eq!(lead_to[0].end_id, NodeId::from("disease_1"));

        let prevent = storage.list_relations(RelationKind::Prevent).await.unwrap();
        assert_eq!(prevent[0].start_id, NodeId::from("preventway_1"));

        let check = storage.list_relations(RelationKind::ToCheck).await.unwrap();
        assert_eq!(check[0].start_id, NodeId::from("check_1"));

        let common_on = storage.list_relations(RelationKind::CommonOn).await.unwrap();
        assert_eq!(common_on[0].start_id, NodeId::from("disease_1"));
        assert_eq!(common_on[0].end_id, NodeId::from("people_1"));

        let people = storage
            .get_node(Label::People, &NodeId::from("people_1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(people.description.as_deref(), Some("children"));
        assert!(people.name.is_none());
    }

    #[tokio::test]
    async fn empty_values_and_missing_groups_are_skipped() {
        let storage = test_storage().await;
        let mut loader = GraphLoader::new(&storage, IdStrategy::Sequential);
        let report = loader
            .ingest(
                record_set(r#"{"name":"flu","symptom":["", "  ", "fever"],"cause":"","drug":null}"#),
                &SilentProgress,
            )
            .await;
        assert_eq!(report.nodes_written, 2);
        assert_eq!(storage.count_nodes(Some(Label::Cause)).await.unwrap(), 0);
        assert_eq!(storage.count_relations(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn accompanying_disease_keeps_its_own_description() {
        let storage = test_storage().await;
        let mut loader = GraphLoader::new(&storage, IdStrategy::Sequential);
        let input = concat!(
            r#"{"name":"pneumonia","desc":"lung infection"}"#,
            "\n",
            r#"{"name":"flu","accompany":["pneumonia"]}"#,
        );
        loader.ingest(record_set(input), &SilentProgress).await;

        let pneumonia = storage
            .get_node(Label::Disease, &NodeId::from("disease_1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pneumonia.description.as_deref(), Some("lung infection"));
        let accompany = storage.list_relations(RelationKind::Accompany).await.unwrap();
        assert_eq!(accompany[0].start_id, NodeId::from("disease_2"));
        assert_eq!(accompany[0].end_id, NodeId::from("disease_1"));
    }

    #[tokio::test]
    async fn bad_records_are_skipped_and_reported() {
        let storage = test_storage().await;
        let mut loader = GraphLoader::new(&storage, IdStrategy::Sequential);
        let mut set = record_set("{\"desc\":\"no name\"}\n{oops\n{\"name\":\"flu\",\"symptom\":[\"fever\"]}\n");
        set.records.push(SourceRecord {
            line: 99,
            record: MedicalRecord {
                name: Some("   ".into()),
                ..MedicalRecord::default()
            },
        });

        let report = loader.ingest(set, &SilentProgress).await;
        assert_eq!(report.records_seen, 4);
        assert_eq!(report.records_written, 1);
        let lines: Vec<usize> = report.skipped.iter().map(|s| s.line).collect();
        assert_eq!(lines, vec![2, 1, 99]);
        assert_eq!(storage.count_relations(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn relations_are_flushed_one_batch_per_triple() {
        struct Recorder(Mutex<Vec<(RelationKind, usize)>>);
        impl IngestProgress for Recorder {
            fn phase(&self, _name: &str) {}
            fn record_done(&self, _current: usize, _total: usize) {}
            fn batch_written(&self, relation: RelationKind, relations: usize) {
                self.0.lock().unwrap().push((relation, relations));
            }
            fn done(&self, _report: &IngestReport) {}
        }

        let storage = test_storage().await;
        let mut loader = GraphLoader::new(&storage, IdStrategy::Sequential);
        let input = concat!(
            r#"{"name":"flu","symptom":["fever","cough"],"eat":["porridge"]}"#,
            "\n",
            r#"{"name":"cold","symptom":["cough"],"not_eat":["ice cream"]}"#,
        );
        let recorder = Recorder(Mutex::new(Vec::new()));
        let report = loader.ingest(record_set(input), &recorder).await;

        let batches = recorder.0.into_inner().unwrap();
        assert_eq!(
            batches,
            vec![
                (RelationKind::Have, 3),
                (RelationKind::Eat, 1),
                (RelationKind::NoEat, 1),
            ]
        );
        assert_eq!(report.relations_submitted, 5);
        assert_eq!(report.relations_created, 5);
        // Shared symptom reuses one node
        assert_eq!(storage.count_nodes(Some(Label::Symptom)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn node_writes_validate_category() {
        let storage = test_storage().await;
        let loader = GraphLoader::new(&storage, IdStrategy::Sequential);
        let cause = GraphNode::described(Label::Cause, NodeId::from("cause_1"), "virus").unwrap();
        assert!(loader.write_named_node(&cause).await.is_err());
        let drug = GraphNode::named(Label::Drug, NodeId::from("drug_1"), "aspirin").unwrap();
        assert!(loader.write_desc_node(&drug).await.is_err());
        assert!(loader.write_named_node(&drug).await.is_ok());
    }

    #[tokio::test]
    async fn ingest_file_records_the_run() {
        let storage = test_storage().await;
        let path = std::env::temp_dir().join(format!("medgraph_dataset_{}.jsonl", Uuid::now_v7()));
        std::fs::write(&path, "{\"name\":\"flu\",\"symptom\":[\"fever\"]}\n").unwrap();

        let report = ingest_file(&storage, &path, IdStrategy::ContentHash, &SilentProgress)
            .await
            .expect("ingest");
        let run_id = report.run_id.expect("run id");
        let stats = storage
            .get_ingest_run_stats(&run_id)
            .await
            .unwrap()
            .expect("stats stored");
        let stats: serde_json::Value = serde_json::from_str(&stats).unwrap();
        assert_eq!(stats["records_written"], 1);
        assert_eq!(stats["relations_created"], 1);
    }
}
