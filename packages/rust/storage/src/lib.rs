//! libSQL-backed labeled property graph.
//!
//! The [`Storage`] struct wraps a libSQL database holding graph nodes,
//! directed relations, node embeddings, ingestion history, and a trigram
//! full-text index over node text.
//!
//! **Access rules:**
//! - Ingestion and embedding backfill: read-write via [`Storage::open`]
//! - Question answering: read-only via [`Storage::open_readonly`], with each
//!   call bounded by [`Storage::within`]

mod deadline;
mod migrations;
mod query;
mod search;

use std::path::Path;

use chrono::Utc;
use libsql::{Connection, Database, params};
use medgraph_shared::{
    DiseaseNode, GraphNode, Label, MedGraphError, NodeAttr, NodeId, RelationKind, RelationPair,
    Result,
};
use uuid::Uuid;

pub use query::{QueryRow, describe_schema, ensure_read_only, split_literals};
pub use search::{Candidate, EmbeddedNode, PendingEmbedding};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

/// Map any libSQL error into the storage variant.
pub(crate) fn db_err(e: impl std::fmt::Display) -> MedGraphError {
    MedGraphError::Storage(e.to_string())
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| MedGraphError::io(parent, e))?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let conn = db.connect().map_err(db_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(MedGraphError::Storage(format!(
                "graph database not found at {} (run `medgraph ingest` first)",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let conn = db.connect().map_err(db_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        MedGraphError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(MedGraphError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Node operations
    // -----------------------------------------------------------------------

    /// Upsert a Disease node by id.
    ///
    /// An empty description never replaces a stored one, so a disease first
    /// seen as somebody's accompanying disease keeps the text of its own record.
    pub async fn upsert_disease(&self, node: &DiseaseNode) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO nodes (label, id, name, description)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(label, id) DO UPDATE SET
                   name = excluded.name,
                   description = COALESCE(NULLIF(excluded.description, ''), nodes.description)",
                params![
                    Label::Disease.as_str(),
                    node.id.as_str(),
                    node.name.as_str(),
                    node.desc.as_str(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Upsert a named or described node by `(label, id)`.
    pub async fn upsert_node(&self, node: &GraphNode) -> Result<()> {
        self.check_writable()?;
        let (name, description) = match &node.attr {
            NodeAttr::Name(name) => (Some(name.as_str()), None),
            NodeAttr::Desc(desc) => (None, Some(desc.as_str())),
        };
        self.conn
            .execute(
                "INSERT INTO nodes (label, id, name, description)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(label, id) DO UPDATE SET
                   name = excluded.name,
                   description = excluded.description",
                params![node.label.as_str(), node.id.as_str(), name, description],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Get a node by label and id.
    pub async fn get_node(&self, label: Label, id: &NodeId) -> Result<Option<StoredNode>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, name, description FROM nodes WHERE label = ?1 AND id = ?2",
                params![label.as_str(), id.as_str()],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(StoredNode {
                label,
                id: NodeId(row.get::<String>(0).map_err(db_err)?),
                name: row.get::<String>(1).ok(),
                description: row.get::<String>(2).ok(),
            })),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    /// Count nodes, optionally restricted to one label.
    pub async fn count_nodes(&self, label: Option<Label>) -> Result<u64> {
        self.count(
            "SELECT COUNT(*) FROM nodes WHERE ?1 IS NULL OR label = ?1",
            label.map(|l| l.as_str()),
        )
        .await
    }

    // -----------------------------------------------------------------------
    // Relation operations
    // -----------------------------------------------------------------------

    /// Upsert a batch of relations sharing one `(type, start, end)` triple.
    ///
    /// The batch runs in a single transaction. A pair whose endpoints do not
    /// both exist is skipped, and existing relations are left untouched.
    /// Returns the number of relations newly created.
    pub async fn upsert_relations(
        &self,
        kind: RelationKind,
        start_label: Label,
        end_label: Label,
        pairs: &[RelationPair],
    ) -> Result<u64> {
        self.check_writable()?;
        if kind.endpoints() != (start_label, end_label) {
            let (start, end) = kind.endpoints();
            return Err(MedGraphError::validation(format!(
                "{kind} connects {start} -> {end}, not {start_label} -> {end_label}"
            )));
        }
        if pairs.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.transaction().await.map_err(db_err)?;
        let mut created = 0;
        for pair in pairs {
            created += tx
                .execute(
                    "INSERT OR IGNORE INTO relations (rel_type, start_label, start_id, end_label, end_id)
                     SELECT ?1, ?2, ?3, ?4, ?5
                     WHERE EXISTS (SELECT 1 FROM nodes WHERE label = ?2 AND id = ?3)
                       AND EXISTS (SELECT 1 FROM nodes WHERE label = ?4 AND id = ?5)",
                    params![
                        kind.as_str(),
                        start_label.as_str(),
                        pair.start_id.as_str(),
                        end_label.as_str(),
                        pair.end_id.as_str(),
                    ],
                )
                .await
                .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(created)
    }

    /// List the relations of one type in insertion order.
    pub async fn list_relations(&self, kind: RelationKind) -> Result<Vec<RelationPair>> {
        let mut rows = self
            .conn
            .query(
                "SELECT start_id, end_id FROM relations WHERE rel_type = ?1 ORDER BY rowid",
                params![kind.as_str()],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(RelationPair {
                start_id: NodeId(row.get::<String>(0).map_err(db_err)?),
                end_id: NodeId(row.get::<String>(1).map_err(db_err)?),
            });
        }
        Ok(results)
    }

    /// Count relations, optionally restricted to one type.
    pub async fn count_relations(&self, kind: Option<RelationKind>) -> Result<u64> {
        self.count(
            "SELECT COUNT(*) FROM relations WHERE ?1 IS NULL OR rel_type = ?1",
            kind.map(|k| k.as_str()),
        )
        .await
    }

    async fn count(&self, sql: &str, filter: Option<&str>) -> Result<u64> {
        let mut rows = self
            .conn
            .query(sql, params![filter])
            .await
            .map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).map_err(db_err)?.max(0) as u64),
            Ok(None) => Ok(0),
            Err(e) => Err(db_err(e)),
        }
    }

    /// Node counts per label and relation counts per type.
    pub async fn stats(&self) -> Result<GraphStats> {
        let mut stats = GraphStats::default();
        for label in Label::ALL {
            stats.nodes.push((label, self.count_nodes(Some(label)).await?));
        }
        for kind in RelationKind::ALL {
            stats
                .relations
                .push((kind, self.count_relations(Some(kind)).await?));
        }
        Ok(stats)
    }

    // -----------------------------------------------------------------------
    // Ingestion run history
    // -----------------------------------------------------------------------

    /// Record the start of an ingestion run. Returns the generated run ID.
    pub async fn insert_ingest_run(&self, source: &str) -> Result<String> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO ingest_runs (id, source, started_at) VALUES (?1, ?2, ?3)",
                params![id.as_str(), source, now.as_str()],
            )
            .await
            .map_err(db_err)?;
        Ok(id)
    }

    /// Update an ingestion run with completion data.
    pub async fn finish_ingest_run(&self, run_id: &str, stats_json: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE ingest_runs SET finished_at = ?1, stats_json = ?2 WHERE id = ?3",
                params![now.as_str(), stats_json, run_id],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Get the stored statistics of a finished run.
    pub async fn get_ingest_run_stats(&self, run_id: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT stats_json FROM ingest_runs WHERE id = ?1",
                params![run_id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<String>(0).ok()),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }
}

/// A node as read back from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredNode {
    pub label: Label,
    pub id: NodeId,
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Per-label and per-type counts.
#[derive(Debug, Clone, Default)]
pub struct GraphStats {
    pub nodes: Vec<(Label, u64)>,
    pub relations: Vec<(RelationKind, u64)>,
}

impl GraphStats {
    pub fn total_nodes(&self) -> u64 {
        self.nodes.iter().map(|(_, n)| n).sum()
    }

    pub fn total_relations(&self) -> u64 {
        self.relations.iter().map(|(_, n)| n).sum()
    }
}
