//! SQL migration definitions for the MedGraph database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed as one batch.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: nodes, relations, node_embeddings, ingest_runs, FTS5",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Graph nodes; exactly one of name/description is set, except Disease (both)
CREATE TABLE IF NOT EXISTS nodes (
    label       TEXT NOT NULL,
    id          TEXT NOT NULL,
    name        TEXT,
    description TEXT,
    PRIMARY KEY (label, id)
);

CREATE INDEX IF NOT EXISTS idx_nodes_label_name ON nodes(label, name);

-- Directed relations between nodes
CREATE TABLE IF NOT EXISTS relations (
    rel_type    TEXT NOT NULL,
    start_label TEXT NOT NULL,
    start_id    TEXT NOT NULL,
    end_label   TEXT NOT NULL,
    end_id      TEXT NOT NULL,
    PRIMARY KEY (rel_type, start_label, start_id, end_label, end_id)
);

CREATE INDEX IF NOT EXISTS idx_relations_start ON relations(start_label, start_id);
CREATE INDEX IF NOT EXISTS idx_relations_end ON relations(end_label, end_id);

-- Normalised embedding per node and model
CREATE TABLE IF NOT EXISTS node_embeddings (
    label  TEXT NOT NULL,
    id     TEXT NOT NULL,
    model  TEXT NOT NULL,
    dim    INTEGER NOT NULL,
    vector BLOB NOT NULL,
    PRIMARY KEY (label, id, model)
);

-- Ingestion run history
CREATE TABLE IF NOT EXISTS ingest_runs (
    id          TEXT PRIMARY KEY,
    source      TEXT NOT NULL,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    stats_json  TEXT
);

-- Full-text search on node text; trigram tokens work for CJK text
CREATE VIRTUAL TABLE IF NOT EXISTS nodes_fts USING fts5(
    label UNINDEXED,
    text,
    tokenize = 'trigram'
);

-- Triggers to keep FTS in sync with nodes table
CREATE TRIGGER IF NOT EXISTS nodes_fts_insert AFTER INSERT ON nodes BEGIN
    INSERT INTO nodes_fts(rowid, label, text)
    VALUES (new.rowid, new.label, COALESCE(new.name, new.description, ''));
END;

CREATE TRIGGER IF NOT EXISTS nodes_fts_delete AFTER DELETE ON nodes BEGIN
    DELETE FROM nodes_fts WHERE rowid = old.rowid;
END;

CREATE TRIGGER IF NOT EXISTS nodes_fts_update AFTER UPDATE OF name, description ON nodes
WHEN old.name IS NOT new.name OR old.description IS NOT new.description BEGIN
    DELETE FROM nodes_fts WHERE rowid = old.rowid;
    INSERT INTO nodes_fts(rowid, label, text)
    VALUES (new.rowid, new.label, COALESCE(new.name, new.description, ''));
END;

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
