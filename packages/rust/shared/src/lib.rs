//! Shared types, error model, and configuration for MedGraph.
//!
//! This crate is the foundation depended on by all other MedGraph crates.
//! It provides:
//! - [`MedGraphError`], the unified error type
//! - Domain types ([`Label`], [`RelationKind`], [`DiseaseNode`], [`GraphNode`], [`MedicalRecord`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AlignmentMissPolicy, AppConfig, EmbeddingConfig, IdStrategy, IngestConfig, LlmConfig,
    ServingConfig, StoreConfig, config_dir, config_file_path, init_config, load_config,
    load_config_from, resolve_api_key, validate_api_key, validate_config,
};
pub use error::{MedGraphError, Result};
pub use types::{
    Answer, DiseaseNode, GraphNode, Label, LabelKind, MedicalRecord, NodeAttr, NodeId, Question,
    RelationKind, RelationPair,
};
