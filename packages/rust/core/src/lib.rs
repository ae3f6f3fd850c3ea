//! Ingestion and question answering for the medical knowledge graph.
//!
//! Offline, [`loader`] turns JSON Lines disease records into nodes and
//! relations. At serving time, [`orchestrator::ChatService`] routes each
//! question through intent classification and, for knowledge questions,
//! query synthesis, entity alignment, execution, and answer synthesis.

pub mod align;
pub mod answer;
pub mod assistant;
pub mod embeddings;
pub mod executor;
pub mod intent;
pub mod loader;
pub mod orchestrator;
pub mod prompts;
pub mod query;
pub mod registry;
pub mod source;

#[cfg(test)]
mod testing;

pub use align::{EntityAligner, ResolvedEntity};
pub use answer::AnswerSynthesizer;
pub use assistant::{Assistant, LlmAssistant};
pub use embeddings::{BackfillProgress, BackfillReport, SilentBackfill, backfill_embeddings};
pub use executor::QueryExecutor;
pub use intent::{Intent, IntentClassifier};
pub use loader::{GraphLoader, IngestProgress, IngestReport, SilentProgress, ingest_file};
pub use orchestrator::{APOLOGY, ChatService, ServiceContext};
pub use query::{EntityMention, QueryPlan, QuerySynthesizer};
pub use registry::EntityIdRegistry;
