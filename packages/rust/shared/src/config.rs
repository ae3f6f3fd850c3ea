//! Application configuration for MedGraph.
//!
//! User config lives at `~/.medgraph/medgraph.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MedGraphError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "medgraph.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".medgraph";

// ---------------------------------------------------------------------------
// Config structs (matching medgraph.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Graph store location.
    #[serde(default)]
    pub store: StoreConfig,

    /// Chat-completion provider.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Embedding provider used by entity alignment.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Offline ingestion settings.
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Question-answering settings.
    #[serde(default)]
    pub serving: ServingConfig,
}

/// `[store]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the libSQL database file.
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> String {
    "var/medgraph.db".into()
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible API.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Model identifier.
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_llm_api_key_env")]
    pub api_key_env: String,

    /// Per-request timeout.
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Retries for timeouts, connection failures, 429 and 5xx responses.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default)]
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key_env: default_llm_api_key_env(),
            timeout_secs: default_llm_timeout(),
            max_retries: default_max_retries(),
            temperature: 0.0,
        }
    }
}

fn default_llm_base_url() -> String {
    "https://api.deepseek.com".into()
}
fn default_llm_model() -> String {
    "deepseek-chat".into()
}
fn default_llm_api_key_env() -> String {
    "DEEPSEEK_API_KEY".into()
}
fn default_llm_timeout() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    2
}

/// `[embedding]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// When false, alignment uses lexical matching only.
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_embedding_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Texts per embedding request during `medgraph index`.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_embedding_base_url(),
            model: default_embedding_model(),
            api_key_env: default_embedding_api_key_env(),
            timeout_secs: default_embedding_timeout(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_embedding_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_embedding_model() -> String {
    "BAAI/bge-small-zh-v1.5".into()
}
fn default_embedding_api_key_env() -> String {
    "EMBEDDING_API_KEY".into()
}
fn default_embedding_timeout() -> u64 {
    30
}
fn default_batch_size() -> usize {
    64
}

/// How node ids are derived during ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    /// `disease_1`, `disease_2`, ... in first-seen order within one run.
    Sequential,
    /// Stable hash of label and name, reproducible across runs.
    #[default]
    ContentHash,
}

/// `[ingest]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default)]
    pub id_strategy: IdStrategy,
}

/// What to do when a mention resolves to no node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentMissPolicy {
    /// Fail the question with an alignment error.
    #[default]
    Error,
    /// Bind the raw mention unresolved.
    KeepRaw,
}

/// `[serving]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServingConfig {
    /// Candidates fetched per side of the hybrid search.
    #[serde(default = "default_candidate_pool")]
    pub candidate_pool: usize,

    /// Bound on each LLM-backed stage, retries included.
    #[serde(default = "default_llm_stage_timeout")]
    pub llm_timeout_secs: u64,

    /// Bound on each graph-store call.
    #[serde(default = "default_store_timeout")]
    pub store_timeout_secs: u64,

    #[serde(default)]
    pub on_alignment_miss: AlignmentMissPolicy,

    /// Result rows handed to answer synthesis.
    #[serde(default = "default_max_answer_rows")]
    pub max_answer_rows: usize,
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            candidate_pool: default_candidate_pool(),
            llm_timeout_secs: default_llm_stage_timeout(),
            store_timeout_secs: default_store_timeout(),
            on_alignment_miss: AlignmentMissPolicy::default(),
            max_answer_rows: default_max_answer_rows(),
        }
    }
}

fn default_candidate_pool() -> usize {
    10
}
fn default_llm_stage_timeout() -> u64 {
    120
}
fn default_store_timeout() -> u64 {
    15
}
fn default_max_answer_rows() -> usize {
    50
}

impl ServingConfig {
    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.medgraph/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| MedGraphError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.medgraph/medgraph.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| MedGraphError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        MedGraphError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| MedGraphError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| MedGraphError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| MedGraphError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Reject values that would only fail later, deep inside a request.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    for (section, base_url) in [
        ("llm", &config.llm.base_url),
        ("embedding", &config.embedding.base_url),
    ] {
        url::Url::parse(base_url).map_err(|e| {
            MedGraphError::config(format!("[{section}] base_url '{base_url}' is invalid: {e}"))
        })?;
    }
    if config.serving.candidate_pool == 0 {
        return Err(MedGraphError::config(
            "[serving] candidate_pool must be at least 1",
        ));
    }
    if config.embedding.batch_size == 0 {
        return Err(MedGraphError::config(
            "[embedding] batch_size must be at least 1",
        ));
    }
    Ok(())
}

/// Check that the env var named by `var_name` is set and non-empty; return its value.
pub fn resolve_api_key(var_name: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(MedGraphError::config(format!(
            "API key not found. Set the {var_name} environment variable."
        ))),
    }
}

/// Check that the LLM API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    resolve_api_key(&config.llm.api_key_env).map(|_| ())
}
