//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use medgraph_core::{
    BackfillProgress, ChatService, IngestProgress, IngestReport, LlmAssistant, ServiceContext,
    backfill_embeddings, ingest_file,
};
use medgraph_llm::{ChatClient, Embedder, HttpEmbedder};
use medgraph_shared::{
    AppConfig, IdStrategy, Question, RelationKind, init_config, load_config, load_config_from,
    validate_api_key,
};
use medgraph_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// medgraph: a medical knowledge graph you can ask questions.
#[derive(Parser)]
#[command(
    name = "medgraph",
    version,
    about = "Build a medical knowledge graph from disease records and answer questions over it.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.medgraph/medgraph.toml).
    #[arg(long, global = true, env = "MEDGRAPH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Graph database file, overriding `[store] path`.
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Node id derivation.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum IdStrategyArg {
    Sequential,
    ContentHash,
}

impl From<IdStrategyArg> for IdStrategy {
    fn from(arg: IdStrategyArg) -> Self {
        match arg {
            IdStrategyArg::Sequential => IdStrategy::Sequential,
            IdStrategyArg::ContentHash => IdStrategy::ContentHash,
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Load a JSON Lines file of disease records into the graph.
    Ingest {
        /// Dataset path, one record per line.
        file: PathBuf,

        /// Id strategy (defaults to `[ingest] id_strategy`).
        #[arg(long, value_enum)]
        id_strategy: Option<IdStrategyArg>,

        /// Print the run report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Embed node texts that have no vector for the configured model yet.
    Index,

    /// Ask one question.
    Ask {
        /// The question.
        message: String,

        /// Print the reply as an `Answer` JSON object.
        #[arg(long)]
        json: bool,
    },

    /// Interactive question loop on stdin.
    Chat,

    /// Show node and relation counts.
    Stats,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "medgraph=info",
        1 => "medgraph=debug",
        _ => "medgraph=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // Logs go to stderr so `ask --json` output stays clean.
    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    if let Command::Config { action } = &cli.command {
        return match action {
            ConfigAction::Init => cmd_config_init(cli.config.as_deref()),
            ConfigAction::Show => cmd_config_show(cli.config.as_deref()),
        };
    }

    let config = resolve_config(cli.config.as_deref())?;
    let db_path = cli
        .db
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.store.path));

    match cli.command {
        Command::Ingest {
            file,
            id_strategy,
            json,
        } => {
            let strategy = id_strategy
                .map(IdStrategy::from)
                .unwrap_or(config.ingest.id_strategy);
            cmd_ingest(&db_path, &file, strategy, json).await
        }
        Command::Index => cmd_index(&config, &db_path).await,
        Command::Ask { message, json } => cmd_ask(&config, &db_path, &message, json).await,
        Command::Chat => cmd_chat(&config, &db_path).await,
        Command::Stats => cmd_stats(&db_path).await,
        Command::Config { .. } => Ok(()),
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    })
}

// ---------------------------------------------------------------------------
// Ingestion
// ---------------------------------------------------------------------------

async fn cmd_ingest(db_path: &Path, file: &Path, strategy: IdStrategy, json: bool) -> Result<()> {
    info!(file = %file.display(), db = %db_path.display(), ?strategy, "ingesting dataset");

    let storage = Storage::open(db_path).await?;
    let reporter = CliProgress::new()?;
    let report = ingest_file(&storage, file, strategy, &reporter).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!();
    println!("  Ingestion finished.");
    if let Some(run_id) = &report.run_id {
        println!("  Run:        {run_id}");
    }
    println!(
        "  Records:    {} written, {} skipped, {} seen",
        report.records_written,
        report.skipped.len(),
        report.records_seen
    );
    println!("  Nodes:      {}", report.nodes_written);
    println!(
        "  Relations:  {} new of {} submitted in {} batches",
        report.relations_created, report.relations_submitted, report.relation_batches
    );
    for skipped in &report.skipped {
        println!(
            "  skipped line {} ({}): {}",
            skipped.line,
            skipped.name.as_deref().unwrap_or("-"),
            skipped.reason
        );
    }
    for failed in &report.failed_batches {
        println!(
            "  failed batch {} ({} relations): {}",
            failed.relation, failed.relations, failed.reason
        );
    }
    println!("  Time:       {:.1}s", report.elapsed_ms as f64 / 1000.0);
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporters
// ---------------------------------------------------------------------------

/// Ingestion progress as an indicatif bar.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Result<Self> {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")?
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        bar.enable_steady_tick(Duration::from_millis(80));
        Ok(Self { bar })
    }
}

impl IngestProgress for CliProgress {
    fn phase(&self, name: &str) {
        self.bar.set_message(name.to_string());
    }

    fn record_done(&self, current: usize, total: usize) {
        self.bar.set_message(format!("Writing records [{current}/{total}]"));
    }

    fn batch_written(&self, relation: RelationKind, relations: usize) {
        self.bar
            .set_message(format!("Linking {relation} ({relations} relations)"));
    }

    fn done(&self, _report: &IngestReport) {
        self.bar.finish_and_clear();
    }
}

/// Backfill progress as a counting spinner.
struct IndexProgress {
    bar: ProgressBar,
}

impl BackfillProgress for IndexProgress {
    fn batch_done(&self, embedded: usize, pending: u64) {
        self.bar
            .set_message(format!("Embedded {embedded} nodes, {pending} pending"));
    }
}

// ---------------------------------------------------------------------------
// Embedding index
// ---------------------------------------------------------------------------

async fn cmd_index(config: &AppConfig, db_path: &Path) -> Result<()> {
    if !config.embedding.enabled {
        return Err(eyre!(
            "embeddings are disabled; set [embedding] enabled = true to build the vector index"
        ));
    }
    let embedder = HttpEmbedder::from_config(&config.embedding)?;
    let storage = Storage::open(db_path).await?;

    let bar = ProgressBar::new_spinner();
    bar.set_style(ProgressStyle::with_template("{spinner:.cyan} {msg}")?);
    bar.enable_steady_tick(Duration::from_millis(80));
    bar.set_message(format!("Embedding with {}", embedder.model()));
    let progress = IndexProgress { bar };

    let report = backfill_embeddings(
        &storage,
        &embedder,
        config.embedding.batch_size,
        &progress,
    )
    .await?;
    progress.bar.finish_and_clear();

    println!(
        "Embedded {} nodes in {} batches with {}",
        report.embedded, report.batches, report.model
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Serving
// ---------------------------------------------------------------------------

/// Wire the serving pipeline against a read-only store.
async fn build_service(config: &AppConfig, db_path: &Path) -> Result<ChatService> {
    validate_api_key(config)?;
    let storage = Arc::new(Storage::open_readonly(db_path).await?);
    let model = ChatClient::from_config(&config.llm)?;
    let assistant = Arc::new(LlmAssistant::new(Arc::new(model)));

    let embedder: Option<Arc<dyn Embedder>> = if config.embedding.enabled {
        match HttpEmbedder::from_config(&config.embedding) {
            Ok(e) if storage.count_embeddings(e.model()).await? > 0 => Some(Arc::new(e)),
            Ok(e) => {
                warn!(model = e.model(), "no stored embeddings, run `medgraph index`; using lexical alignment only");
                None
            }
            Err(e) => {
                warn!(error = %e, "embedder unavailable, using lexical alignment only");
                None
            }
        }
    } else {
        None
    };

    Ok(ChatService::new(ServiceContext {
        storage,
        assistant,
        embedder,
        serving: config.serving.clone(),
    }))
}

async fn cmd_ask(config: &AppConfig, db_path: &Path, message: &str, json: bool) -> Result<()> {
    let service = build_service(config, db_path).await?;
    let answer = service
        .respond(&Question {
            message: message.to_string(),
        })
        .await;

    if json {
        println!("{}", serde_json::to_string(&answer)?);
    } else {
        println!("{}", answer.message);
    }
    Ok(())
}

async fn cmd_chat(config: &AppConfig, db_path: &Path) -> Result<()> {
    let service = build_service(config, db_path).await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    println!("Ask a question, or type `exit` to quit.");
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        if matches!(message, "exit" | "quit") {
            break;
        }
        let reply = service.ask(message).await;
        stdout.write_all(format!("{reply}\n").as_bytes()).await?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Stats and config
// ---------------------------------------------------------------------------

async fn cmd_stats(db_path: &Path) -> Result<()> {
    let storage = Storage::open_readonly(db_path).await?;
    let stats = storage.stats().await?;

    println!("Nodes ({}):", stats.total_nodes());
    for (label, count) in &stats.nodes {
        println!("  {label:<12} {count}");
    }
    println!("Relations ({}):", stats.total_relations());
    for (kind, count) in &stats.relations {
        println!("  {kind:<14} {count}");
    }
    Ok(())
}

fn cmd_config_init(path: Option<&Path>) -> Result<()> {
    let path = match path {
        Some(p) => {
            if let Some(parent) = p.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(p, toml::to_string_pretty(&AppConfig::default())?)?;
            p.to_path_buf()
        }
        None => init_config()?,
    };
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
