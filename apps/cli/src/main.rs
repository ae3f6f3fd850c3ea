//! medgraph CLI: build the medical knowledge graph and ask it questions.
//!
//! Ingests JSON Lines disease records into a local graph store and answers
//! natural-language questions through an LLM-backed retrieval pipeline.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
