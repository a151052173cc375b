//! opengov CLI — government-publication ingestion and feed pipeline.
//!
//! Fetches Federal Register documents, canonicalizes them, enriches them
//! with AI analysis, and materializes a denormalized feed table.

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
