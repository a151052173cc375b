//! CLI command definitions, routing, and tracing setup.

use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use opengov_core::pipeline::{PipelineOptions, ProgressReporter};
use opengov_core::{EnrichOptions, canonicalize, enrich, ingest, materialize};
use opengov_registry::RegistryClient;
use opengov_shared::{AppConfig, expand_path, init_config, load_config, validate_api_key};
use opengov_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// opengov — government publications, canonicalized and analyzed.
#[derive(Parser)]
#[command(
    name = "opengov",
    version,
    about = "Fetch, canonicalize, analyze, and publish government documents.",
    long_about = None,
)]
pub(crate) struct Cli {
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

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Fetch recent documents and capture them as raw rows.
    Ingest {
        /// Days to look back (defaults to registry.lookback_days).
        #[arg(short, long)]
        days: Option<u32>,
    },

    /// Parse raw captures into canonical documents.
    Canonicalize {
        /// Batch size per pass.
        #[arg(short, long)]
        limit: Option<u32>,
    },

    /// Fill missing AI-derived fields on canonical documents.
    Enrich {
        /// Batch size per pass.
        #[arg(short, long)]
        limit: Option<u32>,

        /// Concurrent analyzer calls.
        #[arg(short, long)]
        concurrency: Option<u32>,
    },

    /// Project enriched documents into the feed table.
    Materialize {
        /// Batch size per pass.
        #[arg(short, long)]
        limit: Option<u32>,
    },

    /// Run all four stages end to end.
    Run {
        /// Days to look back (defaults to registry.lookback_days).
        #[arg(short, long)]
        days: Option<u32>,
    },

    /// Show pipeline backlog counts.
    Status,

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
        0 => "opengov=info",
        1 => "opengov=debug",
        _ => "opengov=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Ingest { days } => cmd_ingest(days).await,
        Command::Canonicalize { limit } => cmd_canonicalize(limit).await,
        Command::Enrich { limit, concurrency } => cmd_enrich(limit, concurrency).await,
        Command::Materialize { limit } => cmd_materialize(limit).await,
        Command::Run { days } => cmd_run(days).await,
        Command::Status => cmd_status().await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

/// Open the configured database.
async fn open_storage(config: &AppConfig) -> Result<Storage> {
    let db_path = expand_path(&config.storage.db_path)?;
    Ok(Storage::open(&db_path).await?)
}

fn enrich_options(config: &AppConfig, limit: Option<u32>, concurrency: Option<u32>) -> EnrichOptions {
    EnrichOptions {
        batch_limit: limit.unwrap_or(config.pipeline.enrich_batch),
        concurrency: concurrency.unwrap_or(config.pipeline.enrich_concurrency),
        timeout: Duration::from_secs(config.analyzer.timeout_secs + 15),
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_ingest(days: Option<u32>) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config).await?;
    let registry = RegistryClient::new(&config.registry)?;
    let days = days.unwrap_or(config.registry.lookback_days);

    info!(days, "ingesting documents");
    let progress = CliProgress::new();
    progress.phase("Fetching documents");
    let report = ingest::ingest(&storage, &registry, days).await?;
    progress.finish();

    println!();
    println!("  Ingestion complete");
    println!("  Fetched:  {}", report.processed);
    println!("  New:      {}", report.inserted);
    println!("  Existing: {}", report.skipped);
    println!();
    Ok(())
}

async fn cmd_canonicalize(limit: Option<u32>) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config).await?;
    let limit = limit.unwrap_or(config.pipeline.canonicalize_batch);

    let progress = CliProgress::new();
    progress.phase("Canonicalizing documents");
    let report = canonicalize::canonicalize(&storage, limit).await?;
    progress.finish();

    println!();
    println!("  Canonicalization complete");
    println!("  Processed: {}", report.processed);
    println!("  Linked:    {}", report.linked);
    println!("  Errors:    {}", report.errors.len());
    for error in &report.errors {
        println!("    {} — {}", error.reference, error.message);
    }
    println!();
    Ok(())
}

async fn cmd_enrich(limit: Option<u32>, concurrency: Option<u32>) -> Result<()> {
    let config = load_config()?;
    validate_api_key(&config)?;
    let storage = open_storage(&config).await?;
    let analyzer = opengov_analyzer::build_analyzer(&config.analyzer)?;
    let options = enrich_options(&config, limit, concurrency);

    info!(backend = analyzer.name(), "enriching documents");
    let progress = CliProgress::new();
    progress.phase("Analyzing documents");
    let report = enrich::enrich(&storage, &analyzer, &options).await?;
    progress.finish();

    println!();
    println!("  Enrichment complete");
    println!("  Processed: {}", report.processed);
    println!("  Enriched:  {}", report.enriched);
    println!("  Errors:    {}", report.errors.len());
    for error in &report.errors {
        println!("    {} — {}", error.reference, error.message);
    }
    println!();
    Ok(())
}

async fn cmd_materialize(limit: Option<u32>) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config).await?;
    let limit = limit.unwrap_or(config.pipeline.materialize_batch);

    let progress = CliProgress::new();
    progress.phase("Materializing feed entries");
    let report = materialize::materialize(&storage, limit).await?;
    progress.finish();

    println!();
    println!("  Materialization complete");
    println!("  Processed: {}", report.processed);
    println!("  Upserted:  {}", report.upserted);
    println!();
    Ok(())
}

async fn cmd_run(days: Option<u32>) -> Result<()> {
    let config = load_config()?;
    validate_api_key(&config)?;
    let storage = open_storage(&config).await?;
    let registry = RegistryClient::new(&config.registry)?;
    let analyzer = opengov_analyzer::build_analyzer(&config.analyzer)?;

    let mut options = PipelineOptions::from_config(&config);
    if let Some(days) = days {
        options.lookback_days = days;
    }

    info!(
        days = options.lookback_days,
        backend = analyzer.name(),
        "running full pipeline"
    );

    let progress = CliProgress::new();
    let report =
        opengov_core::run_pipeline(&storage, &registry, &analyzer, &options, &progress).await?;
    progress.finish();

    println!();
    println!("  Pipeline run complete");
    println!("  Ingested:     {} new ({} existing)", report.ingest.inserted, report.ingest.skipped);
    println!("  Linked:       {}", report.canonicalize.linked);
    println!("  Enriched:     {}", report.enrich.enriched);
    println!("  Materialized: {}", report.materialize.upserted);
    println!("  Errors:       {}", report.error_count());
    for error in report.canonicalize.errors.iter().chain(&report.enrich.errors) {
        println!("    {} — {}", error.reference, error.message);
    }
    println!("  Time:         {:.1}s", report.elapsed.as_secs_f64());
    println!();
    Ok(())
}

async fn cmd_status() -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config).await?;
    let counts = storage.counts().await?;

    println!();
    println!("  Pipeline status");
    println!("  Raw captures:        {}", counts.raw_documents);
    println!("    awaiting link:     {}", counts.unlinked_raw);
    println!("  Canonical documents: {}", counts.policy_documents);
    println!("    awaiting analysis: {}", counts.needing_enrichment);
    println!("  Feed entries:        {}", counts.feed_entries);
    println!();
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap()
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn stage_complete(&self, name: &str, processed: usize, changed: usize) {
        self.spinner
            .set_message(format!("{name}: {changed} changed ({processed} examined)"));
    }
}
