//! End-to-end pipeline: ingest → canonicalize → enrich → materialize.
//!
//! Each stage drains its own backlog, so one sequential run brings the
//! database to a fixed point: running the pipeline again without new
//! upstream data changes nothing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, instrument};

use opengov_analyzer::DocumentAnalyzer;
use opengov_registry::RegistryClient;
use opengov_shared::{AppConfig, Result};
use opengov_storage::Storage;

use crate::canonicalize::{CanonicalizeReport, canonicalize};
use crate::enrich::{EnrichOptions, EnrichReport, enrich};
use crate::ingest::{IngestReport, ingest};
use crate::materialize::{MaterializeReport, materialize};

/// Tuning for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub lookback_days: u32,
    pub canonicalize_batch: u32,
    pub enrich: EnrichOptions,
    pub materialize_batch: u32,
}

impl PipelineOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            lookback_days: config.registry.lookback_days,
            canonicalize_batch: config.pipeline.canonicalize_batch,
            enrich: EnrichOptions {
                batch_limit: config.pipeline.enrich_batch,
                concurrency: config.pipeline.enrich_concurrency,
                // Leave headroom over the HTTP timeout so the client error
                // surfaces instead of the deadline.
                timeout: Duration::from_secs(config.analyzer.timeout_secs + 15),
            },
            materialize_batch: config.pipeline.materialize_batch,
        }
    }
}

/// Combined report for a full pipeline run.
#[derive(Debug, Default)]
pub struct PipelineReport {
    pub ingest: IngestReport,
    pub canonicalize: CanonicalizeReport,
    pub enrich: EnrichReport,
    pub materialize: MaterializeReport,
    pub elapsed: Duration,
}

impl PipelineReport {
    /// Total stage-level errors across the run.
    pub fn error_count(&self) -> usize {
        self.canonicalize.errors.len() + self.enrich.errors.len()
    }
}

/// Progress callback for pipeline runs.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a stage.
    fn phase(&self, name: &str);
    /// Called when a stage finishes, with items examined and items changed.
    fn stage_complete(&self, name: &str, processed: usize, changed: usize);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn stage_complete(&self, _name: &str, _processed: usize, _changed: usize) {}
}

/// Run all four stages in order.
#[instrument(skip_all, fields(lookback_days = options.lookback_days))]
pub async fn run_pipeline(
    storage: &Storage,
    registry: &RegistryClient,
    analyzer: &Arc<dyn DocumentAnalyzer>,
    options: &PipelineOptions,
    progress: &dyn ProgressReporter,
) -> Result<PipelineReport> {
    let start = Instant::now();
    let mut report = PipelineReport::default();

    progress.phase("Ingesting documents");
    report.ingest = ingest(storage, registry, options.lookback_days).await?;
    progress.stage_complete("ingest", report.ingest.processed, report.ingest.inserted);

    progress.phase("Canonicalizing");
    report.canonicalize = canonicalize(storage, options.canonicalize_batch).await?;
    progress.stage_complete(
        "canonicalize",
        report.canonicalize.processed,
        report.canonicalize.linked,
    );

    progress.phase("Enriching");
    report.enrich = enrich(storage, analyzer, &options.enrich).await?;
    progress.stage_complete("enrich", report.enrich.processed, report.enrich.enriched);

    progress.phase("Materializing");
    report.materialize = materialize(storage, options.materialize_batch).await?;
    progress.stage_complete(
        "materialize",
        report.materialize.processed,
        report.materialize.upserted,
    );

    report.elapsed = start.elapsed();
    info!(
        inserted = report.ingest.inserted,
        linked = report.canonicalize.linked,
        enriched = report.enrich.enriched,
        upserted = report.materialize.upserted,
        errors = report.error_count(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "pipeline run complete"
    );
    Ok(report)
}
