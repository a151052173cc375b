//! Enrichment stage: fill missing derived fields via the analyzer.
//!
//! Candidates are documents with at least one null derived field. Analyzer
//! calls run concurrently under a semaphore; patches are applied serially
//! and only ever fill nulls, so a re-run after a partial result tops up the
//! missing fields without disturbing the ones already set.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

use opengov_analyzer::{AnalysisInput, DocumentAnalysis, DocumentAnalyzer};
use opengov_shared::{DocumentError, OpenGovError, Result};
use opengov_storage::{EnrichCandidate, Storage};

use crate::canonicalize::RegistryDocument;

/// Tuning for one enrichment run.
#[derive(Debug, Clone)]
pub struct EnrichOptions {
    pub batch_limit: u32,
    pub concurrency: u32,
    /// Per-document analyzer deadline.
    pub timeout: Duration,
}

impl Default for EnrichOptions {
    fn default() -> Self {
        Self {
            batch_limit: 200,
            concurrency: 4,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Summary of one enrichment run.
#[derive(Debug, Clone, Default)]
pub struct EnrichReport {
    /// Candidates examined.
    pub processed: usize,
    /// Documents that received at least one new derived field.
    pub enriched: usize,
    /// Analyzer failures; the documents stay candidates for the next run.
    pub errors: Vec<DocumentError>,
}

/// Build the analyzer input for a candidate.
fn analysis_input(candidate: &EnrichCandidate) -> AnalysisInput {
    let body = candidate
        .payload
        .as_deref()
        .and_then(|p| RegistryDocument::parse(p).ok())
        .map(|doc| doc.body_text())
        .unwrap_or_default();

    AnalysisInput {
        title: candidate.document.title.clone(),
        body,
        agency: candidate.document.agency.clone(),
    }
}

/// Run the analyzer over one candidate with a deadline.
async fn analyze_one(
    analyzer: Arc<dyn DocumentAnalyzer>,
    input: AnalysisInput,
    timeout: Duration,
) -> Result<DocumentAnalysis> {
    match tokio::time::timeout(timeout, analyzer.analyze(&input)).await {
        Ok(result) => result,
        Err(_) => Err(OpenGovError::Analysis(format!(
            "analysis timed out after {}s",
            timeout.as_secs()
        ))),
    }
}

/// Enrich candidate documents in batches until none remain. Each candidate
/// is analyzed at most once per run; one that is still incomplete afterwards
/// stays a candidate for the next run.
#[instrument(skip_all, fields(batch_limit = options.batch_limit, concurrency = options.concurrency))]
pub async fn enrich(
    storage: &Storage,
    analyzer: &Arc<dyn DocumentAnalyzer>,
    options: &EnrichOptions,
) -> Result<EnrichReport> {
    let mut report = EnrichReport::default();
    let mut seen_ids: HashSet<i64> = HashSet::new();
    let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1) as usize));

    loop {
        // A failed or partially-analyzed candidate keeps matching the
        // selection, so widen the fetch window to keep reaching fresh
        // documents past the ones this run already handled.
        let fetch = options.batch_limit + seen_ids.len() as u32;
        let batch: Vec<EnrichCandidate> = storage
            .list_needing_enrichment(fetch)
            .await?
            .into_iter()
            .filter(|c| !seen_ids.contains(&c.document.id))
            .collect();

        if batch.is_empty() {
            break;
        }

        let mut handles = Vec::with_capacity(batch.len());
        for candidate in batch {
            let analyzer = Arc::clone(analyzer);
            let semaphore = Arc::clone(&semaphore);
            let input = analysis_input(&candidate);
            let timeout = options.timeout;
            let doc_id = candidate.document.id;
            let reference = candidate.document.unique_key.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                let result = analyze_one(analyzer, input, timeout).await;
                (doc_id, reference, result)
            }));
        }

        for handle in handles {
            let (doc_id, reference, result) = handle
                .await
                .map_err(|e| OpenGovError::Analysis(format!("analysis task panicked: {e}")))?;
            report.processed += 1;
            seen_ids.insert(doc_id);

            let analysis = match result {
                Ok(analysis) if !analysis.is_empty() => analysis,
                Ok(_) => {
                    warn!(%reference, "analyzer returned an empty analysis");
                    report
                        .errors
                        .push(DocumentError::new(reference, "empty analysis"));
                    continue;
                }
                Err(e) => {
                    warn!(%reference, error = %e, "analysis failed");
                    report.errors.push(DocumentError::new(reference, e.to_string()));
                    continue;
                }
            };

            storage.apply_enrichment(doc_id, &analysis.into_patch()).await?;
            report.enriched += 1;
        }
    }

    info!(
        processed = report.processed,
        enriched = report.enriched,
        errors = report.errors.len(),
        "enrichment complete"
    );
    Ok(report)
}
