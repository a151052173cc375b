//! Raw ingestion stage: fetch upstream documents and capture them verbatim.

use tracing::{info, instrument};

use opengov_registry::{FetchedDocument, RegistryClient};
use opengov_shared::Result;
use opengov_storage::Storage;

/// Source key for documents fetched from the Federal Register API.
pub const FEDERAL_REGISTER_SOURCE: &str = "federal_register";

/// Summary of one ingestion run.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    /// Documents returned by the upstream fetch.
    pub processed: usize,
    /// New raw rows created.
    pub inserted: usize,
    /// Documents already captured (payload left untouched).
    pub skipped: usize,
}

/// Fetch documents from the registry and store each as a raw capture.
///
/// A document already present under `(source_key, external_id)` is skipped,
/// so overlapping date windows and re-runs are free.
#[instrument(skip_all, fields(lookback_days = lookback_days))]
pub async fn ingest(
    storage: &Storage,
    registry: &RegistryClient,
    lookback_days: u32,
) -> Result<IngestReport> {
    let documents = registry.fetch_since(lookback_days).await?;
    let report = store_fetched(storage, FEDERAL_REGISTER_SOURCE, &documents).await?;

    info!(
        processed = report.processed,
        inserted = report.inserted,
        skipped = report.skipped,
        "ingestion complete"
    );
    Ok(report)
}

/// Store a batch of fetched documents under `source_key`.
pub async fn store_fetched(
    storage: &Storage,
    source_key: &str,
    documents: &[FetchedDocument],
) -> Result<IngestReport> {
    let mut report = IngestReport {
        processed: documents.len(),
        ..Default::default()
    };

    for doc in documents {
        let inserted = storage
            .insert_raw_document(source_key, &doc.external_id, &doc.payload, doc.fetched_at)
            .await?;
        if inserted {
            report.inserted += 1;
        } else {
            report.skipped += 1;
        }
    }

    Ok(report)
}
