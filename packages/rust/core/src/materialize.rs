//! Materialization stage: project enriched documents into the feed table.

use tracing::{info, instrument};

use opengov_shared::Result;
use opengov_storage::Storage;

/// Summary of one materialization run.
#[derive(Debug, Clone, Default)]
pub struct MaterializeReport {
    /// Documents examined.
    pub processed: usize,
    /// Feed entries created or refreshed.
    pub upserted: usize,
}

/// Materialize fully-enriched documents whose feed entry is missing or
/// stale, in batches of `batch_limit` until none remain.
#[instrument(skip_all, fields(batch_limit = batch_limit))]
pub async fn materialize(storage: &Storage, batch_limit: u32) -> Result<MaterializeReport> {
    let mut report = MaterializeReport::default();

    loop {
        let batch = storage.list_needing_materialization(batch_limit).await?;
        if batch.is_empty() {
            break;
        }

        for doc in &batch {
            report.processed += 1;
            storage.materialize_document(doc).await?;
            report.upserted += 1;
        }
    }

    info!(
        processed = report.processed,
        upserted = report.upserted,
        "materialization complete"
    );
    Ok(report)
}
