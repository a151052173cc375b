//! Canonicalization stage: parse raw payloads into canonical documents.
//!
//! Each unlinked raw row is parsed as a Federal Register result object,
//! projected onto the canonical identity fields, upserted by `unique_key`,
//! and linked back to its raw row. A payload that fails to parse is
//! reported and left unlinked; it never blocks the rest of the batch.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use tracing::{info, instrument, warn};

use opengov_shared::{CanonicalFields, DocumentError, OpenGovError, Result, unique_key};
use opengov_storage::Storage;

/// Maximum body length handed to the analyzer.
const MAX_BODY_CHARS: usize = 1000;

/// Summary of one canonicalization run.
#[derive(Debug, Clone, Default)]
pub struct CanonicalizeReport {
    /// Raw rows examined.
    pub processed: usize,
    /// Raw rows linked to a canonical document.
    pub linked: usize,
    /// Rows whose payload could not be canonicalized, left unlinked.
    pub errors: Vec<DocumentError>,
}

/// The subset of a Federal Register result the pipeline reads.
///
/// Everything else in the payload is carried opaquely in the raw row; this
/// struct only names what canonicalization and enrichment project out.
#[derive(Debug, Deserialize)]
pub(crate) struct RegistryDocument {
    pub document_number: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type")]
    pub document_type: Option<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub excerpts: Option<String>,
    #[serde(default)]
    pub html_url: String,
    pub publication_date: Option<String>,
    pub pdf_url: Option<String>,
    #[serde(default)]
    pub agencies: Vec<RegistryAgency>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RegistryAgency {
    #[serde(default)]
    pub name: String,
}

impl RegistryDocument {
    pub fn parse(payload: &str) -> Result<Self> {
        serde_json::from_str(payload)
            .map_err(|e| OpenGovError::payload(format!("malformed registry payload: {e}")))
    }

    /// Body text for analysis: excerpts when present, otherwise the
    /// abstract, truncated to a bounded length.
    pub fn body_text(&self) -> String {
        let text = match &self.excerpts {
            Some(excerpts) if !excerpts.is_empty() => excerpts.as_str(),
            _ => self.abstract_text.as_deref().unwrap_or(""),
        };
        text.chars().take(MAX_BODY_CHARS).collect()
    }

    fn primary_agency(&self) -> Option<String> {
        self.agencies
            .first()
            .map(|a| a.name.clone())
            .filter(|name| !name.is_empty())
    }

    fn published_at(&self) -> Result<DateTime<Utc>> {
        let raw = self
            .publication_date
            .as_deref()
            .ok_or_else(|| OpenGovError::payload("missing publication_date"))?;
        let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|e| OpenGovError::payload(format!("invalid publication_date {raw:?}: {e}")))?;
        Ok(date
            .and_hms_opt(0, 0, 0)
            .unwrap_or_default()
            .and_utc())
    }
}

/// Project a raw payload onto canonical identity fields.
///
/// The raw row's `external_id` is authoritative for identity; the payload's
/// own `document_number` only has to agree with it when present.
pub(crate) fn canonical_fields(
    source_key: &str,
    external_id: &str,
    payload: &str,
) -> Result<CanonicalFields> {
    let doc = RegistryDocument::parse(payload)?;

    if let Some(number) = doc.document_number.as_deref() {
        if number != external_id {
            return Err(OpenGovError::payload(format!(
                "payload document_number {number:?} does not match external id {external_id:?}"
            )));
        }
    }

    Ok(CanonicalFields {
        unique_key: unique_key(source_key, external_id),
        document_number: external_id.to_string(),
        title: doc.title.clone(),
        agency: doc.primary_agency(),
        source_url: doc.html_url.clone(),
        published_at: doc.published_at()?,
        document_type: doc.document_type.clone(),
        pdf_url: doc.pdf_url.clone(),
    })
}

/// Canonicalize unlinked raw rows in batches of `batch_limit` until none
/// remain (failed rows are skipped and reported, not retried within the
/// run).
#[instrument(skip_all, fields(batch_limit = batch_limit))]
pub async fn canonicalize(storage: &Storage, batch_limit: u32) -> Result<CanonicalizeReport> {
    let mut report = CanonicalizeReport::default();
    let mut failed_ids = std::collections::HashSet::new();

    loop {
        // Failed rows stay unlinked at the head of the FIFO, so widen the
        // fetch window to keep reaching fresh rows past them.
        let fetch = batch_limit + failed_ids.len() as u32;
        let batch = storage.list_unlinked_raw(fetch).await?;

        let mut progressed = false;
        for raw in batch {
            if failed_ids.contains(&raw.id) {
                continue;
            }
            report.processed += 1;
            progressed = true;

            match canonical_fields(&raw.source_key, &raw.external_id, &raw.payload) {
                Ok(fields) => {
                    storage.upsert_canonical_and_link(raw.id, &fields).await?;
                    report.linked += 1;
                }
                Err(e) => {
                    let reference = unique_key(&raw.source_key, &raw.external_id);
                    warn!(%reference, error = %e, "canonicalization failed, leaving row unlinked");
                    failed_ids.insert(raw.id);
                    report.errors.push(DocumentError::new(reference, e.to_string()));
                }
            }
        }

        if !progressed {
            break;
        }
    }

    info!(
        processed = report.processed,
        linked = report.linked,
        errors = report.errors.len(),
        "canonicalization complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(number: &str) -> String {
        serde_json::json!({
            "document_number": number,
            "title": "A Notice",
            "type": "Notice",
            "abstract": "The abstract.",
            "excerpts": "The excerpts.",
            "html_url": "https://example.gov/d/1",
            "publication_date": "2025-01-15",
            "pdf_url": "https://example.gov/d/1.pdf",
            "agencies": [{"name": "Department of Examples"}, {"name": "Second Agency"}]
        })
        .to_string()
    }

    #[test]
    fn projects_canonical_fields() {
        let fields =
            canonical_fields("federal_register", "2025-00001", &payload("2025-00001")).unwrap();
        assert_eq!(fields.unique_key, "federal_register:2025-00001");
        assert_eq!(fields.document_number, "2025-00001");
        assert_eq!(fields.title, "A Notice");
        assert_eq!(fields.agency.as_deref(), Some("Department of Examples"));
        assert_eq!(fields.source_url, "https://example.gov/d/1");
        assert_eq!(fields.published_at.to_rfc3339(), "2025-01-15T00:00:00+00:00");
        assert_eq!(fields.document_type.as_deref(), Some("Notice"));
        assert_eq!(fields.pdf_url.as_deref(), Some("https://example.gov/d/1.pdf"));
    }

    #[test]
    fn rejects_mismatched_document_number() {
        let err = canonical_fields("federal_register", "2025-99999", &payload("2025-00001"))
            .expect_err("should fail");
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn rejects_malformed_payload() {
        assert!(canonical_fields("federal_register", "x", "not json").is_err());
        assert!(canonical_fields("federal_register", "x", r#"{"title": "no date"}"#).is_err());
        assert!(
            canonical_fields(
                "federal_register",
                "x",
                r#"{"publication_date": "January 15"}"#
            )
            .is_err()
        );
    }

    #[test]
    fn body_prefers_excerpts_over_abstract() {
        let doc = RegistryDocument::parse(&payload("n")).unwrap();
        assert_eq!(doc.body_text(), "The excerpts.");

        let doc = RegistryDocument::parse(
            r#"{"abstract": "Only the abstract.", "publication_date": "2025-01-15"}"#,
        )
        .unwrap();
        assert_eq!(doc.body_text(), "Only the abstract.");
    }

    #[test]
    fn body_is_truncated() {
        let long = "x".repeat(5000);
        let doc = RegistryDocument::parse(
            &serde_json::json!({"excerpts": long, "publication_date": "2025-01-15"}).to_string(),
        )
        .unwrap();
        assert_eq!(doc.body_text().len(), MAX_BODY_CHARS);
    }
}
