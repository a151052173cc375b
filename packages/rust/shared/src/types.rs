//! Core domain types for the opengov document pipeline.
//!
//! One real-world document flows through three records:
//! [`RawDocument`] (verbatim upstream capture) → [`PolicyDocument`]
//! (canonical, de-duplicated) → [`FeedEntry`] (denormalized projection).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Derive the canonical unique key for a document.
///
/// The key is stable across re-fetches: the same upstream document always
/// maps to the same `policy_documents` row.
pub fn unique_key(source_key: &str, document_number: &str) -> String {
    format!("{source_key}:{document_number}")
}

// ---------------------------------------------------------------------------
// ImpactScore
// ---------------------------------------------------------------------------

/// Categorical impact rating assigned by the analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpactScore {
    /// Routine bureaucratic update.
    Low,
    /// Noteworthy policy change.
    Medium,
    /// Major news affecting many people.
    High,
}

impl ImpactScore {
    /// Storage representation (TEXT column value).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Parse a storage/API value. Returns `None` for anything unrecognized.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

impl std::fmt::Display for ImpactScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RawDocument
// ---------------------------------------------------------------------------

/// Immutable staging record of one upstream fetch.
///
/// `(source_key, external_id)` is globally unique; re-fetching the same
/// upstream document never creates a second row. The first-seen payload is
/// authoritative and is never overwritten (audit trail).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDocument {
    /// Row id.
    pub id: i64,
    /// Identifies the upstream system, e.g. `"federal_register"`.
    pub source_key: String,
    /// The upstream system's own document identifier.
    pub external_id: String,
    /// The raw upstream response for this document, stored verbatim as JSON text.
    pub payload: String,
    /// When the fetcher retrieved this payload.
    pub fetched_at: DateTime<Utc>,
    /// Set exactly once by canonicalization; null while unprocessed.
    pub linked_document_id: Option<i64>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// PolicyDocument
// ---------------------------------------------------------------------------

/// The authoritative, de-duplicated representation of one real-world
/// document, independent of how many times it was re-fetched.
///
/// Identity/content fields are owned by canonicalization and overwritten on
/// every upsert. The derived fields (`summary`, `key_points`,
/// `impact_score`, `political_score`) are owned by enrichment and are
/// monotonic: once non-null they are never cleared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub id: i64,
    /// `source_key + ":" + document_number`, globally unique.
    pub unique_key: String,
    /// Upstream's stable business identifier.
    pub document_number: String,
    pub title: String,
    pub agency: Option<String>,
    pub source_url: String,
    pub published_at: DateTime<Utc>,
    pub document_type: Option<String>,
    pub pdf_url: Option<String>,
    // Derived fields, filled by enrichment.
    pub summary: Option<String>,
    pub key_points: Option<Vec<String>>,
    pub impact_score: Option<ImpactScore>,
    pub political_score: Option<i32>,
    /// Set at most once, by the first materialization. A denormalized
    /// "have I been materialized" cache, not an ownership edge.
    pub feed_entry_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PolicyDocument {
    /// True when every derived field is populated and the document is a
    /// candidate for materialization.
    pub fn is_fully_enriched(&self) -> bool {
        self.summary.is_some()
            && self.key_points.is_some()
            && self.impact_score.is_some()
            && self.political_score.is_some()
    }

    /// True when at least one derived field is still null.
    pub fn needs_enrichment(&self) -> bool {
        !self.is_fully_enriched()
    }
}

/// Identity/content fields written by canonicalization.
///
/// Enrichment fields are deliberately absent: the canonicalization upsert
/// must never touch them.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalFields {
    pub unique_key: String,
    pub document_number: String,
    pub title: String,
    pub agency: Option<String>,
    pub source_url: String,
    pub published_at: DateTime<Utc>,
    pub document_type: Option<String>,
    pub pdf_url: Option<String>,
}

/// The subset of derived fields produced by one analyzer call.
///
/// Any field may be absent (partial success). Applying a patch only fills
/// fields that are currently null on the document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnrichmentPatch {
    pub summary: Option<String>,
    pub key_points: Option<Vec<String>>,
    pub impact_score: Option<ImpactScore>,
    pub political_score: Option<i32>,
}

impl EnrichmentPatch {
    /// A patch with no usable field at all.
    pub fn is_empty(&self) -> bool {
        self.summary.is_none()
            && self.key_points.is_none()
            && self.impact_score.is_none()
            && self.political_score.is_none()
    }
}

// ---------------------------------------------------------------------------
// FeedEntry
// ---------------------------------------------------------------------------

/// Denormalized, read-optimized projection for the public feed.
///
/// At most one per policy document; always created or overwritten in full,
/// never partially updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedEntry {
    pub id: i64,
    /// Owning reference, unique.
    pub policy_document_id: i64,
    pub title: String,
    pub short_text: String,
    pub key_points: Vec<String>,
    pub political_score: Option<i32>,
    pub impact_score: Option<ImpactScore>,
    pub source_url: String,
    pub published_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// DocumentError
// ---------------------------------------------------------------------------

/// A per-document failure inside a batch.
///
/// Stages collect these instead of aborting: partial progress is always
/// preserved, and every reported document is retryable by re-running the
/// stage (except malformed payloads, which stay unlinked for inspection).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentError {
    /// What the failing record is: a raw row id, a unique key, etc.
    pub reference: String,
    /// Human-readable cause.
    pub message: String,
}

impl DocumentError {
    pub fn new(reference: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_key_format() {
        assert_eq!(
            unique_key("federal_register", "2025-01234"),
            "federal_register:2025-01234"
        );
    }

    #[test]
    fn impact_score_roundtrip() {
        for score in [ImpactScore::Low, ImpactScore::Medium, ImpactScore::High] {
            assert_eq!(ImpactScore::parse(score.as_str()), Some(score));
        }
        assert_eq!(ImpactScore::parse("severe"), None);
        assert_eq!(ImpactScore::parse(""), None);
    }

    #[test]
    fn impact_score_serde_lowercase() {
        let json = serde_json::to_string(&ImpactScore::High).unwrap();
        assert_eq!(json, r#""high""#);
        let parsed: ImpactScore = serde_json::from_str(r#""medium""#).unwrap();
        assert_eq!(parsed, ImpactScore::Medium);
    }

    #[test]
    fn fully_enriched_requires_every_derived_field() {
        let mut doc = PolicyDocument {
            id: 1,
            unique_key: "federal_register:2025-01234".into(),
            document_number: "2025-01234".into(),
            title: "Notice X".into(),
            agency: None,
            source_url: "https://example.gov/doc".into(),
            published_at: Utc::now(),
            document_type: None,
            pdf_url: None,
            summary: Some("S".into()),
            key_points: Some(vec!["a".into()]),
            impact_score: Some(ImpactScore::Low),
            political_score: None,
            feed_entry_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(doc.needs_enrichment());

        doc.political_score = Some(0);
        assert!(doc.is_fully_enriched());
    }

    #[test]
    fn empty_patch_detection() {
        assert!(EnrichmentPatch::default().is_empty());
        let patch = EnrichmentPatch {
            summary: Some("S".into()),
            ..Default::default()
        };
        assert!(!patch.is_empty());
    }
}
