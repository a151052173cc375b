//! AI document analysis.
//!
//! The [`DocumentAnalyzer`] trait turns a document's title, body text, and
//! agency into a [`DocumentAnalysis`]: a short summary, key points, an
//! impact rating, and a political-lean score. Every output field is
//! optional — a malformed or partial model response yields a partial
//! analysis rather than an error, and the enrichment stage fills whatever
//! came back.

mod mock;
mod xai;

use std::sync::Arc;

use async_trait::async_trait;

use opengov_shared::{AnalyzerConfig, EnrichmentPatch, ImpactScore, OpenGovError, Result};

pub use mock::MockAnalyzer;
pub use xai::XaiAnalyzer;

/// Input to one analysis call.
#[derive(Debug, Clone)]
pub struct AnalysisInput {
    pub title: String,
    /// Abstract or excerpt text from the raw payload. May be empty; the
    /// title alone must then carry the analysis.
    pub body: String,
    pub agency: Option<String>,
}

/// Result of one analysis call. Fields the model omitted, or returned in an
/// unrecognized shape, are `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentAnalysis {
    pub summary: Option<String>,
    pub key_points: Option<Vec<String>>,
    pub impact_score: Option<ImpactScore>,
    pub political_score: Option<i32>,
}

impl DocumentAnalysis {
    pub fn is_empty(&self) -> bool {
        self.summary.is_none()
            && self.key_points.is_none()
            && self.impact_score.is_none()
            && self.political_score.is_none()
    }

    /// Convert into the enrichment patch applied to storage.
    pub fn into_patch(self) -> EnrichmentPatch {
        EnrichmentPatch {
            summary: self.summary,
            key_points: self.key_points,
            impact_score: self.impact_score,
            political_score: self.political_score,
        }
    }
}

/// A backend that analyzes one document at a time.
#[async_trait]
pub trait DocumentAnalyzer: Send + Sync {
    async fn analyze(&self, input: &AnalysisInput) -> Result<DocumentAnalysis>;

    /// Backend name, for logging.
    fn name(&self) -> &'static str;
}

/// Build the analyzer selected by configuration: the deterministic mock, or
/// the live API backend (which needs its key in the configured env var).
pub fn build_analyzer(config: &AnalyzerConfig) -> Result<Arc<dyn DocumentAnalyzer>> {
    if config.mock {
        return Ok(Arc::new(MockAnalyzer::new()));
    }
    let api_key = std::env::var(&config.api_key_env).map_err(|_| {
        OpenGovError::config(format!(
            "analyzer API key not set (expected in ${})",
            config.api_key_env
        ))
    })?;
    Ok(Arc::new(XaiAnalyzer::new(config, api_key)?))
}

/// Extract the JSON object from a model response, tolerating markdown code
/// fences and surrounding prose.
pub(crate) fn extract_json(content: &str) -> Result<&str> {
    let mut trimmed = content.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        trimmed = rest.trim_start();
        if trimmed.get(..4).is_some_and(|p| p.eq_ignore_ascii_case("json")) {
            trimmed = trimmed[4..].trim_start();
        }
        if let Some(rest) = trimmed.strip_suffix("```") {
            trimmed = rest.trim_end();
        }
    }

    let start = trimmed.find('{');
    let end = trimmed.rfind('}');
    match (start, end) {
        (Some(start), Some(end)) if end > start => Ok(&trimmed[start..=end]),
        _ => Err(OpenGovError::payload("no JSON object found in response")),
    }
}

/// Raw analysis object as the model is asked to emit it. Lenient on types:
/// anything that doesn't parse is simply dropped.
#[derive(Debug, serde::Deserialize)]
pub(crate) struct RawAnalysis {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    keypoints: Option<Vec<String>>,
    #[serde(default)]
    impact_score: Option<String>,
    #[serde(default)]
    political_score: Option<f64>,
}

/// Sanitize a raw model analysis into a [`DocumentAnalysis`].
///
/// The political score is clamped to [-100, 100]. An unrecognized impact
/// label is dropped rather than coerced, so the document stays a candidate
/// for a later, better analysis of that field.
pub(crate) fn sanitize(raw: RawAnalysis) -> DocumentAnalysis {
    DocumentAnalysis {
        summary: raw.summary.filter(|s| !s.trim().is_empty()),
        key_points: raw.keypoints.filter(|p| !p.is_empty()),
        impact_score: raw.impact_score.as_deref().and_then(ImpactScore::parse),
        political_score: raw
            .political_score
            .map(|v| (v.round() as i32).clamp(-100, 100)),
    }
}

/// Parse a complete model response body into an analysis.
pub(crate) fn parse_response(content: &str) -> Result<DocumentAnalysis> {
    let json = extract_json(content)?;
    let raw: RawAnalysis = serde_json::from_str(json)
        .map_err(|e| OpenGovError::payload(format!("analysis is not valid JSON: {e}")))?;
    Ok(sanitize(raw))
}
