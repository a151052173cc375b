//! HTTP client for the Federal Register documents API.
//!
//! Fetches recent documents page by page over a publication-date window and
//! hands each result back as an opaque JSON payload plus the upstream
//! identifiers needed for ingestion. Parsing the payload into canonical
//! fields is the canonicalization stage's job, not this crate's.

use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use opengov_shared::{OpenGovError, RegistryConfig, Result};

/// User-Agent string for registry requests.
const USER_AGENT: &str = concat!("opengov/", env!("CARGO_PKG_VERSION"));

/// Delay between paginated requests, to be polite to the upstream API.
const PAGE_DELAY: Duration = Duration::from_millis(500);

/// One upstream document as fetched, ready for raw ingestion.
///
/// `payload` is the result object re-serialized verbatim; the document
/// number doubles as the external id because the upstream API guarantees
/// its uniqueness per document.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub external_id: String,
    pub payload: String,
    pub fetched_at: DateTime<Utc>,
}

/// Paged response envelope from the `/documents` endpoint.
#[derive(Debug, Deserialize)]
struct DocumentsPage {
    #[serde(default)]
    count: u64,
    #[serde(default)]
    total_pages: u32,
    #[serde(default)]
    results: Vec<serde_json::Value>,
}

/// Client for the Federal Register documents API.
pub struct RegistryClient {
    base_url: String,
    per_page: u32,
    max_pages: u32,
    client: Client,
}

impl RegistryClient {
    /// Create a new client from configuration.
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| OpenGovError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            per_page: config.per_page,
            max_pages: config.max_pages,
            client,
        })
    }

    /// Fetch all documents published within the last `lookback_days` days.
    ///
    /// Pages through results until a short page, an empty page, or the
    /// configured page cap. Results missing a `document_number` are skipped
    /// with a warning, as they cannot be identified for ingestion.
    #[instrument(skip(self))]
    pub async fn fetch_since(&self, lookback_days: u32) -> Result<Vec<FetchedDocument>> {
        let end_date = Utc::now().date_naive();
        let start_date = end_date - ChronoDuration::days(i64::from(lookback_days));

        info!(%start_date, %end_date, "fetching registry documents");

        let mut documents = Vec::new();

        for page in 1..=self.max_pages {
            let page_data = self.fetch_page(&start_date.to_string(), &end_date.to_string(), page).await?;
            let page_len = page_data.results.len();
            debug!(
                page,
                results = page_len,
                total_pages = page_data.total_pages,
                count = page_data.count,
                "fetched registry page"
            );

            let fetched_at = Utc::now();
            for result in page_data.results {
                let Some(document_number) = result
                    .get("document_number")
                    .and_then(|v| v.as_str())
                    .filter(|s| !s.is_empty())
                else {
                    warn!("skipping result with missing document_number");
                    continue;
                };
                documents.push(FetchedDocument {
                    external_id: document_number.to_string(),
                    payload: result.to_string(),
                    fetched_at,
                });
            }

            if page_len < self.per_page as usize {
                break;
            }
            tokio::time::sleep(PAGE_DELAY).await;
        }

        info!(documents = documents.len(), "registry fetch complete");
        Ok(documents)
    }

    async fn fetch_page(&self, gte: &str, lte: &str, page: u32) -> Result<DocumentsPage> {
        let url = format!("{}/documents", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("per_page", self.per_page.to_string()),
                ("page", page.to_string()),
                ("filter[publication_date][gte]", gte.to_string()),
                ("filter[publication_date][lte]", lte.to_string()),
            ])
            .send()
            .await
            .map_err(|e| OpenGovError::Network(format!("registry request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OpenGovError::Network(format!(
                "registry returned {status}: {body}"
            )));
        }

        response
            .json::<DocumentsPage>()
            .await
            .map_err(|e| OpenGovError::payload(format!("invalid registry response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: &str, per_page: u32, max_pages: u32) -> RegistryConfig {
        RegistryConfig {
            base_url: base_url.to_string(),
            per_page,
            max_pages,
            lookback_days: 7,
            timeout_secs: 5,
        }
    }

    fn doc(n: u32) -> serde_json::Value {
        json!({
            "document_number": format!("2025-{n:05}"),
            "title": format!("Document {n}"),
            "type": "Notice",
            "abstract": "An abstract.",
            "html_url": format!("https://example.gov/d/{n}"),
            "publication_date": "2025-01-15",
            "agencies": [{"name": "Department of Examples"}]
        })
    }

    #[tokio::test]
    async fn fetches_single_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/documents"))
            .and(query_param("per_page", "10"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "count": 2,
                "total_pages": 1,
                "results": [doc(1), doc(2)]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = RegistryClient::new(&test_config(&server.uri(), 10, 5)).unwrap();
        let documents = client.fetch_since(7).await.expect("fetch");

        assert_eq!(documents.len(), 2);
        assert_eq!(documents[0].external_id, "2025-00001");
        // Payload is the full result object, preserved for canonicalization.
        let parsed: serde_json::Value = serde_json::from_str(&documents[0].payload).unwrap();
        assert_eq!(parsed["title"], "Document 1");
    }

    #[tokio::test]
    async fn paginates_until_short_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/documents"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "count": 3,
                "total_pages": 2,
                "results": [doc(1), doc(2)]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/documents"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "count": 3,
                "total_pages": 2,
                "results": [doc(3)]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = RegistryClient::new(&test_config(&server.uri(), 2, 5)).unwrap();
        let documents = client.fetch_since(1).await.expect("fetch");
        assert_eq!(documents.len(), 3);
        assert_eq!(documents[2].external_id, "2025-00003");
    }

    #[tokio::test]
    async fn respects_page_cap() {
        let server = MockServer::start().await;
        // Every page comes back full, so only the cap stops us.
        Mock::given(method("GET"))
            .and(path("/documents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "count": 100,
                "total_pages": 50,
                "results": [doc(1)]
            })))
            .expect(2)
            .mount(&server)
            .await;

        let client = RegistryClient::new(&test_config(&server.uri(), 1, 2)).unwrap();
        let documents = client.fetch_since(1).await.expect("fetch");
        assert_eq!(documents.len(), 2);
    }

    #[tokio::test]
    async fn skips_results_without_document_number() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/documents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "count": 2,
                "total_pages": 1,
                "results": [json!({"title": "no number"}), doc(7)]
            })))
            .mount(&server)
            .await;

        let client = RegistryClient::new(&test_config(&server.uri(), 10, 5)).unwrap();
        let documents = client.fetch_since(1).await.expect("fetch");
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].external_id, "2025-00007");
    }

    #[tokio::test]
    async fn server_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/documents"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let client = RegistryClient::new(&test_config(&server.uri(), 10, 5)).unwrap();
        let err = client.fetch_since(1).await.expect_err("should fail");
        assert!(matches!(err, OpenGovError::Network(_)));
        assert!(err.to_string().contains("503"));
    }
}
