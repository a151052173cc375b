//! Live analyzer backed by an OpenAI-compatible chat completions API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use opengov_shared::{AnalyzerConfig, OpenGovError, Result};

use crate::{AnalysisInput, DocumentAnalysis, DocumentAnalyzer, parse_response};

const ANALYSIS_PROMPT: &str = r#"You are an expert at analyzing government documents and Federal Register entries. Analyze the following document and provide a structured analysis.

Document Title: {title}
Agency: {agency}
Abstract: {body}

Provide your analysis as a JSON object with exactly these fields:
{
  "summary": "A short, punchy summary (1-2 sentences max, under 280 chars) that captures the essence and why it matters to everyday Americans. Be clear, accessible, avoid jargon.",
  "keypoints": ["Key point 1", "Key point 2", "Key point 3"],
  "impact_score": "low|medium|high",
  "political_score": <number from -100 to 100>
}

Guidelines:
- summary: Focus on human impact, make it engaging and viral-worthy
- keypoints: 3-5 bullet points of the most important takeaways
- impact_score: "low" = routine bureaucratic update, "medium" = noteworthy policy change, "high" = major news that affects many Americans
- political_score: -100 = strongly left/progressive, 0 = neutral/bipartisan, 100 = strongly right/conservative

Return ONLY the JSON object, no other text."#;

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Analyzer calling an xAI-style `/chat/completions` endpoint.
pub struct XaiAnalyzer {
    base_url: String,
    api_key: String,
    model: String,
    client: Client,
}

impl XaiAnalyzer {
    pub fn new(config: &AnalyzerConfig, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| OpenGovError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            client,
        })
    }

    fn build_prompt(input: &AnalysisInput) -> String {
        ANALYSIS_PROMPT
            .replacen("{title}", &input.title, 1)
            .replacen("{agency}", input.agency.as_deref().unwrap_or("Unknown"), 1)
            .replacen("{body}", &input.body, 1)
    }
}

#[async_trait]
impl DocumentAnalyzer for XaiAnalyzer {
    #[instrument(skip_all, fields(title = %input.title))]
    async fn analyze(&self, input: &AnalysisInput) -> Result<DocumentAnalysis> {
        if input.title.is_empty() && input.body.is_empty() {
            return Err(OpenGovError::Analysis(
                "title and body cannot both be empty".into(),
            ));
        }

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".into(),
                content: Self::build_prompt(input),
            }],
            temperature: 0.7,
            max_tokens: 800,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| OpenGovError::Network(format!("analysis request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OpenGovError::Analysis(format!(
                "analyzer returned {status}: {body}"
            )));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| OpenGovError::Analysis(format!("invalid analyzer response: {e}")))?;

        let content = chat
            .choices
            .first()
            .map(|c| c.message.content.trim())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| OpenGovError::Analysis("empty analyzer response".into()))?;

        debug!(chars = content.len(), "received analysis");
        parse_response(content)
    }

    fn name(&self) -> &'static str {
        "xai"
    }
}
