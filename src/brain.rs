use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::BrainError;
use crate::types::PageSummary;

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const API_KEY_HEADER: &str = "x-goog-api-key";

const SYSTEM_INSTRUCTION: &str = r#"You generate Tampermonkey/Greasemonkey userscripts that make VISUAL-ONLY changes.
Prioritize robustness, safety, idempotency, and accessibility.
Always produce:
1) A "Selector Plan" with primary and fallback CSS selectors.
2) The full, self-contained userscript code.
3) A "Post-script Checklist" to verify functionality.
Do not access local storage, cookies, or use eval/iframes."#;

/// Compose the full prompt sent to the model for one generation.
pub fn build_prompt(goal: &str, summary: &PageSummary) -> String {
    format!(
        "{}\n\n### GOAL\n{}\n\n### PAGE CONTEXT\n{}\n",
        SYSTEM_INSTRUCTION, goal, summary
    )
}

/// Something that turns a prompt into free-form text.
#[async_trait]
pub trait ScriptModel: Send + Sync {
    async fn generate(&self, api_key: &str, model: &str, prompt: &str) -> Result<String, BrainError>;
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Gemini `generateContent` client. The HTTP client is reused across generations.
pub struct Brain {
    client: Client,
    base_url: String,
}

impl Default for Brain {
    fn default() -> Self {
        Self::new()
    }
}

impl Brain {
    pub fn new() -> Self {
        Self::with_base_url(BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

fn network_error(e: reqwest::Error) -> BrainError {
    BrainError::Network(e.without_url().to_string())
}

#[async_trait]
impl ScriptModel for Brain {
    async fn generate(&self, api_key: &str, model: &str, prompt: &str) -> Result<String, BrainError> {
        // The key travels in a header so it never ends up in a URL or an error message.
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        let body = GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![RequestPart { text: prompt }],
            }],
        };

        debug!(model, prompt_chars = prompt.len(), "sending generateContent");

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, api_key)
            .json(&body)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(network_error)?;

        if !status.is_success() {
            let message = serde_json::from_str::<ApiErrorBody>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            warn!(%status, "generation API error: {}", message);
            return Err(BrainError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&text)
            .map_err(|e| BrainError::InvalidResponse(format!("failed to parse response: {}", e)))?;

        let reply: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if reply.is_empty() {
            return Err(BrainError::InvalidResponse("no text in model reply".into()));
        }

        debug!(reply_chars = reply.len(), "model replied");
        Ok(reply)
    }
}
