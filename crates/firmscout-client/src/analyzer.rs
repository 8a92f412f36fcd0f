use std::time::Duration;

use firmscout_core::error::AppError;
use firmscout_core::models::PageAnalysis;
use firmscout_core::traits::Analyzer;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Page text beyond this is truncated before it reaches the model.
const MAX_PAGE_CHARS: usize = 60_000;

const SYSTEM_PROMPT: &str = "You are a research assistant analyzing pages from an \
investment firm's website. Extract team members, portfolio companies, and a firm \
description from the provided page text, and suggest further URLs on the same site \
worth visiting. Respond ONLY with valid JSON matching the requested schema. Do not \
include explanations.";

/// OpenAI-compatible page analyzer.
///
/// Works with any OpenAI-compatible chat-completions API, including OpenAI
/// directly and Gemini via its compatibility layer. Responses are requested
/// with a strict JSON schema, but parsed defensively anyway: every field of
/// [`PageAnalysis`] defaults, and Markdown code fences around the JSON are
/// tolerated.
#[derive(Clone)]
pub struct OpenAiAnalyzer {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout_secs: u64,
}

impl OpenAiAnalyzer {
    pub fn new(api_key: &str, model: &str) -> Result<Self, AppError> {
        Self::with_base_url(api_key, model, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: &str, model: &str, base_url: &str) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
        })
    }
}

// ---- OpenAI API types ----

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
    json_schema: JsonSchemaWrapper,
}

#[derive(Serialize)]
struct JsonSchemaWrapper {
    name: String,
    strict: bool,
    schema: serde_json::Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

fn nullable_string() -> serde_json::Value {
    serde_json::json!({ "type": ["string", "null"] })
}

fn analysis_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "additionalProperties": false,
        "required": [
            "team_members", "portfolio_companies", "firm_description",
            "suggested_urls", "has_more_content", "load_more_selector", "notes"
        ],
        "properties": {
            "team_members": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["name", "title", "email", "linkedin_url", "bio", "location"],
                    "properties": {
                        "name": { "type": "string" },
                        "title": nullable_string(),
                        "email": nullable_string(),
                        "linkedin_url": nullable_string(),
                        "bio": nullable_string(),
                        "location": nullable_string(),
                    }
                }
            },
            "portfolio_companies": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["name", "description", "website", "industry", "stage"],
                    "properties": {
                        "name": { "type": "string" },
                        "description": nullable_string(),
                        "website": nullable_string(),
                        "industry": nullable_string(),
                        "stage": nullable_string(),
                    }
                }
            },
            "firm_description": nullable_string(),
            "suggested_urls": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["url", "reason", "priority", "expected_content"],
                    "properties": {
                        "url": { "type": "string" },
                        "reason": nullable_string(),
                        "priority": { "type": "string", "enum": ["high", "medium", "low"] },
                        "expected_content": nullable_string(),
                    }
                }
            },
            "has_more_content": { "type": "boolean" },
            "load_more_selector": nullable_string(),
            "notes": nullable_string(),
        }
    })
}

/// Strip a Markdown code fence wrapper, if present.
fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the fence line ("```json" or bare "```") and the closing fence.
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim().trim_end_matches("```").trim()
}

impl Analyzer for OpenAiAnalyzer {
    async fn analyze(&self, page_text: &str, firm_context: &str) -> Result<PageAnalysis, AppError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut text = page_text;
        if text.len() > MAX_PAGE_CHARS {
            let mut cut = MAX_PAGE_CHARS;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text = &text[..cut];
            tracing::debug!(firm = firm_context, "Truncated page text for analysis");
        }

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: format!(
                        "Firm: {firm_context}\n\nPage content:\n\n{text}\n\nExtract all team \
                         members and portfolio companies visible on this page. Suggest \
                         same-site URLs likely to contain team or portfolio information, \
                         with a priority for each."
                    ),
                },
            ],
            response_format: ResponseFormat {
                format_type: "json_schema".to_string(),
                json_schema: JsonSchemaWrapper {
                    name: "page_analysis".to_string(),
                    strict: true,
                    schema: analysis_schema(),
                },
            },
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(self.timeout_secs)
                } else if e.is_connect() {
                    AppError::NetworkError(format!("Connection failed: {e}"))
                } else {
                    AppError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            if status_code == 429 {
                return Err(AppError::RateLimitExceeded);
            }

            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("HTTP {status_code}: {body}"));

            return Err(AppError::AnalyzerError {
                message,
                status_code,
                retryable: status_code >= 500,
            });
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to parse analyzer response: {e}")))?;

        let content = chat_response
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .ok_or_else(|| AppError::AnalyzerError {
                message: "Empty response from analyzer".into(),
                status_code: 200,
                retryable: false,
            })?;

        let payload = strip_code_fences(content);
        serde_json::from_str(payload).map_err(|e| AppError::AnalyzerError {
            message: format!("Analyzer returned invalid JSON: {e}"),
            status_code: 200,
            retryable: false,
        })
    }
}
