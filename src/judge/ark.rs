//! Ark judge client speaking the OpenAI-compatible chat completions shape.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use crate::config::JudgeConfig;
use crate::error::{ErrorContext, EvalError};
use crate::evidence::EvidencePayload;
use crate::judge::JudgeModel;

/// Hard cap on response body size.
const MAX_RESPONSE_LEN: usize = 1024 * 1024;

// =============================================================================
// CLIENT
// =============================================================================

#[derive(Debug, Clone)]
pub struct ArkJudge {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl ArkJudge {
    pub fn new(config: &JudgeConfig) -> Result<Self, EvalError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|_| EvalError::config("API key contains invalid header characters"))?;
        headers.insert(AUTHORIZATION, bearer);

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| EvalError::config(format!("failed to build judge client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl JudgeModel for ArkJudge {
    async fn evaluate(&self, payload: &EvidencePayload) -> Result<String, EvalError> {
        let mut parts: Vec<ContentPart<'_>> = Vec::with_capacity(payload.images.len() + 1);
        parts.push(ContentPart::Text {
            text: &payload.instruction.user,
        });
        for url in &payload.images {
            parts.push(ContentPart::ImageUrl {
                image_url: ImageUrlRef { url },
            });
        }

        let request = ChatApiRequest {
            model: &self.model,
            messages: vec![
                ApiMessage {
                    role: "system",
                    content: ApiContent::Text(&payload.instruction.system),
                },
                ApiMessage {
                    role: "user",
                    content: ApiContent::Parts(parts),
                },
            ],
            temperature: 0.0,
        };

        let started = Instant::now();
        let response = self
            .client
            .post(self.chat_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EvalError::judge("judge request timed out", true)
                } else if e.is_connect() {
                    EvalError::judge("judge connection failed", true)
                } else {
                    EvalError::judge(format!("judge request failed: {e}"), false)
                }
            })?;

        let status = response.status();
        let request_id = extract_request_id(response.headers());

        let mut body: Vec<u8> = Vec::new();
        let mut response = response;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| EvalError::judge(format!("failed to read judge response: {e}"), true))?
        {
            body.extend_from_slice(&chunk);
            if body.len() > MAX_RESPONSE_LEN {
                return Err(EvalError::judge("judge response exceeded 1 MiB", false));
            }
        }

        if !status.is_success() {
            let (detail, code) = error_detail(&body);
            let mut context = ErrorContext::new().with_status(status.as_u16());
            if let Some(code) = code {
                context = context.with_code(code);
            }
            if let Some(id) = request_id {
                context = context.with_request_id(id);
            }
            let message = detail.unwrap_or_else(|| format!("status {status}"));
            if status.as_u16() == 429 {
                return Err(EvalError::judge_with_context(
                    format!("judge rate limited: {message}"),
                    true,
                    context,
                ));
            }
            return Err(EvalError::judge_with_context(
                format!("judge returned {status}: {message}"),
                status.is_server_error(),
                context,
            ));
        }

        let parsed: ChatApiResponse = serde_json::from_slice(&body)
            .map_err(|e| EvalError::judge(format!("unparseable judge response: {e}"), false))?;

        if let Some(api_error) = parsed.error {
            let mut context = ErrorContext::new().with_status(status.as_u16());
            if let Some(code) = api_error.code {
                context = context.with_code(code);
            }
            if let Some(id) = request_id {
                context = context.with_request_id(id);
            }
            return Err(EvalError::judge_with_context(
                format!(
                    "judge error: {}",
                    api_error.message.unwrap_or_else(|| "unknown".into())
                ),
                false,
                context,
            ));
        }

        let verdict = parsed
            .choices
            .unwrap_or_default()
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .unwrap_or_default();

        if verdict.trim().is_empty() {
            return Err(EvalError::judge("judge returned an empty verdict", false));
        }

        eprintln!(
            "[judge] verdict in {:.1}s ({} chars, {} images)",
            started.elapsed().as_secs_f64(),
            verdict.chars().count(),
            payload.image_count()
        );
        tracing::debug!("verdict preview: {}", preview(&verdict, 200));

        Ok(verdict)
    }
}

fn extract_request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

/// Best-effort (message, code) out of an error body; falls back to a raw
/// snippet when the body is not the expected JSON.
fn error_detail(body: &[u8]) -> (Option<String>, Option<String>) {
    match serde_json::from_slice::<ChatApiResponse>(body) {
        Ok(parsed) => match parsed.error {
            Some(err) => (err.message, err.code),
            None => (None, None),
        },
        Err(_) => {
            let text = String::from_utf8_lossy(body);
            let trimmed = text.trim();
            if trimmed.is_empty() {
                (None, None)
            } else {
                (Some(preview(trimmed, 200)), None)
            }
        }
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{cut}...")
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Serialize)]
struct ChatApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    temperature: f64,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: ApiContent<'a>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum ApiContent<'a> {
    Text(&'a str),
    Parts(Vec<ContentPart<'a>>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrlRef<'a> },
}

#[derive(Serialize)]
struct ImageUrlRef<'a> {
    url: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatApiResponse {
    choices: Option<Vec<Choice>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: Option<String>,
    code: Option<String>,
}
