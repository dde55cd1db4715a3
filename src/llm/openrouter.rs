//! OpenRouter provider implementation
//!
//! Speaks the OpenAI-compatible chat-completions wire format, which is what
//! OpenRouter (and most gateways) accept.

use super::types::{ChatMessage, CompletionRequest};
use super::{LlmError, LlmService};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Intent extraction is a short classification call; anything slower than
/// this is treated as a failed turn, not waited out.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// OpenRouter-backed chat-completion service
pub struct OpenRouterService {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenRouterService {
    pub fn new(
        api_key: String,
        model: String,
        base_url: Option<&str>,
    ) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LlmError::unknown(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            model,
            base_url: base_url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }

    fn translate_request(&self, request: &CompletionRequest) -> WireRequest {
        WireRequest {
            model: self.model.clone(),
            messages: request
                .messages
                .iter()
                .map(|m: &ChatMessage| WireMessage {
                    role: m.role.as_str(),
                    content: m.content.clone(),
                })
                .collect(),
            temperature: request.temperature,
            stream: false,
        }
    }
}

#[async_trait]
impl LlmService for OpenRouterService {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let wire = self.translate_request(request);

        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&wire)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::timeout(format!("request timed out: {e}"))
                } else {
                    LlmError::network(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("HTTP {status}: {body}");
            return Err(match status.as_u16() {
                401 | 403 => LlmError::auth(message),
                429 => LlmError::rate_limit(message),
                400 => LlmError::invalid_request(message),
                code if code >= 500 => LlmError::server_error(message),
                _ => LlmError::unknown(message),
            });
        }

        let body: WireResponse = response
            .json()
            .await
            .map_err(|e| LlmError::unknown(format!("malformed completion body: {e}")))?;

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.is_empty())
            .ok_or_else(|| LlmError::unknown("completion contained no content"))
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

// ============================================================
// Wire format
// ============================================================

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    content: Option<String>,
}
