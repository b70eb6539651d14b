//! Chat-completion client and reply parsing.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{Result, TriageError};
use crate::github::truncate_chars;

use super::config::ChatConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// A chat model that answers a system + user conversation with text.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Return the content of the first choice.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    response_format: ResponseFormat,
    messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// [`ChatClient`] for OpenAI-compatible `/v1/chat/completions` endpoints.
pub struct HttpChatClient {
    config: ChatConfig,
    http_client: reqwest::Client,
}

impl HttpChatClient {
    pub fn new(config: ChatConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("citriage/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            config,
            http_client,
        })
    }
}

#[async_trait]
impl ChatClient for HttpChatClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = ChatRequest {
            model: &self.config.model,
            temperature: self.config.temperature,
            response_format: ResponseFormat {
                kind: "json_object",
            },
            messages,
        };

        let mut request = self
            .http_client
            .post(self.config.completions_url())
            .bearer_auth(&self.config.api_key)
            .json(&body);
        if let Some((name, value)) = &self.config.extra_header {
            request = request.header(name.as_str(), value.as_str());
        }

        debug!(model = %self.config.model, messages = messages.len(), "calling chat completion");
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(TriageError::Http {
                status: Some(status.as_u16()),
                message: truncate_chars(&text, 240),
            });
        }

        let parsed: ChatResponse = response.json().await?;
        extract_content(parsed)
    }
}

fn extract_content(response: ChatResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| TriageError::InvalidReply("model returned empty content".into()))
}

/// The structured answer the model is asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageReply {
    pub confidence: f64,
    pub rationale: String,
    /// Unified diff, or empty when the model found no safe fix.
    pub patch: String,
}

#[derive(Debug, Deserialize)]
struct WireReply {
    confidence: Option<f64>,
    rationale: Option<String>,
    patch: Option<String>,
}

/// Parse the model's JSON object, tolerating a surrounding code fence.
///
/// Missing fields read as zero confidence and empty text.
pub fn parse_triage_reply(content: &str) -> Result<TriageReply> {
    let json = strip_code_fence(content.trim());
    let wire: WireReply = serde_json::from_str(json)
        .map_err(|e| TriageError::InvalidReply(format!("reply is not the expected JSON: {e}")))?;

    let confidence = wire.confidence.unwrap_or(0.0);
    if !confidence.is_finite() {
        return Err(TriageError::InvalidReply(format!(
            "confidence {confidence} is not a number"
        )));
    }

    Ok(TriageReply {
        confidence,
        rationale: wire.rationale.unwrap_or_default(),
        patch: wire.patch.unwrap_or_default(),
    })
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
