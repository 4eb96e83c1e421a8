use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::debug;

use crate::error::TextServiceError;

/// One system + user exchange with a hosted language model.
#[derive(Debug, Clone)]
pub struct Completion<'a> {
    pub system: &'a str,
    pub prompt: &'a str,
    pub max_tokens: u32,
}

#[async_trait]
pub trait TextService: Send + Sync {
    async fn complete(&self, request: Completion<'_>) -> Result<String, TextServiceError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
}

impl OpenAiClient {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TextServiceError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            timeout,
        })
    }

    async fn send(&self, request: Completion<'_>) -> Result<String, TextServiceError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: request.system,
                },
                ChatMessage {
                    role: "user",
                    content: request.prompt,
                },
            ],
            max_tokens: request.max_tokens,
            temperature: 0.3,
        };
        let response: ChatResponse = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let text = reply_text(response, request.max_tokens)?;
        debug!("Text service returned {} chars", text.chars().count());
        Ok(text)
    }
}

/// First choice of a chat reply. A reply stopped by the token limit is an
/// error, never a shorter answer.
fn reply_text(response: ChatResponse, max_tokens: u32) -> Result<String, TextServiceError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or(TextServiceError::Empty)?;
    if choice.finish_reason.as_deref() == Some("length") {
        return Err(TextServiceError::Truncated(max_tokens));
    }
    let text = choice
        .message
        .content
        .map(|c| c.trim().to_string())
        .unwrap_or_default();
    if text.is_empty() {
        return Err(TextServiceError::Empty);
    }
    Ok(text)
}

#[async_trait]
impl TextService for OpenAiClient {
    async fn complete(&self, request: Completion<'_>) -> Result<String, TextServiceError> {
        timeout(self.timeout, self.send(request))
            .await
            .map_err(|_| TextServiceError::Timeout(self.timeout))?
    }
}
