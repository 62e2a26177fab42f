//! OpenAI-compatible chat completions (OpenAI or Ollama's `/v1` API).

use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::segmenter::is_response_complete;
use crate::{FragmentStream, GenerationBackend, LlmError, LlmProvider, Turn};

const CONTINUE_PROMPT: &str = "Please continue your previous response from where you left off. \
Complete your thought, but conclude naturally before hitting the token limit.";

const STOPPED_NOTICE: &str = "\n\n[I stopped here to avoid overwhelming you with too much \
information. Would you like me to continue?]";

/// Structure for the chat completions request
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

/// Structure for the non-streaming response
#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// One `chat.completion.chunk` SSE payload
#[derive(Deserialize)]
struct ChunkResponse {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Deserialize, Default)]
struct Delta {
    content: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub provider: LlmProvider,
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub max_continuations: usize,
}

impl LlmSettings {
    pub fn new(provider: LlmProvider) -> Self {
        Self {
            provider,
            model: provider.default_model().to_string(),
            base_url: None,
            api_key: None,
            max_tokens: 1500,
            max_continuations: 2,
        }
    }
}

pub struct OpenAiClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    max_continuations: usize,
}

impl OpenAiClient {
    pub fn new(settings: LlmSettings) -> anyhow::Result<Self> {
        if settings.provider.requires_api_key() && settings.api_key.is_none() {
            anyhow::bail!("OPENAI_API_KEY must be set for the OpenAI provider");
        }
        let base = settings
            .base_url
            .unwrap_or_else(|| settings.provider.default_base_url().to_string());
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base.trim_end_matches('/')),
            api_key: settings.api_key,
            model: settings.model,
            max_tokens: settings.max_tokens,
            max_continuations: settings.max_continuations,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request(&self, history: &[Turn], stream: bool) -> RequestBuilder {
        let body = ChatRequest {
            model: &self.model,
            messages: history
                .iter()
                .map(|t| Message { role: t.role.as_str(), content: &t.content })
                .collect(),
            max_tokens: self.max_tokens,
            stream,
        };
        let builder = self.client.post(&self.endpoint).json(&body);
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// One non-streaming round trip: content plus finish reason.
    async fn complete_once(&self, history: &[Turn]) -> Result<(String, Option<String>), LlmError> {
        let response = check_status(self.request(history, false).send().await?).await?;
        let parsed: ChatResponse = response.json().await?;
        let choice = parsed.choices.into_iter().next().ok_or(LlmError::Empty)?;
        let content = choice.message.content.unwrap_or_default();
        if content.trim().is_empty() {
            return Err(LlmError::Empty);
        }
        Ok((content, choice.finish_reason))
    }
}

#[async_trait]
impl GenerationBackend for OpenAiClient {
    async fn stream_completion(
        &self,
        history: &[Turn],
        cancel: CancellationToken,
    ) -> Result<FragmentStream, LlmError> {
        let send = self.request(history, true).send();
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LlmError::Aborted),
            res = send => res?,
        };
        let response = check_status(response).await?;
        debug!(model = %self.model, "completion stream opened");

        let mut events = Box::pin(response.bytes_stream().eventsource());
        let stream = async_stream::stream! {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    ev = events.next() => Some(ev),
                };
                let Some(event) = next else {
                    yield Err(LlmError::Aborted);
                    break;
                };
                match event {
                    None => break,
                    Some(Err(e)) => {
                        yield Err(LlmError::Stream(e.to_string()));
                        break;
                    }
                    Some(Ok(event)) => {
                        if event.data.trim() == "[DONE]" {
                            break;
                        }
                        match parse_chunk(&event.data) {
                            Ok(Some(text)) => yield Ok(text),
                            Ok(None) => {}
                            Err(e) => {
                                yield Err(e);
                                break;
                            }
                        }
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }

    /// Whole completion, following up with bounded continuation requests
    /// while the model stops on its token limit.
    async fn complete(&self, history: &[Turn]) -> Result<String, LlmError> {
        let mut messages = history.to_vec();
        let (mut content, mut finish_reason) = self.complete_once(&messages).await?;
        let mut last_part = content.clone();
        let mut continuations = 0;

        while finish_reason.as_deref() == Some("length") {
            if continuations >= self.max_continuations {
                content = format!("{}{}", content.trim(), STOPPED_NOTICE);
                break;
            }
            continuations += 1;
            messages.push(Turn::assistant(last_part));
            messages.push(Turn::user(CONTINUE_PROMPT));

            match self.complete_once(&messages).await {
                Ok((part, reason)) => {
                    content = format!("{} {}", content.trim(), part.trim());
                    last_part = part;
                    finish_reason = reason;
                }
                Err(e) => {
                    warn!("continuation {continuations} failed: {e}");
                    content = format!("{}{}", content.trim(), STOPPED_NOTICE);
                    break;
                }
            }
        }

        if !is_response_complete(&content) {
            warn!("response may be incomplete (no terminal punctuation)");
        }
        Ok(content)
    }
}

/// Turn a non-2xx response into `LlmError::Api` with the provider's message.
async fn check_status(response: Response) -> Result<Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| error_message(&v))
        .unwrap_or(body);
    Err(LlmError::Api { status: status.as_u16(), message })
}

fn error_message(value: &serde_json::Value) -> Option<String> {
    let error = value.get("error")?;
    if let Some(message) = error.get("message").and_then(|m| m.as_str()) {
        return Some(message.to_string());
    }
    if let Some(message) = error.as_str() {
        return Some(message.to_string());
    }
    Some("an error occurred during streaming".to_string())
}

/// Extract the text delta of one SSE data payload.
fn parse_chunk(data: &str) -> Result<Option<String>, LlmError> {
    let value: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| LlmError::Stream(format!("invalid chunk: {e}")))?;
    if let Some(message) = error_message(&value) {
        return Err(LlmError::Stream(message));
    }
    let chunk: ChunkResponse = serde_json::from_value(value)
        .map_err(|e| LlmError::Stream(format!("unexpected chunk shape: {e}")))?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|s| !s.is_empty()))
}
