pub mod conversation;
pub mod openai;
pub mod segmenter;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use conversation::{ConversationState, Role, Turn};
pub use openai::{LlmSettings, OpenAiClient};
pub use segmenter::{is_response_complete, Segment, SentenceSegmenter};

/// Default system preamble for new conversations.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful voice assistant. Give complete, \
well-formed answers that are concise but thorough, and always finish with proper punctuation. \
Your replies are read aloud, so avoid tables and code blocks. You have a budget of roughly \
1500 tokens: wrap up your current thought before reaching it instead of stopping mid-sentence.";

/// Lazily produced text fragments of one completion.
pub type FragmentStream = BoxStream<'static, Result<String, LlmError>>;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("stream error: {0}")]
    Stream(String),

    #[error("no response content")]
    Empty,

    #[error("aborted")]
    Aborted,
}

/// Which OpenAI-compatible service a client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Ollama,
}

impl LlmProvider {
    /// Parse a provider name, falling back to OpenAI for anything unknown.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "ollama" => LlmProvider::Ollama,
            _ => LlmProvider::OpenAI,
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            LlmProvider::OpenAI => "https://api.openai.com/v1",
            LlmProvider::Ollama => "http://localhost:11434/v1",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::OpenAI => "gpt-4o-mini",
            LlmProvider::Ollama => "llama3",
        }
    }

    pub fn requires_api_key(&self) -> bool {
        matches!(self, LlmProvider::OpenAI)
    }
}

/// Text-generation collaborator.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Start a streamed completion for `history`.
    ///
    /// The stream ends normally at end of response. When `cancel` fires it
    /// yields `LlmError::Aborted` and stops.
    async fn stream_completion(
        &self,
        history: &[Turn],
        cancel: CancellationToken,
    ) -> Result<FragmentStream, LlmError>;

    /// Produce a whole completion at once.
    async fn complete(&self, history: &[Turn]) -> Result<String, LlmError> {
        let mut stream = self.stream_completion(history, CancellationToken::new()).await?;
        let mut content = String::new();
        while let Some(fragment) = stream.next().await {
            content.push_str(&fragment?);
        }
        if content.trim().is_empty() {
            return Err(LlmError::Empty);
        }
        Ok(content)
    }
}
