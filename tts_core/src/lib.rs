pub mod chunking;
pub mod openai;
pub mod piper;
mod wav;

use async_trait::async_trait;
use base64::Engine; // for STANDARD.encode()
use thiserror::Error;

pub use chunking::{split_into_paragraphs, split_long_paragraph, DEFAULT_MAX_CHUNK_CHARS};
pub use openai::{OpenAiSpeech, SpeechSettings};
pub use piper::PiperSynthesizer;

/// Hard per-call ceiling of the hosted speech endpoint.
pub const TTS_MAX_CHARS: usize = 4096;

#[derive(Debug, Error)]
pub enum TtsError {
    #[error("Text is empty")]
    EmptyText,

    #[error("Text chunk exceeds TTS limit: {len} characters (max {max})")]
    ChunkTooLong { len: usize, max: usize },

    #[error("TTS request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("TTS API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("TTS engine error: {0}")]
    Engine(String),
}

/// Which synthesizer the server should build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtsProvider {
    OpenAI,
    Piper,
}

impl TtsProvider {
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "piper" => TtsProvider::Piper,
            _ => TtsProvider::OpenAI,
        }
    }
}

/// Text-to-speech collaborator: bounded text in, opaque audio bytes out.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Longest input, in characters, a single call accepts.
    fn max_chars(&self) -> usize;

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, TtsError>;
}

/// Reject input a synthesizer with ceiling `max` must not receive.
pub fn check_input(text: &str, max: usize) -> Result<(), TtsError> {
    if text.trim().is_empty() {
        return Err(TtsError::EmptyText);
    }
    let len = text.chars().count();
    if len > max {
        return Err(TtsError::ChunkTooLong { len, max });
    }
    Ok(())
}

/// Base64 for audio payloads sent to clients.
pub fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}
