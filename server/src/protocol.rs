//! JSON messages exchanged with a WebSocket client.

use serde::Serialize;

use crate::error::TurnError;
use crate::orchestrator::TurnOutput;
use crate::validation::MAX_TEXT_LENGTH;

pub const INVALID_MESSAGE_FORMAT: &str = "Invalid message format";
pub const INVALID_MESSAGE_TEXT: &str = "Invalid message: text field is required";

/// A parsed inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Stop,
    Say(String),
}

impl ClientCommand {
    /// Parse `{ "text"?: string, "action"?: "stop" }`.
    pub fn parse(frame: &str) -> Result<Self, TurnError> {
        let value: serde_json::Value = serde_json::from_str(frame)
            .map_err(|_| TurnError::Format(INVALID_MESSAGE_FORMAT.to_string()))?;

        if value.get("action").and_then(|a| a.as_str()) == Some("stop") {
            return Ok(ClientCommand::Stop);
        }

        let text = value
            .get("text")
            .and_then(|t| t.as_str())
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| TurnError::Format(INVALID_MESSAGE_TEXT.to_string()))?;

        if text.chars().count() > MAX_TEXT_LENGTH {
            return Err(TurnError::Format(format!(
                "Invalid message: text too long (max {MAX_TEXT_LENGTH} characters)"
            )));
        }
        Ok(ClientCommand::Say(text.to_string()))
    }
}

/// Outbound frame, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    Text {
        data: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        paragraph: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    AudioChunk {
        #[serde(skip_serializing_if = "Option::is_none")]
        audio: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        paragraph: Option<String>,
        chunk_index: usize,
        total_chunks: usize,
        is_last_chunk: bool,
    },
    Error {
        error: String,
    },
}

impl ServerMessage {
    pub fn stop_ack() -> Self {
        ServerMessage::Text { data: String::new(), paragraph: None }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error { error: message.into() }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl From<TurnOutput> for ServerMessage {
    fn from(output: TurnOutput) -> Self {
        match output {
            TurnOutput::Text { full_text, paragraph } => ServerMessage::Text {
                data: full_text,
                paragraph: Some(paragraph),
            },
            TurnOutput::Chunk(chunk) if chunk.is_final => ServerMessage::AudioChunk {
                audio: None,
                paragraph: None,
                chunk_index: chunk.sequence_index,
                total_chunks: chunk.total_chunks,
                is_last_chunk: true,
            },
            // total isn't known while streaming; 0 is a placeholder
            TurnOutput::Chunk(chunk) => ServerMessage::AudioChunk {
                audio: Some(tts_core::encode_base64(&chunk.audio)),
                paragraph: Some(chunk.text),
                chunk_index: chunk.sequence_index,
                total_chunks: 0,
                is_last_chunk: false,
            },
        }
    }
}
