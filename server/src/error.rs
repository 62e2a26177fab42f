use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use llm_core::LlmError;
use serde::Serialize;
use thiserror::Error;
use tts_core::TtsError;

/// Failures of one conversational turn, as reported to a connected client.
#[derive(Debug, Error)]
pub enum TurnError {
    /// Malformed inbound message; carries the client-facing message.
    #[error("{0}")]
    Format(String),

    #[error("Chat completion error: {0}")]
    Generation(String),

    #[error("Speech synthesis error: {0}")]
    Synthesis(String),

    #[error("No response content received from the language model")]
    EmptyResponse,

    #[error("Turn aborted")]
    Aborted,

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl TurnError {
    /// Aborts are never reported to the client.
    pub fn is_aborted(&self) -> bool {
        matches!(self, TurnError::Aborted)
    }
}

impl From<LlmError> for TurnError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Aborted => TurnError::Aborted,
            LlmError::Empty => TurnError::EmptyResponse,
            other => TurnError::Generation(other.to_string()),
        }
    }
}

impl From<TtsError> for TurnError {
    fn from(err: TtsError) -> Self {
        TurnError::Synthesis(err.to_string())
    }
}

/// API Error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<LlmError> for ApiError {
    fn from(err: LlmError) -> Self {
        ApiError::Upstream(format!("Chat completion error: {err}"))
    }
}

impl From<TtsError> for ApiError {
    fn from(err: TtsError) -> Self {
        match err {
            TtsError::EmptyText | TtsError::ChunkTooLong { .. } => {
                ApiError::InvalidInput(err.to_string())
            }
            other => ApiError::Upstream(other.to_string()),
        }
    }
}

/// Error response structure
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Upstream(msg) => {
                tracing::error!("Upstream error: {}", msg);
                (StatusCode::BAD_GATEWAY, msg)
            }
            ApiError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(ErrorResponse {
            error: error_message,
            code: status.as_u16(),
        });

        (status, body).into_response()
    }
}
