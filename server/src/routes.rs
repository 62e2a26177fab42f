use std::time::Instant;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    Json,
};
use futures_util::{future, SinkExt, StreamExt};
use llm_core::Turn;
use serde::{Deserialize, Serialize};
use tracing::{error, info, Instrument};
use tts_core::{split_into_paragraphs, split_long_paragraph};

use crate::error::ApiError;
use crate::metrics::{MetricsResponse, PipelineMetrics};
use crate::session::ConnectionSession;
use crate::validation::{validate_chat_request, validate_tts_request};
use crate::AppState;

#[derive(Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Serialize, Deserialize)]
pub struct ChatResponse {
    pub reply: String,
}

#[derive(Deserialize)]
pub struct TtsRequest {
    pub text: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TtsChunk {
    pub index: usize,
    pub text: String,
    pub audio_base64: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TtsResponse {
    pub chunks: Vec<TtsChunk>,
    pub total_chunks: usize,
}

pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(MetricsResponse::collect(&state.metrics))
}

/// One-shot chat: system preamble plus a single user turn, no history.
pub async fn chat_endpoint(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    PipelineMetrics::incr(&state.metrics.http_requests);
    validate_chat_request(&req.message)?;

    let started = Instant::now();
    let history = [Turn::system(state.config.system_prompt.clone()), Turn::user(req.message)];
    let reply = tokio::time::timeout(state.config.llm_timeout(), state.backends.llm.complete(&history))
        .await
        .map_err(|_| {
            let secs = state.config.llm_timeout_secs;
            error!("chat request timed out after {secs} seconds");
            ApiError::Upstream(format!(
                "Request timed out after {secs} seconds. Please try again with a shorter message."
            ))
        })??;

    info!(
        chars = reply.chars().count(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "chat reply generated"
    );
    Ok(Json(ChatResponse { reply }))
}

/// Synthesize a whole text, paragraph by paragraph, in ordered chunks.
pub async fn tts_endpoint(
    State(state): State<AppState>,
    Json(req): Json<TtsRequest>,
) -> Result<Json<TtsResponse>, ApiError> {
    PipelineMetrics::incr(&state.metrics.http_requests);
    validate_tts_request(&req.text)?;

    let max_len = state.backends.synthesis_max_length;
    let pieces: Vec<String> = split_into_paragraphs(&req.text)
        .iter()
        .flat_map(|p| split_long_paragraph(p, max_len))
        .collect();

    let mut chunks = Vec::with_capacity(pieces.len());
    for (index, text) in pieces.into_iter().enumerate() {
        let started = Instant::now();
        let audio = state.backends.tts.synthesize(&text).await.map_err(|e| {
            PipelineMetrics::incr(&state.metrics.synthesis_failures);
            ApiError::from(e)
        })?;
        state.metrics.synthesis.record(started.elapsed().as_millis() as u64);
        chunks.push(TtsChunk {
            index,
            text,
            audio_base64: tts_core::encode_base64(&audio),
        });
    }

    let total_chunks = chunks.len();
    Ok(Json(TtsResponse { chunks, total_chunks }))
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("session", %id);

    async move {
        info!("client connected");
        state.metrics.connection_opened();

        let (sender, receiver) = socket.split();
        let outbound = sender.with(|text: String| {
            future::ready(Ok::<_, axum::Error>(Message::Text(text.into())))
        });
        // text frames only; the stream ends on close or transport error
        let inbound = receiver
            .take_while(|msg| future::ready(matches!(msg, Ok(m) if !matches!(m, Message::Close(_)))))
            .filter_map(|msg| {
                future::ready(match msg {
                    Ok(Message::Text(text)) => Some(text.to_string()),
                    _ => None,
                })
            });

        let session = ConnectionSession::new(
            state.backends.clone(),
            state.metrics.clone(),
            state.config.system_prompt.clone(),
            state.config.history_limit,
        );
        if let Err(e) = session.run(Box::pin(outbound), Box::pin(inbound)).await {
            info!("session ended: {e}");
        }

        state.metrics.connection_closed();
        info!("client disconnected");
    }
    .instrument(span)
    .await
}
