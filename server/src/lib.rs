pub mod config;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod protocol;
pub mod routes;
pub mod session;
pub mod validation;

use std::sync::Arc;

use axum::{
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use llm_core::{GenerationBackend, OpenAiClient};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tts_core::{OpenAiSpeech, PiperSynthesizer, SpeechSynthesizer, TtsProvider};

use crate::config::ServerConfig;
use crate::metrics::PipelineMetrics;
use crate::orchestrator::Backends;

#[derive(Clone)]
pub struct AppState {
    pub backends: Arc<Backends>,
    pub metrics: Arc<PipelineMetrics>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(config: ServerConfig, backends: Backends) -> Self {
        Self {
            backends: Arc::new(backends),
            metrics: Arc::new(PipelineMetrics::new()),
            config: Arc::new(config),
        }
    }

    /// Build the generation and synthesis backends named by `config`.
    pub fn from_config(config: ServerConfig) -> anyhow::Result<Self> {
        let llm: Arc<dyn GenerationBackend> = Arc::new(OpenAiClient::new(config.llm_settings())?);
        info!(provider = ?config.llm_provider, model = %config.llm_model, "LLM backend ready");

        let tts: Arc<dyn SpeechSynthesizer> = match config.tts_provider {
            TtsProvider::OpenAI => Arc::new(OpenAiSpeech::new(config.speech_settings()?)?),
            TtsProvider::Piper => Arc::new(PiperSynthesizer::load(&config.piper_config)?),
        };
        info!(provider = ?config.tts_provider, max_chars = tts.max_chars(), "TTS backend ready");

        let backends = Backends::new(llm, tts, config.synthesis_max_length());
        Ok(Self::new(config, backends))
    }
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .allow_credentials(false);

    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .flatten()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();

    if origins.is_empty() {
        if config.cors_allowed_origins.is_some() {
            warn!("CORS_ALLOWED_ORIGINS has no valid origin, falling back to permissive CORS");
        }
        base.allow_origin(Any)
    } else {
        info!("CORS configured for {} origin(s)", origins.len());
        base.allow_origin(AllowOrigin::list(origins))
    }
}

/// All routes, served both at the root and under `/api`.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/", get(routes::ws_handler))
        .route("/ws", get(routes::ws_handler))
        .route("/health", get(routes::health_check))
        .route("/healthz", get(routes::health_check))
        .route("/metrics", get(routes::metrics_endpoint))
        .route("/chat", post(routes::chat_endpoint))
        .route("/tts", post(routes::tts_endpoint));

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config))
        .into_inner();

    Router::new()
        .merge(api.clone())
        .nest("/api", api)
        .layer(middleware_stack)
        .with_state(state)
}
