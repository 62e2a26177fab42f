//! Common utilities for integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use llm_core::{FragmentStream, GenerationBackend, LlmError, Turn};
use server::config::ServerConfig;
use server::orchestrator::{Backends, TurnOutput, TurnSink};
use server::error::TurnError;
use server::AppState;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tts_core::{check_input, SpeechSynthesizer, TtsError, TTS_MAX_CHARS};

pub const TEST_SYSTEM_PROMPT: &str = "You are a test assistant.";

/// How the scripted backend answers one request.
pub enum Script {
    Reply(Vec<String>),
    /// The request itself fails.
    FailToStart(String),
    /// Some fragments, then a stream error.
    FailMidway(Vec<String>, String),
    /// Some fragments, then nothing until cancelled.
    Hang(Vec<String>),
}

impl Script {
    pub fn reply(fragments: &[&str]) -> Self {
        Script::Reply(fragments.iter().map(|s| s.to_string()).collect())
    }
}

fn ok_fragments(fragments: Vec<String>) -> impl futures::Stream<Item = Result<String, LlmError>> {
    stream::iter(fragments.into_iter().map(Ok))
}

/// Generation backend answering from a queue of scripts and recording every
/// history it was asked about.
pub struct ScriptedBackend {
    scripts: Mutex<VecDeque<Script>>,
    histories: Mutex<Vec<Vec<Turn>>>,
}

impl ScriptedBackend {
    pub fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            histories: Mutex::new(Vec::new()),
        })
    }

    pub fn replying(fragments: &[&str]) -> Arc<Self> {
        Self::new(vec![Script::reply(fragments)])
    }

    pub fn histories(&self) -> Vec<Vec<Turn>> {
        self.histories.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn stream_completion(
        &self,
        history: &[Turn],
        _cancel: CancellationToken,
    ) -> Result<FragmentStream, LlmError> {
        self.histories.lock().unwrap().push(history.to_vec());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Script::reply(&["Okay."]));

        match script {
            Script::Reply(fragments) => Ok(ok_fragments(fragments).boxed()),
            Script::FailToStart(message) => Err(LlmError::Api { status: 500, message }),
            Script::FailMidway(fragments, message) => Ok(ok_fragments(fragments)
                .chain(stream::once(async move { Err(LlmError::Stream(message)) }))
                .boxed()),
            Script::Hang(fragments) => Ok(ok_fragments(fragments).chain(stream::pending()).boxed()),
        }
    }
}

/// Fake audio for `text`.
pub fn fake_audio(text: &str) -> Vec<u8> {
    format!("audio:{text}").into_bytes()
}

/// Synthesizer that records every call and can be told to fail on a word.
pub struct RecordingSynthesizer {
    calls: Mutex<Vec<String>>,
    max_chars: usize,
    fail_on: Option<String>,
}

impl RecordingSynthesizer {
    pub fn new() -> Arc<Self> {
        Self::build(TTS_MAX_CHARS, None)
    }

    pub fn failing_on(word: &str) -> Arc<Self> {
        Self::build(TTS_MAX_CHARS, Some(word.to_string()))
    }

    fn build(max_chars: usize, fail_on: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            max_chars,
            fail_on,
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for RecordingSynthesizer {
    fn max_chars(&self) -> usize {
        self.max_chars
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, TtsError> {
        self.calls.lock().unwrap().push(text.to_string());
        check_input(text, self.max_chars)?;
        if let Some(word) = &self.fail_on {
            if text.contains(word.as_str()) {
                return Err(TtsError::Api { status: 500, message: format!("cannot say {word}") });
            }
        }
        Ok(fake_audio(text))
    }
}

/// Synthesizer that reports each call on a channel and then blocks until the
/// test releases a permit.
pub struct GatedSynthesizer {
    gate: Semaphore,
    entered: mpsc::UnboundedSender<String>,
}

impl GatedSynthesizer {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (entered, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { gate: Semaphore::new(0), entered }), rx)
    }

    pub fn release(&self, calls: usize) {
        self.gate.add_permits(calls);
    }
}

#[async_trait]
impl SpeechSynthesizer for GatedSynthesizer {
    fn max_chars(&self) -> usize {
        TTS_MAX_CHARS
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, TtsError> {
        let _ = self.entered.send(text.to_string());
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| TtsError::Engine(e.to_string()))?;
        permit.forget();
        Ok(fake_audio(text))
    }
}

pub fn backends(
    llm: Arc<dyn GenerationBackend>,
    tts: Arc<dyn SpeechSynthesizer>,
    max_len: usize,
) -> Arc<Backends> {
    Arc::new(Backends::new(llm, tts, max_len))
}

/// App state over test doubles with default configuration.
pub fn test_state(llm: Arc<dyn GenerationBackend>, tts: Arc<dyn SpeechSynthesizer>) -> AppState {
    let config = ServerConfig::default();
    let max_len = config.synthesis_max_length();
    AppState::new(config, Backends::new(llm, tts, max_len))
}

/// Sink collecting outputs; optionally cancels a token right after the first
/// text output.
#[derive(Default)]
pub struct CollectingSink {
    pub outputs: Vec<TurnOutput>,
    pub cancel_after_first_text: Option<CancellationToken>,
}

#[async_trait]
impl TurnSink for CollectingSink {
    async fn emit(&mut self, output: TurnOutput) -> Result<(), TurnError> {
        let is_text = matches!(output, TurnOutput::Text { .. });
        self.outputs.push(output);
        if is_text {
            if let Some(token) = self.cancel_after_first_text.take() {
                token.cancel();
            }
        }
        Ok(())
    }
}
