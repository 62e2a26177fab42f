//! One conversational turn: generation -> sentences -> synthesis -> ordered output.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::StreamExt;
use llm_core::{GenerationBackend, Segment, SentenceSegmenter, Turn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use tts_core::{split_long_paragraph, SpeechSynthesizer};

use crate::error::TurnError;
use crate::metrics::PipelineMetrics;

/// Buffered outputs per turn before the turn waits on the session.
const TURN_CHANNEL_CAPACITY: usize = 16;

/// External collaborators a turn needs, shared by all connections.
pub struct Backends {
    pub llm: Arc<dyn GenerationBackend>,
    pub tts: Arc<dyn SpeechSynthesizer>,
    /// Splitter ceiling applied to each sentence before synthesis.
    pub synthesis_max_length: usize,
}

impl Backends {
    pub fn new(llm: Arc<dyn GenerationBackend>, tts: Arc<dyn SpeechSynthesizer>, max_len: usize) -> Self {
        // never exceed what the synthesizer accepts
        let synthesis_max_length = max_len.min(tts.max_chars()).max(1);
        Self { llm, tts, synthesis_max_length }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub text: String,
    pub audio: Vec<u8>,
    pub sequence_index: usize,
    pub is_final: bool,
    /// Only meaningful on the final marker.
    pub total_chunks: usize,
}

impl OutputChunk {
    /// Metadata-only marker sent after the last real chunk.
    pub fn final_marker(total_chunks: usize) -> Self {
        Self {
            text: String::new(),
            audio: Vec::new(),
            sequence_index: total_chunks.saturating_sub(1),
            is_final: true,
            total_chunks,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutput {
    Text { full_text: String, paragraph: String },
    Chunk(OutputChunk),
}

/// What a spawned turn reports back to its session.
#[derive(Debug)]
pub enum TurnEvent {
    Output(TurnOutput),
    Finished(Result<String, TurnError>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Streaming,
    Flushing,
    Completed,
    Aborted,
    Failed,
}

/// Destination of turn outputs. A failed emit means nobody is listening
/// anymore and ends the turn as aborted.
#[async_trait]
pub trait TurnSink: Send {
    async fn emit(&mut self, output: TurnOutput) -> Result<(), TurnError>;
}

#[async_trait]
impl TurnSink for mpsc::Sender<TurnEvent> {
    async fn emit(&mut self, output: TurnOutput) -> Result<(), TurnError> {
        self.send(TurnEvent::Output(output))
            .await
            .map_err(|_| TurnError::Aborted)
    }
}

pub struct TurnOrchestrator {
    backends: Arc<Backends>,
    metrics: Arc<PipelineMetrics>,
    cancel: CancellationToken,
    phase: TurnPhase,
    sequence_index: usize,
}

impl TurnOrchestrator {
    pub fn new(backends: Arc<Backends>, metrics: Arc<PipelineMetrics>, cancel: CancellationToken) -> Self {
        Self {
            backends,
            metrics,
            cancel,
            phase: TurnPhase::Idle,
            sequence_index: 0,
        }
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    /// Audio chunks emitted so far.
    pub fn chunks_emitted(&self) -> usize {
        self.sequence_index
    }

    /// Run the turn to completion, returning the full generated text.
    ///
    /// Outputs reach `sink` strictly in order: for each sub-chunk its text,
    /// then its audio, and a final marker after the last chunk. Once the token
    /// is cancelled nothing further is emitted and `TurnError::Aborted` is
    /// returned.
    pub async fn run<S: TurnSink>(&mut self, history: &[Turn], sink: &mut S) -> Result<String, TurnError> {
        PipelineMetrics::incr(&self.metrics.turns_started);
        let started = Instant::now();
        let result = self.drive(history, sink).await;

        self.phase = match &result {
            Ok(_) => TurnPhase::Completed,
            Err(e) if e.is_aborted() => TurnPhase::Aborted,
            Err(_) => TurnPhase::Failed,
        };
        match &result {
            Ok(text) => {
                PipelineMetrics::incr(&self.metrics.turns_completed);
                info!(
                    chunks = self.sequence_index,
                    chars = text.chars().count(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "turn completed"
                );
            }
            Err(TurnError::Aborted) => {
                PipelineMetrics::incr(&self.metrics.turns_aborted);
                info!(chunks = self.sequence_index, "turn aborted");
            }
            Err(e) => {
                PipelineMetrics::incr(&self.metrics.turns_failed);
                error!("turn failed: {e}");
            }
        }
        result
    }

    async fn drive<S: TurnSink>(&mut self, history: &[Turn], sink: &mut S) -> Result<String, TurnError> {
        self.check_cancelled()?;
        self.phase = TurnPhase::Streaming;

        let mut fragments = self
            .backends
            .llm
            .stream_completion(history, self.cancel.clone())
            .await?;
        let mut segmenter = SentenceSegmenter::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(TurnError::Aborted),
                next = fragments.next() => next,
            };
            let Some(fragment) = next else { break };
            for segment in segmenter.feed(&fragment?) {
                self.process_unit(segment, sink).await?;
            }
        }

        self.phase = TurnPhase::Flushing;
        for segment in segmenter.flush() {
            self.process_unit(segment, sink).await?;
        }
        self.check_cancelled()?;

        let full_text = segmenter.into_full_content();
        if full_text.trim().is_empty() {
            return Err(TurnError::EmptyResponse);
        }
        if self.sequence_index > 0 {
            sink.emit(TurnOutput::Chunk(OutputChunk::final_marker(self.sequence_index)))
                .await?;
        }
        Ok(full_text)
    }

    /// Synthesize and emit one sentence, re-split to the synthesis ceiling.
    ///
    /// A synthesis failure skips the rest of this sentence only.
    async fn process_unit<S: TurnSink>(&mut self, segment: Segment, sink: &mut S) -> Result<(), TurnError> {
        self.check_cancelled()?;

        let max_len = self.backends.synthesis_max_length;
        let parts = if segment.sentence.chars().count() > max_len {
            split_long_paragraph(&segment.sentence, max_len)
        } else {
            vec![segment.sentence]
        };
        let part_count = parts.len();

        for (i, part) in parts.into_iter().enumerate() {
            self.check_cancelled()?;

            let started = Instant::now();
            let audio = match self.backends.tts.synthesize(&part).await {
                Ok(audio) => audio,
                Err(e) => {
                    PipelineMetrics::incr(&self.metrics.synthesis_failures);
                    let err = TurnError::from(e);
                    warn!(skipped = part_count - i, "{err}, skipping rest of sentence");
                    return Ok(());
                }
            };
            self.metrics.synthesis.record(started.elapsed().as_millis() as u64);

            self.check_cancelled()?;
            sink.emit(TurnOutput::Text {
                full_text: segment.full_text.clone(),
                paragraph: part.clone(),
            })
            .await?;

            self.check_cancelled()?;
            sink.emit(TurnOutput::Chunk(OutputChunk {
                text: part,
                audio,
                sequence_index: self.sequence_index,
                is_final: false,
                total_chunks: 0,
            }))
            .await?;
            debug!(index = self.sequence_index, "chunk emitted");
            PipelineMetrics::incr(&self.metrics.chunks_emitted);
            self.sequence_index += 1;
        }
        Ok(())
    }

    fn check_cancelled(&self) -> Result<(), TurnError> {
        if self.cancel.is_cancelled() {
            Err(TurnError::Aborted)
        } else {
            Ok(())
        }
    }
}

/// Run a turn on its own task. Outputs arrive in order on the returned
/// receiver, followed by exactly one `Finished`. Dropping the receiver
/// stops the turn at its next emit.
pub fn spawn_turn(
    backends: Arc<Backends>,
    metrics: Arc<PipelineMetrics>,
    history: Vec<Turn>,
    cancel: CancellationToken,
) -> mpsc::Receiver<TurnEvent> {
    let (mut tx, rx) = mpsc::channel(TURN_CHANNEL_CAPACITY);
    tokio::spawn(
        async move {
            let mut orchestrator = TurnOrchestrator::new(backends, metrics, cancel);
            let outcome = orchestrator.run(&history, &mut tx).await;
            let _ = tx.send(TurnEvent::Finished(outcome)).await;
        }
        .instrument(tracing::info_span!("turn")),
    );
    rx
}
