//! Local synthesis with a Piper ONNX voice.

use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};

use anyhow::Context;
use async_trait::async_trait;
use piper_rs::synth::{PiperSpeechStreamParallel, PiperSpeechSynthesizer};
use tracing::{debug, info};

use crate::wav::encode_wav;
use crate::{check_input, SpeechSynthesizer, TtsError, TTS_MAX_CHARS};

/// Piper voice loaded once and shared across sessions. Produces WAV bytes.
pub struct PiperSynthesizer {
    synth: Arc<RwLock<PiperSpeechSynthesizer>>,
    sample_rate: u32,
    max_chars: usize,
}

// PiperSpeechSynthesizer doesn't implement Debug
impl std::fmt::Debug for PiperSynthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PiperSynthesizer")
            .field("synth", &"<PiperSpeechSynthesizer>")
            .field("sample_rate", &self.sample_rate)
            .field("max_chars", &self.max_chars)
            .finish()
    }
}

impl PiperSynthesizer {
    /// Load the voice described by a Piper `*.onnx.json` config.
    pub fn load<P: AsRef<Path>>(cfg_path: P) -> anyhow::Result<Self> {
        let cfg_path = cfg_path.as_ref();
        let sample_rate = read_sample_rate(cfg_path)?;
        let model = piper_rs::from_config_path(cfg_path)
            .map_err(|e| anyhow::anyhow!("piper load error: {e}"))?;
        let synth = PiperSpeechSynthesizer::new(model)?;
        info!(config = %cfg_path.display(), sample_rate, "piper voice loaded");
        Ok(Self {
            synth: Arc::new(RwLock::new(synth)),
            sample_rate,
            max_chars: TTS_MAX_CHARS,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for PiperSynthesizer {
    fn max_chars(&self) -> usize {
        self.max_chars
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, TtsError> {
        check_input(text, self.max_chars)?;

        let synth = self.synth.clone();
        let sample_rate = self.sample_rate;
        let text = text.to_string();
        // ONNX inference is CPU bound; keep it off the async workers
        let wav = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<u8>> {
            let samples = synthesize_samples(&synth, &text)?;
            encode_wav(&samples, sample_rate)
        })
        .await
        .map_err(|e| TtsError::Engine(format!("synthesis task failed: {e}")))?
        .map_err(|e| TtsError::Engine(e.to_string()))?;

        debug!(bytes = wav.len(), "piper audio encoded");
        Ok(wav)
    }
}

fn synthesize_samples(
    synth: &RwLock<PiperSpeechSynthesizer>,
    text: &str,
) -> anyhow::Result<Vec<f32>> {
    let synth = synth
        .read()
        .map_err(|_| anyhow::anyhow!("synthesizer lock poisoned"))?;

    let iter: PiperSpeechStreamParallel = synth
        .synthesize_parallel(text.to_string(), None)
        .map_err(|e| anyhow::anyhow!("piper synth error: {e}"))?;

    let mut samples: Vec<f32> = Vec::new();
    for part in iter {
        samples.extend(
            part.map_err(|e| anyhow::anyhow!("chunk error: {e}"))?
                .into_vec(),
        );
    }
    Ok(samples)
}

/// Read `audio.sample_rate` from a Piper model config JSON.
fn read_sample_rate(cfg_path: &Path) -> anyhow::Result<u32> {
    let text = fs::read_to_string(cfg_path)
        .with_context(|| format!("Failed to read config file: {}", cfg_path.display()))?;
    parse_sample_rate(&text)
}

fn parse_sample_rate(config_json: &str) -> anyhow::Result<u32> {
    let json: serde_json::Value =
        serde_json::from_str(config_json).context("Config file is not valid JSON")?;
    let sample_rate = json
        .get("audio")
        .and_then(|a| a.get("sample_rate"))
        .and_then(|sr| sr.as_u64())
        .ok_or_else(|| anyhow::anyhow!("Missing or invalid 'audio.sample_rate' in config"))?;
    Ok(sample_rate as u32)
}
