//! Hosted speech synthesis via the OpenAI `/audio/speech` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::{check_input, SpeechSynthesizer, TtsError, TTS_MAX_CHARS};

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    response_format: &'a str,
}

#[derive(Debug, Clone)]
pub struct SpeechSettings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub voice: String,
    pub max_chars: usize,
}

impl SpeechSettings {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "tts-1".to_string(),
            voice: "alloy".to_string(),
            max_chars: TTS_MAX_CHARS,
        }
    }
}

pub struct OpenAiSpeech {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    voice: String,
    max_chars: usize,
}

impl OpenAiSpeech {
    pub fn new(settings: SpeechSettings) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/audio/speech", settings.base_url.trim_end_matches('/')),
            api_key: settings.api_key,
            model: settings.model,
            voice: settings.voice,
            // the hosted endpoint never accepts more than TTS_MAX_CHARS
            max_chars: settings.max_chars.min(TTS_MAX_CHARS),
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSpeech {
    fn max_chars(&self) -> usize {
        self.max_chars
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, TtsError> {
        check_input(text, self.max_chars)?;

        let body = SpeechRequest {
            model: &self.model,
            voice: &self.voice,
            input: text,
            response_format: "mp3",
        };
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TtsError::Api { status: status.as_u16(), message });
        }
        let audio = response.bytes().await?;
        debug!(chars = text.chars().count(), bytes = audio.len(), "speech synthesized");
        Ok(audio.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_oversized_input_before_any_request() {
        // unroutable base URL: reaching the network would fail differently
        let mut settings = SpeechSettings::new("test-key");
        settings.base_url = "http://127.0.0.1:9".into();
        let speech = OpenAiSpeech::new(settings).unwrap();

        let err = speech.synthesize(&"a".repeat(5000)).await.unwrap_err();
        assert!(matches!(err, TtsError::ChunkTooLong { len: 5000, max: 4096 }));
        let err = speech.synthesize("   ").await.unwrap_err();
        assert!(matches!(err, TtsError::EmptyText));
    }

    #[test]
    fn test_ceiling_is_capped() {
        let mut settings = SpeechSettings::new("k");
        settings.max_chars = 10_000;
        let speech = OpenAiSpeech::new(settings).unwrap();
        assert_eq!(speech.max_chars(), TTS_MAX_CHARS);
        assert_eq!(speech.endpoint, "https://api.openai.com/v1/audio/speech");
    }
}
