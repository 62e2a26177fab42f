// Configuration for the voice chat server

use std::str::FromStr;
use std::time::Duration;

use llm_core::{LlmProvider, LlmSettings, DEFAULT_SYSTEM_PROMPT};
use tts_core::{SpeechSettings, TtsProvider, DEFAULT_MAX_CHUNK_CHARS, TTS_MAX_CHARS};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Non-system turns kept per connection.
    pub history_limit: usize,
    /// Sentences longer than this are re-split before synthesis.
    pub max_sentence_length: usize,
    pub tts_max_chars: usize,
    pub llm_provider: LlmProvider,
    pub llm_model: String,
    pub llm_base_url: Option<String>,
    pub llm_max_tokens: u32,
    pub llm_max_continuations: usize,
    pub llm_timeout_secs: u64,
    pub openai_api_key: Option<String>,
    pub tts_provider: TtsProvider,
    pub tts_model: String,
    pub tts_voice: String,
    pub piper_config: String,
    pub system_prompt: String,
    pub cors_allowed_origins: Option<Vec<String>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup; unset or unparsable values fall
    /// back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let llm_provider = get("LLM_PROVIDER")
            .map(|v| LlmProvider::from_name(&v))
            .unwrap_or(LlmProvider::OpenAI);

        let cors_allowed_origins = get("CORS_ALLOWED_ORIGINS").map(|origins| {
            origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        });

        Self {
            port: parse_or(get("PORT"), 8000),
            history_limit: parse_or(get("HISTORY_LIMIT"), 20),
            max_sentence_length: parse_or(get("MAX_SENTENCE_LENGTH"), DEFAULT_MAX_CHUNK_CHARS),
            tts_max_chars: parse_or(get("TTS_MAX_CHARS"), TTS_MAX_CHARS),
            llm_provider,
            llm_model: get("LLM_MODEL")
                .unwrap_or_else(|| llm_provider.default_model().to_string()),
            llm_base_url: get("LLM_BASE_URL"),
            llm_max_tokens: parse_or(get("LLM_MAX_TOKENS"), 1500),
            llm_max_continuations: parse_or(get("LLM_MAX_CONTINUATIONS"), 2),
            llm_timeout_secs: parse_or(get("LLM_TIMEOUT_SECS"), 120),
            openai_api_key: get("OPENAI_API_KEY"),
            tts_provider: get("TTS_PROVIDER")
                .map(|v| TtsProvider::from_name(&v))
                .unwrap_or(TtsProvider::OpenAI),
            tts_model: get("TTS_MODEL").unwrap_or_else(|| "tts-1".to_string()),
            tts_voice: get("TTS_VOICE").unwrap_or_else(|| "alloy".to_string()),
            piper_config: get("PIPER_CONFIG")
                .unwrap_or_else(|| "models/voice.onnx.json".to_string()),
            system_prompt: get("SYSTEM_PROMPT")
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            cors_allowed_origins,
        }
    }

    /// Ceiling handed to the splitter; never above what the synthesizer accepts.
    pub fn synthesis_max_length(&self) -> usize {
        self.max_sentence_length.min(self.tts_max_chars).max(1)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }

    pub fn llm_settings(&self) -> LlmSettings {
        let mut settings = LlmSettings::new(self.llm_provider);
        settings.model = self.llm_model.clone();
        settings.base_url = self.llm_base_url.clone();
        settings.api_key = self.openai_api_key.clone();
        settings.max_tokens = self.llm_max_tokens;
        settings.max_continuations = self.llm_max_continuations;
        settings
    }

    pub fn speech_settings(&self) -> anyhow::Result<SpeechSettings> {
        let api_key = self
            .openai_api_key
            .clone()
            .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY must be set for OpenAI speech"))?;
        let mut settings = SpeechSettings::new(api_key);
        settings.model = self.tts_model.clone();
        settings.voice = self.tts_voice.clone();
        settings.max_chars = self.tts_max_chars;
        Ok(settings)
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> ServerConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.history_limit, 20);
        assert_eq!(config.llm_provider, LlmProvider::OpenAI);
        assert_eq!(config.llm_model, "gpt-4o-mini");
        assert_eq!(config.synthesis_max_length(), 4000);
        assert_eq!(config.tts_provider, TtsProvider::OpenAI);
        assert!(config.cors_allowed_origins.is_none());
        assert_eq!(config.system_prompt, DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn test_overrides_and_invalid_values() {
        let config = config_from(&[
            ("PORT", "9001"),
            ("HISTORY_LIMIT", "not-a-number"),
            ("LLM_PROVIDER", "ollama"),
            ("CORS_ALLOWED_ORIGINS", "http://a.test, http://b.test,"),
        ]);
        assert_eq!(config.port, 9001);
        assert_eq!(config.history_limit, 20);
        assert_eq!(config.llm_provider, LlmProvider::Ollama);
        assert_eq!(config.llm_model, "llama3");
        assert_eq!(
            config.cors_allowed_origins,
            Some(vec!["http://a.test".to_string(), "http://b.test".to_string()])
        );
    }

    #[test]
    fn test_splitter_ceiling_is_clamped_to_synthesizer() {
        let config = config_from(&[("MAX_SENTENCE_LENGTH", "10000")]);
        assert_eq!(config.synthesis_max_length(), TTS_MAX_CHARS);
        let config = config_from(&[("MAX_SENTENCE_LENGTH", "100"), ("TTS_MAX_CHARS", "50")]);
        assert_eq!(config.synthesis_max_length(), 50);
    }

    #[test]
    fn test_speech_settings_require_key() {
        assert!(ServerConfig::default().speech_settings().is_err());
        let config = config_from(&[("OPENAI_API_KEY", "sk-test"), ("TTS_VOICE", "nova")]);
        let settings = config.speech_settings().unwrap();
        assert_eq!(settings.voice, "nova");
        assert_eq!(config.llm_settings().api_key.as_deref(), Some("sk-test"));
    }
}
