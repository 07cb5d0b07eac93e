//! ElevenLabs text-to-speech client.

use crate::voice::SpeechSynthesizer;
use crate::voices::VoicePreset;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const ELEVENLABS_BASE_URL: &str = "https://api.elevenlabs.io/v1";

#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Synthesis rate limit reached, retry in a few seconds")]
    RateLimited,
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error("Speech synthesis is not configured")]
    NotConfigured,
}

#[derive(Debug, Clone)]
pub struct TTSConfig {
    pub base_url: String,
    /// Lowest-latency model, suited to conversational turns.
    pub model: String,
    pub output_format: String,
    pub use_speaker_boost: bool,
    pub timeout: Duration,
}

impl Default for TTSConfig {
    fn default() -> Self {
        Self {
            base_url: ELEVENLABS_BASE_URL.to_string(),
            model: "eleven_turbo_v2".to_string(),
            output_format: "mp3_44100_128".to_string(),
            use_speaker_boost: true,
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct ElevenLabsSynthesizer {
    client: Client,
    api_key: Option<SecretString>,
    config: TTSConfig,
}

impl ElevenLabsSynthesizer {
    /// A synthesizer without a key reports itself unavailable.
    pub fn new(api_key: Option<SecretString>) -> Result<Self, SynthesisError> {
        Self::with_config(api_key, TTSConfig::default())
    }

    pub fn with_config(
        api_key: Option<SecretString>,
        config: TTSConfig,
    ) -> Result<Self, SynthesisError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            api_key: api_key.filter(|k| !k.expose_secret().trim().is_empty()),
            config,
        })
    }

    fn payload(&self, text: &str, preset: &VoicePreset) -> serde_json::Value {
        json!({
            "text": text.trim(),
            "model_id": self.config.model,
            "voice_settings": {
                "stability": preset.settings.stability,
                "similarity_boost": preset.settings.similarity_boost,
                "style": preset.settings.style,
                "use_speaker_boost": self.config.use_speaker_boost
            },
            "output_format": self.config.output_format
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsSynthesizer {
    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn synthesize(&self, text: &str, preset: &VoicePreset) -> Result<Bytes, SynthesisError> {
        let api_key = self.api_key.as_ref().ok_or(SynthesisError::NotConfigured)?;
        if text.trim().is_empty() {
            return Ok(Bytes::new());
        }

        let url = format!(
            "{}/text-to-speech/{}/stream",
            self.config.base_url, preset.voice_id
        );
        debug!(speaker = ?preset.speaker, emotion = ?preset.emotion, "Requesting speech synthesis");

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", api_key.expose_secret())
            .header("Accept", "audio/mpeg")
            .json(&self.payload(text, preset))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SynthesisError::RateLimited);
        }
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SynthesisError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.bytes().await?)
    }
}
