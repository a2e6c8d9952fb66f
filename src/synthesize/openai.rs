//! OpenAI text-to-speech (`/audio/speech`).

use crate::config::DEFAULT_OPENAI_BASE_URL;
use crate::error::{DubError, Result};
use crate::synthesize::SpeechSynthesizer;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

/// The speech endpoint rejects longer input.
const MAX_INPUT_CHARS: usize = 4096;

pub struct OpenAiTts {
    client: Client,
    api_key: String,
    model: String,
    voice: String,
    base_url: String,
}

impl OpenAiTts {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model: "tts-1".to_string(),
            voice: "alloy".to_string(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
}

#[async_trait]
impl SpeechSynthesizer for OpenAiTts {
    async fn synthesize(&self, text: &str, voice: Option<&str>) -> Result<Vec<u8>> {
        let text = text.trim();
        if text.is_empty() {
            return Err(DubError::provider("OpenAI TTS", "nothing to synthesize"));
        }
        if text.chars().count() > MAX_INPUT_CHARS {
            return Err(DubError::provider(
                "OpenAI TTS",
                format!("input longer than {} characters", MAX_INPUT_CHARS),
            ));
        }

        let voice = voice.filter(|v| !v.is_empty()).unwrap_or(self.voice.as_str());
        debug!("Synthesizing {} chars with voice {}", text.len(), voice);

        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&SpeechRequest {
                model: &self.model,
                input: text,
                voice,
                response_format: "wav",
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DubError::provider(
                "OpenAI TTS",
                format!("API error ({}): {}", status, body),
            ));
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(DubError::provider("OpenAI TTS", "empty audio returned"));
        }
        Ok(bytes.to_vec())
    }

    fn name(&self) -> &'static str {
        "openai-tts"
    }
}
