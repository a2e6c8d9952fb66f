use crate::config::DEFAULT_OPENAI_BASE_URL;
use crate::error::{DubError, Result};
use crate::transcribe::{SpeechRecognizer, Utterance};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, warn};

/// Maximum file size for Whisper API (25 MB).
const MAX_FILE_SIZE: u64 = 25 * 1024 * 1024;

/// Maximum retries for API calls.
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (milliseconds).
const BASE_DELAY_MS: u64 = 1000;

/// Whisper model variants.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum WhisperModel {
    #[default]
    Whisper1,
    Gpt4oTranscribe,
    Gpt4oMiniTranscribe,
    Custom(String),
}

impl WhisperModel {
    fn as_str(&self) -> &str {
        match self {
            WhisperModel::Whisper1 => "whisper-1",
            WhisperModel::Gpt4oTranscribe => "gpt-4o-transcribe",
            WhisperModel::Gpt4oMiniTranscribe => "gpt-4o-mini-transcribe",
            WhisperModel::Custom(name) => name,
        }
    }
}

impl From<&str> for WhisperModel {
    fn from(name: &str) -> Self {
        match name {
            "whisper-1" => WhisperModel::Whisper1,
            "gpt-4o-transcribe" => WhisperModel::Gpt4oTranscribe,
            "gpt-4o-mini-transcribe" => WhisperModel::Gpt4oMiniTranscribe,
            other => WhisperModel::Custom(other.to_string()),
        }
    }
}

/// OpenAI Whisper API client.
pub struct WhisperClient {
    client: reqwest::Client,
    api_key: String,
    model: WhisperModel,
    base_url: String,
    retry_delay: Duration,
}

/// A failed attempt and whether trying again could help.
struct Attempt {
    error: DubError,
    retryable: bool,
}

impl WhisperClient {
    /// Create a new Whisper client with the given API key.
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model: WhisperModel::default(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            retry_delay: Duration::from_millis(BASE_DELAY_MS),
        }
    }

    /// Set the model to use.
    pub fn with_model(mut self, model: impl Into<WhisperModel>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Base delay between retries; doubled on each attempt.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Build the multipart form for the API request.
    async fn build_form(&self, audio_path: &Path, language: Option<&str>) -> Result<Form> {
        let file_bytes = fs::read(audio_path).await?;
        let file_name = audio_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.wav")
            .to_string();

        let mime_type = match audio_path.extension().and_then(|e| e.to_str()) {
            Some("wav") => "audio/wav",
            Some("mp3") => "audio/mpeg",
            Some("m4a") => "audio/mp4",
            Some("flac") => "audio/flac",
            Some("ogg") => "audio/ogg",
            Some("webm") => "audio/webm",
            _ => "application/octet-stream",
        };

        let file_part = Part::bytes(file_bytes)
            .file_name(file_name)
            .mime_str(mime_type)?;

        let mut form = Form::new()
            .part("file", file_part)
            .text("model", self.model.as_str().to_string())
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "segment");

        if let Some(lang) = language.filter(|l| !l.is_empty() && !l.eq_ignore_ascii_case("auto")) {
            form = form.text("language", lang.to_string());
        }

        Ok(form)
    }

    /// Make the API request (form is consumed, so no retries at this level).
    async fn call_api(&self, form: Form) -> std::result::Result<WhisperResponse, Attempt> {
        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Attempt {
                error: e.into(),
                retryable: true,
            })?;

        let status = response.status();
        debug!("Whisper API response status: {}", status);

        let body = response.text().await.unwrap_or_default();

        if status.is_success() {
            debug!("Whisper API response: {}", body.chars().take(500).collect::<String>());
            return serde_json::from_str(&body).map_err(|e| Attempt {
                error: DubError::provider("Whisper", format!("unusable response: {}", e)),
                retryable: false,
            });
        }

        // Try to parse API error
        let message = match serde_json::from_str::<ApiErrorResponse>(&body) {
            Ok(api_error) => format!("{} ({})", api_error.error.message, api_error.error.r#type),
            Err(_) => body,
        };

        Err(Attempt {
            error: DubError::provider("Whisper", format!("API error ({}): {}", status, message)),
            // Don't retry on client errors other than rate limiting
            retryable: status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS,
        })
    }

    /// Transcribe with retry logic - rebuilds form on each attempt.
    async fn transcribe_with_retry(
        &self,
        audio_path: &Path,
        language: Option<&str>,
    ) -> Result<WhisperResponse> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = self.retry_delay * 2u32.pow(attempt - 1);
                debug!("Retry attempt {} after {:?} delay", attempt, delay);
                tokio::time::sleep(delay).await;
            }

            let form = self.build_form(audio_path, language).await?;

            match self.call_api(form).await {
                Ok(response) => return Ok(response),
                Err(Attempt { error, retryable }) => {
                    if !retryable {
                        return Err(error);
                    }
                    warn!("Attempt {} failed: {}", attempt + 1, error);
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| DubError::provider("Whisper", "unknown error")))
    }
}

/// Convert a Whisper response to utterances in playback order.
fn parse_response(response: WhisperResponse) -> Vec<Utterance> {
    match response.segments {
        Some(segments) => segments
            .into_iter()
            .filter(|seg| !seg.text.trim().is_empty())
            .map(|seg| {
                let start_ms = secs_to_ms(seg.start);
                Utterance {
                    start_ms,
                    end_ms: secs_to_ms(seg.end).max(start_ms),
                    text: seg.text.trim().to_string(),
                    speaker_id: None,
                    // avg_logprob is a log probability; map it into (0, 1]
                    confidence: seg.avg_logprob.map(|lp| lp.min(0.0).exp() as f32),
                }
            })
            .collect(),
        None if !response.text.trim().is_empty() => {
            // Fallback: create a single segment with the full text
            vec![Utterance {
                start_ms: 0,
                end_ms: response.duration.map(secs_to_ms).unwrap_or(0),
                text: response.text.trim().to_string(),
                speaker_id: None,
                confidence: None,
            }]
        }
        None => Vec::new(),
    }
}

fn secs_to_ms(secs: f64) -> u64 {
    if secs.is_finite() && secs > 0.0 {
        (secs * 1000.0) as u64
    } else {
        0
    }
}

#[async_trait]
impl SpeechRecognizer for WhisperClient {
    async fn transcribe(&self, audio: &Path, language_hint: Option<&str>) -> Result<Vec<Utterance>> {
        debug!("Transcribing {:?} with Whisper", audio);

        // Check file size
        let metadata = fs::metadata(audio).await?;
        if metadata.len() > MAX_FILE_SIZE {
            return Err(DubError::provider(
                "Whisper",
                format!(
                    "file too large: {} bytes (max {} bytes)",
                    metadata.len(),
                    MAX_FILE_SIZE
                ),
            ));
        }

        let response = self.transcribe_with_retry(audio, language_hint).await?;
        let utterances = parse_response(response);

        debug!("Whisper returned {} segments", utterances.len());
        Ok(utterances)
    }

    fn name(&self) -> &'static str {
        "OpenAI Whisper"
    }
}

// API response types

#[derive(Debug, Deserialize)]
struct WhisperResponse {
    text: String,
    #[serde(default)]
    segments: Option<Vec<WhisperSegment>>,
    #[serde(default)]
    duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    start: f64,
    end: f64,
    text: String,
    #[serde(default)]
    avg_logprob: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    r#type: String,
}
