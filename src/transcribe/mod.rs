pub mod whisper;

pub use whisper::{WhisperClient, WhisperModel};

use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;

/// One time-aligned utterance from speech recognition.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
    pub speaker_id: Option<String>,
    pub confidence: Option<f32>,
}

#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Utterances in playback order.
    async fn transcribe(&self, audio: &Path, language_hint: Option<&str>) -> Result<Vec<Utterance>>;
    fn name(&self) -> &'static str;
}
