use crate::error::{DubError, Result};
use crate::timeline::TimelineConfig;
use crate::translate::ChunkerConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranslatorBackend {
    #[default]
    Gemini,
    OpenAi,
}

impl std::fmt::Display for TranslatorBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TranslatorBackend::Gemini => write!(f, "gemini"),
            TranslatorBackend::OpenAi => write!(f, "openai"),
        }
    }
}

impl std::str::FromStr for TranslatorBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gemini" => Ok(TranslatorBackend::Gemini),
            "openai" => Ok(TranslatorBackend::OpenAi),
            _ => Err(format!("Unknown translator: {}. Use 'gemini' or 'openai'", s)),
        }
    }
}

/// Which time compression implementation the timeline uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StretchBackend {
    #[default]
    Ffmpeg,
    Resample,
}

impl std::str::FromStr for StretchBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ffmpeg" => Ok(StretchBackend::Ffmpeg),
            "resample" => Ok(StretchBackend::Resample),
            _ => Err(format!("Unknown stretch backend: {}. Use 'ffmpeg' or 'resample'", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub openai_base_url: String,
    pub gemini_base_url: String,

    pub translator: TranslatorBackend,
    pub whisper_model: String,
    pub gemini_model: String,
    pub openai_chat_model: String,
    pub tts_model: String,
    pub tts_voice: String,

    /// Concurrent speech synthesis calls within one job.
    pub concurrency: usize,
    /// Jobs running at once in the worker pool.
    pub job_concurrency: usize,
    pub stage_timeout_secs: u64,
    /// Sample rate of the audio handed to speech recognition.
    pub extract_sample_rate: u32,
    pub stretch: StretchBackend,
    /// Show the original line under the translation in subtitles.
    pub bilingual_subtitles: bool,

    pub chunker: ChunkerConfig,
    pub timeline: TimelineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            gemini_api_key: None,
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            translator: TranslatorBackend::default(),
            whisper_model: "whisper-1".to_string(),
            gemini_model: "gemini-2.0-flash".to_string(),
            openai_chat_model: "gpt-4o-mini".to_string(),
            tts_model: "tts-1".to_string(),
            tts_voice: "alloy".to_string(),
            concurrency: 4,
            job_concurrency: 2,
            stage_timeout_secs: 1800,
            extract_sample_rate: 16_000,
            stretch: StretchBackend::default(),
            bilingual_subtitles: false,
            chunker: ChunkerConfig::default(),
            timeline: TimelineConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        // Load from config file if it exists
        if let Some(config_path) = Self::config_file_path() {
            if config_path.exists() {
                let contents = std::fs::read_to_string(&config_path)?;
                config = toml::from_str::<Config>(&contents).map_err(|e| {
                    DubError::Config(format!("{}: {}", config_path.display(), e))
                })?;
            }
        }

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Override fields from environment-style variables supplied by `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.openai_api_key = Some(key);
        }
        if let Some(key) = lookup("GEMINI_API_KEY") {
            self.gemini_api_key = Some(key);
        }
        if let Some(t) = lookup("AUTODUB_TRANSLATOR").and_then(|v| v.parse().ok()) {
            self.translator = t;
        }
        if let Some(c) = lookup("AUTODUB_CONCURRENCY").and_then(|v| v.parse().ok()) {
            self.concurrency = c;
        }
        if let Some(c) = lookup("AUTODUB_JOB_CONCURRENCY").and_then(|v| v.parse().ok()) {
            self.job_concurrency = c;
        }
        if let Some(s) = lookup("AUTODUB_STAGE_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.stage_timeout_secs = s;
        }
        if let Some(n) = lookup("AUTODUB_MAX_CHARS_PER_CHUNK").and_then(|v| v.parse().ok()) {
            self.chunker.max_chars_per_chunk = n;
        }
        if let Some(n) = lookup("AUTODUB_OVERLAP_SEGMENTS").and_then(|v| v.parse().ok()) {
            self.chunker.overlap_segments = n;
        }
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.openai_api_key.is_none() {
            return Err(DubError::Config(
                "OPENAI_API_KEY not set. Export it with: export OPENAI_API_KEY=sk-...".to_string(),
            ));
        }
        if self.translator == TranslatorBackend::Gemini && self.gemini_api_key.is_none() {
            return Err(DubError::Config(
                "GEMINI_API_KEY not set. Get one at https://aistudio.google.com/apikey".to_string(),
            ));
        }

        if self.concurrency == 0 || self.job_concurrency == 0 {
            return Err(DubError::Config(
                "Concurrency must be greater than 0".to_string(),
            ));
        }
        if self.stage_timeout_secs == 0 {
            return Err(DubError::Config(
                "Stage timeout must be greater than 0".to_string(),
            ));
        }
        if self.chunker.max_chars_per_chunk == 0 {
            return Err(DubError::Config(
                "max_chars_per_chunk must be greater than 0".to_string(),
            ));
        }
        if !(self.timeline.max_speed_ratio >= 1.0) || !(self.timeline.max_stage_ratio >= 1.0) {
            return Err(DubError::Config(
                "Speed ratio ceilings must be at least 1.0".to_string(),
            ));
        }
        if self.timeline.sample_rate == 0 || self.extract_sample_rate == 0 {
            return Err(DubError::Config("Sample rates must be positive".to_string()));
        }

        Ok(())
    }

    fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("autodub").join("config.toml"))
    }
}
