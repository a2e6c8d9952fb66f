//! Media extraction and remuxing collaborator.

use std::path::Path;

use async_trait::async_trait;

use crate::audio::{self, SubtitleTrack};
use crate::error::Result;

#[async_trait]
pub trait MediaProcessor: Send + Sync {
    /// Write the video's audio track to `audio_out` as WAV and return the
    /// video's duration in milliseconds.
    async fn extract_audio(&self, video: &Path, audio_out: &Path) -> Result<u64>;

    /// Replace the audio of `video`, optionally adding subtitles.
    async fn remux(
        &self,
        video: &Path,
        audio: &Path,
        subtitle: Option<&SubtitleTrack>,
        output: &Path,
    ) -> Result<()>;

    fn name(&self) -> &'static str;
}

/// [`MediaProcessor`] driving the `ffmpeg` and `ffprobe` binaries.
#[derive(Debug, Clone)]
pub struct FfmpegMedia {
    sample_rate: u32,
}

impl FfmpegMedia {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    /// Fail early when either binary is missing.
    pub async fn check(&self) -> Result<()> {
        audio::check_ffmpeg().await?;
        audio::check_ffprobe().await
    }
}

impl Default for FfmpegMedia {
    fn default() -> Self {
        Self::new(16_000)
    }
}

#[async_trait]
impl MediaProcessor for FfmpegMedia {
    async fn extract_audio(&self, video: &Path, audio_out: &Path) -> Result<u64> {
        let meta = audio::extract_audio(video, audio_out, self.sample_rate).await?;
        Ok(meta.duration_ms())
    }

    async fn remux(
        &self,
        video: &Path,
        audio: &Path,
        subtitle: Option<&SubtitleTrack>,
        output: &Path,
    ) -> Result<()> {
        audio::remux_video(video, audio, subtitle, output).await
    }

    fn name(&self) -> &'static str {
        "ffmpeg"
    }
}
