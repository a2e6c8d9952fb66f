use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{DubError, Result};

use super::AudioMetadata;

fn ffmpeg_error(message: impl Into<String>) -> DubError {
    DubError::provider("ffmpeg", message)
}

/// Check if FFmpeg is installed and accessible.
pub async fn check_ffmpeg() -> Result<()> {
    let output = Command::new("ffmpeg")
        .arg("-version")
        .output()
        .await
        .map_err(|e| {
            ffmpeg_error(format!(
                "FFmpeg not found. Please install FFmpeg and ensure it's in your PATH. Error: {e}"
            ))
        })?;

    if !output.status.success() {
        return Err(ffmpeg_error("FFmpeg check failed"));
    }

    debug!("FFmpeg is available");
    Ok(())
}

/// Check if FFprobe is installed and accessible.
pub async fn check_ffprobe() -> Result<()> {
    let output = Command::new("ffprobe")
        .arg("-version")
        .output()
        .await
        .map_err(|e| {
            ffmpeg_error(format!(
                "FFprobe not found. Please install FFmpeg (includes FFprobe). Error: {e}"
            ))
        })?;

    if !output.status.success() {
        return Err(ffmpeg_error("FFprobe check failed"));
    }

    debug!("FFprobe is available");
    Ok(())
}

/// Container duration in milliseconds (truncated) using FFprobe.
pub async fn get_duration_ms(input: &Path) -> Result<u64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(input)
        .output()
        .await
        .map_err(|e| ffmpeg_error(format!("Failed to run FFprobe: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(DubError::DurationComputation(format!(
            "FFprobe failed: {}",
            stderr.trim()
        )));
    }

    let duration_str = String::from_utf8_lossy(&output.stdout);
    parse_duration_ms(duration_str.trim())
}

fn parse_duration_ms(raw: &str) -> Result<u64> {
    let secs: f64 = raw.parse().map_err(|e| {
        DubError::DurationComputation(format!("Failed to parse duration '{raw}': {e}"))
    })?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(DubError::DurationComputation(format!(
            "Nonsensical duration '{raw}'"
        )));
    }
    Ok((secs * 1000.0) as u64)
}

/// Extract the audio track of a video as mono 16-bit PCM WAV at `sample_rate`.
pub async fn extract_audio(input: &Path, output: &Path, sample_rate: u32) -> Result<AudioMetadata> {
    if !input.exists() {
        return Err(DubError::NotFound(input.display().to_string()));
    }

    info!("Extracting audio from {}", input.display());

    let duration_ms = get_duration_ms(input).await?;
    debug!("Input duration: {}ms", duration_ms);

    let rate = sample_rate.to_string();
    let output_status = Command::new("ffmpeg")
        .args(["-y", "-i"])
        .arg(input)
        .args(["-vn", "-acodec", "pcm_s16le", "-ar", &rate, "-ac", "1"])
        .arg(output)
        .output()
        .await
        .map_err(|e| ffmpeg_error(format!("Failed to run FFmpeg: {e}")))?;

    if !output_status.status.success() {
        let stderr = String::from_utf8_lossy(&output_status.stderr);
        return Err(ffmpeg_error(format!(
            "audio extraction failed: {}",
            last_line(&stderr)
        )));
    }

    if !output.exists() {
        return Err(ffmpeg_error("Output file was not created"));
    }

    info!("Audio extracted to {}", output.display());

    Ok(AudioMetadata {
        duration: Duration::from_millis(duration_ms),
        sample_rate,
        channels: 1,
    })
}

/// Build the `atempo` filter chain for the given per-stage ratios.
pub fn atempo_filter(stages: &[f64]) -> String {
    stages
        .iter()
        .map(|r| format!("atempo={:.6}", r))
        .collect::<Vec<_>>()
        .join(",")
}

/// Time-compress `input` by the product of `stages`, keeping pitch.
pub async fn adjust_tempo(input: &Path, output: &Path, stages: &[f64], sample_rate: u32) -> Result<()> {
    if stages.is_empty() {
        tokio::fs::copy(input, output).await?;
        return Ok(());
    }

    let filter = atempo_filter(stages);
    let rate = sample_rate.to_string();
    debug!("Adjusting tempo with {}", filter);

    let out = Command::new("ffmpeg")
        .args(["-y", "-i"])
        .arg(input)
        .args(["-filter:a", &filter, "-vn", "-acodec", "pcm_s16le", "-ar", &rate, "-ac", "1"])
        .arg(output)
        .output()
        .await
        .map_err(|e| ffmpeg_error(format!("Failed to run FFmpeg: {e}")))?;

    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        return Err(ffmpeg_error(format!(
            "tempo adjustment failed: {}",
            last_line(&stderr)
        )));
    }
    Ok(())
}

/// Subtitle file handed to [`remux_video`].
#[derive(Debug, Clone)]
pub struct SubtitleTrack {
    pub path: PathBuf,
    /// Render into the picture instead of muxing a soft subtitle stream.
    pub burn: bool,
}

/// Escape a path for use inside an ffmpeg filter argument.
fn escape_filter_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "\\\\")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

pub fn remux_args(
    video: &Path,
    audio: &Path,
    subtitle: Option<&SubtitleTrack>,
    output: &Path,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-i".into(),
        video.to_string_lossy().into_owned(),
        "-i".into(),
        audio.to_string_lossy().into_owned(),
    ];

    let soft = subtitle.filter(|t| !t.burn);
    if let Some(track) = soft {
        args.extend(["-i".into(), track.path.to_string_lossy().into_owned()]);
    }

    args.extend([
        "-map".into(),
        "0:v:0".into(),
        "-map".into(),
        "1:a:0".into(),
    ]);
    if soft.is_some() {
        args.extend([
            "-map".into(),
            "2:s:0".into(),
            "-c:s".into(),
            "mov_text".into(),
        ]);
    }

    match subtitle {
        Some(track) if track.burn => args.extend([
            "-vf".into(),
            format!(
                "subtitles='{}':force_style='FontName=Arial,FontSize=24,Outline=2,Shadow=1'",
                escape_filter_path(&track.path)
            ),
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            "veryfast".into(),
            "-crf".into(),
            "23".into(),
            "-pix_fmt".into(),
            "yuv420p".into(),
        ]),
        _ => args.extend(["-c:v".into(), "copy".into()]),
    }

    args.extend([
        "-c:a".into(),
        "aac".into(),
        "-b:a".into(),
        "192k".into(),
        "-shortest".into(),
        output.to_string_lossy().into_owned(),
    ]);
    args
}

/// Replace the audio track of `video` and optionally attach or burn subtitles.
pub async fn remux_video(
    video: &Path,
    audio: &Path,
    subtitle: Option<&SubtitleTrack>,
    output: &Path,
) -> Result<()> {
    info!(
        "Remuxing {} with {} (subtitles: {})",
        video.display(),
        audio.display(),
        subtitle.map(|s| if s.burn { "burn" } else { "external" }).unwrap_or("none")
    );

    let out = Command::new("ffmpeg")
        .args(remux_args(video, audio, subtitle, output))
        .output()
        .await
        .map_err(|e| ffmpeg_error(format!("Failed to run FFmpeg: {e}")))?;

    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        return Err(ffmpeg_error(format!("muxing failed: {}", last_line(&stderr))));
    }

    let size = tokio::fs::metadata(output)
        .await
        .map(|m| m.len())
        .unwrap_or(0);
    if size == 0 {
        return Err(ffmpeg_error("output video is empty"));
    }

    info!("Muxed video written to {} ({} bytes)", output.display(), size);
    Ok(())
}

fn last_line(stderr: &str) -> &str {
    stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("no output")
}
