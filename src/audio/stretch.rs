//! Time compression backends.
//!
//! A backend compresses a clip by a ratio within `(1.0, max_stage_ratio()]`
//! per call; larger ratios are applied as a chain from [`tempo_chain`].

use async_trait::async_trait;
use tempfile::TempDir;

use crate::error::{DubError, Result};

use super::{extract, wav, AudioClip};

const RATIO_EPSILON: f64 = 1e-9;

#[async_trait]
pub trait TimeStretch: Send + Sync {
    /// Largest compression a single [`TimeStretch::stretch`] call accepts.
    fn max_stage_ratio(&self) -> f64;

    /// Return `clip` played `ratio` times faster.
    async fn stretch(&self, clip: &AudioClip, ratio: f64) -> Result<AudioClip>;

    fn name(&self) -> &'static str;
}

/// Split `ratio` into stages no larger than `max_stage` whose product is `ratio`.
///
/// Ratios at or below 1.0 need no compression and yield an empty chain.
pub fn tempo_chain(ratio: f64, max_stage: f64) -> Vec<f64> {
    let mut stages = Vec::new();
    if !ratio.is_finite() || ratio <= 1.0 + RATIO_EPSILON {
        return stages;
    }
    let max_stage = if max_stage.is_finite() && max_stage > 1.0 {
        max_stage
    } else {
        ratio
    };

    let mut remaining = ratio;
    while remaining > max_stage + RATIO_EPSILON {
        stages.push(max_stage);
        remaining /= max_stage;
    }
    if remaining > 1.0 + RATIO_EPSILON {
        stages.push(remaining);
    }
    stages
}

/// Sample `samples` at positions `0, step, 2*step, ...` with linear interpolation.
pub(crate) fn interpolate(samples: &[i16], step: f64, out_len: usize) -> Vec<i16> {
    if samples.is_empty() {
        return Vec::new();
    }
    let last = samples.len() - 1;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let i0 = (pos.floor() as usize).min(last);
            let frac = (pos - i0 as f64).clamp(0.0, 1.0);
            let a = samples[i0] as f64;
            let b = samples[(i0 + 1).min(last)] as f64;
            (a + (b - a) * frac).round() as i16
        })
        .collect()
}

/// Pure-Rust compression by resampling. Shifts pitch, but is deterministic
/// and needs no external tools.
#[derive(Debug, Clone)]
pub struct ResampleStretch {
    max_stage_ratio: f64,
}

impl ResampleStretch {
    pub fn new(max_stage_ratio: f64) -> Self {
        Self { max_stage_ratio }
    }
}

impl Default for ResampleStretch {
    fn default() -> Self {
        Self::new(2.0)
    }
}

#[async_trait]
impl TimeStretch for ResampleStretch {
    fn max_stage_ratio(&self) -> f64 {
        self.max_stage_ratio
    }

    async fn stretch(&self, clip: &AudioClip, ratio: f64) -> Result<AudioClip> {
        check_ratio(ratio, self.max_stage_ratio)?;
        let out_len = (clip.len() as f64 / ratio).floor() as usize;
        Ok(AudioClip::new(
            interpolate(&clip.samples, ratio, out_len),
            clip.sample_rate,
        ))
    }

    fn name(&self) -> &'static str {
        "resample"
    }
}

/// Pitch-preserving compression through ffmpeg's `atempo` filter.
#[derive(Debug, Clone, Default)]
pub struct FfmpegAtempo;

/// `atempo` accepts at most 2.0 per filter instance on older ffmpeg builds.
const ATEMPO_MAX_RATIO: f64 = 2.0;

#[async_trait]
impl TimeStretch for FfmpegAtempo {
    fn max_stage_ratio(&self) -> f64 {
        ATEMPO_MAX_RATIO
    }

    async fn stretch(&self, clip: &AudioClip, ratio: f64) -> Result<AudioClip> {
        check_ratio(ratio, ATEMPO_MAX_RATIO)?;

        let dir = TempDir::new()?;
        let input = dir.path().join("in.wav");
        let output = dir.path().join("out.wav");
        wav::write_wav(&input, clip)?;
        extract::adjust_tempo(&input, &output, &[ratio], clip.sample_rate).await?;
        wav::read_wav(&output)
    }

    fn name(&self) -> &'static str {
        "ffmpeg-atempo"
    }
}

fn check_ratio(ratio: f64, max: f64) -> Result<()> {
    if !ratio.is_finite() || ratio <= 0.0 || ratio > max + RATIO_EPSILON {
        return Err(DubError::provider(
            "time-stretch",
            format!("ratio {ratio} outside supported range (0, {max}]"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(stages: &[f64]) -> f64 {
        stages.iter().product()
    }

    #[test]
    fn test_chain_empty_when_no_compression_needed() {
        assert!(tempo_chain(1.0, 2.0).is_empty());
        assert!(tempo_chain(0.5, 2.0).is_empty());
    }

    #[test]
    fn test_chain_single_stage() {
        let stages = tempo_chain(4000.0 / 3000.0, 2.0);
        assert_eq!(stages.len(), 1);
        assert!((stages[0] - 4.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_chain_respects_stage_bound() {
        for ratio in [2.0, 2.5, 7.3, 16.0, 63.9, 100.0] {
            let stages = tempo_chain(ratio, 2.0);
            assert!(stages.iter().all(|&s| s > 1.0 && s <= 2.0 + 1e-9), "{ratio}: {stages:?}");
            assert!((product(&stages) - ratio).abs() / ratio < 1e-9, "{ratio}: {stages:?}");
        }
    }

    #[test]
    fn test_chain_exact_power_has_no_fractional_tail() {
        assert_eq!(tempo_chain(8.0, 2.0), vec![2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_chain_unbounded_backend() {
        assert_eq!(tempo_chain(5.0, f64::INFINITY), vec![5.0]);
    }

    #[tokio::test]
    async fn test_resample_stretch_shortens_by_ratio() {
        let clip = AudioClip::new(vec![1000; 96_000], 24_000);
        let out = ResampleStretch::default()
            .stretch(&clip, 4000.0 / 3000.0)
            .await
            .unwrap();
        assert_eq!(out.duration_ms(), 3000);
        assert!(out.samples.iter().all(|&s| s == 1000));
    }

    #[tokio::test]
    async fn test_resample_stretch_rejects_out_of_range() {
        let clip = AudioClip::new(vec![0; 100], 8_000);
        assert!(ResampleStretch::new(2.0).stretch(&clip, 3.0).await.is_err());
        assert!(ResampleStretch::new(2.0).stretch(&clip, f64::NAN).await.is_err());
    }

    #[tokio::test]
    async fn test_composed_chain_matches_net_ratio() {
        let clip = AudioClip::new(vec![0; 240_000], 24_000); // 10s
        let stretch = ResampleStretch::default();
        let ratio = 7.3;
        let mut out = clip.clone();
        for stage in tempo_chain(ratio, stretch.max_stage_ratio()) {
            out = stretch.stretch(&out, stage).await.unwrap();
        }
        let expected = 10_000.0 / ratio;
        assert!((out.duration_ms() as f64 - expected).abs() <= 2.0);
    }
}
