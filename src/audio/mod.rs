pub mod extract;
pub mod stretch;
pub mod wav;

pub use extract::{
    adjust_tempo, check_ffmpeg, check_ffprobe, extract_audio, get_duration_ms, remux_video,
    SubtitleTrack,
};
pub use stretch::{tempo_chain, FfmpegAtempo, ResampleStretch, TimeStretch};
pub use wav::{decode_wav, encode_wav, read_wav, write_wav};

use std::time::Duration;

/// Metadata about an extracted audio track.
#[derive(Debug, Clone)]
pub struct AudioMetadata {
    pub duration: Duration,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioMetadata {
    pub fn duration_ms(&self) -> u64 {
        self.duration.as_millis() as u64
    }
}

/// Mono 16-bit PCM held in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

/// Sample offset of `ms` at `sample_rate`, rounded down.
pub fn samples_at_ms(ms: u64, sample_rate: u32) -> usize {
    (ms * sample_rate as u64 / 1000) as usize
}

impl AudioClip {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Silence long enough that its measured duration is exactly `duration_ms`.
    pub fn silent(duration_ms: u64, sample_rate: u32) -> Self {
        let len = (duration_ms * sample_rate as u64).div_ceil(1000) as usize;
        Self::new(vec![0; len], sample_rate)
    }

    /// Duration in whole milliseconds, truncated.
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Keep at most `max_samples` samples.
    pub fn truncate(&mut self, max_samples: usize) {
        self.samples.truncate(max_samples);
    }

    /// Linear-interpolation resample to `target_rate`.
    pub fn resampled(&self, target_rate: u32) -> AudioClip {
        if target_rate == self.sample_rate || self.samples.is_empty() || self.sample_rate == 0 {
            return AudioClip::new(self.samples.clone(), target_rate);
        }
        let out_len =
            (self.samples.len() as u64 * target_rate as u64 / self.sample_rate as u64) as usize;
        let step = self.sample_rate as f64 / target_rate as f64;
        AudioClip::new(stretch::interpolate(&self.samples, step, out_len), target_rate)
    }
}
