//! Timeline synthesis: fit per-segment speech into its slot on one track.
//!
//! Each segment owns the interval from its start to the next segment's
//! start (or the end of the track). Audio longer than its slot is
//! time-compressed, or truncated once the required speed-up passes the
//! configured ceiling, so placed segments never overlap.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::audio::{samples_at_ms, tempo_chain, AudioClip, TimeStretch};
use crate::error::{DubError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineConfig {
    /// Above this speed-up a segment is truncated instead of compressed.
    pub max_speed_ratio: f64,
    /// Per-call bound for the compression backend.
    pub max_stage_ratio: f64,
    /// Sample rate of the merged track.
    pub sample_rate: u32,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            max_speed_ratio: 100.0,
            max_stage_ratio: 2.0,
            sample_rate: 24_000,
        }
    }
}

/// One synthesized segment to place.
#[derive(Debug, Clone)]
pub struct TimelineInput {
    pub segment_index: usize,
    pub start_ms: u64,
    /// Informational only; the slot is derived from the next start.
    pub end_ms: u64,
    pub audio: AudioClip,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlacementAction {
    Unchanged,
    SpedUp { ratio: f64, stages: Vec<f64> },
    Truncated { ratio: f64 },
    /// Slot is empty (shared start or start past the end); nothing placed.
    NoSlot,
    /// Fitting failed; original audio placed as-is and may overlap.
    Fallback { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub segment_index: usize,
    pub start_ms: u64,
    pub duration_ms: u64,
    pub available_ms: u64,
    pub action: PlacementAction,
}

impl Placement {
    pub fn end_ms(&self) -> u64 {
        self.start_ms + self.duration_ms
    }
}

#[derive(Debug, Clone)]
pub struct TimelineReport {
    pub total_duration_ms: u64,
    pub sample_rate: u32,
    /// In placement (start time) order.
    pub placements: Vec<Placement>,
}

impl TimelineReport {
    pub fn count(&self, pred: impl Fn(&PlacementAction) -> bool) -> usize {
        self.placements.iter().filter(|p| pred(&p.action)).count()
    }
}

pub struct TimelineSynthesizer {
    config: TimelineConfig,
    stretcher: Arc<dyn TimeStretch>,
}

impl TimelineSynthesizer {
    pub fn new(config: TimelineConfig, stretcher: Arc<dyn TimeStretch>) -> Self {
        Self { config, stretcher }
    }

    pub fn config(&self) -> &TimelineConfig {
        &self.config
    }

    fn stage_bound(&self) -> f64 {
        self.config
            .max_stage_ratio
            .min(self.stretcher.max_stage_ratio())
    }

    /// Merge `inputs` onto a silent track of `total_duration_ms`.
    pub async fn synthesize(
        &self,
        mut inputs: Vec<TimelineInput>,
        total_duration_ms: u64,
    ) -> Result<(AudioClip, TimelineReport)> {
        let rate = self.config.sample_rate;
        if rate == 0 {
            return Err(DubError::Config("timeline sample rate must be positive".to_string()));
        }

        inputs.sort_by_key(|i| (i.start_ms, i.segment_index));

        let base = AudioClip::silent(total_duration_ms, rate);
        let track_len = base.len();
        let mut mix: Vec<i32> = vec![0; track_len];
        let mut placements = Vec::with_capacity(inputs.len());

        info!(
            "Synthesizing timeline: {} segments over {}ms at {} Hz (stretch: {})",
            inputs.len(),
            total_duration_ms,
            rate,
            self.stretcher.name()
        );

        for pos in 0..inputs.len() {
            let start_ms = inputs[pos].start_ms.min(total_duration_ms);
            let next_start_ms = inputs
                .get(pos + 1)
                .map(|n| n.start_ms)
                .unwrap_or(total_duration_ms)
                .clamp(start_ms, total_duration_ms);
            let available_ms = next_start_ms - start_ms;

            let offset = samples_at_ms(start_ms, rate).min(track_len);
            let slot_end = if pos + 1 < inputs.len() {
                samples_at_ms(next_start_ms, rate).min(track_len)
            } else {
                track_len
            };
            let available_samples = slot_end.saturating_sub(offset);

            let input = &inputs[pos];
            let clip = input.audio.resampled(rate);

            let (fitted, action) = match self
                .fit(input.segment_index, clip.clone(), available_ms, available_samples)
                .await
            {
                Ok(result) => result,
                Err(e) => {
                    warn!(
                        "Segment {}: fitting failed ({}), placing original audio",
                        input.segment_index, e
                    );
                    (clip, PlacementAction::Fallback { reason: e.to_string() })
                }
            };

            let written = place(&mut mix, &fitted.samples, offset);
            let placement = Placement {
                segment_index: input.segment_index,
                start_ms,
                duration_ms: written as u64 * 1000 / rate as u64,
                available_ms,
                action,
            };
            debug!(
                "Segment {} placed at {}ms for {}ms (slot {}ms): {:?}",
                placement.segment_index,
                placement.start_ms,
                placement.duration_ms,
                available_ms,
                placement.action
            );
            placements.push(placement);
        }

        let samples = mix
            .into_iter()
            .map(|s| s.clamp(i16::MIN as i32, i16::MAX as i32) as i16)
            .collect();
        let track = AudioClip::new(samples, rate);

        let report = TimelineReport {
            total_duration_ms,
            sample_rate: rate,
            placements,
        };
        info!(
            "Timeline merged: {}ms, {} sped up, {} truncated, {} fallback",
            track.duration_ms(),
            report.count(|a| matches!(a, PlacementAction::SpedUp { .. })),
            report.count(|a| matches!(a, PlacementAction::Truncated { .. })),
            report.count(|a| matches!(a, PlacementAction::Fallback { .. })),
        );

        Ok((track, report))
    }

    /// Make `clip` fit its slot.
    async fn fit(
        &self,
        segment_index: usize,
        mut clip: AudioClip,
        available_ms: u64,
        available_samples: usize,
    ) -> Result<(AudioClip, PlacementAction)> {
        let actual_ms = clip.duration_ms();

        if actual_ms <= available_ms {
            clip.truncate(available_samples);
            return Ok((clip, PlacementAction::Unchanged));
        }
        if available_ms == 0 || available_samples == 0 {
            clip.truncate(0);
            return Ok((clip, PlacementAction::NoSlot));
        }

        let ratio = actual_ms as f64 / available_ms as f64;
        if ratio > self.config.max_speed_ratio {
            let overflow = DubError::TimelineOverflow {
                segment_index,
                ratio,
                ceiling: self.config.max_speed_ratio,
            };
            warn!("{}; truncating to {}ms", overflow, available_ms);
            clip.truncate(available_samples);
            return Ok((clip, PlacementAction::Truncated { ratio }));
        }

        let stages = tempo_chain(ratio, self.stage_bound());
        for &stage in &stages {
            clip = self.stretcher.stretch(&clip, stage).await?;
        }
        // Rounding inside the backend may leave a few samples over.
        clip.truncate(available_samples);

        Ok((clip, PlacementAction::SpedUp { ratio, stages }))
    }
}

/// Add `samples` into `mix` at `offset`, clipped to the track. Returns samples written.
fn place(mix: &mut [i32], samples: &[i16], offset: usize) -> usize {
    let end = (offset + samples.len()).min(mix.len());
    let Some(window) = mix.get_mut(offset..end) else {
        return 0;
    };
    for (dst, &src) in window.iter_mut().zip(samples) {
        *dst += src as i32;
    }
    end.saturating_sub(offset)
}
