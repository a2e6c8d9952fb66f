//! WAV encode/decode via hound. Everything is folded down to mono i16.

use std::io::Cursor;
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::error::{DubError, Result};

use super::AudioClip;

/// Decode a WAV byte buffer, downmixing to mono.
pub fn decode_wav(bytes: &[u8]) -> Result<AudioClip> {
    let reader = WavReader::new(Cursor::new(bytes))
        .map_err(|e| DubError::DurationComputation(format!("unreadable WAV data: {e}")))?;
    clip_from_reader(reader)
}

pub fn read_wav(path: &Path) -> Result<AudioClip> {
    let reader = WavReader::open(path).map_err(|e| {
        DubError::DurationComputation(format!("failed to open {}: {e}", path.display()))
    })?;
    clip_from_reader(reader)
}

fn clip_from_reader<R: std::io::Read>(reader: WavReader<R>) -> Result<AudioClip> {
    let spec = reader.spec();
    if spec.sample_rate == 0 || spec.channels == 0 {
        return Err(DubError::DurationComputation(format!(
            "invalid WAV header: {} Hz, {} channels",
            spec.sample_rate, spec.channels
        )));
    }

    let interleaved: Vec<i16> = match spec.sample_format {
        SampleFormat::Int => {
            let shift = spec.bits_per_sample as i32 - 16;
            reader
                .into_samples::<i32>()
                .map(|s| {
                    s.map(|v| {
                        let scaled = if shift >= 0 { v >> shift } else { v << -shift };
                        scaled.clamp(i16::MIN as i32, i16::MAX as i32) as i16
                    })
                })
                .collect::<std::result::Result<_, _>>()?
        }
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
            .collect::<std::result::Result<_, _>>()?,
    };

    let channels = spec.channels as usize;
    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / frame.len() as i32) as i16
            })
            .collect()
    };

    Ok(AudioClip::new(samples, spec.sample_rate))
}

fn mono_spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// Encode as mono 16-bit PCM WAV.
pub fn encode_wav(clip: &AudioClip) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::with_capacity(44 + clip.len() * 2));
    {
        let mut writer = WavWriter::new(&mut cursor, mono_spec(clip.sample_rate))?;
        for &s in &clip.samples {
            writer.write_sample(s)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

pub fn write_wav(path: &Path, clip: &AudioClip) -> Result<()> {
    let mut writer = WavWriter::create(path, mono_spec(clip.sample_rate))?;
    for &s in &clip.samples {
        writer.write_sample(s)?;
    }
    writer.finalize()?;
    Ok(())
}
