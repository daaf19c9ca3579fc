//! Deterministic audio used by tests and the `demo-export` command.

use std::{f32::consts::TAU, path::Path, sync::Arc};

use anyhow::{Context, Result};

use crate::assets::DecodedAudioAsset;

/// `seconds` of a sine at `frequency_hz`, amplitude 0.5, same on every channel.
#[must_use]
pub fn sine_asset(
    frequency_hz: f32,
    seconds: f32,
    sample_rate: u32,
    channels: usize,
) -> Arc<DecodedAudioAsset> {
    let frames = (seconds * sample_rate as f32).round() as usize;
    let tone: Vec<f32> = (0..frames)
        .map(|n| 0.5 * (TAU * frequency_hz * n as f32 / sample_rate as f32).sin())
        .collect();
    let asset = DecodedAudioAsset::from_channels(
        format!("fixture://sine-{frequency_hz}hz"),
        sample_rate,
        vec![tone; channels.max(1)],
    )
    .expect("sine fixture should be a valid asset");
    Arc::new(asset)
}

/// A single full-scale sample at frame 0 followed by silence.
#[must_use]
pub fn impulse_asset(frames: usize, sample_rate: u32) -> Arc<DecodedAudioAsset> {
    let mut samples = vec![0.0_f32; frames.max(1)];
    samples[0] = 1.0;
    let asset = DecodedAudioAsset::from_channels("fixture://impulse", sample_rate, vec![samples])
        .expect("impulse fixture should be a valid asset");
    Arc::new(asset)
}

/// Writes a 16-bit sine WAV for decode tests and the demo export.
pub fn write_tone_wav(
    path: &Path,
    frequency_hz: f32,
    seconds: f32,
    sample_rate: u32,
    channels: u16,
) -> Result<()> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("failed to create fixture wav: {}", path.display()))?;

    let frames = (seconds * sample_rate as f32).round() as usize;
    for n in 0..frames {
        let value = 0.5 * (TAU * frequency_hz * n as f32 / sample_rate as f32).sin();
        let quantized = (value * f32::from(i16::MAX)).round() as i16;
        for _ in 0..channels {
            writer
                .write_sample(quantized)
                .context("failed to write fixture sample")?;
        }
    }
    writer.finalize().context("failed to finalize fixture wav")?;
    Ok(())
}
