use std::{
    fs,
    io::{Cursor, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::{
    assets::DecodedAudioAsset,
    chain::{Chain, GraphConstructionError, describe_chain},
    model::EffectsSettings,
    source::{PlaybackError, Voice, voice_length},
};

pub const DEFAULT_FILE_PREFIX: &str = "modulated-audio";
/// Minimum tail rendered after the source, doubled, so delay repeats and
/// compressor release are not cut off.
pub const MIN_TAIL_SECONDS: f32 = 0.5;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("no audio loaded to export")]
    NoAsset,
    #[error(transparent)]
    Graph(#[from] GraphConstructionError),
    #[error(transparent)]
    Playback(#[from] PlaybackError),
    #[error("wav encoding failed: {0}")]
    Encode(#[from] hound::Error),
    #[error("unsupported channel count for wav: {0}")]
    ChannelCount(usize),
    #[error("io error: {0}")]
    Io(String),
}

impl From<anyhow::Error> for ExportError {
    fn from(value: anyhow::Error) -> Self {
        Self::Io(format!("{value:#}"))
    }
}

/// Interleaved render result.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedAudio {
    pub sample_rate: u32,
    pub channels: usize,
    pub samples: Vec<f32>,
}

impl RenderedAudio {
    #[must_use]
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1)
    }

    #[must_use]
    pub fn channel(&self, index: usize) -> Vec<f32> {
        self.samples
            .iter()
            .skip(index)
            .step_by(self.channels.max(1))
            .copied()
            .collect()
    }
}

/// Offline buffer length: the source at `rate` plus a tail of twice the
/// delay time (at least [`MIN_TAIL_SECONDS`]).
#[must_use]
pub fn offline_length(
    source_frames: usize,
    rate: f64,
    delay_seconds: f32,
    sample_rate: u32,
) -> usize {
    let tail_seconds = f64::from(delay_seconds.max(MIN_TAIL_SECONDS));
    let tail = (tail_seconds * f64::from(sample_rate) * 2.0).ceil() as usize;
    voice_length(source_frames, rate) + tail
}

/// Renders `asset` through a freshly realized chain at the asset's own
/// sample rate and channel count.
#[instrument(skip(asset, settings), fields(asset_id = %asset.id()))]
pub fn render_offline(
    asset: &Arc<DecodedAudioAsset>,
    settings: &EffectsSettings,
) -> Result<RenderedAudio, ExportError> {
    let description = describe_chain(settings);
    let sample_rate = asset.sample_rate();
    let channels = asset.channel_count();

    let mut chain = Chain::realize(&description, sample_rate, channels)?;
    let mut voice = Voice::new(Arc::clone(asset), description.source, sample_rate)?;
    let frames = offline_length(
        asset.frames(),
        description.source.rate,
        settings.delay_seconds(),
        sample_rate,
    );

    let mut samples = vec![0.0_f32; frames * channels];
    let source_frames = voice.render(&mut samples, channels);
    chain.process(&mut samples);

    debug!(
        frames,
        source_frames,
        rate = description.source.rate,
        degraded = chain.degraded_stages().len(),
        "offline render complete"
    );
    Ok(RenderedAudio {
        sample_rate,
        channels,
        samples,
    })
}

#[inline]
fn quantize(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    if clamped < 0.0 {
        (clamped * 32_768.0) as i16
    } else {
        (clamped * 32_767.0) as i16
    }
}

/// Encodes 16-bit PCM WAV. Mono and stereo use the canonical 44-byte header.
#[instrument(skip(audio), fields(frames = audio.frames(), channels = audio.channels))]
pub fn encode_wav(audio: &RenderedAudio) -> Result<Vec<u8>, ExportError> {
    let channels = u16::try_from(audio.channels)
        .ok()
        .filter(|channels| *channels > 0)
        .ok_or(ExportError::ChannelCount(audio.channels))?;
    let spec = hound::WavSpec {
        channels,
        sample_rate: audio.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(44 + audio.samples.len() * 2));
    let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
    for sample in &audio.samples {
        writer.write_sample(quantize(*sample))?;
    }
    writer.finalize()?;
    Ok(cursor.into_inner())
}

#[must_use]
pub fn export_file_name(prefix: &str, unix_millis: i64) -> String {
    format!("{prefix}-{unix_millis}.wav")
}

pub fn export_to_file(
    asset: &Arc<DecodedAudioAsset>,
    settings: &EffectsSettings,
    output_dir: &Path,
) -> Result<PathBuf, ExportError> {
    export_to_file_with_prefix(asset, settings, output_dir, DEFAULT_FILE_PREFIX)
}

/// Renders, encodes and writes `<prefix>-<unix-millis>.wav` into
/// `output_dir`. The file only appears once fully written.
#[instrument(skip(asset, settings), fields(asset_id = %asset.id(), output_dir = %output_dir.display()))]
pub fn export_to_file_with_prefix(
    asset: &Arc<DecodedAudioAsset>,
    settings: &EffectsSettings,
    output_dir: &Path,
    prefix: &str,
) -> Result<PathBuf, ExportError> {
    let rendered = render_offline(asset, settings)?;
    let bytes = encode_wav(&rendered)?;

    fs::create_dir_all(output_dir).with_context(|| {
        format!(
            "failed to create export directory: {}",
            output_dir.display()
        )
    })?;
    let path = output_dir.join(export_file_name(prefix, Utc::now().timestamp_millis()));

    let mut temp_file = tempfile::NamedTempFile::new_in(output_dir)
        .context("failed to create temp export file")?;
    temp_file
        .write_all(&bytes)
        .context("failed to write temp export file")?;
    temp_file
        .persist(&path)
        .map_err(|error| anyhow::anyhow!(error.error))
        .with_context(|| format!("failed to persist export: {}", path.display()))?;

    info!(
        path = %path.display(),
        bytes = bytes.len(),
        frames = rendered.frames(),
        "wav export completed"
    );
    Ok(path)
}
