use std::{
    fs::File,
    io::{Cursor, ErrorKind},
    path::{Path, PathBuf},
};

use anyhow::Context;
use symphonia::core::{
    audio::{AudioBufferRef, SampleBuffer},
    codecs::DecoderOptions,
    errors::Error as SymphoniaError,
    formats::FormatOptions,
    io::{MediaSource, MediaSourceStream},
    meta::MetadataOptions,
    probe::Hint,
};
use thiserror::Error;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Rate assumed when a container does not declare one.
pub const FALLBACK_SAMPLE_RATE: u32 = 44_100;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("audio source unreachable: {0}")]
    Unreachable(String),
    #[error("unsupported audio url scheme: {0}")]
    UnsupportedScheme(String),
    #[error("malformed audio data: {0}")]
    Malformed(String),
    #[error("decoded zero samples from {0}")]
    Empty(String),
}

impl From<anyhow::Error> for DecodeError {
    fn from(value: anyhow::Error) -> Self {
        Self::Malformed(format!("{value:#}"))
    }
}

/// Decoded source audio: deinterleaved `f32` channels at a fixed rate.
///
/// Assets are immutable once built and identified by a fresh id, so the live
/// engine can tell a replaced asset from the one its graph was built for.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudioAsset {
    id: Uuid,
    url: String,
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl DecodedAudioAsset {
    pub fn from_channels(
        url: impl Into<String>,
        sample_rate: u32,
        channels: Vec<Vec<f32>>,
    ) -> Result<Self, DecodeError> {
        let url = url.into();
        if sample_rate == 0 {
            return Err(DecodeError::Malformed(format!("{url}: sample rate is zero")));
        }
        let frames = channels.first().map_or(0, Vec::len);
        if frames == 0 {
            return Err(DecodeError::Empty(url));
        }
        if channels.iter().any(|channel| channel.len() != frames) {
            return Err(DecodeError::Malformed(format!(
                "{url}: channels have different lengths"
            )));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            url,
            sample_rate,
            channels,
        })
    }

    /// Loads a local path or `file://` URL. Remote URLs are rejected.
    pub fn load(url: &str) -> Result<Self, DecodeError> {
        Self::load_with_fallback(url, FALLBACK_SAMPLE_RATE)
    }

    #[instrument(fields(url = %url, fallback_sample_rate))]
    pub fn load_with_fallback(url: &str, fallback_sample_rate: u32) -> Result<Self, DecodeError> {
        let path = resolve_local_path(url)?;
        let file = File::open(&path).map_err(|error| {
            DecodeError::Unreachable(format!("{}: {error}", path.display()))
        })?;

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|value| value.to_str()) {
            hint.with_extension(extension);
        }

        let (sample_rate, channels) =
            decode_stream(Box::new(file), &hint, fallback_sample_rate, url)?;
        let asset = Self::from_channels(url, sample_rate, channels)?;
        info!(
            asset_id = %asset.id,
            sample_rate = asset.sample_rate,
            channels = asset.channel_count(),
            frames = asset.frames(),
            "audio asset decoded"
        );
        Ok(asset)
    }

    /// Decodes an in-memory encoded file; `extension` is only a probe hint.
    #[instrument(skip(bytes), fields(url = %url, bytes = bytes.len()))]
    pub fn decode_bytes(
        url: &str,
        bytes: Vec<u8>,
        extension: Option<&str>,
    ) -> Result<Self, DecodeError> {
        let mut hint = Hint::new();
        if let Some(extension) = extension {
            hint.with_extension(extension);
        }
        let (sample_rate, channels) = decode_stream(
            Box::new(Cursor::new(bytes)),
            &hint,
            FALLBACK_SAMPLE_RATE,
            url,
        )?;
        Self::from_channels(url, sample_rate, channels)
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    #[must_use]
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    #[must_use]
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index.min(self.channels.len() - 1)]
    }

    #[must_use]
    pub fn duration_seconds(&self) -> f64 {
        self.frames() as f64 / f64::from(self.sample_rate)
    }
}

fn resolve_local_path(url: &str) -> Result<PathBuf, DecodeError> {
    if let Some(path) = url.strip_prefix("file://") {
        return Ok(PathBuf::from(path));
    }
    match url.split_once("://") {
        Some((scheme, _)) => Err(DecodeError::UnsupportedScheme(scheme.to_string())),
        None => Ok(Path::new(url).to_path_buf()),
    }
}

fn decode_stream(
    source: Box<dyn MediaSource>,
    hint: &Hint,
    fallback_sample_rate: u32,
    origin: &str,
) -> anyhow::Result<(u32, Vec<Vec<f32>>)> {
    let stream = MediaSourceStream::new(source, Default::default());
    let probed = symphonia::default::get_probe()
        .format(
            hint,
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .with_context(|| format!("unrecognized audio container: {origin}"))?;
    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| anyhow::anyhow!("no default audio track found in {origin}"))?;
    let track_id = track.id;
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .with_context(|| format!("unsupported codec in {origin}"))?;

    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(fallback_sample_rate);
    let mut channels: Vec<Vec<f32>> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(error)) if error.kind() == ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                return Err(anyhow::anyhow!("audio stream reset required for {origin}"));
            }
            Err(error) => return Err(error.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(_)) => {
                continue;
            }
            Err(error) => return Err(error.into()),
        };

        sample_rate = decoded.spec().rate;
        push_deinterleaved(decoded, &mut channels)
            .with_context(|| format!("inconsistent channel layout in {origin}"))?;
    }

    debug!(
        sample_rate,
        channels = channels.len(),
        frames = channels.first().map_or(0, Vec::len),
        "audio decode complete"
    );
    Ok((sample_rate, channels))
}

fn push_deinterleaved(
    decoded: AudioBufferRef<'_>,
    channels: &mut Vec<Vec<f32>>,
) -> anyhow::Result<()> {
    let spec = *decoded.spec();
    let channel_count = spec.channels.count().max(1);
    if channels.is_empty() {
        channels.resize_with(channel_count, Vec::new);
    } else if channels.len() != channel_count {
        return Err(anyhow::anyhow!(
            "channel count changed from {} to {channel_count}",
            channels.len()
        ));
    }

    let mut sample_buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
    sample_buffer.copy_interleaved_ref(decoded);
    for frame in sample_buffer.samples().chunks_exact(channel_count) {
        for (channel, sample) in channels.iter_mut().zip(frame) {
            channel.push(*sample);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_urls_are_rejected() {
        let error = DecodedAudioAsset::load("https://cdn.example.com/track.mp3")
            .expect_err("remote url must fail");
        assert_eq!(error, DecodeError::UnsupportedScheme("https".to_string()));
    }

    #[test]
    fn file_urls_resolve_to_paths() {
        assert_eq!(
            resolve_local_path("file:///tmp/a.wav").expect("file url"),
            PathBuf::from("/tmp/a.wav")
        );
    }

    #[test]
    fn mismatched_channels_are_malformed() {
        let result = DecodedAudioAsset::from_channels("mem", 44_100, vec![vec![0.0; 4], vec![0.0; 3]]);
        assert!(matches!(result, Err(DecodeError::Malformed(_))));
    }
}
