use std::sync::Arc;

use thiserror::Error;

use crate::{assets::DecodedAudioAsset, chain::SourceSpec};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlaybackError {
    #[error("no audio asset is loaded")]
    NoAsset,
    #[error("effects graph is unavailable: {0}")]
    GraphUnavailable(String),
    #[error("invalid playback rate: {0}")]
    InvalidRate(f64),
    #[error("renderer is not accepting commands")]
    RendererUnavailable,
}

/// Buffer-backed voice reading an asset at a signed, fractional rate.
///
/// Position is kept in asset frames. Forward voices start at frame 0,
/// reversed voices at the last frame.
#[derive(Debug, Clone)]
pub struct Voice {
    asset: Arc<DecodedAudioAsset>,
    position: f64,
    step: f64,
    looping: bool,
    finished: bool,
}

impl Voice {
    pub fn new(
        asset: Arc<DecodedAudioAsset>,
        source: SourceSpec,
        output_sample_rate: u32,
    ) -> Result<Self, PlaybackError> {
        if !source.rate.is_finite() || source.rate == 0.0 || output_sample_rate == 0 {
            return Err(PlaybackError::InvalidRate(source.rate));
        }

        let step = source.rate * f64::from(asset.sample_rate()) / f64::from(output_sample_rate);
        let position = if step < 0.0 {
            (asset.frames() - 1) as f64
        } else {
            0.0
        };
        Ok(Self {
            asset,
            position,
            step,
            looping: source.looping,
            finished: false,
        })
    }

    #[must_use]
    pub fn asset(&self) -> &Arc<DecodedAudioAsset> {
        &self.asset
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    #[must_use]
    pub fn is_looping(&self) -> bool {
        self.looping
    }

    #[must_use]
    pub fn position(&self) -> f64 {
        self.position
    }

    /// Overwrites `block` (interleaved, `channels` wide) with the next frames.
    /// Frames past the end of a non-looping voice are silent. Returns the
    /// number of frames that carried source audio.
    pub fn render(&mut self, block: &mut [f32], channels: usize) -> usize {
        let channels = channels.max(1);
        let frames = self.asset.frames() as f64;
        let mut rendered = 0;

        for frame in block.chunks_exact_mut(channels) {
            if self.finished {
                frame.fill(0.0);
                continue;
            }

            self.write_frame(frame);
            rendered += 1;

            self.position += self.step;
            if self.position >= frames || self.position < 0.0 {
                if self.looping {
                    self.position = self.position.rem_euclid(frames);
                } else {
                    self.finished = true;
                }
            }
        }
        rendered
    }

    fn write_frame(&self, frame: &mut [f32]) {
        let source_channels = self.asset.channel_count();
        let output_channels = frame.len();

        if output_channels == 1 && source_channels > 1 {
            let sum: f32 = (0..source_channels).map(|index| self.sample_at(index)).sum();
            frame[0] = sum / source_channels as f32;
            return;
        }
        for (index, sample) in frame.iter_mut().enumerate() {
            *sample = self.sample_at(index.min(source_channels - 1));
        }
    }

    #[inline]
    fn sample_at(&self, channel: usize) -> f32 {
        let data = self.asset.channel(channel);
        let last = data.len() - 1;
        let index = (self.position.floor() as usize).min(last);
        let frac = (self.position - index as f64) as f32;
        let current = data[index];
        let next = data[(index + 1).min(last)];
        current + (next - current) * frac
    }
}

/// Frames a voice at `rate` produces from `source_frames` asset frames when
/// the asset and output rates match.
#[must_use]
pub fn voice_length(source_frames: usize, rate: f64) -> usize {
    (source_frames as f64 / rate.abs()).ceil() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(frames: usize) -> Arc<DecodedAudioAsset> {
        let samples = (0..frames).map(|n| n as f32).collect();
        Arc::new(DecodedAudioAsset::from_channels("mem://ramp", 100, vec![samples]).expect("asset"))
    }

    #[test]
    fn half_rate_interpolates_between_frames() {
        let source = SourceSpec {
            rate: 0.5,
            looping: false,
        };
        let mut voice = Voice::new(ramp(4), source, 100).expect("voice");
        let mut block = vec![0.0; 10];
        let rendered = voice.render(&mut block, 1);
        assert_eq!(rendered, 8);
        assert_eq!(&block[..4], &[0.0, 0.5, 1.0, 1.5]);
        assert_eq!(block[9], 0.0);
        assert!(voice.is_finished());
    }

    #[test]
    fn reverse_starts_at_last_frame() {
        let source = SourceSpec {
            rate: -1.0,
            looping: false,
        };
        let mut voice = Voice::new(ramp(3), source, 100).expect("voice");
        let mut block = vec![9.0; 4];
        voice.render(&mut block, 1);
        assert_eq!(block, vec![2.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn looping_voice_wraps() {
        let source = SourceSpec {
            rate: 1.0,
            looping: true,
        };
        let mut voice = Voice::new(ramp(3), source, 100).expect("voice");
        let mut block = vec![0.0; 7];
        assert_eq!(voice.render(&mut block, 1), 7);
        assert_eq!(block, vec![0.0, 1.0, 2.0, 0.0, 1.0, 2.0, 0.0]);
    }

    #[test]
    fn zero_rate_is_rejected() {
        let source = SourceSpec {
            rate: 0.0,
            looping: false,
        };
        assert!(matches!(
            Voice::new(ramp(3), source, 100),
            Err(PlaybackError::InvalidRate(_))
        ));
    }
}
