//! Sample-level building blocks shared by every chain stage.
//!
//! Everything here processes interleaved frames in place and keeps one state
//! slot per channel. Nothing allocates after construction except wave-shaper
//! curve rebuilds, which the live engine performs on the control thread.

mod biquad;
mod delay;
mod dynamics;
mod lfo;
mod shaper;

pub use biquad::{Biquad, BiquadKind};
pub use delay::DelayLine;
pub use dynamics::{Compressor, CompressorSettings};
pub use lfo::SineLfo;
pub use shaper::{
    BITCRUSHER_CURVE_POINTS, Curve, DISTORTION_CURVE_POINTS, bitcrusher_curve, distortion_curve,
};

#[inline]
#[must_use]
pub fn db_to_gain(db: f32) -> f32 {
    10.0_f32.powf(db * 0.05)
}

#[inline]
#[must_use]
pub fn gain_to_db(gain: f32) -> f32 {
    20.0 * gain.max(1e-9).log10()
}
