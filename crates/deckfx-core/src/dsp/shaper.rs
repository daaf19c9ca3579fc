use std::f32::consts::PI;

pub const DISTORTION_CURVE_POINTS: usize = 44_100;
pub const BITCRUSHER_CURVE_POINTS: usize = 256;

/// Transfer curve sampled over `x ∈ [-1, 1)`; lookups interpolate linearly
/// between neighbouring points and clamp the input to [-1, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct Curve {
    points: Vec<f32>,
}

impl Curve {
    #[must_use]
    pub fn from_fn(points: usize, shape: impl Fn(f32) -> f32) -> Self {
        let points = points.max(2);
        let points = (0..points)
            .map(|i| shape((i as f32 * 2.0) / points as f32 - 1.0))
            .collect();
        Self { points }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    #[must_use]
    pub fn points(&self) -> &[f32] {
        &self.points
    }

    #[inline]
    #[must_use]
    pub fn shape(&self, input: f32) -> f32 {
        let last = self.points.len() - 1;
        let position = (input.clamp(-1.0, 1.0) + 1.0) * 0.5 * last as f32;
        let index = position.floor() as usize;
        if index >= last {
            return self.points[last];
        }
        let frac = position - index as f32;
        let current = self.points[index];
        current + (self.points[index + 1] - current) * frac
    }
}

/// Saturation curve: `y = (3 + a)·x·20·(π/180) / (π + a·|x|)`.
#[must_use]
pub fn distortion_curve(amount: f32) -> Curve {
    let deg = PI / 180.0;
    Curve::from_fn(DISTORTION_CURVE_POINTS, |x| {
        ((3.0 + amount) * x * 20.0 * deg) / (PI + amount * x.abs())
    })
}

/// Quantization curve for `bits` of resolution: `y = floor(x·2^bits) / 2^bits`.
#[must_use]
pub fn bitcrusher_curve(bits: f32) -> Curve {
    let step = 2_f32.powf(bits);
    Curve::from_fn(BITCRUSHER_CURVE_POINTS, |x| (x * step).floor() / step)
}
