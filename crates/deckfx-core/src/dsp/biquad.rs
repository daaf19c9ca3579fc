use std::f32::consts::{SQRT_2, TAU};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiquadKind {
    LowPass,
    HighPass,
    LowShelf,
    Peaking,
    HighShelf,
    AllPass,
}

#[derive(Debug, Clone, Copy)]
struct Coefficients {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl Coefficients {
    const IDENTITY: Self = Self {
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
        a1: 0.0,
        a2: 0.0,
    };
}

#[derive(Debug, Clone, Copy, Default)]
struct State {
    z1: f32,
    z2: f32,
}

impl State {
    #[inline]
    fn process(&mut self, input: f32, c: &Coefficients) -> f32 {
        let output = c.b0 * input + self.z1;
        self.z1 = c.b1 * input - c.a1 * output + self.z2;
        self.z2 = c.b2 * input - c.a2 * output;
        output
    }
}

/// RBJ cookbook biquad (transposed direct form II), one state per channel.
#[derive(Debug, Clone)]
pub struct Biquad {
    kind: BiquadKind,
    sample_rate: f32,
    frequency: f32,
    q: f32,
    gain_db: f32,
    coeffs: Coefficients,
    states: Vec<State>,
}

impl Biquad {
    #[must_use]
    pub fn new(kind: BiquadKind, sample_rate: f32, channels: usize, frequency: f32, q: f32) -> Self {
        let mut filter = Self {
            kind,
            sample_rate,
            frequency,
            q,
            gain_db: 0.0,
            coeffs: Coefficients::IDENTITY,
            states: vec![State::default(); channels],
        };
        filter.update_coefficients();
        filter
    }

    #[must_use]
    pub fn kind(&self) -> BiquadKind {
        self.kind
    }

    #[must_use]
    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    #[must_use]
    pub fn gain_db(&self) -> f32 {
        self.gain_db
    }

    pub fn set_frequency(&mut self, frequency: f32) {
        if (frequency - self.frequency).abs() > f32::EPSILON {
            self.frequency = frequency;
            self.update_coefficients();
        }
    }

    pub fn set_q(&mut self, q: f32) {
        if (q - self.q).abs() > f32::EPSILON {
            self.q = q;
            self.update_coefficients();
        }
    }

    pub fn set_gain_db(&mut self, gain_db: f32) {
        if (gain_db - self.gain_db).abs() > f32::EPSILON {
            self.gain_db = gain_db;
            self.update_coefficients();
        }
    }

    pub fn reset(&mut self) {
        self.states.fill(State::default());
    }

    #[inline]
    pub fn process_sample(&mut self, channel: usize, input: f32) -> f32 {
        self.states[channel].process(input, &self.coeffs)
    }

    pub fn process(&mut self, block: &mut [f32]) {
        let channels = self.states.len().max(1);
        for frame in block.chunks_exact_mut(channels) {
            for (sample, state) in frame.iter_mut().zip(self.states.iter_mut()) {
                *sample = state.process(*sample, &self.coeffs);
            }
        }
    }

    fn update_coefficients(&mut self) {
        let nyquist = self.sample_rate * 0.5;
        let frequency = self.frequency.clamp(1.0, nyquist * 0.999);
        let q = self.q.max(1e-4);
        let omega = TAU * frequency / self.sample_rate.max(1.0);
        let (sin, cos) = omega.sin_cos();
        let alpha = sin / (2.0 * q);
        let a = 10.0_f32.powf(self.gain_db / 40.0);

        let (b0, b1, b2, a0, a1, a2) = match self.kind {
            BiquadKind::LowPass => (
                (1.0 - cos) / 2.0,
                1.0 - cos,
                (1.0 - cos) / 2.0,
                1.0 + alpha,
                -2.0 * cos,
                1.0 - alpha,
            ),
            BiquadKind::HighPass => (
                (1.0 + cos) / 2.0,
                -(1.0 + cos),
                (1.0 + cos) / 2.0,
                1.0 + alpha,
                -2.0 * cos,
                1.0 - alpha,
            ),
            BiquadKind::Peaking => (
                1.0 + alpha * a,
                -2.0 * cos,
                1.0 - alpha * a,
                1.0 + alpha / a,
                -2.0 * cos,
                1.0 - alpha / a,
            ),
            BiquadKind::AllPass => (
                1.0 - alpha,
                -2.0 * cos,
                1.0 + alpha,
                1.0 + alpha,
                -2.0 * cos,
                1.0 - alpha,
            ),
            BiquadKind::LowShelf => {
                // shelf slope S = 1
                let shelf_alpha = sin / 2.0 * SQRT_2;
                let k = 2.0 * a.sqrt() * shelf_alpha;
                (
                    a * ((a + 1.0) - (a - 1.0) * cos + k),
                    2.0 * a * ((a - 1.0) - (a + 1.0) * cos),
                    a * ((a + 1.0) - (a - 1.0) * cos - k),
                    (a + 1.0) + (a - 1.0) * cos + k,
                    -2.0 * ((a - 1.0) + (a + 1.0) * cos),
                    (a + 1.0) + (a - 1.0) * cos - k,
                )
            }
            BiquadKind::HighShelf => {
                let shelf_alpha = sin / 2.0 * SQRT_2;
                let k = 2.0 * a.sqrt() * shelf_alpha;
                (
                    a * ((a + 1.0) + (a - 1.0) * cos + k),
                    -2.0 * a * ((a - 1.0) + (a + 1.0) * cos),
                    a * ((a + 1.0) + (a - 1.0) * cos - k),
                    (a + 1.0) - (a - 1.0) * cos + k,
                    2.0 * ((a - 1.0) - (a + 1.0) * cos),
                    (a + 1.0) - (a - 1.0) * cos - k,
                )
            }
        };

        let inv_a0 = 1.0 / a0.max(1e-6);
        self.coeffs = Coefficients {
            b0: b0 * inv_a0,
            b1: b1 * inv_a0,
            b2: b2 * inv_a0,
            a1: a1 * inv_a0,
            a2: a2 * inv_a0,
        };
    }
}
