use std::f32::consts::TAU;

/// Free-running sine oscillator, phase kept in cycles.
#[derive(Debug, Clone)]
pub struct SineLfo {
    phase: f32,
    increment: f32,
}

impl SineLfo {
    #[must_use]
    pub fn new(frequency_hz: f32, sample_rate: f32) -> Self {
        Self {
            phase: 0.0,
            increment: frequency_hz / sample_rate.max(1.0),
        }
    }

    #[inline]
    pub fn next(&mut self) -> f32 {
        let value = (TAU * self.phase).sin();
        self.phase = (self.phase + self.increment).fract();
        value
    }

    pub fn reset(&mut self) {
        self.phase = 0.0;
    }
}
