/// Circular buffer with fractional (linearly interpolated) reads.
///
/// `read(d)` returns the sample written `d` writes ago, so a read followed by
/// a write of the current input realizes `y[n] = x[n - d]`.
#[derive(Debug, Clone)]
pub struct DelayLine {
    buffer: Vec<f32>,
    write_index: usize,
}

impl DelayLine {
    /// Capacity is rounded up so that `max_delay_samples` can always be read.
    #[must_use]
    pub fn new(max_delay_samples: usize) -> Self {
        Self {
            buffer: vec![0.0; max_delay_samples.max(1) + 2],
            write_index: 0,
        }
    }

    #[must_use]
    pub fn max_delay(&self) -> f32 {
        (self.buffer.len() - 2) as f32
    }

    #[inline]
    pub fn read(&self, delay_samples: f32) -> f32 {
        let len = self.buffer.len();
        let delay = delay_samples.clamp(1.0, self.max_delay());
        let whole = delay.floor();
        let frac = delay - whole;
        let whole = whole as usize;

        let newer = self.buffer[(self.write_index + len - whole) % len];
        let older = self.buffer[(self.write_index + len - whole - 1) % len];
        newer + (older - newer) * frac
    }

    #[inline]
    pub fn write(&mut self, sample: f32) {
        self.buffer[self.write_index] = sample;
        self.write_index += 1;
        if self.write_index == self.buffer.len() {
            self.write_index = 0;
        }
    }

    pub fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.write_index = 0;
    }
}
