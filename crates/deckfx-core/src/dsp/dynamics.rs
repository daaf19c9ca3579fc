use super::{db_to_gain, gain_to_db};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressorSettings {
    pub threshold_db: f32,
    pub knee_db: f32,
    pub ratio: f32,
    pub attack_seconds: f32,
    pub release_seconds: f32,
}

impl Default for CompressorSettings {
    fn default() -> Self {
        Self {
            threshold_db: -24.0,
            knee_db: 30.0,
            ratio: 12.0,
            attack_seconds: 0.003,
            release_seconds: 0.25,
        }
    }
}

/// Feed-forward soft-knee compressor. Detection is linked across channels
/// (peak of the frame) so the stereo image does not wander.
#[derive(Debug, Clone)]
pub struct Compressor {
    settings: CompressorSettings,
    sample_rate: f32,
    attack_coeff: f32,
    release_coeff: f32,
    channels: usize,
    reduction_db: f32,
}

fn time_to_coeff(seconds: f32, sample_rate: f32) -> f32 {
    (-1.0 / (seconds.max(1e-4) * sample_rate.max(1.0))).exp()
}

impl Compressor {
    #[must_use]
    pub fn new(settings: CompressorSettings, sample_rate: f32, channels: usize) -> Self {
        Self {
            settings,
            sample_rate,
            attack_coeff: time_to_coeff(settings.attack_seconds, sample_rate),
            release_coeff: time_to_coeff(settings.release_seconds, sample_rate),
            channels: channels.max(1),
            reduction_db: 0.0,
        }
    }

    #[must_use]
    pub fn settings(&self) -> CompressorSettings {
        self.settings
    }

    pub fn set_threshold_db(&mut self, threshold_db: f32) {
        self.settings.threshold_db = threshold_db;
    }

    pub fn set_times(&mut self, attack_seconds: f32, release_seconds: f32) {
        self.settings.attack_seconds = attack_seconds;
        self.settings.release_seconds = release_seconds;
        self.attack_coeff = time_to_coeff(attack_seconds, self.sample_rate);
        self.release_coeff = time_to_coeff(release_seconds, self.sample_rate);
    }

    /// Current gain reduction in dB (<= 0).
    #[must_use]
    pub fn reduction_db(&self) -> f32 {
        self.reduction_db
    }

    /// Static gain computer: dB of gain change for an input level in dB.
    #[must_use]
    pub fn gain_change_db(&self, level_db: f32) -> f32 {
        let CompressorSettings {
            threshold_db,
            knee_db,
            ratio,
            ..
        } = self.settings;
        let overshoot = level_db - threshold_db;
        let slope = 1.0 / ratio.max(1.0) - 1.0;

        if 2.0 * overshoot < -knee_db {
            0.0
        } else if knee_db > 0.0 && 2.0 * overshoot.abs() <= knee_db {
            let x = overshoot + knee_db / 2.0;
            slope * x * x / (2.0 * knee_db)
        } else {
            slope * overshoot
        }
    }

    pub fn process(&mut self, block: &mut [f32]) {
        for frame in block.chunks_exact_mut(self.channels) {
            let peak = frame.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()));
            let target = if peak > 0.0 {
                self.gain_change_db(gain_to_db(peak))
            } else {
                0.0
            };

            // more reduction = attack, less = release
            let coeff = if target < self.reduction_db {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            self.reduction_db = coeff * self.reduction_db + (1.0 - coeff) * target;

            let gain = db_to_gain(self.reduction_db);
            for sample in frame.iter_mut() {
                *sample *= gain;
            }
        }
    }

    pub fn reset(&mut self) {
        self.reduction_db = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_signal_is_untouched() {
        let compressor = Compressor::new(CompressorSettings::default(), 48_000.0, 1);
        assert_eq!(compressor.gain_change_db(-80.0), 0.0);
    }

    #[test]
    fn loud_signal_is_reduced_by_ratio() {
        let compressor = Compressor::new(CompressorSettings::default(), 48_000.0, 1);
        let change = compressor.gain_change_db(0.0);
        let expected = (1.0 / 12.0 - 1.0) * 24.0;
        assert!((change - expected).abs() < 1e-4);
    }

    #[test]
    fn sustained_loud_block_settles_to_reduction() {
        let mut compressor = Compressor::new(CompressorSettings::default(), 48_000.0, 2);
        let mut block = vec![0.9_f32; 2 * 48_000];
        compressor.process(&mut block);
        assert!(block[block.len() - 1] < 0.2);
        assert!(compressor.reduction_db() < -10.0);
    }
}
