use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Feedback gain ceiling for the delay stage; anything above this rings forever.
pub const MAX_DELAY_FEEDBACK: f32 = 0.5;
pub const MAX_DELAY_MS: f32 = 500.0;
pub const HPF_MIN_HZ: f32 = 20.0;
pub const HPF_MAX_HZ: f32 = 2_000.0;
pub const LPF_MIN_HZ: f32 = 2_000.0;
pub const LPF_MAX_HZ: f32 = 20_000.0;

pub const DEFAULT_SETTINGS: EffectsSettings = EffectsSettings {
    volume: 100.0,
    low: 0.0,
    mid: 0.0,
    high: 0.0,
    hpf: 0.0,
    lpf: 100.0,
    reverb: 0.0,
    delay: 0.0,
    delay_feedback: 30.0,
    drive: 0.0,
    compression: 0.0,
    chorus: 0.0,
    flanger: 0.0,
    phaser: 0.0,
    tremolo: 0.0,
    bitcrusher: 0.0,
    pitch: 0.0,
    tempo: 100.0,
    key_lock: false,
    reverse: false,
    looping: false,
};

/// Snapshot of every effect control. Values are only ever produced through
/// [`EffectsSettings::set`] or deserialization, both of which clamp, so a
/// snapshot is always inside its declared domains.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawEffectsSettings")]
pub struct EffectsSettings {
    volume: f32,
    low: f32,
    mid: f32,
    high: f32,
    hpf: f32,
    lpf: f32,
    reverb: f32,
    delay: f32,
    delay_feedback: f32,
    drive: f32,
    compression: f32,
    chorus: f32,
    flanger: f32,
    phaser: f32,
    tremolo: f32,
    bitcrusher: f32,
    pitch: f32,
    tempo: f32,
    key_lock: bool,
    reverse: bool,
    #[serde(rename = "loop")]
    looping: bool,
}

impl Default for EffectsSettings {
    fn default() -> Self {
        DEFAULT_SETTINGS
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    Volume,
    Low,
    Mid,
    High,
    Hpf,
    Lpf,
    Reverb,
    Delay,
    DelayFeedback,
    Drive,
    Compression,
    Chorus,
    Flanger,
    Phaser,
    Tremolo,
    Bitcrusher,
    Pitch,
    Tempo,
    KeyLock,
    Reverse,
    Loop,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Domain {
    Range { min: f32, max: f32, step: f32 },
    Toggle,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Toggle(bool),
    Scalar(f32),
}

impl From<f32> for FieldValue {
    fn from(value: f32) -> Self {
        Self::Scalar(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Toggle(value)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Toggle(value) => write!(f, "{value}"),
            Self::Scalar(value) => write!(f, "{value}"),
        }
    }
}

impl Field {
    pub const ALL: [Field; 21] = [
        Field::Volume,
        Field::Low,
        Field::Mid,
        Field::High,
        Field::Hpf,
        Field::Lpf,
        Field::Reverb,
        Field::Delay,
        Field::DelayFeedback,
        Field::Drive,
        Field::Compression,
        Field::Chorus,
        Field::Flanger,
        Field::Phaser,
        Field::Tremolo,
        Field::Bitcrusher,
        Field::Pitch,
        Field::Tempo,
        Field::KeyLock,
        Field::Reverse,
        Field::Loop,
    ];

    #[must_use]
    pub fn domain(self) -> Domain {
        let percent = Domain::Range {
            min: 0.0,
            max: 100.0,
            step: 1.0,
        };
        let eq_band = Domain::Range {
            min: -24.0,
            max: 24.0,
            step: 0.5,
        };

        match self {
            Self::Low | Self::Mid | Self::High => eq_band,
            Self::Delay => Domain::Range {
                min: 0.0,
                max: MAX_DELAY_MS,
                step: 5.0,
            },
            Self::Pitch => Domain::Range {
                min: -12.0,
                max: 12.0,
                step: 0.1,
            },
            Self::Tempo => Domain::Range {
                min: 50.0,
                max: 200.0,
                step: 1.0,
            },
            Self::KeyLock | Self::Reverse | Self::Loop => Domain::Toggle,
            Self::Volume
            | Self::Hpf
            | Self::Lpf
            | Self::Reverb
            | Self::DelayFeedback
            | Self::Drive
            | Self::Compression
            | Self::Chorus
            | Self::Flanger
            | Self::Phaser
            | Self::Tremolo
            | Self::Bitcrusher => percent,
        }
    }

    /// Knob resolution; `None` for toggles.
    #[must_use]
    pub fn step(self) -> Option<f32> {
        match self.domain() {
            Domain::Range { step, .. } => Some(step),
            Domain::Toggle => None,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Volume => "volume",
            Self::Low => "low",
            Self::Mid => "mid",
            Self::High => "high",
            Self::Hpf => "hpf",
            Self::Lpf => "lpf",
            Self::Reverb => "reverb",
            Self::Delay => "delay",
            Self::DelayFeedback => "delayFeedback",
            Self::Drive => "drive",
            Self::Compression => "compression",
            Self::Chorus => "chorus",
            Self::Flanger => "flanger",
            Self::Phaser => "phaser",
            Self::Tremolo => "tremolo",
            Self::Bitcrusher => "bitcrusher",
            Self::Pitch => "pitch",
            Self::Tempo => "tempo",
            Self::KeyLock => "keyLock",
            Self::Reverse => "reverse",
            Self::Loop => "loop",
        }
    }

    /// Pitch, tempo, reverse and loop are baked into a voice when it is
    /// created; changing them never touches the running graph.
    #[must_use]
    pub fn is_voice_parameter(self) -> bool {
        matches!(self, Self::Pitch | Self::Tempo | Self::Reverse | Self::Loop)
    }

    fn sanitize(self, raw: f32) -> f32 {
        let Domain::Range { min, max, step } = self.domain() else {
            return raw;
        };
        if raw.is_nan() {
            return DEFAULT_SETTINGS.scalar(self);
        }

        let clamped = f64::from(raw.clamp(min, max));
        let step = f64::from(step);
        let snapped = ((clamped / step).round() * step) as f32;
        snapped.clamp(min, max)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown effect field: {0}")]
pub struct UnknownField(pub String);

impl FromStr for Field {
    type Err = UnknownField;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|field| field.name().eq_ignore_ascii_case(value))
            .ok_or_else(|| UnknownField(value.to_string()))
    }
}

/// Linear wet/dry pair used by the chorus, flanger, phaser and bitcrusher.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WetDry {
    pub wet: f32,
    pub dry: f32,
}

#[must_use]
pub fn wet_dry(amount: f32) -> WetDry {
    let wet = (amount.clamp(0.0, 100.0) / 100.0) * 0.5;
    WetDry { wet, dry: 1.0 - wet }
}

impl EffectsSettings {
    #[must_use]
    pub fn reset() -> Self {
        DEFAULT_SETTINGS
    }

    /// Returns a new snapshot with `field` set to `value`, clamped to the
    /// field's domain and snapped to its step. A scalar given to a toggle
    /// counts as `true` when >= 0.5; a toggle given to a scalar selects the
    /// domain's max (`true`) or min (`false`).
    #[must_use]
    pub fn set(&self, field: Field, value: impl Into<FieldValue>) -> Self {
        let value = value.into();
        let mut next = *self;
        match field.domain() {
            Domain::Toggle => {
                let on = match value {
                    FieldValue::Toggle(on) => on,
                    FieldValue::Scalar(raw) => raw >= 0.5,
                };
                if let Some(slot) = next.toggle_mut(field) {
                    *slot = on;
                }
            }
            Domain::Range { min, max, .. } => {
                let raw = match value {
                    FieldValue::Scalar(raw) => raw,
                    FieldValue::Toggle(true) => max,
                    FieldValue::Toggle(false) => min,
                };
                if let Some(slot) = next.scalar_mut(field) {
                    *slot = field.sanitize(raw);
                }
            }
        }
        next
    }

    #[must_use]
    pub fn get(&self, field: Field) -> FieldValue {
        match field.domain() {
            Domain::Toggle => FieldValue::Toggle(self.toggle(field)),
            Domain::Range { .. } => FieldValue::Scalar(self.scalar(field)),
        }
    }

    /// Numeric value of a field; toggles read as 0.0 / 1.0.
    #[must_use]
    pub const fn scalar(&self, field: Field) -> f32 {
        match field {
            Field::Volume => self.volume,
            Field::Low => self.low,
            Field::Mid => self.mid,
            Field::High => self.high,
            Field::Hpf => self.hpf,
            Field::Lpf => self.lpf,
            Field::Reverb => self.reverb,
            Field::Delay => self.delay,
            Field::DelayFeedback => self.delay_feedback,
            Field::Drive => self.drive,
            Field::Compression => self.compression,
            Field::Chorus => self.chorus,
            Field::Flanger => self.flanger,
            Field::Phaser => self.phaser,
            Field::Tremolo => self.tremolo,
            Field::Bitcrusher => self.bitcrusher,
            Field::Pitch => self.pitch,
            Field::Tempo => self.tempo,
            Field::KeyLock => bool_to_scalar(self.key_lock),
            Field::Reverse => bool_to_scalar(self.reverse),
            Field::Loop => bool_to_scalar(self.looping),
        }
    }

    #[must_use]
    pub fn toggle(&self, field: Field) -> bool {
        match field {
            Field::KeyLock => self.key_lock,
            Field::Reverse => self.reverse,
            Field::Loop => self.looping,
            other => self.scalar(other) != 0.0,
        }
    }

    fn scalar_mut(&mut self, field: Field) -> Option<&mut f32> {
        let slot = match field {
            Field::Volume => &mut self.volume,
            Field::Low => &mut self.low,
            Field::Mid => &mut self.mid,
            Field::High => &mut self.high,
            Field::Hpf => &mut self.hpf,
            Field::Lpf => &mut self.lpf,
            Field::Reverb => &mut self.reverb,
            Field::Delay => &mut self.delay,
            Field::DelayFeedback => &mut self.delay_feedback,
            Field::Drive => &mut self.drive,
            Field::Compression => &mut self.compression,
            Field::Chorus => &mut self.chorus,
            Field::Flanger => &mut self.flanger,
            Field::Phaser => &mut self.phaser,
            Field::Tremolo => &mut self.tremolo,
            Field::Bitcrusher => &mut self.bitcrusher,
            Field::Pitch => &mut self.pitch,
            Field::Tempo => &mut self.tempo,
            Field::KeyLock | Field::Reverse | Field::Loop => return None,
        };
        Some(slot)
    }

    fn toggle_mut(&mut self, field: Field) -> Option<&mut bool> {
        match field {
            Field::KeyLock => Some(&mut self.key_lock),
            Field::Reverse => Some(&mut self.reverse),
            Field::Loop => Some(&mut self.looping),
            _ => None,
        }
    }

    #[must_use]
    pub fn key_lock(&self) -> bool {
        self.key_lock
    }

    #[must_use]
    pub fn reverse(&self) -> bool {
        self.reverse
    }

    #[must_use]
    pub fn looping(&self) -> bool {
        self.looping
    }

    #[must_use]
    pub fn volume_gain(&self) -> f32 {
        self.volume / 100.0
    }

    #[must_use]
    pub fn hpf_hz(&self) -> f32 {
        HPF_MIN_HZ + (self.hpf / 100.0) * (HPF_MAX_HZ - HPF_MIN_HZ)
    }

    #[must_use]
    pub fn lpf_hz(&self) -> f32 {
        LPF_MIN_HZ + (self.lpf / 100.0) * (LPF_MAX_HZ - LPF_MIN_HZ)
    }

    #[must_use]
    pub fn eq_gains_db(&self) -> [f32; 3] {
        [self.low, self.mid, self.high]
    }

    #[must_use]
    pub fn delay_seconds(&self) -> f32 {
        self.delay / 1_000.0
    }

    #[must_use]
    pub fn delay_feedback_gain(&self) -> f32 {
        ((self.delay_feedback / 100.0) * 0.5).clamp(0.0, MAX_DELAY_FEEDBACK)
    }

    #[must_use]
    pub fn compressor_threshold_db(&self) -> f32 {
        -24.0 - self.compression * 0.3
    }

    #[must_use]
    pub fn drive_amount(&self) -> f32 {
        self.drive
    }

    #[must_use]
    pub fn chorus_mix(&self) -> WetDry {
        wet_dry(self.chorus)
    }

    #[must_use]
    pub fn flanger_mix(&self) -> WetDry {
        wet_dry(self.flanger)
    }

    /// Level of the modulated delay before the wet gain, `chorus / 100`.
    #[must_use]
    pub fn chorus_level(&self) -> f32 {
        self.chorus / 100.0
    }

    #[must_use]
    pub fn flanger_level(&self) -> f32 {
        self.flanger / 100.0
    }

    #[must_use]
    pub fn phaser_mix(&self) -> WetDry {
        wet_dry(self.phaser)
    }

    #[must_use]
    pub fn bitcrusher_mix(&self) -> WetDry {
        wet_dry(self.bitcrusher)
    }

    /// Phaser sweep depth in Hz around the all-pass center frequencies.
    #[must_use]
    pub fn phaser_depth_hz(&self) -> f32 {
        (self.phaser / 100.0) * 1_000.0
    }

    #[must_use]
    pub fn tremolo_depth(&self) -> f32 {
        (self.tremolo / 100.0) * 0.5
    }

    /// Effective bit depth, 16 bits at 0 down to 2 bits at 100.
    #[must_use]
    pub fn bit_depth(&self) -> f32 {
        16.0 - (self.bitcrusher / 100.0) * 14.0
    }

    #[must_use]
    pub fn pitch_ratio(&self) -> f64 {
        2_f64.powf(f64::from(self.pitch) / 12.0)
    }

    #[must_use]
    pub fn tempo_ratio(&self) -> f64 {
        f64::from(self.tempo) / 100.0
    }

    /// Signed source playback rate. With key lock the rate follows tempo only;
    /// otherwise pitch and tempo multiply. Reverse negates the result.
    #[must_use]
    pub fn playback_rate(&self) -> f64 {
        let rate = if self.key_lock {
            self.tempo_ratio()
        } else {
            self.tempo_ratio() * self.pitch_ratio()
        };
        if self.reverse { -rate.abs() } else { rate }
    }
}

const fn bool_to_scalar(value: bool) -> f32 {
    if value { 1.0 } else { 0.0 }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawEffectsSettings {
    volume: f32,
    low: f32,
    mid: f32,
    high: f32,
    hpf: f32,
    lpf: f32,
    reverb: f32,
    delay: f32,
    delay_feedback: f32,
    drive: f32,
    compression: f32,
    chorus: f32,
    flanger: f32,
    phaser: f32,
    tremolo: f32,
    bitcrusher: f32,
    pitch: f32,
    tempo: f32,
    key_lock: bool,
    reverse: bool,
    #[serde(rename = "loop")]
    looping: bool,
}

impl Default for RawEffectsSettings {
    fn default() -> Self {
        let d = DEFAULT_SETTINGS;
        Self {
            volume: d.volume,
            low: d.low,
            mid: d.mid,
            high: d.high,
            hpf: d.hpf,
            lpf: d.lpf,
            reverb: d.reverb,
            delay: d.delay,
            delay_feedback: d.delay_feedback,
            drive: d.drive,
            compression: d.compression,
            chorus: d.chorus,
            flanger: d.flanger,
            phaser: d.phaser,
            tremolo: d.tremolo,
            bitcrusher: d.bitcrusher,
            pitch: d.pitch,
            tempo: d.tempo,
            key_lock: d.key_lock,
            reverse: d.reverse,
            looping: d.looping,
        }
    }
}

impl From<RawEffectsSettings> for EffectsSettings {
    fn from(raw: RawEffectsSettings) -> Self {
        let scalars = [
            (Field::Volume, raw.volume),
            (Field::Low, raw.low),
            (Field::Mid, raw.mid),
            (Field::High, raw.high),
            (Field::Hpf, raw.hpf),
            (Field::Lpf, raw.lpf),
            (Field::Reverb, raw.reverb),
            (Field::Delay, raw.delay),
            (Field::DelayFeedback, raw.delay_feedback),
            (Field::Drive, raw.drive),
            (Field::Compression, raw.compression),
            (Field::Chorus, raw.chorus),
            (Field::Flanger, raw.flanger),
            (Field::Phaser, raw.phaser),
            (Field::Tremolo, raw.tremolo),
            (Field::Bitcrusher, raw.bitcrusher),
            (Field::Pitch, raw.pitch),
            (Field::Tempo, raw.tempo),
        ];

        scalars
            .into_iter()
            .fold(DEFAULT_SETTINGS, |settings, (field, value)| {
                settings.set(field, value)
            })
            .set(Field::KeyLock, raw.key_lock)
            .set(Field::Reverse, raw.reverse)
            .set(Field::Loop, raw.looping)
    }
}
