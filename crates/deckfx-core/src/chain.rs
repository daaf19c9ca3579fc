//! Declarative stage list plus the processor graph that realizes it.
//!
//! [`describe_chain`] is the single place where settings become stage
//! parameters. The live renderer and the offline exporter both feed the
//! resulting [`ChainDescription`] through [`Chain::realize`], so the two
//! execution modes cannot disagree about ordering or mappings.

use std::{fmt, sync::Arc};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument, trace, warn};

use crate::{
    dsp::{
        Biquad, BiquadKind, Compressor, CompressorSettings, Curve, DelayLine, SineLfo,
        bitcrusher_curve, distortion_curve,
    },
    model::{EffectsSettings, Field},
};

pub const MAX_CHANNELS: usize = 32;

pub const FILTER_Q: f32 = 1.0;
pub const LOW_SHELF_HZ: f32 = 200.0;
pub const PEAK_HZ: f32 = 2_000.0;
pub const HIGH_SHELF_HZ: f32 = 8_000.0;

pub const CHORUS_DELAY_SECONDS: f32 = 0.010;
pub const CHORUS_RATE_HZ: f32 = 1.5;
pub const FLANGER_DELAY_SECONDS: f32 = 0.005;
pub const FLANGER_RATE_HZ: f32 = 0.5;
pub const MODULATION_DEPTH_SECONDS: f32 = 0.005;
const MODULATED_DELAY_MAX_SECONDS: f32 = 0.020;

pub const PHASER_STAGES: usize = 4;
pub const PHASER_BASE_HZ: f32 = 350.0;
pub const PHASER_SPACING_HZ: f32 = 200.0;
pub const PHASER_Q: f32 = 10.0;
pub const PHASER_RATE_HZ: f32 = 0.3;
/// Frames between phaser coefficient refreshes.
const PHASER_UPDATE_INTERVAL: u64 = 32;

pub const TREMOLO_RATE_HZ: f32 = 5.0;
pub const DELAY_MAX_SECONDS: f32 = 1.0;

pub const KEY_LOCK_BASE_DELAY_SECONDS: f32 = 0.025;
pub const KEY_LOCK_MIN_DELAY_SECONDS: f32 = 0.001;
pub const KEY_LOCK_MAX_DELAY_SECONDS: f32 = 0.05;

/// Upper bound on a single delay buffer; beyond this a stage is not built.
const MAX_DELAY_CAPACITY: usize = 1 << 24;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphConstructionError {
    #[error("sample rate must be greater than zero")]
    ZeroSampleRate,
    #[error("channel count must be greater than zero")]
    ZeroChannels,
    #[error("unsupported channel count {channels} (max {max})", max = MAX_CHANNELS)]
    UnsupportedChannels { channels: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{stage} cannot be built: {reason}")]
struct StageBuildError {
    stage: StageId,
    reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StageId {
    KeyLock,
    HighPass,
    LowPass,
    LowShelf,
    Peak,
    HighShelf,
    Chorus,
    Flanger,
    Phaser,
    Tremolo,
    Bitcrusher,
    Drive,
    Delay,
    Compressor,
    Output,
}

impl StageId {
    /// Processing order after the source voice. Both backends follow it.
    pub const ORDER: [StageId; 15] = [
        StageId::KeyLock,
        StageId::HighPass,
        StageId::LowPass,
        StageId::LowShelf,
        StageId::Peak,
        StageId::HighShelf,
        StageId::Chorus,
        StageId::Flanger,
        StageId::Phaser,
        StageId::Tremolo,
        StageId::Bitcrusher,
        StageId::Drive,
        StageId::Delay,
        StageId::Compressor,
        StageId::Output,
    ];

    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::KeyLock => "key_lock",
            Self::HighPass => "high_pass",
            Self::LowPass => "low_pass",
            Self::LowShelf => "low_shelf",
            Self::Peak => "peak",
            Self::HighShelf => "high_shelf",
            Self::Chorus => "chorus",
            Self::Flanger => "flanger",
            Self::Phaser => "phaser",
            Self::Tremolo => "tremolo",
            Self::Bitcrusher => "bitcrusher",
            Self::Drive => "drive",
            Self::Delay => "delay",
            Self::Compressor => "compressor",
            Self::Output => "output",
        }
    }

    /// Stages whose wave-shaper curve depends on [`ParamId::Amount`].
    #[must_use]
    pub fn uses_curve(self) -> bool {
        matches!(self, Self::Bitcrusher | Self::Drive)
    }

    /// Stages whose parameters are derived from `field`.
    #[must_use]
    pub fn affected_by(field: Field) -> &'static [StageId] {
        match field {
            Field::Volume => &[Self::Output],
            Field::Low => &[Self::LowShelf],
            Field::Mid => &[Self::Peak],
            Field::High => &[Self::HighShelf],
            Field::Hpf => &[Self::HighPass],
            Field::Lpf => &[Self::LowPass],
            Field::Delay | Field::DelayFeedback => &[Self::Delay],
            Field::Drive => &[Self::Drive],
            Field::Compression => &[Self::Compressor],
            Field::Chorus => &[Self::Chorus],
            Field::Flanger => &[Self::Flanger],
            Field::Phaser => &[Self::Phaser],
            Field::Tremolo => &[Self::Tremolo],
            Field::Bitcrusher => &[Self::Bitcrusher],
            Field::Tempo | Field::KeyLock => &[Self::KeyLock],
            Field::Reverb | Field::Pitch | Field::Reverse | Field::Loop => &[],
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ParamId {
    Frequency,
    GainDb,
    Gain,
    Wet,
    Dry,
    Depth,
    /// Seconds.
    DelayTime,
    Feedback,
    /// Drive amount, or bit depth for the bitcrusher.
    Amount,
    /// Compressor threshold in dB.
    Threshold,
}

impl ParamId {
    pub const COUNT: usize = 10;

    pub const ALL: [ParamId; Self::COUNT] = [
        ParamId::Frequency,
        ParamId::GainDb,
        ParamId::Gain,
        ParamId::Wet,
        ParamId::Dry,
        ParamId::Depth,
        ParamId::DelayTime,
        ParamId::Feedback,
        ParamId::Amount,
        ParamId::Threshold,
    ];

    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Receiver of resolved stage parameters. The offline chain applies values
/// immediately; the live control bank defers them to the first render
/// quantum at or after `at_frame`.
pub trait ParamTarget {
    fn set_parameter(&mut self, stage: StageId, param: ParamId, value: f32, at_frame: u64);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageSpec {
    pub id: StageId,
    pub params: Vec<(ParamId, f32)>,
}

impl StageSpec {
    fn new(id: StageId, params: &[(ParamId, f32)]) -> Self {
        Self {
            id,
            params: params.to_vec(),
        }
    }

    #[must_use]
    pub fn param(&self, param: ParamId) -> Option<f32> {
        self.params
            .iter()
            .find_map(|&(id, value)| (id == param).then_some(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SourceSpec {
    /// Signed playback rate; negative plays backwards.
    pub rate: f64,
    pub looping: bool,
}

impl SourceSpec {
    #[must_use]
    pub fn reverse(&self) -> bool {
        self.rate < 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainDescription {
    pub source: SourceSpec,
    pub stages: Vec<StageSpec>,
}

impl ChainDescription {
    #[must_use]
    pub fn stage(&self, id: StageId) -> Option<&StageSpec> {
        self.stages.iter().find(|stage| stage.id == id)
    }

    #[must_use]
    pub fn stage_ids(&self) -> Vec<StageId> {
        self.stages.iter().map(|stage| stage.id).collect()
    }

    pub fn apply_to<T: ParamTarget + ?Sized>(&self, target: &mut T, at_frame: u64) {
        for stage in &self.stages {
            apply_stage(stage, target, at_frame);
        }
    }

    /// Pushes only the stages derived from `field`.
    pub fn apply_field_to<T: ParamTarget + ?Sized>(
        &self,
        field: Field,
        target: &mut T,
        at_frame: u64,
    ) {
        for id in StageId::affected_by(field) {
            if let Some(stage) = self.stage(*id) {
                apply_stage(stage, target, at_frame);
            }
        }
    }
}

fn apply_stage<T: ParamTarget + ?Sized>(stage: &StageSpec, target: &mut T, at_frame: u64) {
    for &(param, value) in &stage.params {
        target.set_parameter(stage.id, param, value, at_frame);
    }
}

/// Resolved parameters of the delay-based key-lock approximation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyLockCompensation {
    pub delay_seconds: f32,
    pub feedback: f32,
    pub output: f32,
    pub dry: f32,
}

impl KeyLockCompensation {
    /// Unity pass-through used while key lock is off.
    pub const BYPASS: Self = Self {
        delay_seconds: KEY_LOCK_BASE_DELAY_SECONDS,
        feedback: 0.3,
        output: 0.0,
        dry: 1.0,
    };

    #[must_use]
    pub fn for_settings(settings: &EffectsSettings) -> Self {
        if !settings.key_lock() {
            return Self::BYPASS;
        }

        let tempo_ratio = settings.tempo_ratio() as f32;
        let deviation = (1.0 - 1.0 / tempo_ratio).abs();
        Self {
            delay_seconds: (KEY_LOCK_BASE_DELAY_SECONDS / tempo_ratio)
                .clamp(KEY_LOCK_MIN_DELAY_SECONDS, KEY_LOCK_MAX_DELAY_SECONDS),
            feedback: 0.2 + deviation * 0.3,
            output: 0.6 + deviation * 0.2,
            dry: 0.3,
        }
    }
}

#[must_use]
pub fn describe_chain(settings: &EffectsSettings) -> ChainDescription {
    use ParamId::{
        Amount, DelayTime, Depth, Dry, Feedback, Frequency, Gain, GainDb, Threshold, Wet,
    };

    let key_lock = KeyLockCompensation::for_settings(settings);
    let [low, mid, high] = settings.eq_gains_db();
    let chorus = settings.chorus_mix();
    let flanger = settings.flanger_mix();
    let phaser = settings.phaser_mix();
    let bitcrusher = settings.bitcrusher_mix();

    let stages = vec![
        StageSpec::new(
            StageId::KeyLock,
            &[
                (DelayTime, key_lock.delay_seconds),
                (Feedback, key_lock.feedback),
                (Wet, key_lock.output),
                (Dry, key_lock.dry),
            ],
        ),
        StageSpec::new(StageId::HighPass, &[(Frequency, settings.hpf_hz())]),
        StageSpec::new(StageId::LowPass, &[(Frequency, settings.lpf_hz())]),
        StageSpec::new(StageId::LowShelf, &[(GainDb, low)]),
        StageSpec::new(StageId::Peak, &[(GainDb, mid)]),
        StageSpec::new(StageId::HighShelf, &[(GainDb, high)]),
        StageSpec::new(
            StageId::Chorus,
            &[
                (Gain, settings.chorus_level()),
                (Wet, chorus.wet),
                (Dry, chorus.dry),
            ],
        ),
        StageSpec::new(
            StageId::Flanger,
            &[
                (Gain, settings.flanger_level()),
                (Wet, flanger.wet),
                (Dry, flanger.dry),
            ],
        ),
        StageSpec::new(
            StageId::Phaser,
            &[
                (Wet, phaser.wet),
                (Dry, phaser.dry),
                (Depth, settings.phaser_depth_hz()),
            ],
        ),
        StageSpec::new(StageId::Tremolo, &[(Depth, settings.tremolo_depth())]),
        StageSpec::new(
            StageId::Bitcrusher,
            &[
                (Wet, bitcrusher.wet),
                (Dry, bitcrusher.dry),
                (Amount, settings.bit_depth()),
            ],
        ),
        StageSpec::new(StageId::Drive, &[(Amount, settings.drive_amount())]),
        StageSpec::new(
            StageId::Delay,
            &[
                (DelayTime, settings.delay_seconds()),
                (Feedback, settings.delay_feedback_gain()),
            ],
        ),
        StageSpec::new(
            StageId::Compressor,
            &[(Threshold, settings.compressor_threshold_db())],
        ),
        StageSpec::new(StageId::Output, &[(Gain, settings.volume_gain())]),
    ];

    ChainDescription {
        source: SourceSpec {
            rate: settings.playback_rate(),
            looping: settings.looping(),
        },
        stages,
    }
}

/// Transfer curve for a shaper stage at `amount` (bit depth for the
/// bitcrusher, drive amount for the distortion). `None` for other stages.
#[must_use]
pub fn shaper_curve(stage: StageId, amount: f32) -> Option<Curve> {
    match stage {
        StageId::Drive => Some(distortion_curve(amount)),
        StageId::Bitcrusher => Some(bitcrusher_curve(amount)),
        _ => None,
    }
}

#[derive(Debug, Clone)]
struct KeyLockStage {
    lines: Vec<DelayLine>,
    delay_samples: f32,
    feedback: f32,
    wet: f32,
    dry: f32,
}

impl KeyLockStage {
    fn process(&mut self, block: &mut [f32]) {
        let channels = self.lines.len();
        for frame in block.chunks_exact_mut(channels) {
            for (sample, line) in frame.iter_mut().zip(self.lines.iter_mut()) {
                let delayed = line.read(self.delay_samples);
                line.write(*sample + self.feedback * delayed);
                *sample = self.dry * *sample + self.wet * delayed;
            }
        }
    }
}

/// Chorus and flanger: an LFO-swept short delay, scaled by `level`, mixed
/// against the dry input.
#[derive(Debug, Clone)]
struct ModulatedDelay {
    lines: Vec<DelayLine>,
    lfo: SineLfo,
    base_samples: f32,
    depth_samples: f32,
    level: f32,
    wet: f32,
    dry: f32,
}

impl ModulatedDelay {
    fn process(&mut self, block: &mut [f32]) {
        let channels = self.lines.len();
        for frame in block.chunks_exact_mut(channels) {
            let delay = self.base_samples + self.depth_samples * self.lfo.next();
            for (sample, line) in frame.iter_mut().zip(self.lines.iter_mut()) {
                let delayed = line.read(delay);
                line.write(*sample);
                *sample = self.dry * *sample + self.wet * self.level * delayed;
            }
        }
    }
}

#[derive(Debug, Clone)]
struct PhaserStage {
    filters: Vec<Biquad>,
    lfo: SineLfo,
    channels: usize,
    depth_hz: f32,
    wet: f32,
    dry: f32,
    frame_counter: u64,
}

impl PhaserStage {
    fn process(&mut self, block: &mut [f32]) {
        for frame in block.chunks_exact_mut(self.channels) {
            let sweep = self.lfo.next();
            // counted in frames so block size never changes the output
            if self.frame_counter % PHASER_UPDATE_INTERVAL == 0 {
                for (index, filter) in self.filters.iter_mut().enumerate() {
                    let center = PHASER_BASE_HZ + index as f32 * PHASER_SPACING_HZ;
                    filter.set_frequency((center + self.depth_hz * sweep).max(20.0));
                }
            }
            self.frame_counter = self.frame_counter.wrapping_add(1);

            for (channel, sample) in frame.iter_mut().enumerate() {
                let shifted = self
                    .filters
                    .iter_mut()
                    .fold(*sample, |acc, filter| filter.process_sample(channel, acc));
                *sample = self.dry * *sample + self.wet * shifted;
            }
        }
    }
}

#[derive(Debug, Clone)]
struct TremoloStage {
    lfo: SineLfo,
    channels: usize,
    depth: f32,
}

impl TremoloStage {
    fn process(&mut self, block: &mut [f32]) {
        for frame in block.chunks_exact_mut(self.channels) {
            let gain = 1.0 + self.depth * self.lfo.next();
            for sample in frame {
                *sample *= gain;
            }
        }
    }
}

#[derive(Debug, Clone)]
struct ShaperStage {
    curve: Arc<Curve>,
    amount: f32,
    wet: f32,
    dry: f32,
}

impl ShaperStage {
    fn process(&mut self, block: &mut [f32]) {
        for sample in block {
            *sample = self.dry * *sample + self.wet * self.curve.shape(*sample);
        }
    }
}

#[derive(Debug, Clone)]
struct FeedbackDelay {
    lines: Vec<DelayLine>,
    delay_samples: f32,
    feedback: f32,
}

impl FeedbackDelay {
    fn process(&mut self, block: &mut [f32]) {
        // a zero-length delay leaves the signal untouched
        if self.delay_samples < 1.0 {
            return;
        }

        let channels = self.lines.len();
        for frame in block.chunks_exact_mut(channels) {
            for (sample, line) in frame.iter_mut().zip(self.lines.iter_mut()) {
                let delayed = line.read(self.delay_samples);
                line.write(*sample + self.feedback * delayed);
                *sample = delayed;
            }
        }
    }
}

#[derive(Debug, Clone)]
enum Processor {
    Passthrough,
    KeyLock(KeyLockStage),
    Filter(Biquad),
    Modulated(ModulatedDelay),
    Phaser(PhaserStage),
    Tremolo(TremoloStage),
    Shaper(ShaperStage),
    Delay(FeedbackDelay),
    Compressor(Compressor),
    Gain(f32),
}

impl Processor {
    fn process(&mut self, block: &mut [f32]) {
        match self {
            Self::Passthrough => {}
            Self::KeyLock(stage) => stage.process(block),
            Self::Filter(filter) => filter.process(block),
            Self::Modulated(stage) => stage.process(block),
            Self::Phaser(stage) => stage.process(block),
            Self::Tremolo(stage) => stage.process(block),
            Self::Shaper(stage) => stage.process(block),
            Self::Delay(stage) => stage.process(block),
            Self::Compressor(compressor) => compressor.process(block),
            Self::Gain(gain) => {
                for sample in block {
                    *sample *= *gain;
                }
            }
        }
    }

    /// Returns false when the processor has no such parameter.
    fn set(&mut self, param: ParamId, value: f32, sample_rate: f32) -> bool {
        match (self, param) {
            (Self::KeyLock(stage), ParamId::DelayTime) => stage.delay_samples = value * sample_rate,
            (Self::KeyLock(stage), ParamId::Feedback) => stage.feedback = value,
            (Self::KeyLock(stage), ParamId::Wet) => stage.wet = value,
            (Self::KeyLock(stage), ParamId::Dry) => stage.dry = value,
            (Self::Filter(filter), ParamId::Frequency) => filter.set_frequency(value),
            (Self::Filter(filter), ParamId::GainDb) => filter.set_gain_db(value),
            (Self::Modulated(stage), ParamId::Gain) => stage.level = value,
            (Self::Modulated(stage), ParamId::Wet) => stage.wet = value,
            (Self::Modulated(stage), ParamId::Dry) => stage.dry = value,
            (Self::Phaser(stage), ParamId::Wet) => stage.wet = value,
            (Self::Phaser(stage), ParamId::Dry) => stage.dry = value,
            (Self::Phaser(stage), ParamId::Depth) => stage.depth_hz = value,
            (Self::Tremolo(stage), ParamId::Depth) => stage.depth = value,
            (Self::Shaper(stage), ParamId::Wet) => stage.wet = value,
            (Self::Shaper(stage), ParamId::Dry) => stage.dry = value,
            (Self::Shaper(stage), ParamId::Amount) => stage.amount = value,
            (Self::Delay(stage), ParamId::DelayTime) => stage.delay_samples = value * sample_rate,
            (Self::Delay(stage), ParamId::Feedback) => stage.feedback = value,
            (Self::Compressor(compressor), ParamId::Threshold) => {
                compressor.set_threshold_db(value);
            }
            (Self::Gain(gain), ParamId::Gain) => *gain = value,
            _ => return false,
        }
        true
    }
}

fn delay_capacity(
    stage: StageId,
    seconds: f32,
    sample_rate: f32,
) -> Result<usize, StageBuildError> {
    let samples = (seconds * sample_rate).ceil();
    if !samples.is_finite() || samples < 0.0 || samples as usize > MAX_DELAY_CAPACITY {
        return Err(StageBuildError {
            stage,
            reason: format!("{seconds}s of delay at {sample_rate} Hz exceeds the buffer limit"),
        });
    }
    Ok(samples as usize)
}

fn delay_lines(
    stage: StageId,
    seconds: f32,
    sample_rate: f32,
    channels: usize,
) -> Result<Vec<DelayLine>, StageBuildError> {
    let capacity = delay_capacity(stage, seconds, sample_rate)?;
    Ok(vec![DelayLine::new(capacity); channels])
}

fn build_processor(
    spec: &StageSpec,
    sample_rate: f32,
    channels: usize,
) -> Result<Processor, StageBuildError> {
    let filter = |kind, frequency, q| Biquad::new(kind, sample_rate, channels, frequency, q);
    let modulated = |base_seconds: f32, rate_hz: f32| -> Result<Processor, StageBuildError> {
        Ok(Processor::Modulated(ModulatedDelay {
            lines: delay_lines(spec.id, MODULATED_DELAY_MAX_SECONDS, sample_rate, channels)?,
            lfo: SineLfo::new(rate_hz, sample_rate),
            base_samples: base_seconds * sample_rate,
            depth_samples: MODULATION_DEPTH_SECONDS * sample_rate,
            level: 0.0,
            wet: 0.0,
            dry: 1.0,
        }))
    };

    let processor = match spec.id {
        StageId::KeyLock => Processor::KeyLock(KeyLockStage {
            lines: delay_lines(spec.id, KEY_LOCK_MAX_DELAY_SECONDS, sample_rate, channels)?,
            delay_samples: KEY_LOCK_BASE_DELAY_SECONDS * sample_rate,
            feedback: 0.0,
            wet: 0.0,
            dry: 1.0,
        }),
        StageId::HighPass => Processor::Filter(filter(BiquadKind::HighPass, 20.0, FILTER_Q)),
        StageId::LowPass => Processor::Filter(filter(BiquadKind::LowPass, 20_000.0, FILTER_Q)),
        StageId::LowShelf => Processor::Filter(filter(BiquadKind::LowShelf, LOW_SHELF_HZ, FILTER_Q)),
        StageId::Peak => Processor::Filter(filter(BiquadKind::Peaking, PEAK_HZ, FILTER_Q)),
        StageId::HighShelf => {
            Processor::Filter(filter(BiquadKind::HighShelf, HIGH_SHELF_HZ, FILTER_Q))
        }
        StageId::Chorus => modulated(CHORUS_DELAY_SECONDS, CHORUS_RATE_HZ)?,
        StageId::Flanger => modulated(FLANGER_DELAY_SECONDS, FLANGER_RATE_HZ)?,
        StageId::Phaser => Processor::Phaser(PhaserStage {
            filters: (0..PHASER_STAGES)
                .map(|index| {
                    let center = PHASER_BASE_HZ + index as f32 * PHASER_SPACING_HZ;
                    filter(BiquadKind::AllPass, center, PHASER_Q)
                })
                .collect(),
            lfo: SineLfo::new(PHASER_RATE_HZ, sample_rate),
            channels,
            depth_hz: 0.0,
            wet: 0.0,
            dry: 1.0,
            frame_counter: 0,
        }),
        StageId::Tremolo => Processor::Tremolo(TremoloStage {
            lfo: SineLfo::new(TREMOLO_RATE_HZ, sample_rate),
            channels,
            depth: 0.0,
        }),
        StageId::Bitcrusher | StageId::Drive => {
            let amount = spec.param(ParamId::Amount).unwrap_or(match spec.id {
                StageId::Bitcrusher => 16.0,
                _ => 0.0,
            });
            let curve = shaper_curve(spec.id, amount).ok_or_else(|| StageBuildError {
                stage: spec.id,
                reason: "no transfer curve".to_string(),
            })?;
            let (wet, dry) = if spec.id == StageId::Drive {
                (1.0, 0.0)
            } else {
                (0.0, 1.0)
            };
            Processor::Shaper(ShaperStage {
                curve: Arc::new(curve),
                amount,
                wet,
                dry,
            })
        }
        StageId::Delay => Processor::Delay(FeedbackDelay {
            lines: delay_lines(spec.id, DELAY_MAX_SECONDS, sample_rate, channels)?,
            delay_samples: 0.0,
            feedback: 0.0,
        }),
        StageId::Compressor => Processor::Compressor(Compressor::new(
            CompressorSettings::default(),
            sample_rate,
            channels,
        )),
        StageId::Output => Processor::Gain(1.0),
    };
    Ok(processor)
}

#[derive(Debug, Clone)]
struct Stage {
    id: StageId,
    processor: Processor,
    values: Vec<(ParamId, f32)>,
}

/// A realized, runnable chain of stage processors.
#[derive(Debug, Clone)]
pub struct Chain {
    sample_rate: u32,
    channels: usize,
    stages: Vec<Stage>,
    degraded: Vec<StageId>,
}

impl Chain {
    /// Builds every stage of `description` for the given format and applies
    /// its parameters. A stage that cannot be built is replaced by a
    /// pass-through and reported by [`Chain::degraded_stages`].
    #[instrument(skip(description), fields(stages = description.stages.len()))]
    pub fn realize(
        description: &ChainDescription,
        sample_rate: u32,
        channels: usize,
    ) -> Result<Self, GraphConstructionError> {
        validate_format(sample_rate, channels)?;

        let rate = sample_rate as f32;
        let mut degraded = Vec::new();
        let stages = description
            .stages
            .iter()
            .map(|spec| {
                let processor = build_processor(spec, rate, channels).unwrap_or_else(|error| {
                    warn!(stage = %spec.id, %error, "stage replaced by pass-through");
                    degraded.push(spec.id);
                    Processor::Passthrough
                });
                Stage {
                    id: spec.id,
                    processor,
                    values: spec.params.clone(),
                }
            })
            .collect();

        let mut chain = Self {
            sample_rate,
            channels,
            stages,
            degraded,
        };
        description.apply_to(&mut chain, 0);
        debug!(degraded = chain.degraded.len(), "chain realized");
        Ok(chain)
    }

    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[must_use]
    pub fn stage_ids(&self) -> Vec<StageId> {
        self.stages.iter().map(|stage| stage.id).collect()
    }

    #[must_use]
    pub fn degraded_stages(&self) -> &[StageId] {
        &self.degraded
    }

    #[must_use]
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }

    /// Last value applied to `param` of `stage`.
    #[must_use]
    pub fn parameter(&self, stage: StageId, param: ParamId) -> Option<f32> {
        self.stages
            .iter()
            .find(|candidate| candidate.id == stage)?
            .values
            .iter()
            .find_map(|&(id, value)| (id == param).then_some(value))
    }

    /// Curve currently installed on a shaper stage.
    #[must_use]
    pub fn curve(&self, stage: StageId) -> Option<Arc<Curve>> {
        match &self.stage(stage)?.processor {
            Processor::Shaper(shaper) => Some(Arc::clone(&shaper.curve)),
            _ => None,
        }
    }

    /// Applies a value without allocating. Shaper amounts are only recorded;
    /// their curve has to arrive through [`Chain::replace_curve`].
    pub fn set_control(&mut self, stage: StageId, param: ParamId, value: f32) {
        let rate = self.sample_rate as f32;
        let Some(slot) = self.stage_mut(stage) else {
            return;
        };

        let accepted = slot.processor.set(param, value, rate);
        if !accepted && !matches!(slot.processor, Processor::Passthrough) {
            trace!(%stage, ?param, "parameter not supported by stage");
            return;
        }
        match slot.values.iter_mut().find(|(id, _)| *id == param) {
            Some((_, current)) => *current = value,
            None => slot.values.push((param, value)),
        }
    }

    pub fn replace_curve(&mut self, stage: StageId, curve: Arc<Curve>) {
        if let Some(Stage {
            processor: Processor::Shaper(shaper),
            ..
        }) = self.stage_mut(stage)
        {
            shaper.curve = curve;
        }
    }

    /// Runs every stage over an interleaved block in place.
    pub fn process(&mut self, block: &mut [f32]) {
        for stage in &mut self.stages {
            stage.processor.process(block);
        }
    }

    fn stage(&self, id: StageId) -> Option<&Stage> {
        self.stages.iter().find(|stage| stage.id == id)
    }

    fn stage_mut(&mut self, id: StageId) -> Option<&mut Stage> {
        self.stages.iter_mut().find(|stage| stage.id == id)
    }
}

impl ParamTarget for Chain {
    fn set_parameter(&mut self, stage: StageId, param: ParamId, value: f32, _at_frame: u64) {
        if stage.uses_curve() && param == ParamId::Amount {
            let installed = match self.stage(stage).map(|slot| &slot.processor) {
                Some(Processor::Shaper(shaper)) => Some(shaper.amount),
                _ => None,
            };
            if installed.is_some_and(|amount| amount.to_bits() != value.to_bits()) {
                if let Some(curve) = shaper_curve(stage, value) {
                    self.replace_curve(stage, Arc::new(curve));
                }
            }
        }
        self.set_control(stage, param, value);
    }
}

pub fn validate_format(sample_rate: u32, channels: usize) -> Result<(), GraphConstructionError> {
    if sample_rate == 0 {
        return Err(GraphConstructionError::ZeroSampleRate);
    }
    if channels == 0 {
        return Err(GraphConstructionError::ZeroChannels);
    }
    if channels > MAX_CHANNELS {
        return Err(GraphConstructionError::UnsupportedChannels { channels });
    }
    Ok(())
}
