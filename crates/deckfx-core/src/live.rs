//! Live monitoring: a control-side [`LiveEngine`] and an audio-side
//! [`LiveRenderer`].
//!
//! The engine owns the asset, the playback state machine and the parameter
//! writes. The renderer is meant to be moved into an audio host callback and
//! pulled block by block. Graphs and voices cross over a bounded command
//! queue. Parameter values, voice stops and teardowns cross through
//! [`ControlBank`] atomics, and rebuilt shaper curves through one-slot
//! mailboxes; all of it is picked up at the start of each render quantum.
//! Nothing on the render path takes a lock.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU32, AtomicU64, Ordering},
    },
};

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};
use serde::Serialize;
use tracing::{debug, info, instrument, trace, warn};
use uuid::Uuid;

use crate::{
    assets::{DecodeError, DecodedAudioAsset, FALLBACK_SAMPLE_RATE},
    chain::{
        Chain, ChainDescription, GraphConstructionError, ParamId, ParamTarget, StageId,
        describe_chain, shaper_curve, validate_format,
    },
    dsp::Curve,
    model::{EffectsSettings, Field},
    source::{PlaybackError, Voice},
};

/// Frames per render quantum; control changes land on quantum boundaries.
pub const RENDER_QUANTUM: usize = 128;
pub const DEFAULT_COMMAND_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Idle,
    Loaded,
    Playing,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveConfig {
    pub sample_rate: u32,
    pub channels: usize,
    pub quantum_frames: usize,
    pub command_capacity: usize,
    pub fallback_sample_rate: u32,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            quantum_frames: RENDER_QUANTUM,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
            fallback_sample_rate: FALLBACK_SAMPLE_RATE,
        }
    }
}

/// Handoffs that need an owned payload. Stopping a voice and tearing down
/// the graph travel through [`ControlBank`] marks instead, so they can never
/// be lost to a full queue.
pub enum RenderCommand {
    InstallGraph { epoch: u64, chain: Box<Chain> },
    StartVoice { voice_id: u64, voice: Box<Voice> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderEvent {
    VoiceEnded { voice_id: u64 },
}

#[derive(Debug, Default)]
struct ControlCell {
    value: AtomicU32,
    due_frame: AtomicU64,
    version: AtomicU64,
}

/// One atomic `f32` cell per stage parameter, last write wins. Also carries
/// the voice and graph lifecycle marks shared with the renderer.
#[derive(Debug)]
pub struct ControlBank {
    cells: Vec<ControlCell>,
    revision: AtomicU64,
    rendered_frames: AtomicU64,
    /// Voices with an id at or below this are silenced.
    stop_through: AtomicU64,
    /// Graphs installed under an older epoch are dropped.
    teardown_epoch: AtomicU64,
    /// Highest voice id that ran out on its own.
    ended_voice: AtomicU64,
}

impl Default for ControlBank {
    fn default() -> Self {
        Self {
            cells: (0..StageId::ORDER.len() * ParamId::COUNT)
                .map(|_| ControlCell::default())
                .collect(),
            revision: AtomicU64::new(0),
            rendered_frames: AtomicU64::new(0),
            stop_through: AtomicU64::new(0),
            teardown_epoch: AtomicU64::new(0),
            ended_voice: AtomicU64::new(0),
        }
    }
}

impl ControlBank {
    fn slot(stage: StageId, param: ParamId) -> usize {
        stage.index() * ParamId::COUNT + param.index()
    }

    pub fn write(&self, stage: StageId, param: ParamId, value: f32, at_frame: u64) {
        let cell = &self.cells[Self::slot(stage, param)];
        cell.value.store(value.to_bits(), Ordering::Relaxed);
        cell.due_frame.store(at_frame, Ordering::Relaxed);
        let revision = self.revision.fetch_add(1, Ordering::AcqRel) + 1;
        cell.version.store(revision, Ordering::Release);
    }

    #[must_use]
    pub fn read(&self, stage: StageId, param: ParamId) -> f32 {
        f32::from_bits(self.cells[Self::slot(stage, param)].value.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn rendered_frames(&self) -> u64 {
        self.rendered_frames.load(Ordering::Acquire)
    }

    fn stop_voices_through(&self, voice_id: u64) {
        self.stop_through.fetch_max(voice_id, Ordering::AcqRel);
    }

    /// Silences every voice up to `last_voice` and retires the current graph.
    /// Returns the epoch the next graph must be installed under.
    fn begin_teardown(&self, last_voice: u64) -> u64 {
        self.stop_voices_through(last_voice);
        self.teardown_epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn mark_ended(&self, voice_id: u64) {
        self.ended_voice.fetch_max(voice_id, Ordering::AcqRel);
    }
}

/// Latest-value mailbox for one shaper stage. The control side keeps a
/// receiver too, so an unclaimed curve is replaced rather than queued.
struct CurveSlot {
    stage: StageId,
    tx: Sender<Arc<Curve>>,
    unclaimed: Receiver<Arc<Curve>>,
}

impl CurveSlot {
    fn post(&self, curve: Arc<Curve>) {
        self.clear();
        if let Err(error) = self.tx.try_send(curve) {
            warn!(stage = %self.stage, error = %error, "curve update dropped");
        }
    }

    fn clear(&self) {
        while self.unclaimed.try_recv().is_ok() {}
    }
}

/// Control-side [`ParamTarget`]: values go to the bank, shaper curves are
/// rebuilt here and posted to the renderer ready-made.
struct LiveControls {
    bank: Arc<ControlBank>,
    curves: Vec<CurveSlot>,
    curve_amounts: HashMap<StageId, f32>,
}

impl LiveControls {
    fn remember_curves(&mut self, description: &ChainDescription) {
        self.curve_amounts.clear();
        for stage in &description.stages {
            if let (true, Some(amount)) = (stage.id.uses_curve(), stage.param(ParamId::Amount)) {
                self.curve_amounts.insert(stage.id, amount);
            }
        }
    }

    fn clear_curves(&mut self) {
        for slot in &self.curves {
            slot.clear();
        }
        self.curve_amounts.clear();
    }
}

impl ParamTarget for LiveControls {
    fn set_parameter(&mut self, stage: StageId, param: ParamId, value: f32, at_frame: u64) {
        if stage.uses_curve() && param == ParamId::Amount {
            let changed = self
                .curve_amounts
                .get(&stage)
                .is_none_or(|amount| amount.to_bits() != value.to_bits());
            if changed {
                let slot = self.curves.iter().find(|slot| slot.stage == stage);
                if let (Some(slot), Some(curve)) = (slot, shaper_curve(stage, value)) {
                    slot.post(Arc::new(curve));
                    self.curve_amounts.insert(stage, value);
                }
            }
        }
        self.bank.write(stage, param, value, at_frame);
    }
}

pub struct LiveEngine {
    config: LiveConfig,
    state: PlaybackState,
    asset: Option<Arc<DecodedAudioAsset>>,
    graph_asset: Option<Uuid>,
    graph_error: Option<GraphConstructionError>,
    degraded_stages: Vec<StageId>,
    controls: LiveControls,
    commands: Sender<RenderCommand>,
    epoch: u64,
    next_voice_id: u64,
    active_voice: Option<u64>,
    media_element: Option<String>,
}

impl LiveEngine {
    /// Creates the engine and the renderer that must be driven by the audio
    /// host. Fails when the output format cannot carry a graph.
    #[instrument(fields(sample_rate = config.sample_rate, channels = config.channels))]
    pub fn new(config: LiveConfig) -> Result<(Self, LiveRenderer), GraphConstructionError> {
        validate_format(config.sample_rate, config.channels)?;
        let config = LiveConfig {
            quantum_frames: config.quantum_frames.max(1),
            command_capacity: config.command_capacity.max(1),
            ..config
        };

        let (command_tx, command_rx) = bounded(config.command_capacity);
        let bank = Arc::new(ControlBank::default());
        let curves: Vec<CurveSlot> = StageId::ORDER
            .into_iter()
            .filter(|stage| stage.uses_curve())
            .map(|stage| {
                let (tx, unclaimed) = bounded(1);
                CurveSlot {
                    stage,
                    tx,
                    unclaimed,
                }
            })
            .collect();

        let renderer = LiveRenderer {
            commands: command_rx,
            curves: curves
                .iter()
                .map(|slot| (slot.stage, slot.unclaimed.clone()))
                .collect(),
            bank: Arc::clone(&bank),
            channels: config.channels,
            quantum_frames: config.quantum_frames,
            chain: None,
            voice: None,
            applied: vec![0; bank.cells.len()],
            seen_revision: 0,
            controls_pending: false,
            frame: 0,
        };
        let engine = Self {
            config,
            state: PlaybackState::Idle,
            asset: None,
            graph_asset: None,
            graph_error: None,
            degraded_stages: Vec::new(),
            controls: LiveControls {
                bank,
                curves,
                curve_amounts: HashMap::new(),
            },
            commands: command_tx,
            epoch: 0,
            next_voice_id: 1,
            active_voice: None,
            media_element: None,
        };
        info!("live engine created");
        Ok((engine, renderer))
    }

    #[must_use]
    pub fn config(&self) -> LiveConfig {
        self.config
    }

    #[must_use]
    pub fn state(&self) -> PlaybackState {
        self.state
    }

    #[must_use]
    pub fn asset(&self) -> Option<&Arc<DecodedAudioAsset>> {
        self.asset.as_ref()
    }

    #[must_use]
    pub fn control_bank(&self) -> &ControlBank {
        &self.controls.bank
    }

    /// False while no asset is loaded or after the graph failed to build.
    #[must_use]
    pub fn controls_enabled(&self) -> bool {
        self.asset.is_some() && self.graph_error.is_none()
    }

    #[must_use]
    pub fn graph_error(&self) -> Option<&GraphConstructionError> {
        self.graph_error.as_ref()
    }

    #[must_use]
    pub fn degraded_stages(&self) -> &[StageId] {
        &self.degraded_stages
    }

    #[must_use]
    pub fn media_element(&self) -> Option<&str> {
        self.media_element.as_deref()
    }

    /// Records an external media handle for diagnostics. It is never routed
    /// into the graph.
    pub fn attach_media_element(&mut self, handle: impl Into<String>) {
        let handle = handle.into();
        debug!(handle = %handle, "media element attached");
        self.media_element = Some(handle);
    }

    #[instrument(skip(self), fields(url = %url))]
    pub fn load_buffer(&mut self, url: &str) -> Result<Arc<DecodedAudioAsset>, DecodeError> {
        match DecodedAudioAsset::load_with_fallback(url, self.config.fallback_sample_rate) {
            Ok(asset) => {
                let asset = Arc::new(asset);
                self.load_asset(Arc::clone(&asset));
                Ok(asset)
            }
            Err(error) => {
                warn!(%error, "audio load failed, engine returns to idle");
                self.unload();
                Err(error)
            }
        }
    }

    /// Installs an already-decoded asset, tearing down whatever belonged to
    /// the previous one.
    #[instrument(skip(self, asset), fields(asset_id = %asset.id(), url = %asset.url()))]
    pub fn load_asset(&mut self, asset: Arc<DecodedAudioAsset>) {
        self.teardown();
        self.asset = Some(asset);
        self.state = PlaybackState::Loaded;
        info!("asset loaded");
    }

    #[instrument(skip(self, settings), fields(state = ?self.state))]
    pub fn play(&mut self, settings: &EffectsSettings) -> Result<(), PlaybackError> {
        let asset = self.asset.clone().ok_or(PlaybackError::NoAsset)?;
        let description = describe_chain(settings);
        // the previous voice is silenced even if the new one cannot start
        self.stop_voice();

        if self.graph_asset != Some(asset.id()) {
            if let Err(error) = self.install_graph(&description, asset.id()) {
                self.state = PlaybackState::Paused;
                return Err(error);
            }
        } else {
            self.push_description(&description, None);
        }

        let started = Voice::new(Arc::clone(&asset), description.source, self.config.sample_rate)
            .and_then(|voice| {
                let voice_id = self.next_voice_id;
                self.next_voice_id += 1;
                self.send(RenderCommand::StartVoice {
                    voice_id,
                    voice: Box::new(voice),
                })
                .map(|()| voice_id)
            });
        let voice_id = match started {
            Ok(voice_id) => voice_id,
            Err(error) => {
                self.state = PlaybackState::Paused;
                return Err(error);
            }
        };

        self.active_voice = Some(voice_id);
        self.state = PlaybackState::Playing;
        info!(
            voice_id,
            rate = description.source.rate,
            looping = description.source.looping,
            "voice started"
        );
        Ok(())
    }

    /// Stops the voice and keeps the graph; a later `play` starts over.
    #[instrument(skip(self), fields(state = ?self.state))]
    pub fn pause(&mut self) {
        if self.state == PlaybackState::Playing {
            self.stop_voice();
            self.state = PlaybackState::Paused;
            debug!("playback paused");
        }
    }

    /// Like `pause`, but rewinds to the loaded state.
    #[instrument(skip(self), fields(state = ?self.state))]
    pub fn stop(&mut self) {
        if matches!(self.state, PlaybackState::Playing | PlaybackState::Paused) {
            self.stop_voice();
            self.state = PlaybackState::Loaded;
            debug!("playback stopped");
        }
    }

    #[instrument(skip(self), fields(state = ?self.state))]
    pub fn unload(&mut self) {
        self.teardown();
        self.asset = None;
        self.state = PlaybackState::Idle;
        info!("engine unloaded");
    }

    /// Re-derives every stage parameter from `settings`. Voice parameters
    /// (pitch, tempo rate, reverse, loop) only take effect on the next play.
    pub fn update_parameter(&mut self, settings: &EffectsSettings) {
        self.push_description(&describe_chain(settings), None);
    }

    pub fn update_field(&mut self, field: Field, settings: &EffectsSettings) {
        self.push_description(&describe_chain(settings), Some(field));
    }

    /// Reports the active voice once the renderer has seen it run out. A
    /// non-looping voice that ended moves the engine from `Playing` to
    /// `Paused`.
    pub fn poll_events(&mut self) -> Vec<RenderEvent> {
        let ended = self.controls.bank.ended_voice.load(Ordering::Acquire);
        match self.active_voice {
            Some(voice_id) if ended >= voice_id => {
                self.active_voice = None;
                if self.state == PlaybackState::Playing {
                    self.state = PlaybackState::Paused;
                }
                debug!(voice_id, "voice ended");
                vec![RenderEvent::VoiceEnded { voice_id }]
            }
            _ => Vec::new(),
        }
    }

    fn install_graph(
        &mut self,
        description: &ChainDescription,
        asset_id: Uuid,
    ) -> Result<(), PlaybackError> {
        let chain = match Chain::realize(description, self.config.sample_rate, self.config.channels)
        {
            Ok(chain) => chain,
            Err(error) => {
                warn!(%error, "graph construction failed, controls disabled");
                self.graph_error = Some(error.clone());
                return Err(PlaybackError::GraphUnavailable(error.to_string()));
            }
        };

        self.degraded_stages = chain.degraded_stages().to_vec();
        if !self.degraded_stages.is_empty() {
            warn!(degraded = ?self.degraded_stages, "graph built with pass-through stages");
        }
        self.controls.clear_curves();
        self.send(RenderCommand::InstallGraph {
            epoch: self.epoch,
            chain: Box::new(chain),
        })?;
        self.graph_asset = Some(asset_id);
        self.graph_error = None;
        self.controls.remember_curves(description);
        self.push_description(description, None);
        debug!(%asset_id, epoch = self.epoch, "graph installed");
        Ok(())
    }

    fn push_description(&mut self, description: &ChainDescription, field: Option<Field>) {
        let at_frame = self.controls.bank.rendered_frames();
        match field {
            Some(field) => description.apply_field_to(field, &mut self.controls, at_frame),
            None => description.apply_to(&mut self.controls, at_frame),
        }
        trace!(at_frame, ?field, "parameters pushed");
    }

    fn stop_voice(&mut self) {
        if let Some(voice_id) = self.active_voice.take() {
            self.controls.bank.stop_voices_through(voice_id);
        }
    }

    /// Drops the graph and every voice issued so far, then forgets the asset
    /// bookkeeping that belonged to them.
    fn teardown(&mut self) {
        if self.graph_asset.is_some() || self.active_voice.is_some() {
            self.epoch = self.controls.bank.begin_teardown(self.next_voice_id - 1);
            self.controls.clear_curves();
            trace!(epoch = self.epoch, "graph torn down");
        }
        self.graph_asset = None;
        self.graph_error = None;
        self.degraded_stages.clear();
        self.active_voice = None;
    }

    fn send(&self, command: RenderCommand) -> Result<(), PlaybackError> {
        self.commands.try_send(command).map_err(|error| {
            let reason = match error {
                TrySendError::Full(_) => "full",
                TrySendError::Disconnected(_) => "disconnected",
            };
            warn!(reason, "render command rejected");
            PlaybackError::RendererUnavailable
        })
    }
}

/// Audio-side half. Owns the realized chain and the voice.
pub struct LiveRenderer {
    commands: Receiver<RenderCommand>,
    curves: Vec<(StageId, Receiver<Arc<Curve>>)>,
    bank: Arc<ControlBank>,
    channels: usize,
    quantum_frames: usize,
    chain: Option<(u64, Box<Chain>)>,
    voice: Option<(u64, Box<Voice>)>,
    applied: Vec<u64>,
    seen_revision: u64,
    controls_pending: bool,
    frame: u64,
}

impl LiveRenderer {
    #[must_use]
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[must_use]
    pub fn has_graph(&self) -> bool {
        self.chain.is_some()
    }

    #[must_use]
    pub fn has_voice(&self) -> bool {
        self.voice.is_some()
    }

    #[must_use]
    pub fn frames_rendered(&self) -> u64 {
        self.frame
    }

    /// Renders interleaved frames into `output`. Commands, lifecycle marks
    /// and control changes are applied at the start of every quantum;
    /// without a graph or voice the output is silence.
    pub fn process(&mut self, output: &mut [f32]) {
        let quantum_len = self.quantum_frames * self.channels;
        for quantum in output.chunks_mut(quantum_len) {
            self.drain_commands();
            self.apply_marks();
            self.take_curves();
            self.refresh_controls();

            match (&mut self.chain, &mut self.voice) {
                (Some((_, chain)), Some((_, voice))) => {
                    voice.render(quantum, self.channels);
                    chain.process(quantum);
                }
                (Some((_, chain)), None) => {
                    // the graph keeps running so delay tails ring out
                    quantum.fill(0.0);
                    chain.process(quantum);
                }
                (None, Some((_, voice))) => {
                    voice.render(quantum, self.channels);
                }
                (None, None) => quantum.fill(0.0),
            }

            if let Some((voice_id, voice)) = &self.voice {
                if voice.is_finished() {
                    self.bank.mark_ended(*voice_id);
                    self.voice = None;
                }
            }

            self.frame += (quantum.len() / self.channels) as u64;
            self.bank.rendered_frames.store(self.frame, Ordering::Release);
        }
    }

    fn drain_commands(&mut self) {
        loop {
            match self.commands.try_recv() {
                Ok(RenderCommand::InstallGraph { epoch, chain }) => {
                    if epoch < self.bank.teardown_epoch.load(Ordering::Acquire) {
                        continue;
                    }
                    self.chain = Some((epoch, chain));
                    // values already in the bank belong to the new graph too
                    self.applied.fill(0);
                    self.controls_pending = true;
                }
                Ok(RenderCommand::StartVoice { voice_id, voice }) => {
                    if voice_id > self.bank.stop_through.load(Ordering::Acquire) {
                        self.voice = Some((voice_id, voice));
                    }
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
    }

    fn apply_marks(&mut self) {
        let epoch = self.bank.teardown_epoch.load(Ordering::Acquire);
        if self.chain.as_ref().is_some_and(|(installed, _)| *installed < epoch) {
            self.chain = None;
        }
        let stop_through = self.bank.stop_through.load(Ordering::Acquire);
        if self.voice.as_ref().is_some_and(|(voice_id, _)| *voice_id <= stop_through) {
            self.voice = None;
        }
    }

    fn take_curves(&mut self) {
        for (stage, unclaimed) in &self.curves {
            if let Ok(curve) = unclaimed.try_recv() {
                if let Some((_, chain)) = &mut self.chain {
                    chain.replace_curve(*stage, curve);
                }
            }
        }
    }

    fn refresh_controls(&mut self) {
        let revision = self.bank.revision.load(Ordering::Acquire);
        if revision == self.seen_revision && !self.controls_pending {
            return;
        }
        self.seen_revision = revision;
        self.controls_pending = false;

        let Some((_, chain)) = &mut self.chain else {
            self.controls_pending = true;
            return;
        };

        for stage in StageId::ORDER {
            for param in ParamId::ALL {
                let slot = ControlBank::slot(stage, param);
                let cell = &self.bank.cells[slot];
                let version = cell.version.load(Ordering::Acquire);
                if version == 0 || version == self.applied[slot] {
                    continue;
                }
                if cell.due_frame.load(Ordering::Relaxed) > self.frame {
                    self.controls_pending = true;
                    continue;
                }
                let value = f32::from_bits(cell.value.load(Ordering::Relaxed));
                chain.set_control(stage, param, value);
                self.applied[slot] = version;
            }
        }
    }
}
