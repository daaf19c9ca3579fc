//! Headless wiring of the effects panel: settings, history, the live engine,
//! export and the change observer behind one controller.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use tracing::{debug, info, instrument, warn};

use crate::{
    assets::{DecodeError, DecodedAudioAsset},
    chain::GraphConstructionError,
    config::EngineConfig,
    export::{DEFAULT_FILE_PREFIX, ExportError, export_to_file_with_prefix},
    history::HistoryManager,
    live::{LiveEngine, LiveRenderer, PlaybackState, RenderEvent},
    model::{EffectsSettings, Field, FieldValue},
    source::PlaybackError,
};

pub type EffectsObserver = Box<dyn FnMut(&EffectsSettings) + Send>;

pub struct ModulationSession {
    settings: EffectsSettings,
    history: HistoryManager,
    live: LiveEngine,
    observer: Option<EffectsObserver>,
    audio_url: Option<String>,
    exporting: bool,
    export_prefix: String,
}

impl ModulationSession {
    /// Builds a session from config and hands back the renderer for the
    /// audio host.
    pub fn new(config: &EngineConfig) -> Result<(Self, LiveRenderer), GraphConstructionError> {
        let (live, renderer) = LiveEngine::new(config.audio.live_config())?;
        let mut session = Self::with_live_engine(live, config.history.debounce());
        session.export_prefix.clone_from(&config.export.file_prefix);
        Ok((session, renderer))
    }

    #[must_use]
    pub fn with_live_engine(live: LiveEngine, debounce: Duration) -> Self {
        Self {
            settings: EffectsSettings::reset(),
            history: HistoryManager::new(debounce),
            live,
            observer: None,
            audio_url: None,
            exporting: false,
            export_prefix: DEFAULT_FILE_PREFIX.to_string(),
        }
    }

    /// Registers the observer fired after every settings emission.
    pub fn on_effects_change(&mut self, observer: impl FnMut(&EffectsSettings) + Send + 'static) {
        self.observer = Some(Box::new(observer));
    }

    #[must_use]
    pub fn settings(&self) -> &EffectsSettings {
        &self.settings
    }

    #[must_use]
    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    #[must_use]
    pub fn live(&self) -> &LiveEngine {
        &self.live
    }

    #[must_use]
    pub fn audio_url(&self) -> Option<&str> {
        self.audio_url.as_deref()
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.live.state() == PlaybackState::Playing
    }

    #[must_use]
    pub fn is_exporting(&self) -> bool {
        self.exporting
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    /// Loads (or with `None`, tears down) the audio behind the panel.
    #[instrument(skip(self))]
    pub fn set_audio_url(&mut self, url: Option<&str>) -> Result<(), DecodeError> {
        let Some(url) = url else {
            if self.history.flush() {
                debug!("pending edit committed on teardown");
            }
            self.live.unload();
            self.audio_url = None;
            return Ok(());
        };
        if self.audio_url.as_deref() == Some(url) && self.live.asset().is_some() {
            debug!("audio url unchanged");
            return Ok(());
        }

        match self.live.load_buffer(url) {
            Ok(_) => {
                self.audio_url = Some(url.to_string());
                self.live.update_parameter(&self.settings);
                Ok(())
            }
            Err(error) => {
                self.audio_url = None;
                warn!(%error, "audio url could not be loaded");
                Err(error)
            }
        }
    }

    /// Installs an already-decoded asset as the current audio.
    pub fn load_asset(&mut self, asset: Arc<DecodedAudioAsset>) {
        self.audio_url = Some(asset.url().to_string());
        self.live.load_asset(asset);
        self.live.update_parameter(&self.settings);
    }

    pub fn attach_media_element(&mut self, handle: impl Into<String>) {
        self.live.attach_media_element(handle);
    }

    pub fn set(&mut self, field: Field, value: impl Into<FieldValue>) -> EffectsSettings {
        self.set_at(field, value, Instant::now())
    }

    /// Applies one control change at `now`. Unchanged values emit nothing.
    pub fn set_at(
        &mut self,
        field: Field,
        value: impl Into<FieldValue>,
        now: Instant,
    ) -> EffectsSettings {
        let next = self.settings.set(field, value);
        if next != self.settings {
            self.settings = next;
            self.emit(Some(field), now);
        }
        self.settings
    }

    /// Replaces the whole snapshot at once, e.g. when a preset is loaded.
    pub fn apply_snapshot(&mut self, settings: EffectsSettings) {
        if settings != self.settings {
            self.settings = settings;
            self.emit(None, Instant::now());
        }
    }

    pub fn toggle_loop(&mut self) -> bool {
        self.toggle_loop_at(Instant::now())
    }

    pub fn toggle_loop_at(&mut self, now: Instant) -> bool {
        let looping = !self.settings.looping();
        self.set_at(Field::Loop, looping, now);
        looping
    }

    /// Drives the history debounce; returns whether an entry was committed.
    pub fn tick(&mut self, now: Instant) -> bool {
        self.history.poll(now)
    }

    #[instrument(skip(self))]
    pub fn undo(&mut self) -> bool {
        self.history
            .undo()
            .map(|settings| self.apply_from_history(settings))
            .is_some()
    }

    #[instrument(skip(self))]
    pub fn redo(&mut self) -> bool {
        self.history
            .redo()
            .map(|settings| self.apply_from_history(settings))
            .is_some()
    }

    #[instrument(skip(self))]
    pub fn reset_all(&mut self) {
        let defaults = self.history.reset_all();
        self.apply_from_history(defaults);
        info!("effects reset");
    }

    /// Drains renderer events into the playback state.
    pub fn poll_events(&mut self) -> Vec<RenderEvent> {
        self.live.poll_events()
    }

    #[instrument(skip(self), fields(state = ?self.live.state()))]
    pub fn toggle_playback(&mut self) -> Result<(), PlaybackError> {
        self.live.poll_events();
        if self.is_playing() {
            self.live.pause();
            return Ok(());
        }
        self.live.play(&self.settings).inspect_err(|error| {
            warn!(%error, "playback could not start");
        })
    }

    /// Exports the current settings snapshot applied to the loaded audio.
    #[instrument(skip(self), fields(output_dir = %output_dir.display()))]
    pub fn export_to(&mut self, output_dir: &Path) -> Result<PathBuf, ExportError> {
        let asset = self.live.asset().cloned().ok_or(ExportError::NoAsset)?;

        self.exporting = true;
        let result =
            export_to_file_with_prefix(&asset, &self.settings, output_dir, &self.export_prefix);
        self.exporting = false;

        match &result {
            Ok(path) => info!(path = %path.display(), "session export finished"),
            Err(error) => warn!(%error, "session export failed"),
        }
        result
    }

    fn apply_from_history(&mut self, settings: EffectsSettings) {
        self.settings = settings;
        self.emit(None, Instant::now());
    }

    fn emit(&mut self, field: Option<Field>, now: Instant) {
        match field {
            Some(field) => self.live.update_field(field, &self.settings),
            None => self.live.update_parameter(&self.settings),
        }
        self.history.observe(self.settings, now);
        if let Some(observer) = self.observer.as_mut() {
            observer(&self.settings);
        }
    }
}
