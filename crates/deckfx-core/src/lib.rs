pub mod assets;
pub mod chain;
pub mod config;
pub mod diagnostics;
pub mod dsp;
pub mod export;
pub mod fixtures;
pub mod history;
pub mod live;
pub mod model;
pub mod session;
pub mod source;

pub use assets::{DecodeError, DecodedAudioAsset};
pub use chain::{
    Chain, ChainDescription, GraphConstructionError, ParamId, ParamTarget, StageId, StageSpec,
    describe_chain,
};
pub use config::EngineConfig;
pub use diagnostics::{TelemetryGuard, init_tracing, init_tracing_from_config};
pub use export::{
    ExportError, RenderedAudio, encode_wav, export_to_file, offline_length, render_offline,
};
pub use history::HistoryManager;
pub use live::{LiveConfig, LiveEngine, LiveRenderer, PlaybackState, RenderEvent};
pub use model::{DEFAULT_SETTINGS, EffectsSettings, Field, FieldValue};
pub use session::ModulationSession;
pub use source::{PlaybackError, Voice};
