use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    assets::FALLBACK_SAMPLE_RATE,
    diagnostics::DEFAULT_LOG_FILTER,
    export::DEFAULT_FILE_PREFIX,
    history::DEFAULT_DEBOUNCE,
    live::{DEFAULT_COMMAND_CAPACITY, LiveConfig, RENDER_QUANTUM},
};

pub const CONFIG_FILE_NAME: &str = "deckfx.config.toml";
pub const CONFIG_PATH_ENV: &str = "DECKFX_CONFIG_PATH";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub audio: AudioConfig,
    pub history: HistoryConfig,
    pub export: ExportConfig,
    pub diagnostics: DiagnosticsConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub output_sample_rate: u32,
    pub output_channels: usize,
    pub quantum_frames: usize,
    pub command_queue_capacity: usize,
    pub fallback_sample_rate: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub debounce_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub output_dir: PathBuf,
    pub file_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub rust_log_filter: String,
    pub log_dir: PathBuf,
    pub trace_file_prefix: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            output_sample_rate: 48_000,
            output_channels: 2,
            quantum_frames: RENDER_QUANTUM,
            command_queue_capacity: DEFAULT_COMMAND_CAPACITY,
            fallback_sample_rate: FALLBACK_SAMPLE_RATE,
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE.as_millis() as u64,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data/exports"),
            file_prefix: DEFAULT_FILE_PREFIX.to_string(),
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            rust_log_filter: DEFAULT_LOG_FILTER.to_string(),
            log_dir: PathBuf::from("logs"),
            trace_file_prefix: "deckfx".to_string(),
        }
    }
}

impl AudioConfig {
    #[must_use]
    pub fn live_config(&self) -> LiveConfig {
        LiveConfig {
            sample_rate: self.output_sample_rate,
            channels: self.output_channels,
            quantum_frames: self.quantum_frames,
            command_capacity: self.command_queue_capacity,
            fallback_sample_rate: self.fallback_sample_rate,
        }
    }
}

impl HistoryConfig {
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl EngineConfig {
    pub fn load() -> Result<Self> {
        let config_path = discover_config_path().with_context(|| {
            format!("failed to locate {CONFIG_FILE_NAME}; looked in cwd and parent directory")
        })?;
        Self::from_path(&config_path)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: EngineConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse config TOML from {}", path.display()))?;
        debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Like [`EngineConfig::load`], but a missing file yields the defaults.
    /// A file that exists and fails to parse is still an error.
    pub fn load_or_default() -> Result<Self> {
        match discover_config_path() {
            Ok(path) => Self::from_path(&path),
            Err(error) => {
                warn!(%error, "no config file found, using defaults");
                Ok(Self::default())
            }
        }
    }
}

fn discover_config_path() -> Result<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Ok(path);
        }
    }

    let cwd = env::current_dir().context("failed to resolve current directory")?;
    let candidates = [
        cwd.join(CONFIG_FILE_NAME),
        cwd.join("..").join(CONFIG_FILE_NAME),
    ];

    candidates
        .into_iter()
        .find(|path| path.is_file())
        .ok_or_else(|| anyhow::anyhow!("{CONFIG_FILE_NAME} not found"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [history]
            debounce_ms = 250

            [export]
            file_prefix = "set"
            "#,
        )
        .expect("config toml");
        assert_eq!(config.history.debounce(), Duration::from_millis(250));
        assert_eq!(config.export.file_prefix, "set");
        assert_eq!(config.audio, AudioConfig::default());
    }
}
