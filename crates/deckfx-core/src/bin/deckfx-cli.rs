use std::{fs, path::PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use deckfx_core::{
    EffectsSettings, EngineConfig, Field, FieldValue, ModulationSession,
    diagnostics::init_tracing_from_config, fixtures::sine_asset,
};

#[derive(Debug, Parser)]
#[command(name = "deckfx-cli")]
#[command(about = "Headless tools for rendering DJ effect chains to WAV")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file; defaults to DECKFX_CONFIG_PATH or deckfx.config.toml discovery.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Render a local audio file through the effect chain.
    Export {
        #[arg(long)]
        input: String,

        /// Settings snapshot as inline JSON or a path to a JSON file.
        #[arg(long)]
        settings: Option<String>,

        /// Single control override, e.g. `--set delay=250 --set keyLock=true`.
        #[arg(long = "set", value_parser = parse_assignment)]
        overrides: Vec<(Field, FieldValue)>,

        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Render a built-in tone with a preset.
    DemoExport {
        #[arg(long)]
        output_dir: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "dub")]
        preset: DemoPreset,
    },
    /// Print the default settings as JSON.
    Defaults,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DemoPreset {
    Clean,
    Dub,
    Lofi,
    Nightcore,
}

impl DemoPreset {
    fn settings(self) -> EffectsSettings {
        let defaults = EffectsSettings::reset();
        match self {
            Self::Clean => defaults,
            Self::Dub => defaults
                .set(Field::Delay, 375.0)
                .set(Field::DelayFeedback, 70.0)
                .set(Field::Low, 6.0)
                .set(Field::Lpf, 60.0),
            Self::Lofi => defaults
                .set(Field::Bitcrusher, 70.0)
                .set(Field::Hpf, 15.0)
                .set(Field::Lpf, 20.0)
                .set(Field::Tremolo, 25.0),
            Self::Nightcore => defaults
                .set(Field::Tempo, 125.0)
                .set(Field::Pitch, 4.0)
                .set(Field::Compression, 40.0),
        }
    }
}

fn parse_assignment(raw: &str) -> Result<(Field, FieldValue), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected field=value, got `{raw}`"))?;
    let field: Field = name.trim().parse().map_err(|error| format!("{error}"))?;
    let value = match value.trim() {
        "true" => FieldValue::Toggle(true),
        "false" => FieldValue::Toggle(false),
        number => FieldValue::Scalar(
            number
                .parse::<f32>()
                .map_err(|error| format!("invalid value for {field}: {error}"))?,
        ),
    };
    Ok((field, value))
}

fn read_settings(raw: &str) -> anyhow::Result<EffectsSettings> {
    let json = if raw.trim_start().starts_with('{') {
        raw.to_string()
    } else {
        fs::read_to_string(raw).with_context(|| format!("failed to read settings file {raw}"))?
    };
    serde_json::from_str(&json).context("invalid settings json")
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Defaults = cli.command {
        println!("{}", serde_json::to_string_pretty(&EffectsSettings::reset())?);
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_path(path)?,
        None => EngineConfig::load_or_default()?,
    };
    if let Some(log_dir) = cli.log_dir {
        config.diagnostics.log_dir = log_dir;
    }
    let _telemetry = init_tracing_from_config(&config.diagnostics)?;
    let (mut session, _renderer) = ModulationSession::new(&config)?;

    match cli.command {
        Commands::Export {
            input,
            settings,
            overrides,
            output_dir,
        } => {
            if let Some(raw) = settings {
                session.apply_snapshot(read_settings(&raw)?);
            }
            for (field, value) in overrides {
                session.set(field, value);
            }
            session.set_audio_url(Some(&input))?;
            let output_dir = output_dir.unwrap_or_else(|| config.export.output_dir.clone());
            let path = session.export_to(&output_dir)?;
            println!("{}", path.display());
        }
        Commands::DemoExport { output_dir, preset } => {
            session.load_asset(sine_asset(220.0, 2.0, 44_100, 2));
            session.apply_snapshot(preset.settings());
            let output_dir = output_dir.unwrap_or_else(|| config.export.output_dir.clone());
            let path = session.export_to(&output_dir)?;
            tracing::info!(path = %path.display(), ?preset, "demo export written");
            println!("{}", path.display());
        }
        Commands::Defaults => {}
    }

    Ok(())
}
