//! Invader CLI Application
//!
//! Renders DI recordings through the amp chain offline and manages presets.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use invader_core::domain::amp::{AmpSelector, ModelBank};
use invader_core::domain::config::{AppConfig, ConfigManager, DirectoryWatcher, Preset, PresetStore};
use invader_core::domain::ir::{IrBank, IrReference, IrSelector};
use invader_core::domain::params::{EngineFlags, ParamId, Parameters};
use invader_core::domain::pipeline::AmpProcessor;
use invader_infra::{load_factory_irs, load_model_bank, read_wav, scan_user_irs, write_wav, OfflineRenderer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "invader")]
#[command(about = "Neural guitar amp with cabinet IRs, tone stack and effects", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration directory (defaults to the platform config dir)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a WAV file through the amp
    Render {
        /// Input WAV (mono or stereo)
        #[arg(short, long)]
        input: PathBuf,

        /// Output WAV (32-bit float)
        #[arg(short, long)]
        output: PathBuf,

        /// Preset to load before rendering
        #[arg(short, long)]
        preset: Option<String>,

        /// Host tempo for the delay (defaults to the configured fallback)
        #[arg(long)]
        bpm: Option<f64>,

        /// Host block size in frames
        #[arg(long, default_value_t = 512)]
        block_size: usize,

        /// Seconds of silence appended for effect tails
        #[arg(long, default_value_t = 0.0)]
        tail: f64,

        /// Impulse response: off, factory:<index> or user:<name>
        #[arg(long, value_parser = parse_ir)]
        ir: Option<IrReference>,

        /// Parameter override, e.g. --set "amp gain=6.5"
        #[arg(long = "set", value_parser = parse_assignment)]
        overrides: Vec<(String, f32)>,
    },
    /// Print the parameter table
    Params,
    /// Manage presets
    Presets {
        #[command(subcommand)]
        action: PresetAction,
    },
    /// Inspect the user IR directory
    Irs {
        #[command(subcommand)]
        action: IrAction,
    },
}

#[derive(Subcommand)]
enum IrAction {
    /// List user IRs with their `custom ir selection` number
    List,
    /// Rescan and list whenever a WAV file lands in the directory
    Watch,
}

#[derive(Subcommand)]
enum PresetAction {
    /// List saved presets
    List,
    /// Save a preset from defaults plus overrides
    Save {
        name: String,

        #[arg(long, value_parser = parse_ir)]
        ir: Option<IrReference>,

        #[arg(long = "set", value_parser = parse_assignment)]
        overrides: Vec<(String, f32)>,
    },
    /// Delete a preset
    Delete { name: String },
}

fn parse_assignment(s: &str) -> std::result::Result<(String, f32), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got {s:?}"))?;
    let value: f32 = value
        .trim()
        .parse()
        .map_err(|e| format!("bad value in {s:?}: {e}"))?;
    Ok((name.trim().to_string(), value))
}

fn parse_ir(s: &str) -> std::result::Result<IrReference, String> {
    match s.split_once(':') {
        None if s.eq_ignore_ascii_case("off") => Ok(IrReference::Off),
        Some(("factory", index)) => index
            .parse()
            .map(|index| IrReference::Factory { index })
            .map_err(|e| format!("bad factory index {index:?}: {e}")),
        Some(("user", name)) if !name.is_empty() => Ok(IrReference::User {
            name: name.to_string(),
        }),
        _ => Err(format!("expected off, factory:<index> or user:<name>, got {s:?}")),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn apply_overrides(params: &Parameters, overrides: &[(String, f32)]) -> Result<()> {
    for (name, value) in overrides {
        let stored = params
            .set_by_name(name, *value)
            .with_context(|| format!("cannot set {name:?}"))?;
        info!(param = %name, value = stored, "Override applied");
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn render(
    config: AppConfig,
    input: PathBuf,
    output: PathBuf,
    preset: Option<String>,
    bpm: Option<f64>,
    block_size: usize,
    tail: f64,
    ir: Option<IrReference>,
    overrides: Vec<(String, f32)>,
) -> Result<()> {
    if block_size == 0 {
        bail!("block size must be positive");
    }

    let params = Arc::new(Parameters::new());
    let flags = Arc::new(EngineFlags::new());
    // Offline rendering runs activated; host-side licensing is out of scope here
    flags.set_license_activated(true);

    // --ir beats the preset; with neither, the selection parameters decide
    let mut reference = None;
    if let Some(name) = preset {
        let store = PresetStore::new(config.paths.preset_dir.clone());
        let preset = store.load(&name).await?;
        preset.apply(&params, &flags);
        reference = Some(preset.ir);
    }
    if ir.is_some() {
        reference = ir;
    }
    apply_overrides(&params, &overrides)?;

    let tempo = bpm.unwrap_or(config.engine.fallback_tempo_bpm);
    let report = tokio::task::spawn_blocking(move || -> Result<_> {
        let audio = read_wav(&input)?;
        let rate = f64::from(audio.sample_rate);

        let mut engine = config.engine.clone();
        engine.sample_rate = audio.sample_rate;
        engine.max_block_size = block_size;
        let max_ir_length = engine.max_ir_length;
        let (mut processor, ports) = AmpProcessor::new(engine, params.clone(), flags.clone())?;
        processor.prepare(rate, block_size)?;

        let model_dir = config.paths.model_dir.clone();
        let bank = ModelBank::global_or_init(|| load_model_bank(&model_dir));
        if bank.loaded() == 0 {
            warn!(dir = %config.paths.model_dir.display(), "No amp models found, amp stage bypassed");
        }
        let mut amp = AmpSelector::new(bank, params.clone(), ports.models, rate, block_size)
            .with_default_rate(config.engine.model_sample_rate);
        amp.select()?;

        let mut irs = IrBank::new(rate, max_ir_length);
        irs.load_factory(load_factory_irs(&config.paths.factory_ir_dir));
        irs.set_user(scan_user_irs(&config.paths.user_ir_dir)?);
        let mut cabinet = IrSelector::new(irs, params.clone(), flags.clone(), ports.irs);
        match reference {
            Some(reference) => cabinet.select(reference),
            None => cabinet.select_from_params(),
        };

        let renderer = OfflineRenderer::new(block_size).with_tempo(tempo).with_tail(tail);
        let (rendered, report) = renderer.render(&mut processor, &audio)?;
        write_wav(&output, &rendered)?;
        amp.collect_retired();
        Ok(report)
    })
    .await??;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn print_params() {
    println!("{:<22} {:<6} {:>8} {:>8} {:>8}", "NAME", "KIND", "MIN", "MAX", "DEFAULT");
    for id in ParamId::ALL {
        let spec = id.spec();
        println!(
            "{:<22} {:<6} {:>8} {:>8} {:>8}",
            spec.name,
            format!("{:?}", spec.kind).to_lowercase(),
            spec.min,
            spec.max,
            spec.default
        );
    }
}

async fn presets(config: AppConfig, action: PresetAction) -> Result<()> {
    let store = PresetStore::new(config.paths.preset_dir);
    match action {
        PresetAction::List => {
            for name in store.list().await? {
                println!("{name}");
            }
        }
        PresetAction::Save { name, ir, overrides } => {
            let params = Parameters::new();
            apply_overrides(&params, &overrides)?;
            let preset = Preset::capture(&name, &params, ir.unwrap_or_default());
            store.save(&preset).await?;
            println!("saved {name}");
        }
        PresetAction::Delete { name } => {
            store.delete(&name).await?;
            println!("deleted {name}");
        }
    }
    Ok(())
}

/// User IR names in selection order, after the same loading the engine does
fn user_ir_names(config: &AppConfig) -> Result<Vec<String>> {
    let mut bank = IrBank::new(f64::from(config.engine.sample_rate), config.engine.max_ir_length);
    bank.set_user(scan_user_irs(&config.paths.user_ir_dir)?);
    Ok(bank.user_names().into_iter().map(str::to_string).collect())
}

fn print_user_irs(dir: &Path, names: &[String]) {
    if names.is_empty() {
        println!("no user IRs in {}", dir.display());
    }
    for (slot, name) in names.iter().enumerate() {
        println!("{:>3}  {name}", slot + 1);
    }
}

async fn irs(config: AppConfig, action: IrAction) -> Result<()> {
    let dir = config.paths.user_ir_dir.clone();
    let config = Arc::new(config);
    let scan = {
        let config = config.clone();
        move || user_ir_names(&config)
    };
    print_user_irs(&dir, &tokio::task::spawn_blocking(scan.clone()).await??);
    if matches!(action, IrAction::List) {
        return Ok(());
    }

    let watcher = DirectoryWatcher::new(dir.clone(), "wav").await?;
    let mut changes = watcher.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            change = changes.recv() => match change {
                Ok(path) => {
                    debug!(path = %path.display(), "User IR changed");
                    print_user_irs(&dir, &tokio::task::spawn_blocking(scan.clone()).await??);
                }
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "Coalesced IR change events"),
                Err(RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => ConfigManager::default_config_dir()?,
    };
    let config = ConfigManager::new(config_dir).load().await;

    match cli.command {
        Commands::Render {
            input,
            output,
            preset,
            bpm,
            block_size,
            tail,
            ir,
            overrides,
        } => render(config, input, output, preset, bpm, block_size, tail, ir, overrides).await,
        Commands::Params => {
            print_params();
            Ok(())
        }
        Commands::Presets { action } => presets(config, action).await,
        Commands::Irs { action } => irs(config, action).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assignment() {
        assert_eq!(parse_assignment("amp gain=6.5").unwrap(), ("amp gain".to_string(), 6.5));
        assert_eq!(parse_assignment(" reverb = 0.3 ").unwrap(), ("reverb".to_string(), 0.3));
        assert!(parse_assignment("reverb").is_err());
        assert!(parse_assignment("reverb=loud").is_err());
    }

    #[test]
    fn test_parse_ir() {
        assert_eq!(parse_ir("off").unwrap(), IrReference::Off);
        assert_eq!(parse_ir("factory:3").unwrap(), IrReference::Factory { index: 3 });
        assert_eq!(
            parse_ir("user:My Cab").unwrap(),
            IrReference::User { name: "My Cab".into() }
        );
        assert!(parse_ir("user:").is_err());
        assert!(parse_ir("factory:x").is_err());
        assert!(parse_ir("cab").is_err());
    }

    #[test]
    fn test_cli_parses_render() {
        let cli = Cli::try_parse_from([
            "invader", "render", "-i", "in.wav", "-o", "out.wav", "--set", "reverb=0.2", "--ir", "factory:1",
        ])
        .unwrap();
        match cli.command {
            Commands::Render { overrides, ir, block_size, .. } => {
                assert_eq!(overrides, vec![("reverb".to_string(), 0.2)]);
                assert_eq!(ir, Some(IrReference::Factory { index: 1 }));
                assert_eq!(block_size, 512);
            }
            _ => panic!("expected render"),
        }
    }

    #[test]
    fn test_cli_parses_irs_watch() {
        let cli = Cli::try_parse_from(["invader", "irs", "watch"]).unwrap();
        assert!(matches!(cli.command, Commands::Irs { action: IrAction::Watch }));
    }

    #[test]
    fn test_user_ir_names_follow_selection_order() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config = AppConfig::factory_default(temp_dir.path());
        assert!(user_ir_names(&config).unwrap().is_empty());

        let dir = &config.paths.user_ir_dir;
        std::fs::create_dir_all(dir).unwrap();
        for name in ["room.wav", "Big Cab.wav"] {
            let audio = invader_infra::WavAudio::new(vec![vec![0.5, 0.25]], 48000);
            write_wav(dir.join(name), &audio).unwrap();
        }
        std::fs::write(dir.join("readme.txt"), "not an ir").unwrap();
        assert_eq!(user_ir_names(&config).unwrap(), ["Big Cab", "room"]);
    }
}
