//! Configuration and presets for Invader
//!
//! This module provides:
//! - Engine and application configuration with TOML serialization
//! - Preset store (`<name>.toml` files holding parameter values and the IR)
//! - Configuration manager with corrupt-file recovery
//! - Directory watcher for hot-reload of presets and user IRs

use crate::domain::ir::{IrReference, DEFAULT_MAX_IR_LENGTH};
use crate::domain::params::{EngineFlags, Parameters};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument};

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur during configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("File watch error: {0}")]
    WatchError(#[from] notify::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Preset not found: {0}")]
    PresetNotFound(String),
}

/// Signal-chain timing and sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Host sample rate in Hz
    pub sample_rate: u32,

    /// Largest block the host will deliver, in frames
    pub max_block_size: usize,

    /// Rate assumed for models that do not declare one
    pub model_sample_rate: f64,

    /// Amp model crossfade length
    pub crossfade_seconds: f64,

    /// Output fade-in after a preset load
    pub preset_fade_seconds: f64,

    /// Ramp length for gains and EQ amounts
    pub smoothing_seconds: f64,

    /// Meter release time
    pub meter_release_seconds: f64,

    /// Offset between reverb write and read positions
    pub reverb_pre_delay_seconds: f64,

    /// Reverb wet ring size in frames
    pub reverb_ring_capacity: usize,

    /// Impulse responses are truncated to this many frames
    pub max_ir_length: usize,

    /// Tempo used when the host has no transport
    pub fallback_tempo_bpm: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            max_block_size: 512,
            model_sample_rate: 48000.0,
            crossfade_seconds: 0.2,
            preset_fade_seconds: 0.5,
            smoothing_seconds: 0.2,
            meter_release_seconds: 0.5,
            reverb_pre_delay_seconds: 0.035,
            reverb_ring_capacity: 32768,
            max_ir_length: DEFAULT_MAX_IR_LENGTH,
            fallback_tempo_bpm: 80.0,
        }
    }
}

impl EngineConfig {
    pub fn with_sample_rate(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            ..Self::default()
        }
    }

    pub fn sample_rate_f64(&self) -> f64 {
        self.sample_rate as f64
    }

    /// Reject values the processor cannot be prepared with
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(ConfigError::Invalid("sample_rate must be positive".into()));
        }
        if self.max_block_size == 0 {
            return Err(ConfigError::Invalid("max_block_size must be positive".into()));
        }
        if self.reverb_ring_capacity == 0 {
            return Err(ConfigError::Invalid(
                "reverb_ring_capacity must be positive".into(),
            ));
        }
        let pre_delay = (self.reverb_pre_delay_seconds * self.sample_rate_f64()) as usize;
        if pre_delay >= self.reverb_ring_capacity {
            return Err(ConfigError::Invalid(format!(
                "reverb pre-delay of {pre_delay} frames does not fit a ring of {}",
                self.reverb_ring_capacity
            )));
        }
        for (name, value) in [
            ("model_sample_rate", self.model_sample_rate),
            ("crossfade_seconds", self.crossfade_seconds),
            ("preset_fade_seconds", self.preset_fade_seconds),
            ("fallback_tempo_bpm", self.fallback_tempo_bpm),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        for (name, value) in [
            ("smoothing_seconds", self.smoothing_seconds),
            ("meter_release_seconds", self.meter_release_seconds),
            ("reverb_pre_delay_seconds", self.reverb_pre_delay_seconds),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::Invalid(format!("{name} must not be negative")));
            }
        }
        Ok(())
    }
}

/// Locations of presets, models and impulse responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    pub preset_dir: PathBuf,
    pub model_dir: PathBuf,
    pub factory_ir_dir: PathBuf,
    pub user_ir_dir: PathBuf,
}

impl PathsConfig {
    /// Standard layout below `root`
    pub fn under(root: &Path) -> Self {
        Self {
            preset_dir: root.join("presets"),
            model_dir: root.join("models"),
            factory_ir_dir: root.join("irs").join("factory"),
            user_ir_dir: root.join("irs").join("user"),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self::under(Path::new("."))
    }
}

/// Complete Invader configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

impl AppConfig {
    /// Load configuration from TOML file
    #[instrument(skip(path))]
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&contents)?;
        config.engine.validate()?;

        debug!("Configuration loaded successfully");
        Ok(config)
    }

    /// Save configuration to TOML file
    #[instrument(skip(self, path))]
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!(path = %path.display(), "Saving configuration");

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let toml_str = toml::to_string_pretty(self)?;
        fs::write(path, toml_str).await?;

        debug!("Configuration saved successfully");
        Ok(())
    }

    /// Factory default with every directory below `config_dir`
    pub fn factory_default(config_dir: &Path) -> Self {
        Self {
            engine: EngineConfig::default(),
            paths: PathsConfig::under(config_dir),
        }
    }
}

/// A saved parameter state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    #[serde(default)]
    pub ir: IrReference,
    #[serde(default)]
    pub params: BTreeMap<String, f32>,
}

impl Preset {
    /// Capture the current registry values
    pub fn capture(name: &str, params: &Parameters, ir: IrReference) -> Self {
        Self {
            name: name.to_string(),
            ir,
            params: params.snapshot(),
        }
    }

    /// Write values into the registry and request the output fade-in
    ///
    /// Returns the number of parameters applied.
    pub fn apply(&self, params: &Parameters, flags: &EngineFlags) -> usize {
        let applied = params.restore(&self.params);
        flags.request_preset_fade();
        info!(preset = %self.name, applied, "Preset applied");
        applied
    }

    /// Parse a preset from TOML
    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Named presets stored as `<name>.toml` in one directory
pub struct PresetStore {
    preset_dir: PathBuf,
}

impl PresetStore {
    pub fn new(preset_dir: PathBuf) -> Self {
        Self { preset_dir }
    }

    pub fn dir(&self) -> &Path {
        &self.preset_dir
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(ConfigError::Invalid(format!("invalid preset name: {name:?}")));
        }
        Ok(self.preset_dir.join(format!("{}.toml", name)))
    }

    /// List all available presets
    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut presets = Vec::new();

        let mut entries = match fs::read_dir(&self.preset_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(presets),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension() == Some(OsStr::new("toml")) {
                if let Some(name) = path.file_stem().and_then(|n| n.to_str()) {
                    presets.push(name.to_string());
                }
            }
        }

        presets.sort();
        debug!(count = presets.len(), "Listed presets");
        Ok(presets)
    }

    /// Load a preset by name
    #[instrument(skip(self))]
    pub async fn load(&self, name: &str) -> Result<Preset> {
        let path = self.path_for(name)?;
        if !path.exists() {
            return Err(ConfigError::PresetNotFound(name.to_string()));
        }

        let contents = fs::read_to_string(&path).await?;
        let preset = Preset::from_toml(&contents)?;
        debug!(name, params = preset.params.len(), "Preset loaded");
        Ok(preset)
    }

    /// Save a preset under its own name
    #[instrument(skip(self, preset), fields(name = %preset.name))]
    pub async fn save(&self, preset: &Preset) -> Result<()> {
        let path = self.path_for(&preset.name)?;
        fs::create_dir_all(&self.preset_dir).await?;
        fs::write(&path, preset.to_toml()?).await?;
        info!(path = %path.display(), "Preset saved");
        Ok(())
    }

    /// Delete a preset by name
    #[instrument(skip(self))]
    pub async fn delete(&self, name: &str) -> Result<()> {
        let path = self.path_for(name)?;
        if !path.exists() {
            return Err(ConfigError::PresetNotFound(name.to_string()));
        }

        fs::remove_file(&path).await?;
        info!(name, "Preset deleted");
        Ok(())
    }

    pub async fn exists(&self, name: &str) -> bool {
        match self.path_for(name) {
            Ok(path) => fs::try_exists(path).await.unwrap_or(false),
            Err(_) => false,
        }
    }
}

/// File system watcher for hot-reload
///
/// Reports created or modified files with the given extension.
pub struct DirectoryWatcher {
    _watcher: notify::RecommendedWatcher,
    change_tx: broadcast::Sender<PathBuf>,
}

impl DirectoryWatcher {
    pub async fn new(dir: PathBuf, extension: &str) -> Result<Self> {
        use notify::Watcher;

        let (change_tx, _change_rx) = broadcast::channel(32);

        fs::create_dir_all(&dir).await?;

        let tx_clone = change_tx.clone();
        let wanted = extension.to_ascii_lowercase();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                if matches!(
                    event.kind,
                    notify::EventKind::Create(_) | notify::EventKind::Modify(_)
                ) {
                    for path in event.paths {
                        let matches = path
                            .extension()
                            .and_then(|e| e.to_str())
                            .is_some_and(|e| e.eq_ignore_ascii_case(&wanted));
                        // no subscribers is not an error worth reporting
                        if matches && tx_clone.receiver_count() > 0 {
                            if let Err(e) = tx_clone.send(path) {
                                error!("Failed to send change event: {}", e);
                            }
                        }
                    }
                }
            }
        })?;

        watcher.watch(&dir, notify::RecursiveMode::NonRecursive)?;

        info!(path = %dir.display(), extension, "Directory watcher started");

        Ok(Self {
            _watcher: watcher,
            change_tx,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PathBuf> {
        self.change_tx.subscribe()
    }
}

/// Manages `config.toml` in the platform configuration directory
pub struct ConfigManager {
    config_dir: PathBuf,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new(config_dir: PathBuf) -> Self {
        let config_path = config_dir.join("config.toml");
        Self {
            config_dir,
            config_path,
        }
    }

    /// Returns `~/.config/invader` on Linux, the platform equivalent elsewhere
    pub fn default_config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("invader"))
            .ok_or_else(|| ConfigError::Invalid("Could not determine config directory".to_string()))
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load configuration from file
    ///
    /// A missing file yields (and writes) the factory default. A corrupt
    /// file is copied to `config.toml.corrupt` and the default is returned.
    #[instrument(skip(self))]
    pub async fn load(&self) -> AppConfig {
        if !self.config_path.exists() {
            info!(
                path = %self.config_path.display(),
                "Config file not found, creating factory default"
            );

            let config = AppConfig::factory_default(&self.config_dir);
            if let Err(e) = config.save_to_file(&self.config_path).await {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to save factory default config"
                );
            }
            return config;
        }

        match AppConfig::load_from_file(&self.config_path).await {
            Ok(config) => config,
            Err(e) => {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to load config, using factory default"
                );

                let backup_path = self.config_path.with_extension("toml.corrupt");
                if let Err(copy_err) = fs::copy(&self.config_path, &backup_path).await {
                    error!(
                        path = %backup_path.display(),
                        error = %copy_err,
                        "Failed to backup corrupt config"
                    );
                }

                AppConfig::factory_default(&self.config_dir)
            }
        }
    }

    #[instrument(skip(self, config))]
    pub async fn save(&self, config: &AppConfig) -> Result<()> {
        fs::create_dir_all(&self.config_dir).await?;
        config.save_to_file(&self.config_path).await
    }

    pub fn exists(&self) -> bool {
        self.config_path.exists()
    }
}
