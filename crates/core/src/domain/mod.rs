//! Domain entities and business rules

pub mod amp;
pub mod audio;
pub mod config;
pub mod dsp;
pub mod ir;
pub mod metering;
pub mod params;
pub mod pipeline;
pub mod resampling;
pub mod smoothing;
pub mod staging;

// Re-export specific items to avoid ambiguous glob imports
pub use amp::{AmpModel, AmpSelector, BoxedModel, LinearModel, ModelBank, ModelCrossfade, ModelData, ModelSwap};
pub use audio::{db_to_gain, gain_to_db, AudioError, BlockContext};
pub use config::{AppConfig, ConfigError, ConfigManager, EngineConfig, PathsConfig, Preset, PresetStore};
pub use ir::{ImpulseResponse, IrBank, IrConvolver, IrData, IrReference, IrSelector};
pub use metering::MeterLevels;
pub use params::{EngineFlags, ParamId, Parameters};
pub use pipeline::{AmpProcessor, ControlPorts};
pub use resampling::ResamplingContainer;
