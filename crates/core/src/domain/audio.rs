//! Audio domain primitives shared by every stage of the signal chain
//!
//! This module defines the error taxonomy of the processing core and the
//! per-block context the host hands to the processor.

use thiserror::Error;

/// Errors that can occur in the audio subsystem
///
/// None of these are ever raised from inside the per-block callback: the
/// processor degrades to bypass or silence instead.
#[derive(Debug, Error)]
pub enum AudioError {
    /// Invalid configuration for the processor (sample rate, block size)
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A resampling container was used before its first `reset`
    #[error("Resampler used before reset: {0}")]
    ResamplerNotReset(String),

    /// The underlying resampler rejected its configuration or input
    #[error("Resampler error: {0}")]
    Resampler(String),

    /// Amp model data could not be parsed or instantiated
    #[error("Model load error: {0}")]
    ModelLoad(String),

    /// Amp model architecture is not implemented by this crate
    #[error("Unsupported model architecture: {0}")]
    UnsupportedArchitecture(String),

    /// Impulse response data was empty or malformed
    #[error("Impulse response error: {0}")]
    ImpulseResponse(String),

    /// Parameter name lookup failed
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    /// Host delivered more frames than were prepared for
    #[error("Block of {got} frames exceeds prepared maximum of {max}")]
    BlockTooLarge { got: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, AudioError>;

/// Per-block information supplied by the host transport
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BlockContext {
    /// Current tempo, or `None` when the host has no transport
    pub tempo_bpm: Option<f64>,
}

impl BlockContext {
    pub fn with_tempo(bpm: f64) -> Self {
        Self {
            tempo_bpm: Some(bpm),
        }
    }

    /// Tempo usable for delay sync (positive and finite)
    pub fn valid_tempo(&self) -> Option<f64> {
        self.tempo_bpm.filter(|bpm| bpm.is_finite() && *bpm > 0.0)
    }
}

/// Convert decibels to linear amplitude
#[inline]
pub fn db_to_gain(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert linear amplitude to decibels, floored at `floor_db`
#[inline]
pub fn gain_to_db(gain: f32, floor_db: f32) -> f32 {
    if gain <= 0.0 {
        floor_db
    } else {
        (20.0 * gain.log10()).max(floor_db)
    }
}
