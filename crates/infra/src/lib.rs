//! File-backed collaborators for the Invader signal chain
//!
//! - [`wav`]: WAV decoding and 32-bit float encoding through `hound`
//! - [`library`]: amp model and impulse response libraries on disk
//! - [`renderer`]: an offline host that drives [`AmpProcessor`] block by block
//!
//! [`AmpProcessor`]: invader_core::domain::pipeline::AmpProcessor

pub mod error;
pub mod library;
pub mod renderer;
pub mod wav;

pub use error::{InfraError, Result};
pub use library::{load_factory_irs, load_model_bank, scan_user_irs, FACTORY_IR_COUNT};
pub use renderer::{OfflineRenderer, RenderReport};
pub use wav::{read_ir, read_wav, write_wav, WavAudio};
