//! On-disk amp model and impulse response libraries
//!
//! Model files are looked up by the bank's slot naming
//! (`AMP{variant}-GAIN{gain}.wav.nam`). Factory impulse responses are the
//! blobs `Invader 1.bin` .. `Invader 18.bin`; user impulse responses are
//! any `*.wav` files in a directory.

use crate::error::{InfraError, Result};
use crate::wav::read_ir;
use invader_core::domain::amp::ModelBank;
use invader_core::domain::ir::IrData;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, info, warn};

/// Number of factory impulse response blobs shipped with the amp
pub const FACTORY_IR_COUNT: usize = 18;

pub fn factory_ir_name(number: usize) -> String {
    format!("Invader {number}")
}

/// Fill a model bank from `dir`; missing or unreadable files leave empty slots
pub fn load_model_bank(dir: &Path) -> ModelBank {
    let bank = ModelBank::load_with(|name| {
        let path = dir.join(name);
        match std::fs::read_to_string(&path) {
            Ok(json) => Some(json),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot read model file");
                None
            }
        }
    });
    info!(dir = %dir.display(), loaded = bank.loaded(), "Model library scanned");
    bank
}

/// Read the factory blobs present in `dir`, in index order
pub fn load_factory_irs(dir: &Path) -> Vec<(String, IrData)> {
    let mut irs = Vec::with_capacity(FACTORY_IR_COUNT);
    for number in 1..=FACTORY_IR_COUNT {
        let name = factory_ir_name(number);
        let path = dir.join(format!("{name}.bin"));
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(ir = %name, "Factory IR missing");
                continue;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot read factory IR");
                continue;
            }
        };
        match IrData::from_factory_blob(&bytes) {
            Ok(data) => irs.push((name, data)),
            Err(e) => warn!(ir = %name, error = %e, "Malformed factory IR"),
        }
    }
    irs
}

/// Scan `dir` for `*.wav` impulse responses, sorted case-insensitively by stem
///
/// A missing directory yields an empty list; undecodable files are skipped.
pub fn scan_user_irs(dir: &Path) -> Result<Vec<(String, IrData)>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(InfraError::io(dir, e)),
    };

    let mut irs = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| InfraError::io(dir, e))?.path();
        let is_wav = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"));
        if !is_wav || !path.is_file() {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        match read_ir(&path) {
            Ok(data) => irs.push((stem.to_string(), data)),
            Err(e) => warn!(error = %e, "Skipping user IR"),
        }
    }
    irs.sort_by_key(|(name, _)| name.to_lowercase());
    info!(dir = %dir.display(), count = irs.len(), "User IRs scanned");
    Ok(irs)
}
