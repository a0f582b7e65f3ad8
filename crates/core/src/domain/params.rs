//! Host-automatable parameter registry
//!
//! Every parameter is a fixed entry in [`PARAM_SPECS`] and is stored as an
//! `f32` inside an atomic. The control thread writes, the audio thread
//! reads once per block with relaxed ordering. Booleans and integers are
//! stored in the same `f32` slot (snapped to 0/1 or rounded on write).

use crate::domain::audio::{AudioError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tracing::{trace, warn};

/// `f32` stored as raw bits in an `AtomicU32`
#[derive(Debug)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Kind of value a parameter carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamKind {
    Float,
    Bool,
    Int,
}

/// Typed parameter identifiers, in registry order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParamId {
    InputGain,
    OutputGain,
    Presence,
    Thickness,
    Reverb,
    AmpGain,
    IsAmp1,
    AmpSmooth,
    NoiseGate,
    DelayMix,
    IrSelection,
    CustomIrSelection,
    ModelId,
}

impl ParamId {
    pub const ALL: [ParamId; 13] = [
        ParamId::InputGain,
        ParamId::OutputGain,
        ParamId::Presence,
        ParamId::Thickness,
        ParamId::Reverb,
        ParamId::AmpGain,
        ParamId::IsAmp1,
        ParamId::AmpSmooth,
        ParamId::NoiseGate,
        ParamId::DelayMix,
        ParamId::IrSelection,
        ParamId::CustomIrSelection,
        ParamId::ModelId,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn spec(self) -> &'static ParamSpec {
        &PARAM_SPECS[self.index()]
    }

    pub fn name(self) -> &'static str {
        self.spec().name
    }

    pub fn from_name(name: &str) -> Option<Self> {
        ParamId::ALL.iter().copied().find(|id| id.name() == name)
    }
}

/// Declared range and default of a parameter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    pub id: ParamId,
    pub name: &'static str,
    pub label: &'static str,
    pub kind: ParamKind,
    pub min: f32,
    pub max: f32,
    pub default: f32,
}

impl ParamSpec {
    /// Clamp and quantize a raw value to what this parameter can hold
    pub fn normalize(&self, value: f32) -> f32 {
        let value = if value.is_nan() { self.default } else { value };
        match self.kind {
            ParamKind::Float => value.clamp(self.min, self.max),
            ParamKind::Int => value.round().clamp(self.min, self.max),
            ParamKind::Bool => {
                if value >= 0.5 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

const fn float(id: ParamId, name: &'static str, label: &'static str, min: f32, max: f32, default: f32) -> ParamSpec {
    ParamSpec { id, name, label, kind: ParamKind::Float, min, max, default }
}

const fn int(id: ParamId, name: &'static str, label: &'static str, min: f32, max: f32, default: f32) -> ParamSpec {
    ParamSpec { id, name, label, kind: ParamKind::Int, min, max, default }
}

const fn boolean(id: ParamId, name: &'static str, label: &'static str, default: bool) -> ParamSpec {
    ParamSpec {
        id,
        name,
        label,
        kind: ParamKind::Bool,
        min: 0.0,
        max: 1.0,
        default: if default { 1.0 } else { 0.0 },
    }
}

/// Registry table, indexed by `ParamId as usize`
pub static PARAM_SPECS: [ParamSpec; 13] = [
    float(ParamId::InputGain, "input gain", "Input Gain", -20.0, 20.0, 0.0),
    float(ParamId::OutputGain, "output gain", "Output Gain", -20.0, 20.0, 0.0),
    float(ParamId::Presence, "presence", "Presence", -6.0, 6.0, 0.0),
    float(ParamId::Thickness, "thickness", "Thickness", -6.0, 6.0, 0.0),
    float(ParamId::Reverb, "reverb", "Reverb", 0.0, 1.0, 0.0),
    float(ParamId::AmpGain, "amp gain", "Amp Gain", 1.0, 10.0, 1.0),
    boolean(ParamId::IsAmp1, "is amp 1", "Is Amp 1", true),
    boolean(ParamId::AmpSmooth, "amp smooth", "Amp Smooth", false),
    float(ParamId::NoiseGate, "noise gate", "Noise Gate", -100.0, 0.0, -80.0),
    float(ParamId::DelayMix, "delay mix", "Delay Mix", 0.0, 1.0, 0.0),
    int(ParamId::IrSelection, "ir selection", "IR Selection", 0.0, 15.0, 0.0),
    int(ParamId::CustomIrSelection, "custom ir selection", "Custom IR Selection", 1.0, 100.0, 1.0),
    int(ParamId::ModelId, "model id", "Model Index", 0.0, 100.0, 0.0),
];

/// Noise gate values below this are treated as "gate off"
pub const NOISE_GATE_OFF_BELOW: f32 = -99.9;

/// Process-lifetime parameter store shared between control and audio threads
#[derive(Debug)]
pub struct Parameters {
    values: [AtomicF32; 13],
}

impl Parameters {
    pub fn new() -> Self {
        Self {
            values: std::array::from_fn(|i| AtomicF32::new(PARAM_SPECS[i].default)),
        }
    }

    #[inline]
    pub fn get(&self, id: ParamId) -> f32 {
        self.values[id.index()].load()
    }

    #[inline]
    pub fn get_bool(&self, id: ParamId) -> bool {
        self.get(id) >= 0.5
    }

    #[inline]
    pub fn get_int(&self, id: ParamId) -> i32 {
        self.get(id) as i32
    }

    /// Store a value after clamping it to the declared range
    ///
    /// Returns the value actually stored.
    pub fn set(&self, id: ParamId, value: f32) -> f32 {
        let normalized = id.spec().normalize(value);
        self.values[id.index()].store(normalized);
        trace!(param = id.name(), value = normalized, "Parameter set");
        normalized
    }

    pub fn set_bool(&self, id: ParamId, value: bool) {
        self.set(id, if value { 1.0 } else { 0.0 });
    }

    pub fn get_by_name(&self, name: &str) -> Result<f32> {
        ParamId::from_name(name)
            .map(|id| self.get(id))
            .ok_or_else(|| AudioError::UnknownParameter(name.to_string()))
    }

    pub fn set_by_name(&self, name: &str, value: f32) -> Result<f32> {
        let id = ParamId::from_name(name)
            .ok_or_else(|| AudioError::UnknownParameter(name.to_string()))?;
        Ok(self.set(id, value))
    }

    /// Restore every parameter to its declared default
    pub fn reset_to_defaults(&self) {
        for spec in PARAM_SPECS.iter() {
            self.values[spec.id.index()].store(spec.default);
        }
    }

    /// Name-to-value snapshot, suitable for presets and state save
    pub fn snapshot(&self) -> BTreeMap<String, f32> {
        ParamId::ALL
            .iter()
            .map(|id| (id.name().to_string(), self.get(*id)))
            .collect()
    }

    /// Apply a snapshot; unknown names are skipped
    ///
    /// Returns how many values were applied.
    pub fn restore(&self, values: &BTreeMap<String, f32>) -> usize {
        let mut applied = 0;
        for (name, value) in values {
            match ParamId::from_name(name) {
                Some(id) => {
                    self.set(id, *value);
                    applied += 1;
                }
                None => warn!(name = %name, "Ignoring unknown parameter in snapshot"),
            }
        }
        applied
    }
}

impl Default for Parameters {
    fn default() -> Self {
        Self::new()
    }
}

/// Flags shared between control and audio threads outside the host-visible registry
#[derive(Debug)]
pub struct EngineFlags {
    pub license_activated: AtomicBool,
    pub ir_enabled: AtomicBool,
    pub preset_smoothing: AtomicBool,
}

impl EngineFlags {
    pub fn new() -> Self {
        Self {
            license_activated: AtomicBool::new(false),
            ir_enabled: AtomicBool::new(false),
            preset_smoothing: AtomicBool::new(false),
        }
    }

    pub fn set_license_activated(&self, value: bool) {
        self.license_activated.store(value, Ordering::Relaxed);
    }

    pub fn license_activated(&self) -> bool {
        self.license_activated.load(Ordering::Relaxed)
    }

    pub fn set_ir_enabled(&self, value: bool) {
        self.ir_enabled.store(value, Ordering::Relaxed);
    }

    pub fn ir_enabled(&self) -> bool {
        self.ir_enabled.load(Ordering::Relaxed)
    }

    /// Request an output fade-in (raised on preset load)
    pub fn request_preset_fade(&self) {
        self.preset_smoothing.store(true, Ordering::Relaxed);
    }

    pub fn preset_smoothing(&self) -> bool {
        self.preset_smoothing.load(Ordering::Relaxed)
    }

    pub fn clear_preset_smoothing(&self) {
        self.preset_smoothing.store(false, Ordering::Relaxed);
    }
}

impl Default for EngineFlags {
    fn default() -> Self {
        Self::new()
    }
}
