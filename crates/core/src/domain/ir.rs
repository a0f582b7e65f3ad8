//! Cabinet impulse responses
//!
//! Raw kernels ([`IrData`]) are kept alongside their processing-rate copies
//! ([`ImpulseResponse`]) so a bank can be rebuilt whenever the host rate
//! changes. The audio thread only ever sees an [`IrConvolver`], staged by
//! [`IrSelector`] from the control thread.

use crate::domain::audio::{AudioError, Result};
use crate::domain::params::{EngineFlags, ParamId, Parameters};
use crate::domain::resampling::resample_offline;
use crate::domain::staging::Stager;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default kernel length cap
pub const DEFAULT_MAX_IR_LENGTH: usize = 8192;
/// Rate assumed for factory blobs with an unusable header
pub const FACTORY_IR_RATE: f64 = 48000.0;
/// `ir selection` value that defers to `custom ir selection`; 0 is off and
/// 1..=14 pick a factory IR
pub const IR_SELECTION_CUSTOM: i32 = 15;
/// Level trim applied to every kernel, before rate compensation
const NORMALIZATION_DB: f64 = -18.0;

/// Raw kernel at its recorded rate
#[derive(Debug, Clone, PartialEq)]
pub struct IrData {
    pub samples: Vec<f32>,
    pub sample_rate: f64,
}

impl IrData {
    pub fn new(samples: Vec<f32>, sample_rate: f64) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Parse a factory blob: little-endian f64 rate, then little-endian f32 samples
    pub fn from_factory_blob(bytes: &[u8]) -> Result<Self> {
        let Some((header, body)) = bytes.split_first_chunk::<8>() else {
            return Err(AudioError::ImpulseResponse(format!(
                "blob of {} bytes has no header",
                bytes.len()
            )));
        };
        let rate = f64::from_le_bytes(*header);
        let sample_rate = if rate.is_finite() && rate > 0.0 {
            rate
        } else {
            FACTORY_IR_RATE
        };
        let samples: Vec<f32> = body
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        if samples.is_empty() {
            return Err(AudioError::ImpulseResponse("blob has no samples".into()));
        }
        Ok(Self::new(samples, sample_rate))
    }

    /// Encode in the factory blob layout
    pub fn to_factory_blob(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(8 + self.samples.len() * 4);
        bytes.extend_from_slice(&self.sample_rate.to_le_bytes());
        for s in &self.samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        bytes
    }
}

/// Kernel prepared for one processing rate
#[derive(Debug, Clone)]
pub struct ImpulseResponse {
    name: String,
    raw: IrData,
    kernel: Vec<f32>,
    sample_rate: f64,
}

impl ImpulseResponse {
    /// Resample, truncate to `max_length` and normalise
    pub fn new(name: &str, raw: IrData, sample_rate: f64, max_length: usize) -> Result<Self> {
        if raw.samples.is_empty() {
            return Err(AudioError::ImpulseResponse(format!("{name}: empty kernel")));
        }
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(AudioError::InvalidConfiguration(format!(
                "IR processing rate {sample_rate}"
            )));
        }
        let mut kernel = resample_offline(&raw.samples, raw.sample_rate, sample_rate)?;
        kernel.truncate(max_length.max(1));

        let gain = (10.0_f64.powf(NORMALIZATION_DB / 20.0) * 48000.0 / sample_rate) as f32;
        for k in kernel.iter_mut() {
            *k *= gain;
        }
        debug!(
            ir = %name,
            raw_len = raw.samples.len(),
            len = kernel.len(),
            sample_rate,
            "Prepared impulse response"
        );
        Ok(Self {
            name: name.to_string(),
            raw,
            kernel,
            sample_rate,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kernel(&self) -> &[f32] {
        &self.kernel
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn raw(&self) -> &IrData {
        &self.raw
    }

    /// Rebuild from the raw kernel at another rate
    pub fn resampled(&self, sample_rate: f64, max_length: usize) -> Result<Self> {
        Self::new(&self.name, self.raw.clone(), sample_rate, max_length)
    }
}

/// Zero-latency direct-form mono convolution
#[derive(Debug, Clone)]
pub struct IrConvolver {
    ir: Arc<ImpulseResponse>,
    reversed: Vec<f32>,
    // history stored twice so the last `len` inputs are always contiguous
    history: Vec<f32>,
    pos: usize,
}

impl IrConvolver {
    pub fn new(ir: Arc<ImpulseResponse>) -> Self {
        let reversed: Vec<f32> = ir.kernel().iter().rev().copied().collect();
        let len = reversed.len();
        Self {
            ir,
            reversed,
            history: vec![0.0; 2 * len],
            pos: 0,
        }
    }

    pub fn impulse_response(&self) -> &Arc<ImpulseResponse> {
        &self.ir
    }

    pub fn process(&mut self, buffer: &mut [f32]) {
        let len = self.reversed.len();
        for sample in buffer.iter_mut() {
            self.pos += 1;
            if self.pos == len {
                self.pos = 0;
            }
            self.history[self.pos] = *sample;
            self.history[self.pos + len] = *sample;
            let window = &self.history[self.pos + 1..self.pos + 1 + len];
            *sample = window
                .iter()
                .zip(&self.reversed)
                .map(|(x, k)| x * k)
                .sum();
        }
    }

    pub fn reset(&mut self) {
        self.history.fill(0.0);
        self.pos = 0;
    }
}

/// Which impulse response a preset or selection points at
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum IrReference {
    #[default]
    Off,
    Factory {
        index: usize,
    },
    User {
        name: String,
    },
}

/// Factory and user impulse responses at the current processing rate
#[derive(Debug, Clone)]
pub struct IrBank {
    factory: Vec<Arc<ImpulseResponse>>,
    user: Vec<Arc<ImpulseResponse>>,
    sample_rate: f64,
    max_length: usize,
}

impl IrBank {
    pub fn new(sample_rate: f64, max_length: usize) -> Self {
        Self {
            factory: Vec::new(),
            user: Vec::new(),
            sample_rate,
            max_length,
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Append factory kernels; malformed ones are skipped
    pub fn load_factory<I>(&mut self, entries: I) -> usize
    where
        I: IntoIterator<Item = (String, IrData)>,
    {
        let before = self.factory.len();
        for (name, data) in entries {
            match ImpulseResponse::new(&name, data, self.sample_rate, self.max_length) {
                Ok(ir) => self.factory.push(Arc::new(ir)),
                Err(e) => warn!(ir = %name, error = %e, "Skipping factory IR"),
            }
        }
        self.factory.len() - before
    }

    /// Replace the user bank; entries are sorted case-insensitively by name
    pub fn set_user<I>(&mut self, entries: I) -> usize
    where
        I: IntoIterator<Item = (String, IrData)>,
    {
        let mut entries: Vec<(String, IrData)> = entries.into_iter().collect();
        entries.sort_by_key(|(name, _)| name.to_lowercase());
        self.user.clear();
        for (name, data) in entries {
            match ImpulseResponse::new(&name, data, self.sample_rate, self.max_length) {
                Ok(ir) => self.user.push(Arc::new(ir)),
                Err(e) => warn!(ir = %name, error = %e, "Skipping user IR"),
            }
        }
        info!(count = self.user.len(), "User IR bank loaded");
        self.user.len()
    }

    /// Rebuild every kernel for a new processing rate
    pub fn resample_all(&mut self, sample_rate: f64) -> Result<()> {
        if sample_rate == self.sample_rate {
            return Ok(());
        }
        let max = self.max_length;
        let rebuild = |irs: &[Arc<ImpulseResponse>]| -> Result<Vec<Arc<ImpulseResponse>>> {
            irs.iter()
                .map(|ir| ir.resampled(sample_rate, max).map(Arc::new))
                .collect()
        };
        self.factory = rebuild(&self.factory)?;
        self.user = rebuild(&self.user)?;
        self.sample_rate = sample_rate;
        info!(sample_rate, "Resampled IR banks");
        Ok(())
    }

    pub fn factory_len(&self) -> usize {
        self.factory.len()
    }

    pub fn user_names(&self) -> Vec<&str> {
        self.user.iter().map(|ir| ir.name()).collect()
    }

    pub fn factory(&self, index: usize) -> Option<Arc<ImpulseResponse>> {
        self.factory.get(index).cloned()
    }

    pub fn user(&self, index: usize) -> Option<Arc<ImpulseResponse>> {
        self.user.get(index).cloned()
    }

    pub fn user_by_name(&self, name: &str) -> Option<Arc<ImpulseResponse>> {
        self.user.iter().find(|ir| ir.name() == name).cloned()
    }

    pub fn resolve(&self, reference: &IrReference) -> Option<Arc<ImpulseResponse>> {
        match reference {
            IrReference::Off => None,
            IrReference::Factory { index } => self.factory(*index),
            IrReference::User { name } => self.user_by_name(name),
        }
    }
}

/// Stages convolvers for the selected impulse response (control thread)
///
/// The selection is mirrored in the `ir selection` / `custom ir selection`
/// parameters so hosts and presets see what is loaded.
pub struct IrSelector {
    bank: IrBank,
    params: Arc<Parameters>,
    flags: Arc<EngineFlags>,
    stager: Stager<Option<IrConvolver>>,
    current: IrReference,
}

impl IrSelector {
    pub fn new(
        bank: IrBank,
        params: Arc<Parameters>,
        flags: Arc<EngineFlags>,
        stager: Stager<Option<IrConvolver>>,
    ) -> Self {
        Self {
            bank,
            params,
            flags,
            stager,
            current: IrReference::Off,
        }
    }

    pub fn bank(&self) -> &IrBank {
        &self.bank
    }

    pub fn bank_mut(&mut self) -> &mut IrBank {
        &mut self.bank
    }

    pub fn current(&self) -> &IrReference {
        &self.current
    }

    /// Reference described by the selection parameters
    pub fn reference_from_params(&self) -> IrReference {
        match self.params.get_int(ParamId::IrSelection) {
            0 => IrReference::Off,
            IR_SELECTION_CUSTOM => {
                let slot = (self.params.get_int(ParamId::CustomIrSelection) - 1).max(0) as usize;
                match self.bank.user(slot) {
                    Some(ir) => IrReference::User {
                        name: ir.name().to_string(),
                    },
                    None => {
                        warn!(slot, "No user IR at custom selection");
                        IrReference::Off
                    }
                }
            }
            n => IrReference::Factory {
                index: (n - 1).max(0) as usize,
            },
        }
    }

    /// Stage the IR the selection parameters point at
    pub fn select_from_params(&mut self) -> bool {
        let reference = self.reference_from_params();
        self.select(reference)
    }

    /// Stage a convolver for `reference`; unresolvable references turn IR off
    pub fn select(&mut self, reference: IrReference) -> bool {
        let ir = self.bank.resolve(&reference);
        let enabled = ir.is_some();
        if !enabled && reference != IrReference::Off {
            warn!(?reference, "IR not found, disabling convolution");
        }
        drop(self.stager.stage(ir.map(IrConvolver::new)));
        self.flags.set_ir_enabled(enabled);
        self.stager.collect_retired();
        self.current = if enabled { reference } else { IrReference::Off };
        self.write_params();
        debug!(current = ?self.current, "Staged IR");
        enabled
    }

    fn write_params(&self) {
        match &self.current {
            IrReference::Off => {
                self.params.set(ParamId::IrSelection, 0.0);
            }
            IrReference::Factory { index } => {
                if *index + 1 < IR_SELECTION_CUSTOM as usize {
                    self.params.set(ParamId::IrSelection, (*index + 1) as f32);
                } else {
                    debug!(index, "Factory IR outside the selection parameter range");
                }
            }
            IrReference::User { name } => {
                if let Some(slot) = self.bank.user.iter().position(|ir| ir.name() == name) {
                    self.params.set(ParamId::IrSelection, IR_SELECTION_CUSTOM as f32);
                    self.params.set(ParamId::CustomIrSelection, (slot + 1) as f32);
                }
            }
        }
    }

    /// Follow a host rate change and restage the current selection
    pub fn set_sample_rate(&mut self, sample_rate: f64) -> Result<()> {
        self.bank.resample_all(sample_rate)?;
        let current = self.current.clone();
        self.select(current);
        Ok(())
    }

    /// Replace the user bank, keeping the selection when it still exists
    pub fn reload_user<I>(&mut self, entries: I) -> usize
    where
        I: IntoIterator<Item = (String, IrData)>,
    {
        let count = self.bank.set_user(entries);
        if let IrReference::User { .. } = self.current {
            let current = self.current.clone();
            self.select(current);
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::staging::staging_slot;

    fn trim() -> f32 {
        10.0_f32.powf(-18.0 / 20.0)
    }

    #[test]
    fn test_factory_blob_layout() {
        let data = IrData::new(vec![1.0, -0.5, 0.25], 44100.0);
        let blob = data.to_factory_blob();
        assert_eq!(blob.len(), 8 + 12);
        assert_eq!(IrData::from_factory_blob(&blob).unwrap(), data);

        let mut bad_rate = blob.clone();
        bad_rate[..8].copy_from_slice(&f64::NAN.to_le_bytes());
        assert_eq!(
            IrData::from_factory_blob(&bad_rate).unwrap().sample_rate,
            FACTORY_IR_RATE
        );

        assert!(IrData::from_factory_blob(&[0; 4]).is_err());
        assert!(IrData::from_factory_blob(&blob[..8]).is_err());
    }

    #[test]
    fn test_normalization_and_truncation() {
        let raw = IrData::new(vec![1.0; 10_000], 48000.0);
        let ir = ImpulseResponse::new("flat", raw, 48000.0, DEFAULT_MAX_IR_LENGTH).unwrap();
        assert_eq!(ir.kernel().len(), 8192);
        assert!((ir.kernel()[0] - trim()).abs() < 1e-6);

        let raw = IrData::new(vec![1.0], 96000.0);
        let ir = ImpulseResponse::new("dirac", raw, 96000.0, 64).unwrap();
        assert!((ir.kernel()[0] - trim() * 0.5).abs() < 1e-6);

        let empty = IrData::new(Vec::new(), 48000.0);
        assert!(ImpulseResponse::new("empty", empty, 48000.0, 64).is_err());
    }

    #[test]
    fn test_resampled_kernel_length() {
        let raw = IrData::new(vec![0.5; 4410], 44100.0);
        let ir = ImpulseResponse::new("a", raw, 44100.0, 8192).unwrap();
        let up = ir.resampled(48000.0, 8192).unwrap();
        assert_eq!(up.kernel().len(), 4800);
        assert_eq!(up.sample_rate(), 48000.0);
    }

    #[test]
    fn test_convolver_matches_direct_sum() {
        let raw = IrData::new(vec![1.0, 0.5, -0.25], 48000.0);
        let ir = Arc::new(ImpulseResponse::new("k", raw, 48000.0, 16).unwrap());
        let k: Vec<f32> = ir.kernel().to_vec();
        let mut conv = IrConvolver::new(ir);

        let input: Vec<f32> = (0..20).map(|i| ((i * 7) % 5) as f32 - 2.0).collect();
        let mut output = input.clone();
        conv.process(&mut output[..9]);
        conv.process(&mut output[9..]);

        for n in 0..input.len() {
            let mut expected = 0.0;
            for (j, kj) in k.iter().enumerate() {
                if n >= j {
                    expected += kj * input[n - j];
                }
            }
            assert!((output[n] - expected).abs() < 1e-5, "sample {n}");
        }
    }

    #[test]
    fn test_user_bank_sorted_case_insensitive() {
        let mut bank = IrBank::new(48000.0, 64);
        bank.set_user(vec![
            ("beta".to_string(), IrData::new(vec![1.0], 48000.0)),
            ("Alpha".to_string(), IrData::new(vec![1.0], 48000.0)),
            ("broken".to_string(), IrData::new(Vec::new(), 48000.0)),
            ("charlie".to_string(), IrData::new(vec![1.0], 48000.0)),
        ]);
        assert_eq!(bank.user_names(), vec!["Alpha", "beta", "charlie"]);
    }

    #[test]
    fn test_bank_resample_all() {
        let mut bank = IrBank::new(48000.0, 8192);
        bank.load_factory(vec![("f".to_string(), IrData::new(vec![0.1; 480], 48000.0))]);
        bank.resample_all(96000.0).unwrap();
        let ir = bank.factory(0).unwrap();
        assert_eq!(ir.sample_rate(), 96000.0);
        assert_eq!(ir.kernel().len(), 960);
    }

    #[test]
    fn test_selector_toggles_flag() {
        let mut bank = IrBank::new(48000.0, 64);
        bank.load_factory(vec![("f".to_string(), IrData::new(vec![1.0], 48000.0))]);
        let params = Arc::new(Parameters::new());
        let flags = Arc::new(EngineFlags::new());
        let (stager, mut receiver) = staging_slot();
        let mut selector = IrSelector::new(bank, params.clone(), flags.clone(), stager);

        assert!(selector.select(IrReference::Factory { index: 0 }));
        assert!(flags.ir_enabled());
        assert_eq!(params.get_int(ParamId::IrSelection), 1);
        assert!(receiver.take().unwrap().is_some());

        assert!(!selector.select(IrReference::User {
            name: "missing".into()
        }));
        assert!(!flags.ir_enabled());
        assert_eq!(selector.current(), &IrReference::Off);
        assert_eq!(params.get_int(ParamId::IrSelection), 0);
        assert!(receiver.take().unwrap().is_none());
    }

    #[test]
    fn test_selection_params_round_trip() {
        let mut bank = IrBank::new(48000.0, 64);
        bank.load_factory(vec![
            ("f1".to_string(), IrData::new(vec![1.0], 48000.0)),
            ("f2".to_string(), IrData::new(vec![0.5], 48000.0)),
        ]);
        bank.set_user(vec![
            ("Zed".to_string(), IrData::new(vec![1.0], 48000.0)),
            ("amp".to_string(), IrData::new(vec![1.0], 48000.0)),
        ]);
        let params = Arc::new(Parameters::new());
        let flags = Arc::new(EngineFlags::new());
        let (stager, _receiver) = staging_slot();
        let mut selector = IrSelector::new(bank, params.clone(), flags.clone(), stager);

        params.set(ParamId::IrSelection, 2.0);
        assert!(selector.select_from_params());
        assert_eq!(selector.current(), &IrReference::Factory { index: 1 });

        params.set(ParamId::IrSelection, IR_SELECTION_CUSTOM as f32);
        params.set(ParamId::CustomIrSelection, 2.0);
        assert!(selector.select_from_params());
        assert_eq!(selector.current(), &IrReference::User { name: "Zed".into() });

        assert!(selector.select(IrReference::User { name: "amp".into() }));
        assert_eq!(params.get_int(ParamId::IrSelection), IR_SELECTION_CUSTOM);
        assert_eq!(params.get_int(ParamId::CustomIrSelection), 1);

        params.set(ParamId::CustomIrSelection, 9.0);
        assert!(!selector.select_from_params());
        assert!(!flags.ir_enabled());
        assert_eq!(params.get_int(ParamId::IrSelection), 0);
    }

    #[test]
    fn test_reference_serde() {
        let json = serde_json::to_string(&IrReference::Factory { index: 3 }).unwrap();
        assert_eq!(json, r#"{"kind":"factory","index":3}"#);
        let back: IrReference = serde_json::from_str(r#"{"kind":"off"}"#).unwrap();
        assert_eq!(back, IrReference::Off);
    }
}
