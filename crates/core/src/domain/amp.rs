//! Amp models: file format, model bank, selection and hot-swap crossfade
//!
//! A model is a fixed-rate mono processing unit. The bank holds the parsed
//! data for every (amp variant, gain step) pair and is shared process-wide.
//! Instances are built on the control thread by [`AmpSelector`], handed to
//! the audio thread through a staging slot, and blended in by
//! [`ModelCrossfade`] when the selected gain lands on a model boundary.

use crate::domain::audio::{AudioError, Result};
use crate::domain::params::{ParamId, Parameters};
use crate::domain::resampling::ResamplingContainer;
use crate::domain::staging::Stager;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

/// Gain steps per amp variant (1.0..=10.0 by 0.5)
pub const GAIN_STEPS: usize = 19;
/// Amp variants in the bank
pub const AMP_VARIANTS: usize = 2;
/// Total bank slots
pub const MODEL_SLOTS: usize = GAIN_STEPS * AMP_VARIANTS;
/// Rate assumed for model files that do not declare one
pub const DEFAULT_MODEL_RATE: f64 = 48000.0;

/// A fixed-rate mono processing unit
pub trait AmpModel: Send {
    /// Process `input` into `output`; both have the same length
    fn process(&mut self, input: &[f32], output: &mut [f32]);

    /// Clear internal history
    fn reset(&mut self);

    /// Rate the model was trained at, if it declares one
    fn expected_sample_rate(&self) -> Option<f64>;

    fn name(&self) -> &str;
}

/// Boxed model as staged to the audio thread
pub type BoxedModel = Box<dyn AmpModel>;

/// A model on its way to (or back from) the audio thread
///
/// The crossfade request travels with the unit it applies to, so a swap
/// that has to wait for a running fade keeps its own request.
pub struct ModelSwap {
    /// `None` stages a bypass
    pub model: Option<BoxedModel>,
    pub crossfade: bool,
}

impl ModelSwap {
    /// Switch at the next block boundary
    pub fn hard(model: Option<BoxedModel>) -> Self {
        Self {
            model,
            crossfade: false,
        }
    }

    /// Blend in from whatever is active when the unit is taken
    pub fn crossfade(model: Option<BoxedModel>) -> Self {
        Self {
            model,
            crossfade: true,
        }
    }
}

impl std::fmt::Debug for ModelSwap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSwap")
            .field("model", &self.model.as_ref().map(|m| m.name()))
            .field("crossfade", &self.crossfade)
            .finish()
    }
}

/// Parsed model file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelData {
    pub version: String,
    pub architecture: String,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    pub weights: Vec<f32>,
    #[serde(default)]
    pub sample_rate: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct LinearConfig {
    receptive_field: usize,
    #[serde(default)]
    bias: bool,
}

impl ModelData {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| AudioError::ModelLoad(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| AudioError::ModelLoad(e.to_string()))
    }

    /// Build a fresh model instance named `name`
    pub fn instantiate(&self, name: &str) -> Result<BoxedModel> {
        match self.architecture.as_str() {
            "Linear" => {
                let config: LinearConfig = serde_json::from_value(self.config.clone())
                    .map_err(|e| AudioError::ModelLoad(format!("{name}: {e}")))?;
                let model = LinearModel::from_weights(
                    name,
                    config.receptive_field,
                    config.bias,
                    &self.weights,
                    self.sample_rate,
                )?;
                Ok(Box::new(model))
            }
            other => Err(AudioError::UnsupportedArchitecture(other.to_string())),
        }
    }
}

/// FIR model: `y[n] = bias + sum(w[k] * x[n - (rf - 1) + k])`
#[derive(Debug, Clone)]
pub struct LinearModel {
    name: String,
    weights: Vec<f32>,
    bias: f32,
    history: Vec<f32>,
    pos: usize,
    sample_rate: Option<f64>,
}

impl LinearModel {
    pub fn from_weights(
        name: &str,
        receptive_field: usize,
        has_bias: bool,
        weights: &[f32],
        sample_rate: Option<f64>,
    ) -> Result<Self> {
        if receptive_field == 0 {
            return Err(AudioError::ModelLoad(format!(
                "{name}: receptive field must be positive"
            )));
        }
        let expected = receptive_field + usize::from(has_bias);
        if weights.len() != expected {
            return Err(AudioError::ModelLoad(format!(
                "{name}: expected {expected} weights, found {}",
                weights.len()
            )));
        }
        let bias = if has_bias { weights[receptive_field] } else { 0.0 };
        Ok(Self {
            name: name.to_string(),
            weights: weights[..receptive_field].to_vec(),
            bias,
            history: vec![0.0; receptive_field],
            pos: 0,
            sample_rate,
        })
    }

    pub fn receptive_field(&self) -> usize {
        self.weights.len()
    }
}

impl AmpModel for LinearModel {
    fn process(&mut self, input: &[f32], output: &mut [f32]) {
        let rf = self.weights.len();
        for (x, y) in input.iter().zip(output.iter_mut()) {
            self.history[self.pos] = *x;
            // newest sample pairs with the last weight
            let mut acc = self.bias;
            let mut idx = self.pos;
            for w in self.weights.iter().rev() {
                acc += w * self.history[idx];
                idx = if idx == 0 { rf - 1 } else { idx - 1 };
            }
            *y = acc;
            self.pos = (self.pos + 1) % rf;
        }
    }

    fn reset(&mut self) {
        self.history.fill(0.0);
        self.pos = 0;
    }

    fn expected_sample_rate(&self) -> Option<f64> {
        self.sample_rate
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Model running at its native rate inside a host at another rate
pub struct ResampledModel {
    inner: BoxedModel,
    container: ResamplingContainer,
}

impl ResampledModel {
    pub fn new(inner: BoxedModel, host_rate: f64, max_block: usize) -> Result<Self> {
        let native = inner.expected_sample_rate().unwrap_or(DEFAULT_MODEL_RATE);
        let mut container = ResamplingContainer::new(native);
        container.reset(host_rate, max_block)?;
        Ok(Self { inner, container })
    }
}

impl AmpModel for ResampledModel {
    fn process(&mut self, input: &[f32], output: &mut [f32]) {
        let inner = &mut self.inner;
        if self
            .container
            .process_block(input, output, |i, o| inner.process(i, o))
            .is_err()
        {
            for (o, i) in output.iter_mut().zip(input) {
                *o = *i;
            }
        }
    }

    fn reset(&mut self) {
        self.inner.reset();
    }

    fn expected_sample_rate(&self) -> Option<f64> {
        self.inner.expected_sample_rate()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

/// File name of the model for a variant (1-based) and gain step
pub fn model_file_name(variant: usize, gain: f64) -> String {
    format!("AMP{variant}-GAIN{gain:.1}.wav.nam")
}

/// Gain value of step `step` (0-based)
pub fn gain_for_step(step: usize) -> f64 {
    1.0 + step as f64 * 0.5
}

/// Parsed model data for every variant and gain step
///
/// Variant 1 occupies the first half of the slots, variant 2 starts at
/// `len / 2`. Empty slots (missing or malformed files) are bypassed.
#[derive(Debug, Clone)]
pub struct ModelBank {
    slots: Vec<Option<Arc<ModelData>>>,
}

static GLOBAL_BANK: OnceLock<Arc<ModelBank>> = OnceLock::new();

impl ModelBank {
    pub fn empty() -> Self {
        Self {
            slots: vec![None; MODEL_SLOTS],
        }
    }

    /// Fill the bank from a loader keyed by model file name
    pub fn load_with<F>(mut loader: F) -> Self
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut bank = Self::empty();
        let mut loaded = 0;
        for variant in 1..=AMP_VARIANTS {
            for step in 0..GAIN_STEPS {
                let name = model_file_name(variant, gain_for_step(step));
                let Some(json) = loader(&name) else {
                    debug!(model = %name, "Model file missing");
                    continue;
                };
                match ModelData::from_json(&json) {
                    Ok(data) => {
                        bank.slots[(variant - 1) * GAIN_STEPS + step] = Some(Arc::new(data));
                        loaded += 1;
                    }
                    Err(e) => warn!(model = %name, error = %e, "Malformed model, slot left empty"),
                }
            }
        }
        info!(loaded, slots = MODEL_SLOTS, "Model bank loaded");
        bank
    }

    /// Process-wide bank, initialised once by the first caller
    pub fn global_or_init<F>(init: F) -> Arc<ModelBank>
    where
        F: FnOnce() -> ModelBank,
    {
        GLOBAL_BANK.get_or_init(|| Arc::new(init())).clone()
    }

    /// Process-wide bank if already initialised
    pub fn global() -> Option<Arc<ModelBank>> {
        GLOBAL_BANK.get().cloned()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn loaded(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn set(&mut self, index: usize, data: ModelData) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = Some(Arc::new(data));
        }
    }

    pub fn get(&self, index: usize) -> Option<Arc<ModelData>> {
        self.slots.get(index).and_then(|s| s.clone())
    }

    /// Slot index for an amp variant and gain knob value
    pub fn index_for(&self, is_amp1: bool, gain: f32) -> usize {
        let start = if is_amp1 { 0 } else { self.slots.len() / 2 };
        let offset = ((gain - 1.0).max(0.0) * 2.0) as usize;
        (start + offset).min(self.slots.len().saturating_sub(1))
    }
}

/// Whether a gain value sits on a model boundary (`frac` is 0 or 0.5)
pub fn on_gain_stop(gain: f32) -> bool {
    let frac = gain.fract();
    frac == 0.0 || frac == 0.5
}

/// Turns the amp parameters into staged model instances (control thread)
pub struct AmpSelector {
    bank: Arc<ModelBank>,
    params: Arc<Parameters>,
    stager: Stager<ModelSwap>,
    host_rate: f64,
    max_block: usize,
    default_rate: f64,
    last_index: Option<usize>,
}

impl AmpSelector {
    pub fn new(
        bank: Arc<ModelBank>,
        params: Arc<Parameters>,
        stager: Stager<ModelSwap>,
        host_rate: f64,
        max_block: usize,
    ) -> Self {
        Self {
            bank,
            params,
            stager,
            host_rate,
            max_block,
            default_rate: DEFAULT_MODEL_RATE,
            last_index: None,
        }
    }

    /// Rate assumed for models that do not declare one
    pub fn with_default_rate(mut self, rate: f64) -> Self {
        self.default_rate = rate;
        self
    }

    /// Adopt a new host configuration and rebuild the current model
    pub fn set_host(&mut self, host_rate: f64, max_block: usize) -> Result<Option<usize>> {
        self.host_rate = host_rate;
        self.max_block = max_block;
        self.last_index = None;
        self.select()
    }

    /// Stage the model selected by the current parameters
    ///
    /// Returns the slot index when a new unit was staged.
    pub fn select(&mut self) -> Result<Option<usize>> {
        let is_amp1 = self.params.get_bool(ParamId::IsAmp1);
        let gain = self.params.get(ParamId::AmpGain);
        let index = self.bank.index_for(is_amp1, gain);
        if self.last_index == Some(index) {
            return Ok(None);
        }

        let model = self.build(index)?;
        self.params.set(ParamId::ModelId, index as f32);
        let smooth = self.last_index.is_some() && on_gain_stop(gain);
        // flag first: it must never trail the unit it describes
        let swap = if smooth {
            self.params.set_bool(ParamId::AmpSmooth, true);
            ModelSwap::crossfade(model)
        } else {
            ModelSwap::hard(model)
        };
        drop(self.stager.stage(swap));
        self.stager.collect_retired();
        self.last_index = Some(index);
        debug!(index, gain, is_amp1, "Staged amp model");
        Ok(Some(index))
    }

    fn build(&self, index: usize) -> Result<Option<BoxedModel>> {
        let Some(data) = self.bank.get(index) else {
            debug!(index, "Empty model slot, staging bypass");
            return Ok(None);
        };
        let name = format!("slot-{index}");
        let model = match data.instantiate(&name) {
            Ok(model) => model,
            Err(e) => {
                warn!(index, error = %e, "Model could not be built, staging bypass");
                return Ok(None);
            }
        };
        let native = model.expected_sample_rate().unwrap_or(self.default_rate);
        if native == self.host_rate {
            Ok(Some(model))
        } else {
            let wrapped = ResampledModel::new(model, self.host_rate, self.max_block)?;
            Ok(Some(Box::new(wrapped)))
        }
    }

    /// True while a staged unit has not reached the audio thread
    pub fn is_pending(&self) -> bool {
        self.stager.is_pending()
    }

    /// Drop units the audio thread has retired
    pub fn collect_retired(&self) -> usize {
        self.stager.collect_retired()
    }
}

/// Corner of the crossfade seam lowpass
const CROSSFADE_LOWPASS_HZ: f64 = 3000.0;

/// Fixed-length linear blend from an outgoing to an incoming model
///
/// The blend is also run through a one-pole lowpass whose contribution
/// fades out as the mix reaches the incoming model. The lowpass starts from
/// the outgoing signal's level, so the seam opens without a step.
#[derive(Debug, Clone)]
pub struct ModelCrossfade {
    size: usize,
    count: usize,
    active: bool,
    primed: bool,
    b0: f32,
    b1: f32,
    a1: f32,
    x1: f32,
    y1: f32,
}

impl ModelCrossfade {
    pub fn new(sample_rate: f64, seconds: f64) -> Self {
        let mut fade = Self {
            size: 1,
            count: 0,
            active: false,
            primed: false,
            b0: 0.0,
            b1: 0.0,
            a1: 0.0,
            x1: 0.0,
            y1: 0.0,
        };
        fade.prepare(sample_rate, seconds);
        fade
    }

    /// Recompute length and lowpass; abandons a running fade
    pub fn prepare(&mut self, sample_rate: f64, seconds: f64) {
        self.size = ((seconds * sample_rate) as usize).max(1);
        let k = (std::f64::consts::PI * CROSSFADE_LOWPASS_HZ / sample_rate).tan();
        self.b0 = (k / (k + 1.0)) as f32;
        self.b1 = self.b0;
        self.a1 = ((k - 1.0) / (k + 1.0)) as f32;
        self.finish();
    }

    pub fn start(&mut self) {
        self.count = 0;
        self.primed = false;
        self.active = true;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn position(&self) -> usize {
        self.count
    }

    fn finish(&mut self) {
        self.count = 0;
        self.primed = false;
        self.x1 = 0.0;
        self.y1 = 0.0;
        self.active = false;
    }

    /// Blend `outgoing` into `incoming` in place; returns true on completion
    ///
    /// Samples after the completion point keep the incoming signal.
    pub fn process(&mut self, incoming: &mut [f32], outgoing: &[f32]) -> bool {
        if !self.active {
            return false;
        }
        for (new, old) in incoming.iter_mut().zip(outgoing) {
            let mix = self.count as f32 / self.size as f32;
            let x = mix * *new + (1.0 - mix) * *old;
            if !self.primed {
                // settle the lowpass on the outgoing signal
                self.x1 = x;
                self.y1 = x;
                self.primed = true;
            }
            let y = self.b0 * x + self.b1 * self.x1 - self.a1 * self.y1;
            self.x1 = x;
            self.y1 = y;
            *new = (1.0 - mix) * y + mix * x;
            self.count += 1;
            if self.count >= self.size {
                self.finish();
                return true;
            }
        }
        false
    }
}
