//! Per-block signal chain orchestration
//!
//! [`AmpProcessor`] runs on the audio thread. Every block goes through, in
//! order: input gain, mono sum and input meter, gate trigger, amp model (with
//! crossfade), gate gain, IR convolution, tone stack, reverb, tempo delay,
//! output gain, preset fade-in and output meter.
//!
//! Nothing in [`AmpProcessor::process`] allocates, locks or returns an
//! error. Models and impulse responses arrive through staging slots and are
//! installed at block boundaries; recoverable problems degrade to bypass.

use crate::domain::amp::{BoxedModel, ModelCrossfade, ModelSwap};
use crate::domain::audio::{db_to_gain, AudioError, BlockContext, Result};
use crate::domain::config::EngineConfig;
use crate::domain::dsp::{DelayMapping, GateGain, GateParams, GateTrigger, ReverbSend, TempoDelay, ToneStack};
use crate::domain::ir::IrConvolver;
use crate::domain::metering::{MeterLevels, RmsMeter};
use crate::domain::params::{EngineFlags, ParamId, Parameters, NOISE_GATE_OFF_BELOW};
use crate::domain::smoothing::LinearSmoothedValue;
use crate::domain::staging::{staging_slot, StagedReceiver, Stager};
use std::sync::Arc;
use tracing::{debug, info};

/// Control-thread ends of the processor's staging slots
pub struct ControlPorts {
    pub models: Stager<ModelSwap>,
    pub irs: Stager<Option<IrConvolver>>,
}

/// The amp signal chain
pub struct AmpProcessor {
    config: EngineConfig,
    params: Arc<Parameters>,
    flags: Arc<EngineFlags>,
    meters: Arc<MeterLevels>,

    model_rx: StagedReceiver<ModelSwap>,
    ir_rx: StagedReceiver<Option<IrConvolver>>,
    model: Option<BoxedModel>,
    old_model: Option<BoxedModel>,
    ir: Option<IrConvolver>,

    crossfade: ModelCrossfade,
    gate_trigger: GateTrigger,
    gate_gain: GateGain,
    tone: ToneStack,
    reverb: ReverbSend,
    delays: [TempoDelay; 2],

    input_gain: LinearSmoothedValue,
    output_gain: LinearSmoothedValue,
    thickness: LinearSmoothedValue,
    presence: LinearSmoothedValue,
    input_meter: RmsMeter,
    output_meter: RmsMeter,
    preset_fade_len: usize,
    preset_fade_pos: usize,

    mono: Vec<f32>,
    reduction: Vec<f32>,
    model_out: Vec<f32>,
    fade_out: Vec<f32>,

    sample_rate: f64,
    max_block: usize,
    prepared: bool,
}

impl AmpProcessor {
    /// Build a processor; `prepare` must run before audio is processed
    pub fn new(
        config: EngineConfig,
        params: Arc<Parameters>,
        flags: Arc<EngineFlags>,
    ) -> Result<(Self, ControlPorts)> {
        config
            .validate()
            .map_err(|e| AudioError::InvalidConfiguration(e.to_string()))?;

        let (model_stager, model_rx) = staging_slot();
        let (ir_stager, ir_rx) = staging_slot();
        let sr = config.sample_rate_f64();

        let processor = Self {
            params,
            flags,
            meters: Arc::new(MeterLevels::new()),
            model_rx,
            ir_rx,
            model: None,
            old_model: None,
            ir: None,
            crossfade: ModelCrossfade::new(sr, config.crossfade_seconds),
            gate_trigger: GateTrigger::new(sr),
            gate_gain: GateGain,
            tone: ToneStack::new(sr as f32),
            reverb: ReverbSend::new(
                sr as f32,
                config.reverb_ring_capacity,
                config.reverb_pre_delay_seconds as f32,
            ),
            delays: [TempoDelay::new(sr), TempoDelay::new(sr)],
            input_gain: LinearSmoothedValue::new(1.0),
            output_gain: LinearSmoothedValue::new(1.0),
            thickness: LinearSmoothedValue::new(0.0),
            presence: LinearSmoothedValue::new(0.0),
            input_meter: RmsMeter::new(),
            output_meter: RmsMeter::new(),
            preset_fade_len: 1,
            preset_fade_pos: 0,
            mono: Vec::new(),
            reduction: Vec::new(),
            model_out: Vec::new(),
            fade_out: Vec::new(),
            sample_rate: sr,
            max_block: config.max_block_size,
            prepared: false,
            config,
        };

        let ports = ControlPorts {
            models: model_stager,
            irs: ir_stager,
        };
        Ok((processor, ports))
    }

    /// Configure for a host rate and block size (not concurrent with `process`)
    ///
    /// Running ramps are abandoned and every stage's state is cleared. Models
    /// and IRs built for another rate must be restaged by the control side.
    pub fn prepare(&mut self, sample_rate: f64, max_block: usize) -> Result<()> {
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(AudioError::InvalidConfiguration(format!(
                "sample rate {sample_rate}"
            )));
        }
        if max_block == 0 {
            return Err(AudioError::InvalidConfiguration(
                "max block size must be positive".into(),
            ));
        }

        let sr32 = sample_rate as f32;
        self.sample_rate = sample_rate;
        self.max_block = max_block;
        self.mono = vec![0.0; max_block];
        self.reduction = vec![0.0; max_block];
        self.model_out = vec![0.0; max_block];
        self.fade_out = vec![0.0; max_block];

        self.crossfade.prepare(sample_rate, self.config.crossfade_seconds);
        self.gate_trigger.set_sample_rate(sample_rate);
        self.gate_trigger.reset();
        self.tone.set_sample_rate(sr32);
        self.tone.reset();
        self.reverb
            .set_sample_rate(sr32, self.config.reverb_pre_delay_seconds as f32);
        for delay in &mut self.delays {
            delay.reset(sample_rate);
        }

        let ramp = self.config.smoothing_seconds;
        for smoother in [
            &mut self.input_gain,
            &mut self.output_gain,
            &mut self.thickness,
            &mut self.presence,
        ] {
            smoother.reset(sample_rate, ramp);
        }
        self.input_gain
            .set_current_and_target(db_to_gain(self.params.get(ParamId::InputGain)));
        self.output_gain
            .set_current_and_target(db_to_gain(self.params.get(ParamId::OutputGain)));
        self.thickness
            .set_current_and_target(self.params.get(ParamId::Thickness));
        self.presence
            .set_current_and_target(self.params.get(ParamId::Presence));

        self.input_meter
            .reset(sample_rate, self.config.meter_release_seconds);
        self.output_meter
            .reset(sample_rate, self.config.meter_release_seconds);

        self.preset_fade_len = ((self.config.preset_fade_seconds * sample_rate) as usize).max(1);
        self.preset_fade_pos = 0;

        if let Some(model) = self.model.as_mut() {
            model.reset();
        }
        if let Some(old) = self.old_model.take() {
            self.model_rx.retire(ModelSwap::hard(Some(old)));
        }
        if let Some(ir) = self.ir.as_mut() {
            ir.reset();
        }

        self.prepared = true;
        info!(sample_rate, max_block, "Processor prepared");
        Ok(())
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn max_block(&self) -> usize {
        self.max_block
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn params(&self) -> &Arc<Parameters> {
        &self.params
    }

    pub fn flags(&self) -> &Arc<EngineFlags> {
        &self.flags
    }

    /// Meter readings shared with the control thread
    pub fn meters(&self) -> Arc<MeterLevels> {
        self.meters.clone()
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    pub fn has_ir(&self) -> bool {
        self.ir.is_some()
    }

    pub fn is_crossfading(&self) -> bool {
        self.crossfade.is_active()
    }

    /// Process one host block in place
    ///
    /// The first two channels are processed (mono or stereo); any further
    /// channels are cleared. Blocks longer than the prepared maximum are
    /// split.
    pub fn process(&mut self, channels: &mut [&mut [f32]], ctx: &BlockContext) {
        let used = channels.len().min(2);
        let (main, extra) = channels.split_at_mut(used);
        for ch in extra.iter_mut() {
            ch.fill(0.0);
        }
        match main {
            [mono] => self.process_channels(mono, None, ctx),
            [left, right] => self.process_channels(left, Some(&mut **right), ctx),
            _ => {}
        }
    }

    fn process_channels(&mut self, left: &mut [f32], mut right: Option<&mut [f32]>, ctx: &BlockContext) {
        let frames = match right.as_deref() {
            Some(r) => left.len().min(r.len()),
            None => left.len(),
        };

        if !self.prepared || !self.flags.license_activated() {
            left.fill(0.0);
            if let Some(r) = right.as_deref_mut() {
                r.fill(0.0);
            }
            return;
        }

        let mut start = 0;
        while start < frames {
            let end = (start + self.max_block).min(frames);
            let r = right.as_deref_mut().map(|r| &mut r[start..end]);
            self.process_chunk(&mut left[start..end], r, ctx);
            start = end;
        }
    }

    fn process_chunk(&mut self, left: &mut [f32], mut right: Option<&mut [f32]>, ctx: &BlockContext) {
        let n = left.len();
        let params = &*self.params;

        // Input gain
        self.input_gain
            .set_target(db_to_gain(params.get(ParamId::InputGain)));
        for i in 0..n {
            let g = self.input_gain.next_value();
            left[i] *= g;
            if let Some(r) = right.as_deref_mut() {
                r[i] *= g;
            }
        }

        // Mono sum feeds the model
        let mono = &mut self.mono[..n];
        match right.as_deref() {
            Some(r) => {
                for ((m, l), r) in mono.iter_mut().zip(left.iter()).zip(r) {
                    *m = 0.5 * (l + r);
                }
            }
            None => mono.copy_from_slice(left),
        }
        let input_db = self.input_meter.update(mono);

        // Gate trigger
        let threshold = params.get(ParamId::NoiseGate);
        let gate_active = threshold >= NOISE_GATE_OFF_BELOW;
        if gate_active {
            self.gate_trigger
                .set_params(GateParams::with_threshold(threshold as f64));
            self.gate_trigger.process(mono, &mut self.reduction[..n]);
        }

        // Model swap only between crossfades
        if !self.crossfade.is_active() {
            if let Some(next) = self.model_rx.take() {
                let previous = std::mem::replace(&mut self.model, next.model);
                if next.crossfade {
                    self.old_model = previous;
                    self.crossfade.start();
                    params.set_bool(ParamId::AmpSmooth, true);
                    debug!("Model crossfade started");
                } else {
                    if !self.model_rx.is_pending() {
                        params.set_bool(ParamId::AmpSmooth, false);
                    }
                    if previous.is_some() {
                        self.model_rx.retire(ModelSwap::hard(previous));
                    }
                }
            }
        }

        // Model, bypassed when the slot is empty
        let model_out = &mut self.model_out[..n];
        match self.model.as_mut() {
            Some(model) => model.process(mono, model_out),
            None => model_out.copy_from_slice(mono),
        }
        if self.crossfade.is_active() {
            let fade_out = &mut self.fade_out[..n];
            match self.old_model.as_mut() {
                Some(old) => old.process(mono, fade_out),
                None => fade_out.copy_from_slice(mono),
            }
            if self.crossfade.process(model_out, fade_out) {
                // a waiting swap keeps the flag raised for its own fade
                if !self.model_rx.is_pending() {
                    params.set_bool(ParamId::AmpSmooth, false);
                }
                if let Some(old) = self.old_model.take() {
                    self.model_rx.retire(ModelSwap::hard(Some(old)));
                }
                debug!("Model crossfade complete");
            }
        }

        // Gate gain, then the mono result goes to every channel
        if gate_active {
            self.gate_gain.apply(model_out, &self.reduction[..n]);
        }
        left.copy_from_slice(model_out);
        if let Some(r) = right.as_deref_mut() {
            r.copy_from_slice(model_out);
        }

        // Cabinet
        self.ir_rx.swap_into(&mut self.ir);
        if self.flags.ir_enabled() {
            if let Some(ir) = self.ir.as_mut() {
                ir.process(left);
                if let Some(r) = right.as_deref_mut() {
                    r.copy_from_slice(left);
                }
            }
        }

        // Tone stack, gains advance once per frame
        self.thickness.set_target(params.get(ParamId::Thickness));
        self.presence.set_target(params.get(ParamId::Presence));
        for i in 0..n {
            let thickness = self.thickness.next_value();
            let presence = self.presence.next_value();
            self.tone.set_amounts(thickness, presence);
            left[i] = self.tone.process_sample(left[i], 0);
            if let Some(r) = right.as_deref_mut() {
                r[i] = self.tone.process_sample(r[i], 1);
            }
        }

        self.reverb
            .process(params.get(ParamId::Reverb), left, right.as_deref_mut());

        // Tempo delay is skipped when the host gives no usable tempo
        if let Some(bpm) = ctx.valid_tempo() {
            let mapping = DelayMapping::from_amount(params.get(ParamId::DelayMix));
            let [delay_left, delay_right] = &mut self.delays;
            let samples = mapping.delay_samples(self.sample_rate, bpm, delay_left.capacity());
            delay_left.set_feedback(mapping.feedback);
            delay_left.process(left, samples, mapping.mix);
            if let Some(r) = right.as_deref_mut() {
                delay_right.set_feedback(mapping.feedback);
                delay_right.process(r, samples, mapping.mix);
            }
        }

        // Output gain
        self.output_gain
            .set_target(db_to_gain(params.get(ParamId::OutputGain)));
        for i in 0..n {
            let g = self.output_gain.next_value();
            left[i] *= g;
            if let Some(r) = right.as_deref_mut() {
                r[i] *= g;
            }
        }

        // Preset fade-in
        if self.flags.preset_smoothing() {
            for i in 0..n {
                let g = self.preset_fade_pos as f32 / self.preset_fade_len as f32;
                left[i] *= g;
                if let Some(r) = right.as_deref_mut() {
                    r[i] *= g;
                }
                self.preset_fade_pos += 1;
                if self.preset_fade_pos >= self.preset_fade_len {
                    self.preset_fade_pos = 0;
                    self.flags.clear_preset_smoothing();
                    break;
                }
            }
        }

        let output_db = self.output_meter.update(left);
        self.meters.publish(input_db, output_db);
    }
}

impl std::fmt::Debug for AmpProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmpProcessor")
            .field("sample_rate", &self.sample_rate)
            .field("max_block", &self.max_block)
            .field("prepared", &self.prepared)
            .field("model", &self.model.as_ref().map(|m| m.name()))
            .field("crossfading", &self.crossfade.is_active())
            .field("ir", &self.ir.as_ref().map(|c| c.impulse_response().name()))
            .finish()
    }
}
