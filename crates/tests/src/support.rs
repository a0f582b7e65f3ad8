//! Shared fixtures for the integration scenarios

use invader_core::domain::amp::{AmpSelector, ModelBank, ModelData};
use invader_core::domain::audio::BlockContext;
use invader_core::domain::config::EngineConfig;
use invader_core::domain::ir::{IrBank, IrSelector};
use invader_core::domain::params::{EngineFlags, ParamId, Parameters};
use invader_core::domain::pipeline::AmpProcessor;
use std::sync::Arc;

/// A processor with its control-side selectors, as a host would wire it
pub struct Rig {
    pub processor: AmpProcessor,
    pub amp: AmpSelector,
    pub cabinet: IrSelector,
    pub params: Arc<Parameters>,
    pub flags: Arc<EngineFlags>,
}

impl Rig {
    /// Licensed, gate off, everything else at defaults
    pub fn new(rate: f64, block: usize, bank: ModelBank, irs: IrBank) -> Self {
        let params = Arc::new(Parameters::new());
        let flags = Arc::new(EngineFlags::new());
        flags.set_license_activated(true);
        params.set(ParamId::NoiseGate, -100.0);

        let config = EngineConfig {
            sample_rate: rate as u32,
            max_block_size: block,
            ..EngineConfig::default()
        };
        let (mut processor, ports) =
            AmpProcessor::new(config, params.clone(), flags.clone()).unwrap();
        processor.prepare(rate, block).unwrap();

        let amp = AmpSelector::new(Arc::new(bank), params.clone(), ports.models, rate, block);
        let cabinet = IrSelector::new(irs, params.clone(), flags.clone(), ports.irs);
        Self {
            processor,
            amp,
            cabinet,
            params,
            flags,
        }
    }

    /// Process `signal` as mono in `block`-sized pieces
    pub fn run_mono(&mut self, signal: &mut [f32], block: usize, ctx: &BlockContext) {
        for chunk in signal.chunks_mut(block) {
            self.processor.process(&mut [chunk], ctx);
        }
    }
}

/// Single-tap linear model: `y = gain * x`
pub fn gain_model(gain: f32, rate: Option<f64>) -> ModelData {
    ModelData {
        version: "0.5.4".into(),
        architecture: "Linear".into(),
        config: serde_json::json!({ "receptive_field": 1, "bias": false }),
        metadata: None,
        weights: vec![gain],
        sample_rate: rate,
    }
}

pub fn sine(len: usize, amplitude: f32, freq: f32, rate: f32) -> Vec<f32> {
    (0..len)
        .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / rate).sin())
        .collect()
}

pub fn rms(samples: &[f32]) -> f32 {
    (samples.iter().map(|s| s * s).sum::<f32>() / samples.len().max(1) as f32).sqrt()
}
