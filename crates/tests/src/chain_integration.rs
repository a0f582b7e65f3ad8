//! End-to-end scenarios through the full processor with its selectors

use crate::support::{gain_model, rms, sine, Rig};
use invader_core::domain::amp::ModelBank;
use invader_core::domain::audio::BlockContext;
use invader_core::domain::config::{Preset, PresetStore};
use invader_core::domain::ir::{IrBank, IrData, IrReference};
use invader_core::domain::params::{EngineFlags, ParamId, Parameters};
use proptest::prelude::*;
use tempfile::TempDir;

fn bank_with(models: &[(bool, f32, f32)]) -> ModelBank {
    let mut bank = ModelBank::empty();
    for &(is_amp1, knob, gain) in models {
        let index = bank.index_for(is_amp1, knob);
        bank.set(index, gain_model(gain, Some(48000.0)));
    }
    bank
}

// ============================================================================
// FAIL-SAFES
// ============================================================================

#[test]
fn test_unlicensed_chain_is_bit_exact_silence() {
    let mut rig = Rig::new(48000.0, 256, bank_with(&[(true, 1.0, 2.0)]), IrBank::new(48000.0, 1024));
    rig.amp.select().unwrap();
    rig.params.set(ParamId::Reverb, 1.0);
    rig.flags.set_license_activated(false);

    let mut left = sine(2048, 0.8, 220.0, 48000.0);
    let mut right = left.clone();
    for (l, r) in left.chunks_mut(256).zip(right.chunks_mut(256)) {
        rig.processor.process(&mut [l, r], &BlockContext::with_tempo(120.0));
    }
    assert!(left.iter().chain(&right).all(|s| s.to_bits() == 0));

    rig.flags.set_license_activated(true);
    let mut block = vec![0.5; 256];
    rig.processor.process(&mut [block.as_mut_slice()], &BlockContext::default());
    assert!(block.iter().any(|s| *s != 0.0));
}

#[test]
fn test_empty_bank_bypasses_amp() {
    let mut rig = Rig::new(48000.0, 128, ModelBank::empty(), IrBank::new(48000.0, 1024));
    rig.amp.select().unwrap();

    let input = sine(4096, 0.5, 440.0, 48000.0);
    let mut output = input.clone();
    rig.run_mono(&mut output, 128, &BlockContext::default());
    assert!(!rig.processor.has_model());
    for (o, x) in output.iter().zip(&input) {
        assert!((o - x).abs() < 1e-4);
    }
}

// ============================================================================
// AMP SWITCHING
// ============================================================================

#[test]
fn test_gain_knob_crossfades_between_models() {
    let bank = bank_with(&[(true, 1.0, 0.5), (true, 1.5, 1.0)]);
    let mut rig = Rig::new(48000.0, 480, bank, IrBank::new(48000.0, 1024));
    assert_eq!(rig.amp.select().unwrap(), Some(0));
    assert!(!rig.params.get_bool(ParamId::AmpSmooth), "first model loads hard");

    let mut warmup = vec![0.4; 480];
    rig.run_mono(&mut warmup, 480, &BlockContext::default());
    assert!((warmup[479] - 0.2).abs() < 1e-6);

    rig.params.set(ParamId::AmpGain, 1.5);
    assert_eq!(rig.amp.select().unwrap(), Some(1));
    assert!(rig.params.get_bool(ParamId::AmpSmooth));
    assert_eq!(rig.params.get_int(ParamId::ModelId), 1);

    let mut output = vec![0.4; 480 * 30];
    rig.run_mono(&mut output, 480, &BlockContext::default());

    assert!(!rig.params.get_bool(ParamId::AmpSmooth));
    assert!((output[150] - 0.2).abs() < 0.01);
    assert!((output[14_000] - 0.4).abs() < 1e-6);
    let max_step = output[200..]
        .windows(2)
        .map(|w| (w[1] - w[0]).abs())
        .fold(0.0_f32, f32::max);
    assert!(max_step < 1e-3, "discontinuity of {max_step}");
    assert!(output[200..9600].windows(2).all(|w| w[1] >= w[0] - 1e-6));
    assert_eq!(rig.amp.collect_retired(), 1);
}

#[test]
fn test_gain_sweep_while_playing_stays_continuous() {
    let bank = bank_with(&[
        (true, 1.0, 0.5),
        (true, 1.5, 1.0),
        (true, 2.0, 1.5),
        (true, 2.5, 0.8),
    ]);
    let mut rig = Rig::new(48000.0, 480, bank, IrBank::new(48000.0, 1024));
    rig.amp.select().unwrap();

    // the knob moves across three stops while blocks keep flowing
    let moves = [(3, 1.5), (6, 2.0), (9, 2.5)];
    let mut output = Vec::with_capacity(480 * 70);
    for block_index in 0..70 {
        if let Some(&(_, gain)) = moves.iter().find(|(at, _)| *at == block_index) {
            rig.params.set(ParamId::AmpGain, gain);
            assert!(rig.amp.select().unwrap().is_some());
            assert!(rig.params.get_bool(ParamId::AmpSmooth));
        }
        let mut block = vec![0.4; 480];
        rig.run_mono(&mut block, 480, &BlockContext::default());
        output.extend_from_slice(&block);
    }

    let max_step = output
        .windows(2)
        .map(|w| (w[1] - w[0]).abs())
        .fold(0.0_f32, f32::max);
    assert!(max_step < 0.01, "discontinuity of {max_step}");
    assert!((output[output.len() - 1] - 0.32).abs() < 1e-5);
    assert_eq!(rig.params.get_int(ParamId::ModelId), 3);
    assert!(!rig.params.get_bool(ParamId::AmpSmooth));
    assert!(!rig.amp.is_pending());
    assert!(!rig.processor.is_crossfading());
}

#[test]
fn test_gain_within_same_slot_keeps_model() {
    let bank = bank_with(&[(true, 1.0, 0.5), (true, 1.5, 1.0)]);
    let mut rig = Rig::new(48000.0, 256, bank, IrBank::new(48000.0, 1024));
    rig.params.set(ParamId::AmpGain, 1.5);
    assert_eq!(rig.amp.select().unwrap(), Some(1));
    rig.params.set(ParamId::AmpGain, 1.8);
    assert_eq!(rig.amp.select().unwrap(), None);
}

#[test]
fn test_model_at_foreign_rate_keeps_level() {
    let bank = bank_with(&[(true, 1.0, 1.0)]);
    let mut rig = Rig::new(44100.0, 256, bank, IrBank::new(44100.0, 1024));
    rig.amp.select().unwrap();

    let input = sine(44100, 0.5, 440.0, 44100.0);
    let mut output = input.clone();
    rig.run_mono(&mut output, 256, &BlockContext::default());

    let ratio = rms(&output[22050..]) / rms(&input[22050..]);
    assert!((ratio - 1.0).abs() < 0.03, "level ratio {ratio}");
}

// ============================================================================
// CABINET
// ============================================================================

#[test]
fn test_cabinet_select_and_turn_off() {
    let mut irs = IrBank::new(48000.0, 1024);
    irs.set_user([("Room".to_string(), IrData::new(vec![1.0, 0.0, 0.5], 48000.0))]);
    let mut rig = Rig::new(48000.0, 64, ModelBank::empty(), irs);

    assert!(rig.cabinet.select(IrReference::User { name: "Room".into() }));
    assert!(rig.flags.ir_enabled());
    let mut impulse = vec![0.0; 64];
    impulse[0] = 1.0;
    rig.run_mono(&mut impulse, 64, &BlockContext::default());
    let g = 10.0_f32.powf(-18.0 / 20.0);
    assert!((impulse[0] - g).abs() < 1e-5);
    assert!((impulse[2] - 0.5 * g).abs() < 1e-5);

    assert!(!rig.cabinet.select(IrReference::Factory { index: 9 }));
    assert!(!rig.flags.ir_enabled());
    let mut impulse = vec![0.0; 64];
    impulse[0] = 1.0;
    rig.run_mono(&mut impulse, 64, &BlockContext::default());
    assert!((impulse[0] - 1.0).abs() < 1e-5);
}

// ============================================================================
// PRESETS
// ============================================================================

#[tokio::test]
async fn test_preset_load_restores_values_and_fades_in() {
    let dir = TempDir::new().unwrap();
    let store = PresetStore::new(dir.path().to_path_buf());

    let source = Parameters::new();
    source.set(ParamId::Reverb, 0.3);
    source.set(ParamId::Thickness, 2.0);
    source.set(ParamId::NoiseGate, -100.0);
    store
        .save(&Preset::capture("Crunch", &source, IrReference::Factory { index: 0 }))
        .await
        .unwrap();

    let mut rig = Rig::new(48000.0, 512, ModelBank::empty(), IrBank::new(48000.0, 1024));
    let preset = store.load("Crunch").await.unwrap();
    preset.apply(&rig.params, &rig.flags);
    assert_eq!(preset.ir, IrReference::Factory { index: 0 });
    assert_eq!(rig.params.get(ParamId::Reverb), 0.3);
    assert_eq!(rig.params.get(ParamId::Thickness), 2.0);
    assert!(rig.flags.preset_smoothing());

    let mut output = vec![0.25; 48000];
    rig.run_mono(&mut output, 512, &BlockContext::default());
    assert_eq!(output[0], 0.0);
    assert!(output[1000].abs() < output[20_000].abs());
    assert!(!rig.flags.preset_smoothing());
}

#[test]
fn test_flags_start_safe() {
    let flags = EngineFlags::new();
    assert!(!flags.license_activated());
    assert!(!flags.ir_enabled());
    assert!(!flags.preset_smoothing());
}

// ============================================================================
// DELAY SAFETY
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn test_any_tempo_mix_and_block_stays_finite(
        bpm in 0.001f64..2000.0,
        amount in 0.0f32..=1.0,
        block in 1usize..700,
    ) {
        let mut rig = Rig::new(48000.0, 512, ModelBank::empty(), IrBank::new(48000.0, 1024));
        rig.params.set(ParamId::DelayMix, amount);
        rig.params.set(ParamId::Reverb, amount);

        let mut signal = sine(block * 4, 0.9, 330.0, 48000.0);
        rig.run_mono(&mut signal, block, &BlockContext::with_tempo(bpm));
        prop_assert!(signal.iter().all(|s| s.is_finite() && s.abs() < 100.0));
    }
}
