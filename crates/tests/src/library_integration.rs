//! File-backed libraries feeding the chain, rendered through the offline host

use crate::support::{gain_model, Rig};
use hound::{SampleFormat, WavSpec, WavWriter};
use invader_core::domain::amp::model_file_name;
use invader_core::domain::ir::{IrBank, IrData, IrReference, IR_SELECTION_CUSTOM};
use invader_core::domain::params::ParamId;
use invader_infra::{
    load_factory_irs, load_model_bank, read_wav, scan_user_irs, write_wav, OfflineRenderer, WavAudio,
};
use std::path::Path;
use tempfile::TempDir;

fn write_int24_ir(path: &Path, samples: &[f32], rate: u32) {
    let spec = WavSpec {
        channels: 1,
        sample_rate: rate,
        bits_per_sample: 24,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec).unwrap();
    for &s in samples {
        writer.write_sample((s * 8_388_608.0) as i32).unwrap();
    }
    writer.finalize().unwrap();
}

// ============================================================================
// MODEL LIBRARY
// ============================================================================

#[test]
fn test_model_directory_drives_amp_selection() {
    let dir = TempDir::new().unwrap();
    for (variant, gain, level) in [(1, 1.0, 0.5), (2, 1.0, 0.25)] {
        let json = gain_model(level, Some(48000.0)).to_json().unwrap();
        std::fs::write(dir.path().join(model_file_name(variant, gain)), json).unwrap();
    }

    let bank = load_model_bank(dir.path());
    assert_eq!(bank.loaded(), 2);
    let mut rig = Rig::new(48000.0, 128, bank, IrBank::new(48000.0, 1024));

    rig.amp.select().unwrap();
    let mut block = vec![0.8; 128];
    rig.run_mono(&mut block, 128, &Default::default());
    assert!((block[64] - 0.4).abs() < 1e-6);

    rig.params.set_bool(ParamId::IsAmp1, false);
    assert_eq!(rig.amp.select().unwrap(), Some(19));
    // an integer gain is a model boundary, so the switch is smoothed
    assert!(rig.params.get_bool(ParamId::AmpSmooth));
}

// ============================================================================
// IMPULSE RESPONSE LIBRARY
// ============================================================================

#[test]
fn test_factory_and_user_irs_resolve() {
    let factory = TempDir::new().unwrap();
    let user = TempDir::new().unwrap();
    for n in 1..=3 {
        let data = IrData::new(vec![n as f32 * 0.1], 48000.0);
        std::fs::write(factory.path().join(format!("Invader {n}.bin")), data.to_factory_blob()).unwrap();
    }
    write_int24_ir(&user.path().join("b cab.wav"), &[0.5, 0.0, 0.25], 48000);
    write_int24_ir(&user.path().join("A Cab.wav"), &[0.9], 24000);

    let mut bank = IrBank::new(48000.0, 2048);
    assert_eq!(bank.load_factory(load_factory_irs(factory.path())), 3);
    assert_eq!(bank.set_user(scan_user_irs(user.path()).unwrap()), 2);
    assert_eq!(bank.user_names(), ["A Cab", "b cab"]);

    let second = bank.resolve(&IrReference::Factory { index: 1 }).unwrap();
    let g = 10.0_f32.powf(-18.0 / 20.0);
    assert!((second.kernel()[0] - 0.2 * g).abs() < 1e-6);

    let b = bank.resolve(&IrReference::User { name: "b cab".into() }).unwrap();
    assert_eq!(b.kernel().len(), 3);
    assert!((b.kernel()[2] - 0.25 * g).abs() < 1e-6);

    // 24 kHz source is resampled to the processing rate
    let a = bank.resolve(&IrReference::User { name: "A Cab".into() }).unwrap();
    assert_eq!(a.sample_rate(), 48000.0);
    assert_eq!(a.kernel().len(), 2);
}

#[test]
fn test_ir_selection_params_follow_the_library() {
    let work = TempDir::new().unwrap();
    let factory = work.path().join("factory");
    let user = work.path().join("user");
    let models = work.path().join("models");
    for dir in [&factory, &user, &models] {
        std::fs::create_dir_all(dir).unwrap();
    }
    for n in 1..=3 {
        let data = IrData::new(vec![n as f32 * 0.1], 48000.0);
        std::fs::write(factory.join(format!("Invader {n}.bin")), data.to_factory_blob()).unwrap();
    }
    write_int24_ir(&user.join("b cab.wav"), &[0.5], 48000);
    write_int24_ir(&user.join("A Cab.wav"), &[0.25], 48000);
    std::fs::write(
        models.join(model_file_name(1, 1.0)),
        gain_model(1.0, Some(48000.0)).to_json().unwrap(),
    )
    .unwrap();

    let mut bank = IrBank::new(48000.0, 1024);
    bank.load_factory(load_factory_irs(&factory));
    bank.set_user(scan_user_irs(&user).unwrap());
    let mut rig = Rig::new(48000.0, 128, load_model_bank(&models), bank);
    rig.amp.select().unwrap();
    let g = 10.0_f32.powf(-18.0 / 20.0);

    // host writes the parameter, the selector follows it into the chain
    rig.params.set(ParamId::IrSelection, 3.0);
    assert!(rig.cabinet.select_from_params());
    assert_eq!(rig.cabinet.current(), &IrReference::Factory { index: 2 });
    let mut block = vec![0.5; 128];
    rig.run_mono(&mut block, 128, &Default::default());
    assert!((block[64] - 0.5 * 0.3 * g).abs() < 1e-4, "{}", block[64]);

    // picking by name writes both parameters back
    assert!(rig.cabinet.select(IrReference::User { name: "b cab".into() }));
    assert_eq!(rig.params.get_int(ParamId::IrSelection), IR_SELECTION_CUSTOM);
    assert_eq!(rig.params.get_int(ParamId::CustomIrSelection), 2);

    rig.params.set(ParamId::CustomIrSelection, 1.0);
    assert!(rig.cabinet.select_from_params());
    assert_eq!(rig.cabinet.current(), &IrReference::User { name: "A Cab".into() });
    let mut block = vec![0.5; 128];
    rig.run_mono(&mut block, 128, &Default::default());
    assert!((block[64] - 0.5 * 0.25 * g).abs() < 1e-4, "{}", block[64]);

    rig.params.set(ParamId::IrSelection, 0.0);
    assert!(!rig.cabinet.select_from_params());
    assert!(!rig.flags.ir_enabled());
}

// ============================================================================
// OFFLINE RENDER
// ============================================================================

#[test]
fn test_render_file_through_model_and_cabinet() {
    let work = TempDir::new().unwrap();
    let models = work.path().join("models");
    let irs = work.path().join("irs");
    std::fs::create_dir_all(&models).unwrap();
    std::fs::create_dir_all(&irs).unwrap();

    std::fs::write(
        models.join(model_file_name(1, 1.0)),
        gain_model(2.0, Some(48000.0)).to_json().unwrap(),
    )
    .unwrap();
    write_int24_ir(&irs.join("Short.wav"), &[0.5], 48000);

    let mut bank = IrBank::new(48000.0, 1024);
    bank.set_user(scan_user_irs(&irs).unwrap());
    let mut rig = Rig::new(48000.0, 256, load_model_bank(&models), bank);
    rig.amp.select().unwrap();
    assert!(rig.cabinet.select(IrReference::User { name: "Short".into() }));

    let input_path = work.path().join("di.wav");
    let output_path = work.path().join("wet.wav");
    let di: Vec<f32> = (0..4800).map(|i| if i % 480 < 240 { 0.1 } else { -0.1 }).collect();
    write_wav(&input_path, &WavAudio::new(vec![di.clone(), di.clone()], 48000)).unwrap();

    let report = OfflineRenderer::new(256)
        .with_tempo(90.0)
        .render_file(&mut rig.processor, &input_path, &output_path)
        .unwrap();
    assert_eq!(report.channels, 2);
    assert_eq!(report.frames, 4800);

    let wet = read_wav(&output_path).unwrap();
    let g = 10.0_f32.powf(-18.0 / 20.0);
    // model doubles, cabinet halves and trims
    for (o, x) in wet.channels[0].iter().zip(&di).skip(1) {
        assert!((o - x * g).abs() < 1e-4, "{o} vs {}", x * g);
    }
    assert_eq!(wet.channels[0], wet.channels[1]);
}
