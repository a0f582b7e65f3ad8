//! RMS level metering
//!
//! Meters snap up to a louder reading and release toward a quieter one over
//! a fixed ramp. The latest smoothed value is published through an atomic so
//! the control thread can poll it without touching the audio path.

use crate::domain::audio::gain_to_db;
use crate::domain::params::AtomicF32;
use crate::domain::smoothing::LinearSmoothedValue;

/// Meter floor in dB
pub const METER_FLOOR_DB: f32 = -100.0;

/// Published meter readings, shared with the control thread
#[derive(Debug)]
pub struct MeterLevels {
    input: AtomicF32,
    output: AtomicF32,
}

impl MeterLevels {
    pub fn new() -> Self {
        Self {
            input: AtomicF32::new(METER_FLOOR_DB),
            output: AtomicF32::new(METER_FLOOR_DB),
        }
    }

    pub fn input_db(&self) -> f32 {
        self.input.load()
    }

    pub fn output_db(&self) -> f32 {
        self.output.load()
    }

    pub(crate) fn publish(&self, input_db: f32, output_db: f32) {
        self.input.store(input_db);
        self.output.store(output_db);
    }
}

impl Default for MeterLevels {
    fn default() -> Self {
        Self::new()
    }
}

/// Root mean square of a block
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Block RMS meter with asymmetric ballistics
#[derive(Debug, Clone)]
pub struct RmsMeter {
    level: LinearSmoothedValue,
}

impl RmsMeter {
    pub fn new() -> Self {
        Self {
            level: LinearSmoothedValue::new(METER_FLOOR_DB),
        }
    }

    pub fn reset(&mut self, sample_rate: f64, release_seconds: f64) {
        self.level.reset(sample_rate, release_seconds);
        self.level.set_current_and_target(METER_FLOOR_DB);
    }

    /// Feed one block and return the smoothed level in dB
    pub fn update(&mut self, samples: &[f32]) -> f32 {
        let reading = gain_to_db(rms(samples), METER_FLOOR_DB);
        if reading < self.level.current() {
            self.level.set_target(reading);
        } else {
            self.level.set_current_and_target(reading);
        }
        self.level.skip(samples.len())
    }

    pub fn level_db(&self) -> f32 {
        self.level.current()
    }
}

impl Default for RmsMeter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rms_of_constant() {
        assert!((rms(&[0.5; 64]) - 0.5).abs() < 1e-6);
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn test_silence_reads_floor() {
        let mut meter = RmsMeter::new();
        meter.reset(48000.0, 0.5);
        assert_eq!(meter.update(&[0.0; 128]), METER_FLOOR_DB);
    }

    #[test]
    fn test_snaps_up_releases_down() {
        let mut meter = RmsMeter::new();
        meter.reset(48000.0, 0.5);

        let loud = meter.update(&[0.5; 480]);
        assert!((loud - (-6.02)).abs() < 0.01);

        // 480 of 24000 release steps toward the floor
        let after = meter.update(&[0.0; 480]);
        assert!(after < loud);
        assert!(after > -10.0, "released too fast: {after}");

        for _ in 0..60 {
            meter.update(&[0.0; 480]);
        }
        assert_eq!(meter.level_db(), METER_FLOOR_DB);
    }

    #[test]
    fn test_levels_publish() {
        let levels = MeterLevels::new();
        levels.publish(-12.0, -3.0);
        assert_eq!(levels.input_db(), -12.0);
        assert_eq!(levels.output_db(), -3.0);
    }
}
