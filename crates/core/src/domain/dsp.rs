//! Digital signal processing stages of the amp chain
//!
//! This module provides the building blocks the block pipeline strings
//! together:
//! - Biquad filters (RBJ highpass/lowpass used by the delay feedback path
//!   and the reverb's rumble filter)
//! - Lattice peak/notch and high-shelf tone filters ([`eq`])
//! - Schroeder reverb with a pre-delayed wet ring buffer ([`reverb`])
//! - Tempo-synced feedback delay ([`delay`])
//! - Noise gate trigger and gain follower ([`gate`])
//!
//! All stages are designed for:
//! - Zero allocations in the hot path (buffers are sized at construction)
//! - Per-sample processing with per-channel state
//! - Coefficient recomputation only where live automation requires it

use crate::domain::audio::AudioError;
use num_complex::Complex32;
use serde::{Deserialize, Serialize};

pub mod delay;
pub mod eq;
pub mod gate;
pub mod reverb;

pub use delay::{DelayMapping, TempoDelay};
pub use eq::{FilterParam, PeakNotch, Shelf, ToneStack};
pub use gate::{GateGain, GateTrigger, GateParams};
pub use reverb::{ReverbSend, SchroederReverb};

pub type Result<T> = std::result::Result<T, AudioError>;

/// Fixed design constants of the tone chain
pub mod params {
    /// Butterworth Q used by the delay feedback filters
    pub const BUTTERWORTH_Q: f32 = 0.707;

    /// Delay feedback path shaping (Hz)
    pub const DELAY_HIGHPASS_HZ: f32 = 250.0;
    pub const DELAY_LOWPASS_HZ: f32 = 8000.0;

    /// Reverb wet-signal rumble filter (Hz)
    pub const REVERB_HIGHPASS_HZ: f32 = 100.0;

    /// Thickness bands (Hz)
    pub const THICKNESS_LOW_HZ: f32 = 120.0;
    pub const THICKNESS_MID_HZ: f32 = 800.0;

    /// Presence bands (Hz)
    pub const PRESENCE_PEAK_HZ: f32 = 2000.0;
    pub const PRESENCE_SHELF_HZ: f32 = 5000.0;

    /// Global voicing band, fixed at 0 dB
    pub const GLOBAL_EQ_HZ: f32 = 5200.0;

    /// Default Q of the high shelf
    pub const SHELF_Q: f32 = 5.0;

    /// Bandwidth used by peak/notch filters without a design-table entry (Hz)
    pub const DEFAULT_BANDWIDTH_HZ: f32 = 30.0;

    /// Peak/notch bandwidth design table: (center Hz, bandwidth Hz)
    pub const BANDWIDTH_TABLE: [(f32, f32); 7] = [
        (140.0, 84.848_484_848_5),
        (800.0, 484.848_484_848_5),
        (5750.0, 3443.113_772_455_1),
        (5200.0, 764.7),
        (120.0, 56.074_766_355_14),
        (200.0, 108.108_108),
        (116.0, 63.387_978_142_1),
    ];
}

// ============================================================================
// BIQUAD FILTER
// ============================================================================

/// Biquad filter coefficients
///
/// Direct Form I layout. Coefficients are normalized so that a0 == 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BiquadCoeffs {
    /// Numerator coefficients
    pub b0: f32,
    pub b1: f32,
    pub b2: f32,
    /// Denominator coefficients (a0 is normalized to 1.0)
    pub a1: f32,
    pub a2: f32,
}

impl Default for BiquadCoeffs {
    fn default() -> Self {
        // Unity gain (no filtering)
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }
}

impl BiquadCoeffs {
    /// RBJ cookbook second-order highpass
    #[must_use]
    pub fn highpass(sample_rate: f32, freq: f32, q: f32) -> Self {
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);
        let a0 = 1.0 + alpha;

        Self {
            b0: (1.0 + cos_w0) / (2.0 * a0),
            b1: -(1.0 + cos_w0) / a0,
            b2: (1.0 + cos_w0) / (2.0 * a0),
            a1: (-2.0 * cos_w0) / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    /// RBJ cookbook second-order lowpass
    #[must_use]
    pub fn lowpass(sample_rate: f32, freq: f32, q: f32) -> Self {
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);
        let a0 = 1.0 + alpha;

        Self {
            b0: (1.0 - cos_w0) / (2.0 * a0),
            b1: (1.0 - cos_w0) / a0,
            b2: (1.0 - cos_w0) / (2.0 * a0),
            a1: (-2.0 * cos_w0) / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    /// Bilinear-transform highpass with prewarped cutoff `K = tan(pi * fc / fs)`
    ///
    /// Used on the reverb's wet signal.
    #[must_use]
    pub fn highpass_prewarped(sample_rate: f32, freq: f32, q: f32) -> Self {
        let k = (std::f32::consts::PI * freq / sample_rate).tan();
        let norm = k * k * q + k + q;

        Self {
            b0: q / norm,
            b1: -2.0 * q / norm,
            b2: q / norm,
            a1: 2.0 * q * (k * k - 1.0) / norm,
            a2: (k * k * q - k + q) / norm,
        }
    }

    /// Magnitude response at `freq`, evaluated on the unit circle
    pub fn magnitude_at(&self, sample_rate: f32, freq: f32) -> f32 {
        let w = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let z1 = Complex32::from_polar(1.0, -w);
        let z2 = z1 * z1;
        let num = Complex32::new(self.b0, 0.0) + z1 * self.b1 + z2 * self.b2;
        let den = Complex32::new(1.0, 0.0) + z1 * self.a1 + z2 * self.a2;
        (num / den).norm()
    }
}

/// Stateful biquad filter using Direct Form I
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiquadFilter {
    coeffs: BiquadCoeffs,
    // Previous input samples (x[n-1], x[n-2])
    x1: f32,
    x2: f32,
    // Previous output samples (y[n-1], y[n-2])
    y1: f32,
    y2: f32,
}

impl BiquadFilter {
    /// Create a new biquad filter with given coefficients
    pub fn new(coeffs: BiquadCoeffs) -> Self {
        Self {
            coeffs,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    /// Create a bypass filter (unity gain)
    pub fn bypass() -> Self {
        Self::new(BiquadCoeffs::default())
    }

    /// Update filter coefficients, keeping the state
    pub fn set_coeffs(&mut self, coeffs: BiquadCoeffs) {
        self.coeffs = coeffs;
    }

    pub fn coeffs(&self) -> &BiquadCoeffs {
        &self.coeffs
    }

    /// Process a single sample
    #[inline]
    pub fn process_sample(&mut self, x: f32) -> f32 {
        // y[n] = b0*x[n] + b1*x[n-1] + b2*x[n-2] - a1*y[n-1] - a2*y[n-2]
        let y = self.coeffs.b0 * x
            + self.coeffs.b1 * self.x1
            + self.coeffs.b2 * self.x2
            - self.coeffs.a1 * self.y1
            - self.coeffs.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = flush_denormal(y);

        y
    }

    /// Process a buffer of samples in place
    pub fn process(&mut self, buffer: &mut [f32]) {
        for sample in buffer.iter_mut() {
            *sample = self.process_sample(*sample);
        }
    }

    /// Reset filter state
    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }
}

/// Flush subnormal values to zero so recursive state never decays into denormals
#[inline]
pub fn flush_denormal(x: f32) -> f32 {
    if x.abs() < f32::MIN_POSITIVE {
        0.0
    } else {
        x
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: f32 = 48000.0;

    fn generate_test_signal(samples: usize, frequency: f32) -> Vec<f32> {
        (0..samples)
            .map(|i| (2.0 * std::f32::consts::PI * frequency * i as f32 / SAMPLE_RATE).sin())
            .collect()
    }

    fn rms(buffer: &[f32]) -> f32 {
        (buffer.iter().map(|s| s * s).sum::<f32>() / buffer.len() as f32).sqrt()
    }

    // -------------------------------------------------------------------------
    // Biquad Filter Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_biquad_unity() {
        let mut filter = BiquadFilter::bypass();

        let input = vec![0.5, 0.3, 0.7];
        let mut output = input.clone();
        filter.process(&mut output);

        for (in_sample, out_sample) in input.iter().zip(output.iter()) {
            assert!((in_sample - out_sample).abs() < 1e-6);
        }
    }

    #[test]
    fn test_biquad_reset() {
        let mut filter = BiquadFilter::new(BiquadCoeffs::lowpass(SAMPLE_RATE, 800.0, 0.707));

        let mut buffer = vec![0.5; 100];
        filter.process(&mut buffer);

        filter.reset();
        let mut silence = vec![0.0; 10];
        filter.process(&mut silence);

        assert!(silence.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_highpass_blocks_dc() {
        let coeffs = BiquadCoeffs::highpass(SAMPLE_RATE, params::DELAY_HIGHPASS_HZ, params::BUTTERWORTH_Q);
        assert!(coeffs.magnitude_at(SAMPLE_RATE, 1.0) < 1e-3);
        assert!((coeffs.magnitude_at(SAMPLE_RATE, 10_000.0) - 1.0).abs() < 0.01);

        let mut filter = BiquadFilter::new(coeffs);
        let mut dc = vec![1.0; 48000];
        filter.process(&mut dc);
        assert!(dc[47999].abs() < 1e-3);
    }

    #[test]
    fn test_lowpass_attenuates_highs() {
        let coeffs = BiquadCoeffs::lowpass(SAMPLE_RATE, params::DELAY_LOWPASS_HZ, params::BUTTERWORTH_Q);
        assert!((coeffs.magnitude_at(SAMPLE_RATE, 100.0) - 1.0).abs() < 0.01);

        let mut filter = BiquadFilter::new(coeffs);
        let mut high = generate_test_signal(4800, 20_000.0);
        filter.process(&mut high);
        assert!(rms(&high[480..]) < 0.2);
    }

    #[test]
    fn test_prewarped_highpass_corner() {
        let q = std::f32::consts::FRAC_1_SQRT_2;
        let coeffs = BiquadCoeffs::highpass_prewarped(SAMPLE_RATE, 100.0, q);
        // -3 dB at the corner for a Butterworth design
        let corner = coeffs.magnitude_at(SAMPLE_RATE, 100.0);
        assert!((corner - q).abs() < 0.01, "corner magnitude {corner}");
        assert!((coeffs.magnitude_at(SAMPLE_RATE, 5000.0) - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_flush_denormal() {
        assert_eq!(flush_denormal(1e-40), 0.0);
        assert_eq!(flush_denormal(0.25), 0.25);
    }
}
