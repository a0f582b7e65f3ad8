//! Tone filters: lattice peak/notch, high shelf and the thickness/presence stack
//!
//! Both filter types recompute their coefficients for every sample from the
//! live gain, so automation never produces coefficient steps. Gains are
//! atomics and can be written through a shared reference.

use super::{params, BiquadCoeffs};
use crate::domain::params::AtomicF32;
use num_complex::Complex32;
use std::f32::consts::PI;

/// Channels with independent filter history
pub const MAX_CHANNELS: usize = 2;

/// Live-settable filter parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterParam {
    /// Gain in dB
    Gain,
    /// Quality factor; a peak/notch derives its bandwidth as `center / Q`
    Bandwidth,
}

/// Look up the design bandwidth for a center frequency
pub fn design_bandwidth(center_hz: f32) -> f32 {
    params::BANDWIDTH_TABLE
        .iter()
        .find(|(fc, _)| *fc == center_hz)
        .map(|(_, fb)| *fb)
        .unwrap_or(params::DEFAULT_BANDWIDTH_HZ)
}

// ============================================================================
// PEAK / NOTCH (Regalia-Mitra lattice)
// ============================================================================

/// Second-order peaking filter built around an all-pass lattice
///
/// `H(z) = 1 + (V0 - 1) / 2 * (1 - A(z))` where `A(z)` is a second-order
/// all-pass tuned by `d` (center) and `c` (bandwidth). Boost and cut use
/// different `c` formulas so that cuts stay symmetric to boosts.
#[derive(Debug)]
pub struct PeakNotch {
    sample_rate: f32,
    center_hz: f32,
    bandwidth_hz: f32,
    d: f32,
    gain_db: AtomicF32,
    xh1: [f32; MAX_CHANNELS],
    xh2: [f32; MAX_CHANNELS],
}

impl PeakNotch {
    /// Create a filter whose bandwidth comes from the design table
    pub fn new(sample_rate: f32, center_hz: f32) -> Self {
        Self::with_bandwidth(sample_rate, center_hz, design_bandwidth(center_hz))
    }

    pub fn with_bandwidth(sample_rate: f32, center_hz: f32, bandwidth_hz: f32) -> Self {
        Self {
            sample_rate,
            center_hz,
            bandwidth_hz,
            d: Self::design_d(sample_rate, center_hz),
            gain_db: AtomicF32::new(0.0),
            xh1: [0.0; MAX_CHANNELS],
            xh2: [0.0; MAX_CHANNELS],
        }
    }

    fn design_d(sample_rate: f32, center_hz: f32) -> f32 {
        -(2.0 * PI * center_hz / sample_rate).cos()
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        self.d = Self::design_d(sample_rate, self.center_hz);
    }

    /// Set the gain without exclusive access (control thread)
    #[inline]
    pub fn set_gain(&self, gain_db: f32) {
        self.gain_db.store(gain_db);
    }

    pub fn gain(&self) -> f32 {
        self.gain_db.load()
    }

    pub fn set_value(&mut self, param: FilterParam, value: f32) {
        match param {
            FilterParam::Gain => self.set_gain(value),
            FilterParam::Bandwidth => {
                if value > 0.0 {
                    self.bandwidth_hz = self.center_hz / value;
                }
            }
        }
    }

    pub fn center_hz(&self) -> f32 {
        self.center_hz
    }

    pub fn bandwidth_hz(&self) -> f32 {
        self.bandwidth_hz
    }

    #[inline]
    fn lattice_c(&self, gain_db: f32, v0: f32) -> f32 {
        let t = (PI * self.bandwidth_hz / self.sample_rate).tan();
        if gain_db >= 0.0 {
            (t - 1.0) / (t + 1.0)
        } else {
            (t - v0) / (t + v0)
        }
    }

    /// Process one sample of one channel
    #[inline]
    pub fn apply(&mut self, x: f32, channel: usize) -> f32 {
        let ch = channel.min(MAX_CHANNELS - 1);
        let gain_db = self.gain_db.load();
        let v0 = 10.0_f32.powf(gain_db / 20.0);
        let c = self.lattice_c(gain_db, v0);
        let dc = self.d * (1.0 - c);

        let xh = x - dc * self.xh1[ch] + c * self.xh2[ch];
        let ap = -c * xh + dc * self.xh1[ch] + self.xh2[ch];
        self.xh2[ch] = self.xh1[ch];
        self.xh1[ch] = super::flush_denormal(xh);

        0.5 * (v0 - 1.0) * (x - ap) + x
    }

    /// Magnitude response at the current gain
    pub fn magnitude_at(&self, freq: f32) -> f32 {
        let gain_db = self.gain_db.load();
        let v0 = 10.0_f32.powf(gain_db / 20.0);
        let c = self.lattice_c(gain_db, v0);
        let dc = self.d * (1.0 - c);

        let z1 = Complex32::from_polar(1.0, -2.0 * PI * freq / self.sample_rate);
        let z2 = z1 * z1;
        let one = Complex32::new(1.0, 0.0);
        let allpass = (z1 * dc + z2 - c) / (one + z1 * dc - z2 * c);
        (one + (one - allpass) * (0.5 * (v0 - 1.0))).norm()
    }

    pub fn reset(&mut self) {
        self.xh1 = [0.0; MAX_CHANNELS];
        self.xh2 = [0.0; MAX_CHANNELS];
    }
}

// ============================================================================
// HIGH SHELF
// ============================================================================

/// RBJ high shelf with per-sample coefficient computation
#[derive(Debug)]
pub struct Shelf {
    center_hz: f32,
    omega: f32,
    q: f32,
    gain_db: AtomicF32,
    x1: [f32; MAX_CHANNELS],
    x2: [f32; MAX_CHANNELS],
    y1: [f32; MAX_CHANNELS],
    y2: [f32; MAX_CHANNELS],
}

impl Shelf {
    pub fn new(sample_rate: f32, center_hz: f32) -> Self {
        Self {
            center_hz,
            omega: 2.0 * PI * center_hz / sample_rate,
            q: params::SHELF_Q,
            gain_db: AtomicF32::new(0.0),
            x1: [0.0; MAX_CHANNELS],
            x2: [0.0; MAX_CHANNELS],
            y1: [0.0; MAX_CHANNELS],
            y2: [0.0; MAX_CHANNELS],
        }
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.omega = 2.0 * PI * self.center_hz / sample_rate;
    }

    #[inline]
    pub fn set_gain(&self, gain_db: f32) {
        self.gain_db.store(gain_db);
    }

    pub fn gain(&self) -> f32 {
        self.gain_db.load()
    }

    pub fn set_value(&mut self, param: FilterParam, value: f32) {
        match param {
            FilterParam::Gain => self.set_gain(value),
            FilterParam::Bandwidth => {
                if value > 0.0 {
                    self.q = value;
                }
            }
        }
    }

    /// Normalized coefficients for the current gain
    pub fn coeffs(&self) -> BiquadCoeffs {
        let a = 10.0_f32.powf(self.gain_db.load() / 40.0);
        let beta = a.sqrt() / self.q;
        let (sin, cos) = self.omega.sin_cos();

        let b0 = a * (a + 1.0 + (a - 1.0) * cos + beta * sin);
        let b1 = -2.0 * a * (a - 1.0 + (a + 1.0) * cos);
        let b2 = a * (a + 1.0 + (a - 1.0) * cos - beta * sin);
        let a0 = a + 1.0 - (a - 1.0) * cos + beta * sin;
        let a1 = 2.0 * (a - 1.0 - (a + 1.0) * cos);
        let a2 = a + 1.0 - (a - 1.0) * cos - beta * sin;

        BiquadCoeffs {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// Process one sample of one channel
    #[inline]
    pub fn apply(&mut self, x: f32, channel: usize) -> f32 {
        let ch = channel.min(MAX_CHANNELS - 1);
        let k = self.coeffs();
        let y = k.b0 * x + k.b1 * self.x1[ch] + k.b2 * self.x2[ch]
            - k.a1 * self.y1[ch]
            - k.a2 * self.y2[ch];

        self.y2[ch] = self.y1[ch];
        self.y1[ch] = super::flush_denormal(y);
        self.x2[ch] = self.x1[ch];
        self.x1[ch] = x;
        y
    }

    pub fn reset(&mut self) {
        self.x1 = [0.0; MAX_CHANNELS];
        self.x2 = [0.0; MAX_CHANNELS];
        self.y1 = [0.0; MAX_CHANNELS];
        self.y2 = [0.0; MAX_CHANNELS];
    }
}

// ============================================================================
// TONE STACK
// ============================================================================

/// Thickness/presence tone chain plus the fixed global voicing band
///
/// Thickness drives the 120 Hz and 800 Hz peaks (1x and 2x), presence drives
/// the 2 kHz peak and the 5 kHz shelf (both 2x). With both at 0 dB every
/// band is an identity.
#[derive(Debug)]
pub struct ToneStack {
    thickness_low: PeakNotch,
    thickness_mid: PeakNotch,
    presence_peak: PeakNotch,
    presence_shelf: Shelf,
    global: PeakNotch,
}

impl ToneStack {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            thickness_low: PeakNotch::new(sample_rate, params::THICKNESS_LOW_HZ),
            thickness_mid: PeakNotch::new(sample_rate, params::THICKNESS_MID_HZ),
            presence_peak: PeakNotch::new(sample_rate, params::PRESENCE_PEAK_HZ),
            presence_shelf: Shelf::new(sample_rate, params::PRESENCE_SHELF_HZ),
            global: PeakNotch::new(sample_rate, params::GLOBAL_EQ_HZ),
        }
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.thickness_low.set_sample_rate(sample_rate);
        self.thickness_mid.set_sample_rate(sample_rate);
        self.presence_peak.set_sample_rate(sample_rate);
        self.presence_shelf.set_sample_rate(sample_rate);
        self.global.set_sample_rate(sample_rate);
    }

    /// Update band gains from the thickness and presence amounts (dB)
    #[inline]
    pub fn set_amounts(&self, thickness_db: f32, presence_db: f32) {
        self.thickness_low.set_gain(thickness_db);
        self.thickness_mid.set_gain(2.0 * thickness_db);
        self.presence_peak.set_gain(2.0 * presence_db);
        self.presence_shelf.set_gain(2.0 * presence_db);
    }

    #[inline]
    pub fn process_sample(&mut self, x: f32, channel: usize) -> f32 {
        let y = self.thickness_low.apply(x, channel);
        let y = self.thickness_mid.apply(y, channel);
        let y = self.presence_peak.apply(y, channel);
        let y = self.presence_shelf.apply(y, channel);
        self.global.apply(y, channel)
    }

    pub fn reset(&mut self) {
        self.thickness_low.reset();
        self.thickness_mid.reset();
        self.presence_peak.reset();
        self.presence_shelf.reset();
        self.global.reset();
    }
}
