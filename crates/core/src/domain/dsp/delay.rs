//! Tempo-synced feedback delay
//!
//! One ring buffer of `3 * sample_rate` samples per channel. The read and
//! write position advance modulo the *requested* delay length, which is
//! clamped to `[1, capacity]` on every block so a tempo or division change
//! can never index past the buffer.

use super::{params, BiquadCoeffs, BiquadFilter};
use tracing::debug;

/// Maximum delay time in seconds (ring capacity)
pub const MAX_DELAY_SECONDS: f64 = 3.0;

/// Feedback before the first mapping is applied
pub const DEFAULT_FEEDBACK: f32 = -0.4;

/// Settings derived from the single "delay mix" knob
///
/// Three independent piecewise curves: musical division (in beats), wet mix
/// and feedback amount.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelayMapping {
    pub division: f64,
    pub mix: f32,
    pub feedback: f32,
}

impl DelayMapping {
    pub fn from_amount(amount: f32) -> Self {
        let d = amount.clamp(0.0, 1.0);

        let division = if d <= 0.2 {
            0.125
        } else if d <= 0.4 {
            0.25
        } else if d <= 0.6 {
            0.5
        } else if d <= 0.8 {
            0.75
        } else {
            1.5
        };

        let mix = if d <= 0.2 {
            d * 0.9
        } else if d <= 0.5 {
            0.4 * d + 0.1
        } else {
            0.2 * d + 0.2
        };

        let feedback = if d <= 0.25 {
            0.8 * d
        } else if d <= 0.6 {
            (0.2 / 0.35) * d + 0.057_142_857_14
        } else if d <= 0.8 {
            d - 0.2
        } else {
            0.75 * d
        };

        Self {
            division,
            mix,
            feedback,
        }
    }

    /// Delay length in samples for a tempo, clamped to `[1, capacity]`
    pub fn delay_samples(&self, sample_rate: f64, bpm: f64, capacity: usize) -> usize {
        let samples_per_beat = sample_rate * (60.0 / bpm);
        // float-to-int casts saturate: NaN becomes 0, infinity becomes usize::MAX
        let raw = (samples_per_beat * self.division) as usize;
        raw.clamp(1, capacity.max(1))
    }
}

/// Feedback delay line with highpass/lowpass shaping on the repeats
#[derive(Debug)]
pub struct TempoDelay {
    buffer: Vec<f32>,
    index: usize,
    delay_samples: usize,
    feedback: f32,
    level: f32,
    highpass: BiquadFilter,
    lowpass: BiquadFilter,
}

impl TempoDelay {
    pub fn new(sample_rate: f64) -> Self {
        let capacity = Self::capacity_for(sample_rate);
        let sr = sample_rate as f32;
        Self {
            buffer: vec![0.0; capacity],
            index: 0,
            delay_samples: capacity,
            feedback: DEFAULT_FEEDBACK,
            level: 1.0,
            highpass: BiquadFilter::new(BiquadCoeffs::highpass(sr, params::DELAY_HIGHPASS_HZ, params::BUTTERWORTH_Q)),
            lowpass: BiquadFilter::new(BiquadCoeffs::lowpass(sr, params::DELAY_LOWPASS_HZ, params::BUTTERWORTH_Q)),
        }
    }

    fn capacity_for(sample_rate: f64) -> usize {
        ((MAX_DELAY_SECONDS * sample_rate) as usize).max(1)
    }

    /// Ring capacity in samples
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn set_feedback(&mut self, feedback: f32) {
        self.feedback = feedback;
    }

    pub fn feedback(&self) -> f32 {
        self.feedback
    }

    /// Current read/write position
    pub fn position(&self) -> usize {
        self.index
    }

    /// Process a block in place
    ///
    /// `delay_samples` is clamped to the capacity; if the position lies past
    /// the new length it is wrapped before the first read.
    pub fn process(&mut self, data: &mut [f32], delay_samples: usize, mix: f32) {
        let delay = delay_samples.clamp(1, self.buffer.len());
        self.delay_samples = delay;
        if self.index >= delay {
            self.index %= delay;
        }

        for sample in data.iter_mut() {
            let dry = *sample;
            let repeat = self.lowpass.process_sample(self.highpass.process_sample(self.buffer[self.index]));

            *sample = (1.0 - mix) * dry + mix * self.level * repeat;
            self.buffer[self.index] = repeat * self.feedback + dry;

            self.index += 1;
            if self.index >= delay {
                self.index = 0;
            }
        }
    }

    /// Reallocate for a new sample rate (prepare-time only)
    pub fn reset(&mut self, sample_rate: f64) {
        let capacity = Self::capacity_for(sample_rate);
        self.buffer.clear();
        self.buffer.resize(capacity, 0.0);
        self.index = 0;
        self.delay_samples = capacity;

        let sr = sample_rate as f32;
        self.highpass = BiquadFilter::new(BiquadCoeffs::highpass(sr, params::DELAY_HIGHPASS_HZ, params::BUTTERWORTH_Q));
        self.lowpass = BiquadFilter::new(BiquadCoeffs::lowpass(sr, params::DELAY_LOWPASS_HZ, params::BUTTERWORTH_Q));
        debug!(capacity, "Delay line reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_mapping_breakpoints() {
        let m = DelayMapping::from_amount(0.1);
        assert_eq!(m.division, 0.125);
        assert!((m.mix - 0.09).abs() < 1e-6);
        assert!((m.feedback - 0.08).abs() < 1e-6);

        let m = DelayMapping::from_amount(0.25);
        assert_eq!(m.division, 0.25);
        assert!((m.mix - 0.2).abs() < 1e-6);
        assert!((m.feedback - 0.2).abs() < 1e-6);

        let m = DelayMapping::from_amount(0.45);
        assert_eq!(m.division, 0.5);
        assert!((m.mix - 0.28).abs() < 1e-6);
        assert!((m.feedback - (0.2 / 0.35 * 0.45 + 0.057_142_857)).abs() < 1e-5);

        let m = DelayMapping::from_amount(0.7);
        assert_eq!(m.division, 0.75);
        assert!((m.mix - 0.34).abs() < 1e-6);
        assert!((m.feedback - 0.5).abs() < 1e-6);

        let m = DelayMapping::from_amount(1.0);
        assert_eq!(m.division, 1.5);
        assert!((m.mix - 0.4).abs() < 1e-6);
        assert!((m.feedback - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_zero_amount_is_dry() {
        let m = DelayMapping::from_amount(0.0);
        assert_eq!(m.mix, 0.0);
        assert_eq!(m.feedback, 0.0);

        let mut delay = TempoDelay::new(48000.0);
        delay.set_feedback(m.feedback);
        let input: Vec<f32> = (0..1024).map(|i| (i as f32 * 0.01).sin()).collect();
        let mut data = input.clone();
        delay.process(&mut data, m.delay_samples(48000.0, 120.0, delay.capacity()), m.mix);
        assert_eq!(data, input);
    }

    #[test]
    fn test_delay_length_from_tempo() {
        let m = DelayMapping::from_amount(0.3);
        // quarter of a beat at 120 BPM, 48 kHz
        assert_eq!(m.delay_samples(48000.0, 120.0, 144_000), 6000);
        // clamped to capacity
        let m = DelayMapping::from_amount(1.0);
        assert_eq!(m.delay_samples(48000.0, 10.0, 144_000), 144_000);
        assert_eq!(m.delay_samples(48000.0, 0.0, 144_000), 144_000);
    }

    #[test]
    fn test_echo_arrives_after_delay() {
        let mut delay = TempoDelay::new(48000.0);
        delay.set_feedback(0.0);
        let mut data = vec![0.0; 4000];
        data[0] = 1.0;
        delay.process(&mut data, 1000, 1.0);
        assert_eq!(data[0], 0.0);
        let peak = data
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
            .map(|(i, _)| i)
            .unwrap();
        assert!((1000..1010).contains(&peak), "echo peak at {peak}");
    }

    #[test]
    fn test_shrinking_delay_wraps_position() {
        let mut delay = TempoDelay::new(48000.0);
        let mut data = vec![0.1; 5000];
        delay.process(&mut data, 20_000, 0.5);
        assert_eq!(delay.position(), 5000);

        let mut data = vec![0.1; 64];
        delay.process(&mut data, 300, 0.5);
        assert!(delay.position() < 300);
    }

    #[test]
    fn test_oversized_request_is_clamped() {
        let mut delay = TempoDelay::new(1000.0);
        let mut data = vec![0.2; 10_000];
        delay.process(&mut data, usize::MAX, 0.5);
        assert!(delay.position() < delay.capacity());
        assert!(data.iter().all(|s| s.is_finite()));
    }

    proptest! {
        #[test]
        fn prop_delay_never_exceeds_capacity(
            amount in 0.0f32..=1.0,
            bpm in 40.0f64..=300.0,
            rate in prop::sample::select(vec![44100.0f64, 48000.0, 96000.0]),
        ) {
            let capacity = (3.0 * rate) as usize;
            let samples = DelayMapping::from_amount(amount).delay_samples(rate, bpm, capacity);
            prop_assert!(samples >= 1 && samples <= capacity);
        }

        #[test]
        fn prop_process_stays_in_bounds(
            amount in 0.0f32..=1.0,
            bpm in 40.0f64..=300.0,
            block in 1usize..512,
        ) {
            let rate = 44100.0;
            let mut delay = TempoDelay::new(rate);
            let mapping = DelayMapping::from_amount(amount);
            delay.set_feedback(mapping.feedback);
            let mut data = vec![0.25; block];
            for tempo in [bpm, 300.0, 40.0, bpm] {
                let samples = mapping.delay_samples(rate, tempo, delay.capacity());
                delay.process(&mut data, samples, mapping.mix);
                prop_assert!(delay.position() < samples);
            }
            prop_assert!(data.iter().all(|s| s.is_finite()));
        }
    }
}
