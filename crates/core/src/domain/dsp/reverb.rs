//! Schroeder reverb
//!
//! Eight parallel damped combs feed four serial all-passes per channel. The
//! right channel's delay lines are 23 samples longer to decorrelate the
//! sides. All delay lines live in one contiguous arena allocated at
//! construction.
//!
//! The reverb writes its wet output into a ring buffer rather than back into
//! the dry signal, so the caller can read it back at an offset (pre-delay).
//! [`ReverbSend`] owns that ring and does the mix-back.

use super::{flush_denormal, params, BiquadCoeffs, BiquadFilter};
use tracing::debug;

const COMB_TUNING: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];
const ALLPASS_TUNING: [usize; 4] = [556, 441, 341, 225];
const STEREO_SPREAD: usize = 23;
const ALLPASS_FEEDBACK: f32 = 0.5;
const INPUT_SCALE: f32 = 0.015;

/// Amount-to-wet mapping: `wet = WET_SCALE * amount / WET_DIVISOR`
pub const WET_SCALE: f32 = 3.0;
pub const WET_DIVISOR: f32 = 1.666_666_666_666_7;

/// Default wet ring capacity in samples
pub const WET_RING_CAPACITY: usize = 32768;

/// Map the 0..1 "reverb" amount to the wet scalar
#[inline]
pub fn wet_from_amount(amount: f32) -> f32 {
    WET_SCALE * amount / WET_DIVISOR
}

#[derive(Debug, Clone, Copy)]
struct Comb {
    offset: usize,
    len: usize,
    index: usize,
    store: f32,
}

#[derive(Debug, Clone, Copy)]
struct AllPass {
    offset: usize,
    len: usize,
    index: usize,
}

/// Stereo Schroeder reverb network
#[derive(Debug)]
pub struct SchroederReverb {
    arena: Vec<f32>,
    combs: [[Comb; 8]; 2],
    allpasses: [[AllPass; 4]; 2],
    width: f32,
    wet: f32,
    damp: f32,
    decay: f32,
    highpass: [BiquadFilter; 2],
}

impl SchroederReverb {
    /// Create a reverb with the house voicing (width 1, damp 0.55, size 0.9)
    pub fn new(sample_rate: f32) -> Self {
        Self::with_voicing(sample_rate, 1.0, 0.55, 0.9)
    }

    pub fn with_voicing(sample_rate: f32, width: f32, damp: f32, size: f32) -> Self {
        let mut offset = 0;
        let mut take = |len: usize| {
            let start = offset;
            offset += len;
            start
        };

        let combs = std::array::from_fn(|ch| {
            std::array::from_fn(|j| {
                let len = COMB_TUNING[j] + ch * STEREO_SPREAD;
                Comb {
                    offset: take(len),
                    len,
                    index: 0,
                    store: 0.0,
                }
            })
        });
        let allpasses = std::array::from_fn(|ch| {
            std::array::from_fn(|j| {
                let len = ALLPASS_TUNING[j] + ch * STEREO_SPREAD;
                AllPass {
                    offset: take(len),
                    len,
                    index: 0,
                }
            })
        });

        let hp = BiquadCoeffs::highpass_prewarped(
            sample_rate,
            params::REVERB_HIGHPASS_HZ,
            std::f32::consts::FRAC_1_SQRT_2,
        );

        let reverb = Self {
            arena: vec![0.0; offset],
            combs,
            allpasses,
            width,
            wet: 0.0,
            damp: damp * 0.4,
            decay: 0.7 + 0.28 * size,
            highpass: [BiquadFilter::new(hp), BiquadFilter::new(hp)],
        };
        debug!(arena_len = reverb.arena.len(), sample_rate, "Reverb network allocated");
        reverb
    }

    pub fn set_wet(&mut self, wet: f32) {
        self.wet = wet;
    }

    pub fn wet(&self) -> f32 {
        self.wet
    }

    pub fn set_size(&mut self, size: f32) {
        self.decay = 0.7 + 0.28 * size.clamp(0.0, 1.0);
    }

    pub fn decay(&self) -> f32 {
        self.decay
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        let hp = BiquadCoeffs::highpass_prewarped(
            sample_rate,
            params::REVERB_HIGHPASS_HZ,
            std::f32::consts::FRAC_1_SQRT_2,
        );
        for filter in &mut self.highpass {
            filter.set_coeffs(hp);
        }
        self.reset();
    }

    #[inline]
    fn comb(arena: &mut [f32], comb: &mut Comb, input: f32, damp: f32, decay: f32) -> f32 {
        let line = &mut arena[comb.offset..comb.offset + comb.len];
        let output = line[comb.index];
        comb.store = flush_denormal(damp * comb.store + output * (1.0 - damp));
        line[comb.index] = decay * comb.store + input;
        comb.index += 1;
        if comb.index >= comb.len {
            comb.index = 0;
        }
        output
    }

    #[inline]
    fn allpass(arena: &mut [f32], ap: &mut AllPass, input: f32) -> f32 {
        let line = &mut arena[ap.offset..ap.offset + ap.len];
        let delayed = line[ap.index];
        line[ap.index] = flush_denormal(input + delayed * ALLPASS_FEEDBACK);
        ap.index += 1;
        if ap.index >= ap.len {
            ap.index = 0;
        }
        delayed - input
    }

    /// Run the network over a block
    ///
    /// Dry samples are scaled by `1 - wet / 3` in place. Wet samples are
    /// written to `wet_left`/`wet_right` starting at `*write_pos`, which is
    /// advanced and wrapped at the ring length. With no right channel the
    /// left input feeds both sides and the two wet sides are averaged into
    /// `wet_left`.
    pub fn apply(
        &mut self,
        left: &mut [f32],
        mut right: Option<&mut [f32]>,
        wet_left: &mut [f32],
        wet_right: &mut [f32],
        write_pos: &mut usize,
    ) {
        let ring_len = wet_left.len().min(wet_right.len());
        if ring_len == 0 {
            return;
        }
        let dry_mix = 1.0 - self.wet / 3.0;
        let wet1 = 0.5 * self.wet * (1.0 + self.width);
        let wet2 = 0.5 * self.wet * (1.0 - self.width);
        let mono = right.is_none();
        let mut wp = *write_pos % ring_len;

        for i in 0..left.len() {
            let r_in = match right.as_deref() {
                Some(r) => r[i],
                None => left[i],
            };
            let input = (left[i] + r_in) * INPUT_SCALE;

            let mut out_l = 0.0;
            let mut out_r = 0.0;
            for j in 0..COMB_TUNING.len() {
                out_l += Self::comb(&mut self.arena, &mut self.combs[0][j], input, self.damp, self.decay);
                out_r += Self::comb(&mut self.arena, &mut self.combs[1][j], input, self.damp, self.decay);
            }
            for j in 0..ALLPASS_TUNING.len() {
                out_l = Self::allpass(&mut self.arena, &mut self.allpasses[0][j], out_l);
                out_r = Self::allpass(&mut self.arena, &mut self.allpasses[1][j], out_r);
            }

            left[i] *= dry_mix;
            if let Some(r) = right.as_deref_mut() {
                r[i] *= dry_mix;
            }

            let wl = self.highpass[0].process_sample(self.wet * (out_l * wet1 + out_r * wet2));
            let wr = self.highpass[1].process_sample(self.wet * (out_r * wet1 + out_l * wet2));
            if mono {
                wet_left[wp] = 0.5 * wl + 0.5 * wr;
            } else {
                wet_left[wp] = wl;
            }
            wet_right[wp] = wr;

            wp += 1;
            if wp >= ring_len {
                wp = 0;
            }
        }
        *write_pos = wp;
    }

    pub fn reset(&mut self) {
        self.arena.fill(0.0);
        for comb in self.combs.iter_mut().flatten() {
            comb.index = 0;
            comb.store = 0.0;
        }
        for ap in self.allpasses.iter_mut().flatten() {
            ap.index = 0;
        }
        for filter in &mut self.highpass {
            filter.reset();
        }
    }
}

/// Reverb plus its pre-delayed wet ring buffer
#[derive(Debug)]
pub struct ReverbSend {
    reverb: SchroederReverb,
    wet_left: Vec<f32>,
    wet_right: Vec<f32>,
    write_pos: usize,
    read_pos: usize,
    pre_delay: usize,
}

impl ReverbSend {
    pub fn new(sample_rate: f32, capacity: usize, pre_delay_seconds: f32) -> Self {
        let capacity = capacity.max(1);
        let pre_delay = ((sample_rate * pre_delay_seconds) as usize).min(capacity - 1);
        Self {
            reverb: SchroederReverb::new(sample_rate),
            wet_left: vec![0.0; capacity],
            wet_right: vec![0.0; capacity],
            write_pos: pre_delay,
            read_pos: 0,
            pre_delay,
        }
    }

    /// Pre-delay between wet write and read, in samples
    pub fn pre_delay(&self) -> usize {
        self.pre_delay
    }

    pub fn reverb(&self) -> &SchroederReverb {
        &self.reverb
    }

    /// Mix the reverb into the block for the given 0..1 amount
    ///
    /// Does nothing at all (not even advancing the ring) when the amount maps
    /// to zero wet.
    pub fn process(&mut self, amount: f32, left: &mut [f32], mut right: Option<&mut [f32]>) {
        let wet = wet_from_amount(amount);
        self.reverb.set_wet(wet);
        if wet <= 0.0 {
            return;
        }

        self.reverb.apply(
            left,
            right.as_deref_mut(),
            &mut self.wet_left,
            &mut self.wet_right,
            &mut self.write_pos,
        );

        let ring_len = self.wet_left.len();
        for i in 0..left.len() {
            left[i] += self.wet_left[self.read_pos];
            if let Some(r) = right.as_deref_mut() {
                r[i] += self.wet_right[self.read_pos];
            }
            self.read_pos += 1;
            if self.read_pos >= ring_len {
                self.read_pos = 0;
            }
        }
    }

    /// Rebuild for a new rate; clears all state
    pub fn set_sample_rate(&mut self, sample_rate: f32, pre_delay_seconds: f32) {
        let capacity = self.wet_left.len();
        self.reverb.set_sample_rate(sample_rate);
        self.pre_delay = ((sample_rate * pre_delay_seconds) as usize).min(capacity - 1);
        self.reset();
    }

    pub fn reset(&mut self) {
        self.reverb.reset();
        self.wet_left.fill(0.0);
        self.wet_right.fill(0.0);
        self.write_pos = self.pre_delay;
        self.read_pos = 0;
    }
}
