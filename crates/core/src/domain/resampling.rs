//! Sample-rate adaptation around fixed-rate processing units
//!
//! [`ResamplingContainer`] runs a unit that only works at its native rate
//! (an amp model) inside a host running at any rate: host blocks are
//! converted up or down, fed to the unit in native-rate chunks, and
//! converted back. [`resample_offline`] converts whole buffers (impulse
//! responses) on the control thread.

use crate::domain::audio::{AudioError, Result};
use rubato::{FftFixedIn, FftFixedInOut, Resampler};
use std::collections::VecDeque;
use tracing::{debug, info};

/// Chunk size requested from the FFT resamplers
const CHUNK_HINT: usize = 256;

fn resampler_error(e: impl std::fmt::Display) -> AudioError {
    AudioError::Resampler(e.to_string())
}

/// Converter pair plus the FIFOs that glue host blocks to native chunks
struct ResamplerPair {
    host_rate: f64,
    max_block: usize,
    up: FftFixedInOut<f32>,
    down: FftFixedInOut<f32>,
    host_fifo: Vec<f32>,
    up_out: Vec<Vec<f32>>,
    native_out: Vec<f32>,
    native_fifo: Vec<f32>,
    down_out: Vec<Vec<f32>>,
    out_fifo: VecDeque<f32>,
    priming: usize,
}

impl ResamplerPair {
    fn new(host_rate: f64, native_rate: f64, max_block: usize) -> Result<Self> {
        let up = FftFixedInOut::<f32>::new(
            host_rate as usize,
            native_rate as usize,
            CHUNK_HINT,
            1,
        )
        .map_err(resampler_error)?;
        let up_in = up.input_frames_next();
        let up_out_len = up.output_frames_next();

        let down = FftFixedInOut::<f32>::new(
            native_rate as usize,
            host_rate as usize,
            up_out_len,
            1,
        )
        .map_err(resampler_error)?;
        let down_in = down.input_frames_next();
        let down_out_len = down.output_frames_next();

        // Enough host-rate lead that a block never drains the output FIFO
        let priming = up_in + down_out_len;
        let out_capacity = priming + max_block + 2 * down_out_len;

        let up_out = up.output_buffer_allocate(true);
        let down_out = down.output_buffer_allocate(true);

        let mut pair = Self {
            host_rate,
            max_block,
            up,
            down,
            host_fifo: Vec::with_capacity(up_in + max_block),
            up_out,
            native_out: vec![0.0; up_out_len],
            native_fifo: Vec::with_capacity(down_in + up_out_len),
            down_out,
            out_fifo: VecDeque::with_capacity(out_capacity),
            priming,
        };
        pair.clear();
        Ok(pair)
    }

    fn clear(&mut self) {
        self.up.reset();
        self.down.reset();
        self.host_fifo.clear();
        self.native_fifo.clear();
        self.out_fifo.clear();
        self.out_fifo.extend(std::iter::repeat(0.0).take(self.priming));
    }

    fn process<F>(&mut self, input: &[f32], output: &mut [f32], process_fn: &mut F) -> Result<()>
    where
        F: FnMut(&[f32], &mut [f32]),
    {
        self.host_fifo.extend_from_slice(input);

        loop {
            let needed = self.up.input_frames_next();
            if self.host_fifo.len() < needed {
                break;
            }
            let (_, produced) = self
                .up
                .process_into_buffer(&[&self.host_fifo[..needed]], &mut self.up_out, None)
                .map_err(resampler_error)?;
            self.host_fifo.drain(..needed);

            let native_out = &mut self.native_out[..produced];
            process_fn(&self.up_out[0][..produced], native_out);
            self.native_fifo.extend_from_slice(native_out);

            loop {
                let needed = self.down.input_frames_next();
                if self.native_fifo.len() < needed {
                    break;
                }
                let (_, produced) = self
                    .down
                    .process_into_buffer(&[&self.native_fifo[..needed]], &mut self.down_out, None)
                    .map_err(resampler_error)?;
                self.native_fifo.drain(..needed);
                self.out_fifo
                    .extend(self.down_out[0][..produced].iter().copied());
            }
        }

        for sample in output.iter_mut() {
            *sample = self.out_fifo.pop_front().unwrap_or(0.0);
        }
        Ok(())
    }
}

enum Mode {
    Passthrough { host_rate: f64, max_block: usize },
    Resampling(Box<ResamplerPair>),
}

/// Runs a native-rate mono processing function at the host rate
///
/// `reset` must be called (off the audio thread) before the first
/// `process_block` and after every host rate change. It is idempotent.
pub struct ResamplingContainer {
    native_rate: f64,
    mode: Option<Mode>,
}

impl ResamplingContainer {
    pub fn new(native_rate: f64) -> Self {
        Self {
            native_rate,
            mode: None,
        }
    }

    pub fn native_rate(&self) -> f64 {
        self.native_rate
    }

    pub fn is_ready(&self) -> bool {
        self.mode.is_some()
    }

    /// Whether host and native rates differ
    pub fn is_resampling(&self) -> bool {
        matches!(self.mode, Some(Mode::Resampling(_)))
    }

    /// Host-rate latency added by the conversion, excluding filter delay
    pub fn latency_frames(&self) -> usize {
        match &self.mode {
            Some(Mode::Resampling(pair)) => pair.priming,
            _ => 0,
        }
    }

    /// Configure for a host rate and block size
    pub fn reset(&mut self, host_rate: f64, max_block: usize) -> Result<()> {
        if !(host_rate.is_finite() && host_rate > 0.0) || max_block == 0 {
            return Err(AudioError::InvalidConfiguration(format!(
                "host rate {host_rate} / max block {max_block}"
            )));
        }

        match &mut self.mode {
            Some(Mode::Passthrough {
                host_rate: rate,
                max_block: block,
            }) if *rate == host_rate && *block == max_block => return Ok(()),
            Some(Mode::Resampling(pair))
                if pair.host_rate == host_rate && pair.max_block == max_block =>
            {
                pair.clear();
                return Ok(());
            }
            _ => {}
        }

        if host_rate == self.native_rate {
            debug!(host_rate, "Native rate matches host, bypassing resampling");
            self.mode = Some(Mode::Passthrough {
                host_rate,
                max_block,
            });
        } else {
            info!(
                host_rate,
                native_rate = self.native_rate,
                "Creating resampling container"
            );
            let pair = ResamplerPair::new(host_rate, self.native_rate, max_block)?;
            self.mode = Some(Mode::Resampling(Box::new(pair)));
        }
        Ok(())
    }

    /// Process one host block through `process_fn`
    ///
    /// `process_fn` receives native-rate chunks of varying length and must
    /// fill its output slice completely.
    pub fn process_block<F>(&mut self, input: &[f32], output: &mut [f32], mut process_fn: F) -> Result<()>
    where
        F: FnMut(&[f32], &mut [f32]),
    {
        if input.len() != output.len() {
            return Err(AudioError::InvalidConfiguration(
                "input and output block lengths differ".into(),
            ));
        }
        match &mut self.mode {
            None => Err(AudioError::ResamplerNotReset(
                "process_block called before reset".into(),
            )),
            Some(Mode::Passthrough { max_block, .. }) => {
                if input.len() > *max_block {
                    return Err(AudioError::BlockTooLarge {
                        got: input.len(),
                        max: *max_block,
                    });
                }
                process_fn(input, output);
                Ok(())
            }
            Some(Mode::Resampling(pair)) => {
                if input.len() > pair.max_block {
                    return Err(AudioError::BlockTooLarge {
                        got: input.len(),
                        max: pair.max_block,
                    });
                }
                pair.process(input, output, &mut process_fn)
            }
        }
    }
}

impl std::fmt::Debug for ResamplingContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResamplingContainer")
            .field("native_rate", &self.native_rate)
            .field("ready", &self.is_ready())
            .field("resampling", &self.is_resampling())
            .finish()
    }
}

/// Resample a whole mono buffer, compensating the resampler delay
///
/// Output length is `ceil(len * to / from)`.
pub fn resample_offline(samples: &[f32], from_rate: f64, to_rate: f64) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    let mut resampler = FftFixedIn::<f32>::new(
        from_rate as usize,
        to_rate as usize,
        CHUNK_HINT * 4,
        2,
        1,
    )
    .map_err(resampler_error)?;

    let expected = (samples.len() as f64 * to_rate / from_rate).ceil() as usize;
    let delay = resampler.output_delay();
    let mut output = Vec::with_capacity(expected + delay + CHUNK_HINT * 8);
    let mut chunk = vec![0.0_f32; resampler.input_frames_max()];

    let mut pos = 0;
    while output.len() < expected + delay {
        let needed = resampler.input_frames_next();
        chunk.resize(needed, 0.0);
        chunk.fill(0.0);
        if pos < samples.len() {
            let take = needed.min(samples.len() - pos);
            chunk[..take].copy_from_slice(&samples[pos..pos + take]);
        }
        pos += needed;

        let out = resampler
            .process(&[chunk.as_slice()], None)
            .map_err(resampler_error)?;
        output.extend_from_slice(&out[0]);
    }

    output.drain(..delay);
    output.truncate(expected);
    Ok(output)
}
