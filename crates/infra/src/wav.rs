//! WAV file I/O
//!
//! Integer PCM of any bit depth is scaled to `[-1, 1)`. Output is always
//! 32-bit float so the chain's headroom survives the round trip.

use crate::error::{InfraError, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use invader_core::domain::ir::IrData;
use std::path::Path;
use tracing::debug;

/// Deinterleaved audio with its sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct WavAudio {
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl WavAudio {
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        Self {
            channels,
            sample_rate,
        }
    }

    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

/// Decode a WAV file into per-channel buffers
pub fn read_wav(path: impl AsRef<Path>) -> Result<WavAudio> {
    let path = path.as_ref();
    let mut reader = WavReader::open(path).map_err(|e| InfraError::wav(path, e))?;
    let spec = reader.spec();
    if spec.channels == 0 || spec.sample_rate == 0 {
        return Err(InfraError::InvalidAudio {
            path: path.to_path_buf(),
            reason: format!("{} channels at {} Hz", spec.channels, spec.sample_rate),
        });
    }

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| InfraError::wav(path, e))?,
        SampleFormat::Int => {
            let scale = 1.0 / (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| InfraError::wav(path, e))?
        }
    };

    let count = usize::from(spec.channels);
    let frames = interleaved.len() / count;
    let mut channels = vec![Vec::with_capacity(frames); count];
    for frame in interleaved.chunks_exact(count) {
        for (channel, &sample) in channels.iter_mut().zip(frame) {
            channel.push(sample);
        }
    }

    debug!(path = %path.display(), frames, channels = count, rate = spec.sample_rate, "Decoded WAV");
    Ok(WavAudio::new(channels, spec.sample_rate))
}

/// Encode per-channel buffers as a 32-bit float WAV file
pub fn write_wav(path: impl AsRef<Path>, audio: &WavAudio) -> Result<()> {
    let path = path.as_ref();
    let channels = u16::try_from(audio.channel_count())
        .ok()
        .filter(|c| *c > 0)
        .ok_or_else(|| InfraError::InvalidAudio {
            path: path.to_path_buf(),
            reason: format!("cannot write {} channels", audio.channel_count()),
        })?;

    let spec = WavSpec {
        channels,
        sample_rate: audio.sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec).map_err(|e| InfraError::wav(path, e))?;
    for frame in 0..audio.frames() {
        for channel in &audio.channels {
            let sample = channel.get(frame).copied().unwrap_or(0.0);
            writer
                .write_sample(sample)
                .map_err(|e| InfraError::wav(path, e))?;
        }
    }
    writer.finalize().map_err(|e| InfraError::wav(path, e))?;
    debug!(path = %path.display(), frames = audio.frames(), "Wrote WAV");
    Ok(())
}

/// Read an impulse response; only the first channel is used
pub fn read_ir(path: impl AsRef<Path>) -> Result<IrData> {
    let path = path.as_ref();
    let audio = read_wav(path)?;
    let samples = audio.channels.into_iter().next().unwrap_or_default();
    if samples.is_empty() {
        return Err(InfraError::InvalidAudio {
            path: path.to_path_buf(),
            reason: "no frames".into(),
        });
    }
    Ok(IrData::new(samples, f64::from(audio.sample_rate)))
}
