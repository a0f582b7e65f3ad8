//! Offline host: renders a WAV file through the amp chain

use crate::error::{InfraError, Result};
use crate::wav::{read_wav, write_wav, WavAudio};
use invader_core::domain::audio::{AudioError, BlockContext};
use invader_core::domain::metering::METER_FLOOR_DB;
use invader_core::domain::pipeline::AmpProcessor;
use serde::Serialize;
use std::path::Path;
use tracing::{info, instrument};

/// Summary of one render pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderReport {
    pub frames: usize,
    pub blocks: usize,
    pub channels: usize,
    pub sample_rate: u32,
    /// Loudest block seen by the input meter (dB)
    pub peak_input_db: f32,
    /// Loudest block seen by the output meter (dB)
    pub peak_output_db: f32,
}

/// Feeds a prepared processor in fixed-size blocks, like a host would
#[derive(Debug, Clone)]
pub struct OfflineRenderer {
    block_size: usize,
    context: BlockContext,
    tail_seconds: f64,
}

impl OfflineRenderer {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
            context: BlockContext::default(),
            tail_seconds: 0.0,
        }
    }

    /// Report a fixed transport tempo to the delay
    pub fn with_tempo(mut self, bpm: f64) -> Self {
        self.context = BlockContext::with_tempo(bpm);
        self
    }

    /// Append silence so reverb and delay tails are rendered
    pub fn with_tail(mut self, seconds: f64) -> Self {
        self.tail_seconds = seconds.max(0.0);
        self
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn context(&self) -> &BlockContext {
        &self.context
    }

    /// Render `input` (its first two channels) through `processor`
    ///
    /// The processor must already be prepared for the input's sample rate
    /// and at least this renderer's block size.
    pub fn render(&self, processor: &mut AmpProcessor, input: &WavAudio) -> Result<(WavAudio, RenderReport)> {
        let rate = f64::from(input.sample_rate);
        if processor.sample_rate() != rate || processor.max_block() < self.block_size {
            return Err(AudioError::InvalidConfiguration(format!(
                "processor prepared for {} Hz / {} frames, render needs {} Hz / {} frames",
                processor.sample_rate(),
                processor.max_block(),
                rate,
                self.block_size
            ))
            .into());
        }

        let channels = input.channel_count().min(2);
        let tail = (self.tail_seconds * rate) as usize;
        let frames = input.frames() + tail;
        let mut output: Vec<Vec<f32>> = vec![vec![0.0; frames]; channels];
        for (out, src) in output.iter_mut().zip(&input.channels) {
            out[..src.len().min(frames)].copy_from_slice(&src[..src.len().min(frames)]);
        }

        let meters = processor.meters();
        let mut peak_input_db = METER_FLOOR_DB;
        let mut peak_output_db = METER_FLOOR_DB;
        let mut blocks = 0;
        let mut start = 0;
        while start < frames {
            let end = (start + self.block_size).min(frames);
            match output.as_mut_slice() {
                [mono] => processor.process(&mut [&mut mono[start..end]], &self.context),
                [left, right] => processor.process(
                    &mut [&mut left[start..end], &mut right[start..end]],
                    &self.context,
                ),
                _ => {}
            }
            peak_input_db = peak_input_db.max(meters.input_db());
            peak_output_db = peak_output_db.max(meters.output_db());
            blocks += 1;
            start = end;
        }

        let report = RenderReport {
            frames,
            blocks,
            channels,
            sample_rate: input.sample_rate,
            peak_input_db,
            peak_output_db,
        };
        Ok((WavAudio::new(output, input.sample_rate), report))
    }

    /// Read `input`, render it and write a 32-bit float WAV to `output`
    #[instrument(skip(self, processor), fields(input = %input.display(), output = %output.display()))]
    pub fn render_file(&self, processor: &mut AmpProcessor, input: &Path, output: &Path) -> Result<RenderReport> {
        let audio = read_wav(input)?;
        if audio.channel_count() == 0 || audio.frames() == 0 {
            return Err(InfraError::InvalidAudio {
                path: input.to_path_buf(),
                reason: "no frames".into(),
            });
        }
        let (rendered, report) = self.render(processor, &audio)?;
        write_wav(output, &rendered)?;
        info!(frames = report.frames, blocks = report.blocks, peak_output_db = report.peak_output_db, "Render complete");
        Ok(report)
    }
}
