//! Offline sinks: WAV files and in-memory capture.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::backend::{BlockDescriptor, DeviceBackend, SinkStatus};
use crate::{Error, Result};

/// Renders blocks into a 32-bit float WAV file.
///
/// Behaves like a device with no clock: it always wants the next block, so an
/// offline render runs as fast as the engine computes. `suspend` finalizes
/// the file header.
pub struct WavSink {
    path: PathBuf,
    descriptor: BlockDescriptor,
    channels: usize,
    writer: Option<WavWriter<BufWriter<File>>>,
}

impl WavSink {
    /// Creates a sink writing to `path` at the given rate.
    pub fn new(path: impl AsRef<Path>, sample_rate: f32, block_frames: usize, channels: usize) -> Self {
        Self {
            path: path.as_ref().to_owned(),
            descriptor: BlockDescriptor {
                sample_rate,
                block_frames,
                watermark_frames: 0,
            },
            channels,
            writer: None,
        }
    }
}

impl DeviceBackend for WavSink {
    fn open(&mut self) -> Result<BlockDescriptor> {
        let spec = WavSpec {
            channels: self.channels as u16,
            sample_rate: self.descriptor.sample_rate as u32,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        self.writer = Some(WavWriter::create(&self.path, spec)?);
        Ok(self.descriptor)
    }

    fn write_block(&mut self, channels: &[&[f32]]) -> Result<SinkStatus> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::Device("sink not open".into()))?;
        for frame in 0..self.descriptor.block_frames {
            for ch in 0..self.channels {
                let sample = channels.get(ch).map_or(0.0, |block| block[frame]);
                writer.write_sample(sample)?;
            }
        }
        Ok(SinkStatus::Ok)
    }

    fn needs_block(&self) -> bool {
        self.writer.is_some()
    }

    fn max_wait(&self) -> Option<Duration> {
        None
    }

    fn suspend(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
        }
        Ok(())
    }
}

/// Captures delivered blocks in memory, one `Vec` per channel.
///
/// Test double for [`DeviceBackend`]; optionally fakes an underrun on a
/// chosen block to exercise recovery paths.
pub struct MemorySink {
    descriptor: BlockDescriptor,
    channels: usize,
    open: bool,
    /// Captured samples per channel.
    pub captured: Vec<Vec<f32>>,
    /// Report an underrun when this many blocks have been written.
    pub underrun_after: Option<usize>,
    blocks_written: usize,
}

impl MemorySink {
    /// Creates a sink with the given negotiated timing.
    pub fn new(sample_rate: f32, block_frames: usize, channels: usize) -> Self {
        Self {
            descriptor: BlockDescriptor {
                sample_rate,
                block_frames,
                watermark_frames: 0,
            },
            channels,
            open: false,
            captured: vec![Vec::new(); channels],
            underrun_after: None,
            blocks_written: 0,
        }
    }

    /// Blocks delivered so far.
    pub fn blocks_written(&self) -> usize {
        self.blocks_written
    }
}

impl DeviceBackend for MemorySink {
    fn open(&mut self) -> Result<BlockDescriptor> {
        self.open = true;
        Ok(self.descriptor)
    }

    fn write_block(&mut self, channels: &[&[f32]]) -> Result<SinkStatus> {
        if !self.open {
            return Err(Error::Device("sink not open".into()));
        }
        for ch in 0..self.channels {
            let captured = &mut self.captured[ch];
            match channels.get(ch) {
                Some(block) => captured.extend_from_slice(&block[..self.descriptor.block_frames]),
                None => captured.extend(std::iter::repeat_n(0.0, self.descriptor.block_frames)),
            }
        }
        self.blocks_written += 1;
        if self.underrun_after == Some(self.blocks_written) {
            return Ok(SinkStatus::Underrun);
        }
        Ok(SinkStatus::Ok)
    }

    fn needs_block(&self) -> bool {
        self.open
    }

    fn max_wait(&self) -> Option<Duration> {
        None
    }

    fn suspend(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }
}
