//! cpal-backed device sink.
//!
//! Blocks are interleaved into a lock-free SPSC ring; the cpal callback
//! drains it on the device's own thread. The callback never blocks: when the
//! ring runs dry it plays silence and bumps an underrun counter, which
//! `write_block` reports on its next call. The engine loop paces itself off
//! `needs_block`/`max_wait`, so the ring level doubles as the clock.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::backend::{BlockDescriptor, DeviceBackend, SinkStatus};
use crate::{Error, Result};

/// Frames of ring headroom, in blocks.
const RING_BLOCKS: usize = 4;
/// Blocks the loop keeps queued ahead of the callback.
const WATERMARK_BLOCKS: usize = 2;
/// Fallback when the device reports no fixed buffer size.
const DEFAULT_BLOCK_FRAMES: usize = 512;

/// Live audio output through the system's default cpal host.
pub struct CpalBackend {
    device_name: Option<String>,
    stream: Option<cpal::Stream>,
    producer: Option<rtrb::Producer<f32>>,
    underruns: Arc<AtomicU32>,
    underruns_seen: u32,
    channels: usize,
    descriptor: Option<BlockDescriptor>,
}

impl CpalBackend {
    /// Targets the system default output device.
    pub fn new() -> Self {
        Self {
            device_name: None,
            stream: None,
            producer: None,
            underruns: Arc::new(AtomicU32::new(0)),
            underruns_seen: 0,
            channels: 0,
            descriptor: None,
        }
    }

    /// Targets the first output device whose name contains `name`.
    pub fn with_device(name: impl Into<String>) -> Self {
        let mut backend = Self::new();
        backend.device_name = Some(name.into());
        backend
    }

    /// Output device names of the default host.
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| Error::Device(e.to_string()))?;
        Ok(devices.filter_map(|d| d.name().ok()).collect())
    }

    fn find_device(&self) -> Result<cpal::Device> {
        let host = cpal::default_host();
        match &self.device_name {
            None => host.default_output_device().ok_or(Error::NoDevice),
            Some(wanted) => {
                let mut devices = host
                    .output_devices()
                    .map_err(|e| Error::Device(e.to_string()))?;
                devices
                    .find(|d| d.name().is_ok_and(|n| n.contains(wanted)))
                    .ok_or(Error::NoDevice)
            }
        }
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceBackend for CpalBackend {
    fn open(&mut self) -> Result<BlockDescriptor> {
        let device = self.find_device()?;
        let config = device
            .default_output_config()
            .map_err(|e| Error::Device(e.to_string()))?;
        if config.sample_format() != cpal::SampleFormat::F32 {
            return Err(Error::UnsupportedFormat(format!(
                "{:?}",
                config.sample_format()
            )));
        }

        let sample_rate = config.sample_rate() as f32;
        let channels = usize::from(config.channels());
        let block_frames = match config.buffer_size() {
            cpal::SupportedBufferSize::Range { min, max } => {
                (DEFAULT_BLOCK_FRAMES as u32).clamp(*min, *max) as usize
            }
            cpal::SupportedBufferSize::Unknown => DEFAULT_BLOCK_FRAMES,
        };

        let ring_capacity = block_frames * channels * RING_BLOCKS;
        let (producer, mut consumer) = rtrb::RingBuffer::new(ring_capacity);
        let underruns = Arc::clone(&self.underruns);

        let stream = device
            .build_output_stream(
                &config.config(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut dry = false;
                    for sample in data.iter_mut() {
                        match consumer.pop() {
                            Ok(s) => *sample = s,
                            Err(_) => {
                                *sample = 0.0;
                                dry = true;
                            }
                        }
                    }
                    if dry {
                        underruns.fetch_add(1, Ordering::Relaxed);
                    }
                },
                |err| {
                    // The callback cannot surface errors; the underrun
                    // counter catches the audible consequence.
                    let _ = err;
                },
                None,
            )
            .map_err(|e| Error::Device(e.to_string()))?;
        stream.play().map_err(|e| Error::Device(e.to_string()))?;

        let descriptor = BlockDescriptor {
            sample_rate,
            block_frames,
            watermark_frames: block_frames * WATERMARK_BLOCKS,
        };
        self.stream = Some(stream);
        self.producer = Some(producer);
        self.channels = channels;
        self.underruns_seen = self.underruns.load(Ordering::Relaxed);
        self.descriptor = Some(descriptor);
        Ok(descriptor)
    }

    fn write_block(&mut self, channels: &[&[f32]]) -> Result<SinkStatus> {
        let descriptor = self
            .descriptor
            .ok_or_else(|| Error::Device("backend not open".into()))?;
        let producer = self
            .producer
            .as_mut()
            .ok_or_else(|| Error::Device("backend not open".into()))?;

        for frame in 0..descriptor.block_frames {
            for ch in 0..self.channels {
                let sample = channels.get(ch).map_or(0.0, |block| block[frame]);
                // Full ring means the device fell behind our pacing; the
                // sample is dropped rather than blocking the loop.
                let _ = producer.push(sample);
            }
        }

        let count = self.underruns.load(Ordering::Relaxed);
        if count != self.underruns_seen {
            self.underruns_seen = count;
            return Ok(SinkStatus::Underrun);
        }
        Ok(SinkStatus::Ok)
    }

    fn needs_block(&self) -> bool {
        let Some(descriptor) = self.descriptor else {
            return false;
        };
        let Some(producer) = &self.producer else {
            return false;
        };
        let queued_frames = (producer.buffer().capacity() - producer.slots()) / self.channels;
        queued_frames < descriptor.watermark_frames
    }

    fn max_wait(&self) -> Option<Duration> {
        let descriptor = self.descriptor?;
        let producer = self.producer.as_ref()?;
        let queued_frames = (producer.buffer().capacity() - producer.slots()) / self.channels;
        let slack = queued_frames.saturating_sub(descriptor.watermark_frames);
        Some(Duration::from_secs_f64(
            slack as f64 / f64::from(descriptor.sample_rate),
        ))
    }

    fn suspend(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            stream.pause().map_err(|e| Error::Device(e.to_string()))?;
        }
        self.producer = None;
        self.descriptor = None;
        self.channels = 0;
        Ok(())
    }
}
