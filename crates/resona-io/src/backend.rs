//! Pluggable device sink abstraction.
//!
//! [`DeviceBackend`] decouples the engine loop from any specific output path:
//! [`CpalBackend`](crate::CpalBackend) for live hardware, [`WavSink`](crate::WavSink)
//! for offline rendering, [`MemorySink`](crate::MemorySink) for deterministic
//! tests. The trait is object-safe so the backend is chosen at runtime.
//!
//! The engine calls `open` once when activating, `write_block` with
//! non-interleaved channel blocks each cycle, and `suspend` when going idle.
//! `needs_block`/`max_wait` feed the host poll contract: they tell the loop
//! whether a block is due immediately and how long it may sleep otherwise.

use core::time::Duration;

use crate::Result;

/// Timing the device negotiated at open.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlockDescriptor {
    /// Sample rate in Hz.
    pub sample_rate: f32,
    /// Frames the engine should compute per block.
    pub block_frames: usize,
    /// Frames the device buffers ahead; the loop keeps it at least this full.
    pub watermark_frames: usize,
}

/// Outcome of delivering one block to the sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkStatus {
    /// Block accepted in time.
    Ok,
    /// The device ran dry since the previous block.
    Underrun,
}

/// A PCM output the engine delivers blocks to.
pub trait DeviceBackend {
    /// Opens the device and negotiates block timing.
    fn open(&mut self) -> Result<BlockDescriptor>;

    /// Delivers one block, one slice per channel, each `block_frames` long.
    ///
    /// Channels beyond what the device offers are dropped; missing channels
    /// play silence.
    fn write_block(&mut self, channels: &[&[f32]]) -> Result<SinkStatus>;

    /// Whether the device has room for another block right now.
    fn needs_block(&self) -> bool;

    /// How long the host loop may wait before the next block is due.
    ///
    /// `None` means no deadline (the sink accepts blocks whenever).
    fn max_wait(&self) -> Option<Duration>;

    /// Stops the device and releases its resources. The backend may be
    /// reopened later.
    fn suspend(&mut self) -> Result<()>;
}
