//! Resona IO - device and host-loop integration for the Resona engine
//!
//! This crate connects an engine core to the outside world:
//!
//! - **Device sinks**: [`DeviceBackend`] abstracts a PCM output; [`CpalBackend`]
//!   drives real hardware, [`WavSink`] renders offline, [`MemorySink`] captures
//!   blocks for tests
//! - **MIDI sources**: [`MidiSource`] delivers decoded events per block;
//!   [`ScriptedMidi`] replays a fixed event list for offline rendering
//! - **Engine loop**: [`EngineContext`] owns the Idle/Active lifecycle,
//!   all-or-nothing device activation, and the per-cycle drive of the core
//! - **Poll contract**: [`LoopSource`] exposes prepare/check/dispatch so a
//!   host event loop can own the OS-level wait instead of the engine owning
//!   a thread

mod backend;
mod context;
mod cpal_backend;
mod midi;
mod poll;
mod wav;

pub use backend::{BlockDescriptor, DeviceBackend, SinkStatus};
pub use context::{EngineContext, EngineState, MidiHandler};
pub use cpal_backend::CpalBackend;
pub use midi::{MidiSource, ScriptedMidi};
pub use poll::{LoopSource, PollFd, run_host_loop};
pub use wav::{MemorySink, WavSink};

/// Error types for device and host-loop operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// WAV file read/write error.
    #[error("WAV file error: {0}")]
    Wav(#[from] hound::Error),

    /// Device open/configuration/runtime error.
    #[error("device error: {0}")]
    Device(String),

    /// No audio device available on the system.
    #[error("no audio device available")]
    NoDevice,

    /// The device only offers sample formats we do not speak.
    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),

    /// Engine-side failure while driving the loop.
    #[error(transparent)]
    Engine(#[from] resona_engine::EngineError),

    /// The context is not in the state the operation requires.
    #[error("engine context is {0}")]
    WrongState(EngineState),

    /// Standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type for device and host-loop operations.
pub type Result<T> = std::result::Result<T, Error>;
