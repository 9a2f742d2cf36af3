//! The process-wide engine context: explicit device lifecycle and the
//! per-cycle drive of an engine core.
//!
//! One [`EngineContext`] value holds the engine core, the PCM sink, and the
//! optional MIDI source. Activation is all-or-nothing: if the MIDI source
//! fails to open, the already-opened PCM device is suspended again and the
//! context stays Idle. Suspension drains the commit queue first so no
//! transaction (or synchronous committer) is stranded by teardown.

use core::fmt;
use std::time::Duration;

use resona_engine::{
    BlockRate, EngineCore, EngineError, EngineHandle, OutputRef, RuntimeFault,
};
use resona_net::MidiEvent;

use crate::backend::{BlockDescriptor, DeviceBackend, SinkStatus};
use crate::midi::MidiSource;
use crate::poll::{LoopSource, PollFd};
use crate::{Error, Result};

/// Lifecycle state of an [`EngineContext`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    /// No device open; no blocks are computed.
    Idle,
    /// Device open; blocks are computed each cycle.
    Active,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Active => write!(f, "active"),
        }
    }
}

/// Callback invoked for each MIDI event, with a handle to commit against.
pub type MidiHandler = Box<dyn FnMut(MidiEvent, &EngineHandle)>;

/// Engine core plus its device collaborators, with an explicit
/// activate/suspend lifecycle.
pub struct EngineContext {
    core: EngineCore,
    handle: EngineHandle,
    pcm: Box<dyn DeviceBackend>,
    midi: Option<Box<dyn MidiSource>>,
    midi_handler: Option<MidiHandler>,
    state: EngineState,
    descriptor: Option<BlockDescriptor>,
    events: Vec<MidiEvent>,
}

impl EngineContext {
    /// Creates an idle context around a fresh engine core.
    pub fn new(pcm: Box<dyn DeviceBackend>) -> Self {
        let (core, handle) = EngineCore::new();
        Self {
            core,
            handle,
            pcm,
            midi: None,
            midi_handler: None,
            state: EngineState::Idle,
            descriptor: None,
            events: Vec::new(),
        }
    }

    /// Attaches a MIDI source; it opens and suspends with the PCM device.
    pub fn set_midi_source(&mut self, source: Box<dyn MidiSource>) {
        self.midi = Some(source);
    }

    /// Installs the callback that turns MIDI events into transactions.
    pub fn set_midi_handler(&mut self, handler: MidiHandler) {
        self.midi_handler = Some(handler);
    }

    /// A control-domain handle onto the engine.
    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Timing negotiated at activation, while Active.
    pub fn descriptor(&self) -> Option<BlockDescriptor> {
        self.descriptor
    }

    /// Read access to the engine core for queries.
    pub fn engine(&self) -> &EngineCore {
        &self.core
    }

    /// Selects which output streams feed the device, in channel order.
    pub fn set_output_taps(&mut self, taps: Vec<OutputRef>) {
        self.core.set_output_taps(taps);
    }

    /// Removes and returns the engine's retained faults.
    pub fn take_faults(&mut self) -> Vec<RuntimeFault> {
        self.core.take_faults()
    }

    /// Opens the devices and establishes the block rate.
    ///
    /// All-or-nothing: if the MIDI source fails after the PCM device opened,
    /// the PCM device is suspended again and the error is returned with the
    /// context still Idle.
    pub fn activate(&mut self) -> Result<()> {
        if self.state == EngineState::Active {
            return Err(Error::WrongState(self.state));
        }
        let descriptor = self.pcm.open()?;
        if let Some(midi) = &mut self.midi {
            if let Err(err) = midi.open() {
                let _ = self.pcm.suspend();
                return Err(err);
            }
        }
        self.core.establish(BlockRate {
            sample_rate: descriptor.sample_rate,
            block_frames: descriptor.block_frames,
        });
        self.descriptor = Some(descriptor);
        self.state = EngineState::Active;
        Ok(())
    }

    /// Drains pending commits, then suspends the devices.
    ///
    /// Idempotent: suspending an idle context is a no-op. Both devices are
    /// torn down and the context reaches Idle even when one of them fails to
    /// suspend; the first failure is returned afterwards.
    pub fn suspend(&mut self) -> Result<()> {
        if self.state == EngineState::Idle {
            return Ok(());
        }
        self.core.drain_pending();
        self.handle.collect_retired();
        let pcm = self.pcm.suspend();
        let midi = match &mut self.midi {
            Some(midi) => midi.suspend(),
            None => Ok(()),
        };
        self.descriptor = None;
        self.state = EngineState::Idle;
        pcm.and(midi)
    }

    /// Performs one Active cycle: polls MIDI, absorbs commits, computes one
    /// block, and delivers it to the PCM sink.
    ///
    /// A sink underrun resets every module (stale filter and envelope state
    /// would otherwise resume mid-phrase) and is logged as a fault. A missed
    /// schedule deadline forces the context back to Idle and surfaces the
    /// error, since a late block is worse than silence.
    pub fn dispatch_cycle(&mut self) -> Result<()> {
        if self.state != EngineState::Active {
            return Err(Error::WrongState(self.state));
        }

        if let Some(midi) = &mut self.midi {
            self.events.clear();
            midi.poll_events(self.core.tick(), &mut self.events)?;
            if let Some(handler) = &mut self.midi_handler {
                for event in self.events.drain(..) {
                    handler(event, &self.handle);
                }
            }
        }

        let Self { core, pcm, .. } = self;
        let mut delivery: Result<SinkStatus> = Ok(SinkStatus::Ok);
        let cycle = core.cycle(|blocks| delivery = pcm.write_block(blocks));
        if let Err(err) = cycle {
            if matches!(err, EngineError::ScheduleDeadline { .. }) {
                self.force_idle();
            }
            return Err(Error::Engine(err));
        }

        if delivery? == SinkStatus::Underrun {
            let tick = self.core.tick();
            self.core.record_fault(RuntimeFault::Underrun { tick });
            self.core.reset_modules()?;
        }
        Ok(())
    }

    /// Emergency teardown after a fatal cycle error; device errors during it
    /// are swallowed because there is no better state to reach than Idle.
    fn force_idle(&mut self) {
        let _ = self.pcm.suspend();
        if let Some(midi) = &mut self.midi {
            let _ = midi.suspend();
        }
        self.descriptor = None;
        self.state = EngineState::Idle;
    }
}

impl LoopSource for EngineContext {
    fn prepare(&mut self, timeout: &mut Option<Duration>) -> bool {
        if self.state != EngineState::Active {
            *timeout = None;
            return false;
        }
        if self.pcm.needs_block() {
            *timeout = Some(Duration::ZERO);
            true
        } else {
            *timeout = self.pcm.max_wait();
            false
        }
    }

    fn check(&mut self, fds: &[PollFd]) -> bool {
        self.state == EngineState::Active
            && (self.pcm.needs_block() || fds.iter().any(|fd| fd.revents != 0))
    }

    fn dispatch(&mut self) -> Result<()> {
        self.dispatch_cycle()
    }
}
