//! Engine-context lifecycle tests against in-memory device doubles.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use resona_engine::{BlockRate, ModuleProcessor, ModuleSpec, OutputRef, ProcessIo, RuntimeFault};
use resona_io::{
    BlockDescriptor, DeviceBackend, EngineContext, EngineState, Error, MemorySink, MidiSource,
    Result, ScriptedMidi, SinkStatus, run_host_loop,
};
use resona_net::MidiEvent;

struct Const(f32);

impl ModuleProcessor for Const {
    fn process(&mut self, io: &mut ProcessIo<'_>) {
        let v = self.0;
        io.output(0).fill(v);
    }

    fn reset(&mut self, _rate: BlockRate) {}

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Counts reset calls so underrun recovery is observable.
struct ResetCounter(Arc<AtomicUsize>);

impl ModuleProcessor for ResetCounter {
    fn process(&mut self, _io: &mut ProcessIo<'_>) {}

    fn reset(&mut self, _rate: BlockRate) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// MIDI source whose `open` always fails.
struct BrokenMidi;

impl MidiSource for BrokenMidi {
    fn open(&mut self) -> Result<()> {
        Err(Error::NoDevice)
    }

    fn poll_events(&mut self, _tick: u64, _out: &mut Vec<MidiEvent>) -> Result<()> {
        Ok(())
    }

    fn suspend(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Sink that opens fine but refuses to suspend.
struct StuckSink;

impl DeviceBackend for StuckSink {
    fn open(&mut self) -> Result<BlockDescriptor> {
        Ok(BlockDescriptor {
            sample_rate: 48000.0,
            block_frames: 16,
            watermark_frames: 0,
        })
    }

    fn write_block(&mut self, _channels: &[&[f32]]) -> Result<SinkStatus> {
        Ok(SinkStatus::Ok)
    }

    fn needs_block(&self) -> bool {
        true
    }

    fn max_wait(&self) -> Option<Duration> {
        None
    }

    fn suspend(&mut self) -> Result<()> {
        Err(Error::Device("device refused to stop".into()))
    }
}

/// MIDI source that counts its suspend calls.
struct TrackingMidi(Arc<AtomicUsize>);

impl MidiSource for TrackingMidi {
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn poll_events(&mut self, _tick: u64, _out: &mut Vec<MidiEvent>) -> Result<()> {
        Ok(())
    }

    fn suspend(&mut self) -> Result<()> {
        self.0.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn integrate_const(ctx: &mut EngineContext, value: f32) -> OutputRef {
    let handle = ctx.handle();
    let mut t = handle.begin();
    let src = t.integrate(ModuleSpec::new(0, 0, 1, Box::new(Const(value))));
    handle.commit(t).unwrap();
    OutputRef {
        module: src,
        ostream: 0,
    }
}

#[test]
fn activation_establishes_the_device_rate() {
    let sink = MemorySink::new(44100.0, 128, 1);
    let mut ctx = EngineContext::new(Box::new(sink));
    assert_eq!(ctx.state(), EngineState::Idle);

    ctx.activate().unwrap();
    assert_eq!(ctx.state(), EngineState::Active);
    let rate = ctx.engine().rate().unwrap();
    assert_eq!(rate.sample_rate, 44100.0);
    assert_eq!(rate.block_frames, 128);

    // Double activation is refused.
    assert!(matches!(
        ctx.activate(),
        Err(Error::WrongState(EngineState::Active))
    ));
    ctx.suspend().unwrap();
    assert_eq!(ctx.state(), EngineState::Idle);
}

#[test]
fn failed_midi_open_rolls_back_the_pcm_device() {
    let sink = MemorySink::new(48000.0, 64, 1);
    let mut ctx = EngineContext::new(Box::new(sink));
    ctx.set_midi_source(Box::new(BrokenMidi));

    assert!(matches!(ctx.activate(), Err(Error::NoDevice)));
    assert_eq!(ctx.state(), EngineState::Idle);
    // Cycles are refused while idle.
    assert!(matches!(
        ctx.dispatch_cycle(),
        Err(Error::WrongState(EngineState::Idle))
    ));
}

#[test]
fn suspend_reaches_idle_even_when_the_device_fails() {
    let suspends = Arc::new(AtomicUsize::new(0));
    let mut ctx = EngineContext::new(Box::new(StuckSink));
    ctx.set_midi_source(Box::new(TrackingMidi(Arc::clone(&suspends))));
    ctx.activate().unwrap();

    // The device error surfaces, but the MIDI source is still torn down and
    // the context ends up Idle rather than half-open.
    assert!(matches!(ctx.suspend(), Err(Error::Device(_))));
    assert_eq!(ctx.state(), EngineState::Idle);
    assert!(ctx.descriptor().is_none());
    assert_eq!(suspends.load(Ordering::Relaxed), 1);

    // Idle suspend stays a no-op.
    ctx.suspend().unwrap();
    assert_eq!(suspends.load(Ordering::Relaxed), 1);
}

#[test]
fn dispatch_delivers_tapped_blocks_to_the_sink() {
    let sink = MemorySink::new(48000.0, 16, 1);
    let mut ctx = EngineContext::new(Box::new(sink));
    ctx.activate().unwrap();

    let tap = integrate_const(&mut ctx, 0.5);
    ctx.set_output_taps(vec![tap]);

    ctx.dispatch_cycle().unwrap();
    ctx.dispatch_cycle().unwrap();
    assert_eq!(ctx.engine().tick(), 32);
}

#[test]
fn underrun_is_logged_and_resets_modules() {
    let mut sink = MemorySink::new(48000.0, 16, 1);
    sink.underrun_after = Some(2);
    let mut ctx = EngineContext::new(Box::new(sink));
    ctx.activate().unwrap();

    let resets = Arc::new(AtomicUsize::new(0));
    let handle = ctx.handle();
    let mut t = handle.begin();
    t.integrate(ModuleSpec::new(
        0,
        0,
        1,
        Box::new(ResetCounter(Arc::clone(&resets))),
    ));
    handle.commit(t).unwrap();

    ctx.dispatch_cycle().unwrap();
    let after_first = resets.load(Ordering::Relaxed);
    ctx.dispatch_cycle().unwrap();
    assert_eq!(resets.load(Ordering::Relaxed), after_first + 1);
    assert!(
        ctx.take_faults()
            .iter()
            .any(|f| matches!(f, RuntimeFault::Underrun { .. }))
    );
}

#[test]
fn midi_events_reach_the_handler_at_their_frame() {
    let sink = MemorySink::new(48000.0, 16, 1);
    let mut ctx = EngineContext::new(Box::new(sink));
    let note = MidiEvent::NoteOn {
        channel: 0,
        note: 60,
        velocity: 100,
    };
    // Due at frame 16: the second cycle, not the first.
    ctx.set_midi_source(Box::new(ScriptedMidi::new(vec![(16, note)])));
    let seen = Arc::new(AtomicUsize::new(0));
    let seen_in_handler = Arc::clone(&seen);
    ctx.set_midi_handler(Box::new(move |event, _handle| {
        assert_eq!(
            event,
            MidiEvent::NoteOn {
                channel: 0,
                note: 60,
                velocity: 100
            }
        );
        seen_in_handler.fetch_add(1, Ordering::Relaxed);
    }));
    ctx.activate().unwrap();

    ctx.dispatch_cycle().unwrap();
    assert_eq!(seen.load(Ordering::Relaxed), 0);
    ctx.dispatch_cycle().unwrap();
    assert_eq!(seen.load(Ordering::Relaxed), 1);
    ctx.dispatch_cycle().unwrap();
    assert_eq!(seen.load(Ordering::Relaxed), 1);
}

#[test]
fn host_loop_runs_until_done() {
    let sink = MemorySink::new(48000.0, 8, 1);
    let mut ctx = EngineContext::new(Box::new(sink));
    ctx.activate().unwrap();
    let tap = integrate_const(&mut ctx, 0.25);
    ctx.set_output_taps(vec![tap]);

    // 4 blocks of 8 frames.
    run_host_loop(&mut ctx, {
        let mut cycles = 0;
        move || {
            cycles += 1;
            cycles > 4
        }
    })
    .unwrap();
    assert_eq!(ctx.engine().tick(), 32);
}
