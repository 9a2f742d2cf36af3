//! Live playback command.

use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Args;
use resona_io::{CpalBackend, EngineContext, ScriptedMidi, run_host_loop};
use resona_synth::{PatchParams, Tuning};

use crate::score;

#[derive(Args)]
pub struct PlayArgs {
    /// MIDI note numbers to play in sequence
    #[arg(short, long, value_delimiter = ',', default_value = "60,64,67,72")]
    notes: Vec<u8>,

    /// Seconds per note
    #[arg(long, default_value_t = 0.5)]
    note_length: f64,

    /// Output device name substring (system default when omitted)
    #[arg(short, long)]
    device: Option<String>,
}

pub fn run(args: PlayArgs) -> Result<()> {
    let backend = match args.device {
        Some(name) => CpalBackend::with_device(name),
        None => CpalBackend::new(),
    };
    let mut ctx = EngineContext::new(Box::new(backend));

    // The device rate is unknown until activation; activate first, then
    // script against the negotiated rate.
    ctx.activate()?;
    let descriptor = ctx
        .descriptor()
        .ok_or_else(|| anyhow::anyhow!("device reported no block descriptor"))?;
    let frames_per_note = (args.note_length * f64::from(descriptor.sample_rate)) as u64;
    let script = score::script_events(&args.notes, frames_per_note);
    let total = Duration::from_secs_f64(args.note_length * args.notes.len() as f64 + 0.5);

    // Attaching MIDI after activation is fine for a source with no device
    // half; it is polled from the next cycle on.
    ctx.set_midi_source(Box::new(ScriptedMidi::new(script)));
    score::install(&mut ctx, PatchParams::default(), Tuning::Equal12)?;

    println!(
        "playing {} notes at {} Hz, block {} frames",
        args.notes.len(),
        descriptor.sample_rate,
        descriptor.block_frames
    );
    let deadline = Instant::now() + total;
    run_host_loop(&mut ctx, || Instant::now() >= deadline)?;
    ctx.suspend()?;

    for fault in ctx.take_faults() {
        tracing::warn!("engine fault during playback: {fault:?}");
    }
    Ok(())
}
