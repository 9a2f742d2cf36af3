//! Offline rendering command.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use resona_io::{EngineContext, ScriptedMidi, WavSink};
use resona_synth::{PatchParams, Tuning};

use crate::score;

#[derive(Args)]
pub struct RenderArgs {
    /// Output WAV path
    #[arg(short, long, default_value = "resona.wav")]
    output: PathBuf,

    /// MIDI note numbers to play in sequence
    #[arg(short, long, value_delimiter = ',', default_value = "60,64,67,72")]
    notes: Vec<u8>,

    /// Seconds per note
    #[arg(long, default_value_t = 0.5)]
    note_length: f64,

    /// Trailing silence after the last note, in seconds
    #[arg(long, default_value_t = 0.5)]
    tail: f64,

    /// Sample rate in Hz
    #[arg(long, default_value_t = 48000)]
    rate: u32,

    /// Block size in frames
    #[arg(long, default_value_t = 256)]
    block: usize,
}

pub fn run(args: RenderArgs) -> Result<()> {
    let sample_rate = args.rate as f32;
    let sink = WavSink::new(&args.output, sample_rate, args.block, 1);
    let mut ctx = EngineContext::new(Box::new(sink));

    let frames_per_note = (args.note_length * f64::from(args.rate)) as u64;
    let script = score::script_events(&args.notes, frames_per_note);
    ctx.set_midi_source(Box::new(ScriptedMidi::new(script)));

    ctx.activate()?;
    score::install(&mut ctx, PatchParams::default(), Tuning::Equal12)?;

    let total_frames =
        frames_per_note * args.notes.len() as u64 + (args.tail * f64::from(args.rate)) as u64;
    while ctx.engine().tick() < total_frames {
        ctx.dispatch_cycle()?;
    }
    ctx.suspend()?;

    for fault in ctx.take_faults() {
        tracing::warn!("engine fault during render: {fault:?}");
    }
    println!(
        "wrote {} ({:.2}s at {} Hz)",
        args.output.display(),
        total_frames as f64 / f64::from(args.rate),
        args.rate
    );
    Ok(())
}
