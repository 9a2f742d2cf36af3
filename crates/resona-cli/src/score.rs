//! Note-sequence wiring shared by the render and play commands.
//!
//! Turns a flat list of MIDI notes into a scripted event list and installs
//! the standard voice patch plus a MIDI handler onto an engine context.

use anyhow::Result;
use resona_engine::OutputRef;
use resona_io::EngineContext;
use resona_net::{MidiEvent, MidiRouter};
use resona_synth::{PatchParams, Tuning, VoicePatch};

/// Builds a one-note-after-another script: each note holds for most of its
/// slot and releases an eighth early so envelopes articulate.
pub fn script_events(notes: &[u8], frames_per_note: u64) -> Vec<(u64, MidiEvent)> {
    let gap = frames_per_note / 8;
    let mut events = Vec::with_capacity(notes.len() * 2);
    for (i, &note) in notes.iter().enumerate() {
        let start = i as u64 * frames_per_note;
        events.push((
            start,
            MidiEvent::NoteOn {
                channel: 0,
                note,
                velocity: 100,
            },
        ));
        events.push((
            start + frames_per_note - gap,
            MidiEvent::NoteOff { channel: 0, note },
        ));
    }
    events
}

/// Activates the standard voice patch on `ctx`, taps its master output, and
/// installs the note-on/off handler.
pub fn install(ctx: &mut EngineContext, params: PatchParams, tuning: Tuning) -> Result<()> {
    let handle = ctx.handle();
    let mut patch = VoicePatch::build(params, tuning);

    let mut t = handle.begin();
    patch.activate(&mut t)?;
    handle.commit(t)?;
    let master = patch.net.shared_module(patch.master)?;
    ctx.set_output_taps(vec![OutputRef {
        module: master,
        ostream: 0,
    }]);

    let mut router = MidiRouter::new();
    ctx.set_midi_handler(Box::new(move |event, handle| {
        let mut t = handle.begin();
        let outcome = match event {
            MidiEvent::NoteOn { channel, note, .. } => router
                .note_on(&mut patch.net, channel, note, &mut t)
                .and_then(|voice| patch.start_voice(voice, i32::from(note), 0, &mut t)),
            MidiEvent::NoteOff { channel, note } => {
                // Gate off in the same batch that discards the voice; the
                // default patch has a short release this cuts into.
                if let Some(voice) = router.context_for(channel, note) {
                    let _ = patch.release_voice(voice, &mut t);
                }
                router
                    .note_off(&mut patch.net, channel, note, &mut t)
                    .map(|_| ())
            }
        };
        if let Err(err) = outcome {
            tracing::warn!("voice allocation failed: {err}");
        }
        if handle.commit(t).is_err() {
            tracing::warn!("engine disconnected; dropping MIDI event");
        }
        handle.collect_retired();
    }));
    Ok(())
}
