//! MIDI event sources.
//!
//! A [`MidiSource`] hands the engine loop whatever events became due since
//! the last block, stamped in engine frames. Hardware input would sit behind
//! this trait too; [`ScriptedMidi`] replays a fixed score, which is what the
//! offline renderer and the tests use.

use resona_net::MidiEvent;

use crate::Result;

/// A source of decoded MIDI events, polled once per engine cycle.
pub trait MidiSource {
    /// Opens the source. Runs during device activation.
    fn open(&mut self) -> Result<()>;

    /// Appends every event due at or before frame `tick` to `out`.
    fn poll_events(&mut self, tick: u64, out: &mut Vec<MidiEvent>) -> Result<()>;

    /// Closes the source. Runs during suspension.
    fn suspend(&mut self) -> Result<()>;
}

/// Replays a fixed list of frame-stamped events.
pub struct ScriptedMidi {
    /// (due frame, event), sorted by frame.
    events: Vec<(u64, MidiEvent)>,
    cursor: usize,
}

impl ScriptedMidi {
    /// Creates a source replaying `events`; the list is sorted by due frame.
    pub fn new(mut events: Vec<(u64, MidiEvent)>) -> Self {
        events.sort_by_key(|(frame, _)| *frame);
        Self { events, cursor: 0 }
    }

    /// True once every event has been delivered.
    pub fn finished(&self) -> bool {
        self.cursor == self.events.len()
    }
}

impl MidiSource for ScriptedMidi {
    fn open(&mut self) -> Result<()> {
        self.cursor = 0;
        Ok(())
    }

    fn poll_events(&mut self, tick: u64, out: &mut Vec<MidiEvent>) -> Result<()> {
        while let Some((frame, event)) = self.events.get(self.cursor) {
            if *frame > tick {
                break;
            }
            out.push(*event);
            self.cursor += 1;
        }
        Ok(())
    }

    fn suspend(&mut self) -> Result<()> {
        Ok(())
    }
}
