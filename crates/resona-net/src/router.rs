//! MIDI-driven voice allocation.
//!
//! Maps note events onto context lifecycle calls: a note-on clones a fresh
//! context from the network template, a note-off discards it. What the voice
//! sounds like (frequency, velocity scaling) is pushed by the caller through
//! `access` jobs against the returned context's modules; the router only
//! does the bookkeeping.

use std::collections::HashMap;

use resona_engine::Transaction;

use crate::error::NetError;
use crate::network::{ContextId, Network, Routing};

/// A decoded MIDI channel event, as delivered by an event source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MidiEvent {
    /// Key pressed.
    NoteOn {
        /// MIDI channel, 0-15.
        channel: u8,
        /// MIDI note number, 0-127.
        note: u8,
        /// Key velocity, 1-127 (0 is delivered as [`MidiEvent::NoteOff`]).
        velocity: u8,
    },
    /// Key released.
    NoteOff {
        /// MIDI channel, 0-15.
        channel: u8,
        /// MIDI note number, 0-127.
        note: u8,
    },
}

/// Allocates and retires contexts in response to note events.
#[derive(Default)]
pub struct MidiRouter {
    active: HashMap<(u8, u8), ContextId>,
    next_voice: u32,
}

impl MidiRouter {
    /// Creates a router with no active notes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles a note-on: creates a context for the key and returns its
    /// handle, or returns the existing handle when the key is already down
    /// (retrigger is the caller's call, via `access` jobs).
    pub fn note_on(
        &mut self,
        net: &mut Network,
        channel: u8,
        note: u8,
        trans: &mut Transaction,
    ) -> Result<ContextId, NetError> {
        if let Some(&ctx) = self.active.get(&(channel, note)) {
            return Ok(ctx);
        }
        let routing = Routing {
            channel,
            voice: self.next_voice,
        };
        let ctx = net.create_context(routing, trans)?;
        self.next_voice += 1;
        self.active.insert((channel, note), ctx);
        Ok(ctx)
    }

    /// Handles a note-off: discards the key's context, if any, and returns
    /// the discarded handle.
    pub fn note_off(
        &mut self,
        net: &mut Network,
        channel: u8,
        note: u8,
        trans: &mut Transaction,
    ) -> Result<Option<ContextId>, NetError> {
        let Some(ctx) = self.active.remove(&(channel, note)) else {
            return Ok(None);
        };
        net.discard_context(ctx, trans)?;
        Ok(Some(ctx))
    }

    /// Discards every active voice.
    pub fn all_off(&mut self, net: &mut Network, trans: &mut Transaction) -> Result<(), NetError> {
        for (_, ctx) in self.active.drain() {
            net.discard_context(ctx, trans)?;
        }
        Ok(())
    }

    /// The context currently sounding a key, if any.
    pub fn context_for(&self, channel: u8, note: u8) -> Option<ContextId> {
        self.active.get(&(channel, note)).copied()
    }

    /// Number of keys currently down.
    pub fn active_notes(&self) -> usize {
        self.active.len()
    }
}
