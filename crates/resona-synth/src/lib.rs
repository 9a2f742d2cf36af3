//! Resona Synth - synthesis modules for the Resona engine
//!
//! Concrete [`ModuleProcessor`](resona_engine::ModuleProcessor)
//! implementations and the note math that drives them:
//!
//! - Oscillators: [`SineOsc`], [`SawOsc`]
//! - Envelope: [`Adsr`], gated through `access` jobs
//! - Utilities: [`ConstSource`], [`Gain`], [`Mix`] (the voice merge point)
//! - Note math: [`note_to_freq`] / [`note_from_freq`] under a [`Tuning`]
//! - [`VoicePatch`] - a ready-made polyphonic network template

mod envelope;
mod note;
mod osc;
mod patch;
mod util;

pub use envelope::Adsr;
pub use note::{
    CONCERT_A_FREQ, CONCERT_A_NOTE, MAX_FINE_TUNE, Tuning, note_from_freq, note_to_freq,
};
pub use osc::{SawOsc, SineOsc};
pub use patch::{PatchParams, VoicePatch};
pub use util::{ConstSource, Gain, Mix};
