//! Resona Net - polyphonic voice networks for the Resona engine
//!
//! Builds on `resona-engine`'s transactional graph to describe a synthesis
//! topology once and play it many times concurrently:
//!
//! - [`Network`] - topology template: nodes marked per-voice or shared, edges
//!   between them, and named boundary ports
//! - [`ContextId`] - one live voice, cloned from the template
//! - [`Network::clone_branch`] - clones only the per-voice branch upstream of
//!   a merge node, sharing the expensive tail across notes
//! - [`MidiRouter`] - maps note-on/off events to context create/discard
//!
//! Every instantiation and teardown is a batch of jobs on one transaction,
//! so voices appear and vanish atomically between blocks.

mod error;
mod network;
mod port;
mod router;

pub use error::NetError;
pub use network::{ContextId, Network, Placement, Routing, TemplateNodeId};
pub use router::{MidiEvent, MidiRouter};
