//! Resona Engine - real-time block-DSP flow engine
//!
//! This crate provides the execution core of the Resona audio system: a graph
//! of processing modules computed in fixed-size blocks, mutated only through
//! atomic transactions, and scheduled by dependency order with zero
//! allocation in the block path.
//!
//! # Core Abstractions
//!
//! ## Modules
//!
//! - [`ModuleProcessor`] - The computation bound to a module for its lifetime
//! - [`ModuleSpec`] - Stream arity, cost classifier, and processor for integration
//! - [`ModuleId`] - Opaque handle to a live module
//! - [`ProcessIo`] - Per-block stream view handed to `process`
//!
//! ## Transactions
//!
//! All graph mutation flows through [`Transaction`]s built on the control
//! domain and committed through an [`EngineHandle`]. A transaction applies
//! all-or-nothing: if any job is invalid (bad handle, occupied slot, cycle),
//! every job is rejected and the graph is untouched.
//!
//! ## Engine Split
//!
//! - [`EngineCore`] - Owns the graph, scheduler, and fault log; drives blocks
//! - [`EngineHandle`] - Cloneable control end; builds and commits transactions
//!
//! The two halves communicate only over channels, so the block path never
//! waits on a control-domain lock.
//!
//! # Example
//!
//! ```rust,ignore
//! use resona_engine::{EngineCore, ModuleSpec};
//!
//! let (mut core, handle) = EngineCore::new();
//! core.establish(rate);
//!
//! let mut t = handle.begin();
//! let osc = t.integrate(ModuleSpec::new(0, 0, 1, Box::new(my_osc)));
//! let out = t.integrate(ModuleSpec::new(1, 0, 1, Box::new(my_sink)));
//! t.connect(osc, 0, out, 0);
//! handle.commit(t)?;
//!
//! core.cycle(|blocks| deliver(blocks))?;
//! ```

mod engine;
mod error;
mod graph;
mod module;
mod pool;
mod schedule;
mod transaction;

pub use engine::{EngineCore, EngineHandle};
pub use error::{EngineError, FaultLog, GraphError, RuntimeFault, SlotKind};
pub use module::{
    BlockRate, MAX_STREAMS, ModuleCost, ModuleId, ModuleProcessor, ModuleSpec, OutputRef,
    ProcessIo,
};
pub use transaction::Transaction;

#[cfg(test)]
pub(crate) mod test_util {
    use core::any::Any;

    use crate::module::{BlockRate, ModuleProcessor, ProcessIo};

    /// Processor that leaves its outputs untouched.
    pub struct NullProcessor;

    impl ModuleProcessor for NullProcessor {
        fn process(&mut self, _io: &mut ProcessIo<'_>) {}

        fn reset(&mut self, _rate: BlockRate) {}

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }
}
