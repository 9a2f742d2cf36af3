//! Error taxonomy: structural rejection, engine lifecycle faults, and the
//! non-fatal runtime fault log.

use core::fmt;
use core::time::Duration;
use std::collections::VecDeque;

use thiserror::Error;

use crate::module::{MAX_STREAMS, ModuleId};

/// Which kind of stream slot an error refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotKind {
    /// Regular input slot (at most one connection).
    Input,
    /// Joint (summing) input slot.
    Joint,
    /// Output slot.
    Output,
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Joint => write!(f, "joint"),
            Self::Output => write!(f, "output"),
        }
    }
}

/// Structural errors: the whole transaction is rejected and the graph is
/// left exactly as it was before the commit attempt.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum GraphError {
    /// A job referenced a handle that is not (or no longer) integrated.
    #[error("module {0} not found")]
    UnknownModule(ModuleId),

    /// Two integrate jobs targeted the same handle.
    #[error("module {0} already integrated")]
    ModuleExists(ModuleId),

    /// A slot index is outside the module's declared arity.
    #[error("{kind} slot {slot} out of range for module {module}")]
    BadSlot {
        /// Module whose arity was exceeded.
        module: ModuleId,
        /// Kind of slot addressed.
        kind: SlotKind,
        /// Offending slot index.
        slot: usize,
    },

    /// A regular input slot already holds a connection.
    #[error("input slot {slot} of module {module} already connected")]
    InputOccupied {
        /// Module owning the occupied slot.
        module: ModuleId,
        /// The occupied slot index.
        slot: usize,
    },

    /// The same source was connected twice into one joint slot.
    #[error("duplicate connection into joint slot {slot} of module {module}")]
    DuplicateConnection {
        /// Module owning the joint slot.
        module: ModuleId,
        /// The joint slot index.
        slot: usize,
    },

    /// A disconnect job addressed a slot with no matching connection.
    #[error("no connection at {kind} slot {slot} of module {module}")]
    NotConnected {
        /// Module owning the slot.
        module: ModuleId,
        /// Kind of slot addressed.
        kind: SlotKind,
        /// The empty slot index.
        slot: usize,
    },

    /// Applying the transaction would leave a cycle in the connection graph.
    #[error("transaction would introduce a cycle")]
    CycleDetected,

    /// A module declared more streams of one kind than [`MAX_STREAMS`].
    #[error("module declares more than {MAX_STREAMS} streams of one kind")]
    StreamCountExceeded,
}

/// Engine lifecycle and dispatch errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A synchronously committed transaction was rejected.
    #[error("transaction rejected: {0}")]
    Graph(#[from] GraphError),

    /// Schedule re-derivation missed the block deadline.
    ///
    /// Fatal to the Active state: producing a late block is worse than
    /// silence, so the engine loop must fall back to Idle.
    #[error("schedule derivation took {elapsed:?}, budget was {budget:?}")]
    ScheduleDeadline {
        /// Time the re-derivation actually took.
        elapsed: Duration,
        /// One block duration at the established rate.
        budget: Duration,
    },

    /// The other half of the engine (core or handle) has been dropped.
    #[error("engine channel disconnected")]
    Disconnected,

    /// An operation that requires an established block rate ran without one.
    #[error("engine is not active")]
    NotActive,
}

/// A recorded, non-fatal runtime fault.
#[derive(Clone, Debug, PartialEq)]
pub enum RuntimeFault {
    /// A process callback produced NaN or infinity; the block was replaced
    /// with silence before anything downstream could read it.
    NonFiniteOutput {
        /// The offending module.
        module: ModuleId,
        /// Frame counter at the start of the faulty block.
        tick: u64,
    },

    /// The device sink ran dry; modules were reset after recovery.
    Underrun {
        /// Frame counter when the underrun was observed.
        tick: u64,
    },

    /// An asynchronously committed transaction was rejected.
    ///
    /// Synchronous committers get the error on their completion channel
    /// instead.
    RejectedTransaction {
        /// Why the transaction was rejected.
        error: GraphError,
        /// Frame counter when the rejection happened.
        tick: u64,
    },
}

/// Bounded log of runtime faults, readable from the control domain.
#[derive(Debug)]
pub struct FaultLog {
    entries: VecDeque<RuntimeFault>,
    capacity: usize,
}

impl FaultLog {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub(crate) fn record(&mut self, fault: RuntimeFault) {
        #[cfg(feature = "tracing")]
        tracing::warn!("engine fault: {fault:?}");
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(fault);
    }

    /// Number of retained faults.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no faults are retained.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates retained faults, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &RuntimeFault> {
        self.entries.iter()
    }

    /// Removes and returns all retained faults, oldest first.
    pub fn drain(&mut self) -> Vec<RuntimeFault> {
        self.entries.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_log_is_bounded() {
        let mut log = FaultLog::new(2);
        for tick in 0..5 {
            log.record(RuntimeFault::Underrun { tick });
        }
        assert_eq!(log.len(), 2);
        let drained = log.drain();
        assert_eq!(
            drained,
            vec![
                RuntimeFault::Underrun { tick: 3 },
                RuntimeFault::Underrun { tick: 4 }
            ]
        );
        assert!(log.is_empty());
    }

    #[test]
    fn graph_error_display() {
        let err = GraphError::BadSlot {
            module: ModuleId(3),
            kind: SlotKind::Input,
            slot: 9,
        };
        assert_eq!(err.to_string(), "input slot 9 out of range for module m3");
    }
}
