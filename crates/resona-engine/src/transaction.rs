//! Transactions: the only way the control domain mutates the flow graph.
//!
//! A transaction records jobs against handles allocated eagerly from a shared
//! counter, so later jobs in the same transaction can reference modules
//! integrated earlier in it. Nothing takes effect until the transaction is
//! committed and absorbed on the engine thread, where it applies atomically:
//! either every job lands or the graph is untouched and the whole transaction
//! is rejected.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crossbeam_channel::Sender;

use crate::error::GraphError;
use crate::module::{ModuleId, ModuleProcessor, ModuleSpec};

/// One recorded mutation job.
pub(crate) enum Job {
    /// Add a module to the graph under a pre-allocated handle.
    Integrate { id: ModuleId, spec: ModuleSpec },
    /// Wire an output stream to a regular input slot.
    Connect {
        src: ModuleId,
        ostream: usize,
        dst: ModuleId,
        istream: usize,
    },
    /// Wire an output stream as one contributor to a joint slot.
    JConnect {
        src: ModuleId,
        ostream: usize,
        dst: ModuleId,
        jstream: usize,
    },
    /// Sever the connection feeding a regular input slot.
    Disconnect { dst: ModuleId, istream: usize },
    /// Sever whatever feeds a regular input slot, tolerating an empty slot
    /// or a module that no longer exists.
    ClearInput { dst: ModuleId, istream: usize },
    /// Remove one contributor from a joint slot.
    JDisconnect {
        src: ModuleId,
        ostream: usize,
        dst: ModuleId,
        jstream: usize,
    },
    /// Run a closure against a module's processor on the engine thread.
    Access {
        module: ModuleId,
        f: Box<dyn FnOnce(&mut dyn ModuleProcessor) + Send>,
    },
    /// Remove a module; its remaining connections are severed with it.
    Discard { id: ModuleId },
}

impl core::fmt::Debug for Job {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Integrate { id, spec } => f
                .debug_struct("Integrate")
                .field("id", id)
                .field("spec", spec)
                .finish(),
            Self::Connect {
                src,
                ostream,
                dst,
                istream,
            } => f
                .debug_struct("Connect")
                .field("src", src)
                .field("ostream", ostream)
                .field("dst", dst)
                .field("istream", istream)
                .finish(),
            Self::JConnect {
                src,
                ostream,
                dst,
                jstream,
            } => f
                .debug_struct("JConnect")
                .field("src", src)
                .field("ostream", ostream)
                .field("dst", dst)
                .field("jstream", jstream)
                .finish(),
            Self::Disconnect { dst, istream } => f
                .debug_struct("Disconnect")
                .field("dst", dst)
                .field("istream", istream)
                .finish(),
            Self::ClearInput { dst, istream } => f
                .debug_struct("ClearInput")
                .field("dst", dst)
                .field("istream", istream)
                .finish(),
            Self::JDisconnect {
                src,
                ostream,
                dst,
                jstream,
            } => f
                .debug_struct("JDisconnect")
                .field("src", src)
                .field("ostream", ostream)
                .field("dst", dst)
                .field("jstream", jstream)
                .finish(),
            Self::Access { module, .. } => {
                f.debug_struct("Access").field("module", module).finish_non_exhaustive()
            }
            Self::Discard { id } => f.debug_struct("Discard").field("id", id).finish(),
        }
    }
}

/// An ordered batch of graph mutations, applied all-or-nothing.
///
/// Built on the control domain via [`EngineHandle::begin`], filled with jobs,
/// then handed back through [`EngineHandle::commit`] or
/// [`EngineHandle::commit_sync`].
///
/// [`EngineHandle::begin`]: crate::engine::EngineHandle::begin
/// [`EngineHandle::commit`]: crate::engine::EngineHandle::commit
/// [`EngineHandle::commit_sync`]: crate::engine::EngineHandle::commit_sync
#[derive(Debug)]
pub struct Transaction {
    pub(crate) jobs: Vec<Job>,
    pub(crate) ids: Arc<AtomicU32>,
    pub(crate) done: Option<Sender<Result<(), GraphError>>>,
}

impl Transaction {
    pub(crate) fn new(ids: Arc<AtomicU32>) -> Self {
        Self {
            jobs: Vec::new(),
            ids,
            done: None,
        }
    }

    /// Records an integrate job and returns the module's handle.
    ///
    /// The handle is valid for further jobs in this transaction immediately;
    /// the module itself exists only once the transaction is absorbed.
    pub fn integrate(&mut self, spec: ModuleSpec) -> ModuleId {
        let id = ModuleId(self.ids.fetch_add(1, Ordering::Relaxed));
        self.jobs.push(Job::Integrate { id, spec });
        id
    }

    /// Records a connection from `src`'s output `ostream` into `dst`'s
    /// regular input `istream`.
    pub fn connect(&mut self, src: ModuleId, ostream: usize, dst: ModuleId, istream: usize) {
        self.jobs.push(Job::Connect {
            src,
            ostream,
            dst,
            istream,
        });
    }

    /// Records a contributor connection into `dst`'s joint slot `jstream`.
    pub fn jconnect(&mut self, src: ModuleId, ostream: usize, dst: ModuleId, jstream: usize) {
        self.jobs.push(Job::JConnect {
            src,
            ostream,
            dst,
            jstream,
        });
    }

    /// Records severing whatever feeds `dst`'s regular input `istream`.
    pub fn disconnect(&mut self, dst: ModuleId, istream: usize) {
        self.jobs.push(Job::Disconnect { dst, istream });
    }

    /// Like [`Transaction::disconnect`], but a no-op when the slot is
    /// already empty or `dst` has been discarded.
    ///
    /// Rebinding code uses this: the edge it remembers may have been severed
    /// by an interleaved discard, and a strict disconnect would then reject
    /// the whole batch.
    pub fn clear_input(&mut self, dst: ModuleId, istream: usize) {
        self.jobs.push(Job::ClearInput { dst, istream });
    }

    /// Records removing the `src`/`ostream` contributor from `dst`'s joint
    /// slot `jstream`.
    pub fn jdisconnect(&mut self, src: ModuleId, ostream: usize, dst: ModuleId, jstream: usize) {
        self.jobs.push(Job::JDisconnect {
            src,
            ostream,
            dst,
            jstream,
        });
    }

    /// Records a closure to run against `module`'s processor on the engine
    /// thread, ordered with the surrounding jobs.
    ///
    /// This is the sanctioned way to push parameter changes across the thread
    /// boundary; the closure must not block or allocate beyond what a
    /// parameter update needs.
    pub fn access(
        &mut self,
        module: ModuleId,
        f: impl FnOnce(&mut dyn ModuleProcessor) + Send + 'static,
    ) {
        self.jobs.push(Job::Access {
            module,
            f: Box::new(f),
        });
    }

    /// Records removing `module` and severing all its connections.
    pub fn discard(&mut self, module: ModuleId) {
        self.jobs.push(Job::Discard { id: module });
    }

    /// True when no jobs have been recorded.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Number of recorded jobs.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ModuleCost;
    use crate::test_util::NullProcessor;

    #[test]
    fn handles_are_unique_across_transactions() {
        let ids = Arc::new(AtomicU32::new(0));
        let mut a = Transaction::new(Arc::clone(&ids));
        let mut b = Transaction::new(Arc::clone(&ids));
        let m1 = a.integrate(ModuleSpec::new(0, 0, 1, Box::new(NullProcessor)));
        let m2 = b.integrate(ModuleSpec::new(0, 0, 1, Box::new(NullProcessor)));
        let m3 = a.integrate(ModuleSpec::new(0, 0, 1, Box::new(NullProcessor)));
        assert_ne!(m1, m2);
        assert_ne!(m2, m3);
        assert_ne!(m1, m3);
    }

    #[test]
    fn jobs_accumulate_in_order() {
        let ids = Arc::new(AtomicU32::new(0));
        let mut t = Transaction::new(ids);
        assert!(t.is_empty());
        let spec =
            ModuleSpec::new(1, 0, 1, Box::new(NullProcessor)).with_cost(ModuleCost::Expensive);
        let m = t.integrate(spec);
        t.disconnect(m, 0);
        t.discard(m);
        assert_eq!(t.len(), 3);
        assert!(matches!(t.jobs[0], Job::Integrate { .. }));
        assert!(matches!(t.jobs[2], Job::Discard { .. }));
    }
}
