//! Engine core and its control-domain handle.
//!
//! [`EngineCore`] owns the graph, the scheduler, and the fault log; it lives
//! wherever blocks are computed (the device loop thread, or inline for
//! offline rendering). [`EngineHandle`] is the cloneable control-domain end:
//! it builds transactions and commits them over a channel. The two sides
//! share nothing but channels and the handle counter, so neither ever locks
//! the other.

use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};

use crate::error::{EngineError, FaultLog, RuntimeFault};
use crate::graph::FlowGraph;
use crate::module::{BlockRate, MAX_STREAMS, ModuleProcessor, OutputRef};
use crate::schedule::Scheduler;
use crate::transaction::Transaction;

/// Faults retained before the oldest is dropped.
const FAULT_LOG_CAPACITY: usize = 64;

/// Block frames used before a rate is established.
const PLACEHOLDER_FRAMES: usize = 64;

/// Computation half of the engine: graph, scheduler, fault log.
pub struct EngineCore {
    graph: FlowGraph,
    scheduler: Scheduler,
    queue: Receiver<Transaction>,
    retired: Sender<Box<dyn ModuleProcessor>>,
    faults: FaultLog,
    rate: Option<BlockRate>,
    tick: u64,
    taps: Vec<OutputRef>,
}

/// Control half of the engine: builds and commits transactions.
///
/// Cloneable; clones share the handle counter and the commit queue, so
/// transactions built on different threads never collide.
#[derive(Clone)]
pub struct EngineHandle {
    ids: Arc<AtomicU32>,
    queue: Sender<Transaction>,
    retired: Receiver<Box<dyn ModuleProcessor>>,
}

impl EngineCore {
    /// Creates an engine core and its first handle.
    pub fn new() -> (Self, EngineHandle) {
        let (queue_tx, queue_rx) = unbounded();
        let (retired_tx, retired_rx) = unbounded();
        let ids = Arc::new(AtomicU32::new(0));
        let core = Self {
            graph: FlowGraph::new(PLACEHOLDER_FRAMES),
            scheduler: Scheduler::new(),
            queue: queue_rx,
            retired: retired_tx,
            faults: FaultLog::new(FAULT_LOG_CAPACITY),
            rate: None,
            tick: 0,
            taps: Vec::new(),
        };
        let handle = EngineHandle {
            ids,
            queue: queue_tx,
            retired: retired_rx,
        };
        (core, handle)
    }

    /// Establishes the block rate: resizes pooled blocks, resets every
    /// processor, and rewinds the frame counter.
    ///
    /// Called when a device is activated or an offline render starts, and
    /// again whenever the rate changes.
    pub fn establish(&mut self, rate: BlockRate) {
        self.graph.set_block_frames(rate.block_frames);
        self.graph.reset_all(rate);
        self.rate = Some(rate);
        self.tick = 0;
        self.scheduler.invalidate();
        #[cfg(feature = "tracing")]
        tracing::debug!(
            sample_rate = rate.sample_rate,
            block_frames = rate.block_frames,
            "block rate established"
        );
    }

    /// The established rate, if any.
    pub fn rate(&self) -> Option<BlockRate> {
        self.rate
    }

    /// Frames computed since the rate was established.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Selects which output streams [`EngineCore::cycle`] delivers, in order.
    ///
    /// At most [`MAX_STREAMS`] taps are kept, extras are dropped;
    /// unresolvable taps deliver silence.
    pub fn set_output_taps(&mut self, mut taps: Vec<OutputRef>) {
        taps.truncate(MAX_STREAMS);
        self.taps = taps;
    }

    /// Drains the commit queue, applying each transaction atomically.
    ///
    /// A rejected transaction leaves the graph untouched; the rejection goes
    /// to the committer's completion channel when one is attached, otherwise
    /// into the fault log.
    pub fn absorb(&mut self) {
        while let Ok(trans) = self.queue.try_recv() {
            let Transaction { jobs, done, .. } = trans;
            match self.graph.apply(jobs, &self.retired, self.rate) {
                Ok(structural) => {
                    if structural {
                        self.scheduler.invalidate();
                    }
                    if let Some(done) = done {
                        let _ = done.send(Ok(()));
                    }
                }
                Err(err) => {
                    if let Some(done) = done {
                        let _ = done.send(Err(err));
                    } else {
                        self.faults.record(RuntimeFault::RejectedTransaction {
                            error: err,
                            tick: self.tick,
                        });
                    }
                }
            }
        }
    }

    /// Re-derives the schedule if the topology changed since the last block.
    ///
    /// Derivation must finish within one block duration; overrunning that
    /// budget returns [`EngineError::ScheduleDeadline`], on which the caller
    /// must stop producing blocks rather than produce them late.
    pub fn reschedule_if_needed(&mut self) -> Result<(), EngineError> {
        if !self.scheduler.is_dirty() {
            return Ok(());
        }
        let rate = self.rate.ok_or(EngineError::NotActive)?;
        let started = Instant::now();
        self.scheduler.rebuild(&self.graph)?;
        let elapsed = started.elapsed();
        let budget = rate.block_duration();
        if elapsed > budget {
            return Err(EngineError::ScheduleDeadline { elapsed, budget });
        }
        Ok(())
    }

    /// Computes one block and advances the frame counter.
    pub fn run_block(&mut self) -> Result<(), EngineError> {
        let rate = self.rate.ok_or(EngineError::NotActive)?;
        self.graph.run_block(
            self.scheduler.schedule(),
            rate.block_frames,
            self.tick,
            rate,
            &mut self.faults,
        );
        self.tick += rate.block_frames as u64;
        Ok(())
    }

    /// One full engine cycle: absorb commits, reschedule, compute a block,
    /// and hand the tapped output blocks to `deliver`.
    ///
    /// Taps that cannot be resolved (module discarded between commits)
    /// deliver silence for the block.
    pub fn cycle<F>(&mut self, deliver: F) -> Result<(), EngineError>
    where
        F: FnOnce(&[&[f32]]),
    {
        self.absorb();
        self.reschedule_if_needed()?;
        self.run_block()?;

        let mut blocks: [&[f32]; MAX_STREAMS] = [self.graph.pool.silence(); MAX_STREAMS];
        for (slot, tap) in self.taps.iter().enumerate() {
            if let Some(block) = self.graph.output_block(*tap) {
                blocks[slot] = block;
            }
        }
        deliver(&blocks[..self.taps.len()]);
        Ok(())
    }

    /// Absorbs every queued transaction without computing a block.
    ///
    /// Run before suspending so pending commits land (and synchronous
    /// committers unblock) while the engine still has a schedule.
    pub fn drain_pending(&mut self) {
        self.absorb();
    }

    /// Resets every processor at the current rate, e.g. after an underrun.
    pub fn reset_modules(&mut self) -> Result<(), EngineError> {
        let rate = self.rate.ok_or(EngineError::NotActive)?;
        self.graph.reset_all(rate);
        Ok(())
    }

    /// Records a fault observed outside the graph (device underruns).
    pub fn record_fault(&mut self, fault: RuntimeFault) {
        self.faults.record(fault);
    }

    /// Removes and returns the retained faults, oldest first.
    pub fn take_faults(&mut self) -> Vec<RuntimeFault> {
        self.faults.drain()
    }

    /// Number of live modules.
    pub fn module_count(&self) -> usize {
        self.graph.module_count()
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.graph.connection_count()
    }
}

impl EngineHandle {
    /// Starts an empty transaction.
    pub fn begin(&self) -> Transaction {
        Transaction::new(Arc::clone(&self.ids))
    }

    /// Commits asynchronously: the transaction applies during the engine's
    /// next cycle. Rejections are recorded in the engine's fault log.
    pub fn commit(&self, trans: Transaction) -> Result<(), EngineError> {
        self.queue.send(trans).map_err(|_| EngineError::Disconnected)
    }

    /// Commits and blocks until the engine absorbs the transaction,
    /// returning its verdict.
    ///
    /// Must not be called from the thread that drives [`EngineCore::cycle`];
    /// it would deadlock waiting for itself.
    pub fn commit_sync(&self, mut trans: Transaction) -> Result<(), EngineError> {
        let (done_tx, done_rx) = bounded(1);
        trans.done = Some(done_tx);
        self.queue.send(trans).map_err(|_| EngineError::Disconnected)?;
        match done_rx.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(graph_err)) => Err(EngineError::Graph(graph_err)),
            Err(_) => Err(EngineError::Disconnected),
        }
    }

    /// Drops processors retired by discard jobs; returns how many.
    ///
    /// Retirement `Drop`s deliberately run here, in the control domain,
    /// rather than on the engine thread.
    pub fn collect_retired(&self) -> usize {
        let mut count = 0;
        while self.retired.try_recv().is_ok() {
            count += 1;
        }
        count
    }
}
