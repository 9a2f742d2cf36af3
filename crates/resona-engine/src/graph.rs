//! The live flow graph: module storage, transactional mutation, and block
//! execution.
//!
//! Mutation happens only through [`FlowGraph::apply`], which validates a whole
//! transaction against a lightweight ghost copy of the topology before
//! touching the real graph. Validation failure rejects the transaction with
//! the graph untouched; success applies every job infallibly. Execution
//! happens through [`FlowGraph::run_block`], which follows a pre-resolved
//! [`Schedule`] and never allocates.
//!
//! [`Schedule`]: crate::schedule::Schedule

use crossbeam_channel::Sender;

use crate::error::{FaultLog, GraphError, RuntimeFault, SlotKind};
use crate::module::{
    BlockRate, MAX_STREAMS, ModuleCost, ModuleId, ModuleProcessor, OutputRef, ProcessIo,
};
use crate::pool::{Block, BlockPool};
use crate::schedule::Schedule;
use crate::transaction::Job;

/// Per-module storage inside the graph.
pub(crate) struct ModuleEntry {
    pub(crate) processor: Box<dyn ModuleProcessor>,
    pub(crate) cost: ModuleCost,
    /// Source feeding each regular input slot, if any.
    pub(crate) istreams: Vec<Option<OutputRef>>,
    /// Contributors to each joint slot, unordered.
    pub(crate) jstreams: Vec<Vec<OutputRef>>,
    /// Pool slot backing each output stream.
    pub(crate) obufs: Vec<usize>,
    /// Pool slot backing each joint-sum scratch block.
    pub(crate) jbufs: Vec<usize>,
}

/// Ghost copy of one module's topology, used for transaction validation.
#[derive(Clone)]
struct GhostEntry {
    istreams: Vec<Option<OutputRef>>,
    jstreams: Vec<Vec<OutputRef>>,
    outputs: usize,
}

/// The module graph plus its block pool.
pub(crate) struct FlowGraph {
    /// Indexed by raw module handle. Handles are never reused.
    pub(crate) entries: Vec<Option<ModuleEntry>>,
    pub(crate) pool: BlockPool,
    n_connections: usize,
    /// Scratch for the blocks a module is currently filling.
    out_scratch: Vec<Block>,
}

impl FlowGraph {
    pub(crate) fn new(block_frames: usize) -> Self {
        Self {
            entries: Vec::new(),
            pool: BlockPool::new(block_frames),
            n_connections: 0,
            out_scratch: Vec::with_capacity(MAX_STREAMS),
        }
    }

    /// Number of live modules.
    pub(crate) fn module_count(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    /// Number of live connections (joint contributors each count once).
    pub(crate) fn connection_count(&self) -> usize {
        self.n_connections
    }

    pub(crate) fn entry(&self, id: ModuleId) -> Option<&ModuleEntry> {
        self.entries.get(id.0 as usize)?.as_ref()
    }

    /// Read access to the block currently held on an output stream.
    pub(crate) fn output_block(&self, src: OutputRef) -> Option<&[f32]> {
        let entry = self.entry(src.module)?;
        let buf = *entry.obufs.get(src.ostream)?;
        Some(self.pool.get(buf))
    }

    /// Re-establishes every processor for a new block rate.
    pub(crate) fn reset_all(&mut self, rate: BlockRate) {
        for entry in self.entries.iter_mut().flatten() {
            entry.processor.reset(rate);
        }
    }

    /// Re-sizes every pooled block for a new frames-per-block.
    pub(crate) fn set_block_frames(&mut self, frames: usize) {
        self.pool.set_frames(frames);
    }

    /// Applies a whole transaction atomically.
    ///
    /// Validates every job against a ghost copy of the topology first, then
    /// runs a cycle check on the ghost result; only if everything passes is
    /// the real graph touched. Returns whether the topology changed (which
    /// invalidates the schedule). Retired processors are sent over `retired`
    /// so their `Drop` runs in the control domain.
    pub(crate) fn apply(
        &mut self,
        jobs: Vec<Job>,
        retired: &Sender<Box<dyn ModuleProcessor>>,
        rate: Option<BlockRate>,
    ) -> Result<bool, GraphError> {
        self.validate(&jobs)?;

        let mut structural = false;
        for job in jobs {
            match job {
                Job::Integrate { id, spec } => {
                    self.integrate(id, spec, rate);
                    structural = true;
                }
                Job::Connect {
                    src,
                    ostream,
                    dst,
                    istream,
                } => {
                    let entry = self.entry_mut(dst);
                    entry.istreams[istream] = Some(OutputRef {
                        module: src,
                        ostream,
                    });
                    self.n_connections += 1;
                    structural = true;
                }
                Job::JConnect {
                    src,
                    ostream,
                    dst,
                    jstream,
                } => {
                    let entry = self.entry_mut(dst);
                    entry.jstreams[jstream].push(OutputRef {
                        module: src,
                        ostream,
                    });
                    self.n_connections += 1;
                    structural = true;
                }
                Job::Disconnect { dst, istream } => {
                    let entry = self.entry_mut(dst);
                    entry.istreams[istream] = None;
                    self.n_connections -= 1;
                    structural = true;
                }
                Job::ClearInput { dst, istream } => {
                    // Tolerant by contract: the module or the edge may be gone.
                    let entry = self.entries.get_mut(dst.0 as usize).and_then(Option::as_mut);
                    if entry.is_some_and(|e| e.istreams[istream].take().is_some()) {
                        self.n_connections -= 1;
                        structural = true;
                    }
                }
                Job::JDisconnect {
                    src,
                    ostream,
                    dst,
                    jstream,
                } => {
                    let entry = self.entry_mut(dst);
                    let wanted = OutputRef {
                        module: src,
                        ostream,
                    };
                    entry.jstreams[jstream].retain(|r| *r != wanted);
                    self.n_connections -= 1;
                    structural = true;
                }
                Job::Access { module, f } => {
                    let entry = self.entry_mut(module);
                    f(entry.processor.as_mut());
                }
                Job::Discard { id } => {
                    self.discard(id, retired);
                    structural = true;
                }
            }
        }
        Ok(structural)
    }

    fn integrate(&mut self, id: ModuleId, spec: crate::module::ModuleSpec, rate: Option<BlockRate>) {
        let idx = id.0 as usize;
        if idx >= self.entries.len() {
            self.entries.resize_with(idx + 1, || None);
        }
        let obufs = (0..spec.outputs).map(|_| self.pool.alloc()).collect();
        let jbufs = (0..spec.joints).map(|_| self.pool.alloc()).collect();
        let mut processor = spec.processor;
        // Modules arriving while a rate is established start at that rate;
        // the rest are reset when one is.
        if let Some(rate) = rate {
            processor.reset(rate);
        }
        self.entries[idx] = Some(ModuleEntry {
            processor,
            cost: spec.cost,
            istreams: vec![None; spec.inputs],
            jstreams: vec![Vec::new(); spec.joints],
            obufs,
            jbufs,
        });
    }

    fn discard(&mut self, id: ModuleId, retired: &Sender<Box<dyn ModuleProcessor>>) {
        // Sever every edge touching the module before removing it.
        for entry in self.entries.iter_mut().flatten() {
            for slot in &mut entry.istreams {
                if slot.is_some_and(|r| r.module == id) {
                    *slot = None;
                    self.n_connections -= 1;
                }
            }
            for contributors in &mut entry.jstreams {
                let before = contributors.len();
                contributors.retain(|r| r.module != id);
                self.n_connections -= before - contributors.len();
            }
        }
        let entry = self.entries[id.0 as usize]
            .take()
            .expect("validated discard of missing module");
        self.n_connections -= entry.istreams.iter().flatten().count();
        self.n_connections -= entry.jstreams.iter().map(Vec::len).sum::<usize>();
        for buf in entry.obufs.iter().chain(&entry.jbufs) {
            self.pool.release(*buf);
        }
        // Drop runs wherever the receiver drains, never on this thread.
        // The receiver outliving us is not required once the engine winds down.
        let _ = retired.send(entry.processor);
    }

    fn entry_mut(&mut self, id: ModuleId) -> &mut ModuleEntry {
        self.entries[id.0 as usize]
            .as_mut()
            .expect("validated job against missing module")
    }

    /// Validates a job sequence against a ghost copy of the topology.
    fn validate(&self, jobs: &[Job]) -> Result<(), GraphError> {
        let mut ghost: Vec<Option<GhostEntry>> = self
            .entries
            .iter()
            .map(|e| {
                e.as_ref().map(|e| GhostEntry {
                    istreams: e.istreams.clone(),
                    jstreams: e.jstreams.clone(),
                    outputs: e.obufs.len(),
                })
            })
            .collect();

        let lookup = |ghost: &[Option<GhostEntry>], id: ModuleId| -> Result<usize, GraphError> {
            let idx = id.0 as usize;
            if ghost.get(idx).is_some_and(Option::is_some) {
                Ok(idx)
            } else {
                Err(GraphError::UnknownModule(id))
            }
        };
        let check_src =
            |ghost: &[Option<GhostEntry>], src: ModuleId, ostream: usize| -> Result<(), GraphError> {
                let idx = lookup(ghost, src)?;
                let outputs = ghost[idx].as_ref().map_or(0, |e| e.outputs);
                if ostream >= outputs {
                    return Err(GraphError::BadSlot {
                        module: src,
                        kind: SlotKind::Output,
                        slot: ostream,
                    });
                }
                Ok(())
            };

        for job in jobs {
            match job {
                Job::Integrate { id, spec } => {
                    if spec.inputs > MAX_STREAMS
                        || spec.joints > MAX_STREAMS
                        || spec.outputs > MAX_STREAMS
                    {
                        return Err(GraphError::StreamCountExceeded);
                    }
                    let idx = id.0 as usize;
                    if ghost.get(idx).is_some_and(Option::is_some) {
                        return Err(GraphError::ModuleExists(*id));
                    }
                    if idx >= ghost.len() {
                        ghost.resize_with(idx + 1, || None);
                    }
                    ghost[idx] = Some(GhostEntry {
                        istreams: vec![None; spec.inputs],
                        jstreams: vec![Vec::new(); spec.joints],
                        outputs: spec.outputs,
                    });
                }
                Job::Connect {
                    src,
                    ostream,
                    dst,
                    istream,
                } => {
                    check_src(&ghost, *src, *ostream)?;
                    let didx = lookup(&ghost, *dst)?;
                    let entry = ghost[didx].as_mut().expect("looked up above");
                    let slot = entry.istreams.get_mut(*istream).ok_or(GraphError::BadSlot {
                        module: *dst,
                        kind: SlotKind::Input,
                        slot: *istream,
                    })?;
                    if slot.is_some() {
                        return Err(GraphError::InputOccupied {
                            module: *dst,
                            slot: *istream,
                        });
                    }
                    *slot = Some(OutputRef {
                        module: *src,
                        ostream: *ostream,
                    });
                }
                Job::JConnect {
                    src,
                    ostream,
                    dst,
                    jstream,
                } => {
                    check_src(&ghost, *src, *ostream)?;
                    let didx = lookup(&ghost, *dst)?;
                    let entry = ghost[didx].as_mut().expect("looked up above");
                    let contributors =
                        entry.jstreams.get_mut(*jstream).ok_or(GraphError::BadSlot {
                            module: *dst,
                            kind: SlotKind::Joint,
                            slot: *jstream,
                        })?;
                    let wanted = OutputRef {
                        module: *src,
                        ostream: *ostream,
                    };
                    if contributors.contains(&wanted) {
                        return Err(GraphError::DuplicateConnection {
                            module: *dst,
                            slot: *jstream,
                        });
                    }
                    contributors.push(wanted);
                }
                Job::Disconnect { dst, istream } => {
                    let didx = lookup(&ghost, *dst)?;
                    let entry = ghost[didx].as_mut().expect("looked up above");
                    let slot = entry.istreams.get_mut(*istream).ok_or(GraphError::BadSlot {
                        module: *dst,
                        kind: SlotKind::Input,
                        slot: *istream,
                    })?;
                    if slot.is_none() {
                        return Err(GraphError::NotConnected {
                            module: *dst,
                            kind: SlotKind::Input,
                            slot: *istream,
                        });
                    }
                    *slot = None;
                }
                Job::ClearInput { dst, istream } => {
                    // An unknown module or empty slot is fine here; a bad slot
                    // index on a live module is still a caller bug.
                    if let Some(entry) = ghost.get_mut(dst.0 as usize).and_then(Option::as_mut) {
                        let slot = entry.istreams.get_mut(*istream).ok_or(GraphError::BadSlot {
                            module: *dst,
                            kind: SlotKind::Input,
                            slot: *istream,
                        })?;
                        *slot = None;
                    }
                }
                Job::JDisconnect {
                    src,
                    ostream,
                    dst,
                    jstream,
                } => {
                    let didx = lookup(&ghost, *dst)?;
                    let entry = ghost[didx].as_mut().expect("looked up above");
                    let contributors =
                        entry.jstreams.get_mut(*jstream).ok_or(GraphError::BadSlot {
                            module: *dst,
                            kind: SlotKind::Joint,
                            slot: *jstream,
                        })?;
                    let wanted = OutputRef {
                        module: *src,
                        ostream: *ostream,
                    };
                    let before = contributors.len();
                    contributors.retain(|r| *r != wanted);
                    if contributors.len() == before {
                        return Err(GraphError::NotConnected {
                            module: *dst,
                            kind: SlotKind::Joint,
                            slot: *jstream,
                        });
                    }
                }
                Job::Access { module, .. } => {
                    lookup(&ghost, *module)?;
                }
                Job::Discard { id } => {
                    let idx = lookup(&ghost, *id)?;
                    ghost[idx] = None;
                    for entry in ghost.iter_mut().flatten() {
                        for slot in &mut entry.istreams {
                            if slot.is_some_and(|r| r.module == *id) {
                                *slot = None;
                            }
                        }
                        for contributors in &mut entry.jstreams {
                            contributors.retain(|r| r.module != *id);
                        }
                    }
                }
            }
        }

        ghost_is_acyclic(&ghost)
    }

    /// Executes one block following a pre-resolved schedule.
    ///
    /// Allocation-free: inputs are resolved to resident pool blocks, the
    /// module's own output blocks are moved out of the pool for the duration
    /// of its `process` call, and joint sums are accumulated into pooled
    /// scratch blocks. A block found non-finite after `process` is replaced
    /// with silence and the fault is recorded.
    pub(crate) fn run_block(
        &mut self,
        schedule: &Schedule,
        frames: usize,
        tick: u64,
        rate: BlockRate,
        faults: &mut FaultLog,
    ) {
        let Self {
            entries,
            pool,
            out_scratch,
            ..
        } = self;

        for step in schedule.steps() {
            let entry = entries[step.module.0 as usize]
                .as_mut()
                .expect("scheduled module missing");

            // Joint sums first, into pooled scratch.
            for (slot, &jbuf) in step.jbufs.iter().enumerate() {
                let mut scratch = pool.take(jbuf);
                scratch[..frames].fill(0.0);
                for &src in &step.jsrc[slot] {
                    let contrib = pool.get(src);
                    for (acc, s) in scratch[..frames].iter_mut().zip(&contrib[..frames]) {
                        *acc += s;
                    }
                }
                pool.restore(jbuf, scratch);
            }

            // Move this module's output blocks out before borrowing inputs.
            for &obuf in &step.out_bufs {
                out_scratch.push(pool.take(obuf));
            }

            let mut inputs: [&[f32]; MAX_STREAMS] = [pool.silence(); MAX_STREAMS];
            for (i, buf) in step.in_bufs.iter().enumerate() {
                if let Some(buf) = buf {
                    inputs[i] = pool.get(*buf);
                }
            }
            let mut joints: [&[f32]; MAX_STREAMS] = [pool.silence(); MAX_STREAMS];
            for (i, &jbuf) in step.jbufs.iter().enumerate() {
                joints[i] = pool.get(jbuf);
            }

            let mut io = ProcessIo {
                inputs: &inputs[..step.in_bufs.len()],
                joints: &joints[..step.jbufs.len()],
                outputs: out_scratch,
                frames,
                tick,
                rate,
            };
            entry.processor.process(&mut io);

            for block in out_scratch.iter_mut() {
                if block[..frames].iter().any(|s| !s.is_finite()) {
                    block[..frames].fill(0.0);
                    faults.record(RuntimeFault::NonFiniteOutput {
                        module: step.module,
                        tick,
                    });
                }
            }
            for (&obuf, block) in step.out_bufs.iter().zip(out_scratch.drain(..)) {
                pool.restore(obuf, block);
            }
        }
    }
}

/// Kahn's algorithm over the ghost topology; only the cycle verdict matters.
fn ghost_is_acyclic(ghost: &[Option<GhostEntry>]) -> Result<(), GraphError> {
    let n = ghost.len();
    let mut indegree = vec![0usize; n];
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut live = 0usize;

    for (idx, entry) in ghost.iter().enumerate() {
        let Some(entry) = entry else { continue };
        live += 1;
        let sources = entry
            .istreams
            .iter()
            .flatten()
            .chain(entry.jstreams.iter().flatten());
        for src in sources {
            indegree[idx] += 1;
            successors[src.module.0 as usize].push(idx);
        }
    }

    let mut ready: Vec<usize> = (0..n)
        .filter(|&i| ghost[i].is_some() && indegree[i] == 0)
        .collect();
    let mut visited = 0usize;
    while let Some(idx) = ready.pop() {
        visited += 1;
        for &next in &successors[idx] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                ready.push(next);
            }
        }
    }
    if visited == live {
        Ok(())
    } else {
        Err(GraphError::CycleDetected)
    }
}
