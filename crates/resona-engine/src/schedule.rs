//! Schedule derivation: topological ordering with pre-resolved buffers.
//!
//! A [`Schedule`] is an immutable execution plan derived from the graph after
//! every structural change. Each step carries the pool buffer indices of its
//! inputs, joint contributors, and outputs, so the execution path does no
//! lookups beyond array indexing. Within one dependency depth, cheap modules
//! run before expensive ones; this is a cache-locality heuristic and never a
//! correctness property.

use crate::error::GraphError;
use crate::graph::FlowGraph;
use crate::module::{ModuleCost, ModuleId};

/// One module execution in the plan.
pub(crate) struct Step {
    pub(crate) module: ModuleId,
    /// Pool buffer feeding each regular input slot, `None` for silence.
    pub(crate) in_bufs: Vec<Option<usize>>,
    /// Pool buffers of the contributors to each joint slot.
    pub(crate) jsrc: Vec<Vec<usize>>,
    /// Scratch pool buffer per joint slot.
    pub(crate) jbufs: Vec<usize>,
    /// Pool buffer backing each output stream.
    pub(crate) out_bufs: Vec<usize>,
}

/// Immutable execution plan for one topology.
#[derive(Default)]
pub(crate) struct Schedule {
    steps: Vec<Step>,
}

impl Schedule {
    pub(crate) fn steps(&self) -> &[Step] {
        &self.steps
    }
}

/// Owns the current schedule and tracks whether it is stale.
pub(crate) struct Scheduler {
    schedule: Schedule,
    dirty: bool,
}

impl Scheduler {
    pub(crate) fn new() -> Self {
        Self {
            schedule: Schedule::default(),
            dirty: false,
        }
    }

    pub(crate) fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Marks the plan stale after a structural change.
    pub(crate) fn invalidate(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Re-derives the plan from the graph.
    ///
    /// Kahn's algorithm over module dependencies, processed one dependency
    /// depth at a time with cheap modules batched ahead of expensive ones.
    /// The graph is validated acyclic at commit time, so a cycle here is an
    /// internal inconsistency; it is still reported rather than looped on.
    pub(crate) fn rebuild(&mut self, graph: &FlowGraph) -> Result<(), GraphError> {
        let n = graph.entries.len();
        let mut indegree = vec![0usize; n];
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut live = 0usize;

        for (idx, entry) in graph.entries.iter().enumerate() {
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

        let mut steps = Vec::with_capacity(live);
        let mut depth: Vec<usize> = (0..n)
            .filter(|&i| graph.entries[i].is_some() && indegree[i] == 0)
            .collect();
        let mut next = Vec::new();

        while !depth.is_empty() {
            depth.sort_unstable();
            for pass in [ModuleCost::Cheap, ModuleCost::Expensive] {
                for &idx in &depth {
                    let entry = graph.entries[idx]
                        .as_ref()
                        .expect("ready set holds live modules");
                    if entry.cost != pass {
                        continue;
                    }
                    steps.push(resolve_step(graph, ModuleId(idx as u32)));
                }
            }
            for &idx in &depth {
                for &succ in &successors[idx] {
                    indegree[succ] -= 1;
                    if indegree[succ] == 0 {
                        next.push(succ);
                    }
                }
            }
            depth.clear();
            core::mem::swap(&mut depth, &mut next);
        }

        if steps.len() != live {
            return Err(GraphError::CycleDetected);
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(modules = steps.len(), "schedule rebuilt");
        self.schedule = Schedule { steps };
        self.dirty = false;
        Ok(())
    }
}

fn resolve_step(graph: &FlowGraph, module: ModuleId) -> Step {
    let entry = graph.entries[module.0 as usize]
        .as_ref()
        .expect("resolving live module");
    let in_bufs = entry
        .istreams
        .iter()
        .map(|slot| slot.map(|src| source_buf(graph, src)))
        .collect();
    let jsrc = entry
        .jstreams
        .iter()
        .map(|contributors| {
            let mut bufs: Vec<usize> = contributors
                .iter()
                .map(|src| source_buf(graph, *src))
                .collect();
            // Canonical summing order: float addition is not associative, so
            // without this the sum would depend on connection order.
            bufs.sort_unstable();
            bufs
        })
        .collect();
    Step {
        module,
        in_bufs,
        jsrc,
        jbufs: entry.jbufs.clone(),
        out_bufs: entry.obufs.clone(),
    }
}

fn source_buf(graph: &FlowGraph, src: crate::module::OutputRef) -> usize {
    graph.entries[src.module.0 as usize]
        .as_ref()
        .expect("connection source is live")
        .obufs[src.ostream]
}
