//! Module identity, stream arity, and the processor interface.
//!
//! A module is the leaf unit of computation: for one block it consumes the
//! blocks on its declared input streams and fills its declared output streams.
//! Stream counts are fixed at creation; only connections change afterwards.

use core::any::Any;
use core::fmt;
use core::time::Duration;

use crate::pool::Block;

/// Maximum number of streams of one kind (inputs, joints, or outputs) per module.
///
/// Fixed-size arrays of this length carry the per-block stream references,
/// keeping the execution path free of heap allocation.
pub const MAX_STREAMS: usize = 8;

/// Opaque handle identifying a live module in the flow graph.
///
/// Handles are allocated eagerly when a job is recorded, so jobs later in the
/// same transaction can reference modules integrated earlier in it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub(crate) u32);

impl ModuleId {
    /// Returns the raw handle value.
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// Cost classifier used as a scheduling heuristic.
///
/// The scheduler batches same-cost modules at equal dependency depth for cache
/// locality; correctness never depends on the classification.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ModuleCost {
    /// Trivial per-block work (mixers, gains, routing glue).
    #[default]
    Cheap,
    /// Heavy per-block work (oscillator banks, filters, effect tails).
    Expensive,
}

/// Established block timing: sample rate and frames per block.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlockRate {
    /// Sample rate in Hz.
    pub sample_rate: f32,
    /// Frames per processing block.
    pub block_frames: usize,
}

impl BlockRate {
    /// Wall-clock duration of one block at this rate.
    pub fn block_duration(&self) -> Duration {
        Duration::from_secs_f64(self.block_frames as f64 / f64::from(self.sample_rate))
    }
}

/// Per-block view handed to [`ModuleProcessor::process`].
///
/// Input and joint slots always resolve to a readable block: unconnected
/// inputs read the engine's shared silence block, and joint slots read the
/// commutative sum of all their contributors (summation is order-independent;
/// no contributor priority exists or is observable).
pub struct ProcessIo<'a> {
    pub(crate) inputs: &'a [&'a [f32]],
    pub(crate) joints: &'a [&'a [f32]],
    pub(crate) outputs: &'a mut [Block],
    pub(crate) frames: usize,
    pub(crate) tick: u64,
    pub(crate) rate: BlockRate,
}

impl ProcessIo<'_> {
    /// The block on input stream `slot` (silence when unconnected).
    pub fn input(&self, slot: usize) -> &[f32] {
        &self.inputs[slot][..self.frames]
    }

    /// The summed block on joint input `slot` (silence when no contributors).
    pub fn joint(&self, slot: usize) -> &[f32] {
        &self.joints[slot][..self.frames]
    }

    /// The writable block for output stream `slot`.
    pub fn output(&mut self, slot: usize) -> &mut [f32] {
        &mut self.outputs[slot][..self.frames]
    }

    /// Number of frames in this block.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Monotonic frame counter: frames computed since the rate was established.
    ///
    /// Every tempo- or time-relative module derives its position from this.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> f32 {
        self.rate.sample_rate
    }

    /// The established block timing.
    pub fn rate(&self) -> BlockRate {
        self.rate
    }
}

/// A module's computation, selected at creation time.
///
/// The trait carries exactly the engine-facing operations: `process` runs on
/// the real-time thread once per block, `reset` runs when the block rate is
/// (re)established or after underrun recovery, and retirement uses `Drop`,
/// which the engine arranges to run off the real-time path. Any per-module
/// user state lives inside the implementing value; `as_any_mut` exposes it to
/// sanctioned `access` jobs (the only cross-thread touch the engine permits).
pub trait ModuleProcessor: Send {
    /// Computes one block from the declared inputs into the declared outputs.
    ///
    /// Must not block, allocate, or otherwise leave the real-time domain.
    fn process(&mut self, io: &mut ProcessIo<'_>);

    /// Re-establishes internal state for a new block rate.
    fn reset(&mut self, rate: BlockRate);

    /// Downcast hook for `access` jobs pushed from the control domain.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Everything needed to integrate a module: arity, cost, and the processor.
pub struct ModuleSpec {
    /// Number of regular input stream slots (at most one connection each).
    pub inputs: usize,
    /// Number of joint (many-to-one summing) input slots.
    pub joints: usize,
    /// Number of output stream slots.
    pub outputs: usize,
    /// Scheduling cost classifier.
    pub cost: ModuleCost,
    /// The computation bound to this module for its whole lifetime.
    pub processor: Box<dyn ModuleProcessor>,
}

impl ModuleSpec {
    /// Creates a spec with the given arity and a [`ModuleCost::Cheap`] classifier.
    pub fn new(
        inputs: usize,
        joints: usize,
        outputs: usize,
        processor: Box<dyn ModuleProcessor>,
    ) -> Self {
        Self {
            inputs,
            joints,
            outputs,
            cost: ModuleCost::Cheap,
            processor,
        }
    }

    /// Overrides the cost classifier.
    pub fn with_cost(mut self, cost: ModuleCost) -> Self {
        self.cost = cost;
        self
    }
}

impl fmt::Debug for ModuleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleSpec")
            .field("inputs", &self.inputs)
            .field("joints", &self.joints)
            .field("outputs", &self.outputs)
            .field("cost", &self.cost)
            .finish_non_exhaustive()
    }
}

/// A specific output stream of a specific module, the source end of an edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OutputRef {
    /// The producing module.
    pub module: ModuleId,
    /// Output slot index on that module.
    pub ostream: usize,
}
