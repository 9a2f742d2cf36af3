//! Block buffer pool backing every stream in the flow graph.
//!
//! Each module output stream and each joint-sum scratch slot owns one pooled
//! [`Block`]. During execution a module's output blocks are *moved* out of the
//! pool, filled, and moved back — moving a boxed block is a pointer move, not
//! an allocation, so the steady-state path stays allocation-free while the
//! borrow checker sees no aliasing between a module's inputs and outputs.

use core::ops::{Deref, DerefMut};

/// One fixed-size block of samples, heap-backed, pool-owned.
#[derive(Debug)]
pub struct Block(Box<[f32]>);

impl Block {
    pub(crate) fn new(frames: usize) -> Self {
        Self(vec![0.0; frames].into_boxed_slice())
    }
}

impl Deref for Block {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        &self.0
    }
}

impl DerefMut for Block {
    fn deref_mut(&mut self) -> &mut [f32] {
        &mut self.0
    }
}

/// Slot-indexed pool of [`Block`]s plus the shared silence block.
///
/// Slots are allocated when a module is integrated and freed when it is
/// discarded (both on the mutation path, where allocation is permitted).
pub(crate) struct BlockPool {
    slots: Vec<Option<Block>>,
    free: Vec<usize>,
    frames: usize,
    silence: Block,
}

impl BlockPool {
    pub(crate) fn new(frames: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            frames,
            silence: Block::new(frames),
        }
    }

    /// Allocates a zeroed slot and returns its index.
    pub(crate) fn alloc(&mut self) -> usize {
        if let Some(idx) = self.free.pop() {
            self.slots[idx] = Some(Block::new(self.frames));
            idx
        } else {
            self.slots.push(Some(Block::new(self.frames)));
            self.slots.len() - 1
        }
    }

    /// Releases a slot for reuse.
    pub(crate) fn release(&mut self, idx: usize) {
        self.slots[idx] = None;
        self.free.push(idx);
    }

    /// Read access to a resident block.
    ///
    /// Panics if the slot is empty or currently taken — the scheduler
    /// guarantees a module never reads a block it is itself producing.
    pub(crate) fn get(&self, idx: usize) -> &[f32] {
        self.slots[idx].as_deref().expect("block taken or released")
    }

    /// Moves a block out of the pool for exclusive use.
    pub(crate) fn take(&mut self, idx: usize) -> Block {
        self.slots[idx].take().expect("block taken or released")
    }

    /// Returns a previously taken block to its slot.
    pub(crate) fn restore(&mut self, idx: usize, block: Block) {
        debug_assert!(self.slots[idx].is_none(), "restoring into occupied slot");
        self.slots[idx] = Some(block);
    }

    /// The shared all-zero block fed to unconnected inputs.
    pub(crate) fn silence(&self) -> &[f32] {
        &self.silence
    }

    /// Re-sizes every resident block (and the silence block) for a new rate.
    pub(crate) fn set_frames(&mut self, frames: usize) {
        self.frames = frames;
        self.silence = Block::new(frames);
        for slot in &mut self.slots {
            if slot.is_some() {
                *slot = Some(Block::new(frames));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_release_reuses_slots() {
        let mut pool = BlockPool::new(16);
        let a = pool.alloc();
        let b = pool.alloc();
        assert_ne!(a, b);
        pool.release(a);
        let c = pool.alloc();
        assert_eq!(a, c);
    }

    #[test]
    fn take_restore_round_trip() {
        let mut pool = BlockPool::new(4);
        let idx = pool.alloc();
        let mut block = pool.take(idx);
        block[0] = 1.5;
        pool.restore(idx, block);
        assert_eq!(pool.get(idx)[0], 1.5);
    }

    #[test]
    fn silence_is_zero() {
        let pool = BlockPool::new(8);
        assert!(pool.silence().iter().all(|&s| s == 0.0));
        assert_eq!(pool.silence().len(), 8);
    }

    #[test]
    fn set_frames_resizes_resident_blocks() {
        let mut pool = BlockPool::new(4);
        let idx = pool.alloc();
        pool.set_frames(32);
        assert_eq!(pool.get(idx).len(), 32);
        assert_eq!(pool.silence().len(), 32);
    }
}
