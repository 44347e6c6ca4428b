//! Chunks of descriptor slots and the block pool backing them.
//!
//! A chunk tracks two blocks of descriptor bytes:
//!
//! - `current`: the block the next commit will make GPU-visible.
//! - `used`: a snapshot of the previous `current` block, taken when a bind would otherwise
//!   overwrite a slot an already-committed draw may still read.
//!
//! Blocks are owned by the [`BlockPool`]. A block is either owned by a chunk
//! ([`BlockOwner::Current`]) or waiting for the draw that last read it to retire
//! ([`BlockOwner::Retiring`]). The only transfer between the two is [`BlockPool::retire`].

use std::collections::VecDeque;

use tracing::trace;

use crate::bitset::{chunk_range, iter_chunk_bits};
use crate::descriptor::GpuAddress;

/// Index of a block inside a [`BlockPool`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockId(u32);

impl BlockId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockOwner {
    /// Held by a chunk as its `current` or `used` block.
    Current,
    /// Dropped by its chunk; kept alive until `draw` completes on the GPU.
    Retiring { draw: u64 },
}

#[derive(Debug)]
pub struct Block {
    bytes: Box<[u8]>,
    address: Option<GpuAddress>,
    owner: BlockOwner,
    /// Most recent draw that was committed while reading this block.
    last_draw: Option<u64>,
    /// CPU contents changed since the last flush to scratch.
    dirty: bool,
}

impl Block {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn address(&self) -> Option<GpuAddress> {
        self.address
    }

    pub fn owner(&self) -> BlockOwner {
        self.owner
    }

    pub fn last_draw(&self) -> Option<u64> {
        self.last_draw
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn write(&mut self, offset: usize, src: &[u8]) {
        self.bytes[offset..offset + src.len()].copy_from_slice(src);
        self.dirty = true;
    }

    pub(crate) fn zero(&mut self, offset: usize, len: usize) {
        self.bytes[offset..offset + len].fill(0);
        self.dirty = true;
    }

    pub(crate) fn set_address(&mut self, address: GpuAddress) {
        self.address = Some(address);
    }

    pub(crate) fn mark_flushed(&mut self, draw: u64) {
        self.dirty = false;
        self.last_draw = Some(draw);
    }
}

/// Slab of descriptor blocks plus the queue of blocks waiting on draw completion.
#[derive(Debug, Default)]
pub struct BlockPool {
    blocks: Vec<Option<Block>>,
    free: Vec<u32>,
    retiring: VecDeque<(u64, BlockId)>,
    completed_draw: u64,
}

impl BlockPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a zero-filled block owned by a chunk.
    pub fn alloc(&mut self, size_bytes: usize) -> BlockId {
        let block = Block {
            bytes: vec![0u8; size_bytes].into_boxed_slice(),
            address: None,
            owner: BlockOwner::Current,
            last_draw: None,
            dirty: true,
        };
        match self.free.pop() {
            Some(idx) => {
                self.blocks[idx as usize] = Some(block);
                BlockId(idx)
            }
            None => {
                self.blocks.push(Some(block));
                BlockId((self.blocks.len() - 1) as u32)
            }
        }
    }

    pub fn get(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id.index()).and_then(Option::as_ref)
    }

    pub(crate) fn get_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.blocks.get_mut(id.index()).and_then(Option::as_mut)
    }

    /// Move a block out of chunk ownership.
    ///
    /// Blocks never read by a still-pending draw are freed immediately.
    pub fn retire(&mut self, id: BlockId) {
        let completed = self.completed_draw;
        let Some(block) = self.get_mut(id) else {
            return;
        };
        debug_assert_eq!(block.owner, BlockOwner::Current);
        match block.last_draw {
            Some(draw) if draw > completed => {
                block.owner = BlockOwner::Retiring { draw };
                self.retiring.push_back((draw, id));
            }
            _ => self.free_block(id),
        }
    }

    /// Release every retiring block whose draw is `<= draw`.
    ///
    /// Returns the number of blocks released.
    pub fn release_completed(&mut self, draw: u64) -> usize {
        self.completed_draw = self.completed_draw.max(draw);
        let mut released = 0;
        // Draws retire in order but blocks may be queued out of draw order (a block can be
        // dropped long after its last read), so scan the whole queue.
        let mut i = 0;
        while i < self.retiring.len() {
            let (block_draw, id) = self.retiring[i];
            if block_draw <= self.completed_draw {
                self.retiring.remove(i);
                self.free_block(id);
                released += 1;
            } else {
                i += 1;
            }
        }
        released
    }

    pub fn completed_draw(&self) -> u64 {
        self.completed_draw
    }

    pub fn retiring(&self) -> impl Iterator<Item = (u64, BlockId)> + '_ {
        self.retiring.iter().copied()
    }

    pub fn live_blocks(&self) -> usize {
        self.blocks.iter().filter(|b| b.is_some()).count()
    }

    fn free_block(&mut self, id: BlockId) {
        if let Some(slot) = self.blocks.get_mut(id.index()) {
            if slot.take().is_some() {
                self.free.push(id.0);
            }
        }
    }
}

/// Geometry of the slots a chunk covers.
#[derive(Clone, Copy, Debug)]
pub struct ChunkLayout {
    pub slots: u32,
    pub stride_bytes: u32,
}

impl ChunkLayout {
    pub const fn block_bytes(self) -> usize {
        (self.slots * self.stride_bytes) as usize
    }

    const fn slot_offset(self, local: u32) -> usize {
        (local * self.stride_bytes) as usize
    }
}

/// Outcome of binding into one chunk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChunkBindOutcome {
    pub conflict: bool,
}

/// Point-in-time view of a chunk, for tools and tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkView {
    pub current_slots: u16,
    pub used_slots: u16,
    pub current: Option<BlockId>,
    pub used: Option<BlockId>,
}

#[derive(Debug, Default)]
pub struct Chunk {
    current_slots: u16,
    used_slots: u16,
    current: Option<BlockId>,
    used: Option<BlockId>,
    reconciled_epoch: u64,
}

impl Chunk {
    pub fn view(&self) -> ChunkView {
        ChunkView {
            current_slots: self.current_slots,
            used_slots: self.used_slots,
            current: self.current,
            used: self.used,
        }
    }

    /// Slots holding valid descriptors (in either block).
    pub fn valid_slots(&self) -> u16 {
        self.current_slots | self.used_slots
    }

    pub fn current_block(&self) -> Option<BlockId> {
        self.current
    }

    /// Bind `count` slots starting at chunk-local slot `first`.
    ///
    /// `data` holds `count * stride` bytes, or is `None` to unbind.
    pub fn bind(
        &mut self,
        pool: &mut BlockPool,
        layout: ChunkLayout,
        first: u32,
        count: u32,
        data: Option<&[u8]>,
    ) -> ChunkBindOutcome {
        debug_assert!(first + count <= layout.slots);
        let mask = chunk_range(first, count);
        if mask == 0 {
            return ChunkBindOutcome::default();
        }

        let mut outcome = ChunkBindOutcome::default();
        if self.used.is_none() && self.current_slots & mask != 0 {
            // The current block may already be referenced by a committed draw; keep it intact
            // and start a fresh one.
            trace!(
                current_slots = self.current_slots,
                requested = mask,
                "chunk conflict snapshot"
            );
            self.used = self.current.take();
            self.used_slots = self.current_slots;
            self.current_slots = 0;
            outcome.conflict = true;
        }

        match data {
            Some(data) => {
                debug_assert_eq!(data.len(), (count * layout.stride_bytes) as usize);
                let id = self.ensure_current(pool, layout);
                if let Some(block) = pool.get_mut(id) {
                    block.write(layout.slot_offset(first), data);
                }
                self.current_slots |= mask;
                self.used_slots &= !mask;
            }
            None => {
                self.current_slots &= !mask;
                self.used_slots &= !mask;
                if let Some(block) = self.current.and_then(|id| pool.get_mut(id)) {
                    block.zero(
                        layout.slot_offset(first),
                        (count * layout.stride_bytes) as usize,
                    );
                }
            }
        }

        debug_assert_eq!(self.current_slots & self.used_slots, 0);
        outcome
    }

    /// Make `current` hold every valid slot, then hand the `used` block back to the pool.
    ///
    /// Runs at most once per `epoch`. Returns the number of slots copied.
    pub fn reconcile(&mut self, pool: &mut BlockPool, layout: ChunkLayout, epoch: u64) -> u32 {
        if self.reconciled_epoch == epoch {
            return 0;
        }
        self.reconciled_epoch = epoch;

        let Some(used) = self.used.take() else {
            return 0;
        };

        let to_copy = self.used_slots & !self.current_slots;
        let mut copied = 0;
        if to_copy != 0 {
            let current = self.ensure_current(pool, layout);
            let stride = layout.stride_bytes as usize;
            let mut scratch = [0u8; 32];
            for local in iter_chunk_bits(to_copy) {
                let offset = layout.slot_offset(local);
                let Some(src) = pool.get(used) else {
                    break;
                };
                scratch[..stride].copy_from_slice(&src.bytes()[offset..offset + stride]);
                if let Some(dst) = pool.get_mut(current) {
                    dst.write(offset, &scratch[..stride]);
                }
                copied += 1;
            }
            trace!(copied, "chunk reconciled from used block");
        }

        self.current_slots |= self.used_slots;
        self.used_slots = 0;
        pool.retire(used);
        copied
    }

    /// Descriptor bytes for `local`, if bound.
    pub fn slot_bytes<'a>(
        &self,
        pool: &'a BlockPool,
        layout: ChunkLayout,
        local: u32,
    ) -> Option<&'a [u8]> {
        let bit = 1u16 << local;
        let id = if self.current_slots & bit != 0 {
            self.current?
        } else if self.used_slots & bit != 0 {
            self.used?
        } else {
            return None;
        };
        let offset = layout.slot_offset(local);
        pool.get(id)
            .map(|b| &b.bytes()[offset..offset + layout.stride_bytes as usize])
    }

    /// Drop all bindings. Blocks go through the pool's retirement path.
    pub fn reset(&mut self, pool: &mut BlockPool) {
        if let Some(id) = self.used.take() {
            pool.retire(id);
        }
        if let Some(id) = self.current.take() {
            pool.retire(id);
        }
        self.current_slots = 0;
        self.used_slots = 0;
        self.reconciled_epoch = 0;
    }

    fn ensure_current(&mut self, pool: &mut BlockPool, layout: ChunkLayout) -> BlockId {
        match self.current {
            Some(id) => id,
            None => {
                let id = pool.alloc(layout.block_bytes());
                self.current = Some(id);
                id
            }
        }
    }
}
