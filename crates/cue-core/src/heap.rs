//! The engine's fixed descriptor heap.
//!
//! The heap holds nothing but ring-buffer elements. Its size is a pure function of the ring
//! depth, the per-kind slot counts and which kinds are ring-addressed, so callers size it with
//! [`compute_required_heap_size`] before handing it to `Engine::init`.
//!
//! Layout, in order: for every stage (in [`ShaderStage::ALL`] order), for every ring kind (in
//! [`ResourceKind::ALL`] order), `ring_depth` elements. Each element is the kind's
//! `slot_count * stride` bytes, padded up to [`RING_ELEMENT_ALIGNMENT`]. That padding is the only
//! slack in the heap.

use core::fmt;

use crate::config::SlotCounts;
use crate::descriptor::GpuAddress;
use crate::error::CueError;
use crate::stage::{ResourceKind, ResourceKindFlags, ShaderStage};

/// Alignment of the heap base and of every ring element.
pub const RING_ELEMENT_ALIGNMENT: u64 = 256;

/// Round `value` up to the nearest multiple of `alignment`.
///
/// `alignment` must be > 0.
pub(crate) fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment > 0);

    let add = alignment - 1;
    match value.checked_add(add) {
        Some(v) => v / alignment * alignment,
        None => u64::MAX / alignment * alignment,
    }
}

/// Padded byte size of one ring element for `kind`.
pub fn ring_element_size(kind: ResourceKind, slot_count: u32) -> u64 {
    align_up(
        u64::from(slot_count) * u64::from(kind.stride_bytes()),
        RING_ELEMENT_ALIGNMENT,
    )
}

/// Bytes of heap `Engine::init` needs for the given ring configuration.
pub fn compute_required_heap_size(
    ring_depth: u32,
    slot_counts: &SlotCounts,
    ring_kinds: ResourceKindFlags,
) -> u64 {
    let per_stage: u64 = ring_kinds
        .kinds()
        .map(|kind| ring_element_size(kind, slot_counts.get(kind)) * u64::from(ring_depth))
        .sum();
    per_stage * ShaderStage::COUNT as u64
}

/// A linear allocator over a fixed byte range.
///
/// Tracks offsets only; the bytes live in [`DescriptorHeap`].
#[derive(Clone)]
pub struct HeapArena {
    base: u64,
    capacity: u64,
    cursor: u64,
}

impl HeapArena {
    /// Create an arena that allocates offsets in `[base, base + capacity)`.
    pub fn new(base: u64, capacity: u64) -> Self {
        Self {
            base,
            capacity,
            cursor: base,
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn remaining(&self) -> u64 {
        self.end().saturating_sub(self.cursor)
    }

    /// Bytes handed out so far, including alignment padding.
    pub fn used(&self) -> u64 {
        self.cursor - self.base
    }

    fn end(&self) -> u64 {
        self.base + self.capacity
    }

    /// Allocate `size` bytes with `alignment`; returns the absolute offset.
    pub fn alloc(&mut self, size: u64, alignment: u64) -> Option<u64> {
        let alignment = alignment.max(1);
        let aligned = align_up(self.cursor, alignment);
        let end = aligned.checked_add(size)?;
        if end > self.end() {
            return None;
        }
        self.cursor = end;
        Some(aligned)
    }
}

impl fmt::Debug for HeapArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapArena")
            .field("base", &self.base)
            .field("capacity", &self.capacity)
            .field("cursor", &self.cursor)
            .finish()
    }
}

/// CPU-visible backing of the heap region handed to `Engine::init`.
pub struct DescriptorHeap {
    base: GpuAddress,
    bytes: Vec<u8>,
    arena: HeapArena,
}

impl DescriptorHeap {
    pub fn new(base: GpuAddress, size_bytes: u64) -> Result<Self, CueError> {
        if base.0 % RING_ELEMENT_ALIGNMENT != 0 {
            return Err(CueError::MisalignedHeap {
                address: base.0,
                alignment: RING_ELEMENT_ALIGNMENT,
            });
        }
        let len = usize::try_from(size_bytes).map_err(|_| CueError::HeapTooSmall {
            required: size_bytes,
            provided: 0,
        })?;
        Ok(Self {
            base,
            bytes: vec![0u8; len],
            arena: HeapArena::new(base.0, size_bytes),
        })
    }

    pub fn base(&self) -> GpuAddress {
        self.base
    }

    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn arena(&self) -> &HeapArena {
        &self.arena
    }

    /// Carve `size` bytes out of the heap.
    pub fn alloc(&mut self, size: u64, alignment: u64) -> Option<GpuAddress> {
        self.arena.alloc(size, alignment).map(GpuAddress)
    }

    pub fn contains(&self, addr: GpuAddress, len: usize) -> bool {
        addr.0 >= self.base.0
            && (addr.0 - self.base.0)
                .checked_add(len as u64)
                .is_some_and(|end| end <= self.size_bytes())
    }

    pub fn read(&self, addr: GpuAddress, len: usize) -> Option<&[u8]> {
        if !self.contains(addr, len) {
            return None;
        }
        let start = (addr.0 - self.base.0) as usize;
        self.bytes.get(start..start + len)
    }

    pub(crate) fn write(&mut self, addr: GpuAddress, src: &[u8]) {
        debug_assert!(self.contains(addr, src.len()));
        if !self.contains(addr, src.len()) {
            return;
        }
        let start = (addr.0 - self.base.0) as usize;
        self.bytes[start..start + src.len()].copy_from_slice(src);
    }
}

impl fmt::Debug for DescriptorHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorHeap")
            .field("base", &self.base)
            .field("size_bytes", &self.bytes.len())
            .field("arena", &self.arena)
            .finish()
    }
}
