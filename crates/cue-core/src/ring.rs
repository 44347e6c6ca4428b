//! Rotating descriptor-table ring for one (stage, kind).
//!
//! When a shader reads a kind through a single table pointer, each commit copies the kind's
//! active slot range into the next ring element and points the shader at that element. Earlier
//! elements stay untouched while the GPU may still read them.
//!
//! The producer may only run ahead of the consumer by a bounded amount. Rather than wait on
//! every commit, the ring reports when its head crosses the start of the buffer or the half-way
//! element; the engine inserts a wait-for-consumer into the stream only if such a crossing
//! happened since the last synchronization.

use crate::descriptor::GpuAddress;

#[derive(Clone, Debug)]
pub struct RingBuffer {
    base: GpuAddress,
    elem_size: u64,
    elem_count: u32,
    head: u32,
    half_point: u32,
    /// Set when the head crossed the start or half-point since the last frame boundary.
    wrapped: bool,
    advances: u64,
}

impl RingBuffer {
    /// `elem_count` must be at least 4; the engine validates this through its configuration.
    pub fn new(base: GpuAddress, elem_size: u64, elem_count: u32) -> Self {
        debug_assert!(elem_count >= 4);
        Self {
            base,
            elem_size,
            elem_count,
            head: 0,
            half_point: elem_count / 2,
            wrapped: false,
            advances: 0,
        }
    }

    pub fn base(&self) -> GpuAddress {
        self.base
    }

    pub fn elem_size(&self) -> u64 {
        self.elem_size
    }

    pub fn elem_count(&self) -> u32 {
        self.elem_count
    }

    pub fn head(&self) -> u32 {
        self.head
    }

    pub fn half_point(&self) -> u32 {
        self.half_point
    }

    /// Total number of `advance_head` calls, across frames.
    pub fn advances(&self) -> u64 {
        self.advances
    }

    pub fn wrapped_since_frame_boundary(&self) -> bool {
        self.wrapped
    }

    /// Address the next table copy should be written to.
    pub fn next_write_address(&self) -> GpuAddress {
        self.base.offset(u64::from(self.head) * self.elem_size)
    }

    /// Step past the element just written.
    ///
    /// Returns `true` when the new head lands on the start of the buffer or on the half-point.
    pub fn advance_head(&mut self) -> bool {
        self.advances += 1;
        self.head = (self.head + 1) % self.elem_count;
        let crossed = self.head == 0 || self.head == self.half_point;
        self.wrapped |= crossed;
        crossed
    }

    /// Forget wrap bookkeeping at a frame boundary.
    pub fn mark_frame_boundary(&mut self) {
        self.wrapped = false;
    }
}
