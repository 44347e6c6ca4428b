//! The command-stream interface the engine writes into.
//!
//! The engine never encodes packets itself. Every register write, scratch upload, GPU-side copy
//! and synchronization primitive goes through a [`CommandSink`], in the order the GPU must see
//! them.

use crate::descriptor::GpuAddress;
use crate::stage::ShaderStage;

/// Command-stream emitter consumed by [`crate::Engine`].
///
/// Scratch memory handed out by [`CommandSink::allocate_scratch`] is append-only and owned by the
/// sink; the engine writes each allocation once and never reuses an address.
pub trait CommandSink {
    /// Reserve `size` bytes of command-stream scratch aligned to `align`.
    ///
    /// Returns `None` when the sink cannot satisfy the request.
    fn allocate_scratch(&mut self, size: u32, align: u32) -> Option<GpuAddress>;

    /// CPU write into previously allocated scratch.
    fn write_scratch(&mut self, dst: GpuAddress, bytes: &[u8]);

    /// GPU-side copy, executed in stream order.
    fn copy_memory(&mut self, dst: GpuAddress, src: GpuAddress, len: u32);

    /// Load consecutive user-data registers of `stage` starting at `register`.
    fn set_user_data(&mut self, stage: ShaderStage, register: u32, words: &[u32]);

    /// Load a 64-bit address into registers `register` and `register + 1`.
    fn set_pointer(&mut self, stage: ShaderStage, register: u32, address: GpuAddress);

    /// Stall the producer until the consumer is at most `max_lag` signals behind.
    fn wait_for_consumer(&mut self, max_lag: u32);

    /// Mark the end of a batch of producer writes.
    fn signal_producer(&mut self);

    /// Mark that everything up to and including `draw` may be retired once executed.
    fn signal_retirement(&mut self, draw: u64);

    /// Placeholder emitted where a wait was not needed, keeping packet positions stable.
    fn nop(&mut self);
}
