//! `cue-core` is a shader-resource binding and descriptor-update engine.
//!
//! Applications bind descriptors per shader stage; the engine keeps them in chunked CPU-side
//! tables and only materializes GPU-visible state when a draw or dispatch is committed:
//! - Double-buffered chunks keep descriptors an in-flight draw reads intact (see [`chunk`]).
//! - Ring-buffered descriptor tables bridge CPU/GPU latency (see [`RingBuffer`]).
//! - Precompiled [`InputParameterCache`]s decide whether each shader input lands in an inline
//!   register or the extended block.
//! - [`Engine`] drives commit/release and writes everything through a [`CommandSink`].

mod bitset;
mod config;
mod descriptor;
mod engine;
mod error;
mod extended;
mod heap;
mod ring;
mod sink;
mod slot_table;
mod stage;

pub mod chunk;
pub mod input;

pub use bitset::{SlotMask, SLOT_MASK_BITS};
pub use chunk::{BlockId, BlockOwner, ChunkView};
pub use config::{
    EngineConfig, SlotCounts, UnboundPolicy, DEFAULT_INLINE_USER_DATA_DWORDS,
    DEFAULT_MAX_EXTENDED_DWORDS, DEFAULT_RING_DEPTH, MAX_EXTENDED_DWORDS,
    MAX_INLINE_USER_DATA_DWORDS, MIN_INLINE_USER_DATA_DWORDS, MIN_RING_DEPTH,
};
pub use descriptor::{BufferDescriptor, GpuAddress, ResourceDescriptor, SamplerDescriptor};
pub use engine::{Engine, EngineStats, FetchShaderInfo, ShaderBinding, ShaderHandle};
pub use error::CueError;
pub use extended::{ExtendedDataAllocator, EXTENDED_BLOCK_ALIGNMENT};
pub use heap::{
    compute_required_heap_size, ring_element_size, DescriptorHeap, HeapArena,
    RING_ELEMENT_ALIGNMENT,
};
pub use input::{
    InputParameterCache, InputUsage, InputUsageList, InputUsageResolver, InputUsageType,
    ResolverLimits,
};
pub use ring::RingBuffer;
pub use sink::CommandSink;
pub use slot_table::{BindReport, ResourceSlotTable, SharedSlotTable};
pub use stage::{
    ResourceKind, ResourceKindFlags, ScalarKind, ShaderStage, SharedTable, StageFlags,
    MAX_CHUNK_SLOTS, MAX_SLOTS,
};
