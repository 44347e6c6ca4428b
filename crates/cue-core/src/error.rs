use crate::stage::{ResourceKind, ScalarKind, ShaderStage, SharedTable};

/// Errors reported by the engine.
///
/// Apart from `ResourceNotBound`/`ScalarNotBound` (only produced under
/// [`crate::UnboundPolicy::Strict`]), every variant is a contract violation: the content or the
/// engine configuration is wrong and the caller must not retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CueError {
    #[error(
        "{stage} {kind}: {count} slot(s) starting at {start} out of range (capacity {capacity})"
    )]
    SlotRangeOutOfBounds {
        stage: ShaderStage,
        kind: ResourceKind,
        start: u32,
        count: u32,
        capacity: u32,
    },
    #[error("{table}: {count} slot(s) starting at {start} out of range (capacity {capacity})")]
    SharedSlotOutOfBounds {
        table: SharedTable,
        start: u32,
        count: u32,
        capacity: u32,
    },
    #[error("{kind}: descriptor data is {found} bytes, expected {expected}")]
    DescriptorDataSize {
        kind: ResourceKind,
        expected: usize,
        found: usize,
    },
    #[error("{stage}: shader declares {count} inputs, at most {max} are supported")]
    InputTableOverflow {
        stage: ShaderStage,
        count: usize,
        max: usize,
    },
    #[error("{stage}: input usage #{index} is invalid: {reason}")]
    InvalidInputUsage {
        stage: ShaderStage,
        index: usize,
        reason: String,
    },
    #[error("{stage}: input parameter cache was built for different engine limits")]
    CacheLimitsMismatch { stage: ShaderStage },
    #[error("{stage} {kind}: shader reads a table pointer but the kind has no ring")]
    TableWithoutRing {
        stage: ShaderStage,
        kind: ResourceKind,
    },
    #[error("{stage}: stage is active but has no shader bound")]
    MissingShader { stage: ShaderStage },
    #[error("{stage}: input parameter cache was built for the {cache_stage} stage")]
    ShaderStageMismatch {
        stage: ShaderStage,
        cache_stage: ShaderStage,
    },
    #[error("{stage} {kind}: slot {slot} is read by the shader but not bound")]
    ResourceNotBound {
        stage: ShaderStage,
        kind: ResourceKind,
        slot: u32,
    },
    #[error("{stage}: scalar {scalar} is read by the shader but not bound")]
    ScalarNotBound {
        stage: ShaderStage,
        scalar: ScalarKind,
    },
    #[error("{table}: slot {slot} is read by the shader but not bound")]
    SharedSlotNotBound { table: SharedTable, slot: u32 },
    #[error("{stage}: shader reads a fetch shader address but none was supplied")]
    FetchShaderMissing { stage: ShaderStage },
    #[error("{stage}: shader reads a shader resource table but none is set")]
    ShaderResourceTableNotBound { stage: ShaderStage },
    #[error("descriptor heap too small: {required} bytes required, {provided} provided")]
    HeapTooSmall { required: u64, provided: u64 },
    #[error("descriptor heap address 0x{address:x} is not {alignment}-byte aligned")]
    MisalignedHeap { address: u64, alignment: u64 },
    #[error("{stage}: command-stream scratch exhausted allocating {bytes} bytes")]
    ScratchExhausted { stage: ShaderStage, bytes: u32 },
    #[error("ring depth {0} is below the minimum of 4")]
    InvalidRingDepth(u32),
    #[error("inline user-data budget of {dwords} dwords is outside {min}..={max}")]
    InvalidInlineUserData { dwords: u32, min: u32, max: u32 },
    #[error("extended block limit of {dwords} dwords exceeds the maximum of {max}")]
    InvalidExtendedLimit { dwords: u32, max: u32 },
    #[error("{kind}: slot count {count} exceeds the maximum of {max}")]
    InvalidSlotCount {
        kind: ResourceKind,
        count: u32,
        max: u32,
    },
    #[error("engine used before init")]
    NotInitialized,
}
