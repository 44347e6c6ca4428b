//! Shader stages, resource kinds and the per-kind binding model.
//!
//! Each stage owns an independent slot space per [`ResourceKind`]. Slots are grouped into
//! power-of-two chunks (`ResourceKind::chunk_slots`) which are the unit of CPU/GPU block
//! allocation.

use core::fmt;

use bitflags::bitflags;

/// Upper bound on slots for any kind; [`crate::bitset::SlotMask`] is sized to match.
pub const MAX_SLOTS: u32 = 128;

/// Largest chunk size supported by the chunk-local `u16` masks.
pub const MAX_CHUNK_SLOTS: u32 = 16;

/// Programmable pipeline stages with independent resource bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    Vertex,
    Hull,
    Domain,
    Geometry,
    Pixel,
    Compute,
}

impl ShaderStage {
    pub const COUNT: usize = 6;

    pub const ALL: [ShaderStage; Self::COUNT] = [
        Self::Vertex,
        Self::Hull,
        Self::Domain,
        Self::Geometry,
        Self::Pixel,
        Self::Compute,
    ];

    /// Stages committed by a draw (everything except compute).
    pub const GRAPHICS: [ShaderStage; 5] = [
        Self::Vertex,
        Self::Hull,
        Self::Domain,
        Self::Geometry,
        Self::Pixel,
    ];

    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Vertex),
            1 => Some(Self::Hull),
            2 => Some(Self::Domain),
            3 => Some(Self::Geometry),
            4 => Some(Self::Pixel),
            5 => Some(Self::Compute),
            _ => None,
        }
    }

    pub const fn index(self) -> usize {
        match self {
            Self::Vertex => 0,
            Self::Hull => 1,
            Self::Domain => 2,
            Self::Geometry => 3,
            Self::Pixel => 4,
            Self::Compute => 5,
        }
    }

    pub const fn flag(self) -> StageFlags {
        match self {
            Self::Vertex => StageFlags::VERTEX,
            Self::Hull => StageFlags::HULL,
            Self::Domain => StageFlags::DOMAIN,
            Self::Geometry => StageFlags::GEOMETRY,
            Self::Pixel => StageFlags::PIXEL,
            Self::Compute => StageFlags::COMPUTE,
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => write!(f, "vertex"),
            ShaderStage::Hull => write!(f, "hull"),
            ShaderStage::Domain => write!(f, "domain"),
            ShaderStage::Geometry => write!(f, "geometry"),
            ShaderStage::Pixel => write!(f, "pixel"),
            ShaderStage::Compute => write!(f, "compute"),
        }
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct StageFlags: u32 {
        const VERTEX = 1 << 0;
        const HULL = 1 << 1;
        const DOMAIN = 1 << 2;
        const GEOMETRY = 1 << 3;
        const PIXEL = 1 << 4;
        const COMPUTE = 1 << 5;
        const GRAPHICS = Self::VERTEX.bits()
            | Self::HULL.bits()
            | Self::DOMAIN.bits()
            | Self::GEOMETRY.bits()
            | Self::PIXEL.bits();
    }
}

/// Slot-addressed resource kinds tracked per stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    /// Read-only textures and buffers (`t#`).
    Resource,
    /// Read-write resources (`u#`).
    RwResource,
    /// Samplers (`s#`).
    Sampler,
    /// Constant buffers (`b#`).
    ConstantBuffer,
    /// Vertex buffers fetched by the fetch shader.
    VertexBuffer,
}

impl ResourceKind {
    pub const COUNT: usize = 5;

    pub const ALL: [ResourceKind; Self::COUNT] = [
        Self::Resource,
        Self::RwResource,
        Self::Sampler,
        Self::ConstantBuffer,
        Self::VertexBuffer,
    ];

    pub const fn index(self) -> usize {
        match self {
            Self::Resource => 0,
            Self::RwResource => 1,
            Self::Sampler => 2,
            Self::ConstantBuffer => 3,
            Self::VertexBuffer => 4,
        }
    }

    /// Bytes occupied by one slot's descriptor.
    ///
    /// Resource slots are always wide enough for an image descriptor; buffer descriptors bound
    /// into them only populate the first half.
    pub const fn stride_bytes(self) -> u32 {
        match self {
            Self::Resource | Self::RwResource => 32,
            Self::Sampler | Self::ConstantBuffer | Self::VertexBuffer => 16,
        }
    }

    pub const fn stride_dwords(self) -> u32 {
        self.stride_bytes() / 4
    }

    /// Maximum number of slots a stage exposes for this kind.
    pub const fn max_slots(self) -> u32 {
        match self {
            Self::Resource => 128,
            Self::RwResource => 16,
            Self::Sampler => 16,
            Self::ConstantBuffer => 20,
            Self::VertexBuffer => 32,
        }
    }

    /// Slots per chunk (power of two, at most [`MAX_CHUNK_SLOTS`]).
    pub const fn chunk_slots(self) -> u32 {
        16
    }

    pub const fn chunk_bytes(self) -> u32 {
        self.chunk_slots() * self.stride_bytes()
    }

    pub const fn flag(self) -> ResourceKindFlags {
        match self {
            Self::Resource => ResourceKindFlags::RESOURCE,
            Self::RwResource => ResourceKindFlags::RW_RESOURCE,
            Self::Sampler => ResourceKindFlags::SAMPLER,
            Self::ConstantBuffer => ResourceKindFlags::CONSTANT_BUFFER,
            Self::VertexBuffer => ResourceKindFlags::VERTEX_BUFFER,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Resource => write!(f, "resource"),
            ResourceKind::RwResource => write!(f, "rw-resource"),
            ResourceKind::Sampler => write!(f, "sampler"),
            ResourceKind::ConstantBuffer => write!(f, "constant-buffer"),
            ResourceKind::VertexBuffer => write!(f, "vertex-buffer"),
        }
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct ResourceKindFlags: u32 {
        const RESOURCE = 1 << 0;
        const RW_RESOURCE = 1 << 1;
        const SAMPLER = 1 << 2;
        const CONSTANT_BUFFER = 1 << 3;
        const VERTEX_BUFFER = 1 << 4;
    }
}

impl ResourceKindFlags {
    pub fn kinds(self) -> impl Iterator<Item = ResourceKind> {
        ResourceKind::ALL
            .into_iter()
            .filter(move |k| self.contains(k.flag()))
    }
}

/// One-dword values a shader may read straight from user data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    GdsMemoryRange,
    AppendConsumeCounterRange,
    GwsBase,
    BoolConstants,
}

impl ScalarKind {
    pub const COUNT: usize = 4;

    pub const ALL: [ScalarKind; Self::COUNT] = [
        Self::GdsMemoryRange,
        Self::AppendConsumeCounterRange,
        Self::GwsBase,
        Self::BoolConstants,
    ];

    pub const fn index(self) -> usize {
        match self {
            Self::GdsMemoryRange => 0,
            Self::AppendConsumeCounterRange => 1,
            Self::GwsBase => 2,
            Self::BoolConstants => 3,
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarKind::GdsMemoryRange => write!(f, "gds-memory-range"),
            ScalarKind::AppendConsumeCounterRange => write!(f, "append-consume-counter-range"),
            ScalarKind::GwsBase => write!(f, "gws-base"),
            ScalarKind::BoolConstants => write!(f, "bool-constants"),
        }
    }
}

/// Singleton, stage-shared descriptor tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SharedTable {
    Global,
    Streamout,
}

impl SharedTable {
    pub const COUNT: usize = 2;

    pub const ALL: [SharedTable; Self::COUNT] = [Self::Global, Self::Streamout];

    pub const fn index(self) -> usize {
        match self {
            Self::Global => 0,
            Self::Streamout => 1,
        }
    }

    pub const fn slots(self) -> u32 {
        match self {
            Self::Global => 16,
            Self::Streamout => 4,
        }
    }

    pub const fn stride_bytes(self) -> u32 {
        16
    }
}

impl fmt::Display for SharedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SharedTable::Global => write!(f, "global-table"),
            SharedTable::Streamout => write!(f, "streamout-table"),
        }
    }
}

const _: () = {
    let mut i = 0;
    while i < ResourceKind::COUNT {
        let kind = ResourceKind::ALL[i];
        assert!(kind.max_slots() <= MAX_SLOTS);
        assert!(kind.chunk_slots().is_power_of_two());
        assert!(kind.chunk_slots() <= MAX_CHUNK_SLOTS);
        i += 1;
    }
    assert!(SharedTable::Global.slots() <= MAX_CHUNK_SLOTS);
    assert!(SharedTable::Streamout.slots() <= MAX_CHUNK_SLOTS);
};
