//! Descriptor words as the GPU reads them.
//!
//! The engine treats descriptor contents as opaque dwords; these wrappers only fix the size so
//! typed bind helpers can hand slices straight to the byte-oriented slot table.

use bytemuck::{Pod, Zeroable};

/// A GPU virtual address.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GpuAddress(pub u64);

impl GpuAddress {
    pub const NULL: Self = Self(0);

    pub const fn offset(self, bytes: u64) -> Self {
        Self(self.0 + bytes)
    }

    /// Low/high dwords as written into two consecutive user-data registers.
    pub const fn to_dwords(self) -> [u32; 2] {
        [self.0 as u32, (self.0 >> 32) as u32]
    }
}

/// Image or buffer resource descriptor (8 dwords).
///
/// Buffer descriptors bound into resource slots occupy the first 4 dwords.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ResourceDescriptor(pub [u32; 8]);

/// Buffer descriptor (4 dwords): constant, vertex, streamout and global-table entries.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct BufferDescriptor(pub [u32; 4]);

/// Sampler descriptor (4 dwords).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SamplerDescriptor(pub [u32; 4]);

impl ResourceDescriptor {
    pub const SIZE_BYTES: usize = core::mem::size_of::<Self>();

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

impl BufferDescriptor {
    pub const SIZE_BYTES: usize = core::mem::size_of::<Self>();

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

impl SamplerDescriptor {
    pub const SIZE_BYTES: usize = core::mem::size_of::<Self>();

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

/// Read little-endian dwords out of descriptor bytes.
pub(crate) fn bytes_to_dwords(bytes: &[u8], out: &mut Vec<u32>) {
    out.clear();
    out.extend(
        bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])),
    );
}
