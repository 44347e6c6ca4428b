//! Per-stage extended user-data blocks.
//!
//! Inputs that do not fit in a stage's inline registers are packed into a small block of
//! command-stream scratch that the shader reaches through a pointer. The block is rebuilt on the
//! CPU each time the stage is committed and uploaded into fresh scratch only when its contents
//! changed or a bind invalidated a slot it references.

use tracing::debug;

use crate::bitset::SlotMask;
use crate::descriptor::GpuAddress;
use crate::error::CueError;
use crate::sink::CommandSink;
use crate::stage::{ResourceKind, ScalarKind, ShaderStage};

/// Alignment of extended blocks in scratch.
pub const EXTENDED_BLOCK_ALIGNMENT: u32 = 16;

#[derive(Debug)]
pub struct ExtendedDataAllocator {
    stage: ShaderStage,
    staging: Vec<u32>,
    committed: Vec<u32>,
    address: Option<GpuAddress>,
    /// Slots whose descriptors were copied into the block, per kind.
    refs: [SlotMask; ResourceKind::COUNT],
    scalar_refs: [bool; ScalarKind::COUNT],
    dirty: bool,
    allocations: u64,
}

impl ExtendedDataAllocator {
    pub fn new(stage: ShaderStage) -> Self {
        Self {
            stage,
            staging: Vec::new(),
            committed: Vec::new(),
            address: None,
            refs: [SlotMask::EMPTY; ResourceKind::COUNT],
            scalar_refs: [false; ScalarKind::COUNT],
            dirty: true,
            allocations: 0,
        }
    }

    /// Address of the last uploaded block.
    pub fn address(&self) -> Option<GpuAddress> {
        self.address
    }

    pub fn refs(&self, kind: ResourceKind) -> SlotMask {
        self.refs[kind.index()]
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Blocks uploaded so far.
    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    /// Contents of the last uploaded block.
    pub fn committed(&self) -> &[u32] {
        &self.committed
    }

    /// A bind touched `slots` of `kind`. Returns whether the block now needs a fresh upload.
    pub fn note_bind(&mut self, kind: ResourceKind, slots: SlotMask) -> bool {
        if self.refs[kind.index()].intersects(slots) {
            self.dirty = true;
        }
        self.dirty
    }

    pub fn note_scalar(&mut self, scalar: ScalarKind) {
        if self.scalar_refs[scalar.index()] {
            self.dirty = true;
        }
    }

    /// Force the next [`Self::finish`] to upload a fresh block.
    pub fn invalidate(&mut self) {
        self.dirty = true;
        self.address = None;
    }

    /// Start rebuilding a block of `dwords` dwords. Reference masks are rebuilt from the writes
    /// that follow.
    pub fn begin(&mut self, dwords: u32) {
        self.staging.clear();
        self.staging.resize(dwords as usize, 0);
        self.refs = [SlotMask::EMPTY; ResourceKind::COUNT];
        self.scalar_refs = [false; ScalarKind::COUNT];
    }

    pub fn write_descriptor(&mut self, kind: ResourceKind, slot: u32, offset: u32, words: &[u32]) {
        self.refs[kind.index()].set(slot);
        self.write_words(offset, words);
    }

    pub fn write_scalar(&mut self, scalar: ScalarKind, offset: u32, value: u32) {
        self.scalar_refs[scalar.index()] = true;
        self.write_words(offset, &[value]);
    }

    pub fn write_words(&mut self, offset: u32, words: &[u32]) {
        let start = offset as usize;
        debug_assert!(start + words.len() <= self.staging.len());
        if let Some(dst) = self.staging.get_mut(start..start + words.len()) {
            dst.copy_from_slice(words);
        }
    }

    /// Upload the staged block if needed and return its address.
    ///
    /// Returns `Ok(None)` for an empty block.
    pub fn finish(&mut self, sink: &mut dyn CommandSink) -> Result<Option<GpuAddress>, CueError> {
        if self.staging.is_empty() {
            self.dirty = false;
            return Ok(None);
        }
        if let Some(address) = self.address {
            if !self.dirty && self.staging == self.committed {
                return Ok(Some(address));
            }
        }

        let bytes: Vec<u8> = self.staging.iter().flat_map(|w| w.to_le_bytes()).collect();
        let exhausted = |size| CueError::ScratchExhausted {
            stage: self.stage,
            bytes: size,
        };
        let size = u32::try_from(bytes.len()).map_err(|_| exhausted(u32::MAX))?;
        let address = sink
            .allocate_scratch(size, EXTENDED_BLOCK_ALIGNMENT)
            .ok_or_else(|| exhausted(size))?;
        sink.write_scratch(address, &bytes);

        core::mem::swap(&mut self.committed, &mut self.staging);
        self.staging.clone_from(&self.committed);
        self.address = Some(address);
        self.dirty = false;
        self.allocations += 1;
        debug!(
            stage = %self.stage,
            address = address.0,
            dwords = self.committed.len(),
            "allocated extended user-data block"
        );
        Ok(Some(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Scratch {
        next: u64,
        writes: Vec<(GpuAddress, Vec<u8>)>,
        limit: Option<u32>,
    }

    impl CommandSink for Scratch {
        fn allocate_scratch(&mut self, size: u32, _align: u32) -> Option<GpuAddress> {
            if self.limit.is_some_and(|l| size > l) {
                return None;
            }
            let addr = GpuAddress(0x1000 + self.next);
            self.next += u64::from(size);
            Some(addr)
        }
        fn write_scratch(&mut self, dst: GpuAddress, bytes: &[u8]) {
            self.writes.push((dst, bytes.to_vec()));
        }
        fn copy_memory(&mut self, _: GpuAddress, _: GpuAddress, _: u32) {}
        fn set_user_data(&mut self, _: ShaderStage, _: u32, _: &[u32]) {}
        fn set_pointer(&mut self, _: ShaderStage, _: u32, _: GpuAddress) {}
        fn wait_for_consumer(&mut self, _: u32) {}
        fn signal_producer(&mut self) {}
        fn signal_retirement(&mut self, _: u64) {}
        fn nop(&mut self) {}
    }

    #[test]
    fn unchanged_block_is_not_reuploaded() {
        let mut sink = Scratch::default();
        let mut ext = ExtendedDataAllocator::new(ShaderStage::Pixel);
        ext.begin(4);
        ext.write_descriptor(ResourceKind::Sampler, 2, 0, &[1, 2, 3, 4]);
        let first = ext.finish(&mut sink).unwrap();
        assert_eq!(first, Some(GpuAddress(0x1000)));
        assert_eq!(sink.writes.len(), 1);

        ext.begin(4);
        ext.write_descriptor(ResourceKind::Sampler, 2, 0, &[1, 2, 3, 4]);
        assert_eq!(ext.finish(&mut sink).unwrap(), first);
        assert_eq!(sink.writes.len(), 1);
        assert_eq!(ext.allocations(), 1);
    }

    #[test]
    fn bind_to_referenced_slot_forces_upload() {
        let mut sink = Scratch::default();
        let mut ext = ExtendedDataAllocator::new(ShaderStage::Vertex);
        ext.begin(4);
        ext.write_descriptor(ResourceKind::ConstantBuffer, 5, 0, &[9; 4]);
        ext.finish(&mut sink).unwrap();

        assert!(!ext.note_bind(ResourceKind::ConstantBuffer, SlotMask::single(4)));
        assert!(ext.note_bind(ResourceKind::ConstantBuffer, SlotMask::single(5)));

        ext.begin(4);
        ext.write_descriptor(ResourceKind::ConstantBuffer, 5, 0, &[9; 4]);
        let second = ext.finish(&mut sink).unwrap();
        assert_eq!(second, Some(GpuAddress(0x1010)));
        assert_eq!(ext.refs(ResourceKind::ConstantBuffer), SlotMask::single(5));
        let expected: Vec<u8> = [9u32; 4].iter().flat_map(|w| w.to_le_bytes()).collect();
        assert_eq!(sink.writes[1].1, expected);
    }

    #[test]
    fn content_change_forces_upload() {
        let mut sink = Scratch::default();
        let mut ext = ExtendedDataAllocator::new(ShaderStage::Compute);
        ext.begin(2);
        ext.write_words(0, &[1, 0]);
        ext.finish(&mut sink).unwrap();
        ext.begin(2);
        ext.write_words(0, &[2, 0]);
        ext.finish(&mut sink).unwrap();
        assert_eq!(ext.allocations(), 2);
        assert_eq!(ext.committed(), &[2, 0]);
    }

    #[test]
    fn exhausted_scratch_is_reported() {
        let mut sink = Scratch {
            limit: Some(4),
            ..Scratch::default()
        };
        let mut ext = ExtendedDataAllocator::new(ShaderStage::Geometry);
        ext.begin(2);
        assert_eq!(
            ext.finish(&mut sink),
            Err(CueError::ScratchExhausted {
                stage: ShaderStage::Geometry,
                bytes: 8
            })
        );
    }

    #[test]
    fn empty_block_has_no_address() {
        let mut sink = Scratch::default();
        let mut ext = ExtendedDataAllocator::new(ShaderStage::Hull);
        ext.begin(0);
        assert_eq!(ext.finish(&mut sink).unwrap(), None);
        assert!(sink.writes.is_empty());
    }
}
