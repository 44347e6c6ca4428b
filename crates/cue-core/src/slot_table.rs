//! Per-stage, per-kind slot tables built out of [`Chunk`]s.

use crate::bitset::SlotMask;
use crate::chunk::{BlockPool, Chunk, ChunkLayout, ChunkView};
use crate::error::CueError;
use crate::stage::{ResourceKind, ShaderStage, SharedTable};

/// Summary of one bind call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BindReport {
    /// Chunks that had to snapshot their current block.
    pub conflicts: u32,
    /// Slots written or cleared.
    pub touched: SlotMask,
}

/// Slots of one resource kind for one stage.
#[derive(Debug)]
pub struct ResourceSlotTable {
    stage: ShaderStage,
    kind: ResourceKind,
    capacity: u32,
    chunks: Vec<Chunk>,
    active: SlotMask,
}

impl ResourceSlotTable {
    pub fn new(stage: ShaderStage, kind: ResourceKind, capacity: u32) -> Self {
        debug_assert!(capacity <= kind.max_slots());
        let chunk_slots = kind.chunk_slots();
        let chunk_count = capacity.div_ceil(chunk_slots);
        Self {
            stage,
            kind,
            capacity,
            chunks: (0..chunk_count).map(|_| Chunk::default()).collect(),
            active: SlotMask::EMPTY,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Slots currently holding a descriptor.
    pub fn active(&self) -> SlotMask {
        self.active
    }

    pub fn layout(&self) -> ChunkLayout {
        ChunkLayout {
            slots: self.kind.chunk_slots(),
            stride_bytes: self.kind.stride_bytes(),
        }
    }

    /// Bind `count` slots starting at `start`.
    ///
    /// `data` must hold exactly `count * stride` bytes; `None` unbinds the range.
    pub fn bind(
        &mut self,
        pool: &mut BlockPool,
        start: u32,
        count: u32,
        data: Option<&[u8]>,
    ) -> Result<BindReport, CueError> {
        let end = u64::from(start) + u64::from(count);
        if end > u64::from(self.capacity) {
            return Err(CueError::SlotRangeOutOfBounds {
                stage: self.stage,
                kind: self.kind,
                start,
                count,
                capacity: self.capacity,
            });
        }
        let stride = self.kind.stride_bytes() as usize;
        if let Some(data) = data {
            let expected = count as usize * stride;
            if data.len() != expected {
                return Err(CueError::DescriptorDataSize {
                    kind: self.kind,
                    expected,
                    found: data.len(),
                });
            }
        }
        if count == 0 {
            return Ok(BindReport::default());
        }

        let layout = self.layout();
        let k = layout.slots;
        let last = start + count - 1;
        let mut report = BindReport {
            conflicts: 0,
            touched: SlotMask::range(start, count),
        };
        for chunk_index in start / k..=last / k {
            let chunk_first = chunk_index * k;
            let first = start.max(chunk_first);
            let end = last.min(chunk_first + k - 1);
            let n = end - first + 1;
            let bytes = data.map(|d| {
                let from = (first - start) as usize * stride;
                &d[from..from + n as usize * stride]
            });
            let outcome = self.chunks[chunk_index as usize].bind(
                pool,
                layout,
                first - chunk_first,
                n,
                bytes,
            );
            if outcome.conflict {
                report.conflicts += 1;
            }
        }

        if data.is_some() {
            self.active |= report.touched;
        } else {
            self.active &= !report.touched;
        }
        Ok(report)
    }

    /// Reconcile every chunk that intersects `slots`. Returns the number of slots copied.
    pub fn reconcile(&mut self, pool: &mut BlockPool, slots: SlotMask, epoch: u64) -> u32 {
        let layout = self.layout();
        let k = layout.slots;
        let mut copied = 0;
        for (index, chunk) in self.chunks.iter_mut().enumerate() {
            if slots.window(index as u32 * k, k) != 0 {
                copied += chunk.reconcile(pool, layout, epoch);
            }
        }
        copied
    }

    pub fn slot_bytes<'a>(&self, pool: &'a BlockPool, slot: u32) -> Option<&'a [u8]> {
        if slot >= self.capacity {
            return None;
        }
        let layout = self.layout();
        let chunk = self.chunks.get((slot / layout.slots) as usize)?;
        chunk.slot_bytes(pool, layout, slot % layout.slots)
    }

    pub fn chunk(&self, index: usize) -> Option<&Chunk> {
        self.chunks.get(index)
    }

    pub fn chunk_view(&self, index: usize) -> Option<ChunkView> {
        self.chunks.get(index).map(Chunk::view)
    }

    pub(crate) fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn reset(&mut self, pool: &mut BlockPool) {
        for chunk in &mut self.chunks {
            chunk.reset(pool);
        }
        self.active = SlotMask::EMPTY;
    }
}

/// Global and streamout tables: a single chunk shared by every stage.
#[derive(Debug)]
pub struct SharedSlotTable {
    table: SharedTable,
    chunk: Chunk,
    active: SlotMask,
}

impl SharedSlotTable {
    pub fn new(table: SharedTable) -> Self {
        Self {
            table,
            chunk: Chunk::default(),
            active: SlotMask::EMPTY,
        }
    }

    pub fn table(&self) -> SharedTable {
        self.table
    }

    pub fn layout(&self) -> ChunkLayout {
        ChunkLayout {
            slots: self.table.slots(),
            stride_bytes: self.table.stride_bytes(),
        }
    }

    pub fn active(&self) -> SlotMask {
        self.active
    }

    pub fn bind(
        &mut self,
        pool: &mut BlockPool,
        start: u32,
        count: u32,
        data: Option<&[u8]>,
    ) -> Result<BindReport, CueError> {
        let capacity = self.table.slots();
        if u64::from(start) + u64::from(count) > u64::from(capacity) {
            return Err(CueError::SharedSlotOutOfBounds {
                table: self.table,
                start,
                count,
                capacity,
            });
        }
        if count == 0 {
            return Ok(BindReport::default());
        }
        let layout = self.layout();
        if let Some(data) = data {
            debug_assert_eq!(data.len(), (count * layout.stride_bytes) as usize);
        }
        let outcome = self.chunk.bind(pool, layout, start, count, data);
        let touched = SlotMask::range(start, count);
        if data.is_some() {
            self.active |= touched;
        } else {
            self.active &= !touched;
        }
        Ok(BindReport {
            conflicts: u32::from(outcome.conflict),
            touched,
        })
    }

    pub fn reconcile(&mut self, pool: &mut BlockPool, epoch: u64) -> u32 {
        let layout = self.layout();
        self.chunk.reconcile(pool, layout, epoch)
    }

    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    pub fn slot_bytes<'a>(&self, pool: &'a BlockPool, slot: u32) -> Option<&'a [u8]> {
        if slot >= self.table.slots() {
            return None;
        }
        self.chunk.slot_bytes(pool, self.layout(), slot)
    }

    pub fn reset(&mut self, pool: &mut BlockPool) {
        self.chunk.reset(pool);
        self.active = SlotMask::EMPTY;
    }
}
