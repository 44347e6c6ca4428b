//! Commit/release orchestration across every shader stage.
//!
//! Binds only touch CPU-side chunk state. `pre_draw`/`pre_dispatch` walk each dirty stage's
//! [`InputParameterCache`], reconcile the chunks it reads, rotate ring tables, rebuild the
//! extended block and write user-data registers through the [`CommandSink`].
//! `post_draw`/`post_dispatch` emit the retirement marker for the committed draw.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::bitset::SlotMask;
use crate::chunk::{Block, BlockId, BlockPool, ChunkView};
use crate::config::{EngineConfig, UnboundPolicy};
use crate::descriptor::{
    bytes_to_dwords, BufferDescriptor, GpuAddress, ResourceDescriptor, SamplerDescriptor,
};
use crate::error::CueError;
use crate::extended::ExtendedDataAllocator;
use crate::heap::{
    compute_required_heap_size, ring_element_size, DescriptorHeap, RING_ELEMENT_ALIGNMENT,
};
use crate::input::{
    Delegate, InputAction, InputParameterCache, InputUsageResolver, Placement, ResolverLimits,
};
use crate::ring::RingBuffer;
use crate::sink::CommandSink;
use crate::slot_table::{BindReport, ResourceSlotTable, SharedSlotTable};
use crate::stage::{
    ResourceKind, ResourceKindFlags, ScalarKind, ShaderStage, SharedTable, StageFlags,
};

/// Alignment of chunk blocks uploaded to scratch.
const BLOCK_ALIGNMENT: u32 = 16;

/// Largest chunk block; also the size of the shared all-zero block.
const ZERO_BLOCK_BYTES: u32 = 16 * 32;

/// Opaque identity of a compiled shader.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ShaderHandle(pub u64);

/// Where the vertex fetch subroutine for a shader lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FetchShaderInfo {
    pub address: GpuAddress,
}

#[derive(Clone, Debug)]
pub struct ShaderBinding {
    pub handle: ShaderHandle,
    pub fetch: Option<FetchShaderInfo>,
    pub cache: Arc<InputParameterCache>,
}

/// Counters for tools and tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub commits: u64,
    pub conflicts: u64,
    pub reconciled_slots: u64,
    pub table_copies: u64,
    pub ring_wraps: u64,
    pub waits_inserted: u64,
    pub extended_allocations: u64,
    pub zero_filled: u64,
}

/// Per-stage aggregate of bindings and commit bookkeeping.
#[derive(Debug)]
struct StageBindings {
    stage: ShaderStage,
    tables: Vec<ResourceSlotTable>,
    rings: Vec<Option<RingBuffer>>,
    /// Last ring element written per kind, with its length in bytes.
    last_table: Vec<Option<(GpuAddress, u32)>>,
    kind_dirty: ResourceKindFlags,
    dirty: bool,
    scalars: [Option<u32>; ScalarKind::COUNT],
    srt: Option<GpuAddress>,
    shader: Option<ShaderBinding>,
    extended: ExtendedDataAllocator,
    registers: Vec<u32>,
}

impl StageBindings {
    fn new(stage: ShaderStage, config: &EngineConfig) -> Self {
        Self {
            stage,
            tables: ResourceKind::ALL
                .iter()
                .map(|&kind| ResourceSlotTable::new(stage, kind, config.slot_counts.get(kind)))
                .collect(),
            rings: vec![None; ResourceKind::COUNT],
            last_table: vec![None; ResourceKind::COUNT],
            kind_dirty: ResourceKindFlags::all(),
            dirty: true,
            scalars: [None; ScalarKind::COUNT],
            srt: None,
            shader: None,
            extended: ExtendedDataAllocator::new(stage),
            registers: vec![0; config.inline_user_data_dwords as usize],
        }
    }

    fn invalidate(&mut self, pool: &mut BlockPool) {
        for table in &mut self.tables {
            table.reset(pool);
        }
        self.last_table.iter_mut().for_each(|t| *t = None);
        self.kind_dirty = ResourceKindFlags::all();
        self.dirty = true;
        self.scalars = [None; ScalarKind::COUNT];
        self.srt = None;
        self.extended.invalidate();
    }
}

/// State shared by every stage committed within one `pre_draw`/`pre_dispatch`.
struct CommitPass<'a> {
    sink: &'a mut dyn CommandSink,
    pool: &'a mut BlockPool,
    heap: &'a mut DescriptorHeap,
    global: &'a mut SharedSlotTable,
    streamout: &'a mut SharedSlotTable,
    zero_block: &'a mut Option<GpuAddress>,
    pending_wrap: &'a mut bool,
    stats: &'a mut EngineStats,
    policy: UnboundPolicy,
    ring_depth: u32,
    esgs_size: u32,
    epoch: u64,
    draw: u64,
    rings_touched: bool,
}

pub struct Engine {
    config: EngineConfig,
    heap: Option<DescriptorHeap>,
    pool: BlockPool,
    stages: Vec<StageBindings>,
    global: SharedSlotTable,
    streamout: SharedSlotTable,
    active_graphics: StageFlags,
    esgs_size: u32,
    epoch: u64,
    next_draw: u64,
    pending_wrap: bool,
    zero_block: Option<GpuAddress>,
    stats: EngineStats,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, CueError> {
        config.validate()?;
        let stages = ShaderStage::ALL
            .iter()
            .map(|&stage| StageBindings::new(stage, &config))
            .collect();
        Ok(Self {
            config,
            heap: None,
            pool: BlockPool::new(),
            stages,
            global: SharedSlotTable::new(SharedTable::Global),
            streamout: SharedSlotTable::new(SharedTable::Streamout),
            active_graphics: StageFlags::VERTEX | StageFlags::PIXEL,
            esgs_size: 0,
            epoch: 0,
            next_draw: 1,
            pending_wrap: false,
            zero_block: None,
            stats: EngineStats::default(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Heap bytes `init` requires for this engine's configuration.
    pub fn required_heap_size(&self) -> u64 {
        compute_required_heap_size(
            self.config.ring_depth,
            &self.config.slot_counts,
            self.config.ring_kinds,
        )
    }

    /// Resolver limited to what this engine can satisfy.
    pub fn resolver(&self) -> InputUsageResolver {
        InputUsageResolver::new(ResolverLimits::from(&self.config))
    }

    /// Take ownership of the heap region and lay out every ring in it.
    pub fn init(&mut self, heap_base: GpuAddress, heap_size: u64) -> Result<(), CueError> {
        let required = self.required_heap_size();
        if heap_size < required {
            return Err(CueError::HeapTooSmall {
                required,
                provided: heap_size,
            });
        }
        let mut heap = DescriptorHeap::new(heap_base, heap_size)?;
        let depth = self.config.ring_depth;
        for stage in &mut self.stages {
            for kind in self.config.ring_kinds.kinds() {
                let elem_size = ring_element_size(kind, self.config.slot_counts.get(kind));
                if elem_size == 0 {
                    continue;
                }
                let base = heap
                    .alloc(elem_size * u64::from(depth), RING_ELEMENT_ALIGNMENT)
                    .ok_or(CueError::HeapTooSmall {
                        required,
                        provided: heap_size,
                    })?;
                stage.rings[kind.index()] = Some(RingBuffer::new(base, elem_size, depth));
            }
            stage.last_table.iter_mut().for_each(|t| *t = None);
            stage.kind_dirty = ResourceKindFlags::all();
            stage.dirty = true;
        }
        debug!(
            base = heap_base.0,
            size = heap_size,
            used = heap.arena().used(),
            ring_depth = depth,
            "descriptor heap initialized"
        );
        self.heap = Some(heap);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.heap.is_some()
    }

    /// Bind raw descriptor bytes to `count` slots. `None` unbinds them.
    pub fn bind(
        &mut self,
        stage: ShaderStage,
        kind: ResourceKind,
        start: u32,
        count: u32,
        data: Option<&[u8]>,
    ) -> Result<BindReport, CueError> {
        let st = &mut self.stages[stage.index()];
        let report = st.tables[kind.index()].bind(&mut self.pool, start, count, data)?;
        if count > 0 {
            self.stats.conflicts += u64::from(report.conflicts);
            st.dirty = true;
            st.kind_dirty |= kind.flag();
            st.extended.note_bind(kind, report.touched);
        }
        Ok(report)
    }

    pub fn set_resources(
        &mut self,
        stage: ShaderStage,
        start: u32,
        count: u32,
        descriptors: Option<&[ResourceDescriptor]>,
    ) -> Result<BindReport, CueError> {
        self.bind(
            stage,
            ResourceKind::Resource,
            start,
            count,
            descriptors.map(bytemuck::cast_slice),
        )
    }

    pub fn set_resource(
        &mut self,
        stage: ShaderStage,
        slot: u32,
        descriptor: Option<&ResourceDescriptor>,
    ) -> Result<BindReport, CueError> {
        self.set_resources(stage, slot, 1, descriptor.map(core::slice::from_ref))
    }

    pub fn set_rw_resources(
        &mut self,
        stage: ShaderStage,
        start: u32,
        count: u32,
        descriptors: Option<&[ResourceDescriptor]>,
    ) -> Result<BindReport, CueError> {
        self.bind(
            stage,
            ResourceKind::RwResource,
            start,
            count,
            descriptors.map(bytemuck::cast_slice),
        )
    }

    pub fn set_rw_resource(
        &mut self,
        stage: ShaderStage,
        slot: u32,
        descriptor: Option<&ResourceDescriptor>,
    ) -> Result<BindReport, CueError> {
        self.set_rw_resources(stage, slot, 1, descriptor.map(core::slice::from_ref))
    }

    pub fn set_samplers(
        &mut self,
        stage: ShaderStage,
        start: u32,
        count: u32,
        descriptors: Option<&[SamplerDescriptor]>,
    ) -> Result<BindReport, CueError> {
        self.bind(
            stage,
            ResourceKind::Sampler,
            start,
            count,
            descriptors.map(bytemuck::cast_slice),
        )
    }

    pub fn set_sampler(
        &mut self,
        stage: ShaderStage,
        slot: u32,
        descriptor: Option<&SamplerDescriptor>,
    ) -> Result<BindReport, CueError> {
        self.set_samplers(stage, slot, 1, descriptor.map(core::slice::from_ref))
    }

    pub fn set_constant_buffers(
        &mut self,
        stage: ShaderStage,
        start: u32,
        count: u32,
        descriptors: Option<&[BufferDescriptor]>,
    ) -> Result<BindReport, CueError> {
        self.bind(
            stage,
            ResourceKind::ConstantBuffer,
            start,
            count,
            descriptors.map(bytemuck::cast_slice),
        )
    }

    pub fn set_constant_buffer(
        &mut self,
        stage: ShaderStage,
        slot: u32,
        descriptor: Option<&BufferDescriptor>,
    ) -> Result<BindReport, CueError> {
        self.set_constant_buffers(stage, slot, 1, descriptor.map(core::slice::from_ref))
    }

    pub fn set_vertex_buffers(
        &mut self,
        stage: ShaderStage,
        start: u32,
        count: u32,
        descriptors: Option<&[BufferDescriptor]>,
    ) -> Result<BindReport, CueError> {
        self.bind(
            stage,
            ResourceKind::VertexBuffer,
            start,
            count,
            descriptors.map(bytemuck::cast_slice),
        )
    }

    pub fn set_vertex_buffer(
        &mut self,
        stage: ShaderStage,
        slot: u32,
        descriptor: Option<&BufferDescriptor>,
    ) -> Result<BindReport, CueError> {
        self.set_vertex_buffers(stage, slot, 1, descriptor.map(core::slice::from_ref))
    }

    pub fn set_global_descriptor(
        &mut self,
        slot: u32,
        descriptor: Option<&BufferDescriptor>,
    ) -> Result<BindReport, CueError> {
        let report = self.global.bind(
            &mut self.pool,
            slot,
            1,
            descriptor.map(BufferDescriptor::as_bytes),
        )?;
        self.stats.conflicts += u64::from(report.conflicts);
        self.mark_all_dirty();
        Ok(report)
    }

    pub fn set_streamout_buffers(
        &mut self,
        start: u32,
        buffers: &[BufferDescriptor],
    ) -> Result<BindReport, CueError> {
        let report = self.streamout.bind(
            &mut self.pool,
            start,
            buffers.len() as u32,
            Some(bytemuck::cast_slice(buffers)),
        )?;
        self.stats.conflicts += u64::from(report.conflicts);
        self.mark_all_dirty();
        Ok(report)
    }

    pub fn clear_streamout_buffers(
        &mut self,
        start: u32,
        count: u32,
    ) -> Result<BindReport, CueError> {
        let report = self.streamout.bind(&mut self.pool, start, count, None)?;
        self.stats.conflicts += u64::from(report.conflicts);
        self.mark_all_dirty();
        Ok(report)
    }

    pub fn set_scalar(&mut self, stage: ShaderStage, scalar: ScalarKind, value: Option<u32>) {
        let st = &mut self.stages[stage.index()];
        if st.scalars[scalar.index()] != value {
            st.scalars[scalar.index()] = value;
            st.dirty = true;
            st.extended.note_scalar(scalar);
        }
    }

    /// Point `stage` at an application-managed shader resource table.
    pub fn set_shader_resource_table(&mut self, stage: ShaderStage, table: Option<GpuAddress>) {
        let st = &mut self.stages[stage.index()];
        if st.srt != table {
            st.srt = table;
            st.dirty = true;
        }
    }

    pub fn set_on_chip_esgs_size(&mut self, bytes: u32) {
        if self.esgs_size != bytes {
            self.esgs_size = bytes;
            for stage in ShaderStage::GRAPHICS {
                self.stages[stage.index()].dirty = true;
            }
        }
    }

    /// Bind a shader. Rebinding the handle already bound is a no-op.
    ///
    /// The cache must have been built for `stage` by a resolver with this engine's limits (see
    /// [`Engine::resolver`]).
    pub fn set_shader(
        &mut self,
        stage: ShaderStage,
        binding: Option<ShaderBinding>,
    ) -> Result<(), CueError> {
        if let Some(binding) = &binding {
            if binding.cache.stage() != stage {
                return Err(CueError::ShaderStageMismatch {
                    stage,
                    cache_stage: binding.cache.stage(),
                });
            }
            if binding.cache.limits() != ResolverLimits::from(&self.config) {
                return Err(CueError::CacheLimitsMismatch { stage });
            }
        }
        let st = &mut self.stages[stage.index()];
        let same = match (&st.shader, &binding) {
            (Some(old), Some(new)) => old.handle == new.handle && old.fetch == new.fetch,
            (None, None) => true,
            _ => false,
        };
        if same {
            return Ok(());
        }
        st.shader = binding;
        st.dirty = true;
        st.kind_dirty = ResourceKindFlags::all();
        st.extended.invalidate();
        Ok(())
    }

    /// Choose which graphics stages `pre_draw` commits. Compute is unaffected.
    pub fn set_active_stages(&mut self, stages: StageFlags) {
        let graphics = stages & StageFlags::GRAPHICS;
        for stage in ShaderStage::GRAPHICS {
            let flag = stage.flag();
            if graphics.contains(flag) && !self.active_graphics.contains(flag) {
                // Register state from before deactivation cannot be trusted.
                self.stages[stage.index()].dirty = true;
            }
        }
        self.active_graphics = graphics;
    }

    pub fn active_stages(&self) -> StageFlags {
        self.active_graphics
    }

    /// Draw number the next commit will use.
    pub fn next_draw(&self) -> u64 {
        self.next_draw
    }

    /// Commit every active graphics stage. Returns the draw number.
    ///
    /// Contract violations, including unbound reads under [`UnboundPolicy::Strict`], are reported
    /// before anything is emitted and leave the engine unchanged. A `ScratchExhausted` error can
    /// still stop a commit part-way, after which the command stream must be discarded.
    pub fn pre_draw(&mut self, sink: &mut dyn CommandSink) -> Result<u64, CueError> {
        let stages: Vec<ShaderStage> = ShaderStage::GRAPHICS
            .into_iter()
            .filter(|s| self.active_graphics.contains(s.flag()))
            .collect();
        self.commit(sink, &stages)
    }

    pub fn post_draw(&mut self, sink: &mut dyn CommandSink) -> u64 {
        self.release(sink)
    }

    /// Commit the compute stage. Returns the dispatch's draw number.
    pub fn pre_dispatch(&mut self, sink: &mut dyn CommandSink) -> Result<u64, CueError> {
        self.commit(sink, &[ShaderStage::Compute])
    }

    pub fn post_dispatch(&mut self, sink: &mut dyn CommandSink) -> u64 {
        self.release(sink)
    }

    /// Reset wrap bookkeeping and drop every binding.
    pub fn advance_frame(&mut self) {
        for stage in &mut self.stages {
            for ring in stage.rings.iter_mut().flatten() {
                ring.mark_frame_boundary();
            }
        }
        self.pending_wrap = false;
        self.zero_block = None;
        self.invalidate_all_bindings();
        debug!(next_draw = self.next_draw, "frame boundary");
    }

    /// Drop every slot, scalar and table binding. Shaders stay bound.
    pub fn invalidate_all_bindings(&mut self) {
        for stage in &mut self.stages {
            stage.invalidate(&mut self.pool);
        }
        self.global.reset(&mut self.pool);
        self.streamout.reset(&mut self.pool);
    }

    /// The GPU finished everything up to `draw`. Returns the number of blocks released.
    pub fn retire_completed(&mut self, draw: u64) -> usize {
        let released = self.pool.release_completed(draw);
        if released > 0 {
            trace!(draw, released, "released retired blocks");
        }
        released
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn pool(&self) -> &BlockPool {
        &self.pool
    }

    pub fn heap(&self) -> Option<&DescriptorHeap> {
        self.heap.as_ref()
    }

    pub fn chunk_view(
        &self,
        stage: ShaderStage,
        kind: ResourceKind,
        chunk: usize,
    ) -> Option<ChunkView> {
        self.stages[stage.index()].tables[kind.index()].chunk_view(chunk)
    }

    pub fn shared_chunk_view(&self, table: SharedTable) -> ChunkView {
        match table {
            SharedTable::Global => self.global.chunk().view(),
            SharedTable::Streamout => self.streamout.chunk().view(),
        }
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.pool.get(id)
    }

    pub fn block_bytes(&self, id: BlockId) -> Option<&[u8]> {
        self.pool.get(id).map(Block::bytes)
    }

    /// Descriptor bytes the next commit would use for a slot, if bound.
    pub fn resolve_slot(&self, stage: ShaderStage, kind: ResourceKind, slot: u32) -> Option<&[u8]> {
        self.stages[stage.index()].tables[kind.index()].slot_bytes(&self.pool, slot)
    }

    pub fn active_slots(&self, stage: ShaderStage, kind: ResourceKind) -> SlotMask {
        self.stages[stage.index()].tables[kind.index()].active()
    }

    pub fn ring(&self, stage: ShaderStage, kind: ResourceKind) -> Option<&RingBuffer> {
        self.stages[stage.index()].rings[kind.index()].as_ref()
    }

    /// Bytes of the ring element most recently committed for `(stage, kind)`.
    pub fn committed_table(&self, stage: ShaderStage, kind: ResourceKind) -> Option<&[u8]> {
        let (address, len) = self.stages[stage.index()].last_table[kind.index()]?;
        self.heap.as_ref()?.read(address, len as usize)
    }

    pub fn extended_block_address(&self, stage: ShaderStage) -> Option<GpuAddress> {
        self.stages[stage.index()].extended.address()
    }

    fn mark_all_dirty(&mut self) {
        for stage in &mut self.stages {
            stage.dirty = true;
        }
    }

    fn release(&mut self, sink: &mut dyn CommandSink) -> u64 {
        let draw = self.next_draw;
        sink.signal_retirement(draw);
        self.next_draw += 1;
        draw
    }

    /// Everything a commit of `stages` can reject, checked without touching any state.
    fn check_commit(&self, stages: &[ShaderStage]) -> Result<(), CueError> {
        let strict = self.config.unbound_policy == UnboundPolicy::Strict;
        for &stage in stages {
            let st = &self.stages[stage.index()];
            let shader = st.shader.as_ref().ok_or(CueError::MissingShader { stage })?;
            if !st.dirty {
                continue;
            }
            let cache = &shader.cache;
            if cache.uses_delegate(Delegate::FetchShader) && shader.fetch.is_none() {
                return Err(CueError::FetchShaderMissing { stage });
            }
            if !strict {
                continue;
            }
            for kind in cache.referenced_kinds().kinds() {
                let reads = cache.immediate_slots(kind) | cache.table_slots(kind);
                let active = st.tables[kind.index()].active();
                if let Some(slot) = (reads & !active).iter_ones().next() {
                    return Err(CueError::ResourceNotBound { stage, kind, slot });
                }
            }
            for scalar in ScalarKind::ALL {
                if cache.reads_scalar(scalar) && st.scalars[scalar.index()].is_none() {
                    return Err(CueError::ScalarNotBound { stage, scalar });
                }
            }
            if cache.uses_delegate(Delegate::ShaderResourceTable) && st.srt.is_none() {
                return Err(CueError::ShaderResourceTableNotBound { stage });
            }
            for (table, shared) in [
                (SharedTable::Global, &self.global),
                (SharedTable::Streamout, &self.streamout),
            ] {
                let reads = cache.shared_slots(table);
                if let Some(slot) = (reads & !shared.active()).iter_ones().next() {
                    return Err(CueError::SharedSlotNotBound { table, slot });
                }
            }
        }
        Ok(())
    }

    fn commit(
        &mut self,
        sink: &mut dyn CommandSink,
        stages: &[ShaderStage],
    ) -> Result<u64, CueError> {
        if self.heap.is_none() {
            return Err(CueError::NotInitialized);
        }
        self.check_commit(stages)?;
        let Self {
            config,
            heap,
            pool,
            stages: bindings,
            global,
            streamout,
            esgs_size,
            epoch,
            next_draw,
            pending_wrap,
            zero_block,
            stats,
            ..
        } = self;
        let heap = heap.as_mut().ok_or(CueError::NotInitialized)?;
        *epoch += 1;

        let mut pass = CommitPass {
            sink,
            pool,
            heap,
            global,
            streamout,
            zero_block,
            pending_wrap,
            stats,
            policy: config.unbound_policy,
            ring_depth: config.ring_depth,
            esgs_size: *esgs_size,
            epoch: *epoch,
            draw: *next_draw,
            rings_touched: false,
        };
        for &stage in stages {
            pass.commit_stage(&mut bindings[stage.index()])?;
        }
        if pass.rings_touched {
            pass.sink.signal_producer();
        }
        pass.stats.commits += 1;
        Ok(*next_draw)
    }
}

impl CommitPass<'_> {
    fn commit_stage(&mut self, st: &mut StageBindings) -> Result<(), CueError> {
        let stage = st.stage;
        let shader = st.shader.clone().ok_or(CueError::MissingShader { stage })?;
        if !st.dirty {
            return Ok(());
        }
        let cache = &shader.cache;
        trace!(stage = %stage, draw = self.draw, "committing stage");

        for kind in cache.referenced_kinds().kinds() {
            let needed = if cache.table_kinds().contains(kind.flag()) {
                SlotMask::FULL
            } else {
                cache.immediate_slots(kind)
            };
            let copied = st.tables[kind.index()].reconcile(self.pool, needed, self.epoch);
            self.stats.reconciled_slots += u64::from(copied);
        }

        let ext_dwords = cache.extended_dwords();
        st.extended.begin(ext_dwords);
        let mut span: Option<(u32, u32)> = None;
        let mut pointers: Vec<(u32, GpuAddress)> = Vec::new();
        let mut ext_pointer: Option<u32> = None;
        let mut words = Vec::with_capacity(8);

        for action in cache.entries() {
            match *action {
                InputAction::InlineDescriptor {
                    kind,
                    slot,
                    register,
                    dwords,
                } => {
                    self.descriptor_words(st, kind, slot, dwords, &mut words)?;
                    write_registers(&mut st.registers, register, &words);
                    widen(&mut span, register, register + dwords);
                }
                InputAction::InlineScalar { scalar, register } => {
                    let value = self.scalar_value(st, scalar)?;
                    write_registers(&mut st.registers, register, &[value]);
                    widen(&mut span, register, register + 1);
                }
                InputAction::ExtendedDescriptor {
                    kind,
                    slot,
                    offset,
                    dwords,
                } => {
                    self.descriptor_words(st, kind, slot, dwords, &mut words)?;
                    st.extended.write_descriptor(kind, slot, offset, &words);
                }
                InputAction::ExtendedScalar { scalar, offset } => {
                    let value = self.scalar_value(st, scalar)?;
                    st.extended.write_scalar(scalar, offset, value);
                }
                InputAction::Delegate {
                    delegate: Delegate::ExtendedUserData,
                    target,
                } => {
                    if let Placement::Register(register) = target {
                        ext_pointer = Some(register);
                    }
                }
                InputAction::Delegate { delegate, target } => {
                    let value = self.delegate_value(st, &shader, delegate)?;
                    match (value, target) {
                        (DelegateValue::Pointer(address), Placement::Register(register)) => {
                            write_registers(&mut st.registers, register, &address.to_dwords());
                            pointers.push((register, address));
                        }
                        (DelegateValue::Pointer(address), Placement::Extended(offset)) => {
                            st.extended.write_words(offset, &address.to_dwords());
                        }
                        (DelegateValue::Word(value), Placement::Register(register)) => {
                            write_registers(&mut st.registers, register, &[value]);
                            widen(&mut span, register, register + 1);
                        }
                        (DelegateValue::Word(value), Placement::Extended(offset)) => {
                            st.extended.write_words(offset, &[value]);
                        }
                    }
                }
            }
        }

        let before = st.extended.allocations();
        let ext_address = st.extended.finish(self.sink)?;
        self.stats.extended_allocations += st.extended.allocations() - before;
        if let Some(register) = ext_pointer {
            let address = ext_address.unwrap_or(GpuAddress::NULL);
            write_registers(&mut st.registers, register, &address.to_dwords());
            pointers.push((register, address));
        }

        if let Some((lo, hi)) = span {
            let words = st
                .registers
                .get(lo as usize..hi as usize)
                .ok_or(CueError::CacheLimitsMismatch { stage })?;
            self.sink.set_user_data(stage, lo, words);
        }
        for (register, address) in pointers {
            self.sink.set_pointer(stage, register, address);
        }

        st.dirty = false;
        Ok(())
    }

    /// First `dwords` dwords of a slot, zero-filled when unbound.
    fn descriptor_words(
        &mut self,
        st: &StageBindings,
        kind: ResourceKind,
        slot: u32,
        dwords: u32,
        out: &mut Vec<u32>,
    ) -> Result<(), CueError> {
        let len = dwords as usize * 4;
        match st.tables[kind.index()].slot_bytes(self.pool, slot) {
            Some(bytes) => bytes_to_dwords(&bytes[..len], out),
            None => {
                self.unbound(CueError::ResourceNotBound {
                    stage: st.stage,
                    kind,
                    slot,
                })?;
                out.clear();
                out.resize(dwords as usize, 0);
            }
        }
        Ok(())
    }

    fn scalar_value(&mut self, st: &StageBindings, scalar: ScalarKind) -> Result<u32, CueError> {
        match st.scalars[scalar.index()] {
            Some(value) => Ok(value),
            None => {
                self.unbound(CueError::ScalarNotBound {
                    stage: st.stage,
                    scalar,
                })?;
                Ok(0)
            }
        }
    }

    fn unbound(&mut self, err: CueError) -> Result<(), CueError> {
        match self.policy {
            UnboundPolicy::Strict => Err(err),
            UnboundPolicy::ZeroFill => {
                warn!(error = %err, "zero-filling unbound shader input");
                self.stats.zero_filled += 1;
                Ok(())
            }
        }
    }

    fn delegate_value(
        &mut self,
        st: &mut StageBindings,
        shader: &ShaderBinding,
        delegate: Delegate,
    ) -> Result<DelegateValue, CueError> {
        let stage = st.stage;
        let value = match delegate {
            Delegate::Table(kind) => {
                DelegateValue::Pointer(self.ring_table(st, &shader.cache, kind)?)
            }
            Delegate::GlobalTable => {
                let table = self.shared_table(stage, &shader.cache, SharedTable::Global)?;
                DelegateValue::Pointer(table)
            }
            Delegate::StreamoutTable => {
                let table = self.shared_table(stage, &shader.cache, SharedTable::Streamout)?;
                DelegateValue::Pointer(table)
            }
            Delegate::ShaderResourceTable => match st.srt {
                Some(address) => DelegateValue::Pointer(address),
                None => {
                    self.unbound(CueError::ShaderResourceTableNotBound { stage })?;
                    DelegateValue::Pointer(GpuAddress::NULL)
                }
            },
            Delegate::FetchShader => match shader.fetch {
                Some(fetch) => DelegateValue::Pointer(fetch.address),
                None => return Err(CueError::FetchShaderMissing { stage }),
            },
            Delegate::OnChipEsGsSize => DelegateValue::Word(self.esgs_size),
            // Resolved once the extended block is uploaded.
            Delegate::ExtendedUserData => DelegateValue::Pointer(GpuAddress::NULL),
        };
        Ok(value)
    }

    /// Copy the active slot range of `kind` into the next ring element and return its address.
    fn ring_table(
        &mut self,
        st: &mut StageBindings,
        cache: &InputParameterCache,
        kind: ResourceKind,
    ) -> Result<GpuAddress, CueError> {
        let stage = st.stage;
        let k = kind.index();
        let active = st.tables[k].active();
        let reads = cache.table_slots(kind);
        for slot in (reads & !active).iter_ones() {
            self.unbound(CueError::ResourceNotBound { stage, kind, slot })?;
        }

        if !st.kind_dirty.contains(kind.flag()) {
            if let Some((address, _)) = st.last_table[k] {
                return Ok(address);
            }
        }
        let Some(dst) = st.rings[k].as_ref().map(RingBuffer::next_write_address) else {
            return Err(CueError::TableWithoutRing { stage, kind });
        };

        if !self.rings_touched {
            if *self.pending_wrap {
                let max_lag = self.ring_depth / 2;
                debug!(stage = %stage, kind = %kind, max_lag, "ring wrapped; waiting for consumer");
                self.sink.wait_for_consumer(max_lag);
                self.stats.waits_inserted += 1;
                *self.pending_wrap = false;
            } else {
                self.sink.nop();
            }
            self.rings_touched = true;
        }

        let table = &st.tables[k];
        let slots = active.span().max(reads.span()).min(table.capacity());
        let layout = table.layout();
        let stride = layout.stride_bytes;
        let mut copied = 0u32;
        for (index, chunk) in table.chunks().iter().enumerate() {
            let first = index as u32 * layout.slots;
            if first >= slots {
                break;
            }
            let n = (slots - first).min(layout.slots);
            let len = n * stride;
            let chunk_dst = dst.offset(u64::from(first * stride));
            let src = match chunk.current_block() {
                Some(id) => flush_block(self.pool, self.sink, id, self.draw, stage)?,
                None => self.zero_source(stage)?,
            };
            self.sink.copy_memory(chunk_dst, src, len);
            match chunk.current_block().and_then(|id| self.pool.get(id)) {
                Some(block) => self.heap.write(chunk_dst, &block.bytes()[..len as usize]),
                None => self.heap.write(chunk_dst, &vec![0u8; len as usize]),
            }
            copied += len;
        }
        self.stats.table_copies += 1;

        if let Some(ring) = st.rings[k].as_mut() {
            if ring.advance_head() {
                *self.pending_wrap = true;
                self.stats.ring_wraps += 1;
                debug!(
                    stage = %stage,
                    kind = %kind,
                    head = ring.head(),
                    "ring crossed a sync point"
                );
            }
        }
        st.last_table[k] = Some((dst, copied));
        st.kind_dirty.remove(kind.flag());
        Ok(dst)
    }

    fn shared_table(
        &mut self,
        stage: ShaderStage,
        cache: &InputParameterCache,
        which: SharedTable,
    ) -> Result<GpuAddress, CueError> {
        let active = match which {
            SharedTable::Global => self.global.active(),
            SharedTable::Streamout => self.streamout.active(),
        };
        for slot in (cache.shared_slots(which) & !active).iter_ones() {
            self.unbound(CueError::SharedSlotNotBound { table: which, slot })?;
        }
        let table = match which {
            SharedTable::Global => &mut *self.global,
            SharedTable::Streamout => &mut *self.streamout,
        };
        let copied = table.reconcile(self.pool, self.epoch);
        self.stats.reconciled_slots += u64::from(copied);
        match table.chunk().current_block() {
            Some(id) => flush_block(self.pool, self.sink, id, self.draw, stage),
            None => self.zero_source(stage),
        }
    }

    fn zero_source(&mut self, stage: ShaderStage) -> Result<GpuAddress, CueError> {
        if let Some(address) = *self.zero_block {
            return Ok(address);
        }
        let address = self
            .sink
            .allocate_scratch(ZERO_BLOCK_BYTES, BLOCK_ALIGNMENT)
            .ok_or(CueError::ScratchExhausted {
                stage,
                bytes: ZERO_BLOCK_BYTES,
            })?;
        self.sink
            .write_scratch(address, &[0u8; ZERO_BLOCK_BYTES as usize]);
        *self.zero_block = Some(address);
        Ok(address)
    }
}

enum DelegateValue {
    Pointer(GpuAddress),
    Word(u32),
}

/// Upload a chunk block to fresh scratch if it changed since its last upload, and record that
/// `draw` reads it.
fn flush_block(
    pool: &mut BlockPool,
    sink: &mut dyn CommandSink,
    id: BlockId,
    draw: u64,
    stage: ShaderStage,
) -> Result<GpuAddress, CueError> {
    let Some(block) = pool.get_mut(id) else {
        debug_assert!(false, "chunk references a freed block");
        return Ok(GpuAddress::NULL);
    };
    let address = match block.address() {
        Some(address) if !block.is_dirty() => address,
        _ => {
            let size = block.bytes().len() as u32;
            let address = sink
                .allocate_scratch(size, BLOCK_ALIGNMENT)
                .ok_or(CueError::ScratchExhausted { stage, bytes: size })?;
            sink.write_scratch(address, block.bytes());
            block.set_address(address);
            address
        }
    };
    block.mark_flushed(draw);
    Ok(address)
}

fn write_registers(registers: &mut [u32], register: u32, words: &[u32]) {
    let start = register as usize;
    if let Some(dst) = registers.get_mut(start..start + words.len()) {
        dst.copy_from_slice(words);
    }
}

fn widen(span: &mut Option<(u32, u32)>, lo: u32, hi: u32) {
    *span = Some(match *span {
        Some((a, b)) => (a.min(lo), b.max(hi)),
        None => (lo, hi),
    });
}
