mod harness;

use cue_core::input::{InputAction, Partition, MAX_INPUT_ENTRIES};
use cue_core::{
    BlockOwner, BufferDescriptor, CueError, EngineConfig, InputParameterCache, InputUsage,
    InputUsageList, InputUsageResolver, InputUsageType, ResolverLimits, ResourceKind, ScalarKind,
    ShaderStage, SharedTable, StageFlags, DEFAULT_INLINE_USER_DATA_DWORDS,
};
use cue_trace::{GpuView, SinkCommand, TraceSink};
use harness::{engine, resource, shader, usages};
use pretty_assertions::assert_eq;

#[test]
fn rebinding_a_committed_slot_keeps_both_descriptors() {
    let mut engine = engine(EngineConfig::default());
    engine.set_active_stages(StageFlags::PIXEL);
    let ps = shader(
        &engine,
        ShaderStage::Pixel,
        1,
        usages(vec![InputUsage::fixed(
            InputUsageType::Table(ResourceKind::Resource),
            0,
        )]),
    );
    let cache = ps.cache.clone();
    engine.set_shader(ShaderStage::Pixel, Some(ps)).unwrap();
    let (a, b) = (resource(0xa), resource(0xb));
    let mut sink = TraceSink::new();

    engine
        .set_resource(ShaderStage::Pixel, 3, Some(&a))
        .unwrap();
    let first = engine.pre_draw(&mut sink).unwrap();
    engine.post_draw(&mut sink);
    let block_a = engine
        .chunk_view(ShaderStage::Pixel, ResourceKind::Resource, 0)
        .unwrap()
        .current
        .unwrap();

    let report = engine.set_resource(ShaderStage::Pixel, 3, Some(&b)).unwrap();
    assert_eq!(report.conflicts, 1);
    let view = engine
        .chunk_view(ShaderStage::Pixel, ResourceKind::Resource, 0)
        .unwrap();
    assert_eq!(view.used, Some(block_a));
    assert_eq!(view.used_slots, 0);
    assert_eq!(view.current_slots, 1 << 3);
    let block_b = view.current.unwrap();
    assert_ne!(block_a, block_b);
    assert_eq!(&engine.block_bytes(block_a).unwrap()[3 * 32..4 * 32], a.as_bytes());
    assert_eq!(&engine.block_bytes(block_b).unwrap()[3 * 32..4 * 32], b.as_bytes());
    assert_eq!(
        engine.resolve_slot(ShaderStage::Pixel, ResourceKind::Resource, 3),
        Some(b.as_bytes())
    );

    let second = engine.pre_draw(&mut sink).unwrap();
    engine.post_draw(&mut sink);
    assert_eq!(
        engine.block(block_a).unwrap().owner(),
        BlockOwner::Retiring { draw: first }
    );
    assert_eq!(&engine.block_bytes(block_a).unwrap()[3 * 32..4 * 32], a.as_bytes());

    engine.retire_completed(first);
    assert!(engine.block(block_a).is_none());
    assert_eq!(engine.block(block_b).unwrap().owner(), BlockOwner::Current);

    let view = GpuView::new(sink.commands());
    let read = |draw| {
        view.state_at(draw)
            .unwrap()
            .read_descriptor(&cache, ResourceKind::Resource, 3)
            .unwrap()
    };
    assert_eq!(read(first), a.as_bytes());
    assert_eq!(read(second), b.as_bytes());
    assert_eq!(engine.stats().conflicts, 1);
}

/// Lay out `count` constant-buffer descriptors the way a compiler packs them: 4-dword register
/// groups from register 0 while they fit below the extended pointer at `pointer`, then
/// consecutively in the extended block.
fn packed_constant_buffers(count: u32, inline: u32, pointer: u32) -> InputUsageList {
    let fit = pointer / 4;
    let mut list: Vec<InputUsage> = (0..count)
        .map(|slot| {
            let register = if slot < fit {
                slot * 4
            } else {
                inline + (slot - fit) * 4
            };
            InputUsage::descriptor(ResourceKind::ConstantBuffer, slot, register)
        })
        .collect();
    list.push(InputUsage::fixed(InputUsageType::ExtendedUserData, pointer));
    InputUsageList::new(list)
}

/// `(slot, partition)` for every descriptor entry, in cache order.
fn descriptor_partitions(cache: &InputParameterCache) -> Vec<(u32, Partition)> {
    cache
        .entries()
        .iter()
        .filter_map(|action| match *action {
            InputAction::InlineDescriptor { slot, .. } => Some((slot, Partition::InlineDescriptor)),
            InputAction::ExtendedDescriptor { slot, .. } => {
                Some((slot, Partition::ExtendedDescriptor))
            }
            _ => None,
        })
        .collect()
}

/// Commit `inputs` on the vertex stage with 20 distinct constant buffers bound and check every
/// one reads back. Returns the register writes the commit emitted.
fn commit_twenty_constant_buffers(
    config: EngineConfig,
    inputs: InputUsageList,
) -> Vec<SinkCommand> {
    let mut engine = engine(config);
    engine.set_active_stages(StageFlags::VERTEX);
    let vs = shader(&engine, ShaderStage::Vertex, 9, inputs);
    let cache = vs.cache.clone();
    engine.set_shader(ShaderStage::Vertex, Some(vs)).unwrap();
    let data: Vec<BufferDescriptor> = (0..20u32).map(|i| BufferDescriptor([i; 4])).collect();
    engine
        .set_constant_buffers(ShaderStage::Vertex, 0, 20, Some(&data[..]))
        .unwrap();
    let mut sink = TraceSink::new();
    let draw = engine.pre_draw(&mut sink).unwrap();
    engine.post_draw(&mut sink);

    let state = GpuView::new(sink.commands()).state_at(draw).unwrap();
    for (slot, d) in data.iter().enumerate() {
        assert_eq!(
            state
                .read_descriptor(&cache, ResourceKind::ConstantBuffer, slot as u32)
                .unwrap(),
            d.as_bytes()
        );
    }
    sink.take_commands()
        .into_iter()
        .filter(|c| matches!(c, SinkCommand::SetUserData { .. }))
        .collect()
}

#[test]
fn twenty_descriptors_against_the_default_register_budget() {
    // 16 inline dwords: three 4-dword descriptors, then the extended pointer at 14..16.
    let config = EngineConfig::default();
    assert_eq!(config.inline_user_data_dwords, DEFAULT_INLINE_USER_DATA_DWORDS);
    let inputs = packed_constant_buffers(20, DEFAULT_INLINE_USER_DATA_DWORDS, 14);

    let resolver = InputUsageResolver::new(ResolverLimits::from(&config));
    let cache = resolver.build(ShaderStage::Vertex, &inputs).unwrap();
    let expected: Vec<(u32, Partition)> = (0..20)
        .map(|slot| {
            let partition = if slot < 3 {
                Partition::InlineDescriptor
            } else {
                Partition::ExtendedDescriptor
            };
            (slot, partition)
        })
        .collect();
    assert_eq!(descriptor_partitions(&cache), expected);
    assert_eq!(cache.partition(Partition::Delegate).len(), 1);
    assert_eq!(cache.extended_dwords(), 17 * 4);

    let user_data = commit_twenty_constant_buffers(config, inputs);
    assert_eq!(user_data.len(), 1);
    assert!(matches!(
        &user_data[0],
        SinkCommand::SetUserData { register: 0, words, .. } if words.len() == 12
    ));
}

#[test]
fn sixteen_register_groups_route_the_excess_four_to_the_extended_block() {
    // Sixteen 4-dword descriptor register groups plus the extended pointer.
    let config = EngineConfig {
        inline_user_data_dwords: 66,
        ..EngineConfig::default()
    };
    let inputs = packed_constant_buffers(20, 66, 64);

    let resolver = InputUsageResolver::new(ResolverLimits::from(&config));
    let cache = resolver.build(ShaderStage::Vertex, &inputs).unwrap();
    assert_eq!(cache.partition(Partition::InlineDescriptor).len(), 16);
    assert_eq!(cache.partition(Partition::ExtendedDescriptor).len(), 4);
    assert_eq!(cache.partition(Partition::Delegate).len(), 1);
    for action in cache.entries() {
        match *action {
            InputAction::InlineDescriptor { slot, register, .. } => {
                assert!(slot < 16);
                assert_eq!(register, slot * 4);
            }
            InputAction::ExtendedDescriptor { slot, offset, .. } => {
                assert!(slot >= 16);
                assert_eq!(offset, (slot - 16) * 4);
            }
            InputAction::Delegate { .. } => {}
            other => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(cache.extended_dwords(), 16);

    let user_data = commit_twenty_constant_buffers(config, inputs);
    assert_eq!(user_data.len(), 1);
    assert!(matches!(
        &user_data[0],
        SinkCommand::SetUserData { register: 0, words, .. } if words.len() == 64
    ));
}

#[test]
fn oversized_input_table_is_rejected() {
    let inputs = InputUsageList::new(vec![
        InputUsage::fixed(InputUsageType::Scalar(ScalarKind::GwsBase), 0);
        MAX_INPUT_ENTRIES + 1
    ]);
    let err = InputUsageResolver::default()
        .build(ShaderStage::Pixel, &inputs)
        .unwrap_err();
    assert_eq!(
        err,
        CueError::InputTableOverflow {
            stage: ShaderStage::Pixel,
            count: MAX_INPUT_ENTRIES + 1,
            max: MAX_INPUT_ENTRIES
        }
    );
    assert_eq!(
        err.to_string(),
        "pixel: shader declares 129 inputs, at most 128 are supported"
    );
}

#[test]
fn scalars_and_streamout_reach_every_stage_that_reads_them() {
    let mut engine = engine(EngineConfig::default());
    engine.set_active_stages(StageFlags::VERTEX | StageFlags::GEOMETRY);
    let inputs = || {
        usages(vec![
            InputUsage::fixed(InputUsageType::StreamoutTable, 0),
            InputUsage::fixed(InputUsageType::Scalar(ScalarKind::GdsMemoryRange), 2),
        ])
    };
    let vs = shader(&engine, ShaderStage::Vertex, 1, inputs());
    let gs = shader(&engine, ShaderStage::Geometry, 2, inputs());
    let (vs_cache, gs_cache) = (vs.cache.clone(), gs.cache.clone());
    engine.set_shader(ShaderStage::Vertex, Some(vs)).unwrap();
    engine.set_shader(ShaderStage::Geometry, Some(gs)).unwrap();

    let so = [BufferDescriptor([1, 2, 3, 4]), BufferDescriptor([5, 6, 7, 8])];
    engine.set_streamout_buffers(0, &so).unwrap();
    engine.set_scalar(ShaderStage::Vertex, ScalarKind::GdsMemoryRange, Some(0x10));
    engine.set_scalar(ShaderStage::Geometry, ScalarKind::GdsMemoryRange, Some(0x20));

    let mut sink = TraceSink::new();
    let draw = engine.pre_draw(&mut sink).unwrap();
    engine.post_draw(&mut sink);
    let state = GpuView::new(sink.commands()).state_at(draw).unwrap();
    for cache in [&vs_cache, &gs_cache] {
        assert_eq!(
            state.read_shared(cache, SharedTable::Streamout, 1).unwrap(),
            so[1].as_bytes()
        );
    }
    assert_eq!(state.read_scalar(&vs_cache, ScalarKind::GdsMemoryRange), Some(0x10));
    assert_eq!(state.read_scalar(&gs_cache, ScalarKind::GdsMemoryRange), Some(0x20));

    // One upload of the shared block, pointed at by both stages.
    let writes = sink.count(
        |c| matches!(c, SinkCommand::WriteScratch { bytes, .. } if bytes.len() == 64),
    );
    assert_eq!(writes, 1);
}
