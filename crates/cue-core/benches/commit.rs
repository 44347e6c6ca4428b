#[cfg(target_arch = "wasm32")]
fn main() {}

#[cfg(not(target_arch = "wasm32"))]
use std::sync::Arc;
#[cfg(not(target_arch = "wasm32"))]
use std::time::Duration;

#[cfg(not(target_arch = "wasm32"))]
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
#[cfg(not(target_arch = "wasm32"))]
use cue_core::{
    CommandSink, Engine, EngineConfig, GpuAddress, InputUsage, InputUsageList, InputUsageType,
    ResourceDescriptor, ResourceKind, SamplerDescriptor, ShaderBinding, ShaderHandle, ShaderStage,
    StageFlags,
};

#[cfg(not(target_arch = "wasm32"))]
fn criterion_config() -> Criterion {
    match std::env::var("CUE_BENCH_PROFILE").as_deref() {
        Ok("ci") => Criterion::default()
            // Keep PR runtime low.
            .warm_up_time(Duration::from_millis(200))
            .measurement_time(Duration::from_secs(1))
            .sample_size(10)
            .noise_threshold(0.05),
        _ => Criterion::default()
            .warm_up_time(Duration::from_secs(1))
            .measurement_time(Duration::from_secs(2))
            .sample_size(30)
            .noise_threshold(0.03),
    }
}

/// Bump-allocating sink that discards everything it is asked to emit.
#[cfg(not(target_arch = "wasm32"))]
struct NullSink {
    cursor: u64,
    packets: u64,
}

#[cfg(not(target_arch = "wasm32"))]
impl NullSink {
    fn new() -> Self {
        Self {
            cursor: 0x4000_0000,
            packets: 0,
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl CommandSink for NullSink {
    fn allocate_scratch(&mut self, size: u32, align: u32) -> Option<GpuAddress> {
        let align = u64::from(align.max(1));
        let address = self.cursor.div_ceil(align) * align;
        self.cursor = address + u64::from(size);
        Some(GpuAddress(address))
    }

    fn write_scratch(&mut self, _dst: GpuAddress, bytes: &[u8]) {
        black_box(bytes);
        self.packets += 1;
    }

    fn copy_memory(&mut self, _dst: GpuAddress, _src: GpuAddress, _len: u32) {
        self.packets += 1;
    }

    fn set_user_data(&mut self, _stage: ShaderStage, _register: u32, words: &[u32]) {
        black_box(words);
        self.packets += 1;
    }

    fn set_pointer(&mut self, _stage: ShaderStage, _register: u32, _address: GpuAddress) {
        self.packets += 1;
    }

    fn wait_for_consumer(&mut self, _max_lag: u32) {
        self.packets += 1;
    }

    fn signal_producer(&mut self) {
        self.packets += 1;
    }

    fn signal_retirement(&mut self, _draw: u64) {
        self.packets += 1;
    }

    fn nop(&mut self) {
        self.packets += 1;
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn pixel_engine() -> Engine {
    let mut engine = Engine::new(EngineConfig::default()).unwrap();
    let size = engine.required_heap_size();
    engine.init(GpuAddress(0x0010_0000), size).unwrap();
    engine.set_active_stages(StageFlags::PIXEL);

    let inputs = InputUsageList::new(vec![
        InputUsage::fixed(InputUsageType::ExtendedUserData, 0),
        InputUsage::fixed(InputUsageType::Table(ResourceKind::Resource), 2),
        InputUsage::fixed(InputUsageType::Table(ResourceKind::Sampler), 4),
        InputUsage::descriptor(ResourceKind::Resource, 0, 8),
        InputUsage::descriptor(ResourceKind::Sampler, 0, 16),
    ]);
    let cache = engine.resolver().build(ShaderStage::Pixel, &inputs).unwrap();
    engine
        .set_shader(
            ShaderStage::Pixel,
            Some(ShaderBinding {
                handle: ShaderHandle(1),
                fetch: None,
                cache: Arc::new(cache),
            }),
        )
        .unwrap();

    let resources: Vec<ResourceDescriptor> = (0..32).map(|i| ResourceDescriptor([i; 8])).collect();
    let samplers: Vec<SamplerDescriptor> = (0..8).map(|i| SamplerDescriptor([i; 4])).collect();
    engine
        .set_resources(ShaderStage::Pixel, 0, 32, Some(&resources[..]))
        .unwrap();
    engine
        .set_samplers(ShaderStage::Pixel, 0, 8, Some(&samplers[..]))
        .unwrap();
    engine
}

#[cfg(not(target_arch = "wasm32"))]
fn bench_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit");
    group.throughput(Throughput::Elements(1));

    group.bench_function("draw_without_rebind", |b| {
        let mut engine = pixel_engine();
        let mut sink = NullSink::new();
        b.iter(|| {
            let draw = engine.pre_draw(&mut sink).unwrap();
            engine.post_draw(&mut sink);
            engine.retire_completed(draw.saturating_sub(8));
            black_box((draw, sink.packets))
        })
    });

    group.bench_function("draw_after_single_slot_rebind", |b| {
        let mut engine = pixel_engine();
        let mut sink = NullSink::new();
        let mut tag = 0u32;
        b.iter(|| {
            tag = tag.wrapping_add(1);
            engine
                .set_resource(
                    ShaderStage::Pixel,
                    black_box(tag % 32),
                    Some(&ResourceDescriptor([tag; 8])),
                )
                .unwrap();
            let draw = engine.pre_draw(&mut sink).unwrap();
            engine.post_draw(&mut sink);
            engine.retire_completed(draw.saturating_sub(8));
            if draw % 1024 == 0 {
                engine.advance_frame();
                engine
                    .set_resources(
                        ShaderStage::Pixel,
                        0,
                        32,
                        Some(&[ResourceDescriptor([tag; 8]); 32][..]),
                    )
                    .unwrap();
            }
            black_box((draw, sink.packets))
        })
    });

    group.finish();
}

#[cfg(not(target_arch = "wasm32"))]
criterion_group! {
    name = benches;
    config = criterion_config();
    targets = bench_commit
}
#[cfg(not(target_arch = "wasm32"))]
criterion_main!(benches);
