#![allow(dead_code)]

use std::sync::Arc;

use cue_core::{
    Engine, EngineConfig, GpuAddress, InputUsage, InputUsageList, ResourceDescriptor,
    SamplerDescriptor, ShaderBinding, ShaderHandle, ShaderStage,
};
use tracing_subscriber::EnvFilter;

pub const HEAP_BASE: GpuAddress = GpuAddress(0x0010_0000);

/// Install a test-friendly subscriber; honours `RUST_LOG`. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Engine initialized with exactly the heap it asks for.
pub fn engine(config: EngineConfig) -> Engine {
    init_tracing();
    let mut engine = Engine::new(config).expect("valid config");
    let size = engine.required_heap_size();
    engine.init(HEAP_BASE, size).expect("heap sized by required_heap_size");
    engine
}

pub fn shader(
    engine: &Engine,
    stage: ShaderStage,
    handle: u64,
    inputs: InputUsageList,
) -> ShaderBinding {
    let cache = engine
        .resolver()
        .build(stage, &inputs)
        .expect("valid input list");
    ShaderBinding {
        handle: ShaderHandle(handle),
        fetch: None,
        cache: Arc::new(cache),
    }
}

pub fn usages(list: Vec<InputUsage>) -> InputUsageList {
    InputUsageList::new(list)
}

/// Descriptor whose every dword encodes `tag`, so reads can be traced back to their bind.
pub fn resource(tag: u32) -> ResourceDescriptor {
    ResourceDescriptor(core::array::from_fn(|i| (tag << 4) | i as u32))
}

pub fn sampler(tag: u32) -> SamplerDescriptor {
    SamplerDescriptor(core::array::from_fn(|i| (tag << 4) | 0x8 | i as u32))
}

/// xorshift64* for reproducible interleavings.
pub struct Rng(u64);

impl Rng {
    pub fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.0 = x;
        x.wrapping_mul(0x2545_f491_4f6c_dd1d)
    }

    pub fn below(&mut self, n: u32) -> u32 {
        (self.next_u64() % u64::from(n)) as u32
    }

    pub fn chance(&mut self, percent: u32) -> bool {
        self.below(100) < percent
    }
}
