//! Recording command sink and replay for `cue-core`.
//!
//! [`TraceSink`] implements [`CommandSink`] by appending every primitive to a [`SinkCommand`]
//! list and handing out scratch from a private arena. [`GpuView`] replays such a list and answers
//! what a given draw reads for a shader input.

mod memory;

use std::collections::{BTreeMap, HashMap};

use cue_core::input::{Delegate, InputAction, Placement};
use cue_core::{
    CommandSink, GpuAddress, HeapArena, InputParameterCache, ResourceKind, ScalarKind,
    ShaderStage, SharedTable,
};
use tracing::trace;

pub use memory::SparseMemory;

/// One primitive emitted into the command stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkCommand {
    AllocateScratch { address: GpuAddress, size: u32 },
    WriteScratch { dst: GpuAddress, bytes: Vec<u8> },
    CopyMemory { dst: GpuAddress, src: GpuAddress, len: u32 },
    SetUserData {
        stage: ShaderStage,
        register: u32,
        words: Vec<u32>,
    },
    SetPointer {
        stage: ShaderStage,
        register: u32,
        address: GpuAddress,
    },
    WaitForConsumer { max_lag: u32 },
    SignalProducer,
    SignalRetirement { draw: u64 },
    Nop,
}

/// A [`CommandSink`] that records everything it is given.
#[derive(Debug)]
pub struct TraceSink {
    commands: Vec<SinkCommand>,
    scratch: HeapArena,
    /// Byte ranges written so far, keyed by start.
    written: BTreeMap<u64, u64>,
    rewrites: usize,
}

impl Default for TraceSink {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceSink {
    pub const DEFAULT_SCRATCH_BASE: u64 = 0x4000_0000;
    pub const DEFAULT_SCRATCH_BYTES: u64 = 64 * 1024 * 1024;

    pub fn new() -> Self {
        Self::with_scratch(Self::DEFAULT_SCRATCH_BASE, Self::DEFAULT_SCRATCH_BYTES)
    }

    pub fn with_scratch(base: u64, capacity: u64) -> Self {
        Self {
            commands: Vec::new(),
            scratch: HeapArena::new(base, capacity),
            written: BTreeMap::new(),
            rewrites: 0,
        }
    }

    pub fn commands(&self) -> &[SinkCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<SinkCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn scratch_used(&self) -> u64 {
        self.scratch.used()
    }

    /// Scratch writes that overlapped an earlier write.
    pub fn rewrites(&self) -> usize {
        self.rewrites
    }

    pub fn count(&self, pred: impl Fn(&SinkCommand) -> bool) -> usize {
        self.commands.iter().filter(|c| pred(c)).count()
    }

    fn overlaps_written(&self, start: u64, end: u64) -> bool {
        self.written
            .range(..end)
            .next_back()
            .is_some_and(|(_, &prev_end)| prev_end > start)
    }
}

impl CommandSink for TraceSink {
    fn allocate_scratch(&mut self, size: u32, align: u32) -> Option<GpuAddress> {
        let address = self
            .scratch
            .alloc(u64::from(size), u64::from(align))
            .map(GpuAddress)?;
        self.commands
            .push(SinkCommand::AllocateScratch { address, size });
        Some(address)
    }

    fn write_scratch(&mut self, dst: GpuAddress, bytes: &[u8]) {
        let end = dst.0 + bytes.len() as u64;
        if self.overlaps_written(dst.0, end) {
            trace!(dst = dst.0, len = bytes.len(), "scratch range written twice");
            self.rewrites += 1;
        }
        self.written.insert(dst.0, end);
        self.commands.push(SinkCommand::WriteScratch {
            dst,
            bytes: bytes.to_vec(),
        });
    }

    fn copy_memory(&mut self, dst: GpuAddress, src: GpuAddress, len: u32) {
        self.commands.push(SinkCommand::CopyMemory { dst, src, len });
    }

    fn set_user_data(&mut self, stage: ShaderStage, register: u32, words: &[u32]) {
        self.commands.push(SinkCommand::SetUserData {
            stage,
            register,
            words: words.to_vec(),
        });
    }

    fn set_pointer(&mut self, stage: ShaderStage, register: u32, address: GpuAddress) {
        self.commands.push(SinkCommand::SetPointer {
            stage,
            register,
            address,
        });
    }

    fn wait_for_consumer(&mut self, max_lag: u32) {
        self.commands.push(SinkCommand::WaitForConsumer { max_lag });
    }

    fn signal_producer(&mut self) {
        self.commands.push(SinkCommand::SignalProducer);
    }

    fn signal_retirement(&mut self, draw: u64) {
        self.commands.push(SinkCommand::SignalRetirement { draw });
    }

    fn nop(&mut self) {
        self.commands.push(SinkCommand::Nop);
    }
}

/// When CPU scratch writes become visible to the replayed GPU.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScratchTiming {
    /// At their position in the stream.
    #[default]
    StreamOrder,
    /// Before any GPU command runs: the GPU lags arbitrarily far behind the CPU.
    Immediate,
}

/// Replays a recorded command list.
#[derive(Clone, Copy, Debug)]
pub struct GpuView<'a> {
    commands: &'a [SinkCommand],
    timing: ScratchTiming,
}

impl<'a> GpuView<'a> {
    pub fn new(commands: &'a [SinkCommand]) -> Self {
        Self {
            commands,
            timing: ScratchTiming::default(),
        }
    }

    pub fn with_timing(mut self, timing: ScratchTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Draw numbers in retirement order.
    pub fn draws(&self) -> Vec<u64> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                SinkCommand::SignalRetirement { draw } => Some(*draw),
                _ => None,
            })
            .collect()
    }

    /// GPU state when `draw` executes (just before its retirement marker).
    pub fn state_at(&self, draw: u64) -> Option<GpuState> {
        let end = self
            .commands
            .iter()
            .position(|c| matches!(c, SinkCommand::SignalRetirement { draw: d } if *d == draw))?;
        Some(self.replay(end))
    }

    /// GPU state after every recorded command.
    pub fn final_state(&self) -> GpuState {
        self.replay(self.commands.len())
    }

    fn replay(&self, end: usize) -> GpuState {
        let mut state = GpuState::default();
        if self.timing == ScratchTiming::Immediate {
            for cmd in self.commands {
                if let SinkCommand::WriteScratch { dst, bytes } = cmd {
                    state.memory.write(dst.0, bytes);
                }
            }
        }
        for cmd in &self.commands[..end] {
            state.apply(cmd, self.timing);
        }
        state
    }
}

/// Memory and user-data registers as the GPU sees them at one point of the stream.
#[derive(Clone, Debug, Default)]
pub struct GpuState {
    memory: SparseMemory,
    registers: HashMap<(ShaderStage, u32), u32>,
}

impl GpuState {
    fn apply(&mut self, cmd: &SinkCommand, timing: ScratchTiming) {
        match cmd {
            SinkCommand::WriteScratch { dst, bytes } => {
                if timing == ScratchTiming::StreamOrder {
                    self.memory.write(dst.0, bytes);
                }
            }
            SinkCommand::CopyMemory { dst, src, len } => {
                let bytes = self.memory.read(src.0, *len as usize);
                self.memory.write(dst.0, &bytes);
            }
            SinkCommand::SetUserData {
                stage,
                register,
                words,
            } => {
                for (i, word) in words.iter().enumerate() {
                    self.registers.insert((*stage, register + i as u32), *word);
                }
            }
            SinkCommand::SetPointer {
                stage,
                register,
                address,
            } => {
                let [lo, hi] = address.to_dwords();
                self.registers.insert((*stage, *register), lo);
                self.registers.insert((*stage, register + 1), hi);
            }
            SinkCommand::AllocateScratch { .. }
            | SinkCommand::WaitForConsumer { .. }
            | SinkCommand::SignalProducer
            | SinkCommand::SignalRetirement { .. }
            | SinkCommand::Nop => {}
        }
    }

    pub fn memory(&self) -> &SparseMemory {
        &self.memory
    }

    pub fn user_data(&self, stage: ShaderStage, register: u32) -> u32 {
        self.registers
            .get(&(stage, register))
            .copied()
            .unwrap_or(0)
    }

    pub fn pointer(&self, stage: ShaderStage, register: u32) -> GpuAddress {
        let lo = u64::from(self.user_data(stage, register));
        let hi = u64::from(self.user_data(stage, register + 1));
        GpuAddress(lo | (hi << 32))
    }

    fn registers(&self, stage: ShaderStage, register: u32, dwords: u32) -> Vec<u8> {
        (register..register + dwords)
            .flat_map(|r| self.user_data(stage, r).to_le_bytes())
            .collect()
    }

    fn extended_base(&self, cache: &InputParameterCache) -> Option<GpuAddress> {
        cache.entries().iter().find_map(|a| match a {
            InputAction::Delegate {
                delegate: Delegate::ExtendedUserData,
                target: Placement::Register(register),
            } => Some(self.pointer(cache.stage(), *register)),
            _ => None,
        })
    }

    fn delegate_pointer(
        &self,
        cache: &InputParameterCache,
        wanted: Delegate,
    ) -> Option<GpuAddress> {
        let target = cache.entries().iter().find_map(|a| match a {
            InputAction::Delegate { delegate, target } if *delegate == wanted => Some(*target),
            _ => None,
        })?;
        match target {
            Placement::Register(register) => Some(self.pointer(cache.stage(), register)),
            Placement::Extended(offset) => {
                let base = self.extended_base(cache)?;
                let raw = self.memory.read(base.0 + u64::from(offset) * 4, 8);
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&raw);
                Some(GpuAddress(u64::from_le_bytes(bytes)))
            }
        }
    }

    /// Descriptor bytes the shader described by `cache` reads for `(kind, slot)`.
    ///
    /// Looks at inline registers, the extended block and the kind's table pointer, in that order.
    /// Returns `None` when the shader does not read the slot.
    pub fn read_descriptor(
        &self,
        cache: &InputParameterCache,
        kind: ResourceKind,
        slot: u32,
    ) -> Option<Vec<u8>> {
        let stage = cache.stage();
        for action in cache.entries() {
            match *action {
                InputAction::InlineDescriptor {
                    kind: k,
                    slot: s,
                    register,
                    dwords,
                } if k == kind && s == slot => {
                    return Some(self.registers(stage, register, dwords));
                }
                InputAction::ExtendedDescriptor {
                    kind: k,
                    slot: s,
                    offset,
                    dwords,
                } if k == kind && s == slot => {
                    let base = self.extended_base(cache)?;
                    return Some(
                        self.memory
                            .read(base.0 + u64::from(offset) * 4, dwords as usize * 4),
                    );
                }
                _ => {}
            }
        }
        let table = self.delegate_pointer(cache, Delegate::Table(kind))?;
        let stride = u64::from(kind.stride_bytes());
        Some(
            self.memory
                .read(table.0 + u64::from(slot) * stride, stride as usize),
        )
    }

    pub fn read_shared(
        &self,
        cache: &InputParameterCache,
        table: SharedTable,
        slot: u32,
    ) -> Option<Vec<u8>> {
        let delegate = match table {
            SharedTable::Global => Delegate::GlobalTable,
            SharedTable::Streamout => Delegate::StreamoutTable,
        };
        let base = self.delegate_pointer(cache, delegate)?;
        let stride = u64::from(table.stride_bytes());
        Some(
            self.memory
                .read(base.0 + u64::from(slot) * stride, stride as usize),
        )
    }

    pub fn read_scalar(&self, cache: &InputParameterCache, scalar: ScalarKind) -> Option<u32> {
        cache.entries().iter().find_map(|a| match *a {
            InputAction::InlineScalar { scalar: s, register } if s == scalar => {
                Some(self.user_data(cache.stage(), register))
            }
            InputAction::ExtendedScalar { scalar: s, offset } if s == scalar => {
                let base = self.extended_base(cache)?;
                let raw = self.memory.read(base.0 + u64::from(offset) * 4, 4);
                Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
            }
            _ => None,
        })
    }
}
