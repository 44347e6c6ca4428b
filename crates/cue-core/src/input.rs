//! Shader input declarations and the precompiled plan for satisfying them.
//!
//! A compiled shader declares a list of [`InputUsage`]s: for each input, what it is and which
//! user-data dword the compiler expects it at. Dwords below the stage's inline register budget
//! are loaded straight into user-data registers; the rest live in the stage's extended block,
//! which the shader reaches through an [`InputUsageType::ExtendedUserData`] pointer.
//!
//! [`InputUsageResolver::build`] turns the declaration into an [`InputParameterCache`]: a flat
//! list of [`InputAction`]s in five contiguous partitions. Committing a draw is then a single
//! pass over that list.

use core::ops::Range;

use tracing::debug;

use crate::bitset::SlotMask;
use crate::config::{EngineConfig, MAX_EXTENDED_DWORDS};
use crate::error::CueError;
use crate::stage::{ResourceKind, ResourceKindFlags, ScalarKind, ShaderStage, SharedTable};

/// Largest number of inputs a single shader may declare.
pub const MAX_INPUT_ENTRIES: usize = 128;

/// What a declared input is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InputUsageType {
    /// Descriptor for one slot, copied by value.
    Descriptor(ResourceKind),
    /// One dword of per-stage scalar state.
    Scalar(ScalarKind),
    /// Pointer to a ring-backed table of every active slot of a kind.
    Table(ResourceKind),
    /// Pointer to the shared global descriptor table.
    GlobalTable,
    /// Pointer to the shared streamout buffer table.
    StreamoutTable,
    /// Pointer to an application-managed shader resource table.
    ShaderResourceTable,
    /// Pointer to this stage's extended user-data block.
    ExtendedUserData,
    /// Address of the fetch shader subroutine.
    FetchShader,
    /// On-chip ES/GS ring size in bytes.
    OnChipEsGsSize,
}

impl InputUsageType {
    /// Dwords the input occupies when its width is fixed.
    pub const fn fixed_dwords(self) -> Option<u32> {
        match self {
            Self::Descriptor(_) => None,
            Self::Scalar(_) | Self::OnChipEsGsSize => Some(1),
            Self::Table(_)
            | Self::GlobalTable
            | Self::StreamoutTable
            | Self::ShaderResourceTable
            | Self::ExtendedUserData
            | Self::FetchShader => Some(2),
        }
    }
}

/// One declared shader input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InputUsage {
    pub usage: InputUsageType,
    /// Slot within the kind, for descriptor inputs. Ignored otherwise.
    pub api_slot: u32,
    /// First user-data dword the shader reads this input from.
    pub start_register: u32,
    /// Dwords read. Descriptor inputs may read a prefix of the slot (buffer in a resource slot).
    pub dword_count: u32,
}

impl InputUsage {
    pub fn descriptor(kind: ResourceKind, api_slot: u32, start_register: u32) -> Self {
        Self {
            usage: InputUsageType::Descriptor(kind),
            api_slot,
            start_register,
            dword_count: kind.stride_dwords(),
        }
    }

    pub fn with_dwords(mut self, dword_count: u32) -> Self {
        self.dword_count = dword_count;
        self
    }

    /// Inputs with a fixed width (everything except descriptors).
    pub fn fixed(usage: InputUsageType, start_register: u32) -> Self {
        Self {
            usage,
            api_slot: 0,
            start_register,
            dword_count: usage.fixed_dwords().unwrap_or(1),
        }
    }
}

/// Everything a shader declares about its inputs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InputUsageList {
    pub usages: Vec<InputUsage>,
    /// Slots the shader reads through `Table` pointers, per kind. Only used to detect reads of
    /// unbound slots; the table copy itself always covers every active slot.
    pub table_reads: [SlotMask; ResourceKind::COUNT],
    /// Same, for the global and streamout tables.
    pub shared_reads: [SlotMask; SharedTable::COUNT],
}

impl InputUsageList {
    pub fn new(usages: Vec<InputUsage>) -> Self {
        Self {
            usages,
            table_reads: [SlotMask::EMPTY; ResourceKind::COUNT],
            shared_reads: [SlotMask::EMPTY; SharedTable::COUNT],
        }
    }

    pub fn with_table_reads(mut self, kind: ResourceKind, slots: SlotMask) -> Self {
        self.table_reads[kind.index()] |= slots;
        self
    }

    pub fn with_shared_reads(mut self, table: SharedTable, slots: SlotMask) -> Self {
        self.shared_reads[table.index()] |= slots;
        self
    }
}

/// Where a delegate's value is written.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Placement {
    /// First user-data register.
    Register(u32),
    /// Dword offset into the extended block.
    Extended(u32),
}

/// Inputs whose value is produced by dedicated engine logic rather than a slot copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Delegate {
    Table(ResourceKind),
    GlobalTable,
    StreamoutTable,
    ShaderResourceTable,
    ExtendedUserData,
    FetchShader,
    OnChipEsGsSize,
}

/// One resolved step of applying a cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InputAction {
    InlineDescriptor {
        kind: ResourceKind,
        slot: u32,
        register: u32,
        dwords: u32,
    },
    InlineScalar {
        scalar: ScalarKind,
        register: u32,
    },
    ExtendedDescriptor {
        kind: ResourceKind,
        slot: u32,
        offset: u32,
        dwords: u32,
    },
    ExtendedScalar {
        scalar: ScalarKind,
        offset: u32,
    },
    Delegate {
        delegate: Delegate,
        target: Placement,
    },
}

/// The five partitions of an [`InputParameterCache`], in storage order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Partition {
    InlineDescriptor,
    InlineScalar,
    ExtendedDescriptor,
    ExtendedScalar,
    Delegate,
}

impl Partition {
    pub const ALL: [Partition; 5] = [
        Self::InlineDescriptor,
        Self::InlineScalar,
        Self::ExtendedDescriptor,
        Self::ExtendedScalar,
        Self::Delegate,
    ];

    const fn index(self) -> usize {
        match self {
            Self::InlineDescriptor => 0,
            Self::InlineScalar => 1,
            Self::ExtendedDescriptor => 2,
            Self::ExtendedScalar => 3,
            Self::Delegate => 4,
        }
    }
}

impl InputAction {
    pub const fn partition(&self) -> Partition {
        match self {
            Self::InlineDescriptor { .. } => Partition::InlineDescriptor,
            Self::InlineScalar { .. } => Partition::InlineScalar,
            Self::ExtendedDescriptor { .. } => Partition::ExtendedDescriptor,
            Self::ExtendedScalar { .. } => Partition::ExtendedScalar,
            Self::Delegate { .. } => Partition::Delegate,
        }
    }
}

/// Precompiled, immutable plan for feeding one shader's inputs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputParameterCache {
    stage: ShaderStage,
    limits: ResolverLimits,
    entries: Box<[InputAction]>,
    /// `bounds[p]..bounds[p + 1]` is partition `p`.
    bounds: [usize; 6],
    immediate_slots: [SlotMask; ResourceKind::COUNT],
    table_slots: [SlotMask; ResourceKind::COUNT],
    table_kinds: ResourceKindFlags,
    shared_slots: [SlotMask; SharedTable::COUNT],
    scalars: [bool; ScalarKind::COUNT],
    extended_dwords: u32,
}

impl InputParameterCache {
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// Limits the cache was built against. An engine only accepts caches built for its own.
    pub fn limits(&self) -> ResolverLimits {
        self.limits
    }

    pub fn entries(&self) -> &[InputAction] {
        &self.entries
    }

    pub fn partition(&self, partition: Partition) -> &[InputAction] {
        &self.entries[self.partition_range(partition)]
    }

    pub fn partition_range(&self, partition: Partition) -> Range<usize> {
        let i = partition.index();
        self.bounds[i]..self.bounds[i + 1]
    }

    /// Slots copied by value (inline or extended), per kind.
    pub fn immediate_slots(&self, kind: ResourceKind) -> SlotMask {
        self.immediate_slots[kind.index()]
    }

    /// Slots the shader declared it reads through a table pointer.
    pub fn table_slots(&self, kind: ResourceKind) -> SlotMask {
        self.table_slots[kind.index()]
    }

    /// Slots the shader declared it reads through a shared table pointer.
    pub fn shared_slots(&self, table: SharedTable) -> SlotMask {
        self.shared_slots[table.index()]
    }

    /// Kinds addressed through a ring-backed table pointer.
    pub fn table_kinds(&self) -> ResourceKindFlags {
        self.table_kinds
    }

    /// Every kind the cache touches.
    pub fn referenced_kinds(&self) -> ResourceKindFlags {
        let mut kinds = self.table_kinds;
        for kind in ResourceKind::ALL {
            if !self.immediate_slots(kind).is_empty() {
                kinds |= kind.flag();
            }
        }
        kinds
    }

    pub fn reads_scalar(&self, scalar: ScalarKind) -> bool {
        self.scalars[scalar.index()]
    }

    /// Size of the extended block this shader needs, in dwords (0 if none).
    pub fn extended_dwords(&self) -> u32 {
        self.extended_dwords
    }

    pub fn uses_delegate(&self, delegate: Delegate) -> bool {
        self.partition(Partition::Delegate)
            .iter()
            .any(|a| matches!(a, InputAction::Delegate { delegate: d, .. } if *d == delegate))
    }
}

/// Limits the resolver validates declarations against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolverLimits {
    pub inline_user_data_dwords: u32,
    pub max_extended_dwords: u32,
    pub ring_kinds: ResourceKindFlags,
    pub slot_counts: [u32; ResourceKind::COUNT],
}

impl From<&EngineConfig> for ResolverLimits {
    fn from(config: &EngineConfig) -> Self {
        let mut slot_counts = [0; ResourceKind::COUNT];
        for kind in ResourceKind::ALL {
            slot_counts[kind.index()] = config.slot_counts.get(kind);
        }
        Self {
            inline_user_data_dwords: config.inline_user_data_dwords,
            max_extended_dwords: config.max_extended_dwords,
            ring_kinds: config.ring_kinds,
            slot_counts,
        }
    }
}

impl Default for ResolverLimits {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

/// Builds [`InputParameterCache`]s.
#[derive(Clone, Copy, Debug, Default)]
pub struct InputUsageResolver {
    limits: ResolverLimits,
}

impl InputUsageResolver {
    pub fn new(limits: ResolverLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> ResolverLimits {
        self.limits
    }

    pub fn build(
        &self,
        stage: ShaderStage,
        inputs: &InputUsageList,
    ) -> Result<InputParameterCache, CueError> {
        if inputs.usages.len() > MAX_INPUT_ENTRIES {
            return Err(CueError::InputTableOverflow {
                stage,
                count: inputs.usages.len(),
                max: MAX_INPUT_ENTRIES,
            });
        }

        let inline = self.limits.inline_user_data_dwords;
        let max_extended = u64::from(self.limits.max_extended_dwords.min(MAX_EXTENDED_DWORDS));
        let mut immediate_slots = [SlotMask::EMPTY; ResourceKind::COUNT];
        let mut table_kinds = ResourceKindFlags::empty();
        let mut shared_tables = [false; SharedTable::COUNT];
        let mut scalars = [false; ScalarKind::COUNT];
        let mut extended_dwords = 0u32;
        let mut has_extended_pointer = false;
        let mut buckets: [Vec<InputAction>; 5] = Default::default();
        // Dword ranges claimed so far: (in extended block, start, end, input index).
        let mut claimed: Vec<(bool, u64, u64, usize)> = Vec::with_capacity(inputs.usages.len());

        for (index, input) in inputs.usages.iter().enumerate() {
            let invalid = |reason: String| CueError::InvalidInputUsage {
                stage,
                index,
                reason,
            };

            let width = match input.usage {
                InputUsageType::Descriptor(kind) => {
                    if input.dword_count == 0 || input.dword_count > kind.stride_dwords() {
                        return Err(invalid(format!(
                            "{kind} descriptor reads {} dwords, slot holds {}",
                            input.dword_count,
                            kind.stride_dwords()
                        )));
                    }
                    let capacity = self.limits.slot_counts[kind.index()];
                    if input.api_slot >= capacity {
                        return Err(invalid(format!(
                            "{kind} slot {} out of range (capacity {capacity})",
                            input.api_slot
                        )));
                    }
                    input.dword_count
                }
                other => {
                    let fixed = other.fixed_dwords().unwrap_or(1);
                    if input.dword_count != fixed {
                        return Err(invalid(format!(
                            "{other:?} occupies {fixed} dwords, declared {}",
                            input.dword_count
                        )));
                    }
                    fixed
                }
            };

            let start = input.start_register;
            let end = u64::from(start) + u64::from(width);
            let (extended, lo, hi, placement) = if start < inline {
                if end > u64::from(inline) {
                    return Err(invalid(format!(
                        "dwords {start}..{end} straddle the {inline}-dword inline register budget"
                    )));
                }
                (false, u64::from(start), end, Placement::Register(start))
            } else {
                let offset = start - inline;
                let offset_end = u64::from(offset) + u64::from(width);
                if offset_end > max_extended {
                    return Err(invalid(format!(
                        "extended dwords {offset}..{offset_end} exceed the \
                         {max_extended}-dword extended block"
                    )));
                }
                (true, u64::from(offset), offset_end, Placement::Extended(offset))
            };
            if let Some(&(_, _, _, other)) = claimed
                .iter()
                .find(|&&(ext, s, e, _)| ext == extended && s < hi && lo < e)
            {
                let space = if extended { "extended" } else { "inline" };
                return Err(invalid(format!(
                    "{space} dwords {lo}..{hi} overlap input #{other}"
                )));
            }
            claimed.push((extended, lo, hi, index));
            if extended {
                // `hi` is bounded by `max_extended`, which fits in u32.
                extended_dwords = extended_dwords.max(hi as u32);
            }

            let action = match (input.usage, placement) {
                (InputUsageType::Descriptor(kind), Placement::Register(register)) => {
                    immediate_slots[kind.index()].set(input.api_slot);
                    InputAction::InlineDescriptor {
                        kind,
                        slot: input.api_slot,
                        register,
                        dwords: width,
                    }
                }
                (InputUsageType::Descriptor(kind), Placement::Extended(offset)) => {
                    immediate_slots[kind.index()].set(input.api_slot);
                    InputAction::ExtendedDescriptor {
                        kind,
                        slot: input.api_slot,
                        offset,
                        dwords: width,
                    }
                }
                (InputUsageType::Scalar(scalar), Placement::Register(register)) => {
                    scalars[scalar.index()] = true;
                    InputAction::InlineScalar { scalar, register }
                }
                (InputUsageType::Scalar(scalar), Placement::Extended(offset)) => {
                    scalars[scalar.index()] = true;
                    InputAction::ExtendedScalar { scalar, offset }
                }
                (InputUsageType::ExtendedUserData, Placement::Extended(_)) => {
                    return Err(invalid(
                        "extended user-data pointer must live in an inline register".into(),
                    ));
                }
                (InputUsageType::Table(kind), target) => {
                    if !self.limits.ring_kinds.contains(kind.flag())
                        || self.limits.slot_counts[kind.index()] == 0
                    {
                        return Err(invalid(format!(
                            "{kind} table requested but {kind} has no ring"
                        )));
                    }
                    table_kinds |= kind.flag();
                    InputAction::Delegate {
                        delegate: Delegate::Table(kind),
                        target,
                    }
                }
                (usage, target) => {
                    let delegate = match usage {
                        InputUsageType::GlobalTable => {
                            shared_tables[SharedTable::Global.index()] = true;
                            Delegate::GlobalTable
                        }
                        InputUsageType::StreamoutTable => {
                            shared_tables[SharedTable::Streamout.index()] = true;
                            Delegate::StreamoutTable
                        }
                        InputUsageType::ShaderResourceTable => Delegate::ShaderResourceTable,
                        InputUsageType::ExtendedUserData => {
                            has_extended_pointer = true;
                            Delegate::ExtendedUserData
                        }
                        InputUsageType::FetchShader => Delegate::FetchShader,
                        InputUsageType::OnChipEsGsSize => Delegate::OnChipEsGsSize,
                        InputUsageType::Descriptor(_)
                        | InputUsageType::Scalar(_)
                        | InputUsageType::Table(_) => unreachable!("handled above"),
                    };
                    InputAction::Delegate { delegate, target }
                }
            };
            buckets[action.partition().index()].push(action);
        }

        if extended_dwords > 0 && !has_extended_pointer {
            return Err(CueError::InvalidInputUsage {
                stage,
                index: inputs.usages.len(),
                reason: "inputs placed in the extended block but no extended user-data pointer \
                         is declared"
                    .into(),
            });
        }

        let mut bounds = [0usize; 6];
        let mut entries = Vec::with_capacity(inputs.usages.len());
        for partition in Partition::ALL {
            let i = partition.index();
            bounds[i] = entries.len();
            entries.append(&mut buckets[i]);
        }
        bounds[5] = entries.len();

        let mut table_slots = [SlotMask::EMPTY; ResourceKind::COUNT];
        for kind in table_kinds.kinds() {
            table_slots[kind.index()] = inputs.table_reads[kind.index()];
        }

        let mut shared_slots = [SlotMask::EMPTY; SharedTable::COUNT];
        for table in SharedTable::ALL {
            let reads = inputs.shared_reads[table.index()];
            if !shared_tables[table.index()] {
                continue;
            }
            if reads.span() > table.slots() {
                return Err(CueError::InvalidInputUsage {
                    stage,
                    index: inputs.usages.len(),
                    reason: format!(
                        "{table} reads reach slot {}, table holds {}",
                        reads.span() - 1,
                        table.slots()
                    ),
                });
            }
            shared_slots[table.index()] = reads;
        }

        let cache = InputParameterCache {
            stage,
            limits: self.limits,
            entries: entries.into_boxed_slice(),
            bounds,
            immediate_slots,
            table_slots,
            table_kinds,
            shared_slots,
            scalars,
            extended_dwords,
        };
        debug!(
            stage = %stage,
            inline_descriptors = cache.partition(Partition::InlineDescriptor).len(),
            inline_scalars = cache.partition(Partition::InlineScalar).len(),
            extended_descriptors = cache.partition(Partition::ExtendedDescriptor).len(),
            extended_scalars = cache.partition(Partition::ExtendedScalar).len(),
            delegates = cache.partition(Partition::Delegate).len(),
            extended_dwords,
            "built input parameter cache"
        );
        Ok(cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn resolver() -> InputUsageResolver {
        InputUsageResolver::default()
    }

    #[test]
    fn partitions_are_contiguous_and_ordered() {
        let list = InputUsageList::new(vec![
            InputUsage::fixed(InputUsageType::Table(ResourceKind::Resource), 0),
            InputUsage::fixed(InputUsageType::Scalar(ScalarKind::GwsBase), 2),
            InputUsage::descriptor(ResourceKind::Sampler, 1, 4),
            InputUsage::fixed(InputUsageType::ExtendedUserData, 8),
            InputUsage::descriptor(ResourceKind::ConstantBuffer, 0, 16),
            InputUsage::fixed(InputUsageType::Scalar(ScalarKind::BoolConstants), 20),
            InputUsage::descriptor(ResourceKind::Sampler, 0, 10),
        ]);
        let cache = resolver().build(ShaderStage::Pixel, &list).unwrap();

        let kinds: Vec<Partition> = cache.entries().iter().map(InputAction::partition).collect();
        assert_eq!(
            kinds,
            vec![
                Partition::InlineDescriptor,
                Partition::InlineDescriptor,
                Partition::InlineScalar,
                Partition::ExtendedDescriptor,
                Partition::ExtendedScalar,
                Partition::Delegate,
                Partition::Delegate,
            ]
        );
        // Declaration order is kept within a partition.
        assert_eq!(
            cache.partition(Partition::InlineDescriptor),
            &[
                InputAction::InlineDescriptor {
                    kind: ResourceKind::Sampler,
                    slot: 1,
                    register: 4,
                    dwords: 4
                },
                InputAction::InlineDescriptor {
                    kind: ResourceKind::Sampler,
                    slot: 0,
                    register: 10,
                    dwords: 4
                },
            ]
        );
        assert_eq!(cache.extended_dwords(), 5);
        assert_eq!(cache.table_kinds(), ResourceKindFlags::RESOURCE);
        assert_eq!(
            cache.referenced_kinds(),
            ResourceKindFlags::RESOURCE
                | ResourceKindFlags::SAMPLER
                | ResourceKindFlags::CONSTANT_BUFFER
        );
        assert!(cache.reads_scalar(ScalarKind::BoolConstants));
        assert!(!cache.reads_scalar(ScalarKind::GdsMemoryRange));
        assert!(cache.uses_delegate(Delegate::ExtendedUserData));
    }

    #[test]
    fn overflow_is_rejected() {
        let list = InputUsageList::new(vec![
            InputUsage::fixed(InputUsageType::OnChipEsGsSize, 0);
            MAX_INPUT_ENTRIES + 1
        ]);
        assert_eq!(
            resolver().build(ShaderStage::Vertex, &list),
            Err(CueError::InputTableOverflow {
                stage: ShaderStage::Vertex,
                count: MAX_INPUT_ENTRIES + 1,
                max: MAX_INPUT_ENTRIES,
            })
        );
    }

    #[test]
    fn straddling_the_inline_budget_is_rejected() {
        let list = InputUsageList::new(vec![InputUsage::descriptor(
            ResourceKind::Resource,
            0,
            12,
        )]);
        let err = resolver().build(ShaderStage::Pixel, &list).unwrap_err();
        assert!(err.to_string().contains("straddle"), "{err}");
    }

    #[test]
    fn extended_inputs_require_a_pointer() {
        let list = InputUsageList::new(vec![InputUsage::descriptor(
            ResourceKind::Sampler,
            0,
            16,
        )]);
        let err = resolver().build(ShaderStage::Pixel, &list).unwrap_err();
        assert!(matches!(err, CueError::InvalidInputUsage { index: 1, .. }));
    }

    #[test]
    fn table_without_ring_is_rejected() {
        let limits = ResolverLimits {
            ring_kinds: ResourceKindFlags::SAMPLER,
            ..ResolverLimits::default()
        };
        let list = InputUsageList::new(vec![InputUsage::fixed(
            InputUsageType::Table(ResourceKind::Resource),
            0,
        )]);
        assert!(InputUsageResolver::new(limits)
            .build(ShaderStage::Compute, &list)
            .is_err());
    }

    #[test]
    fn descriptor_prefix_reads_are_allowed() {
        let list = InputUsageList::new(vec![
            InputUsage::descriptor(ResourceKind::Resource, 3, 0).with_dwords(4)
        ]);
        let cache = resolver().build(ShaderStage::Vertex, &list).unwrap();
        assert_eq!(
            cache.entries(),
            &[InputAction::InlineDescriptor {
                kind: ResourceKind::Resource,
                slot: 3,
                register: 0,
                dwords: 4
            }]
        );

        let too_wide = InputUsageList::new(vec![
            InputUsage::descriptor(ResourceKind::Sampler, 0, 0).with_dwords(8)
        ]);
        assert!(resolver().build(ShaderStage::Vertex, &too_wide).is_err());
    }

    #[test]
    fn overlapping_inputs_are_rejected() {
        let inline = InputUsageList::new(vec![
            InputUsage::descriptor(ResourceKind::Sampler, 0, 0),
            InputUsage::fixed(InputUsageType::Scalar(ScalarKind::GwsBase), 3),
        ]);
        let err = resolver().build(ShaderStage::Pixel, &inline).unwrap_err();
        assert_eq!(
            err,
            CueError::InvalidInputUsage {
                stage: ShaderStage::Pixel,
                index: 1,
                reason: "inline dwords 3..4 overlap input #0".into(),
            }
        );

        let extended = InputUsageList::new(vec![
            InputUsage::fixed(InputUsageType::ExtendedUserData, 0),
            InputUsage::descriptor(ResourceKind::ConstantBuffer, 0, 16),
            InputUsage::descriptor(ResourceKind::ConstantBuffer, 1, 18),
        ]);
        let err = resolver().build(ShaderStage::Pixel, &extended).unwrap_err();
        assert!(matches!(err, CueError::InvalidInputUsage { index: 2, .. }), "{err}");
        assert!(err.to_string().contains("extended dwords 2..6 overlap input #1"), "{err}");

        // Adjacent ranges are fine.
        let adjacent = InputUsageList::new(vec![
            InputUsage::descriptor(ResourceKind::Sampler, 0, 0),
            InputUsage::fixed(InputUsageType::Scalar(ScalarKind::GwsBase), 4),
        ]);
        resolver().build(ShaderStage::Pixel, &adjacent).unwrap();
    }

    #[test]
    fn extended_block_size_is_capped() {
        let far = InputUsageList::new(vec![
            InputUsage::fixed(InputUsageType::ExtendedUserData, 0),
            InputUsage::fixed(InputUsageType::Scalar(ScalarKind::GwsBase), 0xF000_0000),
        ]);
        let err = resolver().build(ShaderStage::Compute, &far).unwrap_err();
        assert!(matches!(err, CueError::InvalidInputUsage { index: 1, .. }), "{err}");

        let limits = ResolverLimits {
            max_extended_dwords: 8,
            ..ResolverLimits::default()
        };
        let at_cap = InputUsageList::new(vec![
            InputUsage::fixed(InputUsageType::ExtendedUserData, 0),
            InputUsage::descriptor(ResourceKind::Sampler, 0, 20),
        ]);
        let cache = InputUsageResolver::new(limits)
            .build(ShaderStage::Compute, &at_cap)
            .unwrap();
        assert_eq!(cache.extended_dwords(), 8);
        let past_cap = InputUsageList::new(vec![
            InputUsage::fixed(InputUsageType::ExtendedUserData, 0),
            InputUsage::descriptor(ResourceKind::Sampler, 0, 21),
        ]);
        assert!(InputUsageResolver::new(limits)
            .build(ShaderStage::Compute, &past_cap)
            .is_err());
    }

    #[test]
    fn table_of_an_empty_kind_is_rejected() {
        let mut limits = ResolverLimits::default();
        limits.slot_counts[ResourceKind::RwResource.index()] = 0;
        let list = InputUsageList::new(vec![InputUsage::fixed(
            InputUsageType::Table(ResourceKind::RwResource),
            0,
        )]);
        let err = InputUsageResolver::new(limits)
            .build(ShaderStage::Compute, &list)
            .unwrap_err();
        assert!(err.to_string().contains("has no ring"), "{err}");
    }

    #[test]
    fn shared_reads_are_kept_and_bounded() {
        let list = InputUsageList::new(vec![InputUsage::fixed(InputUsageType::GlobalTable, 0)])
            .with_shared_reads(SharedTable::Global, SlotMask::single(15))
            .with_shared_reads(SharedTable::Streamout, SlotMask::single(1));
        let cache = resolver().build(ShaderStage::Pixel, &list).unwrap();
        assert_eq!(cache.shared_slots(SharedTable::Global), SlotMask::single(15));
        // Not declared, so not tracked.
        assert!(cache.shared_slots(SharedTable::Streamout).is_empty());
        assert_eq!(cache.limits(), ResolverLimits::default());

        let past_end =
            InputUsageList::new(vec![InputUsage::fixed(InputUsageType::StreamoutTable, 0)])
                .with_shared_reads(SharedTable::Streamout, SlotMask::single(4));
        assert!(resolver().build(ShaderStage::Pixel, &past_end).is_err());
    }

    #[test]
    fn table_reads_only_kept_for_table_kinds() {
        let list = InputUsageList::new(vec![InputUsage::fixed(
            InputUsageType::Table(ResourceKind::Sampler),
            0,
        )])
        .with_table_reads(ResourceKind::Sampler, SlotMask::range(0, 3))
        .with_table_reads(ResourceKind::Resource, SlotMask::range(0, 3));
        let cache = resolver().build(ShaderStage::Pixel, &list).unwrap();
        assert_eq!(cache.table_slots(ResourceKind::Sampler), SlotMask::range(0, 3));
        assert!(cache.table_slots(ResourceKind::Resource).is_empty());
    }
}
