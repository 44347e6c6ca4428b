//! Engine configuration.
//!
//! Defaults describe the full binding model. `EngineConfig::from_env` layers a small set of
//! environment overrides on top, for content debugging without a rebuild.

use crate::error::CueError;
use crate::stage::{ResourceKind, ResourceKindFlags};

/// Minimum number of ring elements; fewer cannot bridge CPU/GPU latency.
pub const MIN_RING_DEPTH: u32 = 4;

/// Default ring depth per (stage, kind).
pub const DEFAULT_RING_DEPTH: u32 = 16;

/// User-data registers available to each stage for inline inputs.
pub const DEFAULT_INLINE_USER_DATA_DWORDS: u32 = 16;

/// The extended-block pointer takes two inline registers.
pub const MIN_INLINE_USER_DATA_DWORDS: u32 = 2;

pub const MAX_INLINE_USER_DATA_DWORDS: u32 = 256;

/// Default cap on a shader's extended block.
pub const DEFAULT_MAX_EXTENDED_DWORDS: u32 = 1024;

/// Hard cap on the extended block; keeps its byte size well inside `u32`.
pub const MAX_EXTENDED_DWORDS: u32 = 1 << 16;

/// What a commit does when a shader reads a slot nothing is bound to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UnboundPolicy {
    /// Serve zeroed descriptor data and log a warning.
    #[default]
    ZeroFill,
    /// Fail the commit with `CueError::ResourceNotBound`.
    Strict,
}

/// Slot count per resource kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotCounts([u32; ResourceKind::COUNT]);

impl Default for SlotCounts {
    fn default() -> Self {
        Self::max()
    }
}

impl SlotCounts {
    /// Every kind at its architectural maximum.
    pub fn max() -> Self {
        let mut counts = [0; ResourceKind::COUNT];
        for kind in ResourceKind::ALL {
            counts[kind.index()] = kind.max_slots();
        }
        Self(counts)
    }

    pub fn get(&self, kind: ResourceKind) -> u32 {
        self.0[kind.index()]
    }

    pub fn with(mut self, kind: ResourceKind, count: u32) -> Self {
        self.0[kind.index()] = count;
        self
    }

    pub fn validate(&self) -> Result<(), CueError> {
        for kind in ResourceKind::ALL {
            let count = self.get(kind);
            if count > kind.max_slots() {
                return Err(CueError::InvalidSlotCount {
                    kind,
                    count,
                    max: kind.max_slots(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    pub ring_depth: u32,
    pub slot_counts: SlotCounts,
    pub unbound_policy: UnboundPolicy,
    pub inline_user_data_dwords: u32,
    /// Largest extended block a shader may declare, in dwords.
    pub max_extended_dwords: u32,
    /// Kinds a shader may address through a single table pointer (and so get a ring).
    pub ring_kinds: ResourceKindFlags,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ring_depth: DEFAULT_RING_DEPTH,
            slot_counts: SlotCounts::default(),
            unbound_policy: UnboundPolicy::default(),
            inline_user_data_dwords: DEFAULT_INLINE_USER_DATA_DWORDS,
            max_extended_dwords: DEFAULT_MAX_EXTENDED_DWORDS,
            ring_kinds: ResourceKindFlags::all(),
        }
    }
}

impl EngineConfig {
    /// Defaults plus overrides from `CUE_STRICT_UNBOUND` and `CUE_RING_DEPTH`.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if lookup("CUE_STRICT_UNBOUND").is_some_and(|v| truthy(&v)) {
            self.unbound_policy = UnboundPolicy::Strict;
        }
        if let Some(depth) = lookup("CUE_RING_DEPTH").and_then(|v| v.trim().parse::<u32>().ok()) {
            self.ring_depth = depth;
        }
        self
    }

    pub fn validate(&self) -> Result<(), CueError> {
        if self.ring_depth < MIN_RING_DEPTH {
            return Err(CueError::InvalidRingDepth(self.ring_depth));
        }
        let inline = self.inline_user_data_dwords;
        if !(MIN_INLINE_USER_DATA_DWORDS..=MAX_INLINE_USER_DATA_DWORDS).contains(&inline) {
            return Err(CueError::InvalidInlineUserData {
                dwords: inline,
                min: MIN_INLINE_USER_DATA_DWORDS,
                max: MAX_INLINE_USER_DATA_DWORDS,
            });
        }
        if self.max_extended_dwords > MAX_EXTENDED_DWORDS {
            return Err(CueError::InvalidExtendedLimit {
                dwords: self.max_extended_dwords,
                max: MAX_EXTENDED_DWORDS,
            });
        }
        self.slot_counts.validate()
    }
}

fn truthy(raw: &str) -> bool {
    let v = raw.trim();
    v == "1"
        || v.eq_ignore_ascii_case("true")
        || v.eq_ignore_ascii_case("yes")
        || v.eq_ignore_ascii_case("on")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = EngineConfig::default();
        assert_eq!(config.unbound_policy, UnboundPolicy::ZeroFill);
        assert_eq!(config.slot_counts.get(ResourceKind::Resource), 128);
        config.validate().unwrap();
    }

    #[test]
    fn shallow_ring_is_rejected() {
        let config = EngineConfig {
            ring_depth: 3,
            ..EngineConfig::default()
        };
        assert_eq!(config.validate(), Err(CueError::InvalidRingDepth(3)));
    }

    #[test]
    fn oversized_slot_count_is_rejected() {
        let counts = SlotCounts::max().with(ResourceKind::Sampler, 17);
        assert!(matches!(
            counts.validate(),
            Err(CueError::InvalidSlotCount {
                kind: ResourceKind::Sampler,
                count: 17,
                max: 16
            })
        ));
    }

    #[test]
    fn user_data_budgets_are_bounded() {
        for dwords in [0, 1, MAX_INLINE_USER_DATA_DWORDS + 1] {
            let config = EngineConfig {
                inline_user_data_dwords: dwords,
                ..EngineConfig::default()
            };
            assert!(
                matches!(config.validate(), Err(CueError::InvalidInlineUserData { .. })),
                "{dwords}"
            );
        }
        let config = EngineConfig {
            max_extended_dwords: MAX_EXTENDED_DWORDS + 1,
            ..EngineConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(CueError::InvalidExtendedLimit {
                dwords: MAX_EXTENDED_DWORDS + 1,
                max: MAX_EXTENDED_DWORDS
            })
        );
    }

    #[test]
    fn env_overrides_apply() {
        let config = EngineConfig::default().with_overrides(|name| match name {
            "CUE_STRICT_UNBOUND" => Some(" Yes ".to_string()),
            "CUE_RING_DEPTH" => Some("8".to_string()),
            _ => None,
        });
        assert_eq!(config.unbound_policy, UnboundPolicy::Strict);
        assert_eq!(config.ring_depth, 8);

        let untouched = EngineConfig::default().with_overrides(|name| match name {
            "CUE_STRICT_UNBOUND" => Some("0".to_string()),
            "CUE_RING_DEPTH" => Some("lots".to_string()),
            _ => None,
        });
        assert_eq!(untouched, EngineConfig::default());
    }
}
