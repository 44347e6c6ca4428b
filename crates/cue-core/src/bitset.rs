//! Fixed-width slot bitsets.
//!
//! Every per-kind slot range in the engine fits in 128 bits (see [`crate::stage::MAX_SLOTS`]), so
//! masks are stored as a single `u128`. Chunk-local masks are `u16` since a chunk never holds more
//! than 16 slots.

use core::fmt;
use core::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not};

/// Number of bits in a [`SlotMask`].
pub const SLOT_MASK_BITS: u32 = 128;

/// A 128-bit set of slot indices.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SlotMask(u128);

impl SlotMask {
    pub const EMPTY: Self = Self(0);
    pub const FULL: Self = Self(u128::MAX);

    pub const fn from_bits(bits: u128) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u128 {
        self.0
    }

    /// Mask with bits `start..start + count` set.
    ///
    /// Bits past [`SLOT_MASK_BITS`] are dropped.
    pub const fn range(start: u32, count: u32) -> Self {
        if count == 0 || start >= SLOT_MASK_BITS {
            return Self::EMPTY;
        }
        let ones = if count >= SLOT_MASK_BITS {
            u128::MAX
        } else {
            (1u128 << count) - 1
        };
        Self(ones << start)
    }

    pub const fn single(slot: u32) -> Self {
        Self::range(slot, 1)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn test(self, slot: u32) -> bool {
        slot < SLOT_MASK_BITS && (self.0 >> slot) & 1 != 0
    }

    pub fn set(&mut self, slot: u32) {
        *self |= Self::single(slot);
    }

    pub fn clear(&mut self, slot: u32) {
        *self &= !Self::single(slot);
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }

    pub const fn leading_zeros(self) -> u32 {
        self.0.leading_zeros()
    }

    /// Index of the highest set bit, if any.
    pub const fn highest_set(self) -> Option<u32> {
        if self.0 == 0 {
            None
        } else {
            Some(SLOT_MASK_BITS - 1 - self.0.leading_zeros())
        }
    }

    /// Number of slots needed to cover every set bit (`highest_set + 1`).
    pub const fn span(self) -> u32 {
        SLOT_MASK_BITS - self.0.leading_zeros()
    }

    /// Extract the `width`-bit window starting at `start` (used to project a kind-wide mask onto
    /// one chunk).
    pub const fn window(self, start: u32, width: u32) -> u16 {
        if start >= SLOT_MASK_BITS {
            return 0;
        }
        let shifted = self.0 >> start;
        let window = if width >= 16 {
            0xFFFF
        } else {
            (1u128 << width) - 1
        };
        (shifted & window) as u16
    }

    /// Iterate set bit indices in ascending order.
    pub fn iter_ones(self) -> impl Iterator<Item = u32> {
        let mut bits = self.0;
        core::iter::from_fn(move || {
            if bits == 0 {
                return None;
            }
            let idx = bits.trailing_zeros();
            bits &= bits - 1;
            Some(idx)
        })
    }
}

impl BitOr for SlotMask {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for SlotMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for SlotMask {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl BitAndAssign for SlotMask {
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0;
    }
}

impl Not for SlotMask {
    type Output = Self;
    fn not(self) -> Self {
        Self(!self.0)
    }
}

impl fmt::Debug for SlotMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SlotMask(0x{:032x})", self.0)
    }
}

/// Iterate set bit indices of a chunk-local mask.
pub(crate) fn iter_chunk_bits(mask: u16) -> impl Iterator<Item = u32> {
    let mut bits = mask;
    core::iter::from_fn(move || {
        if bits == 0 {
            return None;
        }
        let idx = bits.trailing_zeros();
        bits &= bits - 1;
        Some(idx)
    })
}

/// Chunk-local mask with bits `start..start + count` set (`start + count <= 16`).
pub(crate) const fn chunk_range(start: u32, count: u32) -> u16 {
    if count == 0 {
        return 0;
    }
    let ones = if count >= 16 { 0xFFFF } else { (1u32 << count) - 1 };
    ((ones << start) & 0xFFFF) as u16
}
