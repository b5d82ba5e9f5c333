//! Code pointers produced by dispatch resolution.
//!
//! A `CodePointer` is never zero. The zero address is the internal
//! "not found" sentinel and has no `CodePointer` representation, so it
//! cannot escape resolution by construction.
//!
//! # Flag Bits
//!
//! ```text
//!  63                                      2   1   0
//! ┌──────────────────────────────────────────┬───┬───┐
//! │             code address                 │ T │ 0 │
//! └──────────────────────────────────────────┴───┴───┘
//!   T = requires instantiating thunk
//! ```
//!
//! Code addresses are 4-byte aligned, which leaves the low two bits free
//! for dispatch map flags.

use std::fmt;
use std::num::NonZeroUsize;

/// Non-null address of executable code, possibly carrying dispatch flags.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct CodePointer(NonZeroUsize);

impl CodePointer {
    /// Target needs an extra hidden generic-context argument.
    pub const REQUIRES_INSTANTIATING_THUNK: usize = 0x2;

    /// All bits reserved for flags.
    pub const FLAG_MASK: usize = 0x3;

    /// Wrap a raw address. Returns `None` for zero.
    #[inline]
    pub const fn new(raw: usize) -> Option<Self> {
        match NonZeroUsize::new(raw) {
            Some(nz) => Some(Self(nz)),
            None => None,
        }
    }

    /// Wrap a raw address that must be usable as a flag carrier.
    ///
    /// Returns `None` for zero or for addresses with flag bits set.
    #[inline]
    pub const fn aligned(raw: usize) -> Option<Self> {
        if raw & Self::FLAG_MASK != 0 {
            return None;
        }
        Self::new(raw)
    }

    /// Raw address bits, flags included.
    #[inline(always)]
    pub const fn raw(self) -> usize {
        self.0.get()
    }

    /// Whether the instantiating thunk flag is set.
    #[inline(always)]
    pub const fn requires_instantiating_thunk(self) -> bool {
        self.raw() & Self::REQUIRES_INSTANTIATING_THUNK != 0
    }

    /// Set the instantiating thunk flag.
    #[inline]
    pub const fn with_instantiating_thunk(self) -> Self {
        match NonZeroUsize::new(self.raw() | Self::REQUIRES_INSTANTIATING_THUNK) {
            Some(nz) => Self(nz),
            None => self,
        }
    }

    /// Strip all flag bits, yielding a jump target.
    ///
    /// Only meaningful for aligned code addresses; an address made of flag
    /// bits alone would strip to zero and is returned unchanged.
    #[inline]
    pub const fn without_flags(self) -> Self {
        match NonZeroUsize::new(self.raw() & !Self::FLAG_MASK) {
            Some(nz) => Self(nz),
            None => self,
        }
    }
}

impl fmt::Debug for CodePointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CodePointer({:#x})", self.raw())
    }
}

impl fmt::Display for CodePointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.raw())
    }
}
