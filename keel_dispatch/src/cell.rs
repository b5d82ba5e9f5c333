//! Dispatch cells: per-call-site dispatch state.
//!
//! A cell records *what* a call site dispatches on and caches *where* each
//! receiver type ended up.
//!
//! # Cell Kinds
//!
//! ```text
//!  InterfaceAndSlot { interface, slot }   interface lookup, cached
//!  VTableOffset { offset }                fixed vtable word, never cached
//!  MetadataToken { token, has_cache }     converted once, then one of the above
//! ```
//!
//! # Promotion
//!
//! A metadata token cell is converted at most once into a
//! [`ResolvedCellInfo`]. The promoted form has no metadata variant, so a
//! promoted cell cannot revert. Promotion is published with an atomic
//! swap; racing threads compute the same conversion and the first publish
//! wins.

use crate::cache::{CacheConfig, DispatchCache};
use arc_swap::ArcSwapOption;
use keel_runtime::{CodePointer, TypeRef};
use std::sync::Arc;

// =============================================================================
// Cell Info
// =============================================================================

/// Discriminant of [`DispatchCellInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DispatchCellType {
    /// Interface type and slot.
    InterfaceAndSlot = 0,
    /// Deferred metadata token.
    MetadataToken = 1,
    /// Byte offset into the receiver's method table.
    VTableOffset = 2,
}

/// What a call site dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchCellInfo {
    /// Classic interface dispatch.
    InterfaceAndSlot { interface_type: TypeRef, slot: u16 },
    /// Direct vtable-relative dispatch.
    VTableOffset { offset: u32 },
    /// Deferred resolution through the metadata subsystem.
    MetadataToken { token: u32, has_cache: bool },
}

impl DispatchCellInfo {
    /// Discriminant of this info.
    #[inline]
    pub fn cell_type(&self) -> DispatchCellType {
        match self {
            DispatchCellInfo::InterfaceAndSlot { .. } => DispatchCellType::InterfaceAndSlot,
            DispatchCellInfo::VTableOffset { .. } => DispatchCellType::VTableOffset,
            DispatchCellInfo::MetadataToken { .. } => DispatchCellType::MetadataToken,
        }
    }

    /// The resolved form, if this info is not a metadata token.
    #[inline]
    pub fn resolved(&self) -> Option<ResolvedCellInfo> {
        match *self {
            DispatchCellInfo::InterfaceAndSlot {
                interface_type,
                slot,
            } => Some(ResolvedCellInfo::InterfaceAndSlot {
                interface_type,
                slot,
            }),
            DispatchCellInfo::VTableOffset { offset } => {
                Some(ResolvedCellInfo::VTableOffset { offset })
            }
            DispatchCellInfo::MetadataToken { .. } => None,
        }
    }
}

/// Cell info after metadata conversion. Cannot express a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedCellInfo {
    /// Interface type and slot.
    InterfaceAndSlot { interface_type: TypeRef, slot: u16 },
    /// Byte offset into the receiver's method table.
    VTableOffset { offset: u32 },
}

impl From<ResolvedCellInfo> for DispatchCellInfo {
    fn from(info: ResolvedCellInfo) -> Self {
        match info {
            ResolvedCellInfo::InterfaceAndSlot {
                interface_type,
                slot,
            } => DispatchCellInfo::InterfaceAndSlot {
                interface_type,
                slot,
            },
            ResolvedCellInfo::VTableOffset { offset } => DispatchCellInfo::VTableOffset { offset },
        }
    }
}

/// Module that owns a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ModuleId(pub u32);

// =============================================================================
// Dispatch Cell
// =============================================================================

/// Per-call-site dispatch state.
///
/// Owned by its call site and shared by every thread executing it.
#[derive(Debug)]
pub struct DispatchCell {
    initial: DispatchCellInfo,
    module: ModuleId,
    promoted: ArcSwapOption<ResolvedCellInfo>,
    cache: DispatchCache,
}

impl DispatchCell {
    /// Create a cell with default cache sizing.
    pub fn new(info: DispatchCellInfo, module: ModuleId) -> Self {
        Self::with_cache_config(info, module, CacheConfig::default())
    }

    /// Create a cell with explicit cache sizing.
    pub fn with_cache_config(
        info: DispatchCellInfo,
        module: ModuleId,
        config: CacheConfig,
    ) -> Self {
        let initial = match info {
            DispatchCellInfo::MetadataToken { token, .. } => DispatchCellInfo::MetadataToken {
                token,
                has_cache: false,
            },
            other => other,
        };
        Self {
            initial,
            module,
            promoted: ArcSwapOption::empty(),
            cache: DispatchCache::new(config),
        }
    }

    /// Interface dispatch cell.
    pub fn interface_and_slot(interface_type: TypeRef, slot: u16) -> Self {
        Self::new(
            DispatchCellInfo::InterfaceAndSlot {
                interface_type,
                slot,
            },
            ModuleId::default(),
        )
    }

    /// Vtable offset cell.
    pub fn vtable_offset(offset: u32) -> Self {
        Self::new(DispatchCellInfo::VTableOffset { offset }, ModuleId::default())
    }

    /// Metadata token cell owned by `module`.
    pub fn metadata_token(module: ModuleId, token: u32) -> Self {
        Self::new(
            DispatchCellInfo::MetadataToken {
                token,
                has_cache: false,
            },
            module,
        )
    }

    /// Current cell info.
    ///
    /// A promoted cell reports its promoted form. An unpromoted token cell
    /// reports `has_cache` from its cache contents.
    #[inline]
    pub fn info(&self) -> DispatchCellInfo {
        if let Some(promoted) = self.promoted.load().as_deref() {
            return (*promoted).into();
        }
        match self.initial {
            DispatchCellInfo::MetadataToken { token, .. } => DispatchCellInfo::MetadataToken {
                token,
                has_cache: !self.cache.is_empty(),
            },
            other => other,
        }
    }

    /// Info the cell was created with.
    #[inline]
    pub fn initial_info(&self) -> DispatchCellInfo {
        self.initial
    }

    /// Owning module.
    #[inline]
    pub fn module(&self) -> ModuleId {
        self.module
    }

    /// Whether a metadata token cell has been promoted.
    #[inline]
    pub fn is_promoted(&self) -> bool {
        self.promoted.load().is_some()
    }

    /// Promote a metadata token cell to `resolved`.
    ///
    /// Returns the info the cell ends up with: `resolved` if this call
    /// published, otherwise the earlier promotion. Cells not created from a
    /// token are never promoted; their own resolved info is returned.
    pub fn promote(&self, resolved: ResolvedCellInfo) -> ResolvedCellInfo {
        if let Some(own) = self.initial.resolved() {
            return own;
        }

        self.promoted.rcu(|current| match current {
            Some(existing) => Some(Arc::clone(existing)),
            None => Some(Arc::new(resolved)),
        });

        match self.promoted.load().as_deref() {
            Some(winner) => {
                if *winner == resolved {
                    tracing::debug!(
                        module = self.module.0,
                        info = ?winner,
                        "dispatch cell promoted"
                    );
                }
                *winner
            }
            None => resolved,
        }
    }

    /// The cell's cache.
    #[inline(always)]
    pub fn cache(&self) -> &DispatchCache {
        &self.cache
    }

    /// Cached target for `instance_type`.
    #[inline(always)]
    pub fn search_cache(&self, instance_type: TypeRef) -> Option<CodePointer> {
        self.cache.search(instance_type)
    }
}
