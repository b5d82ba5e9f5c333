//! Interface method implementation lookup.
//!
//! Answers "where does `instance_type` implement slot `slot` of
//! `interface_type`?" The answer is a pure function of its inputs: types
//! never change their interface implementations once built, which is what
//! lets dispatch caches keep entries forever.
//!
//! # Search Order
//!
//! ```text
//! instance_type ──▶ parent ──▶ ... ──▶ root        (dispatch map entries)
//!        │
//!        └── none found ──▶ interface default implementation
//! ```

use crate::code::CodePointer;
use crate::method_table::{DispatchMapEntry, TypeRef};
use crate::stubs::InstantiatingStubCache;

bitflags::bitflags! {
    /// Options for an implementation search.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ResolveFlags: u8 {
        /// Search static virtual methods instead of instance methods.
        const STATIC = 1 << 0;
        /// Instance type is a dynamic castable implementation interface.
        const DYNAMIC_INTERFACE_CASTABLE = 1 << 1;
    }
}

/// Raw lookup result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImplementationTarget {
    /// Implementation address; may carry the instantiating thunk flag.
    pub code: CodePointer,
    /// Hidden context argument for shared generic code.
    pub generic_context: Option<TypeRef>,
}

impl ImplementationTarget {
    /// Target with no generic context.
    #[inline]
    pub fn direct(code: CodePointer) -> Self {
        Self {
            code,
            generic_context: None,
        }
    }

    /// Address an instance call site can jump to.
    ///
    /// A flagged target is bound to its generic context through `stubs`.
    /// Returns `None` for a flagged target that carries no context.
    #[inline]
    pub fn callable(self, stubs: &InstantiatingStubCache) -> Option<CodePointer> {
        if !self.code.requires_instantiating_thunk() {
            return Some(self.code);
        }
        self.generic_context
            .map(|context| stubs.get_or_create(self.code.without_flags(), context))
    }
}

/// Capability that maps `(type, interface, slot)` to an implementation.
///
/// `None` means "not found". Implementations must be deterministic.
pub trait ImplementationLookup: Send + Sync {
    /// Find the implementation of `interface_type`'s `slot` on `instance_type`.
    fn find_interface_method_implementation_target(
        &self,
        instance_type: TypeRef,
        interface_type: TypeRef,
        slot: u16,
        flags: ResolveFlags,
    ) -> Option<ImplementationTarget>;
}

/// Lookup over method table dispatch maps.
#[derive(Debug, Clone, Copy, Default)]
pub struct MethodTableLookup;

impl MethodTableLookup {
    /// Create the lookup.
    pub const fn new() -> Self {
        Self
    }

    fn to_target(entry: &DispatchMapEntry, supplier: TypeRef) -> ImplementationTarget {
        if entry.requires_instantiating_thunk {
            ImplementationTarget {
                code: entry.code.with_instantiating_thunk(),
                generic_context: Some(entry.generic_context.unwrap_or(supplier)),
            }
        } else {
            ImplementationTarget::direct(entry.code)
        }
    }
}

impl ImplementationLookup for MethodTableLookup {
    fn find_interface_method_implementation_target(
        &self,
        instance_type: TypeRef,
        interface_type: TypeRef,
        slot: u16,
        flags: ResolveFlags,
    ) -> Option<ImplementationTarget> {
        let is_static = flags.contains(ResolveFlags::STATIC);
        let dynamic = flags.contains(ResolveFlags::DYNAMIC_INTERFACE_CASTABLE);

        // Interfaces only stand in as instances when acting as a dynamic
        // castable implementation.
        if instance_type.is_interface() != dynamic {
            return None;
        }
        if dynamic && !instance_type.is_dynamic_castable_implementation() {
            return None;
        }

        let mut current = Some(instance_type);
        while let Some(ty) = current {
            if let Some(entry) = ty.dispatch_map_entry(interface_type, slot, is_static) {
                return Some(Self::to_target(entry, ty));
            }
            current = ty.parent();
        }

        if dynamic || instance_type.declares_interface(interface_type) {
            if let Some(entry) = interface_type.default_implementation(slot, is_static) {
                return Some(Self::to_target(entry, interface_type));
            }
        }

        None
    }
}
