//! Metadata token dispatch.
//!
//! Call sites compiled before native type information exists carry a
//! metadata token instead of an interface and slot. The type loader owns
//! the module metadata and is the only component able to interpret it.
//!
//! # Registry-Backed Loading
//!
//! ```text
//!  (module, token) ──bindings──▶ InterfaceMethod { TypeId, slot }
//!                                      │ type_registry().resolve
//!                                      ▼
//!                 native layout ──▶ InterfaceAndSlot { TypeRef, slot }   (convert)
//!                 token only    ──▶ ImplementationLookup ─▶ code         (resolve)
//!
//!  (module, token) ──bindings──▶ VirtualMethod { vtable_index }
//!                 native layout ──▶ VTableOffset { offset }              (convert)
//!                 token only    ──▶ vtable word of the instance type     (resolve)
//! ```

use crate::cell::{DispatchCellInfo, ModuleId};
use dashmap::DashMap;
use keel_runtime::{
    CodePointer, ImplementationLookup, InstantiatingStubCache, MethodTable, MethodTableLookup,
    ResolveFlags, TypeId, TypeRef, TypeRegistry, instantiating_stubs, type_registry,
};
use std::fmt;
use std::sync::Arc;

/// Type loading subsystem consulted for metadata token cells.
///
/// A resolver built without a loader treats every metadata token cell as
/// unresolvable and fails fast.
pub trait TypeLoader: Send + Sync {
    /// Convert a token cell into interface-and-slot or vtable-offset form.
    ///
    /// Returns `info` unchanged (still a token) when the metadata cannot be
    /// converted in this configuration.
    fn convert_metadata_token_dispatch(
        &self,
        module: ModuleId,
        info: &DispatchCellInfo,
    ) -> DispatchCellInfo;

    /// Resolve `token` for `instance_type` directly from module metadata.
    fn resolve_metadata_token_dispatch(
        &self,
        module: ModuleId,
        token: u32,
        instance_type: TypeRef,
    ) -> Option<CodePointer>;
}

// =============================================================================
// Token Bindings
// =============================================================================

/// Method a metadata token names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenBinding {
    /// Slot of an interface, named by type id.
    InterfaceMethod { interface: TypeId, slot: u16 },
    /// Virtual method at a vtable index.
    VirtualMethod { vtable_index: u16 },
}

// =============================================================================
// Registry Type Loader
// =============================================================================

/// `TypeLoader` over per-module token bindings and the type registry.
pub struct RegistryTypeLoader {
    registry: &'static TypeRegistry,
    lookup: Arc<dyn ImplementationLookup>,
    stubs: &'static InstantiatingStubCache,
    bindings: DashMap<(ModuleId, u32), TokenBinding>,
    native_layout: bool,
}

impl RegistryTypeLoader {
    /// Loader over the process type registry with native layout available.
    pub fn new() -> Self {
        Self {
            registry: type_registry(),
            lookup: Arc::new(MethodTableLookup::new()),
            stubs: instantiating_stubs(),
            bindings: DashMap::new(),
            native_layout: true,
        }
    }

    /// Never convert: every call resolves by token.
    pub fn without_native_layout(mut self) -> Self {
        self.native_layout = false;
        self
    }

    /// Resolve interface tokens through `lookup`.
    pub fn with_lookup(mut self, lookup: Arc<dyn ImplementationLookup>) -> Self {
        self.lookup = lookup;
        self
    }

    /// Record what `token` names in `module`. A later binding replaces it.
    pub fn bind(&self, module: ModuleId, token: u32, binding: TokenBinding) {
        self.bindings.insert((module, token), binding);
    }

    /// Binding recorded for `token` in `module`.
    #[inline]
    pub fn binding(&self, module: ModuleId, token: u32) -> Option<TokenBinding> {
        self.bindings.get(&(module, token)).map(|entry| *entry)
    }

    /// Number of bound tokens across all modules.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl Default for RegistryTypeLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RegistryTypeLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryTypeLoader")
            .field("bindings", &self.bindings.len())
            .field("native_layout", &self.native_layout)
            .finish()
    }
}

impl TypeLoader for RegistryTypeLoader {
    fn convert_metadata_token_dispatch(
        &self,
        module: ModuleId,
        info: &DispatchCellInfo,
    ) -> DispatchCellInfo {
        let DispatchCellInfo::MetadataToken { token, .. } = *info else {
            return *info;
        };
        if !self.native_layout {
            return *info;
        }

        match self.binding(module, token) {
            Some(TokenBinding::InterfaceMethod { interface, slot }) => {
                match self.registry.resolve(interface) {
                    Some(interface_type) => DispatchCellInfo::InterfaceAndSlot {
                        interface_type,
                        slot,
                    },
                    // Not loaded yet; stay a token.
                    None => *info,
                }
            }
            Some(TokenBinding::VirtualMethod { vtable_index }) => DispatchCellInfo::VTableOffset {
                offset: MethodTable::vtable_offset_of(vtable_index),
            },
            None => *info,
        }
    }

    fn resolve_metadata_token_dispatch(
        &self,
        module: ModuleId,
        token: u32,
        instance_type: TypeRef,
    ) -> Option<CodePointer> {
        match self.binding(module, token)? {
            TokenBinding::InterfaceMethod { interface, slot } => {
                let interface_type = self.registry.resolve(interface)?;
                self.lookup
                    .find_interface_method_implementation_target(
                        instance_type,
                        interface_type,
                        slot,
                        ResolveFlags::empty(),
                    )?
                    .callable(self.stubs)
            }
            TokenBinding::VirtualMethod { vtable_index } => {
                let offset = MethodTable::vtable_offset_of(vtable_index);
                instance_type.load_vtable_slot_at_offset(offset)
            }
        }
    }
}
