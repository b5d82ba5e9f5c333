//! Runtime type descriptors.
//!
//! Every object points at a `MethodTable` describing its type. The table
//! carries what dispatch needs and nothing more:
//!
//! ```text
//! MethodTable
//! ├── id: TypeId (4 bytes)
//! ├── flags: TypeFlags (4 bytes)
//! ├── parent: Option<TypeRef>
//! ├── interfaces: SmallVec<TypeRef; 4>
//! ├── vtable: [code word]       byte offset VTABLE_OFFSET + i * POINTER_SIZE
//! └── dispatch map: (interface, slot, static) → DispatchMapEntry
//! ```
//!
//! Type descriptors live for the whole process. `TypeRef` is a `Copy`
//! handle compared by pointer identity, never structurally.

use crate::code::CodePointer;
use crate::registry::type_registry;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::ptr;

/// Size in bytes of one vtable word.
pub const POINTER_SIZE: u32 = std::mem::size_of::<usize>() as u32;

// =============================================================================
// Type Identity
// =============================================================================

/// Numeric identifier assigned to each registered type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct TypeId(u32);

impl TypeId {
    /// Never assigned to a type.
    pub const INVALID: TypeId = TypeId(0);
    /// First id handed out by a registry.
    pub const FIRST: u32 = 1;

    /// Create from a raw id.
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw id value.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

bitflags::bitflags! {
    /// Type-level capabilities consulted by dispatch.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TypeFlags: u32 {
        /// Type is an interface.
        const INTERFACE = 1 << 0;
        /// Instances supply their own interface resolution at runtime.
        const DYNAMIC_INTERFACE_CASTABLE = 1 << 1;
        /// Interface may be returned as a dynamic castable implementation.
        const DYNAMIC_CASTABLE_IMPLEMENTATION = 1 << 2;
    }
}

impl Default for TypeFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// Handle to a process-lifetime type descriptor.
///
/// Equality and hashing use the descriptor's address.
#[derive(Clone, Copy)]
pub struct TypeRef(&'static MethodTable);

impl TypeRef {
    /// Wrap a leaked descriptor.
    #[inline]
    pub const fn new(table: &'static MethodTable) -> Self {
        Self(table)
    }

    /// Borrow the descriptor.
    #[inline(always)]
    pub fn method_table(self) -> &'static MethodTable {
        self.0
    }

    /// Descriptor address, the identity used by dispatch caches.
    #[inline(always)]
    pub fn addr(self) -> usize {
        self.0 as *const MethodTable as usize
    }
}

impl Deref for TypeRef {
    type Target = MethodTable;

    #[inline(always)]
    fn deref(&self) -> &MethodTable {
        self.0
    }
}

impl PartialEq for TypeRef {
    #[inline(always)]
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self.0, other.0)
    }
}

impl Eq for TypeRef {}

impl Hash for TypeRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.0.name, self.0.id.raw())
    }
}

// =============================================================================
// Dispatch Map
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct DispatchMapKey {
    interface: TypeId,
    slot: u16,
    is_static: bool,
}

/// One interface slot implementation recorded on a type.
#[derive(Debug, Clone, Copy)]
pub struct DispatchMapEntry {
    /// Implementation code address (unflagged).
    pub code: CodePointer,
    /// Target needs a hidden generic-context argument.
    pub requires_instantiating_thunk: bool,
    /// Explicit generic context; defaults to the supplying type.
    pub generic_context: Option<TypeRef>,
}

impl DispatchMapEntry {
    /// Plain, non-generic implementation.
    #[inline]
    pub fn simple(code: CodePointer) -> Self {
        Self {
            code,
            requires_instantiating_thunk: false,
            generic_context: None,
        }
    }

    /// Shared generic implementation needing an instantiating thunk.
    #[inline]
    pub fn generic(code: CodePointer, generic_context: Option<TypeRef>) -> Self {
        Self {
            code,
            requires_instantiating_thunk: true,
            generic_context,
        }
    }
}

// =============================================================================
// Method Table
// =============================================================================

/// Runtime type descriptor.
pub struct MethodTable {
    id: TypeId,
    name: Box<str>,
    flags: TypeFlags,
    parent: Option<TypeRef>,
    interfaces: SmallVec<[TypeRef; 4]>,
    vtable: Box<[usize]>,
    dispatch_map: FxHashMap<DispatchMapKey, DispatchMapEntry>,
}

impl MethodTable {
    /// Byte offset of the first vtable word.
    ///
    /// Mirrors a header of id + flags (8 bytes), parent pointer and
    /// interface map pointer.
    pub const VTABLE_OFFSET: u32 = 8 + 2 * POINTER_SIZE;

    /// Type id.
    #[inline]
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Type name (diagnostics only).
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type flags.
    #[inline]
    pub fn flags(&self) -> TypeFlags {
        self.flags
    }

    /// Check if this type is an interface.
    #[inline]
    pub fn is_interface(&self) -> bool {
        self.flags.contains(TypeFlags::INTERFACE)
    }

    /// Check if instances of this type resolve interfaces dynamically.
    #[inline(always)]
    pub fn is_dynamic_interface_castable(&self) -> bool {
        self.flags.contains(TypeFlags::DYNAMIC_INTERFACE_CASTABLE)
    }

    /// Check if this interface may serve as a dynamic castable implementation.
    #[inline]
    pub fn is_dynamic_castable_implementation(&self) -> bool {
        self.flags
            .contains(TypeFlags::INTERFACE | TypeFlags::DYNAMIC_CASTABLE_IMPLEMENTATION)
    }

    /// Base type, if any.
    #[inline]
    pub fn parent(&self) -> Option<TypeRef> {
        self.parent
    }

    /// Interfaces declared directly on this type.
    #[inline]
    pub fn interfaces(&self) -> &[TypeRef] {
        &self.interfaces
    }

    /// Check if this type or any ancestor declares `interface`.
    pub fn declares_interface(&self, interface: TypeRef) -> bool {
        if self.interfaces.contains(&interface) {
            return true;
        }
        let mut current = self.parent;
        while let Some(ty) = current {
            if ty.interfaces.contains(&interface) {
                return true;
            }
            current = ty.parent;
        }
        false
    }

    /// Number of vtable words.
    #[inline]
    pub fn vtable_len(&self) -> usize {
        self.vtable.len()
    }

    /// Byte offset of vtable slot `index`, as embedded in compiled cells.
    #[inline]
    pub const fn vtable_offset_of(index: u16) -> u32 {
        Self::VTABLE_OFFSET + index as u32 * POINTER_SIZE
    }

    /// Load the code word stored at byte `offset` of this table.
    ///
    /// Returns `None` when the offset does not address a populated vtable
    /// word (before the vtable, misaligned, past the end, or empty).
    #[inline]
    pub fn load_vtable_slot_at_offset(&self, offset: u32) -> Option<CodePointer> {
        let relative = offset.checked_sub(Self::VTABLE_OFFSET)?;
        if relative % POINTER_SIZE != 0 {
            return None;
        }
        let index = (relative / POINTER_SIZE) as usize;
        CodePointer::new(*self.vtable.get(index)?)
    }

    /// Find the entry this type records for `(interface, slot)`.
    #[inline]
    pub fn dispatch_map_entry(
        &self,
        interface: TypeRef,
        slot: u16,
        is_static: bool,
    ) -> Option<&DispatchMapEntry> {
        self.dispatch_map.get(&DispatchMapKey {
            interface: interface.id,
            slot,
            is_static,
        })
    }

    /// Default implementation an interface provides for one of its own slots.
    #[inline]
    pub fn default_implementation(&self, slot: u16, is_static: bool) -> Option<&DispatchMapEntry> {
        if !self.is_interface() {
            return None;
        }
        self.dispatch_map.get(&DispatchMapKey {
            interface: self.id,
            slot,
            is_static,
        })
    }

    /// Number of dispatch map entries.
    #[inline]
    pub fn dispatch_map_len(&self) -> usize {
        self.dispatch_map.len()
    }
}

impl fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodTable")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("flags", &self.flags)
            .field("parent", &self.parent)
            .field("interfaces", &self.interfaces)
            .field("vtable_len", &self.vtable.len())
            .field("dispatch_map_len", &self.dispatch_map.len())
            .finish()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Fluent construction of process-lifetime method tables.
///
/// # Example
///
/// ```ignore
/// let iface = MethodTableBuilder::interface("IShape").build();
/// let circle = MethodTableBuilder::new("Circle")
///     .implement(iface, 0, code(0x1000))
///     .build();
/// ```
#[derive(Debug)]
pub struct MethodTableBuilder {
    name: String,
    flags: TypeFlags,
    parent: Option<TypeRef>,
    interfaces: SmallVec<[TypeRef; 4]>,
    vtable: Vec<usize>,
    entries: Vec<(TypeRef, u16, bool, DispatchMapEntry)>,
    defaults: Vec<(u16, bool, DispatchMapEntry)>,
}

impl MethodTableBuilder {
    /// Start a class type.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flags: TypeFlags::empty(),
            parent: None,
            interfaces: SmallVec::new(),
            vtable: Vec::new(),
            entries: Vec::new(),
            defaults: Vec::new(),
        }
    }

    /// Start an interface type.
    pub fn interface(name: impl Into<String>) -> Self {
        Self::new(name).flags(TypeFlags::INTERFACE)
    }

    /// Add type flags.
    pub fn flags(mut self, flags: TypeFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Set the base type. The parent's vtable becomes this type's prefix.
    pub fn parent(mut self, parent: TypeRef) -> Self {
        self.parent = Some(parent);
        self.vtable = parent.vtable.to_vec();
        self
    }

    /// Declare an implemented interface.
    pub fn implements(mut self, interface: TypeRef) -> Self {
        if !self.interfaces.contains(&interface) {
            self.interfaces.push(interface);
        }
        self
    }

    /// Append a vtable word. A `None` leaves the slot empty.
    pub fn vtable_slot(mut self, code: Option<CodePointer>) -> Self {
        self.vtable.push(code.map_or(0, CodePointer::raw));
        self
    }

    /// Replace an inherited vtable word.
    pub fn override_vtable_slot(mut self, index: usize, code: CodePointer) -> Self {
        if index >= self.vtable.len() {
            self.vtable.resize(index + 1, 0);
        }
        self.vtable[index] = code.raw();
        self
    }

    /// Implement an instance slot of `interface`.
    pub fn implement(self, interface: TypeRef, slot: u16, code: CodePointer) -> Self {
        self.entry(interface, slot, false, DispatchMapEntry::simple(code))
    }

    /// Implement a static virtual slot of `interface`.
    pub fn implement_static(self, interface: TypeRef, slot: u16, code: CodePointer) -> Self {
        self.entry(interface, slot, true, DispatchMapEntry::simple(code))
    }

    /// Implement a slot with shared generic code needing an instantiating thunk.
    pub fn implement_generic(
        self,
        interface: TypeRef,
        slot: u16,
        code: CodePointer,
        generic_context: Option<TypeRef>,
        is_static: bool,
    ) -> Self {
        self.entry(
            interface,
            slot,
            is_static,
            DispatchMapEntry::generic(code, generic_context),
        )
    }

    /// Record an arbitrary dispatch map entry.
    pub fn entry(
        mut self,
        interface: TypeRef,
        slot: u16,
        is_static: bool,
        entry: DispatchMapEntry,
    ) -> Self {
        self = self.implements(interface);
        self.entries.push((interface, slot, is_static, entry));
        self
    }

    /// Provide a default implementation for one of this interface's slots.
    pub fn default_implementation(mut self, slot: u16, entry: DispatchMapEntry) -> Self {
        self.defaults.push((slot, false, entry));
        self
    }

    /// Leak the table, assign its id and publish it to the type registry.
    pub fn build(self) -> TypeRef {
        let registry = type_registry();
        let id = registry.allocate_type_id();

        let mut dispatch_map = FxHashMap::with_capacity_and_hasher(
            self.entries.len() + self.defaults.len(),
            Default::default(),
        );
        for (interface, slot, is_static, entry) in self.entries {
            dispatch_map.insert(
                DispatchMapKey {
                    interface: interface.id,
                    slot,
                    is_static,
                },
                entry,
            );
        }
        for (slot, is_static, entry) in self.defaults {
            dispatch_map.insert(
                DispatchMapKey {
                    interface: id,
                    slot,
                    is_static,
                },
                entry,
            );
        }

        let table: &'static MethodTable = Box::leak(Box::new(MethodTable {
            id,
            name: self.name.into_boxed_str(),
            flags: self.flags,
            parent: self.parent,
            interfaces: self.interfaces,
            vtable: self.vtable.into_boxed_slice(),
            dispatch_map,
        }));
        registry.publish(TypeRef::new(table))
    }
}
