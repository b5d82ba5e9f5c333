//! Process-wide type table.
//!
//! Every `MethodTableBuilder::build` lands here: the builder draws a
//! `TypeId` and the finished descriptor is published under it. Metadata
//! tokens name types by id, so token-based dispatch resolves through this
//! table.
//!
//! ```text
//!  build() ──allocate_type_id──▶ TypeId(n) ──publish──▶ { n → &MethodTable }
//!                                                             ▲
//!  metadata token ─▶ TypeId(n) ─────────resolve────────────────┘
//! ```

use crate::method_table::{TypeId, TypeRef};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU32, Ordering};

/// Id-indexed table of published type descriptors.
#[derive(Debug)]
pub struct TypeRegistry {
    published: RwLock<FxHashMap<TypeId, TypeRef>>,
    next_id: AtomicU32,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self {
            published: RwLock::new(FxHashMap::default()),
            next_id: AtomicU32::new(TypeId::FIRST),
        }
    }

    /// Draw an id that no other descriptor in this table will receive.
    #[inline]
    pub fn allocate_type_id(&self) -> TypeId {
        TypeId::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Publish `type_ref` under its own id.
    ///
    /// Ids are never reused; publishing twice keeps the first descriptor.
    pub fn publish(&self, type_ref: TypeRef) -> TypeRef {
        *self
            .published
            .write()
            .entry(type_ref.id())
            .or_insert(type_ref)
    }

    /// Descriptor published under `type_id`.
    #[inline]
    pub fn resolve(&self, type_id: TypeId) -> Option<TypeRef> {
        self.published.read().get(&type_id).copied()
    }

    /// Number of published descriptors.
    pub fn len(&self) -> usize {
        self.published.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.published.read().is_empty()
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static TYPES: OnceLock<TypeRegistry> = OnceLock::new();

/// The table every built type is published to.
#[inline]
pub fn type_registry() -> &'static TypeRegistry {
    TYPES.get_or_init(TypeRegistry::new)
}
