//! Instantiating stubs.
//!
//! Shared generic code takes a hidden generic-context argument. A call
//! site dispatching through a dynamic castable object cannot supply it, so
//! the runtime hands out a stub address bound to `(target, context)`.
//! The same pair always yields the same stub, which keeps dispatch
//! results deterministic and safe to cache.

use crate::code::CodePointer;
use crate::method_table::{TypeId, TypeRef};
use dashmap::DashMap;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Base of the synthetic stub address range.
pub const STUB_REGION_BASE: usize = 0x7F00_0000_0000;

/// Distance between consecutive stubs.
pub const STUB_SIZE: usize = 16;

/// Concurrent map of instantiating stubs.
pub struct InstantiatingStubCache {
    by_target: DashMap<(usize, TypeId), CodePointer>,
    by_stub: DashMap<usize, (CodePointer, TypeRef)>,
    next: AtomicUsize,
}

impl InstantiatingStubCache {
    /// Create an empty stub cache.
    pub fn new() -> Self {
        Self {
            by_target: DashMap::new(),
            by_stub: DashMap::new(),
            next: AtomicUsize::new(STUB_REGION_BASE),
        }
    }

    /// Get the stub for `target` bound to `context`, creating it on first use.
    pub fn get_or_create(&self, target: CodePointer, context: TypeRef) -> CodePointer {
        let key = (target.raw(), context.id());
        if let Some(stub) = self.by_target.get(&key) {
            return *stub;
        }

        // The reverse mapping lands while the shard is held, so a stub is
        // resolvable by the time any caller can observe it.
        *self.by_target.entry(key).or_insert_with(|| {
            let raw = self.next.fetch_add(STUB_SIZE, Ordering::Relaxed);
            let stub = match CodePointer::aligned(raw) {
                Some(stub) => stub,
                None => crate::fail_fast(
                    crate::FailFastReason::InternalError,
                    "instantiating stub region exhausted",
                ),
            };
            self.by_stub.insert(stub.raw(), (target, context));
            stub
        })
    }

    /// Target and context bound to `stub`.
    pub fn stub_target(&self, stub: CodePointer) -> Option<(CodePointer, TypeRef)> {
        self.by_stub.get(&stub.raw()).map(|entry| *entry)
    }

    /// Number of stubs created.
    pub fn len(&self) -> usize {
        self.by_target.len()
    }

    /// Check if no stubs exist.
    pub fn is_empty(&self) -> bool {
        self.by_target.is_empty()
    }
}

impl Default for InstantiatingStubCache {
    fn default() -> Self {
        Self::new()
    }
}

static STUBS: OnceLock<InstantiatingStubCache> = OnceLock::new();

/// Process-wide instantiating stub cache.
#[inline]
pub fn instantiating_stubs() -> &'static InstantiatingStubCache {
    STUBS.get_or_init(InstantiatingStubCache::new)
}
