//! Lock-free per-cell dispatch cache.
//!
//! Each dispatch cell owns one `DispatchCache`: a list of `(type, target)`
//! pairs for the receiver types seen at that call site.
//!
//! # Snapshot Publication
//!
//! ```text
//!            ArcSwap
//!  cache ──▶ ┌──────────────────────────┐
//!            │ [(A, 0x1000), (B, 0x2000)]│  ◀── readers load one snapshot
//!            └──────────────────────────┘
//!                  │ insert(C, 0x3000)
//!                  ▼  copy + append, CAS publish (retry on race)
//!            ┌──────────────────────────────────────┐
//!            │ [(A, 0x1000), (B, 0x2000), (C, 0x3000)]│
//!            └──────────────────────────────────────┘
//! ```
//!
//! Readers never block and always see a complete snapshot. Writers never
//! lose each other's entries: a publish that races with another is
//! recomputed from the newer snapshot. Entries are never invalidated; a
//! type's implementation of a call site never changes.
//!
//! # Eviction
//!
//! At `max_entries` the oldest entry is dropped. A miss only costs a
//! re-resolution, and the newest entry is always present.

use arc_swap::ArcSwap;
use keel_runtime::{CodePointer, TypeRef};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cache sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum entries per cell before the oldest is evicted.
    ///
    /// Default: 64
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_entries: 64 }
    }
}

/// One resolved mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEntry {
    /// Receiver type.
    pub instance_type: TypeRef,
    /// Resolved code address.
    pub target: CodePointer,
}

/// Immutable cache contents, oldest first.
#[derive(Debug, Default)]
struct CacheSnapshot {
    entries: Box<[CacheEntry]>,
}

impl CacheSnapshot {
    #[inline(always)]
    fn find(&self, instance_type: TypeRef) -> Option<CodePointer> {
        self.entries
            .iter()
            .rev()
            .find(|entry| entry.instance_type == instance_type)
            .map(|entry| entry.target)
    }

    /// Copy of `self` with `(instance_type, target)` installed.
    fn with_entry(&self, instance_type: TypeRef, target: CodePointer, max_entries: usize) -> Self {
        let entry = CacheEntry {
            instance_type,
            target,
        };

        if let Some(index) = self
            .entries
            .iter()
            .position(|e| e.instance_type == instance_type)
        {
            let mut entries = self.entries.to_vec();
            entries[index] = entry;
            return Self {
                entries: entries.into_boxed_slice(),
            };
        }

        let keep_from = (self.entries.len() + 1).saturating_sub(max_entries);
        let mut entries = Vec::with_capacity(self.entries.len() + 1 - keep_from);
        entries.extend_from_slice(&self.entries[keep_from..]);
        entries.push(entry);
        Self {
            entries: entries.into_boxed_slice(),
        }
    }
}

/// Per-call-site cache of resolved targets.
#[derive(Debug)]
pub struct DispatchCache {
    snapshot: ArcSwap<CacheSnapshot>,
    max_entries: usize,
    publishes: AtomicU64,
}

impl DispatchCache {
    /// Create an empty cache.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(CacheSnapshot::default()),
            max_entries: config.max_entries.max(1),
            publishes: AtomicU64::new(0),
        }
    }

    /// Look up the target cached for `instance_type`.
    ///
    /// Safe against concurrent inserts; an in-flight insert may be missed.
    #[inline]
    pub fn search(&self, instance_type: TypeRef) -> Option<CodePointer> {
        self.snapshot.load().find(instance_type)
    }

    /// Install `target` for `instance_type` and return `target`.
    ///
    /// Inserting a mapping that is already present publishes nothing.
    pub fn insert(&self, instance_type: TypeRef, target: CodePointer) -> CodePointer {
        if self.search(instance_type) == Some(target) {
            return target;
        }

        let max_entries = self.max_entries;
        self.snapshot.rcu(|current| {
            Arc::new(current.with_entry(instance_type, target, max_entries))
        });
        self.publishes.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            instance_type = ?instance_type,
            %target,
            entries = self.len(),
            "dispatch cache entry published"
        );
        target
    }

    /// Number of cached entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.snapshot.load().entries.len()
    }

    /// Check if nothing is cached.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current entries, oldest first.
    pub fn entries(&self) -> Vec<CacheEntry> {
        self.snapshot.load().entries.to_vec()
    }

    /// Maximum entries before eviction.
    #[inline]
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Number of snapshots published.
    pub fn publish_count(&self) -> u64 {
        self.publishes.load(Ordering::Relaxed)
    }
}

impl Default for DispatchCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_runtime::MethodTableBuilder;

    fn code(raw: usize) -> CodePointer {
        CodePointer::aligned(raw).unwrap()
    }

    #[test]
    fn test_miss_on_empty() {
        let cache = DispatchCache::default();
        let ty = MethodTableBuilder::new("Empty").build();
        assert!(cache.is_empty());
        assert_eq!(cache.search(ty), None);
    }

    #[test]
    fn test_hit_after_insert() {
        let cache = DispatchCache::default();
        let ty = MethodTableBuilder::new("Hit").build();

        assert_eq!(cache.insert(ty, code(0x1000)), code(0x1000));
        assert_eq!(cache.search(ty), Some(code(0x1000)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_identity_not_name() {
        let cache = DispatchCache::default();
        let a = MethodTableBuilder::new("Twin").build();
        let b = MethodTableBuilder::new("Twin").build();

        cache.insert(a, code(0x1000));
        assert_eq!(cache.search(b), None);
    }

    #[test]
    fn test_duplicate_insert_is_idempotent() {
        let cache = DispatchCache::default();
        let ty = MethodTableBuilder::new("Dup").build();

        cache.insert(ty, code(0x1000));
        cache.insert(ty, code(0x1000));
        cache.insert(ty, code(0x1000));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.publish_count(), 1);
    }

    #[test]
    fn test_insert_replaces_existing_type() {
        let cache = DispatchCache::default();
        let ty = MethodTableBuilder::new("Replace").build();

        cache.insert(ty, code(0x1000));
        cache.insert(ty, code(0x2000));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.search(ty), Some(code(0x2000)));
    }

    #[test]
    fn test_oldest_entry_evicted_at_capacity() {
        let cache = DispatchCache::new(CacheConfig { max_entries: 2 });
        let a = MethodTableBuilder::new("A").build();
        let b = MethodTableBuilder::new("B").build();
        let c = MethodTableBuilder::new("C").build();

        cache.insert(a, code(0x1000));
        cache.insert(b, code(0x2000));
        cache.insert(c, code(0x3000));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.search(a), None);
        assert_eq!(cache.search(b), Some(code(0x2000)));
        assert_eq!(cache.search(c), Some(code(0x3000)));
    }

    #[test]
    fn test_zero_capacity_still_keeps_newest() {
        let cache = DispatchCache::new(CacheConfig { max_entries: 0 });
        let a = MethodTableBuilder::new("A0").build();
        let b = MethodTableBuilder::new("B0").build();

        cache.insert(a, code(0x1000));
        cache.insert(b, code(0x2000));

        assert_eq!(cache.max_entries(), 1);
        assert_eq!(cache.search(b), Some(code(0x2000)));
        assert_eq!(cache.search(a), None);
    }

    #[test]
    fn test_entries_oldest_first() {
        let cache = DispatchCache::default();
        let a = MethodTableBuilder::new("First").build();
        let b = MethodTableBuilder::new("Second").build();

        cache.insert(a, code(0x1000));
        cache.insert(b, code(0x2000));

        let entries = cache.entries();
        assert_eq!(entries[0].instance_type, a);
        assert_eq!(entries[1].instance_type, b);
    }

    #[test]
    fn test_concurrent_distinct_types_no_lost_updates() {
        use std::sync::Arc;
        use std::thread;

        let cache = Arc::new(DispatchCache::default());
        let types: Vec<_> = (0..16)
            .map(|i| MethodTableBuilder::new(format!("T{}", i)).build())
            .collect();

        let handles: Vec<_> = types
            .iter()
            .enumerate()
            .map(|(i, &ty)| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    cache.insert(ty, code(0x1000 + i * 0x10));
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(cache.len(), 16);
        for (i, &ty) in types.iter().enumerate() {
            assert_eq!(cache.search(ty), Some(code(0x1000 + i * 0x10)));
        }
    }
}
