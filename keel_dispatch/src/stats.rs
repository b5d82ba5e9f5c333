//! Dispatch statistics.
//!
//! Relaxed atomic counters shared by every thread using a dispatcher.
//! Counts are advisory; they never influence resolution.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters.
#[derive(Debug, Default)]
pub struct DispatchStats {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    resolutions: AtomicU64,
    vtable_dispatches: AtomicU64,
    dynamic_castable_fallbacks: AtomicU64,
    metadata_conversions: AtomicU64,
    metadata_resolutions: AtomicU64,
    null_receivers: AtomicU64,
}

/// Point-in-time copy of [`DispatchStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStatsSnapshot {
    /// Lookups answered by a cell cache.
    pub cache_hits: u64,
    /// Cell cache lookups that fell through to resolution.
    pub cache_misses: u64,
    /// Full resolutions performed.
    pub resolutions: u64,
    /// Dispatches through a vtable offset.
    pub vtable_dispatches: u64,
    /// Resolutions satisfied by the dynamic castable protocol.
    pub dynamic_castable_fallbacks: u64,
    /// Metadata token cells converted to a resolved form.
    pub metadata_conversions: u64,
    /// Resolutions performed by the type loader from a token.
    pub metadata_resolutions: u64,
    /// Calls that observed a null receiver.
    pub null_receivers: u64,
}

macro_rules! counter {
    ($record:ident, $field:ident) => {
        #[inline(always)]
        pub fn $record(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl DispatchStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    counter!(record_cache_hit, cache_hits);
    counter!(record_cache_miss, cache_misses);
    counter!(record_resolution, resolutions);
    counter!(record_vtable_dispatch, vtable_dispatches);
    counter!(record_dynamic_castable_fallback, dynamic_castable_fallbacks);
    counter!(record_metadata_conversion, metadata_conversions);
    counter!(record_metadata_resolution, metadata_resolutions);
    counter!(record_null_receiver, null_receivers);

    /// Copy all counters.
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            resolutions: self.resolutions.load(Ordering::Relaxed),
            vtable_dispatches: self.vtable_dispatches.load(Ordering::Relaxed),
            dynamic_castable_fallbacks: self.dynamic_castable_fallbacks.load(Ordering::Relaxed),
            metadata_conversions: self.metadata_conversions.load(Ordering::Relaxed),
            metadata_resolutions: self.metadata_resolutions.load(Ordering::Relaxed),
            null_receivers: self.null_receivers.load(Ordering::Relaxed),
        }
    }

    /// Cache hit rate as a percentage. Returns 0.0 before any lookup.
    pub fn hit_rate(&self) -> f64 {
        self.snapshot().hit_rate()
    }
}

impl DispatchStatsSnapshot {
    /// Cache hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            (self.cache_hits as f64 / total as f64) * 100.0
        }
    }
}
