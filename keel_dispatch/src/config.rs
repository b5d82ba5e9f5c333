//! Dispatch configuration.
//!
//! Resolved once when a dispatcher is created; the hot path only reads
//! plain fields.
//!
//! # Environment
//!
//! | Variable                  | Effect                                  |
//! |---------------------------|-----------------------------------------|
//! | `KEEL_DISPATCH_CACHE_MAX` | Per-cell cache capacity                 |
//! | `KEEL_DISPATCH_STATS`     | Enable statistics counters              |
//! | `KEEL_DISPATCH_TRACE`     | Trace every cache hit and miss          |
//! | `KEEL_IGNORE_ENVIRONMENT` | Skip all of the above                   |

use crate::cache::CacheConfig;

/// Configuration for an [`crate::InterfaceDispatcher`].
///
/// # Example
///
/// ```ignore
/// use keel_dispatch::{CacheConfig, DispatchConfig};
///
/// let config = DispatchConfig {
///     cache: CacheConfig { max_entries: 8 },
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Cache sizing for cells created by the dispatcher.
    pub cache: CacheConfig,

    /// Count hits, misses and resolutions.
    ///
    /// Default: true
    pub collect_stats: bool,

    /// Emit a `trace` event for every cache lookup.
    ///
    /// Default: false
    pub trace_resolutions: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            collect_stats: true,
            trace_resolutions: false,
        }
    }
}

impl DispatchConfig {
    /// Small caches and full diagnostics.
    pub fn for_testing() -> Self {
        Self {
            cache: CacheConfig { max_entries: 4 },
            collect_stats: true,
            trace_resolutions: true,
        }
    }

    /// Defaults overridden by `KEEL_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_vars(|var| std::env::var(var).ok())
    }

    /// Defaults overridden by the `KEEL_*` variables `lookup` returns.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let flag = |var: &str| lookup(var).is_some_and(|val| Self::truthy(&val));
        if flag("KEEL_IGNORE_ENVIRONMENT") {
            return config;
        }

        let cache_max = lookup("KEEL_DISPATCH_CACHE_MAX");
        if let Some(max) = cache_max.as_deref().and_then(Self::parse_usize) {
            config.cache.max_entries = max.max(1);
        }
        if let Some(val) = lookup("KEEL_DISPATCH_STATS") {
            config.collect_stats = Self::truthy(&val);
        }
        config.trace_resolutions = flag("KEEL_DISPATCH_TRACE");
        config
    }

    /// Non-empty and not `0`.
    #[inline]
    fn truthy(val: &str) -> bool {
        !val.is_empty() && val != "0"
    }

    fn parse_usize(val: &str) -> Option<usize> {
        val.trim().parse().ok()
    }
}
