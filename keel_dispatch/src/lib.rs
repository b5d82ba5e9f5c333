//! Cached interface dispatch for Keel.
//!
//! Maps a polymorphic call site (receiver object + dispatch cell) to a
//! concrete code address and caches the mapping per call site, so
//! repeated calls cost a snapshot load and a short scan.
//!
//! # Architecture
//!
//! ```text
//!  resolve_interface_call(receiver, cell)
//!        │
//!        ├── receiver is None ──────────────▶ Ok(None)  (invalid sentinel)
//!        ├── cell is VTableOffset ──────────▶ load vtable word, no cache
//!        ├── cell cache hit ────────────────▶ target
//!        └── miss ─▶ resolve_and_cache_call
//!                      │
//!                      ├── InterfaceAndSlot: lookup ─▶ dynamic castable fallback
//!                      ├── VTableOffset:     vtable word
//!                      └── MetadataToken:    convert once (promote cell) or
//!                                            resolve through the type loader
//!                      │
//!                      ├── found ─▶ DispatchCache::insert ─▶ target
//!                      └── none  ─▶ fail_fast(InternalError)
//! ```
//!
//! # Concurrency
//!
//! Cells are shared by every thread executing their call site. Cache
//! snapshots and cell promotion are published with atomic swaps; no path
//! takes a lock. Racing writers converge because a `(type, interface,
//! slot)` triple always resolves to the same target.

#![deny(unsafe_op_in_unsafe_fn)]

pub mod cache;
pub mod cell;
pub mod config;
pub mod dispatcher;
pub mod metadata;
pub mod resolver;
pub mod stats;

pub use cache::{CacheConfig, CacheEntry, DispatchCache};
pub use cell::{DispatchCell, DispatchCellInfo, DispatchCellType, ModuleId, ResolvedCellInfo};
pub use config::DispatchConfig;
pub use dispatcher::InterfaceDispatcher;
pub use metadata::{RegistryTypeLoader, TokenBinding, TypeLoader};
pub use resolver::{ResolvedTarget, Resolver};
pub use stats::{DispatchStats, DispatchStatsSnapshot};
