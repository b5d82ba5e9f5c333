//! Call-site-facing dispatch entry points.
//!
//! `InterfaceDispatcher` composes the per-cell cache with the resolver:
//!
//! - `resolve_interface_call`: fast entry, tolerates a null receiver
//! - `resolve_and_cache_call`: slow path, resolve then cache
//! - `resolve_dispatch_by_slot`: one-shot, no cell
//! - `resolve_dispatch_on_type`, `resolve_static_by_slot`,
//!   `resolve_dynamic_castable_by_slot`: type-level queries
//!
//! A resolution that finds nothing never returns: it is a broken invariant
//! and goes through `fail_fast`.

use crate::cache::CacheConfig;
use crate::cell::{DispatchCell, DispatchCellInfo, ModuleId};
use crate::config::DispatchConfig;
use crate::metadata::TypeLoader;
use crate::resolver::{ResolvedTarget, Resolver};
use crate::stats::DispatchStats;
use keel_runtime::{
    CodePointer, DispatchError, FailFastReason, ImplementationLookup, MethodTableLookup, Object,
    TypeRef, fail_fast,
};
use std::sync::Arc;

/// Cached interface dispatcher.
#[derive(Debug)]
pub struct InterfaceDispatcher {
    resolver: Resolver,
    config: DispatchConfig,
    stats: Arc<DispatchStats>,
}

impl InterfaceDispatcher {
    /// Dispatcher over method table dispatch maps.
    pub fn new(config: DispatchConfig) -> Self {
        Self::with_lookup(config, Arc::new(MethodTableLookup::new()))
    }

    /// Dispatcher over a custom lookup.
    pub fn with_lookup(config: DispatchConfig, lookup: Arc<dyn ImplementationLookup>) -> Self {
        Self::with_resolver(config, Resolver::new(lookup))
    }

    /// Dispatcher over an existing resolver. The resolver records into the
    /// dispatcher's statistics.
    pub fn with_resolver(config: DispatchConfig, resolver: Resolver) -> Self {
        let stats = Arc::new(DispatchStats::new());
        let resolver = resolver.with_stats(Arc::clone(&stats), config.collect_stats);
        Self {
            resolver,
            config,
            stats,
        }
    }

    /// Enable metadata token dispatch through `loader`.
    pub fn with_type_loader(mut self, loader: Arc<dyn TypeLoader>) -> Self {
        self.resolver = self.resolver.with_type_loader(loader);
        self
    }

    /// Active configuration.
    #[inline]
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Underlying resolver.
    #[inline]
    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Live statistics.
    #[inline]
    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    #[inline(always)]
    fn record(&self, counter: fn(&DispatchStats)) {
        if self.config.collect_stats {
            counter(&self.stats);
        }
    }

    // =========================================================================
    // Cells
    // =========================================================================

    fn cache_config(&self) -> CacheConfig {
        self.config.cache
    }

    /// Interface dispatch cell sized for this dispatcher.
    pub fn new_interface_cell(&self, interface_type: TypeRef, slot: u16) -> DispatchCell {
        DispatchCell::with_cache_config(
            DispatchCellInfo::InterfaceAndSlot {
                interface_type,
                slot,
            },
            ModuleId::default(),
            self.cache_config(),
        )
    }

    /// Vtable offset cell.
    pub fn new_vtable_cell(&self, offset: u32) -> DispatchCell {
        DispatchCell::with_cache_config(
            DispatchCellInfo::VTableOffset { offset },
            ModuleId::default(),
            self.cache_config(),
        )
    }

    /// Metadata token cell owned by `module`.
    pub fn new_metadata_cell(&self, module: ModuleId, token: u32) -> DispatchCell {
        DispatchCell::with_cache_config(
            DispatchCellInfo::MetadataToken {
                token,
                has_cache: false,
            },
            module,
            self.cache_config(),
        )
    }

    // =========================================================================
    // Entry Points
    // =========================================================================

    /// Resolve a call through `cell`.
    ///
    /// A `None` receiver yields `Ok(None)` without resolving: the null check
    /// may have been moved after the dispatch by the caller's optimizer.
    #[inline]
    pub fn resolve_interface_call(
        &self,
        receiver: Option<&Object>,
        cell: &DispatchCell,
    ) -> Result<Option<CodePointer>, DispatchError> {
        let Some(receiver) = receiver else {
            self.record(DispatchStats::record_null_receiver);
            return Ok(None);
        };

        if let DispatchCellInfo::VTableOffset { .. } = cell.info() {
            return self.resolve_and_cache_call(receiver, cell).map(Some);
        }

        let instance_type = receiver.method_table();
        if let Some(target) = cell.search_cache(instance_type) {
            self.record(DispatchStats::record_cache_hit);
            if self.config.trace_resolutions {
                tracing::trace!(instance_type = ?instance_type, %target, "dispatch cache hit");
            }
            return Ok(Some(target));
        }

        self.record(DispatchStats::record_cache_miss);
        if self.config.trace_resolutions {
            tracing::trace!(
                instance_type = ?instance_type,
                cell = ?cell.info(),
                "dispatch cache miss"
            );
        }
        self.resolve_and_cache_call(receiver, cell).map(Some)
    }

    /// Resolve `receiver` against `cell` and cache the result.
    ///
    /// Fails fast when no strategy finds a target.
    pub fn resolve_and_cache_call(
        &self,
        receiver: &Object,
        cell: &DispatchCell,
    ) -> Result<CodePointer, DispatchError> {
        self.record(DispatchStats::record_resolution);
        let mut info = cell.info();
        let target = self
            .resolver
            .resolve_dispatch_worker(receiver, Some(cell), &mut info)?;

        debug_assert!(
            target.is_some(),
            "InternalError: no implementation of {:?} for '{}'",
            info,
            receiver.method_table().name()
        );
        match target {
            Some(target) => Ok(self.update_cache(cell, receiver.method_table(), target, &info)),
            None => fail_fast(
                FailFastReason::InternalError,
                &format!(
                    "valid method implementation was not found: {:?} on '{}'",
                    info,
                    receiver.method_table().name()
                ),
            ),
        }
    }

    /// One-shot resolution of `(interface_type, slot)` for `receiver`.
    ///
    /// No cell, no cache. Fails fast when nothing is found.
    pub fn resolve_dispatch_by_slot(
        &self,
        receiver: &Object,
        interface_type: TypeRef,
        slot: u16,
    ) -> Result<CodePointer, DispatchError> {
        self.record(DispatchStats::record_resolution);
        let mut info = DispatchCellInfo::InterfaceAndSlot {
            interface_type,
            slot,
        };
        let target = self
            .resolver
            .resolve_dispatch_worker(receiver, None, &mut info)?;

        debug_assert!(
            target.is_some(),
            "InternalError: '{}' has no implementation of slot {} of '{}'",
            receiver.method_table().name(),
            slot,
            interface_type.name()
        );
        match target {
            Some(target) => Ok(target),
            None => fail_fast(
                FailFastReason::InternalError,
                &format!(
                    "valid method implementation was not found: slot {} of '{}' on '{}'",
                    slot,
                    interface_type.name(),
                    receiver.method_table().name()
                ),
            ),
        }
    }

    /// See [`Resolver::resolve_dispatch_on_type`].
    #[inline]
    pub fn resolve_dispatch_on_type(
        &self,
        instance_type: TypeRef,
        interface_type: TypeRef,
        slot: u16,
    ) -> Option<CodePointer> {
        self.resolver
            .resolve_dispatch_on_type(instance_type, interface_type, slot)
    }

    /// See [`Resolver::resolve_static_by_slot`].
    #[inline]
    pub fn resolve_static_by_slot(
        &self,
        instance_type: TypeRef,
        interface_type: TypeRef,
        slot: u16,
    ) -> Option<ResolvedTarget> {
        self.resolver
            .resolve_static_by_slot(instance_type, interface_type, slot)
    }

    /// See [`Resolver::resolve_dynamic_castable_by_slot`].
    #[inline]
    pub fn resolve_dynamic_castable_by_slot(
        &self,
        instance_type: TypeRef,
        interface_type: TypeRef,
        slot: u16,
    ) -> Option<ResolvedTarget> {
        self.resolver
            .resolve_dynamic_castable_by_slot(instance_type, interface_type, slot)
    }

    /// Install `target` for `instance_type` in `cell` and return `target`.
    ///
    /// Vtable offset targets are never cached.
    pub fn update_cache(
        &self,
        cell: &DispatchCell,
        instance_type: TypeRef,
        target: CodePointer,
        info: &DispatchCellInfo,
    ) -> CodePointer {
        match info {
            DispatchCellInfo::VTableOffset { .. } => target,
            DispatchCellInfo::InterfaceAndSlot { .. } | DispatchCellInfo::MetadataToken { .. } => {
                cell.cache().insert(instance_type, target)
            }
        }
    }
}

impl Default for InterfaceDispatcher {
    fn default() -> Self {
        Self::new(DispatchConfig::default())
    }
}
