//! Dispatch resolution.
//!
//! The resolver is the slow path: it turns a receiver type and cell info
//! into a code address by consulting the method table lookup, the dynamic
//! interface castable protocol and, for token cells, the type loader. It
//! never touches a cell cache; the dispatcher does that.
//!
//! # Strategy Order
//!
//! ```text
//!  InterfaceAndSlot ─▶ ImplementationLookup ──found──▶ target
//!                           │ none
//!                           ▼
//!                 type DYNAMIC_INTERFACE_CASTABLE? ──no──▶ none
//!                           │ yes
//!                           ▼
//!                 get_dynamic_interface_implementation ─▶ target | Err
//!
//!  VTableOffset ───▶ word at offset in the receiver's method table
//!
//!  MetadataToken ──▶ never cached? ─▶ convert ─▶ promote cell, retry once
//!                        │ cached or unconvertible
//!                        ▼
//!                  TypeLoader::resolve_metadata_token_dispatch
//! ```
//!
//! The dynamic castable protocol is only consulted after the static lookup
//! reports nothing.

use crate::cell::{DispatchCell, DispatchCellInfo};
use crate::metadata::TypeLoader;
use crate::stats::DispatchStats;
use keel_runtime::{
    CodePointer, DispatchError, FailFastReason, ImplementationLookup, ImplementationTarget,
    InstantiatingStubCache, MethodTableLookup, Object, ResolveFlags, TypeRef, fail_fast,
    instantiating_stubs,
};
use std::fmt;
use std::sync::Arc;

// =============================================================================
// Resolved Target
// =============================================================================

/// A code address plus the generic context a shared generic target needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedTarget {
    /// Code address. May carry the instantiating thunk flag; see the
    /// individual resolution methods.
    pub code: CodePointer,
    /// Hidden generic-context argument.
    pub generic_context: Option<TypeRef>,
}

impl ResolvedTarget {
    /// Whether the address carries the instantiating thunk flag.
    #[inline]
    pub fn requires_instantiating_thunk(&self) -> bool {
        self.code.requires_instantiating_thunk()
    }
}

impl From<ImplementationTarget> for ResolvedTarget {
    fn from(target: ImplementationTarget) -> Self {
        Self {
            code: target.code,
            generic_context: target.generic_context,
        }
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// Slow-path dispatch resolution.
pub struct Resolver {
    lookup: Arc<dyn ImplementationLookup>,
    type_loader: Option<Arc<dyn TypeLoader>>,
    stubs: &'static InstantiatingStubCache,
    stats: Arc<DispatchStats>,
    collect_stats: bool,
}

impl Resolver {
    /// Create a resolver over `lookup` with no type loader.
    pub fn new(lookup: Arc<dyn ImplementationLookup>) -> Self {
        Self {
            lookup,
            type_loader: None,
            stubs: instantiating_stubs(),
            stats: Arc::new(DispatchStats::new()),
            collect_stats: true,
        }
    }

    /// Enable metadata token dispatch through `loader`.
    pub fn with_type_loader(mut self, loader: Arc<dyn TypeLoader>) -> Self {
        self.type_loader = Some(loader);
        self
    }

    /// Record into `stats`, or record nothing when `enabled` is false.
    pub fn with_stats(mut self, stats: Arc<DispatchStats>, enabled: bool) -> Self {
        self.stats = stats;
        self.collect_stats = enabled;
        self
    }

    /// Use `stubs` for instantiating stubs instead of the process-wide cache.
    pub fn with_stub_cache(mut self, stubs: &'static InstantiatingStubCache) -> Self {
        self.stubs = stubs;
        self
    }

    /// Statistics this resolver records into.
    #[inline]
    pub fn stats(&self) -> &Arc<DispatchStats> {
        &self.stats
    }

    /// Whether metadata token cells can be resolved.
    #[inline]
    pub fn has_type_loader(&self) -> bool {
        self.type_loader.is_some()
    }

    #[inline(always)]
    pub(crate) fn record(&self, counter: fn(&DispatchStats)) {
        if self.collect_stats {
            counter(&self.stats);
        }
    }

    // =========================================================================
    // Worker
    // =========================================================================

    /// Resolve `info` for `receiver`.
    ///
    /// `info` is updated in place when a metadata token converts, so the
    /// caller caches under the converted form. `cell` supplies the owning
    /// module and receives the promotion; one-shot resolution passes `None`.
    ///
    /// `Ok(None)` means every strategy came up empty. `Err` is a user-level
    /// error from the dynamic interface castable protocol.
    pub fn resolve_dispatch_worker(
        &self,
        receiver: &Object,
        cell: Option<&DispatchCell>,
        info: &mut DispatchCellInfo,
    ) -> Result<Option<CodePointer>, DispatchError> {
        let instance_type = receiver.method_table();

        match *info {
            DispatchCellInfo::InterfaceAndSlot {
                interface_type,
                slot,
            } => {
                let target = self
                    .lookup
                    .find_interface_method_implementation_target(
                        instance_type,
                        interface_type,
                        slot,
                        ResolveFlags::empty(),
                    )
                    .map(|target| self.callable(target));

                if target.is_none() && instance_type.is_dynamic_interface_castable() {
                    self.record(DispatchStats::record_dynamic_castable_fallback);
                    tracing::debug!(
                        instance_type = ?instance_type,
                        interface_type = ?interface_type,
                        slot,
                        "falling back to dynamic interface castable"
                    );
                    let code =
                        self.get_dynamic_interface_implementation(receiver, interface_type, slot)?;
                    return Ok(Some(code));
                }
                Ok(target)
            }

            DispatchCellInfo::VTableOffset { offset } => {
                self.record(DispatchStats::record_vtable_dispatch);
                Ok(instance_type.load_vtable_slot_at_offset(offset))
            }

            DispatchCellInfo::MetadataToken { token, has_cache } => {
                let Some(loader) = self.type_loader.as_deref() else {
                    fail_fast(
                        FailFastReason::InternalError,
                        "metadata token dispatch requires a type loader",
                    )
                };
                let module = cell.map(DispatchCell::module).unwrap_or_default();

                // Only cells that never cached a target are worth converting.
                if !has_cache {
                    let converted = loader.convert_metadata_token_dispatch(module, info);
                    if let Some(resolved) = converted.resolved() {
                        self.record(DispatchStats::record_metadata_conversion);
                        let effective = match cell {
                            Some(cell) => cell.promote(resolved),
                            None => resolved,
                        };
                        *info = effective.into();
                        return self.resolve_dispatch_worker(receiver, cell, info);
                    }
                }

                self.record(DispatchStats::record_metadata_resolution);
                Ok(loader.resolve_metadata_token_dispatch(module, token, instance_type))
            }
        }
    }

    // =========================================================================
    // Type-Level Queries
    // =========================================================================

    /// Implementation of `(interface_type, slot)` on `instance_type`.
    ///
    /// Plain lookup: no receiver, no dynamic castable fallback. Targets
    /// needing a generic context come back as an instantiating stub.
    pub fn resolve_dispatch_on_type(
        &self,
        instance_type: TypeRef,
        interface_type: TypeRef,
        slot: u16,
    ) -> Option<CodePointer> {
        self.lookup
            .find_interface_method_implementation_target(
                instance_type,
                interface_type,
                slot,
                ResolveFlags::empty(),
            )
            .map(|target| self.callable(target))
    }

    /// Directly callable address for an instance lookup result.
    ///
    /// Instance call sites have no generic-context channel, so a flagged
    /// target is bound to its context through an instantiating stub.
    fn callable(&self, target: ImplementationTarget) -> CodePointer {
        match target.callable(self.stubs) {
            Some(code) => code,
            None => fail_fast(
                FailFastReason::InternalError,
                "instantiating thunk target has no generic context",
            ),
        }
    }

    /// Static virtual method implementation.
    ///
    /// Returned raw: when the thunk flag is set the caller masks it and
    /// passes `generic_context`.
    pub fn resolve_static_by_slot(
        &self,
        instance_type: TypeRef,
        interface_type: TypeRef,
        slot: u16,
    ) -> Option<ResolvedTarget> {
        self.lookup
            .find_interface_method_implementation_target(
                instance_type,
                interface_type,
                slot,
                ResolveFlags::STATIC,
            )
            .map(ResolvedTarget::from)
    }

    /// Implementation on a dynamic castable implementation interface.
    ///
    /// The thunk flag is stripped when set, and the context is cleared when
    /// it is not, so a context is present exactly when the target needs one.
    pub fn resolve_dynamic_castable_by_slot(
        &self,
        instance_type: TypeRef,
        interface_type: TypeRef,
        slot: u16,
    ) -> Option<ResolvedTarget> {
        let target = self.lookup.find_interface_method_implementation_target(
            instance_type,
            interface_type,
            slot,
            ResolveFlags::DYNAMIC_INTERFACE_CASTABLE,
        )?;

        Some(if target.code.requires_instantiating_thunk() {
            ResolvedTarget {
                code: target.code.without_flags(),
                generic_context: target.generic_context,
            }
        } else {
            ResolvedTarget {
                code: target.code,
                generic_context: None,
            }
        })
    }

    // =========================================================================
    // Dynamic Interface Castable
    // =========================================================================

    /// Resolve through the receiver's dynamic interface castable behavior.
    ///
    /// The returned implementation type must be an interface flagged
    /// `DYNAMIC_CASTABLE_IMPLEMENTATION` that provides `slot`. Targets that
    /// need a generic context come back as an instantiating stub.
    pub fn get_dynamic_interface_implementation(
        &self,
        receiver: &Object,
        interface_type: TypeRef,
        slot: u16,
    ) -> Result<CodePointer, DispatchError> {
        let Some(behavior) = receiver.dynamic_castable() else {
            fail_fast(
                FailFastReason::InternalError,
                &format!(
                    "object of dynamic interface castable type '{}' has no implementation",
                    receiver.method_table().name()
                ),
            )
        };

        let implementation = behavior.get_interface_implementation(interface_type)?;
        if !implementation.is_interface() || !implementation.is_dynamic_castable_implementation() {
            return Err(DispatchError::InvalidImplementationType {
                implementation: implementation.name().to_owned(),
                interface_name: interface_type.name().to_owned(),
            });
        }

        let Some(resolved) =
            self.resolve_dynamic_castable_by_slot(implementation, interface_type, slot)
        else {
            return Err(DispatchError::EntryPointNotFound {
                implementation: implementation.name().to_owned(),
                interface_name: interface_type.name().to_owned(),
                slot,
            });
        };

        Ok(match resolved.generic_context {
            Some(context) => self.stubs.get_or_create(resolved.code, context),
            None => resolved.code,
        })
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(Arc::new(MethodTableLookup::new()))
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("type_loader", &self.type_loader.is_some())
            .field("stubs", &self.stubs.len())
            .field("collect_stats", &self.collect_stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{ModuleId, ResolvedCellInfo};
    use keel_runtime::{
        DispatchMapEntry, DynamicInterfaceCastable, MethodTable, MethodTableBuilder, TypeFlags,
        panicking_handler, set_fail_fast_handler,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn code(raw: usize) -> CodePointer {
        CodePointer::aligned(raw).unwrap()
    }

    fn interface_info(interface_type: TypeRef, slot: u16) -> DispatchCellInfo {
        DispatchCellInfo::InterfaceAndSlot {
            interface_type,
            slot,
        }
    }

    struct ReturnsType(TypeRef);

    impl DynamicInterfaceCastable for ReturnsType {
        fn get_interface_implementation(&self, _: TypeRef) -> Result<TypeRef, DispatchError> {
            Ok(self.0)
        }
    }

    struct Refuses;

    impl DynamicInterfaceCastable for Refuses {
        fn get_interface_implementation(&self, iface: TypeRef) -> Result<TypeRef, DispatchError> {
            Err(DispatchError::not_implemented("Refuses", iface.name()))
        }
    }

    #[derive(Default)]
    struct CountingLoader {
        converts: AtomicUsize,
        resolves: AtomicUsize,
        convert_to: Option<ResolvedCellInfo>,
        resolve_to: Option<CodePointer>,
    }

    impl TypeLoader for CountingLoader {
        fn convert_metadata_token_dispatch(
            &self,
            _: ModuleId,
            info: &DispatchCellInfo,
        ) -> DispatchCellInfo {
            self.converts.fetch_add(1, Ordering::SeqCst);
            self.convert_to.map_or(*info, Into::into)
        }

        fn resolve_metadata_token_dispatch(
            &self,
            _: ModuleId,
            _: u32,
            _: TypeRef,
        ) -> Option<CodePointer> {
            self.resolves.fetch_add(1, Ordering::SeqCst);
            self.resolve_to
        }
    }

    #[test]
    fn test_interface_lookup() {
        let iface = MethodTableBuilder::interface("IWorker").build();
        let ty = MethodTableBuilder::new("Worker")
            .implement(iface, 2, code(0x4000))
            .build();
        let resolver = Resolver::default();
        let mut info = interface_info(iface, 2);

        let target = resolver
            .resolve_dispatch_worker(&Object::new(ty), None, &mut info)
            .unwrap();
        assert_eq!(target, Some(code(0x4000)));
    }

    #[test]
    fn test_interface_miss_without_dynamic_castable() {
        let iface = MethodTableBuilder::interface("IMissing").build();
        let ty = MethodTableBuilder::new("Plain").build();
        let resolver = Resolver::default();
        let mut info = interface_info(iface, 0);

        let target = resolver
            .resolve_dispatch_worker(&Object::new(ty), None, &mut info)
            .unwrap();
        assert_eq!(target, None);
    }

    #[test]
    fn test_vtable_offset_reads_word() {
        let ty = MethodTableBuilder::new("VTabled")
            .vtable_slot(Some(code(0x5000)))
            .vtable_slot(Some(code(0x5100)))
            .build();
        let resolver = Resolver::default();
        let mut info = DispatchCellInfo::VTableOffset {
            offset: MethodTable::vtable_offset_of(1),
        };

        let target = resolver
            .resolve_dispatch_worker(&Object::new(ty), None, &mut info)
            .unwrap();
        assert_eq!(target, Some(code(0x5100)));
        assert_eq!(resolver.stats().snapshot().vtable_dispatches, 1);
    }

    #[test]
    fn test_dynamic_castable_fallback() {
        let iface = MethodTableBuilder::interface("IDyn").build();
        let implementation = MethodTableBuilder::interface("IDynImpl")
            .flags(TypeFlags::DYNAMIC_CASTABLE_IMPLEMENTATION)
            .implement(iface, 0, code(0x6000))
            .build();
        let ty = MethodTableBuilder::new("DynObject")
            .flags(TypeFlags::DYNAMIC_INTERFACE_CASTABLE)
            .build();
        let receiver = Object::with_dynamic_castable(ty, Arc::new(ReturnsType(implementation)));
        let resolver = Resolver::default();
        let mut info = interface_info(iface, 0);

        let target = resolver
            .resolve_dispatch_worker(&receiver, None, &mut info)
            .unwrap();
        assert_eq!(target, Some(code(0x6000)));
        assert_eq!(resolver.stats().snapshot().dynamic_castable_fallbacks, 1);
    }

    #[test]
    fn test_dynamic_castable_user_error_propagates() {
        let iface = MethodTableBuilder::interface("IRefused").build();
        let ty = MethodTableBuilder::new("Refuser")
            .flags(TypeFlags::DYNAMIC_INTERFACE_CASTABLE)
            .build();
        let receiver = Object::with_dynamic_castable(ty, Arc::new(Refuses));
        let mut info = interface_info(iface, 0);

        let err = Resolver::default()
            .resolve_dispatch_worker(&receiver, None, &mut info)
            .unwrap_err();
        assert_eq!(err, DispatchError::not_implemented("Refuses", "IRefused"));
    }

    #[test]
    fn test_dynamic_castable_rejects_non_implementation_type() {
        let iface = MethodTableBuilder::interface("IStrict").build();
        let bogus = MethodTableBuilder::new("NotAnInterface")
            .implement(iface, 0, code(0x6100))
            .build();
        let ty = MethodTableBuilder::new("Strict")
            .flags(TypeFlags::DYNAMIC_INTERFACE_CASTABLE)
            .build();
        let receiver = Object::with_dynamic_castable(ty, Arc::new(ReturnsType(bogus)));

        let err = Resolver::default()
            .get_dynamic_interface_implementation(&receiver, iface, 0)
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidImplementationType { .. }));
    }

    #[test]
    fn test_dynamic_castable_missing_slot() {
        let iface = MethodTableBuilder::interface("IPartial").build();
        let implementation = MethodTableBuilder::interface("IPartialImpl")
            .flags(TypeFlags::DYNAMIC_CASTABLE_IMPLEMENTATION)
            .implement(iface, 0, code(0x6200))
            .build();
        let ty = MethodTableBuilder::new("Partial")
            .flags(TypeFlags::DYNAMIC_INTERFACE_CASTABLE)
            .build();
        let receiver = Object::with_dynamic_castable(ty, Arc::new(ReturnsType(implementation)));

        let err = Resolver::default()
            .get_dynamic_interface_implementation(&receiver, iface, 1)
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::EntryPointNotFound {
                implementation: "IPartialImpl".into(),
                interface_name: "IPartial".into(),
                slot: 1,
            }
        );
    }

    #[test]
    fn test_dynamic_castable_generic_target_uses_stub() {
        let iface = MethodTableBuilder::interface("IGenericDyn").build();
        let context = MethodTableBuilder::new("Context").build();
        let implementation = MethodTableBuilder::interface("IGenericDynImpl")
            .flags(TypeFlags::DYNAMIC_CASTABLE_IMPLEMENTATION)
            .implement_generic(iface, 0, code(0x6300), Some(context), false)
            .build();
        let ty = MethodTableBuilder::new("GenericDyn")
            .flags(TypeFlags::DYNAMIC_INTERFACE_CASTABLE)
            .build();
        let receiver = Object::with_dynamic_castable(ty, Arc::new(ReturnsType(implementation)));
        let resolver = Resolver::default();

        let stub = resolver
            .get_dynamic_interface_implementation(&receiver, iface, 0)
            .unwrap();
        assert_ne!(stub, code(0x6300));
        assert_eq!(
            instantiating_stubs().stub_target(stub),
            Some((code(0x6300), context))
        );

        // Same target and context, same stub.
        let again = resolver
            .get_dynamic_interface_implementation(&receiver, iface, 0)
            .unwrap();
        assert_eq!(stub, again);
    }

    #[test]
    fn test_dynamic_castable_by_slot_masks_and_clears() {
        let iface = MethodTableBuilder::interface("IMask").build();
        let implementation = MethodTableBuilder::interface("IMaskImpl")
            .flags(TypeFlags::DYNAMIC_CASTABLE_IMPLEMENTATION)
            .implement(iface, 0, code(0x7000))
            .implement_generic(iface, 1, code(0x7100), None, false)
            .build();
        let resolver = Resolver::default();

        let plain = resolver
            .resolve_dynamic_castable_by_slot(implementation, iface, 0)
            .unwrap();
        assert_eq!(plain.code, code(0x7000));
        assert_eq!(plain.generic_context, None);

        let generic = resolver
            .resolve_dynamic_castable_by_slot(implementation, iface, 1)
            .unwrap();
        assert_eq!(generic.code, code(0x7100));
        assert!(!generic.requires_instantiating_thunk());
        assert_eq!(generic.generic_context, Some(implementation));
    }

    #[test]
    fn test_static_by_slot_keeps_flag() {
        let iface = MethodTableBuilder::interface("IStatic").build();
        let ty = MethodTableBuilder::new("StaticImpl")
            .implement_static(iface, 0, code(0x8000))
            .implement_generic(iface, 1, code(0x8100), None, true)
            .build();
        let resolver = Resolver::default();

        let plain = resolver.resolve_static_by_slot(ty, iface, 0).unwrap();
        assert_eq!(plain.code, code(0x8000));
        assert_eq!(plain.generic_context, None);

        let generic = resolver.resolve_static_by_slot(ty, iface, 1).unwrap();
        assert!(generic.requires_instantiating_thunk());
        assert_eq!(generic.code.without_flags(), code(0x8100));
        assert_eq!(generic.generic_context, Some(ty));

        // Static slots are not instance slots.
        assert_eq!(resolver.resolve_dispatch_on_type(ty, iface, 0), None);
    }

    #[test]
    fn test_generic_instance_entry_resolves_to_stub() {
        let iface = MethodTableBuilder::interface("IGenericInstance").build();
        let ty = MethodTableBuilder::new("GenericInstance")
            .implement_generic(iface, 0, code(0x9000), None, false)
            .build();
        let resolver = Resolver::default();
        let mut info = interface_info(iface, 0);

        let target = resolver
            .resolve_dispatch_worker(&Object::new(ty), None, &mut info)
            .unwrap()
            .unwrap();
        assert!(!target.requires_instantiating_thunk());
        assert_eq!(instantiating_stubs().stub_target(target), Some((code(0x9000), ty)));
        assert_eq!(resolver.resolve_dispatch_on_type(ty, iface, 0), Some(target));
    }

    #[test]
    #[should_panic(expected = "InternalError")]
    fn test_flagged_target_without_context_fails_fast() {
        struct Contextless;

        impl ImplementationLookup for Contextless {
            fn find_interface_method_implementation_target(
                &self,
                _: TypeRef,
                _: TypeRef,
                _: u16,
                _: ResolveFlags,
            ) -> Option<ImplementationTarget> {
                Some(ImplementationTarget::direct(code(0x9100).with_instantiating_thunk()))
            }
        }

        set_fail_fast_handler(panicking_handler);
        let iface = MethodTableBuilder::interface("IContextless").build();
        let ty = MethodTableBuilder::new("Contextless").build();
        let _ = Resolver::new(Arc::new(Contextless)).resolve_dispatch_on_type(ty, iface, 0);
    }

    #[test]
    fn test_dispatch_on_type_uses_default_method() {
        let iface = MethodTableBuilder::interface("IDefaultOnType")
            .default_implementation(0, DispatchMapEntry::simple(code(0x9000)))
            .build();
        let ty = MethodTableBuilder::new("OnType").implements(iface).build();

        assert_eq!(
            Resolver::default().resolve_dispatch_on_type(ty, iface, 0),
            Some(code(0x9000))
        );
    }

    #[test]
    fn test_metadata_conversion_promotes_cell() {
        let iface = MethodTableBuilder::interface("IToken").build();
        let ty = MethodTableBuilder::new("TokenTarget")
            .implement(iface, 4, code(0xA000))
            .build();
        let loader = Arc::new(CountingLoader {
            convert_to: Some(ResolvedCellInfo::InterfaceAndSlot {
                interface_type: iface,
                slot: 4,
            }),
            ..Default::default()
        });
        let resolver = Resolver::default().with_type_loader(loader.clone());
        let cell = DispatchCell::metadata_token(ModuleId(3), 0x0600_0004);
        let mut info = cell.info();

        let target = resolver
            .resolve_dispatch_worker(&Object::new(ty), Some(&cell), &mut info)
            .unwrap();

        assert_eq!(target, Some(code(0xA000)));
        assert_eq!(info, interface_info(iface, 4));
        assert!(cell.is_promoted());
        assert_eq!(loader.converts.load(Ordering::SeqCst), 1);
        assert_eq!(loader.resolves.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_metadata_unconvertible_resolves_by_token() {
        let ty = MethodTableBuilder::new("TokenOnly").build();
        let loader = Arc::new(CountingLoader {
            resolve_to: Some(code(0xB000)),
            ..Default::default()
        });
        let resolver = Resolver::default().with_type_loader(loader.clone());
        let cell = DispatchCell::metadata_token(ModuleId(3), 0x0600_0005);
        let mut info = cell.info();

        let target = resolver
            .resolve_dispatch_worker(&Object::new(ty), Some(&cell), &mut info)
            .unwrap();

        assert_eq!(target, Some(code(0xB000)));
        assert!(!cell.is_promoted());
        assert_eq!(loader.converts.load(Ordering::SeqCst), 1);
        assert_eq!(loader.resolves.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_metadata_with_cache_skips_conversion() {
        let ty = MethodTableBuilder::new("TokenCached").build();
        let loader = Arc::new(CountingLoader {
            resolve_to: Some(code(0xB100)),
            ..Default::default()
        });
        let resolver = Resolver::default().with_type_loader(loader.clone());
        let mut info = DispatchCellInfo::MetadataToken {
            token: 9,
            has_cache: true,
        };

        let target = resolver
            .resolve_dispatch_worker(&Object::new(ty), None, &mut info)
            .unwrap();

        assert_eq!(target, Some(code(0xB100)));
        assert_eq!(loader.converts.load(Ordering::SeqCst), 0);
    }

    #[test]
    #[should_panic(expected = "InternalError")]
    fn test_metadata_without_loader_fails_fast() {
        set_fail_fast_handler(panicking_handler);
        let ty = MethodTableBuilder::new("NoLoader").build();
        let mut info = DispatchCellInfo::MetadataToken {
            token: 1,
            has_cache: false,
        };
        let _ = Resolver::default().resolve_dispatch_worker(&Object::new(ty), None, &mut info);
    }

    #[test]
    fn test_stats_disabled() {
        let ty = MethodTableBuilder::new("Quiet")
            .vtable_slot(Some(code(0xC000)))
            .build();
        let stats = Arc::new(DispatchStats::new());
        let resolver = Resolver::default().with_stats(stats.clone(), false);
        let mut info = DispatchCellInfo::VTableOffset {
            offset: MethodTable::VTABLE_OFFSET,
        };

        resolver
            .resolve_dispatch_worker(&Object::new(ty), None, &mut info)
            .unwrap();
        assert_eq!(stats.snapshot().vtable_dispatches, 0);
    }
}
