//! Runtime type metadata and services for Keel interface dispatch.
//!
//! This crate provides the collaborators the dispatch resolver consumes:
//! - Type descriptors (`MethodTable`, `TypeRef`) with vtables and dispatch maps
//! - The interface implementation lookup capability (`ImplementationLookup`)
//! - Receiver objects and the dynamic interface castable protocol
//! - Instantiating stubs for targets that need a hidden generic context
//! - User-level dispatch errors and the fail-fast primitive
//!
//! # Architecture
//!
//! ```text
//! Object ──header──▶ TypeRef ──▶ MethodTable
//!                                 ├── flags (interface, dynamic castable, ...)
//!                                 ├── parent / interfaces
//!                                 ├── vtable words      ◀── VTableOffset dispatch
//!                                 └── dispatch map      ◀── ImplementationLookup
//! ```

#![deny(unsafe_op_in_unsafe_fn)]

pub mod code;
pub mod error;
pub mod fail_fast;
pub mod lookup;
pub mod method_table;
pub mod object;
pub mod registry;
pub mod stubs;

pub use code::CodePointer;
pub use error::DispatchError;
pub use fail_fast::{
    FailFastHandler, FailFastReason, fail_fast, panicking_handler, set_fail_fast_handler,
};
pub use lookup::{ImplementationLookup, ImplementationTarget, MethodTableLookup, ResolveFlags};
pub use method_table::{
    DispatchMapEntry, MethodTable, MethodTableBuilder, POINTER_SIZE, TypeFlags, TypeId, TypeRef,
};
pub use object::{DynamicInterfaceCastable, Object, ObjectHeader};
pub use registry::{TypeRegistry, type_registry};
pub use stubs::{InstantiatingStubCache, instantiating_stubs};
