//! User-level dispatch errors.
//!
//! These propagate to the caller of a dispatch like any thrown exception.
//! Broken runtime invariants never become a `DispatchError`; they go
//! through [`crate::fail_fast`].

use thiserror::Error;

/// Error raised while resolving a dispatch through user-supplied logic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The receiver does not implement the interface.
    #[error("type '{type_name}' does not implement interface '{interface_name}'")]
    InterfaceNotImplemented {
        type_name: String,
        interface_name: String,
    },

    /// A dynamic castable object returned an unusable implementation type.
    #[error(
        "type '{implementation}' returned for interface '{interface_name}' is not a dynamic interface castable implementation"
    )]
    InvalidImplementationType {
        implementation: String,
        interface_name: String,
    },

    /// The implementation type lacks the requested slot.
    #[error("entry point for slot {slot} of '{interface_name}' not found on '{implementation}'")]
    EntryPointNotFound {
        implementation: String,
        interface_name: String,
        slot: u16,
    },

    /// Error raised by user code.
    #[error("{0}")]
    User(String),
}

impl DispatchError {
    /// Build an `InterfaceNotImplemented` from type names.
    pub fn not_implemented(type_name: &str, interface_name: &str) -> Self {
        Self::InterfaceNotImplemented {
            type_name: type_name.to_owned(),
            interface_name: interface_name.to_owned(),
        }
    }
}
