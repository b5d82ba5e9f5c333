//! Dispatch receivers.
//!
//! An `Object` is what a call site dispatches on: a header pointing at the
//! type descriptor, plus the dynamic interface castable behavior for types
//! flagged `DYNAMIC_INTERFACE_CASTABLE`.

use crate::error::DispatchError;
use crate::method_table::TypeRef;
use std::fmt;
use std::sync::Arc;

/// Runtime-supplied interface resolution for objects whose type does not
/// statically implement an interface.
///
/// This is user code. It may block, and it may fail with a user-level
/// error that propagates to the dispatching caller.
pub trait DynamicInterfaceCastable: Send + Sync {
    /// Return the implementation interface that provides `interface_type`
    /// for this object.
    fn get_interface_implementation(&self, interface_type: TypeRef)
    -> Result<TypeRef, DispatchError>;
}

/// Object header shared by every receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct ObjectHeader {
    /// Type descriptor of the object.
    pub method_table: TypeRef,
}

impl ObjectHeader {
    /// Create a header for `method_table`.
    #[inline]
    pub const fn new(method_table: TypeRef) -> Self {
        Self { method_table }
    }
}

/// A dispatch receiver.
pub struct Object {
    header: ObjectHeader,
    dynamic: Option<Arc<dyn DynamicInterfaceCastable>>,
}

impl Object {
    /// Create a plain object of `method_table`.
    pub fn new(method_table: TypeRef) -> Self {
        Self {
            header: ObjectHeader::new(method_table),
            dynamic: None,
        }
    }

    /// Create an object that resolves interfaces through `behavior`.
    ///
    /// The type should carry `TypeFlags::DYNAMIC_INTERFACE_CASTABLE`;
    /// dispatch only consults `behavior` for flagged types.
    pub fn with_dynamic_castable(
        method_table: TypeRef,
        behavior: Arc<dyn DynamicInterfaceCastable>,
    ) -> Self {
        debug_assert!(
            method_table.is_dynamic_interface_castable(),
            "type '{}' is not flagged dynamic interface castable",
            method_table.name()
        );
        Self {
            header: ObjectHeader::new(method_table),
            dynamic: Some(behavior),
        }
    }

    /// Object header.
    #[inline(always)]
    pub fn header(&self) -> &ObjectHeader {
        &self.header
    }

    /// Type descriptor of the object.
    #[inline(always)]
    pub fn method_table(&self) -> TypeRef {
        self.header.method_table
    }

    /// Dynamic interface castable behavior, if the object has one.
    #[inline]
    pub fn dynamic_castable(&self) -> Option<&dyn DynamicInterfaceCastable> {
        self.dynamic.as_deref()
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("type", &self.header.method_table)
            .field("dynamic_castable", &self.dynamic.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method_table::{MethodTableBuilder, TypeFlags};

    struct Fixed(TypeRef);

    impl DynamicInterfaceCastable for Fixed {
        fn get_interface_implementation(&self, _: TypeRef) -> Result<TypeRef, DispatchError> {
            Ok(self.0)
        }
    }

    #[test]
    fn test_plain_object() {
        let ty = MethodTableBuilder::new("Plain").build();
        let obj = Object::new(ty);
        assert_eq!(obj.method_table(), ty);
        assert_eq!(obj.header().method_table, ty);
        assert!(obj.dynamic_castable().is_none());
    }

    #[test]
    fn test_dynamic_castable_object() {
        let iface = MethodTableBuilder::interface("IAny").build();
        let ty = MethodTableBuilder::new("Proxy")
            .flags(TypeFlags::DYNAMIC_INTERFACE_CASTABLE)
            .build();
        let obj = Object::with_dynamic_castable(ty, Arc::new(Fixed(iface)));

        let behavior = obj.dynamic_castable().unwrap();
        assert_eq!(behavior.get_interface_implementation(iface), Ok(iface));
    }

    #[test]
    fn test_debug_format() {
        let ty = MethodTableBuilder::new("Shown").build();
        let text = format!("{:?}", Object::new(ty));
        assert!(text.contains("Shown"));
        assert!(text.contains("dynamic_castable: false"));
    }
}
