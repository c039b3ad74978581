// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Type-erased field value storage.
//!
//! Struct snapshots keep their values as [`ErasedValue`]s: a shared,
//! reference-counted handle that remembers the concrete [`FieldType`] so it
//! can be compared, hashed, printed and encoded without knowing the type.

use core::any::Any;
use core::fmt;
use core::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::field_type::FieldType;
use crate::kind::Value;

/// A shared, type-erased field value.
///
/// Cloning is a reference-count bump, so copying a struct shares every value
/// it does not replace.
///
/// ```rust
/// use understory_schema::{ErasedValue, Value};
///
/// let value = ErasedValue::new(vec![1_i32, 2]);
/// assert!(value.is::<Vec<i32>>());
/// assert_eq!(value.downcast_ref::<Vec<i32>>(), Some(&vec![1, 2]));
/// assert_eq!(value.to_value(), Value::List(vec![Value::I32(1), Value::I32(2)]));
/// assert_eq!(value, ErasedValue::new(vec![1_i32, 2]));
/// ```
#[derive(Clone)]
pub struct ErasedValue(Arc<dyn AnyField>);

impl ErasedValue {
    /// Wraps a concrete value.
    #[must_use]
    pub fn new<T: FieldType>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Returns `true` if the contained value is of type `T`.
    #[must_use]
    #[inline]
    pub fn is<T: FieldType>(&self) -> bool {
        self.0.as_any().is::<T>()
    }

    /// Returns the contained value if it has type `T`.
    #[must_use]
    #[inline]
    pub fn downcast_ref<T: FieldType>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref()
    }

    /// Encodes the contained value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        self.0.to_value()
    }

    /// Returns `true` if both handles share one allocation.
    #[must_use]
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for ErasedValue {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.0.same_dyn(other.0.as_any())
    }
}

impl Eq for ErasedValue {}

impl Hash for ErasedValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash_dyn(state);
    }
}

impl fmt::Debug for ErasedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.debug(f)
    }
}

/// Object-safe view of a [`FieldType`].
trait AnyField: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn same_dyn(&self, other: &dyn Any) -> bool;
    fn hash_dyn(&self, state: &mut dyn Hasher);
    fn to_value(&self) -> Value;
    fn debug(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

impl<T: FieldType> AnyField for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn same_dyn(&self, other: &dyn Any) -> bool {
        other.downcast_ref::<T>().is_some_and(|other| self.same(other))
    }

    fn hash_dyn(&self, state: &mut dyn Hasher) {
        self.hash_into(state);
    }

    fn to_value(&self) -> Value {
        FieldType::to_value(self)
    }

    fn debug(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
