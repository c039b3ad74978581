// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Mapping between Rust field types and [`DataType`]/[`Value`].

use core::fmt::Debug;
use core::hash::{Hash, Hasher};

use crate::error::TypeMismatch;
use crate::kind::{DataType, Kind, Value};

/// A Rust type that can be stored in a struct field.
///
/// Implemented for `bool`, the signed integers, `f32`, `f64`, `String`,
/// `Box<[u8]>`, `Vec<T>` of any field type and `Option<T>` of any
/// [`NonNullable`] field type.
///
/// Equality and hashing go through [`FieldType::same`] and
/// [`FieldType::hash_into`] so that floats can compare by bit pattern and
/// struct equality stays consistent with struct hashing.
pub trait FieldType: Clone + PartialEq + Debug + Send + Sync + 'static {
    /// The declared type of fields holding `Self`.
    fn data_type() -> DataType;

    /// Encodes `self` as a dynamic value.
    fn to_value(&self) -> Value;

    /// Decodes a dynamic value.
    ///
    /// # Errors
    ///
    /// Returns [`TypeMismatch`] if `value` does not conform to
    /// [`Self::data_type`].
    fn from_value(value: Value) -> Result<Self, TypeMismatch>;

    /// Deep equality.
    fn same(&self, other: &Self) -> bool;

    /// Feeds `self` into `state`, consistently with [`FieldType::same`].
    fn hash_into(&self, state: &mut dyn Hasher);
}

/// A field type without a null value of its own.
///
/// Only these can be wrapped in `Option`. `Option<Option<T>>` would encode
/// both `None` and `Some(None)` as [`Value::Null`], so it is not a field type:
///
/// ```compile_fail
/// use understory_schema::FieldType;
///
/// let _ = <Option<Option<i32>>>::data_type();
/// ```
pub trait NonNullable: FieldType {}

fn mismatch<T: FieldType>(found: &Value) -> TypeMismatch {
    TypeMismatch {
        expected: T::data_type(),
        found: found.describe(),
    }
}

/// Forwards `Hash` into a `dyn Hasher`.
struct DynHasher<'a>(&'a mut dyn Hasher);

impl Hasher for DynHasher<'_> {
    fn finish(&self) -> u64 {
        self.0.finish()
    }

    fn write(&mut self, bytes: &[u8]) {
        self.0.write(bytes);
    }
}

fn hash_dyn<H: Hash + ?Sized>(value: &H, state: &mut dyn Hasher) {
    value.hash(&mut DynHasher(state));
}

macro_rules! exact_field_type {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl FieldType for $ty {
                fn data_type() -> DataType {
                    DataType::Simple(Kind::$kind)
                }

                fn to_value(&self) -> Value {
                    Value::$kind(Clone::clone(self))
                }

                fn from_value(value: Value) -> Result<Self, TypeMismatch> {
                    match value {
                        Value::$kind(v) => Ok(v),
                        other => Err(mismatch::<Self>(&other)),
                    }
                }

                #[inline]
                fn same(&self, other: &Self) -> bool {
                    self == other
                }

                fn hash_into(&self, state: &mut dyn Hasher) {
                    hash_dyn(self, state);
                }
            }

            impl NonNullable for $ty {}
        )*
    };
}

exact_field_type! {
    bool => Bool,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    String => Str,
    Box<[u8]> => Blob,
}

macro_rules! float_field_type {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl FieldType for $ty {
                fn data_type() -> DataType {
                    DataType::Simple(Kind::$kind)
                }

                fn to_value(&self) -> Value {
                    Value::$kind(*self)
                }

                fn from_value(value: Value) -> Result<Self, TypeMismatch> {
                    match value {
                        Value::$kind(v) => Ok(v),
                        other => Err(mismatch::<Self>(&other)),
                    }
                }

                #[inline]
                fn same(&self, other: &Self) -> bool {
                    self.to_bits() == other.to_bits()
                }

                fn hash_into(&self, state: &mut dyn Hasher) {
                    hash_dyn(&self.to_bits(), state);
                }
            }

            impl NonNullable for $ty {}
        )*
    };
}

float_field_type! {
    f32 => F32,
    f64 => F64,
}

impl<T: NonNullable> FieldType for Option<T> {
    fn data_type() -> DataType {
        T::data_type().nullable()
    }

    fn to_value(&self) -> Value {
        self.as_ref().map_or(Value::Null, T::to_value)
    }

    fn from_value(value: Value) -> Result<Self, TypeMismatch> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other)
                .map(Some)
                .map_err(|inner| TypeMismatch {
                    expected: Self::data_type(),
                    found: inner.found,
                }),
        }
    }

    fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (None, None) => true,
            (Some(a), Some(b)) => a.same(b),
            _ => false,
        }
    }

    fn hash_into(&self, state: &mut dyn Hasher) {
        match self {
            None => state.write_u8(0),
            Some(v) => {
                state.write_u8(1);
                v.hash_into(state);
            }
        }
    }
}

impl<T: FieldType> FieldType for Vec<T> {
    fn data_type() -> DataType {
        T::data_type().collection()
    }

    fn to_value(&self) -> Value {
        Value::List(self.iter().map(T::to_value).collect())
    }

    fn from_value(value: Value) -> Result<Self, TypeMismatch> {
        match value {
            Value::List(items) => items
                .into_iter()
                .map(T::from_value)
                .collect::<Result<_, _>>()
                .map_err(|inner| TypeMismatch {
                    expected: Self::data_type(),
                    found: format!("list containing {}", inner.found),
                }),
            other => Err(mismatch::<Self>(&other)),
        }
    }

    fn same(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other).all(|(a, b)| a.same(b))
    }

    fn hash_into(&self, state: &mut dyn Hasher) {
        state.write_usize(self.len());
        for item in self {
            item.hash_into(state);
        }
    }
}

impl<T: FieldType> NonNullable for Vec<T> {}
