// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Field identification types.
//!
//! A [`Schema`](crate::Schema) hands out typed handles when its fields are
//! declared: [`Field<T>`] for immutable fields and [`MutField<T>`] for fields
//! that may be observed and changed on an
//! [`ObservableStruct`](crate::ObservableStruct). Both are `Copy` and carry the
//! schema identity plus the field's ordinal; the phantom `T` ties reads and
//! writes to the declared type at compile time.

use core::fmt;
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::error::TypeMismatch;
use crate::field_type::FieldType;
use crate::kind::{DataType, Value};
use crate::value::ErasedValue;

/// Identity of a finished [`Schema`](crate::Schema).
///
/// Distinct schemas never share an id, even when they have the same name.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct SchemaId(u32);

impl SchemaId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU32 = AtomicU32::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Debug for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SchemaId").field(&self.0).finish()
    }
}

/// Anything that names one field of one schema.
pub trait FieldKey {
    /// The schema the field belongs to.
    fn schema_id(&self) -> SchemaId;

    /// Position of the field in declaration order, `0..64`.
    fn ordinal(&self) -> u8;
}

impl<K: FieldKey + ?Sized> FieldKey for &K {
    #[inline]
    fn schema_id(&self) -> SchemaId {
        (**self).schema_id()
    }

    #[inline]
    fn ordinal(&self) -> u8 {
        (**self).ordinal()
    }
}

/// A field handle that knows the Rust type of its values.
pub trait TypedField<T: FieldType>: FieldKey + Copy {}

/// Whether a field may change after its struct is built.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Mutability {
    /// Fixed for the lifetime of a struct.
    Immutable,
    /// Backed by a live property on an observable struct.
    Mutable,
}

macro_rules! field_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        pub struct $name<T> {
            schema: SchemaId,
            ordinal: u8,
            _marker: PhantomData<fn() -> T>,
        }

        impl<T> $name<T> {
            pub(crate) const fn new(schema: SchemaId, ordinal: u8) -> Self {
                Self {
                    schema,
                    ordinal,
                    _marker: PhantomData,
                }
            }
        }

        impl<T> FieldKey for $name<T> {
            #[inline]
            fn schema_id(&self) -> SchemaId {
                self.schema
            }

            #[inline]
            fn ordinal(&self) -> u8 {
                self.ordinal
            }
        }

        impl<T: FieldType> TypedField<T> for $name<T> {}

        impl<T> Copy for $name<T> {}

        impl<T> Clone for $name<T> {
            #[inline]
            fn clone(&self) -> Self {
                *self
            }
        }

        impl<T> PartialEq for $name<T> {
            #[inline]
            fn eq(&self, other: &Self) -> bool {
                self.schema == other.schema && self.ordinal == other.ordinal
            }
        }

        impl<T> Eq for $name<T> {}

        impl<T> Hash for $name<T> {
            #[inline]
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.schema.hash(state);
                self.ordinal.hash(state);
            }
        }

        impl<T> fmt::Debug for $name<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("schema", &self.schema)
                    .field("ordinal", &self.ordinal)
                    .field("type", &core::any::type_name::<T>())
                    .finish()
            }
        }
    };
}

field_handle! {
    /// Typed handle to an immutable field.
    Field
}

field_handle! {
    /// Typed handle to a mutable field.
    ///
    /// Reads work exactly like [`Field<T>`]; in addition the handle can address
    /// the live property of an [`ObservableStruct`](crate::ObservableStruct).
    MutField
}

impl<T> MutField<T> {
    /// The same field as a read-only handle.
    #[must_use]
    #[inline]
    pub const fn as_field(self) -> Field<T> {
        Field::new(self.schema, self.ordinal)
    }
}

impl<T> From<MutField<T>> for Field<T> {
    fn from(field: MutField<T>) -> Self {
        field.as_field()
    }
}

pub(crate) type Decode = fn(Value) -> Result<ErasedValue, TypeMismatch>;

#[cfg(feature = "reactive")]
pub(crate) type Observe = fn(&ErasedValue) -> Option<Box<dyn crate::observable::LiveField>>;

/// Declaration of one field.
pub struct FieldDef {
    schema: SchemaId,
    name: String,
    ordinal: u8,
    data_type: DataType,
    mutability: Mutability,
    default: Option<ErasedValue>,
    type_name: &'static str,
    decode: Decode,
    #[cfg(feature = "reactive")]
    observe: Observe,
}

impl FieldDef {
    pub(crate) fn new<T: FieldType>(
        schema: SchemaId,
        name: String,
        ordinal: u8,
        mutability: Mutability,
        default: Option<T>,
    ) -> Self {
        Self {
            schema,
            name,
            ordinal,
            data_type: T::data_type(),
            mutability,
            default: default.map(ErasedValue::new),
            type_name: core::any::type_name::<T>(),
            decode: |value| T::from_value(value).map(ErasedValue::new),
            #[cfg(feature = "reactive")]
            observe: crate::observable::observe::<T>,
        }
    }

    /// Field name, unique within its schema.
    #[must_use]
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared type.
    #[must_use]
    #[inline]
    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }

    /// Whether the field may change after build.
    #[must_use]
    #[inline]
    pub fn mutability(&self) -> Mutability {
        self.mutability
    }

    /// Returns `true` for [`Mutability::Mutable`] fields.
    #[must_use]
    #[inline]
    pub fn is_mutable(&self) -> bool {
        self.mutability == Mutability::Mutable
    }

    /// Value used when a builder leaves the field unset.
    #[must_use]
    #[inline]
    pub fn default_value(&self) -> Option<&ErasedValue> {
        self.default.as_ref()
    }

    /// Name of the Rust type behind the field.
    #[must_use]
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Decodes a dynamic value into this field's Rust type.
    ///
    /// # Errors
    ///
    /// Returns [`StructError::WrongType`](crate::StructError::WrongType) if
    /// the value does not match [`FieldDef::data_type`].
    pub fn decode(&self, value: Value) -> Result<ErasedValue, crate::StructError> {
        (self.decode)(value).map_err(|err| err.for_field(&self.name))
    }

    #[cfg(feature = "reactive")]
    pub(crate) fn observe(&self, value: &ErasedValue) -> Option<Box<dyn crate::observable::LiveField>> {
        (self.observe)(value)
    }
}

impl FieldKey for FieldDef {
    #[inline]
    fn schema_id(&self) -> SchemaId {
        self.schema
    }

    #[inline]
    fn ordinal(&self) -> u8 {
        self.ordinal
    }
}

impl fmt::Debug for FieldDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDef")
            .field("name", &self.name)
            .field("ordinal", &self.ordinal)
            .field("data_type", &self.data_type)
            .field("mutability", &self.mutability)
            .field("default", &self.default)
            .finish_non_exhaustive()
    }
}
