// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Struct traits and immutable snapshots.
//!
//! [`PartialStruct`] is the read surface shared by every struct: a schema,
//! the set of fields present, and a value per present field. [`Struct`]
//! marks the full ones, for which reading a field cannot fail.
//!
//! Equality, hashing and `Debug` for the snapshot types are structural: two
//! structs are equal when they share a schema and a field set and every
//! value is deeply equal.

use core::fmt;
use core::hash::{Hash, Hasher};
use std::sync::Arc;

use smallvec::SmallVec;

use crate::builder::StructBuilder;
use crate::error::StructError;
use crate::field::{FieldDef, FieldKey, TypedField};
use crate::field_set::FieldSet;
use crate::field_type::FieldType;
use crate::kind::Value;
use crate::schema::Schema;
use crate::value::ErasedValue;

/// Read access to a struct that may hold only some of its schema's fields.
pub trait PartialStruct {
    /// The struct's schema.
    fn schema(&self) -> &Arc<Schema>;

    /// The fields that hold a value.
    fn fields(&self) -> FieldSet;

    /// The value of the field with this ordinal, if present.
    fn value_at(&self, ordinal: u8) -> Option<ErasedValue>;

    /// Reads a field.
    ///
    /// # Errors
    ///
    /// - [`StructError::ForeignField`] if the handle belongs to another schema.
    /// - [`StructError::FieldAbsent`] if the field holds no value.
    fn try_get<T: FieldType>(&self, field: impl TypedField<T>) -> Result<T, StructError> {
        let schema = self.schema();
        let ordinal = schema.check(field)?;
        let def = schema.field(ordinal).ok_or_else(|| StructError::ForeignField {
            schema: schema.name().to_owned(),
        })?;
        let value = self.value_at(ordinal).ok_or_else(|| StructError::FieldAbsent {
            schema: schema.name().to_owned(),
            field: def.name().to_owned(),
        })?;
        value
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| StructError::WrongType {
                field: def.name().to_owned(),
                expected: T::data_type(),
                found: def.data_type().to_string(),
            })
    }

    /// Reads a field, or returns `default` if it cannot be read.
    fn get_or<T: FieldType>(&self, field: impl TypedField<T>, default: T) -> T {
        self.try_get(field).unwrap_or(default)
    }

    /// Reads a field, or computes a fallback if it cannot be read.
    fn get_or_else<T: FieldType>(&self, field: impl TypedField<T>, f: impl FnOnce() -> T) -> T {
        self.try_get(field).unwrap_or_else(|_| f())
    }

    /// Encodes a field's value, if the field belongs to this schema and is
    /// present.
    fn value_of(&self, field: impl FieldKey) -> Option<Value> {
        let ordinal = self.schema().check(field).ok()?;
        self.value_at(ordinal).map(|value| value.to_value())
    }

    /// Copies the given fields that are present into a partial snapshot.
    fn take(&self, fields: FieldSet) -> PartialSnapshot {
        let fields = fields & self.fields();
        let values = fields
            .iter()
            .filter_map(|ordinal| self.value_at(ordinal))
            .collect();
        PartialSnapshot::from_parts(self.schema().clone(), fields, values)
    }
}

/// A struct that holds every field of its schema.
pub trait Struct: PartialStruct {
    /// Reads a field.
    ///
    /// # Panics
    ///
    /// Panics if the handle belongs to another schema.
    fn get<T: FieldType>(&self, field: impl TypedField<T>) -> T {
        match self.try_get(field) {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }
}

/// An immutable struct holding every field.
///
/// Created by [`StructBuilder::build`] or [`Schema::build`].
#[derive(Clone)]
pub struct StructSnapshot {
    schema: Arc<Schema>,
    values: Box<[ErasedValue]>,
}

impl StructSnapshot {
    pub(crate) fn from_parts(schema: Arc<Schema>, values: Box<[ErasedValue]>) -> Self {
        debug_assert_eq!(schema.len(), values.len(), "one value per field");
        Self { schema, values }
    }

    /// Creates a modified copy.
    ///
    /// `edit` receives a builder seeded with this struct's values. Values it
    /// does not replace are shared with `self`.
    #[must_use]
    pub fn copy(&self, edit: impl FnOnce(&mut StructBuilder)) -> Self {
        let mut builder = StructBuilder::seeded(self);
        edit(&mut builder);
        builder.build_over(self)
    }

    /// The stored value of a field, without cloning it out.
    #[must_use]
    pub fn erased(&self, field: impl FieldKey) -> Option<&ErasedValue> {
        let ordinal = self.schema.check(field).ok()?;
        self.values.get(usize::from(ordinal))
    }

    /// Values in ordinal order.
    #[must_use]
    #[inline]
    pub fn values(&self) -> &[ErasedValue] {
        &self.values
    }
}

impl PartialStruct for StructSnapshot {
    #[inline]
    fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    #[inline]
    fn fields(&self) -> FieldSet {
        self.schema.all_fields()
    }

    fn value_at(&self, ordinal: u8) -> Option<ErasedValue> {
        self.values.get(usize::from(ordinal)).cloned()
    }
}

impl Struct for StructSnapshot {}

/// An immutable struct holding a subset of its schema's fields.
///
/// Values are packed in ordinal order; the value of a field lives at
/// [`FieldSet::index_of`] within [`PartialStruct::fields`].
#[derive(Clone)]
pub struct PartialSnapshot {
    schema: Arc<Schema>,
    fields: FieldSet,
    values: SmallVec<[ErasedValue; 4]>,
}

impl PartialSnapshot {
    pub(crate) fn from_parts(
        schema: Arc<Schema>,
        fields: FieldSet,
        values: SmallVec<[ErasedValue; 4]>,
    ) -> Self {
        debug_assert_eq!(fields.len(), values.len(), "one value per present field");
        Self {
            schema,
            fields,
            values,
        }
    }

    /// Creates a modified copy; see [`StructSnapshot::copy`].
    #[must_use]
    pub fn copy(&self, edit: impl FnOnce(&mut StructBuilder)) -> Self {
        let mut builder = StructBuilder::seeded(self);
        edit(&mut builder);
        builder.build_partial()
    }

    /// Fills absent fields from their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`StructError::MissingField`] for the first absent field
    /// without a default.
    pub fn complete(&self) -> Result<StructSnapshot, StructError> {
        StructBuilder::seeded(self).build()
    }

    /// Returns `true` if every field of the schema is present.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.fields == self.schema.all_fields()
    }
}

impl PartialStruct for PartialSnapshot {
    #[inline]
    fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    #[inline]
    fn fields(&self) -> FieldSet {
        self.fields
    }

    fn value_at(&self, ordinal: u8) -> Option<ErasedValue> {
        self.fields
            .index_of_ordinal(ordinal)
            .and_then(|index| self.values.get(index))
            .cloned()
    }
}

pub(crate) fn structs_eq(a: &impl PartialStruct, b: &impl PartialStruct) -> bool {
    a.schema().id() == b.schema().id()
        && a.fields() == b.fields()
        && a.fields()
            .iter()
            .all(|ordinal| a.value_at(ordinal) == b.value_at(ordinal))
}

pub(crate) fn hash_struct<H: Hasher>(s: &impl PartialStruct, state: &mut H) {
    s.schema().id().hash(state);
    s.fields().hash(state);
    for ordinal in s.fields() {
        s.value_at(ordinal).hash(state);
    }
}

/// Writes `Name(a=1, b=2)` for full structs and `Name{a=1}` for partial ones.
pub(crate) fn debug_struct(s: &impl PartialStruct, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let schema = s.schema();
    let (open, close) = if s.fields() == schema.all_fields() {
        ('(', ')')
    } else {
        ('{', '}')
    };
    write!(f, "{}{open}", schema.name())?;
    for (index, ordinal) in s.fields().iter().enumerate() {
        if index > 0 {
            f.write_str(", ")?;
        }
        let name = schema.field(ordinal).map_or("?", FieldDef::name);
        match s.value_at(ordinal) {
            Some(value) => write!(f, "{name}={value:?}")?,
            None => write!(f, "{name}=?")?,
        }
    }
    write!(f, "{close}")
}

macro_rules! structural_traits {
    ($($ty:ty),*) => {
        $(
            impl Eq for $ty {}

            impl Hash for $ty {
                fn hash<H: Hasher>(&self, state: &mut H) {
                    hash_struct(self, state);
                }
            }

            impl fmt::Debug for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    debug_struct(self, f)
                }
            }
        )*
    };
}

structural_traits!(StructSnapshot, PartialSnapshot);

macro_rules! structural_eq {
    ($(($a:ty, $b:ty)),*) => {
        $(
            impl PartialEq<$b> for $a {
                fn eq(&self, other: &$b) -> bool {
                    structs_eq(self, other)
                }
            }
        )*
    };
}

structural_eq!(
    (StructSnapshot, StructSnapshot),
    (PartialSnapshot, PartialSnapshot),
    (StructSnapshot, PartialSnapshot),
    (PartialSnapshot, StructSnapshot)
);
