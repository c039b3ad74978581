// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Mutable staging area for struct snapshots.

use core::fmt;
use std::sync::Arc;

use crate::error::StructError;
use crate::field::{FieldKey, TypedField};
use crate::field_set::FieldSet;
use crate::field_type::FieldType;
use crate::kind::Value;
use crate::schema::Schema;
use crate::structs::{PartialSnapshot, PartialStruct, StructSnapshot};
use crate::value::ErasedValue;

/// Collects field values and produces [`StructSnapshot`]s or
/// [`PartialSnapshot`]s.
///
/// Typed writes go through field handles; codecs can instead write
/// dynamically typed [`Value`]s by field name with
/// [`StructBuilder::set_value`].
///
/// ```rust
/// use understory_schema::{SchemaBuilder, Struct, StructError, Value};
///
/// let mut builder = SchemaBuilder::new("Point");
/// let x = builder.immutable::<i32>("x");
/// let y = builder.immutable_with_default("y", 0_i32);
/// let point = builder.finish();
///
/// let mut b = point.builder();
/// b.set_value("x", Value::I32(3)).unwrap();
/// let p = b.build().unwrap();
/// assert_eq!((p.get(x), p.get(y)), (3, 0));
///
/// assert!(matches!(
///     point.builder().set_value("x", Value::Str("3".into())),
///     Err(StructError::WrongType { .. })
/// ));
/// assert!(matches!(point.builder().build(), Err(StructError::MissingField { .. })));
/// ```
pub struct StructBuilder {
    schema: Arc<Schema>,
    values: Vec<Option<ErasedValue>>,
}

impl StructBuilder {
    /// Starts an empty struct of `schema`.
    #[must_use]
    pub fn new(schema: Arc<Schema>) -> Self {
        let values = vec![None; schema.len()];
        Self { schema, values }
    }

    /// Starts from the values present in `source`.
    #[must_use]
    pub fn seeded(source: &impl PartialStruct) -> Self {
        let mut builder = Self::new(source.schema().clone());
        for ordinal in source.fields() {
            if let Some(slot) = builder.values.get_mut(usize::from(ordinal)) {
                *slot = source.value_at(ordinal);
            }
        }
        builder
    }

    /// The schema being built.
    #[must_use]
    #[inline]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Sets a field.
    ///
    /// # Panics
    ///
    /// Panics if the handle belongs to another schema.
    pub fn set<T: FieldType>(&mut self, field: impl TypedField<T>, value: T) -> &mut Self {
        let ordinal = match self.schema.check(field) {
            Ok(ordinal) => ordinal,
            Err(err) => panic!("{err}"),
        };
        self.values[usize::from(ordinal)] = Some(ErasedValue::new(value));
        self
    }

    /// Clears a field.
    pub fn unset<T: FieldType>(&mut self, field: impl TypedField<T>) -> &mut Self {
        if let Ok(ordinal) = self.schema.check(field) {
            self.values[usize::from(ordinal)] = None;
        }
        self
    }

    /// The value set for a field so far.
    #[must_use]
    pub fn get<T: FieldType>(&self, field: impl TypedField<T>) -> Option<&T> {
        let ordinal = self.schema.check(field).ok()?;
        self.values
            .get(usize::from(ordinal))?
            .as_ref()?
            .downcast_ref()
    }

    /// Sets a field by name from a dynamically typed value.
    ///
    /// # Errors
    ///
    /// - [`StructError::UnknownField`] if the schema has no such field.
    /// - [`StructError::WrongType`] if `value` does not match the field's
    ///   declared type. The builder is unchanged in that case.
    pub fn set_value(&mut self, name: &str, value: Value) -> Result<&mut Self, StructError> {
        let def = self.schema.lookup(name)?;
        let ordinal = usize::from(def.ordinal());
        let decoded = def.decode(value)?;
        self.values[ordinal] = Some(decoded);
        Ok(self)
    }

    /// Copies `fields` from `source`, returning the fields actually copied.
    ///
    /// Within one schema fields are matched by ordinal. Across schemas a
    /// field is copied when the target has a field of the same name and
    /// declared type.
    pub fn set_from(&mut self, source: &impl PartialStruct, fields: FieldSet) -> FieldSet {
        let same_schema = source.schema().id() == self.schema.id();
        let mut copied = FieldSet::EMPTY;
        for ordinal in fields & source.fields() {
            let target = if same_schema {
                self.schema.field(ordinal)
            } else {
                source.schema().field(ordinal).and_then(|def| {
                    self.schema
                        .field_by_name(def.name())
                        .filter(|target| target.data_type() == def.data_type())
                })
            };
            let Some(target) = target else { continue };
            let Some(value) = source.value_at(ordinal) else {
                continue;
            };
            self.values[usize::from(target.ordinal())] = Some(value);
            copied = copied + target;
        }
        copied
    }

    /// Fields that currently hold a value.
    #[must_use]
    pub fn fields_present(&self) -> FieldSet {
        self.schema
            .fields()
            .iter()
            .zip(&self.values)
            .filter(|(_, value)| value.is_some())
            .map(|(def, _)| def)
            .collect()
    }

    /// Builds a full struct, filling unset fields from their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`StructError::MissingField`] for the first unset field
    /// without a default.
    pub fn build(&self) -> Result<StructSnapshot, StructError> {
        let values: Box<[ErasedValue]> = self
            .schema
            .fields()
            .iter()
            .zip(&self.values)
            .map(|(def, value)| {
                value
                    .as_ref()
                    .or(def.default_value())
                    .cloned()
                    .ok_or_else(|| StructError::MissingField {
                        schema: self.schema.name().to_owned(),
                        field: def.name().to_owned(),
                    })
            })
            .collect::<Result<_, _>>()?;
        Ok(StructSnapshot::from_parts(self.schema.clone(), values))
    }

    /// Builds a partial struct of the fields that hold a value.
    #[must_use]
    pub fn build_partial(&self) -> PartialSnapshot {
        PartialSnapshot::from_parts(
            self.schema.clone(),
            self.fields_present(),
            self.values.iter().flatten().cloned().collect(),
        )
    }

    /// Builds a full struct, taking unset fields from `base`.
    pub(crate) fn build_over(&self, base: &StructSnapshot) -> StructSnapshot {
        let values: Box<[ErasedValue]> = self
            .values
            .iter()
            .zip(base.values())
            .map(|(value, original)| value.as_ref().unwrap_or(original).clone())
            .collect();
        StructSnapshot::from_parts(self.schema.clone(), values)
    }
}

impl fmt::Debug for StructBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructBuilder")
            .field("schema", &self.schema.name())
            .field("present", &self.schema.describe(self.fields_present()))
            .finish_non_exhaustive()
    }
}
