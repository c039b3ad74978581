// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Schemas and their builder.

use core::fmt;
use std::sync::Arc;

use hashbrown::HashMap;

use crate::builder::StructBuilder;
use crate::error::StructError;
use crate::field::{Field, FieldDef, FieldKey, MutField, Mutability, SchemaId};
use crate::field_set::FieldSet;
use crate::field_type::FieldType;
use crate::structs::{PartialSnapshot, StructSnapshot};

/// Maximum number of fields in a schema.
pub const MAX_FIELDS: usize = 64;

/// Declares the fields of a [`Schema`].
///
/// Ordinals are assigned `0..` in declaration order. Each declaration
/// returns a typed handle used to read and write the field.
///
/// # Panics
///
/// Declaring a duplicate name or a 65th field panics, as does finishing a
/// schema without fields.
///
/// # Example
///
/// ```rust
/// use understory_schema::{PartialStruct, SchemaBuilder, Struct};
///
/// let mut builder = SchemaBuilder::new("Person");
/// let name = builder.immutable::<String>("name");
/// let age = builder.mutable_with_default("age", 0_i32);
/// let person = builder.finish();
///
/// let ada = person.build(|b| {
///     b.set(name, "Ada".into());
/// })
/// .unwrap();
/// assert_eq!(ada.get(name), "Ada");
/// assert_eq!(ada.get(age), 0);
/// assert_eq!(format!("{ada:?}"), r#"Person(name="Ada", age=0)"#);
/// ```
pub struct SchemaBuilder {
    id: SchemaId,
    name: String,
    fields: Vec<FieldDef>,
    by_name: HashMap<String, u8>,
}

impl SchemaBuilder {
    /// Starts a schema.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: SchemaId::next(),
            name: name.into(),
            fields: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Declares an immutable field that must be set when building.
    pub fn immutable<T: FieldType>(&mut self, name: &str) -> Field<T> {
        Field::new(self.id, self.declare::<T>(name, Mutability::Immutable, None))
    }

    /// Declares an immutable field with a default.
    pub fn immutable_with_default<T: FieldType>(&mut self, name: &str, default: T) -> Field<T> {
        Field::new(
            self.id,
            self.declare(name, Mutability::Immutable, Some(default)),
        )
    }

    /// Declares a mutable field that must be set when building.
    pub fn mutable<T: FieldType>(&mut self, name: &str) -> MutField<T> {
        MutField::new(self.id, self.declare::<T>(name, Mutability::Mutable, None))
    }

    /// Declares a mutable field with a default.
    pub fn mutable_with_default<T: FieldType>(&mut self, name: &str, default: T) -> MutField<T> {
        MutField::new(self.id, self.declare(name, Mutability::Mutable, Some(default)))
    }

    fn declare<T: FieldType>(&mut self, name: &str, mutability: Mutability, default: Option<T>) -> u8 {
        assert!(
            self.fields.len() < MAX_FIELDS,
            "schema `{}` cannot hold more than {MAX_FIELDS} fields",
            self.name
        );
        assert!(
            !self.by_name.contains_key(name),
            "schema `{}` already has a field named `{name}`",
            self.name
        );
        #[expect(clippy::cast_possible_truncation, reason = "len < MAX_FIELDS")]
        let ordinal = self.fields.len() as u8;
        self.by_name.insert(name.to_owned(), ordinal);
        self.fields
            .push(FieldDef::new(self.id, name.to_owned(), ordinal, mutability, default));
        ordinal
    }

    /// Freezes the schema.
    ///
    /// # Panics
    ///
    /// Panics if no fields were declared.
    #[must_use]
    pub fn finish(self) -> Arc<Schema> {
        assert!(
            !self.fields.is_empty(),
            "schema `{}` declares no fields",
            self.name
        );
        let schema = Schema {
            id: self.id,
            all: FieldSet::first(self.fields.len()),
            mutable: self
                .fields
                .iter()
                .filter(|def| def.is_mutable())
                .collect(),
            name: self.name,
            fields: self.fields.into_boxed_slice(),
            by_name: self.by_name,
        };
        tracing::debug!(
            schema = %schema.name,
            fields = schema.fields.len(),
            mutable = schema.mutable.len(),
            "schema finished"
        );
        Arc::new(schema)
    }
}

impl fmt::Debug for SchemaBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaBuilder")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

/// An immutable list of typed, named fields.
///
/// Schemas are shared as `Arc<Schema>`; a common pattern is a `static`
/// `LazyLock` holding the schema next to its field handles.
pub struct Schema {
    id: SchemaId,
    name: String,
    fields: Box<[FieldDef]>,
    by_name: HashMap<String, u8>,
    all: FieldSet,
    mutable: FieldSet,
}

impl Schema {
    /// Identity of this schema.
    #[must_use]
    #[inline]
    pub fn id(&self) -> SchemaId {
        self.id
    }

    /// Schema name.
    #[must_use]
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All field declarations, by ordinal.
    #[must_use]
    #[inline]
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Number of fields.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Always `false`; a schema has at least one field.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The field with the given ordinal.
    #[must_use]
    #[inline]
    pub fn field(&self, ordinal: u8) -> Option<&FieldDef> {
        self.fields.get(usize::from(ordinal))
    }

    /// The field with the given name.
    #[must_use]
    pub fn field_by_name(&self, name: &str) -> Option<&FieldDef> {
        self.by_name.get(name).and_then(|&ordinal| self.field(ordinal))
    }

    /// Like [`Schema::field_by_name`], as a [`Result`].
    ///
    /// # Errors
    ///
    /// Returns [`StructError::UnknownField`] if no field has this name.
    pub fn lookup(&self, name: &str) -> Result<&FieldDef, StructError> {
        self.field_by_name(name)
            .ok_or_else(|| StructError::UnknownField {
                schema: self.name.clone(),
                name: name.to_owned(),
            })
    }

    /// The declaration behind a handle, if the handle belongs to this schema.
    #[must_use]
    pub fn def(&self, field: impl FieldKey) -> Option<&FieldDef> {
        if self.owns(&field) {
            self.field(field.ordinal())
        } else {
            None
        }
    }

    /// Returns `true` if the handle was issued by this schema.
    #[must_use]
    #[inline]
    pub fn owns(&self, field: impl FieldKey) -> bool {
        field.schema_id() == self.id
    }

    pub(crate) fn check(&self, field: impl FieldKey) -> Result<u8, StructError> {
        if self.owns(&field) {
            Ok(field.ordinal())
        } else {
            Err(StructError::ForeignField {
                schema: self.name.clone(),
            })
        }
    }

    /// Every field.
    #[must_use]
    #[inline]
    pub fn all_fields(&self) -> FieldSet {
        self.all
    }

    /// Fields declared mutable.
    #[must_use]
    #[inline]
    pub fn mutable_fields(&self) -> FieldSet {
        self.mutable
    }

    /// Fields declared immutable.
    #[must_use]
    #[inline]
    pub fn immutable_fields(&self) -> FieldSet {
        self.all - self.mutable
    }

    /// Fields whose declaration satisfies `pred`.
    #[must_use]
    pub fn fields_where(&self, mut pred: impl FnMut(&FieldDef) -> bool) -> FieldSet {
        self.fields.iter().filter(|&def| pred(def)).collect()
    }

    /// Calls `f` for each member of `set`, in ordinal order.
    pub fn for_each(&self, set: FieldSet, mut f: impl FnMut(&FieldDef)) {
        self.for_each_indexed(set, |_, def| f(def));
    }

    /// Calls `f` with the packed index and declaration of each member of
    /// `set`, in ordinal order.
    pub fn for_each_indexed(&self, set: FieldSet, mut f: impl FnMut(usize, &FieldDef)) {
        for (index, ordinal) in (set & self.all).iter().enumerate() {
            if let Some(def) = self.field(ordinal) {
                f(index, def);
            }
        }
    }

    /// The only member of `set`, if it has exactly one.
    #[must_use]
    pub fn single(&self, set: FieldSet) -> Option<&FieldDef> {
        let set = set & self.all;
        if set.len() == 1 {
            set.iter().next().and_then(|ordinal| self.field(ordinal))
        } else {
            None
        }
    }

    /// Names of the members of `set`, as `[a, b]`.
    #[must_use]
    pub fn describe(&self, set: FieldSet) -> String {
        let names: Vec<&str> = (set & self.all)
            .iter()
            .filter_map(|ordinal| self.field(ordinal))
            .map(FieldDef::name)
            .collect();
        format!("[{}]", names.join(", "))
    }

    /// Starts a struct of this schema.
    #[must_use]
    pub fn builder(self: &Arc<Self>) -> StructBuilder {
        StructBuilder::new(self.clone())
    }

    /// Builds a full struct.
    ///
    /// # Errors
    ///
    /// Returns [`StructError::MissingField`] if `init` leaves a field without
    /// a default unset.
    pub fn build(
        self: &Arc<Self>,
        init: impl FnOnce(&mut StructBuilder),
    ) -> Result<StructSnapshot, StructError> {
        let mut builder = self.builder();
        init(&mut builder);
        builder.build()
    }

    /// Builds a partial struct holding whatever `init` sets.
    #[must_use]
    pub fn build_partial(self: &Arc<Self>, init: impl FnOnce(&mut StructBuilder)) -> PartialSnapshot {
        let mut builder = self.builder();
        init(&mut builder);
        builder.build_partial()
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}
