// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Structs whose mutable fields are live properties.

use core::any::Any;
use core::fmt;
use std::sync::Arc;

use understory_reactive::{
    AtomicProperty, DerivedProperty, MutableProperty, Property, PropertyExt, Upstream,
};

use crate::builder::StructBuilder;
use crate::error::StructError;
use crate::field::MutField;
use crate::field_set::FieldSet;
use crate::field_type::FieldType;
use crate::schema::Schema;
use crate::structs::{PartialStruct, Struct, StructSnapshot, debug_struct};
use crate::value::ErasedValue;

/// Type-erased view of the property behind a mutable field.
pub(crate) trait LiveField: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn current(&self) -> ErasedValue;
    fn upstream(&self) -> Arc<dyn Upstream>;
}

impl<T: FieldType> LiveField for Arc<AtomicProperty<T>> {
    fn as_any(&self) -> &dyn Any {
        &**self
    }

    fn current(&self) -> ErasedValue {
        ErasedValue::new(self.value())
    }

    fn upstream(&self) -> Arc<dyn Upstream> {
        PropertyExt::upstream(self)
    }
}

pub(crate) fn observe<T: FieldType>(value: &ErasedValue) -> Option<Box<dyn LiveField>> {
    let value = value.downcast_ref::<T>()?.clone();
    Some(Box::new(Arc::new(AtomicProperty::new(value))))
}

enum Slot {
    Fixed(ErasedValue),
    Live(Box<dyn LiveField>),
}

/// A full struct whose mutable fields can change and be observed.
///
/// Each mutable field is backed by its own [`AtomicProperty`]; immutable
/// fields are stored as in a [`StructSnapshot`]. Writes to different fields
/// are independent: there is no atomicity across fields, and a
/// [`snapshot`](Self::snapshot) taken during concurrent writes may mix old
/// and new values.
///
/// ```rust
/// use std::sync::{Arc, Mutex};
/// use understory_schema::{ObservableStruct, SchemaBuilder, Struct};
/// use understory_reactive::SyncProperty;
///
/// let mut builder = SchemaBuilder::new("Counter");
/// let label = builder.immutable::<String>("label");
/// let count = builder.mutable_with_default("count", 0_i64);
/// let schema = builder.finish();
///
/// let initial = schema.build(|b| { b.set(label, "clicks".into()); }).unwrap();
/// let live = ObservableStruct::new(&initial);
///
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = seen.clone();
/// live.prop(count).add_change_listener(move |old: &i64, new: &i64| {
///     sink.lock().unwrap().push((*old, *new));
/// });
///
/// live.set(count, 1);
/// live.set(count, 1);
/// live.set(count, 2);
/// assert_eq!(*seen.lock().unwrap(), [(0, 1), (1, 2)]);
/// assert_eq!(live.get(count), 2);
/// assert_eq!(initial.get(count), 0);
/// ```
pub struct ObservableStruct {
    schema: Arc<Schema>,
    slots: Box<[Slot]>,
}

impl ObservableStruct {
    /// Creates a live copy of `source`.
    #[must_use]
    pub fn new(source: &StructSnapshot) -> Self {
        let schema = source.schema().clone();
        let slots = schema
            .fields()
            .iter()
            .zip(source.values())
            .map(|(def, value)| {
                let live = if def.is_mutable() {
                    def.observe(value)
                } else {
                    None
                };
                live.map_or_else(|| Slot::Fixed(value.clone()), Slot::Live)
            })
            .collect();
        tracing::trace!(
            schema = schema.name(),
            live = schema.mutable_fields().len(),
            "observable struct created"
        );
        Self { schema, slots }
    }

    /// Creates a live struct from a partial one, filling absent fields from
    /// their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`StructError::MissingField`] for the first absent field
    /// without a default.
    pub fn from_partial(source: &impl PartialStruct) -> Result<Self, StructError> {
        StructBuilder::seeded(source).build().map(|full| Self::new(&full))
    }

    /// The property backing a mutable field, if the handle belongs to this
    /// struct's schema.
    #[must_use]
    pub fn try_prop<T: FieldType>(&self, field: MutField<T>) -> Option<&AtomicProperty<T>> {
        let ordinal = self.schema.check(field).ok()?;
        match self.slots.get(usize::from(ordinal))? {
            Slot::Live(live) => live.as_any().downcast_ref(),
            Slot::Fixed(_) => None,
        }
    }

    /// The property backing a mutable field.
    ///
    /// # Panics
    ///
    /// Panics if the handle belongs to another schema.
    #[must_use]
    pub fn prop<T: FieldType>(&self, field: MutField<T>) -> &AtomicProperty<T> {
        match self.try_prop(field) {
            Some(prop) => prop,
            None => panic!(
                "field handle does not belong to {}",
                self.schema.name()
            ),
        }
    }

    /// Writes a mutable field, notifying its listeners if the value changed.
    ///
    /// # Panics
    ///
    /// Panics if the handle belongs to another schema.
    pub fn set<T: FieldType>(&self, field: MutField<T>, value: T) {
        self.prop(field).set(value);
    }

    /// Writes a mutable field if it currently equals `expected`.
    ///
    /// # Panics
    ///
    /// Panics if the handle belongs to another schema.
    pub fn compare_and_set<T: FieldType>(&self, field: MutField<T>, expected: &T, new: T) -> bool {
        self.prop(field).compare_and_set(expected, new)
    }

    /// Fields backed by a live property.
    #[must_use]
    pub fn live_fields(&self) -> FieldSet {
        self.schema
            .fields()
            .iter()
            .zip(self.slots.iter())
            .filter(|(_, slot)| matches!(slot, Slot::Live(_)))
            .map(|(def, _)| def)
            .collect()
    }

    /// The current values, as an immutable snapshot.
    #[must_use]
    pub fn snapshot(&self) -> StructSnapshot {
        let values = self.slots.iter().map(Slot::current).collect();
        StructSnapshot::from_parts(self.schema.clone(), values)
    }

    /// A property holding [`snapshot`](Self::snapshot), updated after every
    /// change of a mutable field.
    ///
    /// Each field write produces its own transition. A snapshot may already
    /// include writes to other fields whose own transitions come later.
    #[must_use]
    pub fn snapshots(self: &Arc<Self>) -> Arc<DerivedProperty<StructSnapshot>> {
        let upstreams = self
            .slots
            .iter()
            .filter_map(|slot| match slot {
                Slot::Live(live) => Some(live.upstream()),
                Slot::Fixed(_) => None,
            })
            .collect();
        let this = Arc::clone(self);
        DerivedProperty::new(upstreams, move || this.snapshot())
    }
}

impl Slot {
    fn current(&self) -> ErasedValue {
        match self {
            Self::Fixed(value) => value.clone(),
            Self::Live(live) => live.current(),
        }
    }
}

impl PartialStruct for ObservableStruct {
    #[inline]
    fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    #[inline]
    fn fields(&self) -> FieldSet {
        self.schema.all_fields()
    }

    fn value_at(&self, ordinal: u8) -> Option<ErasedValue> {
        self.slots.get(usize::from(ordinal)).map(Slot::current)
    }
}

impl Struct for ObservableStruct {}

impl fmt::Debug for ObservableStruct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_struct(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Field;
    use crate::schema::SchemaBuilder;
    use std::sync::Mutex;
    use understory_reactive::SyncProperty;

    struct Account {
        schema: Arc<Schema>,
        owner: Field<String>,
        balance: MutField<i64>,
        note: MutField<Option<String>>,
    }

    fn account() -> Account {
        let mut builder = SchemaBuilder::new("Account");
        let owner = builder.immutable("owner");
        let balance = builder.mutable_with_default("balance", 0);
        let note = builder.mutable_with_default("note", None);
        Account {
            schema: builder.finish(),
            owner,
            balance,
            note,
        }
    }

    fn opened(a: &Account) -> StructSnapshot {
        a.schema
            .build(|b| {
                b.set(a.owner, "ada".into()).set(a.balance, 10);
            })
            .unwrap()
    }

    #[test]
    fn mutable_fields_are_live() {
        let a = account();
        let live = ObservableStruct::new(&opened(&a));
        assert_eq!(live.live_fields(), a.balance + a.note);
        assert_eq!(live.get(a.owner), "ada");
        assert_eq!(live.prop(a.balance).value(), 10);
    }

    #[test]
    fn listeners_see_field_writes() {
        let a = account();
        let live = ObservableStruct::new(&opened(&a));
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        live.prop(a.balance).add_change_listener(move |old: &i64, new: &i64| {
            sink.lock().unwrap().push((*old, *new));
        });

        live.set(a.balance, 15);
        assert!(!live.compare_and_set(a.balance, &10, 20));
        assert!(live.compare_and_set(a.balance, &15, 20));
        live.set(a.note, Some("raise".into()));

        assert_eq!(*log.lock().unwrap(), [(10, 15), (15, 20)]);
        assert_eq!(live.get(a.note), Some("raise".to_owned()));
    }

    #[test]
    fn snapshot_is_detached() {
        let a = account();
        let source = opened(&a);
        let live = ObservableStruct::new(&source);
        live.set(a.balance, 99);
        let snap = live.snapshot();
        live.set(a.balance, 100);

        assert_eq!(snap.get(a.balance), 99);
        assert_eq!(source.get(a.balance), 10);
        assert_eq!(snap.take(FieldSet::of(a.owner)), source.take(FieldSet::of(a.owner)));
        assert_eq!(
            format!("{live:?}"),
            r#"Account(owner="ada", balance=100, note=None)"#
        );
    }

    #[test]
    fn from_partial_fills_defaults() {
        let a = account();
        let partial = a.schema.build_partial(|b| {
            b.set(a.owner, "grace".into());
        });
        let live = ObservableStruct::from_partial(&partial).unwrap();
        assert_eq!(live.get(a.balance), 0);

        let empty = a.schema.build_partial(|_| {});
        assert!(matches!(
            ObservableStruct::from_partial(&empty),
            Err(StructError::MissingField { .. })
        ));
    }

    #[test]
    fn foreign_handles() {
        let a = account();
        let b = account();
        let live = ObservableStruct::new(&opened(&a));
        assert!(live.try_prop(b.balance).is_none());
        assert!(live.try_prop(a.balance).is_some());
    }

    #[test]
    fn snapshots_track_field_writes() {
        let a = account();
        let source = opened(&a);
        let live = Arc::new(ObservableStruct::new(&source));
        let snapshots = live.snapshots();
        assert_eq!(snapshots.value(), source);

        let balance = a.balance;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        snapshots.add_change_listener(move |old: &StructSnapshot, new: &StructSnapshot| {
            sink.lock().unwrap().push((old.get(balance), new.get(balance)));
        });

        live.set(a.balance, 11);
        live.set(a.balance, 11);
        live.set(a.note, Some("memo".into()));
        live.set(a.balance, 12);

        assert_eq!(*seen.lock().unwrap(), [(10, 11), (11, 11), (11, 12)]);
        assert_eq!(snapshots.value(), live.snapshot());
        assert_eq!(snapshots.value().get(a.note), Some("memo".to_owned()));
    }

    #[test]
    fn snapshots_of_struct_without_mutable_fields_never_change() {
        let mut builder = SchemaBuilder::new("Tag");
        let label = builder.immutable::<String>("label");
        let schema = builder.finish();
        let tag = schema
            .build(|b| {
                b.set(label, "x".into());
            })
            .unwrap();
        let snapshots = Arc::new(ObservableStruct::new(&tag)).snapshots();
        assert!(!snapshots.may_change());
        assert_eq!(snapshots.value(), tag);
    }

    #[test]
    #[should_panic(expected = "does not belong to Account")]
    fn set_with_foreign_handle_panics() {
        let a = account();
        let b = account();
        ObservableStruct::new(&opened(&a)).set(b.balance, 1);
    }
}
