// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Understory Schema: typed schemas, field sets and struct snapshots.
//!
//! A [`Schema`] is an ordered list of named, typed fields declared once with
//! a [`SchemaBuilder`]. Declaring a field returns a typed handle
//! ([`Field<T>`] or [`MutField<T>`]) that is used for every later read and
//! write, so field access is checked at compile time and costs an index.
//!
//! ## Concepts
//!
//! - **Ordinals**: fields are numbered `0..` in declaration order, at most 64
//!   per schema.
//! - **[`FieldSet`]**: a 64-bit mask of ordinals. Handles combine with `+` and
//!   `-`, sets with `|`, `&` and `-`. Iteration is always in ordinal order.
//! - **Structs**: [`StructSnapshot`] holds every field, [`PartialSnapshot`] a
//!   subset. Both are immutable, compare and hash structurally, and share
//!   unchanged values when copied with `copy`.
//! - **Dynamic values**: [`Value`] and [`DataType`] describe field contents
//!   without Rust types, for codecs. [`StructBuilder::set_value`] decodes by
//!   field name; [`PartialStruct::value_of`] encodes.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::{Arc, LazyLock};
//! use understory_schema::{Field, MutField, PartialStruct, Schema, SchemaBuilder, Struct};
//!
//! struct Person {
//!     schema: Arc<Schema>,
//!     name: Field<String>,
//!     age: MutField<i32>,
//!     nicknames: Field<Vec<String>>,
//! }
//!
//! static PERSON: LazyLock<Person> = LazyLock::new(|| {
//!     let mut b = SchemaBuilder::new("Person");
//!     let name = b.immutable("name");
//!     let age = b.mutable_with_default("age", 0);
//!     let nicknames = b.immutable_with_default("nicknames", Vec::new());
//!     Person { schema: b.finish(), name, age, nicknames }
//! });
//!
//! let p = &*PERSON;
//! let ada = p.schema.build(|b| { b.set(p.name, "Ada".into()).set(p.age, 36); }).unwrap();
//! let older = ada.copy(|b| { b.set(p.age, 37); });
//!
//! assert_eq!(ada.get(p.age), 36);
//! assert_eq!(older.get(p.age), 37);
//! assert_ne!(ada, older);
//!
//! let summary = older.take(p.name + p.age);
//! assert_eq!(format!("{summary:?}"), r#"Person{name="Ada", age=37}"#);
//! assert_eq!(p.schema.describe(summary.fields()), "[name, age]");
//! ```
//!
//! ## Features
//!
//! - `reactive` (enabled by default): adds [`ObservableStruct`], which backs
//!   each mutable field with an `understory_reactive::AtomicProperty` so
//!   that changes can be observed, field by field or as a property of
//!   whole snapshots.

mod builder;
mod error;
mod field;
mod field_set;
mod field_type;
mod kind;
#[cfg(feature = "reactive")]
mod observable;
mod schema;
mod structs;
mod value;

pub use builder::StructBuilder;
pub use error::{StructError, TypeMismatch};
pub use field::{Field, FieldDef, FieldKey, MutField, Mutability, SchemaId, TypedField};
pub use field_set::{FieldSet, FieldSetIter};
pub use field_type::{FieldType, NonNullable};
pub use kind::{DataType, Kind, Value};
#[cfg(feature = "reactive")]
pub use observable::ObservableStruct;
pub use schema::{MAX_FIELDS, Schema, SchemaBuilder};
pub use structs::{PartialSnapshot, PartialStruct, Struct, StructSnapshot};
pub use value::ErasedValue;
