// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error types.

use crate::kind::DataType;

/// Errors from building or reading structs.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StructError {
    /// A required field had neither a value nor a default when building.
    #[error("{schema}: missing value for required field `{field}`")]
    MissingField {
        /// Schema name.
        schema: String,
        /// Field name.
        field: String,
    },
    /// The field is not present in a partial struct.
    #[error("{schema}: field `{field}` is not present")]
    FieldAbsent {
        /// Schema name.
        schema: String,
        /// Field name.
        field: String,
    },
    /// A dynamic value did not match the field's declared type.
    #[error("field `{field}` expects {expected}, found {found}")]
    WrongType {
        /// Field name.
        field: String,
        /// Declared type of the field.
        expected: DataType,
        /// Shape of the value that was supplied.
        found: String,
    },
    /// No field with this name exists.
    #[error("{schema} has no field named `{name}`")]
    UnknownField {
        /// Schema name.
        schema: String,
        /// The name that was looked up.
        name: String,
    },
    /// A field handle was used with a struct of a different schema.
    #[error("field handle does not belong to {schema}")]
    ForeignField {
        /// Schema name of the struct.
        schema: String,
    },
}

/// A [`Value`](crate::Value) could not be converted to a Rust field type.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("expected {expected}, found {found}")]
pub struct TypeMismatch {
    /// The type the conversion wanted.
    pub expected: DataType,
    /// Shape of the value that was supplied.
    pub found: String,
}

impl TypeMismatch {
    /// Attaches a field name, producing [`StructError::WrongType`].
    #[must_use]
    pub fn for_field(self, field: &str) -> StructError {
        StructError::WrongType {
            field: field.to_owned(),
            expected: self.expected,
            found: self.found,
        }
    }
}
