// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Declared field types and dynamically typed values.

use core::fmt;
use core::hash::{Hash, Hasher};

/// The primitive kinds a field value can have.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    /// `bool`
    Bool,
    /// `i8`
    I8,
    /// `i16`
    I16,
    /// `i32`
    I32,
    /// `i64`
    I64,
    /// `f32`
    F32,
    /// `f64`
    F64,
    /// UTF-8 text.
    Str,
    /// Opaque bytes.
    Blob,
}

impl Kind {
    /// Short lowercase name, as used in type descriptions.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Str => "str",
            Self::Blob => "blob",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The declared type of a field.
///
/// Displayed as `i32`, `i32?` (nullable) and `[i32]` (collection).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    /// A single non-null value.
    Simple(Kind),
    /// The inner type, or null.
    Nullable(Box<DataType>),
    /// An ordered list of the inner type.
    Collection(Box<DataType>),
}

impl DataType {
    /// Wraps `self` in [`DataType::Nullable`].
    ///
    /// A type that is already nullable is returned unchanged.
    #[must_use]
    pub fn nullable(self) -> Self {
        if self.is_nullable() {
            self
        } else {
            Self::Nullable(Box::new(self))
        }
    }

    /// Wraps `self` in [`DataType::Collection`].
    #[must_use]
    pub fn collection(self) -> Self {
        Self::Collection(Box::new(self))
    }

    /// Returns `true` for [`DataType::Nullable`].
    #[must_use]
    pub fn is_nullable(&self) -> bool {
        matches!(self, Self::Nullable(_))
    }

    /// The innermost primitive kind.
    #[must_use]
    pub fn kind(&self) -> Kind {
        match self {
            Self::Simple(kind) => *kind,
            Self::Nullable(inner) | Self::Collection(inner) => inner.kind(),
        }
    }
}

impl From<Kind> for DataType {
    fn from(kind: Kind) -> Self {
        Self::Simple(kind)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple(kind) => write!(f, "{kind}"),
            Self::Nullable(inner) => write!(f, "{inner}?"),
            Self::Collection(inner) => write!(f, "[{inner}]"),
        }
    }
}

/// A dynamically typed field value, as exchanged with codecs.
///
/// Equality and hashing are structural. Floats compare by bit pattern, so
/// `NaN == NaN` and `0.0 != -0.0`.
#[derive(Clone, Debug)]
pub enum Value {
    /// Absent value of a nullable field.
    Null,
    /// See [`Kind::Bool`].
    Bool(bool),
    /// See [`Kind::I8`].
    I8(i8),
    /// See [`Kind::I16`].
    I16(i16),
    /// See [`Kind::I32`].
    I32(i32),
    /// See [`Kind::I64`].
    I64(i64),
    /// See [`Kind::F32`].
    F32(f32),
    /// See [`Kind::F64`].
    F64(f64),
    /// See [`Kind::Str`].
    Str(String),
    /// See [`Kind::Blob`].
    Blob(Box<[u8]>),
    /// Elements of a collection.
    List(Vec<Value>),
}

impl Value {
    /// The primitive kind of a scalar value; `None` for `Null` and `List`.
    #[must_use]
    pub fn kind(&self) -> Option<Kind> {
        Some(match self {
            Self::Null | Self::List(_) => return None,
            Self::Bool(_) => Kind::Bool,
            Self::I8(_) => Kind::I8,
            Self::I16(_) => Kind::I16,
            Self::I32(_) => Kind::I32,
            Self::I64(_) => Kind::I64,
            Self::F32(_) => Kind::F32,
            Self::F64(_) => Kind::F64,
            Self::Str(_) => Kind::Str,
            Self::Blob(_) => Kind::Blob,
        })
    }

    /// Short description of the value's shape, for error messages.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Null => "null".to_owned(),
            Self::List(_) => "list".to_owned(),
            scalar => scalar.kind().map(Kind::name).unwrap_or_default().to_owned(),
        }
    }

    /// Returns `true` if the value can be stored in a field of type `ty`.
    #[must_use]
    pub fn conforms_to(&self, ty: &DataType) -> bool {
        match (self, ty) {
            (Self::Null, DataType::Nullable(_)) => true,
            (value, DataType::Nullable(inner)) => value.conforms_to(inner),
            (Self::List(items), DataType::Collection(inner)) => {
                items.iter().all(|item| item.conforms_to(inner))
            }
            (value, DataType::Simple(kind)) => value.kind() == Some(*kind),
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::I8(a), Self::I8(b)) => a == b,
            (Self::I16(a), Self::I16(b)) => a == b,
            (Self::I32(a), Self::I32(b)) => a == b,
            (Self::I64(a), Self::I64(b)) => a == b,
            (Self::F32(a), Self::F32(b)) => a.to_bits() == b.to_bits(),
            (Self::F64(a), Self::F64(b)) => a.to_bits() == b.to_bits(),
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Blob(a), Self::Blob(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Bool(v) => v.hash(state),
            Self::I8(v) => v.hash(state),
            Self::I16(v) => v.hash(state),
            Self::I32(v) => v.hash(state),
            Self::I64(v) => v.hash(state),
            Self::F32(v) => v.to_bits().hash(state),
            Self::F64(v) => v.to_bits().hash(state),
            Self::Str(v) => v.hash(state),
            Self::Blob(v) => v.hash(state),
            Self::List(v) => v.hash(state),
        }
    }
}
