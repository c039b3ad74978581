// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Compact sets of fields.

use core::fmt;
use core::ops::{Add, BitAnd, BitAndAssign, BitOr, BitOrAssign, Sub, SubAssign};

use crate::field::{Field, FieldKey, MutField};

/// A set of up to 64 fields of one schema, stored as a bitmask.
///
/// Bit `n` stands for the field with ordinal `n`, so [`FieldSet::bits`] is a
/// stable representation. Iteration is always in ascending ordinal order,
/// regardless of how the set was assembled.
///
/// Fields combine with `+` and `-`; whole sets combine with `|`, `&` and `-`.
///
/// ```
/// use understory_schema::{FieldSet, SchemaBuilder};
///
/// let mut builder = SchemaBuilder::new("Point");
/// let x = builder.immutable::<i32>("x");
/// let y = builder.immutable::<i32>("y");
/// let z = builder.immutable::<i32>("z");
/// let _schema = builder.finish();
///
/// let all = z + x + y;
/// assert_eq!(all.len(), 3);
/// assert_eq!(all - y, x + z);
/// assert_eq!(all.iter().collect::<Vec<_>>(), [0, 1, 2]);
/// assert_eq!(all.index_of(z), Some(2));
/// assert_eq!((all - x).index_of(z), Some(1));
/// ```
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct FieldSet(u64);

impl FieldSet {
    /// The empty set.
    pub const EMPTY: Self = Self(0);

    /// Creates a set from its bitmask.
    #[must_use]
    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// The bitmask; bit `n` is ordinal `n`.
    #[must_use]
    #[inline]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// The set of ordinals `0..count`.
    ///
    /// # Panics
    ///
    /// Panics if `count > 64`.
    #[must_use]
    pub const fn first(count: usize) -> Self {
        assert!(count <= 64, "a field set holds at most 64 fields");
        if count == 64 {
            Self(u64::MAX)
        } else {
            Self((1_u64 << count) - 1)
        }
    }

    /// A set holding one field.
    #[must_use]
    #[inline]
    pub fn of(field: impl FieldKey) -> Self {
        Self(bit(field.ordinal()))
    }

    /// Number of fields in the set.
    #[must_use]
    #[inline]
    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Returns `true` if the set holds no fields.
    #[must_use]
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if the field is in the set.
    #[must_use]
    #[inline]
    pub fn contains(self, field: impl FieldKey) -> bool {
        self.contains_ordinal(field.ordinal())
    }

    /// Returns `true` if the ordinal is in the set.
    #[must_use]
    #[inline]
    pub const fn contains_ordinal(self, ordinal: u8) -> bool {
        ordinal < 64 && self.0 & bit(ordinal) != 0
    }

    /// Position of the field among the members of the set.
    ///
    /// This is the index of the field's value in a densely packed array
    /// holding only the members, in ordinal order.
    #[must_use]
    #[inline]
    pub fn index_of(self, field: impl FieldKey) -> Option<usize> {
        self.index_of_ordinal(field.ordinal())
    }

    /// See [`FieldSet::index_of`].
    #[must_use]
    pub const fn index_of_ordinal(self, ordinal: u8) -> Option<usize> {
        if self.contains_ordinal(ordinal) {
            Some((self.0 & (bit(ordinal) - 1)).count_ones() as usize)
        } else {
            None
        }
    }

    /// Returns `true` if every member of `self` is in `other`.
    #[must_use]
    #[inline]
    pub const fn is_subset(self, other: Self) -> bool {
        self.0 & !other.0 == 0
    }

    /// Adds a field.
    pub fn insert(&mut self, field: impl FieldKey) {
        self.0 |= bit(field.ordinal());
    }

    /// Removes a field.
    pub fn remove(&mut self, field: impl FieldKey) {
        self.0 &= !bit(field.ordinal());
    }

    /// Member ordinals in ascending order.
    #[must_use]
    #[inline]
    pub const fn iter(self) -> FieldSetIter {
        FieldSetIter { bits: self.0 }
    }
}

const fn bit(ordinal: u8) -> u64 {
    1_u64 << ordinal
}

impl fmt::Debug for FieldSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl BitOr for FieldSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for FieldSet {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for FieldSet {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        Self(self.0 & rhs.0)
    }
}

impl BitAndAssign for FieldSet {
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0;
    }
}

impl Sub for FieldSet {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 & !rhs.0)
    }
}

impl SubAssign for FieldSet {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 &= !rhs.0;
    }
}

impl<K: FieldKey> Add<K> for FieldSet {
    type Output = Self;

    fn add(mut self, rhs: K) -> Self::Output {
        self.insert(rhs);
        self
    }
}

impl<K: FieldKey> Sub<K> for FieldSet {
    type Output = Self;

    fn sub(mut self, rhs: K) -> Self::Output {
        self.remove(rhs);
        self
    }
}

impl<T, K: FieldKey> Add<K> for Field<T> {
    type Output = FieldSet;

    fn add(self, rhs: K) -> FieldSet {
        FieldSet::of(self) + rhs
    }
}

impl<T, K: FieldKey> Add<K> for MutField<T> {
    type Output = FieldSet;

    fn add(self, rhs: K) -> FieldSet {
        FieldSet::of(self) + rhs
    }
}

impl<K: FieldKey> FromIterator<K> for FieldSet {
    fn from_iter<I: IntoIterator<Item = K>>(iter: I) -> Self {
        iter.into_iter().fold(Self::EMPTY, |set, field| set + field)
    }
}

impl IntoIterator for FieldSet {
    type Item = u8;
    type IntoIter = FieldSetIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the ordinals of a [`FieldSet`], ascending.
#[derive(Clone, Debug)]
pub struct FieldSetIter {
    bits: u64,
}

impl Iterator for FieldSetIter {
    type Item = u8;

    fn next(&mut self) -> Option<Self::Item> {
        if self.bits == 0 {
            return None;
        }
        #[expect(clippy::cast_possible_truncation, reason = "trailing_zeros <= 63")]
        let ordinal = self.bits.trailing_zeros() as u8;
        self.bits &= self.bits - 1;
        Some(ordinal)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let count = self.bits.count_ones() as usize;
        (count, Some(count))
    }
}

impl ExactSizeIterator for FieldSetIter {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::SchemaId;

    fn fields() -> (Field<i32>, Field<String>, MutField<bool>) {
        let schema = SchemaId::next();
        (Field::new(schema, 0), Field::new(schema, 1), MutField::new(schema, 5))
    }

    #[test]
    fn build_with_plus_and_minus() {
        let (a, b, c) = fields();
        let all = a + b + c;
        assert_eq!(all.len(), 3);
        assert_eq!(all - b, a + c);
        assert_eq!(c + a + b, all);
        assert_eq!(all.bits(), 0b10_0011);
    }

    #[test]
    fn set_algebra() {
        let (a, b, c) = fields();
        let ab = a + b;
        let bc = b + c;
        assert_eq!(ab | bc, a + b + c);
        assert_eq!(ab & bc, FieldSet::of(b));
        assert_eq!(ab - bc, FieldSet::of(a));
        assert!(FieldSet::of(b).is_subset(ab));
        assert!(!ab.is_subset(bc));
        assert!(FieldSet::EMPTY.is_subset(ab));
    }

    #[test]
    fn packed_indices() {
        let (a, b, c) = fields();
        let set = a + c;
        assert_eq!(set.index_of(a), Some(0));
        assert_eq!(set.index_of(b), None);
        assert_eq!(set.index_of(c), Some(1));
    }

    #[test]
    fn iteration_is_ascending() {
        let (a, b, c) = fields();
        let set = c + b + a;
        let ordinals: Vec<_> = set.iter().collect();
        assert_eq!(ordinals, [0, 1, 5]);
        assert_eq!(set.iter().len(), 3);
    }

    #[test]
    fn first_n() {
        assert_eq!(FieldSet::first(0), FieldSet::EMPTY);
        assert_eq!(FieldSet::first(3).bits(), 0b111);
        assert_eq!(FieldSet::first(64).len(), 64);
        assert!(FieldSet::first(64).contains_ordinal(63));
        assert!(!FieldSet::first(64).contains_ordinal(64));
    }

    #[test]
    #[should_panic(expected = "at most 64 fields")]
    fn first_rejects_overflow() {
        let _ = FieldSet::first(65);
    }

    #[test]
    fn collect_from_fields() {
        let (a, _, c) = fields();
        let set: FieldSet = [a.ordinal(), c.ordinal()]
            .into_iter()
            .map(|o| Field::<i32>::new(a.schema_id(), o))
            .collect();
        assert_eq!(set, a + c);
        assert_eq!(format!("{set:?}"), "{0, 5}");
    }
}
