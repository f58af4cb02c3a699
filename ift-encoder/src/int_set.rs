//! Ordered integer sets used throughout the planner.
//!
//! This wraps the sparse bit set from `read-fonts` and adds the handful of set
//! algebra operations the segmentation analysis needs (subtraction, symmetric
//! difference, subset tests). The wrapper keeps the underlying set's equality,
//! hashing, and total order: sets compare lexicographically by their ascending
//! element sequence, which every ordered map of sets in this crate relies on.

use std::ops::RangeInclusive;

use read_fonts::collections::IntSet as SparseSet;

/// An ordered, hashable set of `u32` values.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IntSet(SparseSet<u32>);

/// Set of glyph ids.
pub type GlyphSet = IntSet;

/// Set of segment indices.
pub type SegmentSet = IntSet;

/// Set of unicode codepoint values.
pub type CodepointSet = IntSet;

impl IntSet {
    /// Returns a new empty set.
    pub fn empty() -> IntSet {
        IntSet(SparseSet::empty())
    }

    /// Adds a value to the set. Returns `true` if the value was newly inserted.
    pub fn insert(&mut self, value: u32) -> bool {
        self.0.insert(value)
    }

    /// Adds all values in the inclusive range to the set.
    pub fn insert_range(&mut self, range: RangeInclusive<u32>) {
        self.0.insert_range(range);
    }

    /// Removes a value. Returns `true` if the value was present.
    pub fn remove(&mut self, value: u32) -> bool {
        self.0.remove(value)
    }

    pub fn contains(&self, value: u32) -> bool {
        self.0.contains(value)
    }

    pub fn len(&self) -> usize {
        self.0.len() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// The smallest member, if any.
    pub fn first(&self) -> Option<u32> {
        self.0.first()
    }

    /// The largest member, if any.
    pub fn last(&self) -> Option<u32> {
        self.0.last()
    }

    /// True if every member of this set is also a member of `other`.
    pub fn is_subset_of(&self, other: &IntSet) -> bool {
        self.iter().all(|v| other.contains(v))
    }

    /// True if this set and `other` share at least one member.
    pub fn intersects(&self, other: &IntSet) -> bool {
        self.0.intersects_set(&other.0)
    }

    /// Adds all members of `other` to this set.
    pub fn union(&mut self, other: &IntSet) {
        self.0.union(&other.0);
    }

    /// Removes any members not also present in `other`.
    pub fn intersect(&mut self, other: &IntSet) {
        self.0.intersect(&other.0);
    }

    /// Removes all members of `other` from this set.
    pub fn subtract(&mut self, other: &IntSet) {
        self.0.remove_all(other.iter());
    }

    /// Replaces this set with the symmetric difference of this set and `other`.
    pub fn symmetric_difference(&mut self, other: &IntSet) {
        let mut common = self.clone();
        common.intersect(other);
        self.union(other);
        self.subtract(&common);
    }

    /// Iterates the members in ascending order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = u32> + '_ {
        self.0.iter()
    }
}

impl std::fmt::Debug for IntSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<u32> for IntSet {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        IntSet(iter.into_iter().collect())
    }
}

impl Extend<u32> for IntSet {
    fn extend<I: IntoIterator<Item = u32>>(&mut self, iter: I) {
        self.0.extend_unsorted(iter);
    }
}

impl<const N: usize> From<[u32; N]> for IntSet {
    fn from(values: [u32; N]) -> Self {
        values.into_iter().collect()
    }
}
