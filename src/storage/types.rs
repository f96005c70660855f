//! Core data types shared by the correlation index and its collaborators
//!
//! - `Scalar` / `Key`: values of the correlated column and physical row indexes
//! - `ValueRange` / `KeyRange`: half-open intervals over those domains
//! - `TargetBucket`: a region of the primary index, identified by id
//! - `InsertRecord`: a row delivered by the primary indexer after an insert
//! - `Query`: inclusive range predicates over columns

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;

/// Value type of the indexed columns. Mapping files store doubles, which are truncated.
pub type Scalar = i64;

/// Physical row index in the clustered dataset.
pub type Key = u64;

/// Stable id of a map bucket (an interval of the correlated dimension).
pub type MapBucketId = u32;

/// Stable id of a target bucket (a region of the primary index).
pub type TargetBucketId = u32;

/// A `(value, key)` pair: the correlated value of a row and its physical index.
pub type KeyPair = (Scalar, Key);

/// Half-open interval `[start, end)` on the correlated dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueRange {
    pub start: Scalar,
    pub end: Scalar,
}

impl ValueRange {
    pub fn new(start: Scalar, end: Scalar) -> Self {
        Self { start, end }
    }

    /// Check if a value falls within this range
    pub fn contains(&self, value: Scalar) -> bool {
        value >= self.start && value < self.end
    }

    /// Check if this range shares at least one value with the inclusive interval `[lo, hi]`
    pub fn overlaps_inclusive(&self, lo: Scalar, hi: Scalar) -> bool {
        self.start <= hi && self.end > lo
    }
}

/// Half-open interval `[start, end)` of physical keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyRange {
    pub start: Key,
    pub end: Key,
}

impl KeyRange {
    pub fn new(start: Key, end: Key) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, key: Key) -> bool {
        key >= self.start && key < self.end
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// A target bucket (region) of the primary index.
///
/// This is a plain value: the primary indexer owns the region, and the correlation layer
/// re-resolves it by id through [`PrimaryIndexer`](crate::storage::PrimaryIndexer) whenever
/// it needs the current extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetBucket {
    pub id: TargetBucketId,
    pub range: KeyRange,
}

impl TargetBucket {
    pub fn new(id: TargetBucketId, start: Key, end: Key) -> Self {
        Self {
            id,
            range: KeyRange::new(start, end),
        }
    }
}

/// A newly inserted row as reported by the primary indexer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertRecord {
    /// Value of the row at the correlated column
    pub value: Scalar,
    /// Physical index the row was written to
    pub key: Key,
    /// Target bucket hosting the row
    pub target_bucket: TargetBucketId,
}

impl InsertRecord {
    pub fn new(value: Scalar, key: Key, target_bucket: TargetBucketId) -> Self {
        Self {
            value,
            key,
            target_bucket,
        }
    }
}

/// Conjunction of inclusive range predicates, one per filtered column
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    filters: BTreeMap<usize, RangeInclusive<Scalar>>,
}

impl Query {
    /// A query without predicates
    pub fn new() -> Self {
        Self::default()
    }

    /// A query with a single `lo <= column <= hi` predicate
    pub fn between(column: usize, lo: Scalar, hi: Scalar) -> Self {
        Self::new().filter(column, lo, hi)
    }

    /// Builder method: add a predicate, replacing any existing one on the column
    pub fn filter(mut self, column: usize, lo: Scalar, hi: Scalar) -> Self {
        self.filters.insert(column, lo..=hi);
        self
    }

    /// The predicate on `column`, if any
    pub fn range(&self, column: usize) -> Option<&RangeInclusive<Scalar>> {
        self.filters.get(&column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_range_contains() {
        let r = ValueRange::new(10, 20);
        assert!(r.contains(10));
        assert!(r.contains(19));
        assert!(!r.contains(20));
        assert!(!r.contains(9));
    }

    #[test]
    fn test_value_range_overlaps_inclusive() {
        let r = ValueRange::new(10, 20);
        assert!(r.overlaps_inclusive(0, 10));
        assert!(r.overlaps_inclusive(19, 40));
        assert!(!r.overlaps_inclusive(20, 40));
        assert!(!r.overlaps_inclusive(0, 9));
    }

    #[test]
    fn test_key_range_len() {
        assert_eq!(KeyRange::new(5, 9).len(), 4);
        assert!(KeyRange::new(5, 5).is_empty());
    }

    #[test]
    fn test_query_filters() {
        let q = Query::between(2, -5, 5).filter(0, 1, 1);
        assert_eq!(q.range(2), Some(&(-5..=5)));
        assert_eq!(q.range(0), Some(&(1..=1)));
        assert!(q.range(1).is_none());
    }
}
