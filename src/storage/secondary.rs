//! Auxiliary exact index for outlier rows
//!
//! Maps each correlated value to the physical keys of the outlier rows that
//! carry it. The correlation index bulk-inserts value-sorted batches and
//! evicts whole (value range, key range) windows when a map bucket changes
//! classification inside a target bucket.

use crate::storage::types::{Key, KeyPair, KeyRange, Query, Scalar, ValueRange};
use std::collections::BTreeMap;

/// Exact value → key index used for outliers
pub trait AuxiliaryIndex: Send + Sync {
    /// Insert `(value, key)` pairs, sorted by value
    fn insert(&mut self, sorted: &[KeyPair]);

    /// Remove every entry whose value is in `values` and whose key is in `keys`
    fn remove(&mut self, values: ValueRange, keys: KeyRange);

    /// Keys of every entry matching the query's predicate on the indexed column,
    /// in no particular order
    fn matches(&self, query: &Query) -> Vec<Key>;

    /// Drop every entry
    fn clear(&mut self);

    /// Number of entries
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Approximate memory footprint in bytes
    fn size_bytes(&self) -> usize;
}

/// B-tree multimap implementation of [`AuxiliaryIndex`]
#[derive(Debug, Clone, Default)]
pub struct SecondaryBTreeIndex {
    column: usize,
    tree: BTreeMap<Scalar, Vec<Key>>,
    entries: usize,
}

impl SecondaryBTreeIndex {
    /// Create an empty index over `column`
    pub fn new(column: usize) -> Self {
        Self {
            column,
            tree: BTreeMap::new(),
            entries: 0,
        }
    }

    /// Indexed column
    pub fn column(&self) -> usize {
        self.column
    }

    /// Every `(value, key)` pair in value order
    pub fn iter(&self) -> impl Iterator<Item = KeyPair> + '_ {
        self.tree
            .iter()
            .flat_map(|(&value, keys)| keys.iter().map(move |&key| (value, key)))
    }
}

impl AuxiliaryIndex for SecondaryBTreeIndex {
    fn insert(&mut self, sorted: &[KeyPair]) {
        debug_assert!(sorted.windows(2).all(|w| w[0].0 <= w[1].0));
        for chunk in sorted.chunk_by(|a, b| a.0 == b.0) {
            let keys = self.tree.entry(chunk[0].0).or_default();
            keys.extend(chunk.iter().map(|&(_, key)| key));
        }
        self.entries += sorted.len();
    }

    fn remove(&mut self, values: ValueRange, keys: KeyRange) {
        if values.end <= values.start {
            return;
        }
        let mut removed = 0;
        let mut emptied = Vec::new();
        for (&value, bucket) in self.tree.range_mut(values.start..values.end) {
            let before = bucket.len();
            bucket.retain(|&k| !keys.contains(k));
            removed += before - bucket.len();
            if bucket.is_empty() {
                emptied.push(value);
            }
        }
        for value in emptied {
            self.tree.remove(&value);
        }
        self.entries -= removed;
    }

    fn matches(&self, query: &Query) -> Vec<Key> {
        match query.range(self.column) {
            Some(range) if range.start() > range.end() => Vec::new(),
            Some(range) => self
                .tree
                .range(range.clone())
                .flat_map(|(_, keys)| keys.iter().copied())
                .collect(),
            None => self.tree.values().flatten().copied().collect(),
        }
    }

    fn clear(&mut self) {
        self.tree.clear();
        self.entries = 0;
    }

    fn len(&self) -> usize {
        self.entries
    }

    fn size_bytes(&self) -> usize {
        // One key per entry plus a node slot per distinct value
        self.entries * std::mem::size_of::<Key>()
            + self.tree.len() * (std::mem::size_of::<Scalar>() + 10)
    }
}
