//! Range/list set algebra for query results
//!
//! A query answer is a set of physical keys represented two ways: coalesced
//! key ranges (from the mapped index) and an explicit sorted key list (from
//! the exact index). The two sides never overlap after [`KeySet::union`].

use crate::storage::{Key, KeyRange};
use serde::Serialize;

/// Sort ranges by start and merge overlapping or touching ones. Empty ranges are dropped.
pub fn coalesce(mut ranges: Vec<KeyRange>) -> Vec<KeyRange> {
    ranges.retain(|r| !r.is_empty());
    ranges.sort_by_key(|r| (r.start, r.end));

    let mut merged: Vec<KeyRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.start <= last.end => last.end = last.end.max(range.end),
            _ => merged.push(range),
        }
    }
    merged
}

/// Keys matching a query: disjoint sorted ranges plus a sorted list of keys outside them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KeySet {
    pub ranges: Vec<KeyRange>,
    pub list: Vec<Key>,
}

impl KeySet {
    /// Combine coalesced `ranges` with a sorted key `list`, dropping listed keys
    /// already covered by a range
    pub fn union(ranges: Vec<KeyRange>, list: Vec<Key>) -> Self {
        debug_assert!(list.windows(2).all(|w| w[0] <= w[1]));
        let mut rest = Vec::with_capacity(list.len());
        let mut ix = 0;
        for key in list {
            while ix < ranges.len() && ranges[ix].end <= key {
                ix += 1;
            }
            let covered = ix < ranges.len() && ranges[ix].contains(key);
            if !covered && rest.last() != Some(&key) {
                rest.push(key);
            }
        }
        Self { ranges, list: rest }
    }

    /// Number of keys in the set
    pub fn len(&self) -> u64 {
        self.ranges.iter().map(KeyRange::len).sum::<u64>() + self.list.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: Key) -> bool {
        self.ranges.iter().any(|r| r.contains(key)) || self.list.binary_search(&key).is_ok()
    }

    /// Every key in ascending order
    pub fn keys(&self) -> Vec<Key> {
        let mut keys: Vec<Key> = self
            .ranges
            .iter()
            .flat_map(|r| r.start..r.end)
            .chain(self.list.iter().copied())
            .collect();
        keys.sort_unstable();
        keys
    }
}
