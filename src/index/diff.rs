//! Diff records emitted by classification changes
//!
//! A ledger records, per map bucket, its committed state when first touched
//! and its current state. The emitted [`DiffType`] is a function of those two,
//! so an entry that flips and flips back inside one update collapses to the
//! right record instead of carrying a stale transition.

use crate::storage::{KeyPair, MapBucketId, TargetBucketId};
use serde::Serialize;
use std::collections::BTreeMap;

/// How one map bucket's relationship to one target bucket changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffType {
    /// Nothing observable changed
    NoDiff,
    /// The map bucket is new in the target bucket and is an inlier
    NewInlier,
    /// The map bucket is new in the target bucket and is an outlier
    NewOutlier,
    /// The map bucket gained points and is still an inlier
    RemainInlier,
    /// The map bucket gained points and is still an outlier
    RemainOutlier,
    /// The whole map bucket moves from the mapped index to the exact index
    InlierToOutlier,
    /// The whole map bucket moves from the exact index to the mapped index
    OutlierToInlier,
}

impl std::fmt::Display for DiffType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DiffType::NoDiff => "no_diff",
            DiffType::NewInlier => "new_inlier",
            DiffType::NewOutlier => "new_outlier",
            DiffType::RemainInlier => "remain_inlier",
            DiffType::RemainOutlier => "remain_outlier",
            DiffType::InlierToOutlier => "inlier_to_outlier",
            DiffType::OutlierToInlier => "outlier_to_inlier",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Touch {
    /// Classification before the recording window; `None` for entries created in it
    committed: Option<bool>,
    /// Current classification (`true` = outlier)
    outlier: bool,
    /// Whether the entry gained points in the window
    gained: bool,
}

impl Touch {
    fn diff_type(&self) -> DiffType {
        match (self.committed, self.outlier) {
            (None, false) => DiffType::NewInlier,
            (None, true) => DiffType::NewOutlier,
            (Some(true), false) => DiffType::OutlierToInlier,
            (Some(false), true) => DiffType::InlierToOutlier,
            (Some(false), false) if self.gained => DiffType::RemainInlier,
            (Some(true), true) if self.gained => DiffType::RemainOutlier,
            _ => DiffType::NoDiff,
        }
    }
}

/// Diff accumulator for one [`BucketLedger`](crate::index::BucketLedger)
///
/// Passed explicitly to every ledger update; drained by the caller.
#[derive(Debug, Clone, Default)]
pub struct LedgerDiffs {
    touched: BTreeMap<MapBucketId, Touch>,
}

impl LedgerDiffs {
    pub fn new() -> Self {
        Self::default()
    }

    /// A map bucket was created with the given classification
    pub(crate) fn record_new(&mut self, map_bucket: MapBucketId, outlier: bool) {
        self.touched.insert(
            map_bucket,
            Touch {
                committed: None,
                outlier,
                gained: true,
            },
        );
    }

    /// An existing map bucket gained points
    pub(crate) fn record_insert(&mut self, map_bucket: MapBucketId, outlier: bool) {
        self.touched
            .entry(map_bucket)
            .or_insert(Touch {
                committed: Some(outlier),
                outlier,
                gained: false,
            })
            .gained = true;
    }

    /// A map bucket changed classification
    pub(crate) fn record_switch(&mut self, map_bucket: MapBucketId, was_outlier: bool, outlier: bool) {
        self.touched
            .entry(map_bucket)
            .or_insert(Touch {
                committed: Some(was_outlier),
                outlier: was_outlier,
                gained: false,
            })
            .outlier = outlier;
    }

    /// Diff recorded so far for one map bucket
    pub fn diff_type(&self, map_bucket: MapBucketId) -> DiffType {
        self.touched
            .get(&map_bucket)
            .map(Touch::diff_type)
            .unwrap_or(DiffType::NoDiff)
    }

    /// One diff per affected map bucket, ascending by id; buckets whose net change is
    /// nothing are omitted
    pub fn diffs(&self) -> Vec<(MapBucketId, DiffType)> {
        self.touched
            .iter()
            .map(|(&id, touch)| (id, touch.diff_type()))
            .filter(|&(_, d)| d != DiffType::NoDiff)
            .collect()
    }

    pub fn clear(&mut self) {
        self.touched.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.touched.is_empty()
    }
}

/// One action for the combined index: how a map bucket changed inside a target bucket,
/// with the rows that must go to the exact index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diff {
    pub diff_type: DiffType,
    pub target_bucket: TargetBucketId,
    /// `(value, key)` rows to index exactly; empty for inlier diffs
    pub indexes: Vec<KeyPair>,
}

/// Map bucket → diffs accumulated across tracker calls, drained once per insert
#[derive(Debug, Clone, Default)]
pub struct DiffMap {
    diffs: BTreeMap<MapBucketId, Vec<Diff>>,
}

impl DiffMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, map_bucket: MapBucketId, diff: Diff) {
        self.diffs.entry(map_bucket).or_default().push(diff);
    }

    /// Diffs for one map bucket
    pub fn get(&self, map_bucket: MapBucketId) -> &[Diff] {
        self.diffs
            .get(&map_bucket)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Every `(map bucket, diff)` pair, ascending by map bucket
    pub fn iter(&self) -> impl Iterator<Item = (MapBucketId, &Diff)> + '_ {
        self.diffs
            .iter()
            .flat_map(|(&id, diffs)| diffs.iter().map(move |d| (id, d)))
    }

    /// Total number of diffs
    pub fn len(&self) -> usize {
        self.diffs.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.diffs.is_empty()
    }

    pub fn clear(&mut self) {
        self.diffs.clear();
    }

    /// Move every diff out, leaving the map empty
    pub fn take(&mut self) -> DiffMap {
        std::mem::take(self)
    }
}

/// Counts of diffs processed by one maintenance call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub new_inlier: usize,
    pub new_outlier: usize,
    pub remain_inlier: usize,
    pub remain_outlier: usize,
    pub inlier_to_outlier: usize,
    pub outlier_to_inlier: usize,
    /// Rows written to the exact index
    pub outlier_rows: usize,
}

impl DiffSummary {
    pub(crate) fn count(&mut self, diff: &Diff) {
        match diff.diff_type {
            DiffType::NewInlier => self.new_inlier += 1,
            DiffType::NewOutlier => self.new_outlier += 1,
            DiffType::RemainInlier => self.remain_inlier += 1,
            DiffType::RemainOutlier => self.remain_outlier += 1,
            DiffType::InlierToOutlier => self.inlier_to_outlier += 1,
            DiffType::OutlierToInlier => self.outlier_to_inlier += 1,
            DiffType::NoDiff => {}
        }
        self.outlier_rows += diff.indexes.len();
    }

    /// Total number of diffs counted
    pub fn total(&self) -> usize {
        self.new_inlier
            + self.new_outlier
            + self.remain_inlier
            + self.remain_outlier
            + self.inlier_to_outlier
            + self.outlier_to_inlier
    }
}

impl std::fmt::Display for DiffSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "new_inlier={} new_outlier={} remain_inlier={} remain_outlier={} \
             inlier_to_outlier={} outlier_to_inlier={} outlier_rows={}",
            self.new_inlier,
            self.new_outlier,
            self.remain_inlier,
            self.remain_outlier,
            self.inlier_to_outlier,
            self.outlier_to_inlier,
            self.outlier_rows
        )
    }
}
