//! Bucket Ledger - per target bucket inlier/outlier bookkeeping
//!
//! For every map bucket with at least one row in the target bucket, the ledger
//! keeps a point count and a classification. Entries are kept sorted by count,
//! and all outliers sit before `first_inlier`:
//!
//! ```text
//!  count:   1    2    2    9   14   30
//!         [ O    O    O  | I    I    I ]
//!                          ^ first_inlier
//! ```
//!
//! The cost of tracking a map bucket as an outlier grows with its count while
//! the cost of keeping it inlier is the same for every entry, so the best split
//! is a single boundary in count order. Updates repair that boundary locally
//! (`restash`) instead of reclassifying every entry.

use crate::index::diff::LedgerDiffs;
use crate::storage::MapBucketId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Parameters of the inlier/outlier cost model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    /// Storage weight (alpha) of one row in the exact index
    #[serde(default = "default_storage_weight")]
    pub storage_weight: f64,
    /// Lookup overhead of one row in the exact index
    #[serde(default = "default_beta")]
    pub beta: f64,
    /// Relative band around the break-even point inside which an entry keeps its class
    #[serde(default)]
    pub tolerance: f64,
}

fn default_storage_weight() -> f64 {
    201.3
}

fn default_beta() -> f64 {
    17.88
}

impl CostModel {
    pub fn new(storage_weight: f64, beta: f64) -> Self {
        Self {
            storage_weight,
            beta,
            tolerance: 0.0,
        }
    }

    /// Builder method: set the hysteresis band
    pub fn tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }
}

impl Default for CostModel {
    fn default() -> Self {
        Self::new(default_storage_weight(), default_beta())
    }
}

/// Count and classification of one map bucket inside a target bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MapBucketStat {
    pub map_bucket_id: MapBucketId,
    pub num_points: u32,
    pub is_outlier: bool,
}

/// Classification state of one target bucket
#[derive(Debug, Clone)]
pub struct BucketLedger {
    /// Sorted ascending by `num_points`
    entries: Vec<MapBucketStat>,
    /// map bucket id → position in `entries`
    positions: HashMap<MapBucketId, usize>,
    first_inlier: usize,
    total_points: u64,
    num_inlier_points: u64,
    num_inlier_buckets: u32,
    cost: CostModel,
}

impl BucketLedger {
    /// Create an empty ledger
    pub fn new(cost: CostModel) -> Self {
        Self {
            entries: Vec::new(),
            positions: HashMap::new(),
            first_inlier: 0,
            total_points: 0,
            num_inlier_points: 0,
            num_inlier_buckets: 0,
            cost,
        }
    }

    // ==================== Cost Model ====================

    /// Whether to stash an entry: `-1` it must be an outlier, `+1` it must be an
    /// inlier, `0` it is inside the tolerance band and keeps its class.
    pub fn cost_to_stash(&self, stat: &MapBucketStat) -> i8 {
        // Scan overhead the entry adds to the inlier group, and vice versa
        let inlier_cost = self.total_points as f64;
        let outlier_cost = (self.cost.beta + self.cost.storage_weight) * stat.num_points as f64;
        let mut ret = 0;
        if outlier_cost > (1.0 + self.cost.tolerance) * inlier_cost {
            ret += 1;
        }
        if outlier_cost < (1.0 - self.cost.tolerance) * inlier_cost {
            ret -= 1;
        }
        ret
    }

    fn prefers_outlier(&self, pos: usize) -> bool {
        let stat = &self.entries[pos];
        match self.cost_to_stash(stat) {
            c if c < 0 => true,
            0 => stat.is_outlier,
            _ => false,
        }
    }

    // ==================== Updates ====================

    /// Add `npts` points to a map bucket, creating it if needed
    pub fn add_points(&mut self, map_bucket: MapBucketId, npts: u32, diffs: &mut LedgerDiffs) {
        if npts == 0 {
            return;
        }
        self.total_points += u64::from(npts);

        match self.positions.get(&map_bucket).copied() {
            None => self.insert_entry(map_bucket, npts, diffs),
            Some(pos) => {
                let stat = &mut self.entries[pos];
                stat.num_points += npts;
                let outlier = stat.is_outlier;
                if !outlier {
                    self.num_inlier_points += u64::from(npts);
                }
                diffs.record_insert(map_bucket, outlier);
                self.realign(pos, diffs);
            }
        }
        self.restash(diffs);
    }

    /// Add many `(map bucket, points)` increments at once, then re-sort and
    /// reclassify every entry from scratch.
    ///
    /// Used when a whole target bucket is (re)built, where one full sort is cheaper
    /// than repeated bubbling.
    pub fn add_points_batch(&mut self, batch: &[(MapBucketId, u32)], diffs: &mut LedgerDiffs) {
        for &(map_bucket, npts) in batch {
            if npts == 0 {
                continue;
            }
            match self.positions.get(&map_bucket).copied() {
                None => {
                    self.positions.insert(map_bucket, self.entries.len());
                    self.entries.push(MapBucketStat {
                        map_bucket_id: map_bucket,
                        num_points: npts,
                        is_outlier: true,
                    });
                    diffs.record_new(map_bucket, true);
                }
                Some(pos) => {
                    let stat = &mut self.entries[pos];
                    stat.num_points += npts;
                    if !stat.is_outlier {
                        self.num_inlier_points += u64::from(npts);
                    }
                    diffs.record_insert(map_bucket, stat.is_outlier);
                }
            }
            self.total_points += u64::from(npts);
        }

        self.entries.sort_by_key(|stat| stat.num_points);
        self.positions.clear();
        for (pos, stat) in self.entries.iter().enumerate() {
            self.positions.insert(stat.map_bucket_id, pos);
        }
        for pos in 0..self.entries.len() {
            self.set_class(pos, true, diffs);
        }
        self.first_inlier = self.entries.len();
        self.restash(diffs);
    }

    fn insert_entry(&mut self, map_bucket: MapBucketId, npts: u32, diffs: &mut LedgerDiffs) {
        let pos = self.entries.partition_point(|stat| stat.num_points <= npts);
        // The new entry joins its left neighbour's class; no neighbour means outlier
        let outlier = pos <= self.first_inlier;

        self.entries.insert(
            pos,
            MapBucketStat {
                map_bucket_id: map_bucket,
                num_points: npts,
                is_outlier: outlier,
            },
        );
        for (ix, stat) in self.entries.iter().enumerate().skip(pos) {
            self.positions.insert(stat.map_bucket_id, ix);
        }

        if outlier {
            self.first_inlier += 1;
        } else {
            self.num_inlier_points += u64::from(npts);
            self.num_inlier_buckets += 1;
        }
        diffs.record_new(map_bucket, outlier);
    }

    /// Bubble the entry at `pos` towards larger counts until the array is sorted again.
    ///
    /// An outlier that overtakes the first inlier joins the inlier group, so the
    /// partition holds at every step.
    fn realign(&mut self, mut pos: usize, diffs: &mut LedgerDiffs) {
        while pos + 1 < self.entries.len()
            && self.entries[pos + 1].num_points < self.entries[pos].num_points
        {
            if self.entries[pos].is_outlier && !self.entries[pos + 1].is_outlier {
                self.set_class(pos, false, diffs);
                self.first_inlier = pos;
            }
            self.swap(pos, pos + 1);
            pos += 1;
        }
    }

    /// Move the inlier/outlier boundary until neither entry next to it wants to flip.
    ///
    /// Costs are monotonic in the count, so once the boundary entry is stable every
    /// entry beyond it is too; each call is O(distance moved).
    fn restash(&mut self, diffs: &mut LedgerDiffs) {
        let len = self.entries.len();
        let mut boundary = self.first_inlier.min(len);

        while boundary < len && self.prefers_outlier(boundary) {
            self.set_class(boundary, true, diffs);
            boundary += 1;
        }
        if boundary < len {
            self.set_class(boundary, false, diffs);
        }
        while boundary > 0 && !self.prefers_outlier(boundary - 1) {
            self.set_class(boundary - 1, false, diffs);
            boundary -= 1;
        }
        self.first_inlier = boundary;
    }

    fn set_class(&mut self, pos: usize, outlier: bool, diffs: &mut LedgerDiffs) {
        let stat = &mut self.entries[pos];
        if stat.is_outlier == outlier {
            return;
        }
        stat.is_outlier = outlier;
        let npts = u64::from(stat.num_points);
        let map_bucket = stat.map_bucket_id;
        if outlier {
            self.num_inlier_buckets -= 1;
            self.num_inlier_points -= npts;
        } else {
            self.num_inlier_buckets += 1;
            self.num_inlier_points += npts;
        }
        diffs.record_switch(map_bucket, !outlier, outlier);
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.entries.swap(a, b);
        self.positions.insert(self.entries[a].map_bucket_id, a);
        self.positions.insert(self.entries[b].map_bucket_id, b);
    }

    // ==================== Accessors ====================

    /// Position of a map bucket in the sorted entries
    ///
    /// # Panics
    /// Panics if the map bucket has no rows in this target bucket
    pub fn find(&self, map_bucket: MapBucketId) -> usize {
        match self.positions.get(&map_bucket) {
            Some(&pos) => pos,
            None => panic!("map bucket {} not present in ledger", map_bucket),
        }
    }

    pub fn get(&self, map_bucket: MapBucketId) -> Option<&MapBucketStat> {
        self.positions.get(&map_bucket).map(|&pos| &self.entries[pos])
    }

    /// Entries, ascending by count
    pub fn entries(&self) -> &[MapBucketStat] {
        &self.entries
    }

    pub fn inliers(&self) -> impl Iterator<Item = &MapBucketStat> + '_ {
        self.entries.iter().filter(|s| !s.is_outlier)
    }

    pub fn outliers(&self) -> impl Iterator<Item = &MapBucketStat> + '_ {
        self.entries.iter().filter(|s| s.is_outlier)
    }

    pub fn first_inlier_index(&self) -> usize {
        self.first_inlier
    }

    pub fn total_points(&self) -> u64 {
        self.total_points
    }

    pub fn num_inlier_points(&self) -> u64 {
        self.num_inlier_points
    }

    pub fn num_inlier_buckets(&self) -> u32 {
        self.num_inlier_buckets
    }

    pub fn cost_model(&self) -> CostModel {
        self.cost
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Memory estimate; the class flag packs into the count
    pub fn size_bytes(&self) -> usize {
        self.entries.len() * (std::mem::size_of::<MapBucketId>() + std::mem::size_of::<u32>())
    }

    /// Full self check. Slow; meant for tests and debugging.
    pub fn consistent(&self) -> bool {
        if self.positions.len() != self.entries.len() {
            tracing::warn!(
                positions = self.positions.len(),
                entries = self.entries.len(),
                "ledger position map has the wrong size"
            );
            return false;
        }
        for (&map_bucket, &pos) in &self.positions {
            if self.entries.get(pos).map(|s| s.map_bucket_id) != Some(map_bucket) {
                tracing::warn!(map_bucket, pos, "ledger position map is inconsistent");
                return false;
            }
        }
        if self
            .entries
            .windows(2)
            .any(|w| w[0].num_points > w[1].num_points)
        {
            tracing::warn!("ledger entries are not sorted by count");
            return false;
        }
        for (pos, stat) in self.entries.iter().enumerate() {
            if stat.is_outlier != (pos < self.first_inlier) {
                tracing::warn!(
                    map_bucket = stat.map_bucket_id,
                    pos,
                    first_inlier = self.first_inlier,
                    "ledger entry on the wrong side of the boundary"
                );
                return false;
            }
            let cost = self.cost_to_stash(stat);
            if (cost < 0 && !stat.is_outlier) || (cost > 0 && stat.is_outlier) {
                tracing::warn!(
                    map_bucket = stat.map_bucket_id,
                    cost,
                    outlier = stat.is_outlier,
                    "ledger entry misclassified"
                );
                return false;
            }
        }
        let total: u64 = self.entries.iter().map(|s| u64::from(s.num_points)).sum();
        let inlier_points: u64 = self.inliers().map(|s| u64::from(s.num_points)).sum();
        let inlier_buckets = self.inliers().count() as u32;
        if total != self.total_points
            || inlier_points != self.num_inlier_points
            || inlier_buckets != self.num_inlier_buckets
        {
            tracing::warn!(
                total,
                inlier_points,
                inlier_buckets,
                recorded_total = self.total_points,
                recorded_inlier_points = self.num_inlier_points,
                recorded_inlier_buckets = self.num_inlier_buckets,
                "ledger counters drifted"
            );
            return false;
        }
        true
    }
}
