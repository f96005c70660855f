//! Correlation Tracker - routes inserted rows to per target bucket ledgers
//!
//! ```text
//! rows (value, key) ──map_bucket_for──▶ counts per map bucket
//!                                           │
//!                                           ▼
//!                     BucketLedger (one per target bucket)
//!                                           │ LedgerDiffs
//!                                           ▼
//!                     merge_diffs ──▶ DiffMap (map bucket → Vec<Diff>)
//!                          │
//!                          └── inlier → outlier: rescan the target bucket
//! ```
//!
//! Becoming an inlier only needs an id; becoming an outlier needs every row of
//! the map bucket inside the target bucket, which is only recoverable by reading
//! the target bucket back from the dataset.

use crate::index::diff::{Diff, DiffMap, DiffType, LedgerDiffs};
use crate::index::ledger::{BucketLedger, CostModel};
use crate::storage::{
    low_bits, Dataset, IndexError, IndexResult, KeyPair, KeyRange, MapBucketId, MappingFile,
    Scalar, TargetBucket, TargetBucketId, ValueRange, MAX_BATCH_ROWS,
};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Rows grouped by map bucket, ascending by map bucket id
type Grouped = BTreeMap<MapBucketId, Vec<KeyPair>>;

/// Owner of every target bucket's ledger and of the map-bucket boundary table
#[derive(Debug, Clone)]
pub struct CorrelationTracker {
    column: usize,
    cost: CostModel,
    scan_batch_rows: usize,
    /// range start → (map bucket id, range)
    boundaries: BTreeMap<Scalar, (MapBucketId, ValueRange)>,
    ledgers: HashMap<TargetBucketId, BucketLedger>,
}

impl CorrelationTracker {
    /// Create a tracker over the map buckets of a mapping
    pub fn new(mapping: &MappingFile, cost: CostModel) -> Self {
        let boundaries = mapping
            .buckets
            .iter()
            .map(|&(id, range)| (range.start, (id, range)))
            .collect();
        Self {
            column: mapping.column,
            cost,
            scan_batch_rows: MAX_BATCH_ROWS,
            boundaries,
            ledgers: HashMap::new(),
        }
    }

    /// Load the boundary table from a mapping file
    pub fn from_mapping_file(path: &Path, cost: CostModel) -> IndexResult<Self> {
        let mapping = MappingFile::load(path)?;
        Ok(Self::new(&mapping, cost))
    }

    /// Builder method: rows read per dataset call during rescans, clamped to 1..=64
    pub fn scan_batch_rows(mut self, rows: usize) -> Self {
        self.scan_batch_rows = rows.clamp(1, MAX_BATCH_ROWS);
        self
    }

    /// Map bucket whose range contains `value`
    pub fn map_bucket_for(&self, value: Scalar) -> Option<MapBucketId> {
        self.boundaries
            .range(..=value)
            .next_back()
            .filter(|(_, (_, range))| range.contains(value))
            .map(|(_, &(id, _))| id)
    }

    /// Record rows newly written into `target` and accumulate the resulting diffs.
    ///
    /// Fails without touching any ledger if a value lies outside every map bucket.
    pub fn insert_batch(
        &mut self,
        target: TargetBucket,
        rows: &[KeyPair],
        dataset: &dyn Dataset,
        diffs: &mut DiffMap,
    ) -> IndexResult<()> {
        let grouped = self.group(rows.iter().copied())?;
        self.apply(target, grouped, dataset, diffs);
        Ok(())
    }

    /// Count every row of `target` by scanning its physical range
    pub fn insert_entire_bucket(
        &mut self,
        target: TargetBucket,
        dataset: &dyn Dataset,
        diffs: &mut DiffMap,
    ) -> IndexResult<()> {
        let grouped = self.scan_bucket(target.range, dataset)?;
        self.apply(target, grouped, dataset, diffs);
        Ok(())
    }

    /// Replace the ledger of a split target bucket with fresh ledgers for the new regions.
    ///
    /// The caller must already have removed the original bucket's rows from the
    /// mapped and exact indexes.
    ///
    /// # Panics
    /// Panics if a new region reuses the id of a live ledger
    pub fn insert_with_target_bucket_split(
        &mut self,
        original: TargetBucketId,
        new_regions: &[TargetBucket],
        dataset: &dyn Dataset,
        diffs: &mut DiffMap,
    ) -> IndexResult<()> {
        let scans = new_regions
            .iter()
            .map(|region| Ok((*region, self.scan_bucket(region.range, dataset)?)))
            .collect::<IndexResult<Vec<_>>>()?;

        self.ledgers.remove(&original);
        for (region, grouped) in scans {
            assert!(
                !self.ledgers.contains_key(&region.id),
                "split added target bucket {} which already exists",
                region.id
            );
            self.apply(region, grouped, dataset, diffs);
        }
        tracing::debug!(
            "Split target bucket {} into {} regions",
            original,
            new_regions.len()
        );
        Ok(())
    }

    fn group(&self, rows: impl Iterator<Item = KeyPair>) -> IndexResult<Grouped> {
        let mut grouped = Grouped::new();
        for (value, key) in rows {
            let map_bucket = self
                .map_bucket_for(value)
                .ok_or(IndexError::OutOfDomain { value })?;
            grouped.entry(map_bucket).or_default().push((value, key));
        }
        Ok(grouped)
    }

    fn scan_bucket(&self, range: KeyRange, dataset: &dyn Dataset) -> IndexResult<Grouped> {
        let mut rows = Vec::with_capacity(range.len() as usize);
        self.scan(range, dataset, |value, key| rows.push((value, key)));
        self.group(rows.into_iter())
    }

    /// Read `range` from the dataset in masked batches
    fn scan(&self, range: KeyRange, dataset: &dyn Dataset, mut visit: impl FnMut(Scalar, u64)) {
        let mut start = range.start;
        while start < range.end {
            let end = range.end.min(start + self.scan_batch_rows as u64);
            let mask = low_bits((end - start) as usize);
            for (offset, value) in dataset
                .range_values(start, end, self.column, mask)
                .into_iter()
                .enumerate()
            {
                visit(value, start + offset as u64);
            }
            start = end;
        }
    }

    fn apply(
        &mut self,
        target: TargetBucket,
        grouped: Grouped,
        dataset: &dyn Dataset,
        diffs: &mut DiffMap,
    ) {
        if grouped.is_empty() {
            return;
        }
        let counts: Vec<(MapBucketId, u32)> = grouped
            .iter()
            .map(|(&id, rows)| (id, rows.len() as u32))
            .collect();

        let cost = self.cost;
        let ledger = self
            .ledgers
            .entry(target.id)
            .or_insert_with(|| BucketLedger::new(cost));
        let mut ledger_diffs = LedgerDiffs::new();
        ledger.add_points_batch(&counts, &mut ledger_diffs);
        debug_assert!(ledger.consistent());

        self.merge_diffs(target, &ledger_diffs, grouped, dataset, diffs);
    }

    /// Turn one ledger's diffs into actions, attaching the rows each action needs
    fn merge_diffs(
        &self,
        target: TargetBucket,
        ledger_diffs: &LedgerDiffs,
        mut grouped: Grouped,
        dataset: &dyn Dataset,
        diffs: &mut DiffMap,
    ) {
        let mut rescan: Grouped = Grouped::new();
        for (map_bucket, diff_type) in ledger_diffs.diffs() {
            let indexes = match diff_type {
                DiffType::NewInlier | DiffType::RemainInlier | DiffType::OutlierToInlier => {
                    Vec::new()
                }
                DiffType::NewOutlier | DiffType::RemainOutlier => {
                    let rows = grouped.remove(&map_bucket).unwrap_or_default();
                    assert!(
                        !rows.is_empty(),
                        "{} diff for map bucket {} without new rows",
                        diff_type,
                        map_bucket
                    );
                    rows
                }
                DiffType::InlierToOutlier => {
                    rescan.insert(map_bucket, Vec::new());
                    continue;
                }
                DiffType::NoDiff => unreachable!("ledger emitted a no-op diff"),
            };
            diffs.push(
                map_bucket,
                Diff {
                    diff_type,
                    target_bucket: target.id,
                    indexes,
                },
            );
        }

        if rescan.is_empty() {
            return;
        }
        let mut moved = 0;
        self.scan(target.range, dataset, |value, key| {
            let Some(map_bucket) = self.map_bucket_for(value) else {
                panic!(
                    "row {} of target bucket {} holds value {} outside every map bucket",
                    key, target.id, value
                );
            };
            if let Some(rows) = rescan.get_mut(&map_bucket) {
                rows.push((value, key));
                moved += 1;
            }
        });
        tracing::debug!(
            "Rescanned {} rows of target bucket {}, moving {} rows of {} map buckets to the exact index",
            target.range.len(),
            target.id,
            moved,
            rescan.len()
        );
        for (map_bucket, indexes) in rescan {
            diffs.push(
                map_bucket,
                Diff {
                    diff_type: DiffType::InlierToOutlier,
                    target_bucket: target.id,
                    indexes,
                },
            );
        }
    }

    /// Drop every ledger
    pub fn reset(&mut self) {
        self.ledgers.clear();
    }

    /// A tracker with the same boundaries and settings and no ledgers
    pub fn fresh(&self) -> Self {
        Self {
            column: self.column,
            cost: self.cost,
            scan_batch_rows: self.scan_batch_rows,
            boundaries: self.boundaries.clone(),
            ledgers: HashMap::new(),
        }
    }

    pub fn ledger(&self, target: TargetBucketId) -> Option<&BucketLedger> {
        self.ledgers.get(&target)
    }

    pub fn ledgers(&self) -> impl Iterator<Item = &BucketLedger> + '_ {
        self.ledgers.values()
    }

    pub fn num_ledgers(&self) -> usize {
        self.ledgers.len()
    }

    /// Column of the correlated dimension
    pub fn column(&self) -> usize {
        self.column
    }

    pub fn cost_model(&self) -> CostModel {
        self.cost
    }

    /// Map buckets in range order
    pub fn map_buckets(&self) -> impl Iterator<Item = (MapBucketId, ValueRange)> + '_ {
        self.boundaries.values().copied()
    }

    pub fn size_bytes(&self) -> usize {
        self.ledgers
            .values()
            .map(|l| l.size_bytes() + std::mem::size_of::<TargetBucketId>())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ColumnDataset;

    fn mapping() -> MappingFile {
        MappingFile::new(
            0,
            vec![
                (0, ValueRange::new(0, 10)),
                (1, ValueRange::new(10, 20)),
                (2, ValueRange::new(20, 30)),
            ],
        )
    }

    fn tracker() -> CorrelationTracker {
        CorrelationTracker::new(&mapping(), CostModel::new(5.0, 0.0))
    }

    fn dataset(values: &[Scalar]) -> ColumnDataset {
        let rows: Vec<Vec<Scalar>> = values.iter().map(|&v| vec![v]).collect();
        ColumnDataset::from_rows(&rows)
    }

    fn rows(values: &[Scalar], first_key: u64) -> Vec<KeyPair> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| (v, first_key + i as u64))
            .collect()
    }

    #[test]
    fn test_map_bucket_for() {
        let t = tracker();
        assert_eq!(t.map_bucket_for(-1), None);
        assert_eq!(t.map_bucket_for(0), Some(0));
        assert_eq!(t.map_bucket_for(9), Some(0));
        assert_eq!(t.map_bucket_for(10), Some(1));
        assert_eq!(t.map_bucket_for(29), Some(2));
        assert_eq!(t.map_bucket_for(30), None);
    }

    #[test]
    fn test_insert_batch_attaches_outlier_rows() {
        let values = [1, 2, 3, 4, 5, 25];
        let ds = dataset(&values);
        let mut t = tracker();
        let mut diffs = DiffMap::new();

        t.insert_batch(TargetBucket::new(0, 0, 6), &rows(&values, 0), &ds, &mut diffs)
            .unwrap();

        assert_eq!(
            diffs.get(0),
            &[Diff {
                diff_type: DiffType::NewInlier,
                target_bucket: 0,
                indexes: vec![],
            }]
        );
        assert_eq!(
            diffs.get(2),
            &[Diff {
                diff_type: DiffType::NewOutlier,
                target_bucket: 0,
                indexes: vec![(25, 5)],
            }]
        );
        assert!(diffs.get(1).is_empty());
        assert_eq!(t.ledger(0).unwrap().total_points(), 6);
    }

    #[test]
    fn test_inlier_to_outlier_rescans_bucket() {
        let mut values = vec![15, 15, 15];
        values.extend(std::iter::repeat(5).take(97));
        let ds = dataset(&values);
        let mut t = tracker().scan_batch_rows(8);
        let target = TargetBucket::new(0, 0, 100);

        let mut diffs = DiffMap::new();
        t.insert_batch(target, &rows(&values[..3], 0), &ds, &mut diffs)
            .unwrap();
        assert_eq!(diffs.get(1)[0].diff_type, DiffType::NewInlier);
        diffs.clear();

        t.insert_batch(target, &rows(&values[3..], 3), &ds, &mut diffs)
            .unwrap();
        assert_eq!(diffs.get(0)[0].diff_type, DiffType::NewInlier);
        assert_eq!(
            diffs.get(1),
            &[Diff {
                diff_type: DiffType::InlierToOutlier,
                target_bucket: 0,
                indexes: vec![(15, 0), (15, 1), (15, 2)],
            }]
        );
    }

    #[test]
    #[should_panic(expected = "row 1 of target bucket 0 holds value 99 outside every map bucket")]
    fn test_rescan_of_out_of_domain_row_panics() {
        // The dataset disagrees with the inserted value of row 1
        let mut values = vec![15, 99, 15];
        values.extend(std::iter::repeat(5).take(97));
        let ds = dataset(&values);
        let mut t = tracker();
        let target = TargetBucket::new(0, 0, 100);

        let mut diffs = DiffMap::new();
        t.insert_batch(target, &rows(&[15, 15, 15], 0), &ds, &mut diffs)
            .unwrap();
        t.insert_batch(target, &rows(&values[3..], 3), &ds, &mut diffs)
            .unwrap();
    }

    #[test]
    fn test_out_of_domain_leaves_tracker_untouched() {
        let ds = dataset(&[1, 30]);
        let mut t = tracker();
        let mut diffs = DiffMap::new();

        let err = t
            .insert_batch(TargetBucket::new(0, 0, 2), &[(1, 0), (30, 1)], &ds, &mut diffs)
            .unwrap_err();
        assert!(matches!(err, IndexError::OutOfDomain { value: 30 }));
        assert_eq!(t.num_ledgers(), 0);
        assert!(diffs.is_empty());
    }

    #[test]
    fn test_insert_entire_bucket_matches_batch() {
        let values = [1, 12, 12, 12, 25, 3, 14];
        let ds = dataset(&values);

        let mut scanned = tracker();
        scanned
            .insert_entire_bucket(TargetBucket::new(4, 0, 7), &ds, &mut DiffMap::new())
            .unwrap();

        let mut batched = tracker();
        batched
            .insert_batch(TargetBucket::new(4, 0, 7), &rows(&values, 0), &ds, &mut DiffMap::new())
            .unwrap();

        assert_eq!(
            scanned.ledger(4).unwrap().entries(),
            batched.ledger(4).unwrap().entries()
        );
    }

    #[test]
    fn test_split_rebuilds_new_regions() {
        let values = [1, 2, 3, 4, 5, 11, 12, 13, 14, 15];
        let ds = dataset(&values);
        let mut t = tracker();
        let mut diffs = DiffMap::new();
        t.insert_batch(TargetBucket::new(0, 0, 10), &rows(&values, 0), &ds, &mut diffs)
            .unwrap();
        diffs.clear();

        t.insert_with_target_bucket_split(
            0,
            &[TargetBucket::new(1, 0, 5), TargetBucket::new(2, 5, 10)],
            &ds,
            &mut diffs,
        )
        .unwrap();

        assert!(t.ledger(0).is_none());
        assert_eq!(t.num_ledgers(), 2);
        assert_eq!(t.ledger(1).unwrap().get(0).unwrap().num_points, 5);
        assert_eq!(t.ledger(2).unwrap().get(1).unwrap().num_points, 5);
        assert_eq!(diffs.get(0)[0].diff_type, DiffType::NewInlier);
        assert_eq!(diffs.get(0)[0].target_bucket, 1);
        assert_eq!(diffs.get(1)[0].target_bucket, 2);
        assert!(t.size_bytes() > 0);
    }

    #[test]
    #[should_panic(expected = "already exists")]
    fn test_split_into_existing_bucket_panics() {
        let ds = dataset(&[1, 2, 3, 4]);
        let mut t = tracker();
        let mut diffs = DiffMap::new();
        t.insert_batch(TargetBucket::new(0, 0, 2), &[(1, 0), (2, 1)], &ds, &mut diffs)
            .unwrap();
        t.insert_batch(TargetBucket::new(1, 2, 4), &[(3, 2), (4, 3)], &ds, &mut diffs)
            .unwrap();

        t.insert_with_target_bucket_split(0, &[TargetBucket::new(1, 0, 2)], &ds, &mut diffs)
            .unwrap();
    }

    #[test]
    fn test_reset_drops_ledgers() {
        let ds = dataset(&[1]);
        let mut t = tracker();
        t.insert_batch(TargetBucket::new(0, 0, 1), &[(1, 0)], &ds, &mut DiffMap::new())
            .unwrap();
        assert_eq!(t.num_ledgers(), 1);
        t.reset();
        assert_eq!(t.num_ledgers(), 0);
        assert_eq!(t.size_bytes(), 0);
    }
}
