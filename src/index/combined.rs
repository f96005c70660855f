//! Combined Correlation Index - the externally visible index
//!
//! ```text
//!                 insert(records)
//!                       │ runs per target bucket
//!                       ▼
//!             ┌───────────────────┐   DiffMap   ┌──────────────────┐
//!             │CorrelationTracker │────────────▶│   process_diffs  │
//!             └───────────────────┘             └──┬────────────┬──┘
//!                                      add/remove  │            │ insert/remove
//!                                                  ▼            ▼
//!                                   ┌───────────────────┐ ┌──────────────┐
//!   key_ranges(query) ◀── union ────│MappedCorrelation  │ │AuxiliaryIndex│
//!                                   │Index (inliers)    │ │(outlier rows)│
//!                                   └───────────────────┘ └──────────────┘
//! ```
//!
//! After every maintenance call the mapped index holds exactly the inlier
//! (map bucket, target bucket) pairs of the tracker's ledgers, and the
//! auxiliary index holds exactly the rows of the outlier pairs. Pairs preloaded
//! from the mapping section stand in until their target bucket gets a ledger.

use crate::index::diff::{DiffMap, DiffSummary, DiffType};
use crate::index::ledger::CostModel;
use crate::index::mapped::MappedCorrelationIndex;
use crate::index::merge::KeySet;
use crate::index::tracker::CorrelationTracker;
use crate::storage::{
    AuxiliaryIndex, Dataset, IndexError, IndexResult, InsertRecord, KeyPair, KeyRange,
    MapBucketId, MappingFile, PrimaryIndexer, Query, SecondaryBTreeIndex, TargetBucket,
    TargetBucketId, TargetBucketTable, ValueRange,
};
use serde::Serialize;
use std::path::Path;
use std::time::Instant;

/// Association counts of the combined index
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    /// (map bucket, target bucket) pairs tracked as inliers
    pub inlier_buckets: usize,
    /// (map bucket, target bucket) pairs tracked as outliers
    pub outlier_buckets: usize,
    /// Rows held by the auxiliary index
    pub outlier_rows: usize,
    /// Target buckets with a ledger
    pub target_buckets: usize,
}

/// Correlation index over one column: mapped inlier ranges plus exact outlier keys
pub struct CombinedCorrelationIndex {
    mapped: MappedCorrelationIndex,
    aux: Box<dyn AuxiliaryIndex>,
    tracker: CorrelationTracker,
    diffs: DiffMap,
}

impl CombinedCorrelationIndex {
    /// Assemble an index from its parts. All three must describe the same column.
    pub fn new(
        mapped: MappedCorrelationIndex,
        aux: Box<dyn AuxiliaryIndex>,
        tracker: CorrelationTracker,
    ) -> Self {
        assert_eq!(
            mapped.column(),
            tracker.column(),
            "mapped index and tracker disagree on the column"
        );
        Self {
            mapped,
            aux,
            tracker,
            diffs: DiffMap::new(),
        }
    }

    /// Build an index with a B-tree auxiliary index
    pub fn from_mapping(
        mapping: &MappingFile,
        targets: TargetBucketTable,
        cost: CostModel,
        scan_batch_rows: usize,
    ) -> IndexResult<Self> {
        let mapped = MappedCorrelationIndex::new(mapping, targets)?;
        let tracker = CorrelationTracker::new(mapping, cost).scan_batch_rows(scan_batch_rows);
        let aux = Box::new(SecondaryBTreeIndex::new(mapping.column));
        Ok(Self::new(mapped, aux, tracker))
    }

    /// Load the mapping file and the target-bucket file
    pub fn from_files(
        mapping_path: &Path,
        targets_path: &Path,
        cost: CostModel,
        scan_batch_rows: usize,
    ) -> IndexResult<Self> {
        let mapping = MappingFile::load(mapping_path)?;
        let targets = TargetBucketTable::load(targets_path)?;
        Self::from_mapping(&mapping, targets, cost, scan_batch_rows)
    }

    // ==================== Queries ====================

    /// Keys that may match the query: inlier key ranges plus exact outlier keys
    pub fn key_ranges(&self, query: &Query) -> KeySet {
        let start = Instant::now();
        let ranges = self.mapped.key_ranges(query);
        let mapped_at = Instant::now();

        let mut list = self.aux.matches(query);
        list.sort_unstable();
        let matched_at = Instant::now();

        let set = KeySet::union(ranges, list);
        let end = Instant::now();

        tracing::debug!(
            ranges = set.ranges.len(),
            list = set.list.len(),
            range_us = (mapped_at - start).as_micros() as u64,
            match_us = (matched_at - mapped_at).as_micros() as u64,
            merge_us = (end - matched_at).as_micros() as u64,
            "Correlation index query"
        );
        set
    }

    // ==================== Maintenance ====================

    /// Index rows just written by the primary indexer.
    ///
    /// Records must be grouped by target bucket in ascending id order. The whole
    /// batch is validated before anything is modified.
    pub fn insert(
        &mut self,
        records: &[InsertRecord],
        primary: &dyn PrimaryIndexer,
        dataset: &dyn Dataset,
    ) -> IndexResult<DiffSummary> {
        let mut runs: Vec<(TargetBucket, Vec<KeyPair>)> = Vec::new();
        for record in records {
            if self.tracker.map_bucket_for(record.value).is_none() {
                return Err(IndexError::OutOfDomain {
                    value: record.value,
                });
            }
            let row = (record.value, record.key);
            if let Some((bucket, rows)) = runs.last_mut() {
                if bucket.id == record.target_bucket {
                    rows.push(row);
                    continue;
                }
                if record.target_bucket < bucket.id {
                    return Err(IndexError::InsertOrder {
                        previous: bucket.id,
                        next: record.target_bucket,
                    });
                }
            }
            let bucket = primary
                .target_bucket(record.target_bucket)
                .ok_or(IndexError::UnknownTargetBucket(record.target_bucket))?;
            runs.push((bucket, vec![row]));
        }

        for (bucket, rows) in &runs {
            self.mapped.set_target_bucket(*bucket);
            self.tracker
                .insert_batch(*bucket, rows, dataset, &mut self.diffs)?;
        }
        let diffs = self.diffs.take();
        let summary = self.process_diffs(&diffs, primary);
        tracing::debug!(
            "Inserted {} rows into {} target buckets: {}",
            records.len(),
            runs.len(),
            summary
        );
        Ok(summary)
    }

    /// Apply tracker diffs to the mapped and auxiliary indexes
    ///
    /// # Panics
    /// Panics on a `NoDiff` record or a target bucket the primary indexer does not know
    pub fn process_diffs(&mut self, diffs: &DiffMap, primary: &dyn PrimaryIndexer) -> DiffSummary {
        let mut summary = DiffSummary::default();
        let mut outliers: Vec<KeyPair> = Vec::new();

        for (map_bucket, diff) in diffs.iter() {
            summary.count(diff);
            match diff.diff_type {
                DiffType::NewInlier => self.mapped.add_bucket(map_bucket, diff.target_bucket),
                DiffType::OutlierToInlier => {
                    let (values, keys) = self.window(map_bucket, diff.target_bucket, primary);
                    self.aux.remove(values, keys);
                    self.mapped.add_bucket(map_bucket, diff.target_bucket);
                }
                DiffType::NewOutlier => {
                    // Drops a pair preloaded from the mapping section
                    self.mapped.remove_bucket(map_bucket, diff.target_bucket);
                    outliers.extend_from_slice(&diff.indexes);
                }
                DiffType::RemainOutlier => outliers.extend_from_slice(&diff.indexes),
                DiffType::InlierToOutlier => {
                    // The payload holds every row of the pair, old and new
                    self.mapped.remove_bucket(map_bucket, diff.target_bucket);
                    let (values, keys) = self.window(map_bucket, diff.target_bucket, primary);
                    self.aux.remove(values, keys);
                    outliers.extend_from_slice(&diff.indexes);
                }
                DiffType::RemainInlier => {}
                DiffType::NoDiff => panic!(
                    "no-op diff reached the combined index for map bucket {}",
                    map_bucket
                ),
            }
        }

        outliers.sort_by_key(|&(value, _)| value);
        self.aux.insert(&outliers);
        summary
    }

    /// Value range of a map bucket and key range of a target bucket
    fn window(
        &self,
        map_bucket: MapBucketId,
        target: TargetBucketId,
        primary: &dyn PrimaryIndexer,
    ) -> (ValueRange, KeyRange) {
        let bucket = match primary.target_bucket(target) {
            Some(bucket) => bucket,
            None => panic!("target bucket {} not found", target),
        };
        (self.mapped.value_range(map_bucket), bucket.range)
    }

    /// Re-index a target bucket the primary indexer split into `new_regions`
    pub fn split_target_bucket(
        &mut self,
        original: TargetBucketId,
        new_regions: &[TargetBucket],
        primary: &dyn PrimaryIndexer,
        dataset: &dyn Dataset,
    ) -> IndexResult<DiffSummary> {
        let stale = self
            .tracker
            .ledger(original)
            .map(|ledger| ledger.entries().to_vec())
            .unwrap_or_default();
        let extent = self.mapped.targets().get(original);

        let mut diffs = DiffMap::new();
        self.tracker
            .insert_with_target_bucket_split(original, new_regions, dataset, &mut diffs)?;

        for stat in &stale {
            if stat.is_outlier {
                if let Some(keys) = extent {
                    let values = self.mapped.value_range(stat.map_bucket_id);
                    self.aux.remove(values, keys);
                }
            } else {
                self.mapped.remove_bucket(stat.map_bucket_id, original);
            }
        }
        self.mapped.replace_target_bucket(original, new_regions);

        let summary = self.process_diffs(&diffs, primary);
        tracing::info!(
            "Split target bucket {} into {} regions: {}",
            original,
            new_regions.len(),
            summary
        );
        Ok(summary)
    }

    /// Rebuild everything from a full scan of `regions`.
    ///
    /// On error the index is left unchanged.
    pub fn rebuild(
        &mut self,
        regions: &[TargetBucket],
        primary: &dyn PrimaryIndexer,
        dataset: &dyn Dataset,
    ) -> IndexResult<DiffSummary> {
        let mut tracker = self.tracker.fresh();
        let mut diffs = DiffMap::new();
        for region in regions {
            tracker.insert_entire_bucket(*region, dataset, &mut diffs)?;
        }

        self.tracker = tracker;
        self.mapped.clear();
        self.aux.clear();
        for region in regions {
            self.mapped.set_target_bucket(*region);
        }
        let summary = self.process_diffs(&diffs, primary);
        tracing::info!(
            "Rebuilt correlation index over {} target buckets: {}",
            regions.len(),
            summary
        );
        Ok(summary)
    }

    // ==================== Accessors ====================

    pub fn stats(&self) -> IndexStats {
        let mut stats = IndexStats {
            outlier_rows: self.aux.len(),
            target_buckets: self.tracker.num_ledgers(),
            ..IndexStats::default()
        };
        for ledger in self.tracker.ledgers() {
            stats.inlier_buckets += ledger.num_inlier_buckets() as usize;
            stats.outlier_buckets += ledger.len() - ledger.num_inlier_buckets() as usize;
        }
        stats
    }

    pub fn mapped(&self) -> &MappedCorrelationIndex {
        &self.mapped
    }

    pub fn tracker(&self) -> &CorrelationTracker {
        &self.tracker
    }

    pub fn aux(&self) -> &dyn AuxiliaryIndex {
        self.aux.as_ref()
    }

    pub fn column(&self) -> usize {
        self.mapped.column()
    }

    /// Memory footprint of the query structures
    pub fn size_bytes(&self) -> usize {
        self.mapped.size_bytes() + self.aux.size_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ColumnDataset, Scalar};

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

    fn index() -> CombinedCorrelationIndex {
        CombinedCorrelationIndex::from_mapping(
            &mapping(),
            TargetBucketTable::default(),
            CostModel::new(5.0, 0.0),
            64,
        )
        .unwrap()
    }

    /// Appends rows to the dataset and returns their insert records for one target bucket
    fn append(
        ds: &mut ColumnDataset,
        table: &mut TargetBucketTable,
        target: TargetBucketId,
        values: &[Scalar],
    ) -> Vec<InsertRecord> {
        let start = table.get(target).map(|r| r.start).unwrap_or(ds.len() as u64);
        let records: Vec<InsertRecord> = values
            .iter()
            .map(|&v| InsertRecord::new(v, ds.push_row(&[v]), target))
            .collect();
        table.insert(TargetBucket::new(target, start, ds.len() as u64));
        records
    }

    #[test]
    fn test_inlier_and_outlier_rows() {
        let mut idx = index();
        let mut ds = ColumnDataset::new(1);
        let mut table = TargetBucketTable::default();
        let records = append(&mut ds, &mut table, 0, &[1, 2, 3, 4, 5, 25]);

        let summary = idx.insert(&records, &table, &ds).unwrap();
        assert_eq!(summary.new_inlier, 1);
        assert_eq!(summary.new_outlier, 1);
        assert_eq!(summary.outlier_rows, 1);

        let set = idx.key_ranges(&Query::between(0, 2, 3));
        assert_eq!(set.ranges, vec![KeyRange::new(0, 6)]);
        assert!(set.list.is_empty());

        let set = idx.key_ranges(&Query::between(0, 21, 29));
        assert!(set.ranges.is_empty());
        assert_eq!(set.list, vec![5]);

        assert_eq!(
            idx.stats(),
            IndexStats {
                inlier_buckets: 1,
                outlier_buckets: 1,
                outlier_rows: 1,
                target_buckets: 1,
            }
        );
    }

    #[test]
    fn test_outlier_to_inlier_evicts_exact_rows() {
        let mut idx = index();
        let mut ds = ColumnDataset::new(1);
        let mut table = TargetBucketTable::default();

        let mut values = vec![15];
        values.extend([5; 10]);
        let records = append(&mut ds, &mut table, 0, &values);
        idx.insert(&records, &table, &ds).unwrap();
        assert_eq!(idx.aux().len(), 1);

        let records = append(&mut ds, &mut table, 0, &[15; 10]);
        let summary = idx.insert(&records, &table, &ds).unwrap();
        assert_eq!(summary.outlier_to_inlier, 1);
        assert!(idx.aux().is_empty());
        assert_eq!(idx.mapped().inlier_targets(1), &[0]);
        assert_eq!(
            idx.key_ranges(&Query::between(0, 15, 15)).ranges,
            vec![KeyRange::new(0, 21)]
        );
    }

    #[test]
    fn test_inlier_to_outlier_moves_old_rows() {
        let mut idx = index();
        let mut ds = ColumnDataset::new(1);
        let mut table = TargetBucketTable::default();

        let records = append(&mut ds, &mut table, 0, &[15, 15, 15]);
        idx.insert(&records, &table, &ds).unwrap();
        assert_eq!(idx.mapped().inlier_targets(1), &[0]);

        let records = append(&mut ds, &mut table, 0, &[5; 97]);
        let summary = idx.insert(&records, &table, &ds).unwrap();
        assert_eq!(summary.inlier_to_outlier, 1);
        assert!(idx.mapped().inlier_targets(1).is_empty());

        let set = idx.key_ranges(&Query::between(0, 10, 19));
        assert!(set.ranges.is_empty());
        assert_eq!(set.list, vec![0, 1, 2]);
    }

    #[test]
    fn test_preloaded_pairs_follow_the_ledger() {
        let preloaded = mapping().assign(1, vec![0]).assign(2, vec![0]);
        let mut idx = CombinedCorrelationIndex::from_mapping(
            &preloaded,
            TargetBucketTable::from_buckets([TargetBucket::new(0, 0, 1)]),
            CostModel::new(5.0, 0.0),
            64,
        )
        .unwrap();
        let mut ds = ColumnDataset::new(1);
        let mut table = TargetBucketTable::default();

        let records = append(&mut ds, &mut table, 0, &[15, 15, 15]);
        let summary = idx.insert(&records, &table, &ds).unwrap();
        assert_eq!(summary.new_inlier, 1);
        assert_eq!(idx.mapped().inlier_targets(1), &[0]);

        let mut values = vec![5; 97];
        values.push(25);
        let records = append(&mut ds, &mut table, 0, &values);
        let summary = idx.insert(&records, &table, &ds).unwrap();
        assert_eq!(summary.inlier_to_outlier, 1);
        assert_eq!(summary.new_outlier, 1);

        let ledger = idx.tracker().ledger(0).unwrap();
        assert!(ledger.get(1).unwrap().is_outlier);
        assert!(ledger.get(2).unwrap().is_outlier);
        assert!(idx.mapped().inlier_targets(1).is_empty());
        assert!(idx.mapped().inlier_targets(2).is_empty());
        assert_eq!(idx.mapped().inlier_targets(0), &[0]);
        assert_eq!(idx.mapped().num_associations(), 1);
        assert_eq!(idx.aux().len(), 4);

        let set = idx.key_ranges(&Query::between(0, 10, 29));
        assert!(set.ranges.is_empty());
        assert_eq!(set.list, vec![0, 1, 2, 100]);
    }

    #[test]
    fn test_insert_rejects_out_of_order_records() {
        let mut idx = index();
        let table = TargetBucketTable::from_buckets([
            TargetBucket::new(0, 0, 1),
            TargetBucket::new(1, 1, 2),
        ]);
        let ds = ColumnDataset::from_rows(&[vec![1], vec![2]]);
        let records = [InsertRecord::new(1, 1, 1), InsertRecord::new(2, 0, 0)];

        let err = idx.insert(&records, &table, &ds).unwrap_err();
        assert!(matches!(
            err,
            IndexError::InsertOrder {
                previous: 1,
                next: 0
            }
        ));
        assert_eq!(idx.tracker().num_ledgers(), 0);
    }

    #[test]
    fn test_insert_rejects_unknown_target() {
        let mut idx = index();
        let ds = ColumnDataset::from_rows(&[vec![1]]);
        let err = idx
            .insert(&[InsertRecord::new(1, 0, 3)], &TargetBucketTable::default(), &ds)
            .unwrap_err();
        assert!(matches!(err, IndexError::UnknownTargetBucket(3)));
    }

    #[test]
    fn test_insert_rejects_out_of_domain_before_mutation() {
        let mut idx = index();
        let mut ds = ColumnDataset::new(1);
        let mut table = TargetBucketTable::default();
        let mut records = append(&mut ds, &mut table, 0, &[1, 2]);
        records.extend(append(&mut ds, &mut table, 1, &[99]));

        let err = idx.insert(&records, &table, &ds).unwrap_err();
        assert!(matches!(err, IndexError::OutOfDomain { value: 99 }));
        assert_eq!(idx.tracker().num_ledgers(), 0);
        assert_eq!(idx.mapped().num_associations(), 0);
    }

    #[test]
    fn test_empty_insert() {
        let mut idx = index();
        let summary = idx
            .insert(&[], &TargetBucketTable::default(), &ColumnDataset::new(1))
            .unwrap();
        assert_eq!(summary.total(), 0);
    }

    #[test]
    #[should_panic(expected = "no-op diff")]
    fn test_no_diff_panics() {
        let mut idx = index();
        let mut diffs = DiffMap::new();
        diffs.push(
            0,
            crate::index::Diff {
                diff_type: DiffType::NoDiff,
                target_bucket: 0,
                indexes: vec![],
            },
        );
        idx.process_diffs(&diffs, &TargetBucketTable::default());
    }

    #[test]
    fn test_split_and_rebuild() {
        let mut idx = index();
        let mut ds = ColumnDataset::new(1);
        let mut table = TargetBucketTable::default();
        let mut values = vec![1, 2, 3, 4, 5, 6, 7, 8];
        values.extend([12, 13, 14, 15, 16, 17, 18, 25]);
        let records = append(&mut ds, &mut table, 0, &values);
        idx.insert(&records, &table, &ds).unwrap();
        assert_eq!(idx.aux().len(), 1);

        table.remove(0);
        let regions = [TargetBucket::new(1, 0, 8), TargetBucket::new(2, 8, 16)];
        for region in regions {
            table.insert(region);
        }
        idx.split_target_bucket(0, &regions, &table, &ds).unwrap();

        assert_eq!(idx.mapped().inlier_targets(0), &[1]);
        assert_eq!(idx.mapped().inlier_targets(1), &[2]);
        assert_eq!(idx.aux().len(), 1);
        assert_eq!(idx.key_ranges(&Query::between(0, 25, 25)).list, vec![15]);
        assert_eq!(
            idx.key_ranges(&Query::between(0, 0, 9)).ranges,
            vec![KeyRange::new(0, 8)]
        );

        let before = idx.stats();
        idx.rebuild(&regions, &table, &ds).unwrap();
        assert_eq!(idx.stats(), before);
        assert_eq!(idx.mapped().inlier_targets(0), &[1]);
        assert!(idx.size_bytes() > 0);
    }
}
