//! Mapped Correlation Index - compact inlier structure
//!
//! For every map bucket the index stores the target buckets in which the map
//! bucket is an inlier. A range query collects those target buckets for every
//! map bucket it touches and turns them into coalesced physical key ranges.
//!
//! ```text
//!   map bucket range      inlier target buckets      key ranges
//!   [ 0, 10)       ──▶    [1, 2, 4]            ──▶   [0,200) [300,400)
//!   [10, 20)       ──▶    [2]                  ──▶   [100,200)
//! ```
//!
//! Target extents are resolved through the index's own target-bucket table at
//! query time, so growth reported by the primary indexer is picked up without
//! rewriting the inlier lists.

use crate::index::merge::coalesce;
use crate::storage::{
    IndexError, IndexResult, KeyRange, MapBucketId, MappingFile, Query, Scalar, TargetBucket,
    TargetBucketId, TargetBucketTable, ValueRange,
};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
struct MappedEntry {
    map_bucket: MapBucketId,
    range: ValueRange,
    /// Inlier target buckets, in insertion order
    targets: Vec<TargetBucketId>,
}

/// Map bucket → inlier target buckets
#[derive(Debug, Clone)]
pub struct MappedCorrelationIndex {
    column: usize,
    mapping_file: PathBuf,
    /// range start → entry
    lists: BTreeMap<Scalar, MappedEntry>,
    /// map bucket id → range start
    starts: HashMap<MapBucketId, Scalar>,
    targets: TargetBucketTable,
}

impl MappedCorrelationIndex {
    /// Build from a parsed mapping and the target-bucket table.
    ///
    /// Every target bucket named in the mapping section must exist and be non-empty.
    pub fn new(mapping: &MappingFile, targets: TargetBucketTable) -> IndexResult<Self> {
        targets.check_column(mapping.column)?;
        let mut lists = BTreeMap::new();
        let mut starts = HashMap::with_capacity(mapping.buckets.len());
        for &(map_bucket, range) in &mapping.buckets {
            starts.insert(map_bucket, range.start);
            lists.insert(
                range.start,
                MappedEntry {
                    map_bucket,
                    range,
                    targets: Vec::new(),
                },
            );
        }

        let mut index = Self {
            column: mapping.column,
            mapping_file: mapping.path.clone(),
            lists,
            starts,
            targets,
        };

        for assignment in &mapping.assignments {
            for &target in &assignment.targets {
                match index.targets.get(target) {
                    None => {
                        return Err(IndexError::parse(
                            &mapping.path,
                            assignment.line,
                            format!("target bucket {} not found", target),
                        ))
                    }
                    Some(range) if range.is_empty() => {
                        return Err(IndexError::parse(
                            &mapping.path,
                            assignment.line,
                            format!("target bucket {} is empty", target),
                        ))
                    }
                    Some(_) => {}
                }
            }
            index.entry_mut(assignment.map_bucket).targets = assignment.targets.clone();
        }

        tracing::info!(
            "Loaded mapped correlation index on column {} with {} map buckets, {} inlier associations and size {}",
            index.column,
            index.lists.len(),
            index.num_associations(),
            index.size_bytes()
        );
        Ok(index)
    }

    /// Load the mapping file and the target-bucket file
    pub fn from_files(mapping_path: &Path, targets_path: &Path) -> IndexResult<Self> {
        let mapping = MappingFile::load(mapping_path)?;
        let targets = TargetBucketTable::load(targets_path)?;
        Self::new(&mapping, targets)
    }

    fn start_of(&self, map_bucket: MapBucketId) -> Scalar {
        match self.starts.get(&map_bucket) {
            Some(&start) => start,
            None => panic!("unknown map bucket {}", map_bucket),
        }
    }

    fn entry(&self, map_bucket: MapBucketId) -> &MappedEntry {
        &self.lists[&self.start_of(map_bucket)]
    }

    fn entry_mut(&mut self, map_bucket: MapBucketId) -> &mut MappedEntry {
        let start = self.start_of(map_bucket);
        match self.lists.get_mut(&start) {
            Some(entry) => entry,
            None => panic!("unknown map bucket {}", map_bucket),
        }
    }

    fn resolve(&self, target: TargetBucketId) -> KeyRange {
        match self.targets.get(target) {
            Some(range) => range,
            None => panic!("target bucket {} not found", target),
        }
    }

    /// Physical key ranges that may hold rows matching the query's predicate on the
    /// mapped column. Without such a predicate, the whole key span.
    ///
    /// # Panics
    /// Panics if an inlier list names a target bucket missing from the table
    pub fn key_ranges(&self, query: &Query) -> Vec<KeyRange> {
        let Some(range) = query.range(self.column) else {
            let span = self.targets.span();
            return if span.is_empty() { Vec::new() } else { vec![span] };
        };
        let (lo, hi) = (*range.start(), *range.end());
        if lo > hi {
            return Vec::new();
        }

        // Map bucket ranges are disjoint, so walking back from `hi` visits them by
        // descending end
        let mut ids: Vec<TargetBucketId> = self
            .lists
            .range(..=hi)
            .rev()
            .take_while(|(_, entry)| entry.range.overlaps_inclusive(lo, hi))
            .flat_map(|(_, entry)| entry.targets.iter().copied())
            .collect();
        ids.sort_unstable();
        ids.dedup();

        let ranges = coalesce(ids.into_iter().map(|id| self.resolve(id)).collect());
        tracing::debug!("Mapped query [{}, {}] to {} key ranges", lo, hi, ranges.len());
        ranges
    }

    /// Record that `map_bucket` is an inlier in `target_bucket`. A pair already listed,
    /// e.g. preloaded from the mapping section, is kept once.
    ///
    /// # Panics
    /// Panics if the map bucket is unknown
    pub fn add_bucket(&mut self, map_bucket: MapBucketId, target_bucket: TargetBucketId) {
        let targets = &mut self.entry_mut(map_bucket).targets;
        if !targets.contains(&target_bucket) {
            targets.push(target_bucket);
        }
    }

    /// Drop one occurrence of `target_bucket` from the inlier list of `map_bucket`
    ///
    /// # Panics
    /// Panics if the map bucket is unknown
    pub fn remove_bucket(&mut self, map_bucket: MapBucketId, target_bucket: TargetBucketId) {
        let targets = &mut self.entry_mut(map_bucket).targets;
        if let Some(pos) = targets.iter().position(|&t| t == target_bucket) {
            targets.remove(pos);
        }
    }

    /// Add or refresh the extent of a target bucket
    pub fn set_target_bucket(&mut self, bucket: TargetBucket) {
        self.targets.insert(bucket);
    }

    /// Swap a split target bucket for its new regions. Any association still naming
    /// the original bucket is dropped.
    pub fn replace_target_bucket(&mut self, original: TargetBucketId, new_regions: &[TargetBucket]) {
        for entry in self.lists.values_mut() {
            entry.targets.retain(|&t| t != original);
        }
        self.targets.remove(original);
        for &region in new_regions {
            self.targets.insert(region);
        }
    }

    /// Drop every inlier association, keeping map buckets and target buckets
    pub fn clear(&mut self) {
        for entry in self.lists.values_mut() {
            entry.targets.clear();
        }
    }

    /// Value range of a map bucket
    ///
    /// # Panics
    /// Panics if the map bucket is unknown
    pub fn value_range(&self, map_bucket: MapBucketId) -> ValueRange {
        self.entry(map_bucket).range
    }

    /// Inlier target buckets of a map bucket
    pub fn inlier_targets(&self, map_bucket: MapBucketId) -> &[TargetBucketId] {
        &self.entry(map_bucket).targets
    }

    /// Coalesced key ranges of a map bucket's inlier target buckets
    pub fn bucket_key_ranges(&self, map_bucket: MapBucketId) -> Vec<KeyRange> {
        coalesce(
            self.entry(map_bucket)
                .targets
                .iter()
                .map(|&t| self.resolve(t))
                .collect(),
        )
    }

    /// Map buckets in range order
    pub fn map_buckets(&self) -> impl Iterator<Item = (MapBucketId, ValueRange)> + '_ {
        self.lists.values().map(|e| (e.map_bucket, e.range))
    }

    /// Total number of (map bucket, target bucket) inlier associations
    pub fn num_associations(&self) -> usize {
        self.lists.values().map(|e| e.targets.len()).sum()
    }

    pub fn targets(&self) -> &TargetBucketTable {
        &self.targets
    }

    /// Column of the correlated dimension
    pub fn column(&self) -> usize {
        self.column
    }

    /// File the map buckets were read from (empty when built in memory)
    pub fn mapping_file(&self) -> &Path {
        &self.mapping_file
    }

    pub fn size_bytes(&self) -> usize {
        // Tree node overhead of roughly 10 bytes per entry
        self.lists.len() * (std::mem::size_of::<ValueRange>() + 10)
            + self.num_associations() * std::mem::size_of::<TargetBucketId>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn targets() -> TargetBucketTable {
        TargetBucketTable::from_buckets([
            TargetBucket::new(1, 0, 100),
            TargetBucket::new(2, 100, 200),
            TargetBucket::new(3, 200, 300),
            TargetBucket::new(4, 300, 400),
            TargetBucket::new(5, 400, 400),
        ])
    }

    fn mapping() -> MappingFile {
        MappingFile::new(
            0,
            vec![
                (0, ValueRange::new(0, 10)),
                (1, ValueRange::new(10, 20)),
                (2, ValueRange::new(20, 30)),
            ],
        )
        .assign(0, vec![1, 2, 4])
        .assign(1, vec![2])
    }

    fn index() -> MappedCorrelationIndex {
        MappedCorrelationIndex::new(&mapping(), targets()).unwrap()
    }

    #[test]
    fn test_key_ranges_single_bucket() {
        let idx = index();
        assert_eq!(
            idx.key_ranges(&Query::between(0, 2, 5)),
            vec![KeyRange::new(0, 200), KeyRange::new(300, 400)]
        );
        assert_eq!(
            idx.key_ranges(&Query::between(0, 12, 12)),
            vec![KeyRange::new(100, 200)]
        );
    }

    #[test]
    fn test_key_ranges_inclusive_bounds() {
        let idx = index();
        // 10 is the first value of bucket 1 and outside bucket 0
        assert_eq!(
            idx.key_ranges(&Query::between(0, 10, 25)),
            vec![KeyRange::new(100, 200)]
        );
        assert_eq!(idx.key_ranges(&Query::between(0, 9, 10)).len(), 2);
        assert!(idx.key_ranges(&Query::between(0, 20, 29)).is_empty());
        assert!(idx.key_ranges(&Query::between(0, 30, 90)).is_empty());
        assert!(idx.key_ranges(&Query::between(0, 5, 1)).is_empty());
    }

    #[test]
    fn test_key_ranges_without_predicate() {
        let idx = index();
        assert_eq!(idx.key_ranges(&Query::new()), vec![KeyRange::new(0, 400)]);
        assert_eq!(idx.key_ranges(&Query::between(3, 0, 0)), vec![KeyRange::new(0, 400)]);
    }

    #[test]
    fn test_add_remove_round_trip() {
        let mut idx = index();
        let q = Query::between(0, 0, 29);
        let before = idx.key_ranges(&q);

        idx.add_bucket(2, 3);
        assert_eq!(idx.key_ranges(&q), vec![KeyRange::new(0, 400)]);

        idx.remove_bucket(2, 3);
        assert_eq!(idx.key_ranges(&q), before);
    }

    #[test]
    fn test_add_listed_pair_is_kept_once() {
        let mut idx = index();
        idx.add_bucket(1, 2);
        assert_eq!(idx.inlier_targets(1), &[2]);
        assert_eq!(idx.num_associations(), 4);

        idx.remove_bucket(1, 9);
        assert_eq!(idx.inlier_targets(1), &[2]);
        idx.remove_bucket(1, 2);
        assert!(idx.inlier_targets(1).is_empty());
    }

    #[test]
    #[should_panic(expected = "unknown map bucket")]
    fn test_add_unknown_map_bucket_panics() {
        index().add_bucket(42, 1);
    }

    #[test]
    #[should_panic(expected = "not found")]
    fn test_query_unknown_target_panics() {
        let mut idx = index();
        idx.add_bucket(2, 77);
        idx.key_ranges(&Query::between(0, 25, 25));
    }

    #[test]
    fn test_unknown_target_in_mapping_rejected() {
        let err = MappedCorrelationIndex::new(&mapping().assign(2, vec![9]), targets()).unwrap_err();
        assert!(matches!(err, IndexError::Parse { .. }));
        assert!(err.to_string().contains("target bucket 9 not found"));
    }

    #[test]
    fn test_empty_target_in_mapping_rejected() {
        let err = MappedCorrelationIndex::new(&mapping().assign(2, vec![5]), targets()).unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_bucket_key_ranges_and_clear() {
        let mut idx = index();
        assert_eq!(
            idx.bucket_key_ranges(0),
            vec![KeyRange::new(0, 200), KeyRange::new(300, 400)]
        );
        assert_eq!(idx.value_range(1), ValueRange::new(10, 20));
        assert_eq!(idx.num_associations(), 4);

        idx.clear();
        assert_eq!(idx.num_associations(), 0);
        assert!(idx.key_ranges(&Query::between(0, 0, 29)).is_empty());
        assert_eq!(idx.map_buckets().count(), 3);
    }

    #[test]
    fn test_replace_target_bucket() {
        let mut idx = index();
        idx.replace_target_bucket(
            2,
            &[TargetBucket::new(6, 100, 150), TargetBucket::new(7, 150, 200)],
        );
        assert_eq!(idx.inlier_targets(0), &[1, 4]);
        assert!(idx.inlier_targets(1).is_empty());
        assert!(idx.targets().get(2).is_none());
        assert_eq!(idx.targets().get(7), Some(KeyRange::new(150, 200)));
    }

    #[test]
    fn test_from_files() {
        let dir = tempdir().unwrap();
        let mapping_path = dir.path().join("index.mapping");
        let targets_path = dir.path().join("index.targets");

        let mut f = std::fs::File::create(&mapping_path).unwrap();
        write!(f, "continuous-0\nsource 2 2\n0 0 50\n1 50 100\nmapping 1\n1 0 1\n").unwrap();
        let mut f = std::fs::File::create(&targets_path).unwrap();
        write!(f, "target_index_ranges 2 2\n0 0 10\n1 10 20\n").unwrap();

        let idx = MappedCorrelationIndex::from_files(&mapping_path, &targets_path).unwrap();
        assert_eq!(idx.column(), 2);
        assert_eq!(idx.mapping_file(), mapping_path.as_path());
        assert_eq!(
            idx.key_ranges(&Query::between(2, 60, 70)),
            vec![KeyRange::new(0, 20)]
        );
        assert!(idx.size_bytes() > 0);
    }

    #[test]
    fn test_from_files_column_mismatch() {
        let dir = tempdir().unwrap();
        let mapping_path = dir.path().join("index.mapping");
        let targets_path = dir.path().join("index.targets");
        std::fs::write(&mapping_path, "continuous-0\nsource 2 1\n0 0 50\n").unwrap();
        std::fs::write(&targets_path, "target_index_ranges 1 1\n0 0 10\n").unwrap();

        let err = MappedCorrelationIndex::from_files(&mapping_path, &targets_path).unwrap_err();
        match err {
            IndexError::Parse { path, line, .. } => {
                assert_eq!(path, targets_path);
                assert_eq!(line, 1);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
