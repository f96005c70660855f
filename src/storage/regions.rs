//! Target-bucket (region) table of the primary index
//!
//! The primary indexer owns the physical partitioning; the correlation layer
//! only ever asks it for the current extent of a target bucket by id.
//!
//! File format:
//!
//! ```text
//! target_index_ranges <column> <count>
//! <target_bucket_id> <start> <end>     (count lines, strictly ascending ids)
//! ```

use crate::storage::error::{IndexError, IndexResult};
use crate::storage::files::{parse_field, FieldLines};
use crate::storage::types::{Key, KeyRange, TargetBucket, TargetBucketId};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Identity and extent of target buckets, as exposed by a primary indexer
pub trait PrimaryIndexer {
    /// Current extent of the target bucket, `None` if the id is unknown
    fn target_bucket(&self, id: TargetBucketId) -> Option<TargetBucket>;
}

/// Static id → key range table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetBucketTable {
    buckets: BTreeMap<TargetBucketId, KeyRange>,
    /// Indexed column and header line, when read from a file
    header: Option<(usize, usize)>,
    path: PathBuf,
}

impl TargetBucketTable {
    /// Build a table in memory
    pub fn from_buckets(buckets: impl IntoIterator<Item = TargetBucket>) -> Self {
        Self {
            buckets: buckets.into_iter().map(|b| (b.id, b.range)).collect(),
            header: None,
            path: PathBuf::new(),
        }
    }

    /// Read and validate a target-bucket file
    pub fn load(path: &Path) -> IndexResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| IndexError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let table = Self::parse(&text, path)?;
        tracing::info!("Read {} target buckets from {:?}", table.len(), path);
        Ok(table)
    }

    /// Parse target-bucket file contents; `path` is only used in error reports
    pub fn parse(text: &str, path: &Path) -> IndexResult<Self> {
        let mut lines = FieldLines::new(text, path);

        let (line, header) = lines.expect_line("`target_index_ranges <column> <count>`")?;
        if header.len() != 3 || header[0] != "target_index_ranges" {
            return Err(IndexError::parse(
                path,
                line,
                "expected `target_index_ranges <column> <count>`",
            ));
        }
        let column: usize = parse_field(path, line, header[1], "column")?;
        let count: usize = parse_field(path, line, header[2], "target bucket count")?;
        let header = Some((column, line));

        let mut buckets = BTreeMap::new();
        let mut next_id: TargetBucketId = 0;
        for i in 0..count {
            let (line, fields) = lines.expect_line("target bucket line")?;
            if fields.len() != 3 {
                return Err(IndexError::parse(
                    path,
                    line,
                    format!("expected 3 fields, found {}", fields.len()),
                ));
            }
            let id: TargetBucketId = parse_field(path, line, fields[0], "target bucket id")?;
            let start: Key = parse_field(path, line, fields[1], "range start")?;
            let end: Key = parse_field(path, line, fields[2], "range end")?;
            if i > 0 && id < next_id {
                return Err(IndexError::parse(
                    path,
                    line,
                    "target buckets not listed in sorted order",
                ));
            }
            if end < start {
                return Err(IndexError::parse(path, line, "range end before range start"));
            }
            next_id = id.saturating_add(1);
            buckets.insert(id, KeyRange::new(start, end));
        }

        if let Some((line, _)) = lines.next_line() {
            return Err(IndexError::parse(path, line, "unexpected trailing content"));
        }

        Ok(Self {
            buckets,
            header,
            path: path.to_path_buf(),
        })
    }

    /// Key range of a target bucket
    pub fn get(&self, id: TargetBucketId) -> Option<KeyRange> {
        self.buckets.get(&id).copied()
    }

    /// Add or replace a target bucket
    pub fn insert(&mut self, bucket: TargetBucket) {
        self.buckets.insert(bucket.id, bucket.range);
    }

    /// Drop a target bucket, returning its last known range
    pub fn remove(&mut self, id: TargetBucketId) -> Option<KeyRange> {
        self.buckets.remove(&id)
    }

    /// All target buckets in id order
    pub fn iter(&self) -> impl Iterator<Item = TargetBucket> + '_ {
        self.buckets
            .iter()
            .map(|(&id, &range)| TargetBucket { id, range })
    }

    /// Smallest key range covering every target bucket
    pub fn span(&self) -> KeyRange {
        let start = self.buckets.values().map(|r| r.start).min().unwrap_or(0);
        let end = self.buckets.values().map(|r| r.end).max().unwrap_or(0);
        KeyRange::new(start, end)
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Column named in the file header (`None` when built in memory)
    pub fn column(&self) -> Option<usize> {
        self.header.map(|(column, _)| column)
    }

    /// Fail if the file header names a column other than `column`
    pub fn check_column(&self, column: usize) -> IndexResult<()> {
        match self.header {
            Some((found, line)) if found != column => Err(IndexError::parse(
                &self.path,
                line,
                format!("target buckets index column {}, expected {}", found, column),
            )),
            _ => Ok(()),
        }
    }

    /// File the table was read from (empty when built in memory)
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PrimaryIndexer for TargetBucketTable {
    fn target_bucket(&self, id: TargetBucketId) -> Option<TargetBucket> {
        self.get(id).map(|range| TargetBucket { id, range })
    }
}
