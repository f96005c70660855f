//! Mapping file format
//!
//! The mapping file defines the immutable map-bucket boundary table and,
//! optionally, the initial inlier assignment of target buckets:
//!
//! ```text
//! continuous-0
//! source <column> <count>
//! <map_bucket_id> <range_start> <range_end>     (count lines, ascending range_start)
//! mapping <n>                                    (optional)
//! <map_bucket_id> <target_id> <target_id> ...    (n lines, ascending target ids)
//! ```
//!
//! Numbers in the boundary lines are read as doubles and truncated to [`Scalar`].

use crate::storage::error::{IndexError, IndexResult};
use crate::storage::types::{MapBucketId, Scalar, TargetBucketId, ValueRange};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const MAPPING_HEADER: &str = "continuous-0";

/// Initial inlier target buckets of one map bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketAssignment {
    pub map_bucket: MapBucketId,
    pub targets: Vec<TargetBucketId>,
    /// 1-based line in the source file, 0 when built in memory
    pub line: usize,
}

/// Parsed contents of a mapping file
#[derive(Debug, Clone, PartialEq)]
pub struct MappingFile {
    /// Where the mapping was read from
    pub path: PathBuf,
    /// Column of the correlated dimension
    pub column: usize,
    /// Map buckets, ascending by range start
    pub buckets: Vec<(MapBucketId, ValueRange)>,
    /// Contents of the optional `mapping` section
    pub assignments: Vec<BucketAssignment>,
}

impl MappingFile {
    /// Build a mapping in memory. Buckets must be sorted by range start.
    pub fn new(column: usize, buckets: Vec<(MapBucketId, ValueRange)>) -> Self {
        Self {
            path: PathBuf::new(),
            column,
            buckets,
            assignments: Vec::new(),
        }
    }

    /// Builder method: add an initial inlier assignment
    pub fn assign(mut self, map_bucket: MapBucketId, targets: Vec<TargetBucketId>) -> Self {
        self.assignments.push(BucketAssignment {
            map_bucket,
            targets,
            line: 0,
        });
        self
    }

    /// Read and validate a mapping file
    pub fn load(path: &Path) -> IndexResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| IndexError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mapping = Self::parse(&text, path)?;
        tracing::info!(
            "Read {} map buckets and {} assignments from {:?}",
            mapping.buckets.len(),
            mapping.assignments.len(),
            path
        );
        Ok(mapping)
    }

    /// Parse mapping file contents; `path` is only used in error reports
    pub fn parse(text: &str, path: &Path) -> IndexResult<Self> {
        let mut lines = FieldLines::new(text, path);

        let (line, header) = lines.expect_line("header `continuous-0`")?;
        if header != [MAPPING_HEADER] {
            return Err(IndexError::parse(
                path,
                line,
                format!("expected header `{}`", MAPPING_HEADER),
            ));
        }

        let (line, source) = lines.expect_line("`source <column> <count>`")?;
        if source.len() != 3 || source[0] != "source" {
            return Err(IndexError::parse(
                path,
                line,
                "expected `source <column> <count>`",
            ));
        }
        let column: usize = parse_field(path, line, source[1], "column")?;
        let count: usize = parse_field(path, line, source[2], "bucket count")?;

        let mut buckets = Vec::with_capacity(count);
        let mut seen = HashSet::with_capacity(count);
        let mut prev: Option<ValueRange> = None;
        for _ in 0..count {
            let (line, fields) = lines.expect_line("map bucket line")?;
            if fields.len() != 3 {
                return Err(IndexError::parse(
                    path,
                    line,
                    format!("expected 3 fields, found {}", fields.len()),
                ));
            }
            let id: f64 = parse_field(path, line, fields[0], "map bucket id")?;
            let start: f64 = parse_field(path, line, fields[1], "range start")?;
            let end: f64 = parse_field(path, line, fields[2], "range end")?;
            if !(id >= 0.0 && id <= MapBucketId::MAX as f64) {
                return Err(IndexError::parse(path, line, "invalid map bucket id"));
            }
            let id = id as MapBucketId;
            let range = ValueRange::new(start as Scalar, end as Scalar);

            if range.end < range.start {
                return Err(IndexError::parse(path, line, "range end before range start"));
            }
            if let Some(prev) = prev {
                if range.start <= prev.start {
                    return Err(IndexError::parse(
                        path,
                        line,
                        "map buckets not sorted by range start",
                    ));
                }
                if range.start < prev.end {
                    return Err(IndexError::parse(
                        path,
                        line,
                        format!("map bucket overlaps [{}, {})", prev.start, prev.end),
                    ));
                }
            }
            if !seen.insert(id) {
                return Err(IndexError::parse(
                    path,
                    line,
                    format!("duplicate map bucket id {}", id),
                ));
            }
            prev = Some(range);
            buckets.push((id, range));
        }

        let mut assignments = Vec::new();
        if let Some((line, fields)) = lines.next_line() {
            if fields.len() != 2 || fields[0] != "mapping" {
                return Err(IndexError::parse(path, line, "expected `mapping <count>`"));
            }
            let n: usize = parse_field(path, line, fields[1], "mapping count")?;
            if n > buckets.len() {
                return Err(IndexError::parse(
                    path,
                    line,
                    "more mappings than map buckets",
                ));
            }
            let mut mapped = HashSet::with_capacity(n);
            for _ in 0..n {
                let (line, fields) = lines.expect_line("mapping line")?;
                let map_bucket: MapBucketId = parse_field(path, line, fields[0], "map bucket id")?;
                if !seen.contains(&map_bucket) {
                    return Err(IndexError::parse(
                        path,
                        line,
                        format!("unknown map bucket {}", map_bucket),
                    ));
                }
                if !mapped.insert(map_bucket) {
                    return Err(IndexError::parse(
                        path,
                        line,
                        format!("map bucket {} mapped twice", map_bucket),
                    ));
                }
                let targets = fields[1..]
                    .iter()
                    .map(|f| parse_field::<TargetBucketId>(path, line, f, "target bucket id"))
                    .collect::<IndexResult<Vec<_>>>()?;
                if targets.windows(2).any(|w| w[0] > w[1]) {
                    return Err(IndexError::parse(path, line, "target buckets not sorted"));
                }
                assignments.push(BucketAssignment {
                    map_bucket,
                    targets,
                    line,
                });
            }
        }

        if let Some((line, _)) = lines.next_line() {
            return Err(IndexError::parse(path, line, "unexpected trailing content"));
        }

        Ok(Self {
            path: path.to_path_buf(),
            column,
            buckets,
            assignments,
        })
    }
}

/// Iterator over the non-empty, whitespace-split lines of a file, with 1-based line numbers
pub(crate) struct FieldLines<'a> {
    inner: std::iter::Enumerate<std::str::Lines<'a>>,
    path: &'a Path,
    last_line: usize,
}

impl<'a> FieldLines<'a> {
    pub(crate) fn new(text: &'a str, path: &'a Path) -> Self {
        Self {
            inner: text.lines().enumerate(),
            path,
            last_line: 0,
        }
    }

    pub(crate) fn next_line(&mut self) -> Option<(usize, Vec<&'a str>)> {
        for (ix, raw) in self.inner.by_ref() {
            self.last_line = ix + 1;
            let fields: Vec<&str> = raw.split_whitespace().collect();
            if !fields.is_empty() {
                return Some((ix + 1, fields));
            }
        }
        None
    }

    pub(crate) fn expect_line(&mut self, what: &str) -> IndexResult<(usize, Vec<&'a str>)> {
        let path = self.path;
        match self.next_line() {
            Some(line) => Ok(line),
            None => Err(IndexError::parse(
                path,
                self.last_line + 1,
                format!("unexpected end of file, expected {}", what),
            )),
        }
    }
}

pub(crate) fn parse_field<T: std::str::FromStr>(
    path: &Path,
    line: usize,
    field: &str,
    what: &str,
) -> IndexResult<T> {
    field
        .parse()
        .map_err(|_| IndexError::parse(path, line, format!("invalid {}: `{}`", what, field)))
}
