//! Clustered dataset access
//!
//! The correlation index only reads raw values back when it has to recover
//! individual rows of a target bucket (inlier→outlier transitions and target
//! bucket splits). Reads are batched: at most 64 rows per call, selected by a
//! validity bitmask.

use crate::storage::error::{IndexError, IndexResult};
use crate::storage::types::{Key, Scalar};
use std::path::Path;

/// Maximum number of rows covered by one validity mask
pub const MAX_BATCH_ROWS: usize = 64;

/// Row-addressable dataset in clustered order
pub trait Dataset: Send + Sync {
    /// Values of `column` for rows `start..end` whose bit is set in `valid`
    /// (bit `i` selects row `start + i`). `end - start` is at most 64.
    fn range_values(&self, start: Key, end: Key, column: usize, valid: u64) -> Vec<Scalar>;

    /// Number of rows
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Validity mask with the lowest `n` bits set
pub fn low_bits(n: usize) -> u64 {
    debug_assert!(n <= MAX_BATCH_ROWS);
    if n >= MAX_BATCH_ROWS {
        u64::MAX
    } else {
        (1u64 << n) - 1
    }
}

/// Column-major in-memory table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnDataset {
    columns: Vec<Vec<Scalar>>,
    rows: usize,
}

impl ColumnDataset {
    /// Create an empty dataset with `width` columns
    pub fn new(width: usize) -> Self {
        Self {
            columns: vec![Vec::new(); width],
            rows: 0,
        }
    }

    /// Build from rows; every row must have the same width
    pub fn from_rows(rows: &[Vec<Scalar>]) -> Self {
        let width = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut dataset = Self::new(width);
        for row in rows {
            dataset.push_row(row);
        }
        dataset
    }

    /// Load a headerless numeric CSV file; fractional values are truncated
    pub fn from_csv(path: &Path) -> IndexResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .trim(csv::Trim::All)
            .from_path(path)?;

        let mut dataset: Option<ColumnDataset> = None;
        for (line, record) in reader.records().enumerate() {
            let record = record?;
            let row = record
                .iter()
                .map(|field| {
                    field
                        .parse::<f64>()
                        .map(|v| v as Scalar)
                        .map_err(|_| {
                            IndexError::parse(path, line + 1, format!("invalid value `{}`", field))
                        })
                })
                .collect::<IndexResult<Vec<_>>>()?;
            let ds = dataset.get_or_insert_with(|| ColumnDataset::new(row.len()));
            if row.len() != ds.width() {
                return Err(IndexError::parse(
                    path,
                    line + 1,
                    format!("expected {} columns, found {}", ds.width(), row.len()),
                ));
            }
            ds.push_row(&row);
        }

        let dataset = dataset.unwrap_or_default();
        tracing::info!(
            "Loaded {} rows x {} columns from {:?}",
            dataset.len(),
            dataset.width(),
            path
        );
        Ok(dataset)
    }

    /// Append a row, returning its physical key
    ///
    /// # Panics
    /// Panics if the row width does not match the dataset
    pub fn push_row(&mut self, row: &[Scalar]) -> Key {
        assert_eq!(row.len(), self.columns.len(), "row width mismatch");
        for (column, &value) in self.columns.iter_mut().zip(row) {
            column.push(value);
        }
        self.rows += 1;
        (self.rows - 1) as Key
    }

    /// Value of one cell
    pub fn value(&self, key: Key, column: usize) -> Option<Scalar> {
        self.columns.get(column)?.get(key as usize).copied()
    }

    /// Number of columns
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// All values of one column
    pub fn column(&self, column: usize) -> &[Scalar] {
        &self.columns[column]
    }
}

impl Dataset for ColumnDataset {
    fn range_values(&self, start: Key, end: Key, column: usize, valid: u64) -> Vec<Scalar> {
        let values = &self.columns[column];
        let end = (end as usize).min(values.len());
        let start = (start as usize).min(end);
        values[start..end]
            .iter()
            .enumerate()
            .filter(|(i, _)| *i < MAX_BATCH_ROWS && valid & (1u64 << i) != 0)
            .map(|(_, &v)| v)
            .collect()
    }

    fn len(&self) -> usize {
        self.rows
    }
}
