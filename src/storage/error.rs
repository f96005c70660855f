//! Correlation index error types
//!
//! Only loading and input validation are recoverable. Internal consistency
//! violations (a map bucket missing from a ledger, a target bucket missing from
//! the region table) are programming errors and panic instead.

use crate::storage::types::{Scalar, TargetBucketId};
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading or feeding the correlation index
#[derive(Error, Debug)]
pub enum IndexError {
    /// Input file could not be read
    #[error("IO error reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed input file
    #[error("{path:?} line {line}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// Dataset import failed
    #[error("CSV error: {0}")]
    Csv(String),

    /// A row value lies outside every map bucket
    #[error("Value {value} found outside the mapped domain")]
    OutOfDomain { value: Scalar },

    /// The primary indexer does not know the target bucket
    #[error("Target bucket not found: {0}")]
    UnknownTargetBucket(TargetBucketId),

    /// Insert records were not grouped by target bucket in ascending order
    #[error("Inserts out of order: target bucket {next} after {previous}")]
    InsertOrder {
        previous: TargetBucketId,
        next: TargetBucketId,
    },
}

impl IndexError {
    pub(crate) fn parse(path: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        IndexError::Parse {
            path: path.into(),
            line,
            message: message.into(),
        }
    }
}

impl From<csv::Error> for IndexError {
    fn from(err: csv::Error) -> Self {
        IndexError::Csv(err.to_string())
    }
}

/// Result type alias for correlation index operations
pub type IndexResult<T> = Result<T, IndexError>;
