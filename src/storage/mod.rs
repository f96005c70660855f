//! Collaborators of the correlation index
//!
//! Everything the correlation layer consumes but does not own:
//!
//! - **types**: Scalars, keys, ranges, target buckets, insert records, queries
//! - **files**: Mapping file format (map-bucket boundary table)
//! - **regions**: Target-bucket table and the `PrimaryIndexer` interface
//! - **dataset**: Batched raw value reads for full-bucket rescans
//! - **secondary**: Auxiliary exact index for outlier rows
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! Primary indexer ──InsertRecord{value, key, target id}──▶ correlation index
//!        ▲                                                   │        │
//!        └──────── target_bucket(id) ◀── extent lookups ─────┘        │
//! Dataset ◀── range_values(start, end, column, mask) ── rescans ──────┤
//! AuxiliaryIndex ◀── insert / remove / matches ───────────────────────┘
//! ```

pub mod dataset;
pub mod error;
pub mod files;
pub mod regions;
pub mod secondary;
pub mod types;

pub use dataset::{low_bits, ColumnDataset, Dataset, MAX_BATCH_ROWS};
pub use error::{IndexError, IndexResult};
pub use files::{BucketAssignment, MappingFile};
pub use regions::{PrimaryIndexer, TargetBucketTable};
pub use secondary::{AuxiliaryIndex, SecondaryBTreeIndex};
pub use types::{
    InsertRecord, Key, KeyPair, KeyRange, MapBucketId, Query, Scalar, TargetBucket,
    TargetBucketId, ValueRange,
};
