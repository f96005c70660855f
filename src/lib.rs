//! # corrindex
//!
//! Correlation-aware secondary indexing. A column that correlates with the
//! clustered sort order of a dataset is indexed by per-region summaries
//! instead of per-row entries; rows that break the correlation are kept in an
//! exact auxiliary index.
//!
//! ## Modules
//!
//! - [`storage`]: Core types, file formats and the collaborator interfaces
//!   (primary indexer, dataset, auxiliary index)
//! - [`index`]: Ledgers, tracker, mapped and combined correlation indexes
//! - [`config`]: Cost model, tracker and logging configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use corrindex::*;
//! use std::path::Path;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_default();
//!     let targets = TargetBucketTable::load(Path::new("index.targets"))?;
//!     let dataset = ColumnDataset::from_csv(Path::new("data.csv"))?;
//!
//!     let mut index = CombinedCorrelationIndex::from_files(
//!         Path::new("index.mapping"),
//!         Path::new("index.targets"),
//!         config.cost_model,
//!         config.tracker.scan_batch_rows,
//!     )?;
//!     let regions: Vec<TargetBucket> = targets.iter().collect();
//!     index.rebuild(&regions, &targets, &dataset)?;
//!
//!     let keys = index.key_ranges(&Query::between(index.column(), 10, 20));
//!     println!("{} ranges, {} listed keys", keys.ranges.len(), keys.list.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod index;
pub mod storage;

// Re-export top-level types for convenience
pub use storage::{
    AuxiliaryIndex, ColumnDataset, Dataset, IndexError, IndexResult, InsertRecord, Key, KeyPair,
    KeyRange, MapBucketId, MappingFile, PrimaryIndexer, Query, Scalar, SecondaryBTreeIndex,
    TargetBucket, TargetBucketId, TargetBucketTable, ValueRange,
};

pub use index::{
    BucketLedger, CombinedCorrelationIndex, CorrelationTracker, CostModel, DiffSummary, DiffType,
    IndexStats, KeySet, MappedCorrelationIndex,
};

pub use config::{generate_default_config, Config, ConfigError, LoggingConfig, TrackerConfig};
