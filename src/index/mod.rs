//! Correlation Index Structures
//!
//! Classification and maintenance machinery of the correlation index:
//!
//! - **BucketLedger**: Per target bucket counts and inlier/outlier classes
//! - **CorrelationTracker**: One ledger per target bucket, diff accumulation
//! - **MappedCorrelationIndex**: Map bucket → inlier target buckets
//! - **CombinedCorrelationIndex**: Mapped ranges plus exact outlier keys
//!
//! # Architecture
//!
//! ```text
//! Insert: rows → tracker → ledger.add_points_batch → diffs
//!        ↓
//! process_diffs: inliers → mapped index, outlier rows → auxiliary index
//!        ↓
//! Query: mapped key ranges ∪ auxiliary matches → KeySet
//! ```

mod combined;
mod diff;
mod ledger;
mod mapped;
mod merge;
mod tracker;

pub use combined::{CombinedCorrelationIndex, IndexStats};
pub use diff::{Diff, DiffMap, DiffSummary, DiffType, LedgerDiffs};
pub use ledger::{BucketLedger, CostModel, MapBucketStat};
pub use mapped::MappedCorrelationIndex;
pub use merge::{coalesce, KeySet};
pub use tracker::CorrelationTracker;
