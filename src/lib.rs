//! Database snapshot lifecycle: dumping MySQL databases to timestamped archive
//! files, discovering and retaining them, and restoring them through a local
//! cache.

pub mod catalog;
pub mod config;
pub mod context;
pub mod errors;
pub mod group;
pub mod plan;
pub mod snapshot;
pub mod storage;
pub mod template;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

pub use catalog::SnapshotCatalog;
pub use context::SnapshotContext;
pub use errors::{Result, SnapshotError};
pub use group::PlanGroup;
pub use plan::SnapshotPlan;
pub use snapshot::Snapshot;
pub use template::FileTemplate;
