//! Cross-partition merging, page assembly and consistency checks

pub mod builder;
pub mod guards;
pub mod merger;

pub use builder::{BatchBuilder, CursorStream, Page, RecordSource};
pub use guards::{ConsistencyGuards, GuardReport, GuardTarget};
pub use merger::{CrossPartitionMerger, MergedStream};
