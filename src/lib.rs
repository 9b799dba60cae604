//! shardcursor - paged, resumable search over partitioned indexes
//!
//! A query fans out to every partition of an index. Each partition streams
//! its own ranked results through a cursor; the merger interleaves them into
//! one global order, pages are cut by byte and count budgets, and facet
//! tallies are summed across partitions.

pub mod cli;
pub mod config;
pub mod cursor;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod facet;
pub mod manager;
pub mod merge;
pub mod model;
pub mod observability;
pub mod ordering;

pub use config::ServiceConfig;
pub use errors::{SearchError, SearchResult};
pub use manager::{CursorHandle, CursorManager, IntermediateCursors};
