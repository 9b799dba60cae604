//! Per-partition cursors

pub mod batch_size;
pub mod partition;

use std::sync::Arc;

pub use batch_size::BatchSizeStrategy;
pub use partition::{PageFetch, PartitionCursorState, PartitionResultCursor};

use crate::model::{QuerySpec, SequenceToken};
use crate::observability::MetricsRegistry;
use crate::ordering::RelevanceOrdering;

/// State shared by every cursor of one query.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub query: Arc<QuerySpec>,
    pub ordering: Arc<RelevanceOrdering>,
    pub sequence_token: Option<SequenceToken>,
    pub metrics: Arc<MetricsRegistry>,
}
