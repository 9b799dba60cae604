//! Bounded parallel fan-out over partitions

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task;

use crate::engine::PartitionSource;
use crate::errors::{SearchError, SearchResult};
use crate::model::PartitionId;

/// Runs one blocking task per partition, at most `parallelism` at a time.
#[derive(Debug, Clone)]
pub struct PartitionExecutor {
    semaphore: Arc<Semaphore>,
    parallelism: usize,
}

impl PartitionExecutor {
    pub fn new(parallelism: usize) -> Self {
        let parallelism = parallelism.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(parallelism)),
            parallelism,
        }
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Run `work` against every source and collect each outcome, in the
    /// order of `sources`.
    ///
    /// A panicking task yields an internal error for its partition; the
    /// other partitions still report.
    pub async fn run_all<T, F>(
        &self,
        sources: &[Arc<dyn PartitionSource>],
        work: F,
    ) -> SearchResult<Vec<(PartitionId, SearchResult<T>)>>
    where
        T: Send + 'static,
        F: Fn(&dyn PartitionSource) -> SearchResult<T> + Send + Sync + 'static,
    {
        let work = Arc::new(work);
        let mut handles = Vec::with_capacity(sources.len());

        for source in sources {
            let permit = Arc::clone(&self.semaphore)
                .acquire_owned()
                .await
                .map_err(|e| SearchError::internal(format!("partition worker pool closed: {}", e)))?;
            let work = Arc::clone(&work);
            let source = Arc::clone(source);
            let partition = source.partition_id();
            let handle = task::spawn_blocking(move || {
                let _permit = permit;
                work(source.as_ref())
            });
            handles.push((partition, handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (partition, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Err(SearchError::internal(format!(
                    "task for partition {} did not complete: {}",
                    partition, e
                ))),
            };
            outcomes.push((partition, outcome));
        }
        Ok(outcomes)
    }
}
