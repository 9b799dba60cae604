//! Page production for one open query
//!
//! A single-partition query pages straight off its cursor; anything wider
//! goes through the cross-partition merger. Either way every emitted page is
//! checked by the emitted-page guards and counted.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::cursor::{BatchSizeStrategy, PartitionResultCursor};
use crate::errors::{SearchError, SearchResult};
use crate::merge::{
    BatchBuilder, ConsistencyGuards, CrossPartitionMerger, CursorStream, GuardTarget, MergedStream, Page,
};
use crate::model::EncodedPage;
use crate::observability::{Event, MetricsRegistry};
use crate::ordering::RelevanceOrdering;

enum ResultProducer {
    Single {
        cursor: PartitionResultCursor,
    },
    Merged {
        cursors: Vec<PartitionResultCursor>,
        merger: Option<CrossPartitionMerger>,
        batch_size: BatchSizeStrategy,
    },
}

impl ResultProducer {
    fn build_page(
        &mut self,
        ordering: &Arc<RelevanceOrdering>,
        byte_budget: u64,
        limit: usize,
    ) -> SearchResult<(Page, bool)> {
        match self {
            ResultProducer::Single { cursor } => {
                // an empty page only means the head duplicate was skipped
                while cursor.peek().is_none() && !cursor.is_exhausted() {
                    cursor.load_next_page(byte_budget)?;
                }
                let page =
                    BatchBuilder::new(byte_budget, limit).build_page(&mut CursorStream { cursor })?;
                let is_last = cursor.peek().is_none() && cursor.is_exhausted();
                Ok((page, is_last))
            }
            ResultProducer::Merged {
                cursors,
                merger,
                batch_size,
            } => {
                if merger.is_none() {
                    *merger = Some(CrossPartitionMerger::new(
                        Arc::clone(ordering),
                        cursors,
                        byte_budget,
                    )?);
                }
                let merger = merger
                    .as_mut()
                    .ok_or_else(|| SearchError::internal("merger missing after initialisation"))?;

                let count_budget = batch_size.advise_next_batch_size().min(limit);
                let page = BatchBuilder::new(byte_budget, count_budget).build_page(&mut MergedStream {
                    merger: &mut *merger,
                    cursors: cursors.as_mut_slice(),
                    byte_budget,
                })?;
                Ok((page, merger.is_exhausted()))
            }
        }
    }

    fn cursors_mut(&mut self) -> &mut [PartitionResultCursor] {
        match self {
            ResultProducer::Single { cursor } => std::slice::from_mut(cursor),
            ResultProducer::Merged { cursors, .. } => cursors,
        }
    }
}

/// Produces the pages of one query, in global order.
pub struct SearchResultProducer {
    producer: ResultProducer,
    ordering: Arc<RelevanceOrdering>,
    guards: ConsistencyGuards,
    metrics: Arc<MetricsRegistry>,
    /// Records still allowed before a vector query's limit is reached
    remaining: Option<usize>,
    exhausted: bool,
    closed: bool,
}

impl SearchResultProducer {
    /// Takes cursors whose first pages are fetched, sorted by partition id.
    pub fn new(
        mut cursors: Vec<PartitionResultCursor>,
        ordering: Arc<RelevanceOrdering>,
        batch_size: BatchSizeStrategy,
        detect_ties: bool,
        limit: Option<usize>,
        metrics: Arc<MetricsRegistry>,
    ) -> SearchResult<Self> {
        let producer = match cursors.len() {
            0 => return Err(SearchError::internal("query opened without partitions")),
            1 => match cursors.pop() {
                Some(cursor) => ResultProducer::Single { cursor },
                None => return Err(SearchError::internal("query opened without partitions")),
            },
            _ => ResultProducer::Merged {
                cursors,
                merger: None,
                batch_size,
            },
        };
        let guards = ConsistencyGuards::new(
            GuardTarget::EmittedPage,
            Arc::clone(&ordering),
            detect_ties,
            Arc::clone(&metrics),
        );
        Ok(Self {
            producer,
            ordering,
            guards,
            metrics,
            remaining: limit,
            exhausted: false,
            closed: false,
        })
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Next page of at most `byte_budget` bytes, and whether it is the last.
    ///
    /// Once the last page was returned, further calls return empty last pages.
    pub fn next_page(&mut self, byte_budget: u64) -> SearchResult<(EncodedPage, bool)> {
        if self.closed {
            return Err(SearchError::internal("page requested from a closed query"));
        }
        if self.exhausted {
            return Ok((EncodedPage::default(), true));
        }

        let limit = self.remaining.unwrap_or(usize::MAX);
        let (page, mut is_last) = match self.producer.build_page(&self.ordering, byte_budget, limit) {
            Ok(built) => built,
            Err(e) => {
                if matches!(e, SearchError::OversizedRecord { .. }) {
                    self.metrics.increment_oversized_records();
                }
                return Err(e);
            }
        };

        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(page.len());
            if *remaining == 0 {
                is_last = true;
            }
        }

        self.guards.check_page(&page.records);
        self.metrics.record_page(page.len() as u64, page.byte_size);
        debug!(
            event = Event::PageEmitted.as_str(),
            documents = page.len(),
            bytes = page.byte_size,
            is_last,
        );

        self.exhausted = is_last;
        Ok((EncodedPage::from_records(page.records), is_last))
    }

    /// Release every engine handle. Idempotent.
    ///
    /// Every cursor is closed even when one fails; the first failure is returned.
    pub fn close(&mut self) -> SearchResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut first_error = None;
        for cursor in self.producer.cursors_mut() {
            if let Err(e) = cursor.close() {
                self.metrics.increment_release_failures();
                warn!(
                    event = Event::ReleaseFailed.as_str(),
                    partition = cursor.partition_id(),
                    error = %e,
                );
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for SearchResultProducer {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            debug!(error = %e, "release failure while dropping query");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::QueryContext;
    use crate::engine::memory::MemoryPartition;
    use crate::model::{NullPosition, QuerySpec};
    use serde_json::json;

    fn partition(id: u32, docs: &[(&str, f32)]) -> MemoryPartition {
        docs.iter().fold(MemoryPartition::new(id), |p, (doc, score)| {
            p.with_document(doc, *score, json!({ "name": doc }))
        })
    }

    fn open(
        partitions: &[&MemoryPartition],
        batch: usize,
        limit: Option<usize>,
    ) -> (SearchResultProducer, Arc<MetricsRegistry>) {
        let metrics = Arc::new(MetricsRegistry::new());
        let ordering = Arc::new(RelevanceOrdering::for_sort(None, NullPosition::Lowest));
        let context = QueryContext {
            query: Arc::new(QuerySpec::new("idx")),
            ordering: Arc::clone(&ordering),
            sequence_token: None,
            metrics: Arc::clone(&metrics),
        };
        let cursors = partitions
            .iter()
            .map(|p| {
                let mut cursor =
                    PartitionResultCursor::open(*p, context.clone(), BatchSizeStrategy::fixed(batch)).unwrap();
                cursor.fetch_first_page(batch).unwrap();
                cursor
            })
            .collect();
        let producer = SearchResultProducer::new(
            cursors,
            ordering,
            BatchSizeStrategy::fixed(batch),
            false,
            limit,
            Arc::clone(&metrics),
        )
        .unwrap();
        (producer, metrics)
    }

    fn ids(page: &EncodedPage) -> Vec<String> {
        page.to_json_values()
            .unwrap()
            .iter()
            .map(|v| v["_id"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn test_merged_pages_in_global_order() {
        let p0 = partition(0, &[("1", 9.0), ("2", 7.0), ("3", 5.0)]);
        let p1 = partition(1, &[("4", 8.0), ("5", 6.0)]);
        let (mut producer, metrics) = open(&[&p0, &p1], 3, None);

        let (page, is_last) = producer.next_page(u64::MAX).unwrap();
        assert_eq!(ids(&page), vec!["1", "4", "2"]);
        assert!(!is_last);

        let (page, is_last) = producer.next_page(u64::MAX).unwrap();
        assert_eq!(ids(&page), vec!["5", "3"]);
        assert!(is_last);
        assert!(producer.is_exhausted());

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.pages_emitted, 2);
        assert_eq!(snapshot.documents_emitted, 5);
        assert_eq!(snapshot.page_order_regressions, 0);

        producer.close().unwrap();
        assert_eq!(p0.open_handles(), 0);
        assert_eq!(p1.open_handles(), 0);
    }

    #[test]
    fn test_single_partition_pages_off_cursor() {
        let p0 = partition(0, &[("a", 3.0), ("b", 2.0), ("c", 1.0)]);
        let (mut producer, _) = open(&[&p0], 2, None);

        let mut all = Vec::new();
        loop {
            let (page, is_last) = producer.next_page(u64::MAX).unwrap();
            all.extend(ids(&page));
            if is_last {
                break;
            }
        }
        assert_eq!(all, vec!["a", "b", "c"]);
        producer.close().unwrap();
    }

    #[test]
    fn test_limit_caps_stream() {
        let p0 = partition(0, &[("1", 9.0), ("2", 7.0)]);
        let p1 = partition(1, &[("3", 8.0), ("4", 6.0)]);
        let (mut producer, _) = open(&[&p0, &p1], 10, Some(3));

        let (page, is_last) = producer.next_page(u64::MAX).unwrap();
        assert_eq!(ids(&page), vec!["1", "3", "2"]);
        assert!(is_last);

        let (page, is_last) = producer.next_page(u64::MAX).unwrap();
        assert!(page.is_empty());
        assert!(is_last);
    }

    #[test]
    fn test_byte_budget_splits_pages() {
        let p0 = partition(0, &[("1", 9.0), ("2", 7.0)]);
        let p1 = partition(1, &[("3", 8.0), ("4", 6.0)]);
        let (mut producer, _) = open(&[&p0, &p1], 10, None);

        let one = json!({ "_id": "1", "score": 9.0, "document": { "name": "1" } });
        let budget = serde_json::to_vec(&one).unwrap().len() as u64 + 5;

        let mut all = Vec::new();
        loop {
            let (page, is_last) = producer.next_page(budget).unwrap();
            assert!(page.byte_size <= budget);
            all.extend(ids(&page));
            if is_last {
                break;
            }
        }
        assert_eq!(all, vec!["1", "3", "2", "4"]);
    }

    #[test]
    fn test_oversized_record_is_counted() {
        let p0 = partition(0, &[("1", 9.0)]);
        let p1 = partition(1, &[("2", 8.0)]);
        let (mut producer, metrics) = open(&[&p0, &p1], 10, None);

        let err = producer.next_page(4).unwrap_err();
        assert_eq!(err.code(), "SEARCH_OVERSIZED_RECORD");
        assert_eq!(metrics.snapshot().oversized_records, 1);
    }

    #[test]
    fn test_close_is_idempotent_and_blocks_paging() {
        let p0 = partition(0, &[("1", 9.0)]);
        let (mut producer, _) = open(&[&p0], 10, None);
        producer.close().unwrap();
        producer.close().unwrap();
        assert_eq!(p0.open_handles(), 0);
        assert!(producer.next_page(u64::MAX).is_err());
    }

    #[test]
    fn test_drop_releases_handles() {
        let p0 = partition(0, &[("1", 9.0)]);
        let p1 = partition(1, &[("2", 8.0)]);
        {
            let _ = open(&[&p0, &p1], 10, None);
        }
        assert_eq!(p0.open_handles(), 0);
        assert_eq!(p1.open_handles(), 0);
    }
}
