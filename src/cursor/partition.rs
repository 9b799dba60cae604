//! Per-partition result cursor
//!
//! State machine:
//!
//! ```text
//! Initialized --load_next_page--> FetchingMore --engine short page--> Exhausted
//!      |                              |                                  |
//!      +-----------------close()------+-------------close()--------------+--> Closed
//! ```
//!
//! The first page is fetched at dispatch and staged; the first
//! `load_next_page` exposes it. Later loads resume after the last accepted
//! record.

use std::collections::VecDeque;

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::batch_size::{clamp_to_budget, BatchSizeStrategy};
use super::QueryContext;
use crate::engine::{
    EngineHit, PageRequest, PartitionFacets, PartitionSearcher, PartitionSource, TotalHits,
};
use crate::errors::{SearchError, SearchResult};
use crate::merge::guards::{ConsistencyGuards, GuardTarget};
use crate::model::{
    EncodedDocument, PartitionId, RankKey, RankedRecord, RecordPosition, ResumePoint,
    SequenceToken, TypedValue,
};
use crate::observability::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionCursorState {
    /// First page fetched and staged, nothing exposed yet
    Initialized,
    /// Engine may have more records
    FetchingMore,
    /// Engine returned a short page; no further fetches allowed
    Exhausted,
    Closed,
}

/// Summary of one engine fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFetch {
    pub records: usize,
    pub partition_exhausted: bool,
}

pub struct PartitionResultCursor {
    partition_id: PartitionId,
    searcher: Option<Box<dyn PartitionSearcher>>,
    context: QueryContext,
    state: PartitionCursorState,
    staged: Option<Vec<RankedRecord>>,
    page: VecDeque<RankedRecord>,
    partition_exhausted: bool,
    last_accepted: Option<ResumePoint>,
    awaiting_first_record: bool,
    skipped_head: bool,
    batch_size: BatchSizeStrategy,
    avg_record_size: Option<u64>,
    total_hits: Option<TotalHits>,
    guards: ConsistencyGuards,
}

impl PartitionResultCursor {
    /// Open a cursor on `source`. No engine call is made yet.
    pub fn open(
        source: &dyn PartitionSource,
        context: QueryContext,
        batch_size: BatchSizeStrategy,
    ) -> SearchResult<Self> {
        let searcher = source.open()?;
        Ok(Self::with_searcher(source.partition_id(), searcher, context, batch_size))
    }

    pub fn with_searcher(
        partition_id: PartitionId,
        searcher: Box<dyn PartitionSearcher>,
        context: QueryContext,
        batch_size: BatchSizeStrategy,
    ) -> Self {
        let guards = ConsistencyGuards::new(
            GuardTarget::PartitionFetch(partition_id),
            context.ordering.clone(),
            false,
            context.metrics.clone(),
        );
        Self {
            partition_id,
            searcher: Some(searcher),
            context,
            state: PartitionCursorState::Initialized,
            staged: None,
            page: VecDeque::new(),
            partition_exhausted: false,
            last_accepted: None,
            awaiting_first_record: true,
            skipped_head: false,
            batch_size,
            avg_record_size: None,
            total_hits: None,
            guards,
        }
    }

    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    pub fn state(&self) -> PartitionCursorState {
        self.state
    }

    /// Total hits reported by the most recent engine fetch.
    pub fn total_hits(&self) -> Option<TotalHits> {
        self.total_hits
    }

    /// Whether the resumed stream's head duplicate was dropped.
    pub fn skipped_head(&self) -> bool {
        self.skipped_head
    }

    pub fn avg_record_size(&self) -> Option<u64> {
        self.avg_record_size
    }

    fn ensure_open(&self) -> SearchResult<()> {
        if self.state == PartitionCursorState::Closed {
            return Err(SearchError::Closed {
                partition: self.partition_id,
            });
        }
        Ok(())
    }

    /// Fetch and stage the first page. Allowed once, before any load.
    pub fn fetch_first_page(&mut self, page_size: usize) -> SearchResult<PageFetch> {
        self.ensure_open()?;
        if self.state != PartitionCursorState::Initialized || self.staged.is_some() {
            return Err(SearchError::internal(format!(
                "first page of partition {} already fetched",
                self.partition_id
            )));
        }

        let resume = self.context.sequence_token.as_ref().map(SequenceToken::resume_point);
        let (records, partition_exhausted) = self.fetch(resume.as_ref(), page_size)?;
        self.guards.check_page(&records);

        let fetched = PageFetch {
            records: records.len(),
            partition_exhausted,
        };
        self.partition_exhausted = partition_exhausted;
        self.staged = Some(records);
        Ok(fetched)
    }

    /// Fetch the page after `resume` and make it current.
    pub fn fetch_next_page(&mut self, resume: &ResumePoint, page_size: usize) -> SearchResult<PageFetch> {
        self.ensure_open()?;
        if self.partition_exhausted {
            return Err(SearchError::EngineExhaustedMismatch {
                partition: self.partition_id,
            });
        }
        if self.state != PartitionCursorState::FetchingMore {
            return Err(SearchError::internal(format!(
                "partition {} fetched a next page before exposing its first",
                self.partition_id
            )));
        }

        let (records, partition_exhausted) = self.fetch(Some(resume), page_size)?;
        self.guards.check_page(&records);

        let fetched = PageFetch {
            records: records.len(),
            partition_exhausted,
        };
        self.install(records, partition_exhausted);
        Ok(fetched)
    }

    /// Make the next page current: the staged first page, or a fresh fetch
    /// after the last accepted record sized for `byte_budget`.
    pub fn load_next_page(&mut self, byte_budget: u64) -> SearchResult<PageFetch> {
        match self.state {
            PartitionCursorState::Closed => Err(SearchError::Closed {
                partition: self.partition_id,
            }),
            PartitionCursorState::Exhausted => Err(SearchError::EngineExhaustedMismatch {
                partition: self.partition_id,
            }),
            PartitionCursorState::Initialized => {
                let records = self.staged.take().ok_or_else(|| {
                    SearchError::internal(format!(
                        "partition {} loaded before its first page was fetched",
                        self.partition_id
                    ))
                })?;
                let fetched = PageFetch {
                    records: records.len(),
                    partition_exhausted: self.partition_exhausted,
                };
                self.install(records, self.partition_exhausted);
                Ok(fetched)
            }
            PartitionCursorState::FetchingMore => {
                if !self.page.is_empty() {
                    return Err(SearchError::internal(format!(
                        "partition {} loaded a page before consuming the current one",
                        self.partition_id
                    )));
                }
                let resume = self.last_accepted.clone().ok_or_else(|| {
                    SearchError::internal(format!(
                        "partition {} has no accepted record to resume after",
                        self.partition_id
                    ))
                })?;
                let page_size = clamp_to_budget(
                    self.batch_size.advise_next_batch_size(),
                    byte_budget,
                    self.avg_record_size,
                );
                self.fetch_next_page(&resume, page_size)
            }
        }
    }

    /// Next unconsumed record of the current page.
    pub fn peek(&self) -> Option<&RankedRecord> {
        self.page.front()
    }

    /// Consume the record returned by `peek()`.
    pub fn accept(&mut self) -> SearchResult<RankedRecord> {
        self.ensure_open()?;
        let record = self.page.pop_front().ok_or_else(|| {
            SearchError::internal(format!(
                "accept on empty page of partition {}",
                self.partition_id
            ))
        })?;
        self.last_accepted = Some(record.resume_point());
        Ok(record)
    }

    /// No record left now and none to come.
    pub fn is_exhausted(&self) -> bool {
        match self.state {
            PartitionCursorState::Initialized => {
                self.partition_exhausted
                    && self.staged.as_ref().map_or(true, |records| records.is_empty())
            }
            PartitionCursorState::FetchingMore => false,
            PartitionCursorState::Exhausted => self.page.is_empty(),
            PartitionCursorState::Closed => true,
        }
    }

    pub fn compute_facets(&mut self) -> SearchResult<PartitionFacets> {
        self.ensure_open()?;
        let searcher = self.searcher.as_mut().ok_or(SearchError::Closed {
            partition: self.partition_id,
        })?;
        searcher.compute_facets(&self.context.query)
    }

    /// Release the engine handle. Idempotent.
    pub fn close(&mut self) -> SearchResult<()> {
        if self.state == PartitionCursorState::Closed {
            return Ok(());
        }
        self.state = PartitionCursorState::Closed;
        self.page.clear();
        self.staged = None;
        match self.searcher.take() {
            Some(mut searcher) => searcher.release(),
            None => Ok(()),
        }
    }

    fn fetch(
        &mut self,
        resume: Option<&ResumePoint>,
        page_size: usize,
    ) -> SearchResult<(Vec<RankedRecord>, bool)> {
        let page_size = page_size.max(1);
        let searcher = self.searcher.as_mut().ok_or(SearchError::Closed {
            partition: self.partition_id,
        })?;
        let page = searcher.search(PageRequest {
            query: &self.context.query,
            ordering: &self.context.ordering,
            page_size,
            resume,
        })?;

        let partition_exhausted = page.hits.len() < page_size;
        self.total_hits = Some(page.total_hits);

        let records = page
            .hits
            .into_iter()
            .map(|hit| self.hydrate(hit))
            .collect::<SearchResult<Vec<_>>>()?;

        if !records.is_empty() {
            let bytes: u64 = records.iter().map(RankedRecord::encoded_size).sum();
            self.avg_record_size = Some((bytes / records.len() as u64).max(1));
        }
        self.context.metrics.record_partition_fetch(records.len() as u64);
        debug!(
            partition = self.partition_id,
            page_size,
            records = records.len(),
            partition_exhausted,
            "partition page fetched"
        );

        Ok((records, partition_exhausted))
    }

    /// Turn an engine hit into a ranked record with its encoded result document.
    fn hydrate(&self, hit: EngineHit) -> SearchResult<RankedRecord> {
        let rank_key = RankKey {
            score: hit.score,
            sort_values: hit.sort_values,
        };
        let position = RecordPosition::new(self.partition_id, hit.local_doc_id);

        let mut document = Map::new();
        document.insert("_id".to_string(), json!(hit.document_id.as_str()));
        document.insert("score".to_string(), json!(rank_key.score));
        if let Some(values) = &rank_key.sort_values {
            document.insert(
                "sortValues".to_string(),
                Value::Array(values.iter().map(TypedValue::to_json).collect()),
            );
        }
        if self.context.query.options.require_sequence_tokens {
            let token = SequenceToken::new(hit.document_id.clone(), rank_key.clone(), position);
            document.insert("searchSequenceToken".to_string(), json!(token.encode()));
        }
        document.insert("document".to_string(), hit.stored);

        Ok(RankedRecord {
            partition_id: self.partition_id,
            local_doc_id: hit.local_doc_id,
            document_id: hit.document_id,
            rank_key,
            payload: EncodedDocument::from_json(&Value::Object(document))?,
        })
    }

    fn install(&mut self, records: Vec<RankedRecord>, partition_exhausted: bool) {
        self.page = records.into();
        self.partition_exhausted = partition_exhausted;
        self.state = if partition_exhausted {
            PartitionCursorState::Exhausted
        } else {
            PartitionCursorState::FetchingMore
        };
        self.skip_head_duplicate();
    }

    /// Drop the first record ever exposed if it is the record the sequence
    /// token was taken from.
    fn skip_head_duplicate(&mut self) {
        if !self.awaiting_first_record {
            return;
        }
        let Some(head) = self.page.front() else {
            return;
        };
        self.awaiting_first_record = false;

        let Some(token) = &self.context.sequence_token else {
            return;
        };
        if head.document_id != *token.last_document_id() {
            return;
        }
        if let Some(head) = self.page.pop_front() {
            debug!(
                event = Event::HeadDuplicateSkipped.as_str(),
                partition = self.partition_id,
                document_id = %head.document_id,
            );
            self.last_accepted = Some(head.resume_point());
            self.skipped_head = true;
            self.context.metrics.increment_head_duplicates_skipped();
        }
    }
}

impl Drop for PartitionResultCursor {
    fn drop(&mut self) {
        if let Some(mut searcher) = self.searcher.take() {
            warn!(
                event = Event::CursorLeaked.as_str(),
                partition = self.partition_id,
                "cursor dropped without close, releasing engine handle"
            );
            if let Err(e) = searcher.release() {
                self.context.metrics.increment_release_failures();
                warn!(
                    event = Event::ReleaseFailed.as_str(),
                    partition = self.partition_id,
                    error = %e,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::MemoryPartition;
    use crate::model::{DocumentId, QuerySpec};
    use crate::observability::MetricsRegistry;
    use crate::ordering::RelevanceOrdering;
    use serde_json::json;
    use std::sync::Arc;

    fn source() -> MemoryPartition {
        (0..5).fold(MemoryPartition::new(0), |p, i| {
            p.with_document(&format!("d{}", i), 10.0 - i as f32, json!({ "n": i }))
        })
    }

    fn context(query: QuerySpec, token: Option<SequenceToken>) -> QueryContext {
        QueryContext {
            query: Arc::new(query),
            ordering: Arc::new(RelevanceOrdering::Score),
            sequence_token: token,
            metrics: Arc::new(MetricsRegistry::new()),
        }
    }

    fn drain(cursor: &mut PartitionResultCursor) -> Vec<String> {
        let mut ids = Vec::new();
        while cursor.peek().is_some() {
            ids.push(cursor.accept().unwrap().document_id.to_string());
        }
        ids
    }

    #[test]
    fn test_first_page_is_staged_until_loaded() {
        let source = source();
        let mut cursor =
            PartitionResultCursor::open(&source, context(QuerySpec::new("i"), None), BatchSizeStrategy::fixed(2))
                .unwrap();

        let fetched = cursor.fetch_first_page(2).unwrap();
        assert_eq!(fetched, PageFetch { records: 2, partition_exhausted: false });
        assert_eq!(cursor.state(), PartitionCursorState::Initialized);
        assert!(cursor.peek().is_none());
        assert!(!cursor.is_exhausted());

        cursor.load_next_page(u64::MAX).unwrap();
        assert_eq!(cursor.state(), PartitionCursorState::FetchingMore);
        assert_eq!(drain(&mut cursor), vec!["d0", "d1"]);
        cursor.close().unwrap();
    }

    #[test]
    fn test_pages_resume_after_last_accepted() {
        let source = source();
        let mut cursor =
            PartitionResultCursor::open(&source, context(QuerySpec::new("i"), None), BatchSizeStrategy::fixed(2))
                .unwrap();
        cursor.fetch_first_page(2).unwrap();

        let mut all = Vec::new();
        while !cursor.is_exhausted() {
            cursor.load_next_page(u64::MAX).unwrap();
            all.extend(drain(&mut cursor));
        }
        assert_eq!(all, vec!["d0", "d1", "d2", "d3", "d4"]);
        assert_eq!(cursor.state(), PartitionCursorState::Exhausted);
        assert_eq!(cursor.total_hits(), Some(TotalHits::exact(5)));
        cursor.close().unwrap();
    }

    #[test]
    fn test_fetch_on_exhausted_is_mismatch() {
        let source = source();
        let mut cursor =
            PartitionResultCursor::open(&source, context(QuerySpec::new("i"), None), BatchSizeStrategy::fixed(10))
                .unwrap();
        let fetched = cursor.fetch_first_page(10).unwrap();
        assert!(fetched.partition_exhausted);
        cursor.load_next_page(u64::MAX).unwrap();
        let resume = cursor.accept().unwrap().resume_point();

        let err = cursor.fetch_next_page(&resume, 10).unwrap_err();
        assert_eq!(err.code(), "SEARCH_ENGINE_EXHAUSTED_MISMATCH");
        let err = cursor.load_next_page(u64::MAX).unwrap_err();
        assert_eq!(err.code(), "SEARCH_ENGINE_EXHAUSTED_MISMATCH");
        cursor.close().unwrap();
    }

    #[test]
    fn test_close_is_idempotent_and_releases() {
        let source = source();
        let mut cursor =
            PartitionResultCursor::open(&source, context(QuerySpec::new("i"), None), BatchSizeStrategy::fixed(2))
                .unwrap();
        assert_eq!(source.open_handles(), 1);

        cursor.close().unwrap();
        cursor.close().unwrap();
        assert_eq!(source.open_handles(), 0);
        assert_eq!(cursor.state(), PartitionCursorState::Closed);

        let err = cursor.fetch_first_page(2).unwrap_err();
        assert_eq!(err.code(), "SEARCH_CURSOR_CLOSED");
        assert!(cursor.accept().is_err());
        assert!(cursor.compute_facets().is_err());
        assert!(cursor.is_exhausted());
    }

    #[test]
    fn test_drop_releases_handle() {
        let source = source();
        {
            let mut cursor = PartitionResultCursor::open(
                &source,
                context(QuerySpec::new("i"), None),
                BatchSizeStrategy::fixed(2),
            )
            .unwrap();
            cursor.fetch_first_page(2).unwrap();
        }
        assert_eq!(source.open_handles(), 0);
    }

    #[test]
    fn test_head_duplicate_skipped_once() {
        let source = source().with_inclusive_resume();
        let token = SequenceToken::new(DocumentId::from("d1"), RankKey::scored(9.0), RecordPosition::new(0, 1));
        let ctx = context(QuerySpec::new("i"), Some(token));
        let metrics = ctx.metrics.clone();
        let mut cursor = PartitionResultCursor::open(&source, ctx, BatchSizeStrategy::fixed(2)).unwrap();

        cursor.fetch_first_page(2).unwrap();
        let mut all = Vec::new();
        while !cursor.is_exhausted() {
            cursor.load_next_page(u64::MAX).unwrap();
            all.extend(drain(&mut cursor));
        }
        assert!(cursor.skipped_head());
        assert_eq!(metrics.snapshot().head_duplicates_skipped, 1);
        assert_eq!(all, vec!["d2", "d3", "d4"]);
        cursor.close().unwrap();
    }

    #[test]
    fn test_no_skip_when_head_differs() {
        let source = source();
        let token = SequenceToken::new(DocumentId::from("d1"), RankKey::scored(9.0), RecordPosition::new(0, 1));
        let mut cursor =
            PartitionResultCursor::open(&source, context(QuerySpec::new("i"), Some(token)), BatchSizeStrategy::fixed(10))
                .unwrap();
        cursor.fetch_first_page(10).unwrap();
        cursor.load_next_page(u64::MAX).unwrap();
        assert!(!cursor.skipped_head());
        assert_eq!(drain(&mut cursor), vec!["d2", "d3", "d4"]);
        cursor.close().unwrap();
    }

    #[test]
    fn test_sequence_tokens_embedded_when_required() {
        let source = source();
        let mut query = QuerySpec::new("i");
        query.options.require_sequence_tokens = true;
        let mut cursor =
            PartitionResultCursor::open(&source, context(query, None), BatchSizeStrategy::fixed(1)).unwrap();
        cursor.fetch_first_page(1).unwrap();
        cursor.load_next_page(u64::MAX).unwrap();

        let record = cursor.accept().unwrap();
        let document = record.payload.to_json().unwrap();
        let token = SequenceToken::decode(document["searchSequenceToken"].as_str().unwrap()).unwrap();
        assert_eq!(token.position(), record.position());
        assert_eq!(document["_id"], "d0");
        assert_eq!(document["document"]["n"], 0);
        cursor.close().unwrap();
    }

    #[test]
    fn test_refill_size_respects_byte_budget() {
        let source = source();
        let mut cursor =
            PartitionResultCursor::open(&source, context(QuerySpec::new("i"), None), BatchSizeStrategy::fixed(4))
                .unwrap();
        cursor.fetch_first_page(1).unwrap();
        cursor.load_next_page(u64::MAX).unwrap();
        cursor.accept().unwrap();

        let avg = cursor.avg_record_size().unwrap();
        let fetched = cursor.load_next_page(avg * 2).unwrap();
        assert_eq!(fetched.records, 2);
        cursor.close().unwrap();
    }

    #[test]
    fn test_accept_on_empty_page_is_internal() {
        let source = MemoryPartition::new(0);
        let mut cursor =
            PartitionResultCursor::open(&source, context(QuerySpec::new("i"), None), BatchSizeStrategy::fixed(3))
                .unwrap();
        cursor.fetch_first_page(3).unwrap();
        assert!(cursor.is_exhausted());
        cursor.load_next_page(u64::MAX).unwrap();
        let err = cursor.accept().unwrap_err();
        assert!(err.is_fatal());
        cursor.close().unwrap();
    }
}
