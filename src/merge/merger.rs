//! K-way merge of partition cursors
//!
//! The merger never owns cursors. It keeps a min-heap of
//! `(ordering key, cursor index)` over an arena of cursors that the caller
//! lends it on every call. Only cursors whose current page still has a record
//! sit in the heap. A cursor whose page ran dry but whose partition has more
//! is parked as the single pending cursor and refilled on the next `peek()`.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use super::builder::RecordSource;
use crate::cursor::PartitionResultCursor;
use crate::errors::{SearchError, SearchResult};
use crate::model::{RankedRecord, ResumePoint};
use crate::ordering::RelevanceOrdering;

struct HeapEntry {
    key: ResumePoint,
    cursor: usize,
    ordering: Arc<RelevanceOrdering>,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reversed so the first record in order pops first
        self.ordering.compare(other.key.key(), self.key.key())
    }
}

pub struct CrossPartitionMerger {
    ordering: Arc<RelevanceOrdering>,
    heap: BinaryHeap<HeapEntry>,
    pending: Option<usize>,
    peeked: bool,
}

impl CrossPartitionMerger {
    /// Expose every cursor's first page and seed the heap.
    ///
    /// Every cursor must have fetched its first page.
    pub fn new(
        ordering: Arc<RelevanceOrdering>,
        cursors: &mut [PartitionResultCursor],
        byte_budget: u64,
    ) -> SearchResult<Self> {
        let mut merger = Self {
            ordering,
            heap: BinaryHeap::with_capacity(cursors.len()),
            pending: None,
            peeked: false,
        };
        for index in 0..cursors.len() {
            merger.refill(cursors, index, byte_budget)?;
        }
        Ok(merger)
    }

    fn refill(
        &mut self,
        cursors: &mut [PartitionResultCursor],
        index: usize,
        byte_budget: u64,
    ) -> SearchResult<()> {
        let cursor = cursors
            .get_mut(index)
            .ok_or_else(|| SearchError::internal(format!("no cursor at index {}", index)))?;
        // A page can come back empty only when its single record was a skipped head
        while cursor.peek().is_none() && !cursor.is_exhausted() {
            cursor.load_next_page(byte_budget)?;
        }
        if let Some(record) = cursor.peek() {
            self.heap.push(HeapEntry {
                key: record.resume_point(),
                cursor: index,
                ordering: Arc::clone(&self.ordering),
            });
        }
        Ok(())
    }

    /// Smallest unconsumed record across all cursors. Idempotent.
    ///
    /// May block: refills the pending cursor from its engine first.
    pub fn peek<'c>(
        &mut self,
        cursors: &'c mut [PartitionResultCursor],
        byte_budget: u64,
    ) -> SearchResult<Option<&'c RankedRecord>> {
        if let Some(index) = self.pending {
            self.refill(cursors, index, byte_budget)?;
            self.pending = None;
        }

        let Some(top) = self.heap.peek() else {
            self.peeked = false;
            return Ok(None);
        };
        let cursors: &'c [PartitionResultCursor] = cursors;
        let record = cursors
            .get(top.cursor)
            .and_then(PartitionResultCursor::peek)
            .ok_or_else(|| {
                SearchError::internal(format!("heap entry for cursor {} has no record", top.cursor))
            })?;
        self.peeked = true;
        Ok(Some(record))
    }

    /// Consume the record returned by the last `peek()`.
    pub fn advance(&mut self, cursors: &mut [PartitionResultCursor]) -> SearchResult<RankedRecord> {
        if !self.peeked || self.pending.is_some() {
            return Err(SearchError::internal("merger advanced without a successful peek"));
        }
        self.peeked = false;

        let entry = self
            .heap
            .pop()
            .ok_or_else(|| SearchError::internal("merger advanced past the end"))?;
        let cursor = cursors
            .get_mut(entry.cursor)
            .ok_or_else(|| SearchError::internal(format!("no cursor at index {}", entry.cursor)))?;
        let record = cursor.accept()?;

        if let Some(next) = cursor.peek() {
            self.heap.push(HeapEntry {
                key: next.resume_point(),
                cursor: entry.cursor,
                ordering: entry.ordering,
            });
        } else if !cursor.is_exhausted() {
            self.pending = Some(entry.cursor);
        }
        Ok(record)
    }

    pub fn is_exhausted(&self) -> bool {
        self.pending.is_none() && self.heap.is_empty()
    }
}

/// A merger bound to its cursor arena, as a page source.
pub struct MergedStream<'a> {
    pub merger: &'a mut CrossPartitionMerger,
    pub cursors: &'a mut [PartitionResultCursor],
    pub byte_budget: u64,
}

impl RecordSource for MergedStream<'_> {
    fn peek(&mut self) -> SearchResult<Option<&RankedRecord>> {
        self.merger.peek(self.cursors, self.byte_budget)
    }

    fn advance(&mut self) -> SearchResult<RankedRecord> {
        self.merger.advance(self.cursors)
    }
}
