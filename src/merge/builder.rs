//! Byte- and count-budgeted page assembly

use crate::cursor::PartitionResultCursor;
use crate::errors::{SearchError, SearchResult};
use crate::model::RankedRecord;

/// An ordered stream of records that can be inspected before consuming.
pub trait RecordSource {
    /// Next record, without consuming it.
    fn peek(&mut self) -> SearchResult<Option<&RankedRecord>>;

    /// Consume the record returned by the last `peek()`.
    fn advance(&mut self) -> SearchResult<RankedRecord>;
}

/// The current page of a single cursor, as a page source.
pub struct CursorStream<'a> {
    pub cursor: &'a mut PartitionResultCursor,
}

impl RecordSource for CursorStream<'_> {
    fn peek(&mut self) -> SearchResult<Option<&RankedRecord>> {
        Ok(self.cursor.peek())
    }

    fn advance(&mut self) -> SearchResult<RankedRecord> {
        self.cursor.accept()
    }
}

/// Records accepted into one page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub records: Vec<RankedRecord>,
    pub byte_size: u64,
}

impl Page {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchBuilder {
    byte_budget: u64,
    count_budget: usize,
}

impl BatchBuilder {
    pub fn new(byte_budget: u64, count_budget: usize) -> Self {
        Self {
            byte_budget,
            count_budget,
        }
    }

    /// Pull records until a budget is hit or the source runs dry.
    ///
    /// A record that does not fit stays in the source for the next page.
    /// A page is only empty when the source is exhausted or the count
    /// budget is zero.
    pub fn build_page(&self, source: &mut dyn RecordSource) -> SearchResult<Page> {
        let mut page = Page::default();

        while page.records.len() < self.count_budget {
            let size = match source.peek()? {
                None => break,
                Some(record) => {
                    let size = record.encoded_size();
                    if page.byte_size.saturating_add(size) > self.byte_budget {
                        if page.is_empty() {
                            return Err(SearchError::OversizedRecord {
                                partition: record.partition_id,
                                local_doc_id: record.local_doc_id,
                                size,
                                budget: self.byte_budget,
                            });
                        }
                        break;
                    }
                    size
                }
            };
            let record = source.advance()?;
            page.byte_size += size;
            page.records.push(record);
        }

        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DocumentId, EncodedDocument, RankKey};
    use std::collections::VecDeque;

    struct VecSource {
        records: VecDeque<RankedRecord>,
    }

    impl RecordSource for VecSource {
        fn peek(&mut self) -> SearchResult<Option<&RankedRecord>> {
            Ok(self.records.front())
        }

        fn advance(&mut self) -> SearchResult<RankedRecord> {
            self.records
                .pop_front()
                .ok_or_else(|| SearchError::internal("empty"))
        }
    }

    fn source(sizes: &[usize]) -> VecSource {
        VecSource {
            records: sizes
                .iter()
                .enumerate()
                .map(|(i, size)| RankedRecord {
                    partition_id: 0,
                    local_doc_id: i as u64,
                    document_id: DocumentId::new(format!("d{}", i)),
                    rank_key: RankKey::scored(0.0),
                    payload: EncodedDocument::from_bytes(vec![b'x'; *size]),
                })
                .collect(),
        }
    }

    #[test]
    fn test_count_budget() {
        let mut src = source(&[10, 10, 10, 10]);
        let page = BatchBuilder::new(1000, 3).build_page(&mut src).unwrap();
        assert_eq!(page.len(), 3);
        assert_eq!(page.byte_size, 30);
        assert_eq!(src.records.len(), 1);
    }

    #[test]
    fn test_byte_budget_leaves_record_for_next_page() {
        let mut src = source(&[40, 40, 40]);
        let builder = BatchBuilder::new(100, 10);

        let first = builder.build_page(&mut src).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first.byte_size, 80);

        let second = builder.build_page(&mut src).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second.records[0].local_doc_id, 2);
    }

    #[test]
    fn test_exact_fit() {
        let mut src = source(&[50, 50]);
        let page = BatchBuilder::new(100, 10).build_page(&mut src).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page.byte_size, 100);
    }

    #[test]
    fn test_oversized_first_record() {
        let mut src = source(&[101, 1]);
        let err = BatchBuilder::new(100, 10).build_page(&mut src).unwrap_err();
        match err {
            SearchError::OversizedRecord { size, budget, local_doc_id, .. } => {
                assert_eq!((size, budget, local_doc_id), (101, 100, 0));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(src.records.len(), 2);
    }

    #[test]
    fn test_oversized_record_after_others_ends_page() {
        let mut src = source(&[10, 500]);
        let page = BatchBuilder::new(100, 10).build_page(&mut src).unwrap();
        assert_eq!(page.len(), 1);
    }

    #[test]
    fn test_exhausted_source_gives_empty_page() {
        let mut src = source(&[]);
        let page = BatchBuilder::new(100, 10).build_page(&mut src).unwrap();
        assert!(page.is_empty());
        assert_eq!(page.byte_size, 0);
    }
}
