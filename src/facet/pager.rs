//! Paging of intermediate facet results
//!
//! The meta stream of an intermediate query is a count document followed by
//! one document per merged bucket, served under the same byte budgets as
//! search results.

use std::collections::VecDeque;

use serde_json::json;

use super::count::CountResult;
use super::merger::IntermediateBucket;
use crate::errors::{SearchError, SearchResult};
use crate::model::{EncodedDocument, EncodedPage};

#[derive(Debug)]
pub struct IntermediateFacetPager {
    pending: VecDeque<EncodedDocument>,
}

impl IntermediateFacetPager {
    pub fn new(count: CountResult, buckets: Vec<IntermediateBucket>) -> SearchResult<Self> {
        let relation = if count.is_exact() { "eq" } else { "gte" };
        let mut pending = VecDeque::with_capacity(buckets.len() + 1);
        pending.push_back(EncodedDocument::from_json(&json!({
            "type": "count",
            "count": count.value(),
            "relation": relation,
        }))?);
        for bucket in &buckets {
            pending.push_back(bucket.to_document()?);
        }
        Ok(Self { pending })
    }

    /// Next page of at most `byte_budget` bytes.
    ///
    /// Never returns an empty page while documents remain.
    pub fn next_page(&mut self, byte_budget: u64) -> SearchResult<EncodedPage> {
        let mut page = EncodedPage::default();
        while let Some(document) = self.pending.front() {
            if !page.try_push(document, byte_budget) {
                if page.is_empty() {
                    return Err(SearchError::internal(format!(
                        "intermediate facet document of {} bytes exceeds byte budget {}",
                        document.len(),
                        byte_budget
                    )));
                }
                break;
            }
            self.pending.pop_front();
        }
        Ok(page)
    }

    pub fn is_exhausted(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}
