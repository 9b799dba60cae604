//! Boundary to the single-partition search engine
//!
//! The query layer never scores documents itself. It asks each partition for
//! pages of already-ranked hits and for per-partition facet tallies, through
//! the two traits below.

pub mod memory;

use serde::Serialize;
use serde_json::Value;

use crate::errors::SearchResult;
use crate::model::{
    DocumentId, FieldType, LocalDocId, PartitionId, QuerySpec, ResumePoint, TypedValue,
};
use crate::ordering::RelevanceOrdering;

/// One hit as returned by a partition engine, before hydration.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineHit {
    pub local_doc_id: LocalDocId,
    pub document_id: DocumentId,
    pub score: f32,
    /// One value per declared sort field, present iff the query is sorted
    pub sort_values: Option<Vec<TypedValue>>,
    pub stored: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HitsRelation {
    Exact,
    AtLeast,
}

/// Number of documents matching the query in one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TotalHits {
    pub value: u64,
    pub relation: HitsRelation,
}

impl TotalHits {
    pub fn exact(value: u64) -> Self {
        Self {
            value,
            relation: HitsRelation::Exact,
        }
    }

    pub fn at_least(value: u64) -> Self {
        Self {
            value,
            relation: HitsRelation::AtLeast,
        }
    }

    pub fn is_exact(&self) -> bool {
        self.relation == HitsRelation::Exact
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnginePage {
    pub hits: Vec<EngineHit>,
    pub total_hits: TotalHits,
}

/// Count of one facet bucket in one partition.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketCount {
    pub facet_name: String,
    pub bucket: TypedValue,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartitionFacets {
    pub total_hits: TotalHits,
    pub buckets: Vec<BucketCount>,
}

/// Parameters of one page request.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest<'a> {
    pub query: &'a QuerySpec,
    pub ordering: &'a RelevanceOrdering,
    pub page_size: usize,
    /// Hits must sort strictly after this point
    pub resume: Option<&'a ResumePoint>,
}

/// An open handle on one partition, owned by exactly one cursor.
pub trait PartitionSearcher: Send {
    /// Up to `page_size` hits in `ordering`, strictly after `resume` when
    /// given. Fewer hits than asked means the partition has no more.
    fn search(&mut self, request: PageRequest<'_>) -> SearchResult<EnginePage>;

    fn compute_facets(&mut self, query: &QuerySpec) -> SearchResult<PartitionFacets>;

    /// Release the handle. Calling it twice is a no-op.
    fn release(&mut self) -> SearchResult<()>;
}

/// A partition that can be searched.
pub trait PartitionSource: Send + Sync {
    fn partition_id(&self) -> PartitionId;

    fn field_type(&self, path: &str) -> Option<FieldType>;

    fn open(&self) -> SearchResult<Box<dyn PartitionSearcher>>;
}
