//! In-memory partition engine
//!
//! Documents are stored as JSON with a precomputed `_score`. Filters are
//! equality terms on dotted paths. Used by the CLI and the test-suite.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use super::{
    BucketCount, EngineHit, EnginePage, PageRequest, PartitionFacets, PartitionSearcher,
    PartitionSource, TotalHits,
};
use crate::errors::{SearchError, SearchResult};
use crate::model::{
    DocumentId, FacetDefinition, FieldType, IndexId, PartitionId, QuerySpec, RankKey,
    RecordKey, RecordPosition, SortFieldKind, TypedValue,
};

/// Index fixture file layout
#[derive(Debug, Clone, Deserialize)]
pub struct IndexFixture {
    pub index: IndexId,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldType>,
    pub partitions: Vec<PartitionFixture>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartitionFixture {
    pub documents: Vec<Value>,
}

impl IndexFixture {
    pub fn load(path: &Path) -> SearchResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| SearchError::config(format!("failed to read fixture: {}", e)))?;
        serde_json::from_str(&content)
            .map_err(|e| SearchError::config(format!("invalid fixture JSON: {}", e)))
    }

    /// Build one partition per fixture entry, numbered from zero.
    pub fn into_partitions(self) -> SearchResult<Vec<Arc<dyn PartitionSource>>> {
        let mut partitions: Vec<Arc<dyn PartitionSource>> = Vec::with_capacity(self.partitions.len());
        for (id, fixture) in self.partitions.into_iter().enumerate() {
            let mut partition = MemoryPartition::new(id as PartitionId);
            for (path, field_type) in &self.fields {
                partition = partition.with_field(path, *field_type);
            }
            for document in fixture.documents {
                partition = partition.with_json_document(document)?;
            }
            partitions.push(Arc::new(partition));
        }
        Ok(partitions)
    }
}

#[derive(Debug, Clone)]
struct StoredDocument {
    document_id: DocumentId,
    score: f32,
    body: Value,
}

/// One in-memory partition.
#[derive(Debug)]
pub struct MemoryPartition {
    id: PartitionId,
    fields: BTreeMap<String, FieldType>,
    documents: Arc<Vec<StoredDocument>>,
    inclusive_resume: bool,
    approximate_counts: bool,
    open_failure: Option<String>,
    open_handles: Arc<AtomicUsize>,
}

impl MemoryPartition {
    pub fn new(id: PartitionId) -> Self {
        Self {
            id,
            fields: BTreeMap::new(),
            documents: Arc::new(Vec::new()),
            inclusive_resume: false,
            approximate_counts: false,
            open_failure: None,
            open_handles: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_field(mut self, path: &str, field_type: FieldType) -> Self {
        self.fields.insert(path.to_string(), field_type);
        self
    }

    /// Add a document; its local doc id is its insertion index.
    pub fn with_document(mut self, id: &str, score: f32, body: Value) -> Self {
        Arc::make_mut(&mut self.documents).push(StoredDocument {
            document_id: DocumentId::new(id),
            score,
            body,
        });
        self
    }

    /// Add a document carrying its own `_id` and optional `_score`.
    pub fn with_json_document(self, mut document: Value) -> SearchResult<Self> {
        let object = document
            .as_object_mut()
            .ok_or_else(|| SearchError::config("fixture documents must be objects"))?;
        let id = match object.remove("_id") {
            Some(Value::String(id)) => id,
            _ => return Err(SearchError::config("fixture document needs a string _id")),
        };
        let score = match object.remove("_score") {
            None => 0.0,
            Some(value) => value
                .as_f64()
                .ok_or_else(|| SearchError::config(format!("document {}: _score must be a number", id)))?
                as f32,
        };
        Ok(self.with_document(&id, score, document))
    }

    /// The first resumed search of each handle starts at the resume point
    /// itself instead of strictly after it.
    pub fn with_inclusive_resume(mut self) -> Self {
        self.inclusive_resume = true;
        self
    }

    /// Report total hits as a lower bound.
    pub fn with_approximate_counts(mut self) -> Self {
        self.approximate_counts = true;
        self
    }

    /// Fail every `open()` with the given message.
    pub fn failing_open(mut self, message: &str) -> Self {
        self.open_failure = Some(message.to_string());
        self
    }

    /// Handles opened and not yet released.
    pub fn open_handles(&self) -> usize {
        self.open_handles.load(AtomicOrdering::SeqCst)
    }

    /// Shared handle counter, readable after the partition is moved into an index.
    pub fn handle_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.open_handles)
    }
}

impl PartitionSource for MemoryPartition {
    fn partition_id(&self) -> PartitionId {
        self.id
    }

    fn field_type(&self, path: &str) -> Option<FieldType> {
        self.fields.get(path).copied()
    }

    fn open(&self) -> SearchResult<Box<dyn PartitionSearcher>> {
        if let Some(message) = &self.open_failure {
            return Err(SearchError::engine(self.id, message.clone()));
        }
        self.open_handles.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(Box::new(MemorySearcher {
            id: self.id,
            documents: Arc::clone(&self.documents),
            inclusive_resume: self.inclusive_resume,
            approximate_counts: self.approximate_counts,
            open_handles: Arc::clone(&self.open_handles),
            searches: 0,
            released: false,
        }))
    }
}

fn lookup<'a>(body: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(body, |value, part| value.get(part))
}

/// Every scalar at `path`; arrays contribute each element.
fn values_at(body: &Value, path: &str) -> Vec<TypedValue> {
    match lookup(body, path) {
        None => Vec::new(),
        Some(Value::Array(items)) => items.iter().filter_map(TypedValue::from_json).collect(),
        Some(value) => TypedValue::from_json(value).into_iter().collect(),
    }
}

fn matches_filter(body: &Value, filter: &BTreeMap<String, Value>) -> bool {
    filter.iter().all(|(path, expected)| match lookup(body, path) {
        Some(Value::Array(items)) => items.contains(expected),
        Some(actual) => actual == expected,
        None => expected.is_null(),
    })
}

struct MemorySearcher {
    id: PartitionId,
    documents: Arc<Vec<StoredDocument>>,
    inclusive_resume: bool,
    approximate_counts: bool,
    open_handles: Arc<AtomicUsize>,
    searches: usize,
    released: bool,
}

impl MemorySearcher {
    fn ensure_open(&self) -> SearchResult<()> {
        if self.released {
            return Err(SearchError::engine(self.id, "searcher already released"));
        }
        Ok(())
    }

    fn matching<'a>(&'a self, query: &'a QuerySpec) -> impl Iterator<Item = (usize, &'a StoredDocument)> + 'a {
        self.documents
            .iter()
            .enumerate()
            .filter(move |(_, doc)| matches_filter(&doc.body, &query.filter))
    }

    fn total_hits(&self, count: usize) -> TotalHits {
        if self.approximate_counts {
            TotalHits::at_least(count as u64)
        } else {
            TotalHits::exact(count as u64)
        }
    }

    fn rank_key(doc: &StoredDocument, query: &QuerySpec) -> RankKey {
        match &query.sort {
            None => RankKey::scored(doc.score),
            Some(sort) => RankKey::sorted(
                doc.score,
                sort.fields
                    .iter()
                    .map(|field| match field.kind {
                        SortFieldKind::Score => TypedValue::Number(doc.score as f64),
                        SortFieldKind::Field => values_at(&doc.body, &field.path)
                            .into_iter()
                            .next()
                            .unwrap_or(TypedValue::Null),
                    })
                    .collect(),
            ),
        }
    }

    fn string_buckets(&self, query: &QuerySpec, name: &str, path: &str) -> Vec<BucketCount> {
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for (_, doc) in self.matching(query) {
            let distinct: BTreeSet<String> = values_at(&doc.body, path)
                .into_iter()
                .filter_map(|v| match v {
                    TypedValue::String(s) => Some(s),
                    _ => None,
                })
                .collect();
            for value in distinct {
                *counts.entry(value).or_default() += 1;
            }
        }
        counts
            .into_iter()
            .map(|(value, count)| BucketCount {
                facet_name: name.to_string(),
                bucket: TypedValue::String(value),
                count,
            })
            .collect()
    }

    fn boundary_buckets(&self, query: &QuerySpec, name: &str, definition: &FacetDefinition) -> Vec<BucketCount> {
        let bounds = definition.bucket_bounds();
        let mut counts = vec![0u64; bounds.len().saturating_sub(1)];
        for (_, doc) in self.matching(query) {
            let Some(value) = values_at(&doc.body, definition.path()).into_iter().next() else {
                continue;
            };
            if let Some(i) = bounds.windows(2).position(|w| w[0] <= value && value < w[1]) {
                counts[i] += 1;
            }
        }
        bounds
            .into_iter()
            .zip(counts)
            .map(|(bucket, count)| BucketCount {
                facet_name: name.to_string(),
                bucket,
                count,
            })
            .collect()
    }
}

impl PartitionSearcher for MemorySearcher {
    fn search(&mut self, request: PageRequest<'_>) -> SearchResult<EnginePage> {
        self.ensure_open()?;
        self.searches += 1;
        let inclusive = self.inclusive_resume && self.searches == 1;

        let mut ranked: Vec<(RankKey, RecordPosition, &StoredDocument)> = self
            .matching(request.query)
            .map(|(local, doc)| {
                (
                    Self::rank_key(doc, request.query),
                    RecordPosition::new(self.id, local as u64),
                    doc,
                )
            })
            .collect();
        let total_hits = self.total_hits(ranked.len());

        ranked.sort_by(|(ka, pa, _), (kb, pb, _)| {
            request.ordering.compare(
                RecordKey { rank_key: ka, position: *pa },
                RecordKey { rank_key: kb, position: *pb },
            )
        });

        let hits = ranked
            .into_iter()
            .filter(|(rank_key, position, _)| match request.resume {
                None => true,
                Some(resume) => {
                    let ord = request.ordering.compare(
                        RecordKey { rank_key, position: *position },
                        resume.key(),
                    );
                    ord == Ordering::Greater || (inclusive && ord == Ordering::Equal)
                }
            })
            .take(request.page_size)
            .map(|(rank_key, position, doc)| EngineHit {
                local_doc_id: position.local_doc_id,
                document_id: doc.document_id.clone(),
                score: rank_key.score,
                sort_values: rank_key.sort_values,
                stored: doc.body.clone(),
            })
            .collect();

        Ok(EnginePage { hits, total_hits })
    }

    fn compute_facets(&mut self, query: &QuerySpec) -> SearchResult<PartitionFacets> {
        self.ensure_open()?;

        let total_hits = self.total_hits(self.matching(query).count());
        let mut buckets = Vec::new();
        if let Some(facets) = query.facets() {
            for (name, definition) in facets {
                match definition {
                    FacetDefinition::String { path, .. } => {
                        buckets.extend(self.string_buckets(query, name, path))
                    }
                    _ => buckets.extend(self.boundary_buckets(query, name, definition)),
                }
            }
        }
        Ok(PartitionFacets { total_hits, buckets })
    }

    fn release(&mut self) -> SearchResult<()> {
        if !self.released {
            self.released = true;
            self.open_handles.fetch_sub(1, AtomicOrdering::SeqCst);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NullPosition, SortField, SortSpec};
    use crate::ordering::RelevanceOrdering;
    use serde_json::json;

    fn partition() -> MemoryPartition {
        MemoryPartition::new(0)
            .with_field("color", FieldType::StringFacet)
            .with_field("price", FieldType::Number)
            .with_document("a", 5.0, json!({ "color": "red", "price": 5 }))
            .with_document("b", 9.0, json!({ "color": ["red", "blue"], "price": 50 }))
            .with_document("c", 7.0, json!({ "color": "blue", "price": 500 }))
    }

    fn ids(page: &EnginePage) -> Vec<&str> {
        page.hits.iter().map(|h| h.document_id.as_str()).collect()
    }

    #[test]
    fn test_search_orders_by_score() {
        let source = partition();
        let mut searcher = source.open().unwrap();
        let query = QuerySpec::new("i");
        let page = searcher
            .search(PageRequest {
                query: &query,
                ordering: &RelevanceOrdering::Score,
                page_size: 10,
                resume: None,
            })
            .unwrap();
        assert_eq!(ids(&page), vec!["b", "c", "a"]);
        assert_eq!(page.total_hits, TotalHits::exact(3));
    }

    #[test]
    fn test_search_resumes_strictly_after() {
        let source = partition();
        let mut searcher = source.open().unwrap();
        let query = QuerySpec::new("i");
        let ordering = RelevanceOrdering::Score;
        let first = searcher
            .search(PageRequest { query: &query, ordering: &ordering, page_size: 1, resume: None })
            .unwrap();
        let resume = crate::model::ResumePoint {
            rank_key: RankKey::scored(first.hits[0].score),
            position: RecordPosition::new(0, first.hits[0].local_doc_id),
        };
        let next = searcher
            .search(PageRequest { query: &query, ordering: &ordering, page_size: 5, resume: Some(&resume) })
            .unwrap();
        assert_eq!(ids(&next), vec!["c", "a"]);
    }

    #[test]
    fn test_inclusive_resume_repeats_resume_record() {
        let source = partition().with_inclusive_resume();
        let mut searcher = source.open().unwrap();
        let query = QuerySpec::new("i");
        let resume = crate::model::ResumePoint {
            rank_key: RankKey::scored(9.0),
            position: RecordPosition::new(0, 1),
        };
        let page = searcher
            .search(PageRequest {
                query: &query,
                ordering: &RelevanceOrdering::Score,
                page_size: 5,
                resume: Some(&resume),
            })
            .unwrap();
        assert_eq!(ids(&page), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_sorted_search_and_filter() {
        let source = partition();
        let mut searcher = source.open().unwrap();
        let query = QuerySpec::new("i")
            .with_filter("color", json!("red"))
            .with_sort(SortSpec::new(vec![SortField::ascending("price")]));
        let ordering = RelevanceOrdering::for_sort(query.sort.as_ref(), NullPosition::Lowest);
        let page = searcher
            .search(PageRequest { query: &query, ordering: &ordering, page_size: 10, resume: None })
            .unwrap();
        assert_eq!(ids(&page), vec!["a", "b"]);
        assert_eq!(page.hits[0].sort_values, Some(vec![TypedValue::Number(5.0)]));
    }

    #[test]
    fn test_compute_facets() {
        let source = partition();
        let mut searcher = source.open().unwrap();
        let mut facets = BTreeMap::new();
        facets.insert("color".to_string(), FacetDefinition::string("color", 10));
        facets.insert(
            "price".to_string(),
            FacetDefinition::number("price", vec![0.0, 10.0, 100.0], Some("other")),
        );
        let query = QuerySpec::new("i").with_kind(crate::model::QueryKind::Collector { facets });

        let result = searcher.compute_facets(&query).unwrap();
        assert_eq!(result.total_hits, TotalHits::exact(3));

        let summary: Vec<(String, TypedValue, u64)> = result
            .buckets
            .into_iter()
            .map(|b| (b.facet_name, b.bucket, b.count))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("color".to_string(), TypedValue::from("blue"), 2),
                ("color".to_string(), TypedValue::from("red"), 2),
                ("price".to_string(), TypedValue::Number(0.0), 1),
                ("price".to_string(), TypedValue::Number(10.0), 1),
            ]
        );
    }

    #[test]
    fn test_handles_are_tracked() {
        let source = partition();
        let mut first = source.open().unwrap();
        let _second = source.open().unwrap();
        assert_eq!(source.open_handles(), 2);
        first.release().unwrap();
        first.release().unwrap();
        assert_eq!(source.open_handles(), 1);
        let query = QuerySpec::new("i");
        assert!(first.compute_facets(&query).is_err());
    }

    #[test]
    fn test_open_failure() {
        let source = partition().failing_open("disk unavailable");
        let err = source.open().err().unwrap();
        assert_eq!(err.code(), "SEARCH_ENGINE_FAILED");
    }

    #[test]
    fn test_fixture_loading() {
        let fixture: IndexFixture = serde_json::from_value(json!({
            "index": "products",
            "fields": { "color": "string_facet" },
            "partitions": [
                { "documents": [ { "_id": "1", "_score": 9, "color": "red" } ] },
                { "documents": [] }
            ]
        }))
        .unwrap();
        let partitions = fixture.into_partitions().unwrap();
        assert_eq!(partitions.len(), 2);
        assert_eq!(partitions[1].partition_id(), 1);
        assert_eq!(partitions[0].field_type("color"), Some(FieldType::StringFacet));

        let bad = MemoryPartition::new(0).with_json_document(json!({ "_score": 1 }));
        assert!(bad.is_err());
    }
}
