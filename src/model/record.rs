//! Ranked records and their ordering keys

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::value::TypedValue;
use crate::errors::{SearchError, SearchResult};

/// Identifier of one physical partition of an index
pub type PartitionId = u32;

/// Engine-local document number, unique within a partition
pub type LocalDocId = u64;

/// Stable, user-visible document identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Globally unique position of a record; the final tie-break of every ordering.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct RecordPosition {
    pub partition_id: PartitionId,
    pub local_doc_id: LocalDocId,
}

impl RecordPosition {
    pub fn new(partition_id: PartitionId, local_doc_id: LocalDocId) -> Self {
        Self {
            partition_id,
            local_doc_id,
        }
    }
}

impl fmt::Display for RecordPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.partition_id, self.local_doc_id)
    }
}

/// The values a record is ranked by.
///
/// `sort_values` is present iff the query declares a sort, with one value per
/// declared sort field.
#[derive(Debug, Clone, PartialEq)]
pub struct RankKey {
    pub score: f32,
    pub sort_values: Option<Vec<TypedValue>>,
}

impl RankKey {
    pub fn scored(score: f32) -> Self {
        Self {
            score,
            sort_values: None,
        }
    }

    pub fn sorted(score: f32, sort_values: Vec<TypedValue>) -> Self {
        Self {
            score,
            sort_values: Some(sort_values),
        }
    }
}

/// Borrowed view of everything an ordering needs to place a record.
#[derive(Debug, Clone, Copy)]
pub struct RecordKey<'a> {
    pub rank_key: &'a RankKey,
    pub position: RecordPosition,
}

/// Owned ordering key: where a partition should resume after a record.
#[derive(Debug, Clone, PartialEq)]
pub struct ResumePoint {
    pub rank_key: RankKey,
    pub position: RecordPosition,
}

impl ResumePoint {
    pub fn key(&self) -> RecordKey<'_> {
        RecordKey {
            rank_key: &self.rank_key,
            position: self.position,
        }
    }
}

/// A fully encoded result document, ready to be returned to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedDocument(Vec<u8>);

impl EncodedDocument {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn from_json(value: &Value) -> SearchResult<Self> {
        serde_json::to_vec(value)
            .map(Self)
            .map_err(|e| SearchError::internal(format!("failed to encode document: {}", e)))
    }

    pub fn to_json(&self) -> SearchResult<Value> {
        serde_json::from_slice(&self.0)
            .map_err(|e| SearchError::internal(format!("failed to decode document: {}", e)))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One result of one partition, with its rank key and encoded payload.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedRecord {
    pub partition_id: PartitionId,
    pub local_doc_id: LocalDocId,
    pub document_id: DocumentId,
    pub rank_key: RankKey,
    pub payload: EncodedDocument,
}

impl RankedRecord {
    pub fn position(&self) -> RecordPosition {
        RecordPosition::new(self.partition_id, self.local_doc_id)
    }

    pub fn key(&self) -> RecordKey<'_> {
        RecordKey {
            rank_key: &self.rank_key,
            position: self.position(),
        }
    }

    pub fn resume_point(&self) -> ResumePoint {
        ResumePoint {
            rank_key: self.rank_key.clone(),
            position: self.position(),
        }
    }

    /// Bytes this record occupies in a page.
    pub fn encoded_size(&self) -> u64 {
        self.payload.len() as u64
    }
}

/// One page of encoded documents as handed to a client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedPage {
    pub documents: Vec<EncodedDocument>,
    pub byte_size: u64,
}

impl EncodedPage {
    pub fn from_records(records: Vec<RankedRecord>) -> Self {
        let byte_size = records.iter().map(RankedRecord::encoded_size).sum();
        Self {
            documents: records.into_iter().map(|r| r.payload).collect(),
            byte_size,
        }
    }

    /// Append a document if it fits `byte_budget`.
    pub fn try_push(&mut self, document: &EncodedDocument, byte_budget: u64) -> bool {
        let size = document.len() as u64;
        if self.byte_size.saturating_add(size) > byte_budget {
            return false;
        }
        self.byte_size += size;
        self.documents.push(document.clone());
        true
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn to_json_values(&self) -> SearchResult<Vec<Value>> {
        self.documents.iter().map(EncodedDocument::to_json).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positions_order_by_partition_then_doc() {
        let a = RecordPosition::new(0, 99);
        let b = RecordPosition::new(1, 0);
        let c = RecordPosition::new(1, 5);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_encoded_document_round_trip() {
        let doc = EncodedDocument::from_json(&serde_json::json!({ "_id": "a", "n": 1 })).unwrap();
        assert!(!doc.is_empty());
        assert_eq!(doc.to_json().unwrap()["_id"], "a");
    }

    #[test]
    fn test_resume_point_matches_record_key() {
        let record = RankedRecord {
            partition_id: 2,
            local_doc_id: 11,
            document_id: DocumentId::from("doc"),
            rank_key: RankKey::scored(1.5),
            payload: EncodedDocument::from_bytes(b"{}".to_vec()),
        };
        let resume = record.resume_point();
        assert_eq!(resume.position, record.position());
        assert_eq!(resume.key().rank_key, record.key().rank_key);
        assert_eq!(record.encoded_size(), 2);

        let page = EncodedPage::from_records(vec![record]);
        assert_eq!(page.byte_size, 2);
        assert_eq!(page.len(), 1);
    }

    #[test]
    fn test_encoded_page_try_push_respects_budget() {
        let doc = EncodedDocument::from_bytes(vec![b'x'; 10]);
        let mut page = EncodedPage::default();
        assert!(page.try_push(&doc, 25));
        assert!(page.try_push(&doc, 25));
        assert!(!page.try_push(&doc, 25));
        assert_eq!(page.byte_size, 20);
    }
}
