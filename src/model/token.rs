//! Opaque resume points for stateless pagination

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::record::{DocumentId, RankKey, RankedRecord, RecordPosition, ResumePoint};
use super::value::TypedValue;
use crate::errors::{SearchError, SearchResult};

/// Resume point handed to clients after each record.
///
/// A token is immutable once created and is only ever seen by clients in its
/// encoded form, a URL-safe base64 string.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceToken {
    last_document_id: DocumentId,
    last_rank_key: RankKey,
    position: RecordPosition,
}

/// Sort value on the wire. Numbers travel as raw bits like the score.
#[derive(Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
enum WireValue {
    Null,
    Bool(bool),
    NumberBits(u64),
    String(String),
    Uuid(Uuid),
    Date(DateTime<Utc>),
}

impl From<&TypedValue> for WireValue {
    fn from(value: &TypedValue) -> Self {
        match value {
            TypedValue::Null => WireValue::Null,
            TypedValue::Bool(b) => WireValue::Bool(*b),
            TypedValue::Number(n) => WireValue::NumberBits(n.to_bits()),
            TypedValue::String(s) => WireValue::String(s.clone()),
            TypedValue::Uuid(u) => WireValue::Uuid(*u),
            TypedValue::Date(d) => WireValue::Date(*d),
        }
    }
}

impl From<WireValue> for TypedValue {
    fn from(value: WireValue) -> Self {
        match value {
            WireValue::Null => TypedValue::Null,
            WireValue::Bool(b) => TypedValue::Bool(b),
            WireValue::NumberBits(bits) => TypedValue::Number(f64::from_bits(bits)),
            WireValue::String(s) => TypedValue::String(s),
            WireValue::Uuid(u) => TypedValue::Uuid(u),
            WireValue::Date(d) => TypedValue::Date(d),
        }
    }
}

/// Wire form. The score travels as raw bits so NaN and signed zero survive.
#[derive(Serialize, Deserialize)]
struct TokenRepr {
    #[serde(rename = "id")]
    document_id: DocumentId,
    #[serde(rename = "s")]
    score_bits: u32,
    #[serde(rename = "v", default, skip_serializing_if = "Option::is_none")]
    sort_values: Option<Vec<WireValue>>,
    #[serde(rename = "p")]
    partition_id: u32,
    #[serde(rename = "d")]
    local_doc_id: u64,
}

impl SequenceToken {
    pub fn new(last_document_id: DocumentId, last_rank_key: RankKey, position: RecordPosition) -> Self {
        Self {
            last_document_id,
            last_rank_key,
            position,
        }
    }

    /// Token for resuming right after `record`.
    pub fn for_record(record: &RankedRecord) -> Self {
        Self::new(
            record.document_id.clone(),
            record.rank_key.clone(),
            record.position(),
        )
    }

    pub fn last_document_id(&self) -> &DocumentId {
        &self.last_document_id
    }

    pub fn last_rank_key(&self) -> &RankKey {
        &self.last_rank_key
    }

    pub fn position(&self) -> RecordPosition {
        self.position
    }

    pub fn resume_point(&self) -> ResumePoint {
        ResumePoint {
            rank_key: self.last_rank_key.clone(),
            position: self.position,
        }
    }

    pub fn encode(&self) -> String {
        let repr = TokenRepr {
            document_id: self.last_document_id.clone(),
            score_bits: self.last_rank_key.score.to_bits(),
            sort_values: self
                .last_rank_key
                .sort_values
                .as_ref()
                .map(|values| values.iter().map(WireValue::from).collect()),
            partition_id: self.position.partition_id,
            local_doc_id: self.position.local_doc_id,
        };
        // Serializing a plain struct of owned scalars cannot fail
        let json = serde_json::to_vec(&repr).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(encoded: &str) -> SearchResult<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim())
            .map_err(|e| SearchError::invalid_query(format!("malformed sequence token: {}", e)))?;
        let repr: TokenRepr = serde_json::from_slice(&bytes)
            .map_err(|e| SearchError::invalid_query(format!("malformed sequence token: {}", e)))?;

        Ok(Self {
            last_document_id: repr.document_id,
            last_rank_key: RankKey {
                score: f32::from_bits(repr.score_bits),
                sort_values: repr
                    .sort_values
                    .map(|values| values.into_iter().map(TypedValue::from).collect()),
            },
            position: RecordPosition::new(repr.partition_id, repr.local_doc_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(score: f32, sort: Option<Vec<TypedValue>>) -> SequenceToken {
        SequenceToken::new(
            DocumentId::from("doc-7"),
            RankKey {
                score,
                sort_values: sort,
            },
            RecordPosition::new(3, 42),
        )
    }

    #[test]
    fn test_encode_decode_score_token() {
        let original = token(7.25, None);
        let decoded = SequenceToken::decode(&original.encode()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_encode_decode_sorted_token() {
        let original = token(
            0.5,
            Some(vec![TypedValue::from("red"), TypedValue::Null, TypedValue::Number(3.0)]),
        );
        let decoded = SequenceToken::decode(&original.encode()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_nan_score_survives() {
        let decoded = SequenceToken::decode(&token(f32::NAN, None).encode()).unwrap();
        assert!(decoded.last_rank_key().score.is_nan());
    }

    #[test]
    fn test_non_finite_sort_values_survive() {
        let original = token(
            1.0,
            Some(vec![
                TypedValue::Number(f64::NAN),
                TypedValue::Number(f64::NEG_INFINITY),
                TypedValue::Number(-0.0),
            ]),
        );
        let decoded = SequenceToken::decode(&original.encode()).unwrap();
        let values = decoded.last_rank_key().sort_values.clone().unwrap();
        assert!(matches!(values[0], TypedValue::Number(n) if n.is_nan()));
        assert!(matches!(values[1], TypedValue::Number(n) if n == f64::NEG_INFINITY));
        assert!(matches!(values[2], TypedValue::Number(n) if n == 0.0 && n.is_sign_negative()));
    }

    #[test]
    fn test_encoding_is_url_safe() {
        let encoded = token(1.0, Some(vec![TypedValue::from("??>>")])).encode();
        assert!(encoded
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_malformed_token_is_invalid_query() {
        let err = SequenceToken::decode("not a token!").unwrap_err();
        assert_eq!(err.code(), "SEARCH_INVALID_QUERY");

        let not_json = URL_SAFE_NO_PAD.encode(b"hello");
        let err = SequenceToken::decode(&not_json).unwrap_err();
        assert_eq!(err.code(), "SEARCH_INVALID_QUERY");
    }

    #[test]
    fn test_resume_point() {
        let t = token(2.0, None);
        let resume = t.resume_point();
        assert_eq!(resume.position, RecordPosition::new(3, 42));
        assert_eq!(resume.rank_key.score, 2.0);
    }
}
