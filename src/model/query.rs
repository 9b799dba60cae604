//! Query descriptions as accepted by the cursor manager

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::value::TypedValue;
use crate::errors::{SearchError, SearchResult};

/// Stable identifier of a logical index
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexId(String);

impl IndexId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IndexId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A search request against one logical index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySpec {
    pub index: IndexId,

    #[serde(default)]
    pub kind: QueryKind,

    /// Equality terms; their meaning belongs to the partition engine.
    #[serde(default)]
    pub filter: BTreeMap<String, Value>,

    #[serde(default)]
    pub sort: Option<SortSpec>,

    /// Encoded [`SequenceToken`](super::SequenceToken) to resume after.
    #[serde(default)]
    pub sequence_token: Option<String>,

    #[serde(default)]
    pub options: CursorOptions,
}

impl QuerySpec {
    pub fn new(index: impl Into<IndexId>) -> Self {
        Self {
            index: index.into(),
            kind: QueryKind::Operator,
            filter: BTreeMap::new(),
            sort: None,
            sequence_token: None,
            options: CursorOptions::default(),
        }
    }

    pub fn with_kind(mut self, kind: QueryKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_sort(mut self, sort: SortSpec) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_filter(mut self, path: impl Into<String>, value: Value) -> Self {
        self.filter.insert(path.into(), value);
        self
    }

    pub fn with_sequence_token(mut self, token: impl Into<String>) -> Self {
        self.sequence_token = Some(token.into());
        self
    }

    pub fn with_options(mut self, options: CursorOptions) -> Self {
        self.options = options;
        self
    }

    /// Facet definitions for collector queries, empty otherwise.
    pub fn facets(&self) -> Option<&BTreeMap<String, FacetDefinition>> {
        match &self.kind {
            QueryKind::Collector { facets } => Some(facets),
            _ => None,
        }
    }
}

impl From<String> for IndexId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// How the partitions evaluate the query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryKind {
    /// Plain ranked retrieval
    #[default]
    Operator,
    /// Ranked retrieval plus facet collection
    Collector {
        facets: BTreeMap<String, FacetDefinition>,
    },
    /// Nearest-neighbour retrieval capped at `limit` records overall
    Vector { limit: usize },
}

/// Where null and missing values sort, before any reversal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullPosition {
    #[default]
    Lowest,
    Highest,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortFieldKind {
    /// Sort by a stored field value
    #[default]
    Field,
    /// Sort by relevance score
    Score,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortField {
    pub path: String,
    #[serde(default)]
    pub kind: SortFieldKind,
    /// Descending when set
    #[serde(default)]
    pub reverse: bool,
    #[serde(default)]
    pub nulls: Option<NullPosition>,
}

impl SortField {
    pub fn ascending(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: SortFieldKind::Field,
            reverse: false,
            nulls: None,
        }
    }

    pub fn descending(path: impl Into<String>) -> Self {
        Self {
            reverse: true,
            ..Self::ascending(path)
        }
    }

    pub fn score(reverse: bool) -> Self {
        Self {
            path: "score".to_string(),
            kind: SortFieldKind::Score,
            reverse,
            nulls: None,
        }
    }

    pub fn with_nulls(mut self, nulls: NullPosition) -> Self {
        self.nulls = Some(nulls);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortSpec {
    pub fields: Vec<SortField>,
}

impl SortSpec {
    pub fn new(fields: Vec<SortField>) -> Self {
        Self { fields }
    }

    pub fn validate(&self) -> SearchResult<()> {
        if self.fields.is_empty() {
            return Err(SearchError::invalid_query("sort must declare at least one field"));
        }
        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.path.is_empty() {
                return Err(SearchError::invalid_query("sort field path must not be empty"));
            }
            if !seen.insert(field.path.as_str()) {
                return Err(SearchError::invalid_query(format!(
                    "sort field '{}' declared more than once",
                    field.path
                )));
            }
        }
        Ok(())
    }
}

/// Per-cursor delivery options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorOptions {
    /// Initial page size hint
    #[serde(default)]
    pub batch_size: Option<usize>,
    /// Exact number of documents the client wants per page
    #[serde(default)]
    pub docs_requested: Option<usize>,
    /// Attach an encoded sequence token to every result
    #[serde(default)]
    pub require_sequence_tokens: bool,
}

/// Field types a partition reports for facet validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Number,
    Date,
    String,
    StringFacet,
    Token,
    Uuid,
    Boolean,
}

fn default_num_buckets() -> usize {
    10
}

/// One requested facet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FacetDefinition {
    String {
        path: String,
        #[serde(default = "default_num_buckets")]
        num_buckets: usize,
    },
    Number {
        path: String,
        boundaries: Vec<f64>,
        #[serde(default)]
        default: Option<String>,
    },
    Date {
        path: String,
        boundaries: Vec<DateTime<Utc>>,
        #[serde(default)]
        default: Option<String>,
    },
}

impl FacetDefinition {
    pub fn string(path: impl Into<String>, num_buckets: usize) -> Self {
        FacetDefinition::String {
            path: path.into(),
            num_buckets,
        }
    }

    pub fn number(path: impl Into<String>, boundaries: Vec<f64>, default: Option<&str>) -> Self {
        FacetDefinition::Number {
            path: path.into(),
            boundaries,
            default: default.map(str::to_string),
        }
    }

    pub fn path(&self) -> &str {
        match self {
            FacetDefinition::String { path, .. }
            | FacetDefinition::Number { path, .. }
            | FacetDefinition::Date { path, .. } => path,
        }
    }

    /// Lower bounds of the declared buckets; empty for string facets.
    ///
    /// The last boundary only closes the previous bucket.
    pub fn bucket_bounds(&self) -> Vec<TypedValue> {
        match self {
            FacetDefinition::String { .. } => Vec::new(),
            FacetDefinition::Number { boundaries, .. } => {
                boundaries.iter().map(|b| TypedValue::Number(*b)).collect()
            }
            FacetDefinition::Date { boundaries, .. } => {
                boundaries.iter().map(|b| TypedValue::Date(*b)).collect()
            }
        }
    }

    pub fn default_bucket(&self) -> Option<&str> {
        match self {
            FacetDefinition::String { .. } => None,
            FacetDefinition::Number { default, .. } | FacetDefinition::Date { default, .. } => {
                default.as_deref()
            }
        }
    }

    pub fn is_boundary(&self) -> bool {
        !matches!(self, FacetDefinition::String { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_spec_from_json() {
        let spec: QuerySpec = serde_json::from_value(serde_json::json!({
            "index": "products",
            "kind": {
                "type": "collector",
                "facets": {
                    "color": { "type": "string", "path": "color" },
                    "price": { "type": "number", "path": "price", "boundaries": [0, 10, 100], "default": "other" }
                }
            },
            "sort": { "fields": [ { "path": "price", "reverse": true } ] },
            "options": { "docs_requested": 5 }
        }))
        .unwrap();

        assert_eq!(spec.index.as_str(), "products");
        let facets = spec.facets().unwrap();
        assert_eq!(facets["color"], FacetDefinition::string("color", 10));
        assert_eq!(facets["price"].default_bucket(), Some("other"));
        assert_eq!(spec.sort.unwrap().fields[0], SortField::descending("price"));
        assert_eq!(spec.options.docs_requested, Some(5));
        assert!(!spec.options.require_sequence_tokens);
    }

    #[test]
    fn test_defaults_to_operator_query() {
        let spec: QuerySpec = serde_json::from_value(serde_json::json!({ "index": "i" })).unwrap();
        assert!(matches!(spec.kind, QueryKind::Operator));
        assert!(spec.facets().is_none());
    }

    #[test]
    fn test_sort_validation() {
        assert!(SortSpec::new(vec![]).validate().is_err());
        assert!(SortSpec::new(vec![SortField::ascending("a"), SortField::descending("a")])
            .validate()
            .is_err());
        assert!(SortSpec::new(vec![SortField::score(false), SortField::ascending("a")])
            .validate()
            .is_ok());
    }

    #[test]
    fn test_bucket_bounds() {
        let def = FacetDefinition::number("price", vec![0.0, 10.0], None);
        assert_eq!(
            def.bucket_bounds(),
            vec![TypedValue::Number(0.0), TypedValue::Number(10.0)]
        );
        assert!(def.is_boundary());
        assert!(FacetDefinition::string("c", 3).bucket_bounds().is_empty());
    }
}
