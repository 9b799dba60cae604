//! Error types for query execution and result delivery
//!
//! Error codes:
//! - SEARCH_INVALID_QUERY (ERROR)
//! - SEARCH_CONFIG_INVALID (ERROR)
//! - SEARCH_CURSOR_NOT_FOUND (ERROR)
//! - SEARCH_CURSOR_CLOSED (ERROR)
//! - SEARCH_ENGINE_FAILED (ERROR)
//! - SEARCH_ENGINE_EXHAUSTED_MISMATCH (FATAL)
//! - SEARCH_OVERSIZED_RECORD (FATAL)
//! - SEARCH_FACET_DEFINITION_MISMATCH (FATAL)
//! - SEARCH_APPROXIMATE_COUNT (FATAL)
//! - SEARCH_INTERNAL (FATAL)
//!
//! FATAL errors abort the query they occur in. They never abort the process.

use std::fmt;

use thiserror::Error;

use crate::model::{LocalDocId, PartitionId};

/// Boxed engine-side error.
pub type EngineSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Severity levels for search errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The request failed but the service is healthy
    Error,
    /// A broken internal contract; the query must be aborted
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Every failure the query layer can surface to a caller.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("cursor {0} not found")]
    CursorNotFound(u64),

    #[error("cursor for partition {partition} is closed")]
    Closed { partition: PartitionId },

    #[error("engine failure on partition {partition}: {source}")]
    Engine {
        partition: PartitionId,
        #[source]
        source: EngineSource,
    },

    #[error("partition {partition} was asked for more results after it was exhausted")]
    EngineExhaustedMismatch { partition: PartitionId },

    #[error(
        "record {local_doc_id} of partition {partition} needs {size} bytes, \
         page budget is {budget} bytes"
    )]
    OversizedRecord {
        partition: PartitionId,
        local_doc_id: LocalDocId,
        size: u64,
        budget: u64,
    },

    #[error("facet '{0}' has buckets but no definition")]
    FacetDefinitionMismatch(String),

    #[error("facet merging requires an exact hit count, partition {partition} reported at least {value}")]
    ApproximateCount { partition: PartitionId, value: u64 },

    #[error("internal error: {0}")]
    Internal(String),
}

impl SearchError {
    /// Create an invalid query error
    pub fn invalid_query(reason: impl Into<String>) -> Self {
        Self::InvalidQuery(reason.into())
    }

    /// Create a configuration error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config(reason.into())
    }

    /// Create an internal error
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal(reason.into())
    }

    /// Wrap an engine error for the given partition
    pub fn engine<E>(partition: PartitionId, source: E) -> Self
    where
        E: Into<EngineSource>,
    {
        Self::Engine {
            partition,
            source: source.into(),
        }
    }

    /// Returns the stable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidQuery(_) => "SEARCH_INVALID_QUERY",
            Self::Config(_) => "SEARCH_CONFIG_INVALID",
            Self::CursorNotFound(_) => "SEARCH_CURSOR_NOT_FOUND",
            Self::Closed { .. } => "SEARCH_CURSOR_CLOSED",
            Self::Engine { .. } => "SEARCH_ENGINE_FAILED",
            Self::EngineExhaustedMismatch { .. } => "SEARCH_ENGINE_EXHAUSTED_MISMATCH",
            Self::OversizedRecord { .. } => "SEARCH_OVERSIZED_RECORD",
            Self::FacetDefinitionMismatch(_) => "SEARCH_FACET_DEFINITION_MISMATCH",
            Self::ApproximateCount { .. } => "SEARCH_APPROXIMATE_COUNT",
            Self::Internal(_) => "SEARCH_INTERNAL",
        }
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        match self {
            Self::EngineExhaustedMismatch { .. }
            | Self::OversizedRecord { .. }
            | Self::FacetDefinitionMismatch(_)
            | Self::ApproximateCount { .. }
            | Self::Internal(_) => Severity::Fatal,
            _ => Severity::Error,
        }
    }

    /// Returns whether this is a fatal error
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

/// Result type for search operations
pub type SearchResult<T> = Result<T, SearchError>;
