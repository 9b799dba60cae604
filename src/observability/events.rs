//! Observable events
//!
//! Every log line emitted by the query layer carries one of these names in
//! its `event` field.

use std::fmt;

/// Observable events in the query layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Index registry
    /// Index registered with its partitions
    IndexRegistered,
    /// Index dropped, its cursors killed
    IndexDropped,

    // Query lifecycle
    /// Query opened on every partition
    QueryOpened,
    /// Query failed to open; no cursor remains
    QueryRejected,
    /// Page handed to the client
    PageEmitted,

    // Cursor lifecycle
    /// Cursor delivered its last page
    CursorExhausted,
    /// Cursor closed by the client or the manager
    CursorClosed,
    /// Idle cursor reaped
    CursorReaped,
    /// Engine handle release failed
    ReleaseFailed,
    /// Cursor dropped while still open
    CursorLeaked,

    // Consistency
    /// Resumed stream repeated the token's record, skipped
    HeadDuplicateSkipped,
    /// Fetched page repeats or precedes the previous one
    NoProgressBatch,
    /// Emitted page repeats or precedes the previous one
    PageOrderRegression,
    /// Emitted page holds records with equal rank keys
    BatchWithTies,

    // Facets
    /// Per-partition facet tallies folded
    FacetsMerged,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::IndexRegistered => "INDEX_REGISTERED",
            Event::IndexDropped => "INDEX_DROPPED",

            Event::QueryOpened => "QUERY_OPENED",
            Event::QueryRejected => "QUERY_REJECTED",
            Event::PageEmitted => "PAGE_EMITTED",

            Event::CursorExhausted => "CURSOR_EXHAUSTED",
            Event::CursorClosed => "CURSOR_CLOSED",
            Event::CursorReaped => "CURSOR_REAPED",
            Event::ReleaseFailed => "RELEASE_FAILED",
            Event::CursorLeaked => "CURSOR_LEAKED",

            Event::HeadDuplicateSkipped => "HEAD_DUPLICATE_SKIPPED",
            Event::NoProgressBatch => "NO_PROGRESS_BATCH",
            Event::PageOrderRegression => "PAGE_ORDER_REGRESSION",
            Event::BatchWithTies => "BATCH_WITH_TIES",

            Event::FacetsMerged => "FACETS_MERGED",
        }
    }

    /// Returns true if this event signals a consistency anomaly
    pub fn is_anomaly(&self) -> bool {
        matches!(
            self,
            Event::NoProgressBatch
                | Event::PageOrderRegression
                | Event::BatchWithTies
                | Event::ReleaseFailed
                | Event::CursorLeaked
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_events_have_string_representation() {
        let events = [
            Event::IndexRegistered,
            Event::IndexDropped,
            Event::QueryOpened,
            Event::QueryRejected,
            Event::PageEmitted,
            Event::CursorExhausted,
            Event::CursorClosed,
            Event::CursorReaped,
            Event::ReleaseFailed,
            Event::CursorLeaked,
            Event::HeadDuplicateSkipped,
            Event::NoProgressBatch,
            Event::PageOrderRegression,
            Event::BatchWithTies,
            Event::FacetsMerged,
        ];

        for event in events {
            let s = event.as_str();
            assert!(!s.is_empty());
            assert!(s.chars().all(|c| c.is_uppercase() || c == '_'));
        }
    }

    #[test]
    fn test_anomaly_events() {
        assert!(Event::NoProgressBatch.is_anomaly());
        assert!(Event::BatchWithTies.is_anomaly());
        assert!(!Event::QueryOpened.is_anomaly());
        assert!(!Event::HeadDuplicateSkipped.is_anomaly());
    }

    #[test]
    fn test_event_display() {
        assert_eq!(format!("{}", Event::CursorReaped), "CURSOR_REAPED");
    }
}
