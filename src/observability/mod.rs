//! Observability for the query layer
//!
//! - Structured logging through `tracing`
//! - Lock-free counters
//! - Lifecycle scopes around query opening
//!
//! # Usage
//!
//! ```ignore
//! use shardcursor::observability::{log_event, Event, MetricsRegistry, ObservationScope};
//!
//! log_event(Event::IndexRegistered, "index=products partitions=2");
//!
//! let metrics = MetricsRegistry::new();
//! metrics.increment_queries_opened();
//!
//! let scope = ObservationScope::new("QUERY_OPEN");
//! // ... do work ...
//! scope.complete();
//! ```

mod events;
mod metrics;
mod scope;

pub use events::Event;
pub use metrics::{MetricsRegistry, MetricsSnapshot};
pub use scope::ObservationScope;

use tracing::{info, warn};

/// Log a lifecycle event; anomalies go out at WARN, everything else at INFO
pub fn log_event(event: Event, details: &str) {
    if event.is_anomaly() {
        warn!(event = event.as_str(), details);
    } else {
        info!(event = event.as_str(), details);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event() {
        log_event(Event::IndexRegistered, "index=a");
        log_event(Event::NoProgressBatch, "partition=0");
    }
}
