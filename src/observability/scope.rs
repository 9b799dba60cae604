//! ObservationScope for automatic begin/complete logging

use std::time::Instant;

use tracing::{error, info, warn};

fn render(fields: &[(&str, &str)]) -> String {
    fields
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(" ")
}

/// A scope that logs its own begin and end
///
/// # Usage
///
/// ```ignore
/// let scope = ObservationScope::with_fields("QUERY_OPEN", &[("index", "products")]);
/// // ... do work ...
/// scope.complete(); // logs QUERY_OPEN_COMPLETE
/// ```
///
/// # Behavior
///
/// - `{name}_BEGIN` on creation (INFO)
/// - `{name}_COMPLETE` on `complete()` (INFO), with elapsed milliseconds
/// - `{name}_FAILED` on `fail()` (ERROR)
/// - `{name}_INCOMPLETE` when dropped without either (WARN)
pub struct ObservationScope {
    name: &'static str,
    fields: String,
    started: Instant,
    completed: bool,
}

impl ObservationScope {
    /// Create a new observation scope
    pub fn new(name: &'static str) -> Self {
        Self::with_fields(name, &[])
    }

    /// Create a new observation scope with fields repeated on every line
    pub fn with_fields(name: &'static str, fields: &[(&str, &str)]) -> Self {
        let fields = render(fields);
        info!(event = %format!("{}_BEGIN", name), fields = %fields);

        Self {
            name,
            fields,
            started: Instant::now(),
            completed: false,
        }
    }

    /// Mark the scope as successfully completed
    pub fn complete(self) {
        self.complete_with_fields(&[]);
    }

    /// Mark the scope as successfully completed with additional fields
    pub fn complete_with_fields(mut self, extra_fields: &[(&str, &str)]) {
        self.completed = true;
        info!(
            event = %format!("{}_COMPLETE", self.name),
            fields = %self.fields,
            extra = %render(extra_fields),
            elapsed_ms = self.started.elapsed().as_millis() as u64,
        );
    }

    /// Mark the scope as failed with a reason
    pub fn fail(mut self, reason: &str) {
        self.completed = true;
        error!(
            event = %format!("{}_FAILED", self.name),
            fields = %self.fields,
            reason,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
        );
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }
}

impl Drop for ObservationScope {
    fn drop(&mut self) {
        if !self.completed {
            warn!(
                event = %format!("{}_INCOMPLETE", self.name),
                fields = %self.fields,
                reason = "scope dropped without completion",
            );
        }
    }
}
