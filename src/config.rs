//! Service configuration
//!
//! Loaded from a JSON file. Every field is optional and falls back to the
//! default below.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{SearchError, SearchResult};
use crate::model::NullPosition;

/// Configuration file structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// First page size when the client gives no hint (default 100)
    #[serde(default = "default_batch_size")]
    pub default_batch_size: usize,

    /// Upper bound for growing page sizes (default 10000)
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Growth factor between consecutive pages (default 2.0)
    #[serde(default = "default_batch_growth_factor")]
    pub batch_growth_factor: f64,

    /// Page byte budget when the caller gives none (default 16MB)
    #[serde(default = "default_byte_budget")]
    pub default_byte_budget: u64,

    /// Concurrent partition tasks per query (default 4)
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Idle time after which a cursor may be reaped (default 10 minutes)
    #[serde(default = "default_cursor_idle_timeout_ms")]
    pub cursor_idle_timeout_ms: u64,

    /// Allow string facets over token fields (default false)
    #[serde(default)]
    pub token_facets_enabled: bool,

    /// Where nulls sort when a sort field does not say (default lowest)
    #[serde(default)]
    pub null_sort_position: NullPosition,
}

fn default_batch_size() -> usize {
    100
}
fn default_max_batch_size() -> usize {
    10_000
}
fn default_batch_growth_factor() -> f64 {
    2.0
}
fn default_byte_budget() -> u64 {
    16 * 1024 * 1024
}
fn default_parallelism() -> usize {
    4
}
fn default_cursor_idle_timeout_ms() -> u64 {
    600_000
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            default_batch_size: default_batch_size(),
            max_batch_size: default_max_batch_size(),
            batch_growth_factor: default_batch_growth_factor(),
            default_byte_budget: default_byte_budget(),
            parallelism: default_parallelism(),
            cursor_idle_timeout_ms: default_cursor_idle_timeout_ms(),
            token_facets_enabled: false,
            null_sort_position: NullPosition::Lowest,
        }
    }
}

impl ServiceConfig {
    /// Load and validate configuration from file
    pub fn load(path: &Path) -> SearchResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| SearchError::config(format!("failed to read config: {}", e)))?;

        let config: ServiceConfig = serde_json::from_str(&content)
            .map_err(|e| SearchError::config(format!("invalid config JSON: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> SearchResult<()> {
        if self.default_batch_size == 0 {
            return Err(SearchError::config("default_batch_size must be > 0"));
        }
        if self.max_batch_size < self.default_batch_size {
            return Err(SearchError::config(format!(
                "max_batch_size ({}) must be >= default_batch_size ({})",
                self.max_batch_size, self.default_batch_size
            )));
        }
        if !(self.batch_growth_factor >= 1.0) {
            return Err(SearchError::config("batch_growth_factor must be >= 1.0"));
        }
        if self.default_byte_budget == 0 {
            return Err(SearchError::config("default_byte_budget must be > 0"));
        }
        if self.parallelism == 0 {
            return Err(SearchError::config("parallelism must be > 0"));
        }
        if self.cursor_idle_timeout_ms == 0 {
            return Err(SearchError::config("cursor_idle_timeout_ms must be > 0"));
        }
        Ok(())
    }

    pub fn cursor_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.cursor_idle_timeout_ms)
    }
}
