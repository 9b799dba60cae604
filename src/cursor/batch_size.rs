//! Page size advice for successive engine fetches

use crate::config::ServiceConfig;
use crate::model::CursorOptions;

/// Decides how many records to ask a partition for next.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchSizeStrategy {
    /// Always the same size
    Fixed { size: usize },
    /// Starts at `current`, multiplied by `factor` after each advice, capped at `max`
    ExponentiallyIncreasing {
        current: usize,
        factor: f64,
        max: usize,
    },
}

impl BatchSizeStrategy {
    /// Strategy for a cursor. An exact `docs_requested` pins the size;
    /// otherwise pages grow from the client's hint or the configured default.
    pub fn for_options(options: &CursorOptions, config: &ServiceConfig) -> Self {
        if let Some(docs) = options.docs_requested {
            return BatchSizeStrategy::Fixed { size: docs.max(1) };
        }
        let start = options
            .batch_size
            .unwrap_or(config.default_batch_size)
            .clamp(1, config.max_batch_size.max(1));
        BatchSizeStrategy::ExponentiallyIncreasing {
            current: start,
            factor: config.batch_growth_factor,
            max: config.max_batch_size.max(start),
        }
    }

    pub fn fixed(size: usize) -> Self {
        BatchSizeStrategy::Fixed { size: size.max(1) }
    }

    /// Next page size, at least one.
    pub fn advise_next_batch_size(&mut self) -> usize {
        match self {
            BatchSizeStrategy::Fixed { size } => *size,
            BatchSizeStrategy::ExponentiallyIncreasing {
                current,
                factor,
                max,
            } => {
                let advised = (*current).max(1);
                let grown = (advised as f64 * *factor).ceil();
                *current = if grown >= *max as f64 {
                    *max
                } else {
                    grown as usize
                };
                advised
            }
        }
    }
}

/// Clamp an advised page size so that a page of average-sized records fits
/// the byte budget. Never below one.
pub fn clamp_to_budget(advised: usize, byte_budget: u64, avg_record_size: Option<u64>) -> usize {
    match avg_record_size {
        Some(avg) if avg > 0 => {
            let fitting = (byte_budget / avg).max(1);
            advised.min(usize::try_from(fitting).unwrap_or(usize::MAX))
        }
        _ => advised.max(1),
    }
}
