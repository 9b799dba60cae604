//! Merged hit counts

use serde::Serialize;

use crate::engine::TotalHits;

/// Hit count of a query across all partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CountResult {
    /// Every partition counted exactly
    Total(u64),
    /// At least one partition stopped counting early
    LowerBound(u64),
}

impl CountResult {
    pub fn value(&self) -> u64 {
        match self {
            CountResult::Total(n) | CountResult::LowerBound(n) => *n,
        }
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, CountResult::Total(_))
    }
}

/// Sum per-partition hit counts.
pub fn merge_counts<I>(hits: I) -> CountResult
where
    I: IntoIterator<Item = TotalHits>,
{
    let (sum, exact) = hits.into_iter().fold((0u64, true), |(sum, exact), h| {
        (sum.saturating_add(h.value), exact && h.is_exact())
    });
    if exact {
        CountResult::Total(sum)
    } else {
        CountResult::LowerBound(sum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_counts_sum_to_total() {
        let count = merge_counts([TotalHits::exact(3), TotalHits::exact(4)]);
        assert_eq!(count, CountResult::Total(7));
        assert!(count.is_exact());
    }

    #[test]
    fn test_any_lower_bound_makes_lower_bound() {
        let count = merge_counts([TotalHits::exact(3), TotalHits::at_least(1000)]);
        assert_eq!(count, CountResult::LowerBound(1003));
        assert_eq!(count.value(), 1003);
    }

    #[test]
    fn test_no_partitions_is_zero() {
        assert_eq!(merge_counts(Vec::new()), CountResult::Total(0));
    }

    #[test]
    fn test_serialization() {
        let json = serde_json::to_value(CountResult::LowerBound(5)).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "lower_bound", "value": 5 }));
    }
}
