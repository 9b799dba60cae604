//! Facet counting across partitions
//!
//! Each partition tallies its own buckets; this module validates facet
//! requests up front, sums tallies, merges hit counts and presents the result
//! either as a final summary or as a pageable intermediate stream.

mod count;
mod merger;
mod pager;
mod tally;

use std::collections::BTreeMap;

pub use count::{merge_counts, CountResult};
pub use merger::{
    FacetBucket, FacetBucketMerger, FacetResult, FacetSummary, IntermediateBucket, MergedFacets,
};
pub use pager::IntermediateFacetPager;
pub use tally::{FacetRow, FacetTally};

use crate::engine::PartitionSource;
use crate::errors::{SearchError, SearchResult};
use crate::model::{FacetDefinition, FieldType};

fn check_boundaries<T: PartialOrd>(name: &str, boundaries: &[T]) -> SearchResult<()> {
    if boundaries.len() < 2 {
        return Err(SearchError::invalid_query(format!(
            "facet '{}' needs at least two boundaries",
            name
        )));
    }
    if boundaries.windows(2).any(|pair| !(pair[0] < pair[1])) {
        return Err(SearchError::invalid_query(format!(
            "facet '{}' boundaries must be strictly increasing",
            name
        )));
    }
    Ok(())
}

/// Reject facet requests the partition's field types cannot answer.
pub fn validate_facets(
    definitions: &BTreeMap<String, FacetDefinition>,
    source: &dyn PartitionSource,
    token_facets_enabled: bool,
) -> SearchResult<()> {
    for (name, definition) in definitions {
        let path = definition.path();
        let field_type = source.field_type(path).ok_or_else(|| {
            SearchError::invalid_query(format!(
                "facet '{}': field '{}' is not indexed for faceting",
                name, path
            ))
        })?;

        let expected = match definition {
            FacetDefinition::String { num_buckets, .. } => {
                if *num_buckets == 0 {
                    return Err(SearchError::invalid_query(format!(
                        "facet '{}': num_buckets must be positive",
                        name
                    )));
                }
                match field_type {
                    FieldType::StringFacet => continue,
                    FieldType::Token if token_facets_enabled => continue,
                    FieldType::Token => {
                        return Err(SearchError::invalid_query(format!(
                            "facet '{}': token faceting not enabled",
                            name
                        )))
                    }
                    _ => "stringFacet",
                }
            }
            FacetDefinition::Number { boundaries, .. } => {
                check_boundaries(name, boundaries)?;
                if field_type == FieldType::Number {
                    continue;
                }
                "number"
            }
            FacetDefinition::Date { boundaries, .. } => {
                check_boundaries(name, boundaries)?;
                if field_type == FieldType::Date {
                    continue;
                }
                "date"
            }
        };

        return Err(SearchError::invalid_query(format!(
            "facet '{}': field '{}' is of type {:?}, expected {}",
            name, path, field_type, expected
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::MemoryPartition;

    fn partition() -> MemoryPartition {
        MemoryPartition::new(0)
            .with_field("color", FieldType::StringFacet)
            .with_field("title", FieldType::Token)
            .with_field("price", FieldType::Number)
    }

    fn single(name: &str, definition: FacetDefinition) -> BTreeMap<String, FacetDefinition> {
        let mut defs = BTreeMap::new();
        defs.insert(name.to_string(), definition);
        defs
    }

    #[test]
    fn test_accepts_matching_types() {
        let mut defs = single("color", FacetDefinition::string("color", 5));
        defs.insert(
            "price".to_string(),
            FacetDefinition::number("price", vec![0.0, 10.0], None),
        );
        assert!(validate_facets(&defs, &partition(), false).is_ok());
    }

    #[test]
    fn test_token_facets_need_flag() {
        let defs = single("title", FacetDefinition::string("title", 5));
        let err = validate_facets(&defs, &partition(), false).unwrap_err();
        assert!(err.to_string().contains("token faceting not enabled"));
        assert!(validate_facets(&defs, &partition(), true).is_ok());
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let defs = single("price", FacetDefinition::string("price", 5));
        let err = validate_facets(&defs, &partition(), false).unwrap_err();
        assert_eq!(err.code(), "SEARCH_INVALID_QUERY");

        let defs = single("color", FacetDefinition::number("color", vec![0.0, 1.0], None));
        assert!(validate_facets(&defs, &partition(), false).is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let defs = single("shape", FacetDefinition::string("shape", 5));
        assert!(validate_facets(&defs, &partition(), false).is_err());
    }

    #[test]
    fn test_bad_boundaries_rejected() {
        for boundaries in [vec![1.0], vec![0.0, 0.0], vec![5.0, 1.0]] {
            let defs = single("price", FacetDefinition::number("price", boundaries, None));
            assert!(validate_facets(&defs, &partition(), false).is_err());
        }
    }

    #[test]
    fn test_zero_buckets_rejected() {
        let defs = single("color", FacetDefinition::string("color", 0));
        assert!(validate_facets(&defs, &partition(), false).is_err());
    }
}
