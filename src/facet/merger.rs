//! Cross-partition facet merging
//!
//! Partition tallies are folded in partition id order. The merged tally is
//! then presented either as a final summary (sorted, truncated, with default
//! buckets) or as intermediate buckets for an upstream merger.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Serialize, Serializer};
use serde_json::json;

use super::count::CountResult;
use super::tally::FacetTally;
use crate::engine::PartitionFacets;
use crate::errors::{SearchError, SearchResult};
use crate::model::{EncodedDocument, FacetDefinition, PartitionId, TypedValue};

fn serialize_value<S: Serializer>(value: &TypedValue, serializer: S) -> Result<S::Ok, S::Error> {
    value.to_json().serialize(serializer)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FacetBucket {
    #[serde(serialize_with = "serialize_value")]
    pub value: TypedValue,
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FacetResult {
    pub buckets: Vec<FacetBucket>,
}

/// Final, client-facing facet answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FacetSummary {
    pub count: CountResult,
    pub facets: BTreeMap<String, FacetResult>,
}

/// One merged bucket in intermediate form.
#[derive(Debug, Clone, PartialEq)]
pub struct IntermediateBucket {
    pub facet: String,
    pub bucket: TypedValue,
    pub count: u64,
}

impl IntermediateBucket {
    pub fn to_document(&self) -> SearchResult<EncodedDocument> {
        EncodedDocument::from_json(&json!({
            "type": "facet",
            "tag": self.facet,
            "bucket": self.bucket.to_json(),
            "count": self.count,
        }))
    }
}

/// Facet tallies of all partitions, folded.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedFacets {
    tally: FacetTally,
    total_hits: u64,
}

/// Folds partition facet results into one tally.
#[derive(Debug, Default)]
pub struct FacetBucketMerger {
    tally: FacetTally,
    total_hits: u64,
}

impl FacetBucketMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one partition's tallies. Its hit count must be exact.
    pub fn fold(&mut self, partition: PartitionId, facets: PartitionFacets) -> SearchResult<()> {
        if !facets.total_hits.is_exact() {
            return Err(SearchError::ApproximateCount {
                partition,
                value: facets.total_hits.value,
            });
        }
        self.total_hits = self.total_hits.saturating_add(facets.total_hits.value);
        for bucket in facets.buckets {
            self.tally.add(&bucket.facet_name, bucket.bucket, bucket.count);
        }
        Ok(())
    }

    pub fn finish(self) -> MergedFacets {
        MergedFacets {
            tally: self.tally,
            total_hits: self.total_hits,
        }
    }

    /// Fold every partition in partition id order.
    pub fn merge(mut partitions: Vec<(PartitionId, PartitionFacets)>) -> SearchResult<MergedFacets> {
        partitions.sort_by_key(|(id, _)| *id);
        let mut merger = Self::new();
        for (id, facets) in partitions {
            merger.fold(id, facets)?;
        }
        Ok(merger.finish())
    }
}

impl MergedFacets {
    pub fn tally(&self) -> &FacetTally {
        &self.tally
    }

    pub fn total_hits(&self) -> u64 {
        self.total_hits
    }

    fn check_definitions(&self, definitions: &BTreeMap<String, FacetDefinition>) -> SearchResult<()> {
        match self.tally.facets().find(|row| !definitions.contains_key(row.name())) {
            Some(row) => Err(SearchError::FacetDefinitionMismatch(row.name().to_string())),
            None => Ok(()),
        }
    }

    /// Declared boundary buckets in order, then the default bucket.
    fn boundary_buckets(&self, name: &str, definition: &FacetDefinition) -> Vec<FacetBucket> {
        let bounds = definition.bucket_bounds();
        let declared = bounds.len().saturating_sub(1);
        let mut buckets: Vec<FacetBucket> = bounds
            .into_iter()
            .take(declared)
            .map(|value| FacetBucket {
                count: self.tally.count(name, &value),
                value,
            })
            .collect();

        if let Some(default) = definition.default_bucket() {
            let declared_sum: u64 = buckets.iter().map(|b| b.count).sum();
            buckets.push(FacetBucket {
                value: TypedValue::String(default.to_string()),
                count: self.total_hits.saturating_sub(declared_sum),
            });
        }
        buckets
    }

    fn string_buckets(&self, name: &str) -> Vec<FacetBucket> {
        self.tally
            .facet(name)
            .map(|row| {
                row.buckets()
                    .iter()
                    .map(|(value, count)| FacetBucket {
                        value: value.clone(),
                        count: *count,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Client-facing summary: every defined facet appears.
    ///
    /// String buckets sort by count descending then value ascending and are
    /// cut to `num_buckets`.
    pub fn final_summary(
        &self,
        definitions: &BTreeMap<String, FacetDefinition>,
        count: CountResult,
    ) -> SearchResult<FacetSummary> {
        self.check_definitions(definitions)?;

        let mut facets = BTreeMap::new();
        for (name, definition) in definitions {
            let buckets = match definition {
                FacetDefinition::String { num_buckets, .. } => {
                    let mut buckets = self.string_buckets(name);
                    buckets.sort_by(|a, b| match b.count.cmp(&a.count) {
                        Ordering::Equal => a.value.cmp(&b.value),
                        other => other,
                    });
                    buckets.truncate(*num_buckets);
                    buckets
                }
                _ => self.boundary_buckets(name, definition),
            };
            facets.insert(name.clone(), FacetResult { buckets });
        }

        Ok(FacetSummary { count, facets })
    }

    /// Buckets for an upstream merger: string buckets by value ascending,
    /// nothing truncated.
    pub fn intermediate_buckets(
        &self,
        definitions: &BTreeMap<String, FacetDefinition>,
    ) -> SearchResult<Vec<IntermediateBucket>> {
        self.check_definitions(definitions)?;

        let mut out = Vec::new();
        for (name, definition) in definitions {
            let mut buckets = match definition {
                FacetDefinition::String { .. } => self.string_buckets(name),
                _ => self.boundary_buckets(name, definition),
            };
            if !definition.is_boundary() {
                buckets.sort_by(|a, b| a.value.cmp(&b.value));
            }
            out.extend(buckets.into_iter().map(|b| IntermediateBucket {
                facet: name.clone(),
                bucket: b.value,
                count: b.count,
            }));
        }
        Ok(out)
    }
}
