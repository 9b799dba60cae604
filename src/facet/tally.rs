//! Insertion-ordered facet bucket counts

use std::collections::HashMap;

use crate::model::TypedValue;

/// Buckets of one facet, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FacetRow {
    name: String,
    buckets: Vec<(TypedValue, u64)>,
    positions: HashMap<TypedValue, usize>,
}

impl FacetRow {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn buckets(&self) -> &[(TypedValue, u64)] {
        &self.buckets
    }

    pub fn get(&self, bucket: &TypedValue) -> Option<u64> {
        self.positions.get(bucket).map(|&i| self.buckets[i].1)
    }

    fn add(&mut self, bucket: TypedValue, count: u64) {
        match self.positions.get(&bucket) {
            Some(&i) => self.buckets[i].1 = self.buckets[i].1.saturating_add(count),
            None => {
                self.positions.insert(bucket.clone(), self.buckets.len());
                self.buckets.push((bucket, count));
            }
        }
    }
}

/// Counts per `(facet name, bucket)`, facets and buckets in first-seen order.
///
/// Counts only grow; adding is a commutative sum.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FacetTally {
    rows: Vec<FacetRow>,
    positions: HashMap<String, usize>,
}

impl FacetTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, facet: &str, bucket: TypedValue, count: u64) {
        let index = match self.positions.get(facet) {
            Some(&i) => i,
            None => {
                self.positions.insert(facet.to_string(), self.rows.len());
                self.rows.push(FacetRow::new(facet));
                self.rows.len() - 1
            }
        };
        self.rows[index].add(bucket, count);
    }

    pub fn facet(&self, name: &str) -> Option<&FacetRow> {
        self.positions.get(name).map(|&i| &self.rows[i])
    }

    pub fn facets(&self) -> impl Iterator<Item = &FacetRow> {
        self.rows.iter()
    }

    pub fn count(&self, facet: &str, bucket: &TypedValue) -> u64 {
        self.facet(facet).and_then(|row| row.get(bucket)).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sums_and_keeps_first_seen_order() {
        let mut tally = FacetTally::new();
        tally.add("color", TypedValue::from("red"), 3);
        tally.add("size", TypedValue::from("xl"), 1);
        tally.add("color", TypedValue::from("blue"), 1);
        tally.add("color", TypedValue::from("red"), 2);

        let names: Vec<&str> = tally.facets().map(FacetRow::name).collect();
        assert_eq!(names, vec!["color", "size"]);

        let color = tally.facet("color").unwrap();
        assert_eq!(
            color.buckets(),
            &[(TypedValue::from("red"), 5), (TypedValue::from("blue"), 1)]
        );
        assert_eq!(tally.count("color", &TypedValue::from("green")), 0);
        assert_eq!(tally.count("missing", &TypedValue::from("red")), 0);
    }

    #[test]
    fn test_numeric_buckets_merge_across_signed_zero() {
        let mut tally = FacetTally::new();
        tally.add("price", TypedValue::Number(0.0), 1);
        tally.add("price", TypedValue::Number(-0.0), 4);
        assert_eq!(tally.count("price", &TypedValue::Number(0.0)), 5);
        assert_eq!(tally.facet("price").unwrap().buckets().len(), 1);
    }
}
