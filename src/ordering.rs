//! Total orderings over ranked records
//!
//! Two orderings exist:
//! - score order: score descending
//! - custom order: the declared sort fields, in declaration order
//!
//! Both fall back to `(partition_id, local_doc_id)` ascending, so no two
//! distinct records ever compare equal.

use std::cmp::Ordering;

use crate::model::{
    NullPosition, RankKey, RankedRecord, RecordKey, SortFieldKind, SortSpec, TypedValue,
};

/// Natural score order: higher score is more relevant, NaN is least relevant.
fn compare_scores_desc(a: f32, b: f32) -> Ordering {
    match b.partial_cmp(&a) {
        Some(ord) => ord,
        None => a.is_nan().cmp(&b.is_nan()),
    }
}

/// Comparator for one declared sort field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldComparator {
    kind: SortFieldKind,
    reverse: bool,
    nulls: NullPosition,
}

impl FieldComparator {
    /// Build a comparator from a declared field.
    ///
    /// Score fields compare in descending order naturally, so their
    /// reversal flag is the negation of the declared one: an ascending score
    /// sort puts the lowest score first.
    pub fn new(kind: SortFieldKind, declared_reverse: bool, nulls: NullPosition) -> Self {
        let reverse = match kind {
            SortFieldKind::Score => !declared_reverse,
            SortFieldKind::Field => declared_reverse,
        };
        Self {
            kind,
            reverse,
            nulls,
        }
    }

    pub fn is_reversed(&self) -> bool {
        self.reverse
    }

    fn compare(&self, a: &RankKey, b: &RankKey, slot: usize) -> Ordering {
        let natural = match self.kind {
            SortFieldKind::Score => compare_scores_desc(a.score, b.score),
            SortFieldKind::Field => self.compare_values(sort_value(a, slot), sort_value(b, slot)),
        };
        if self.reverse {
            natural.reverse()
        } else {
            natural
        }
    }

    fn compare_values(&self, a: &TypedValue, b: &TypedValue) -> Ordering {
        match (a.is_null(), b.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => match self.nulls {
                NullPosition::Lowest => Ordering::Less,
                NullPosition::Highest => Ordering::Greater,
            },
            (false, true) => match self.nulls {
                NullPosition::Lowest => Ordering::Greater,
                NullPosition::Highest => Ordering::Less,
            },
            (false, false) => a.cmp(b),
        }
    }
}

static NULL: TypedValue = TypedValue::Null;

fn sort_value(key: &RankKey, slot: usize) -> &TypedValue {
    key.sort_values
        .as_ref()
        .and_then(|values| values.get(slot))
        .unwrap_or(&NULL)
}

/// The order in which records of one query are delivered.
#[derive(Debug, Clone, PartialEq)]
pub enum RelevanceOrdering {
    Score,
    Custom(Vec<FieldComparator>),
}

impl RelevanceOrdering {
    /// Ordering for a query's sort, using `default_nulls` where a field
    /// does not say where nulls go.
    pub fn for_sort(sort: Option<&SortSpec>, default_nulls: NullPosition) -> Self {
        match sort {
            None => RelevanceOrdering::Score,
            Some(spec) => RelevanceOrdering::Custom(
                spec.fields
                    .iter()
                    .map(|f| FieldComparator::new(f.kind, f.reverse, f.nulls.unwrap_or(default_nulls)))
                    .collect(),
            ),
        }
    }

    pub fn is_sorted(&self) -> bool {
        matches!(self, RelevanceOrdering::Custom(_))
    }

    /// Compare rank keys only, without the position tie-break.
    pub fn compare_rank(&self, a: &RankKey, b: &RankKey) -> Ordering {
        match self {
            RelevanceOrdering::Score => compare_scores_desc(a.score, b.score),
            RelevanceOrdering::Custom(fields) => fields
                .iter()
                .enumerate()
                .map(|(slot, field)| field.compare(a, b, slot))
                .find(|ord| *ord != Ordering::Equal)
                .unwrap_or(Ordering::Equal),
        }
    }

    /// Total comparison of two record keys.
    pub fn compare(&self, a: RecordKey<'_>, b: RecordKey<'_>) -> Ordering {
        self.compare_rank(a.rank_key, b.rank_key)
            .then_with(|| a.position.cmp(&b.position))
    }

    pub fn compare_records(&self, a: &RankedRecord, b: &RankedRecord) -> Ordering {
        self.compare(a.key(), b.key())
    }

    /// Two keys tie when they differ only in position.
    pub fn is_tie(&self, a: &RankKey, b: &RankKey) -> bool {
        self.compare_rank(a, b) == Ordering::Equal
    }
}
