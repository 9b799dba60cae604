//! Core data model: values, records, tokens and query descriptions

mod query;
mod record;
mod token;
mod value;

pub use query::{
    CursorOptions, FacetDefinition, FieldType, IndexId, NullPosition, QueryKind, QuerySpec,
    SortField, SortFieldKind, SortSpec,
};
pub use record::{
    DocumentId, EncodedDocument, EncodedPage, LocalDocId, PartitionId, RankKey, RankedRecord, RecordKey,
    RecordPosition, ResumePoint,
};
pub use token::SequenceToken;
pub use value::TypedValue;
