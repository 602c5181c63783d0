//! `RunLens` Core: schema values, predicate trees, query messages, and the
//! paginated navigator state machine.

pub mod messages;
pub mod navigator;
pub mod predicate;
pub mod sort;
pub mod traits;
pub mod value;

pub use messages::{PageCursor, PageResult, QueryRequest, RecordEnvelope};
pub use navigator::{Effect, NavigatorState, Page, DEFAULT_PAGE_SIZE};
pub use predicate::{
    merge_where, Bindable, CompareOp, Comparison, EditError, NodePath, Params, Predicate,
    PredicateError, UnknownPredicate, WherePredicate,
};
pub use sort::{SortDirection, SortKey, SortSpec};
pub use traits::RecordStore;
pub use value::{SchemaValue, ValueKind};
