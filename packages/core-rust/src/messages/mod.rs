//! Wire-compatible message schemas for the record store's query endpoint.
//!
//! All types use camelCase field names and encode identically through named
//! `MsgPack` (`rmp_serde::to_vec_named()`) and JSON.

pub mod query;

pub use query::{PageCursor, PageResult, QueryRequest, RecordEnvelope};
