//! Query request and page result messages exchanged with the record store.
//!
//! All structs use `#[serde(rename_all = "camelCase")]`; optional fields are
//! omitted when absent so requests stay minimal on the wire. The same types
//! encode to named `MsgPack` (`rmp_serde::to_vec_named()`) and JSON.

use serde::{Deserialize, Serialize};

use crate::predicate::WherePredicate;
use crate::sort::{SortKey, SortSpec};
use crate::value::SchemaValue;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Opaque pagination token together with the direction to move in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "direction", content = "token", rename_all = "lowercase")]
pub enum PageCursor {
    /// Continue after the position marked by a page's `next` token.
    Forward(String),
    /// Continue before the position marked by a page's `previous` token.
    Backward(String),
}

impl PageCursor {
    #[must_use]
    pub fn token(&self) -> &str {
        match self {
            Self::Forward(token) | Self::Backward(token) => token,
        }
    }
}

/// A query against the record store.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    /// Filter. `where` is a Rust keyword, so we use raw identifier syntax.
    #[serde(rename = "where")]
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub r#where: Option<WherePredicate>,
    /// Sort keys in precedence order.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub sort: Vec<SortKey>,
    /// Maximum number of records to return.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cursor: Option<PageCursor>,
}

impl QueryRequest {
    #[must_use]
    pub fn new(filter: Option<WherePredicate>) -> Self {
        Self {
            r#where: filter,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_sort(mut self, sort: &SortSpec) -> Self {
        self.sort = sort.keys().to_vec();
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn with_cursor(mut self, cursor: Option<PageCursor>) -> Self {
        self.cursor = cursor;
        self
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// One record as returned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordEnvelope {
    /// Stable, store-assigned identity. Used for dedup and selection.
    pub id: String,
    /// Record type tag (e.g. `"execution"`, `"workflow"`).
    #[serde(rename = "type")]
    pub type_tag: String,
    pub version: u64,
    #[serde(default)]
    pub data: SchemaValue,
}

impl RecordEnvelope {
    #[must_use]
    pub fn new(id: impl Into<String>, type_tag: impl Into<String>, data: SchemaValue) -> Self {
        Self {
            id: id.into(),
            type_tag: type_tag.into(),
            version: 1,
            data,
        }
    }

    /// Looks up a dotted path in the record payload.
    #[must_use]
    pub fn field(&self, path: &str) -> Option<&SchemaValue> {
        self.data.get_path(path)
    }
}

/// One page of query results.
///
/// An absent `next`/`previous` token means that edge of the result set has
/// been reached.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult {
    #[serde(default)]
    pub records: Vec<RecordEnvelope>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub next: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub previous: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::{Bindable, CompareOp, Predicate};

    fn roundtrip_named<T>(val: &T) -> T
    where
        T: Serialize + serde::de::DeserializeOwned + std::fmt::Debug,
    {
        let bytes = rmp_serde::to_vec_named(val).expect("serialize");
        rmp_serde::from_slice(&bytes).expect("deserialize")
    }

    fn keys_of(val: &rmpv::Value) -> Vec<&str> {
        val.as_map()
            .expect("should be a map")
            .iter()
            .filter_map(|(k, _)| k.as_str())
            .collect()
    }

    #[test]
    fn query_request_full_roundtrip() {
        let filter = WherePredicate::new(Predicate::compare(
            "owner",
            CompareOp::Eq,
            Bindable::bind("who"),
        ))
        .with_param("who", "alice");
        let request = QueryRequest::new(Some(filter))
            .with_sort(&SortSpec::new().toggle("startedAt"))
            .with_limit(25)
            .with_cursor(Some(PageCursor::Forward("00ff".to_string())));
        assert_eq!(roundtrip_named(&request), request);
    }

    #[test]
    fn minimal_request_serializes_to_empty_map() {
        let bytes = rmp_serde::to_vec_named(&QueryRequest::default()).unwrap();
        let val: rmpv::Value = rmp_serde::from_slice(&bytes).unwrap();
        assert!(keys_of(&val).is_empty());
    }

    #[test]
    fn where_field_serializes_as_where() {
        let request = QueryRequest::new(Some(WherePredicate::default().with_param("x", 1i64)));
        let bytes = rmp_serde::to_vec_named(&request).unwrap();
        let val: rmpv::Value = rmp_serde::from_slice(&bytes).unwrap();
        assert!(keys_of(&val).contains(&"where"));
    }

    #[test]
    fn cursor_is_adjacently_tagged() {
        let json = serde_json::to_value(PageCursor::Backward("abc".to_string())).unwrap();
        assert_eq!(json["direction"], "backward");
        assert_eq!(json["token"], "abc");
    }

    #[test]
    fn record_type_tag_serializes_as_type() {
        let record = RecordEnvelope::new("run-1", "execution", SchemaValue::None);
        let bytes = rmp_serde::to_vec_named(&record).unwrap();
        let val: rmpv::Value = rmp_serde::from_slice(&bytes).unwrap();
        let keys = keys_of(&val);
        assert!(keys.contains(&"type"), "expected 'type', got: {keys:?}");
        assert!(!keys.contains(&"typeTag"));
    }

    #[test]
    fn page_result_from_store_json() {
        let json = r#"{
            "records": [{"id": "r1", "type": "execution", "version": 3, "data": {"status": "done"}}],
            "next": "0a00000000000000"
        }"#;
        let page: PageResult = serde_json::from_str(json).unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].version, 3);
        assert_eq!(page.records[0].field("status"), Some(&SchemaValue::from("done")));
        assert_eq!(page.next.as_deref(), Some("0a00000000000000"));
        assert_eq!(page.previous, None);
    }
}
