//! Schema Value Model: the closed set of value kinds carried by records and
//! used as literal operands in predicates.
//!
//! The wire encoding is the "natural" one for self-describing formats:
//! `None` is nil/null, numbers are plain numbers, binary is a byte string,
//! lists are arrays and maps are string-keyed maps. This keeps payloads
//! readable in both named `MsgPack` and JSON.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A schema value: exactly one variant populated at a time.
///
/// Values are immutable once built; edits produce a new value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SchemaValue {
    /// Absent or unknown.
    #[default]
    None,
    /// UTF-8 text.
    String(String),
    /// 64-bit IEEE 754 number. Integers on the wire widen to this.
    Number(f64),
    /// Boolean.
    Bool(bool),
    /// Opaque binary data.
    Binary(Vec<u8>),
    /// Ordered sequence of values.
    List(Vec<SchemaValue>),
    /// String-keyed mapping. Key order carries no meaning.
    Map(BTreeMap<String, SchemaValue>),
}

/// Discriminant of a [`SchemaValue`], used in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    None,
    String,
    Number,
    Bool,
    Binary,
    List,
    Map,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::String => "string",
            Self::Number => "number",
            Self::Bool => "bool",
            Self::Binary => "binary",
            Self::List => "list",
            Self::Map => "map",
        };
        f.write_str(name)
    }
}

impl SchemaValue {
    /// Returns the kind of this value.
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::None => ValueKind::None,
            Self::String(_) => ValueKind::String,
            Self::Number(_) => ValueKind::Number,
            Self::Bool(_) => ValueKind::Bool,
            Self::Binary(_) => ValueKind::Binary,
            Self::List(_) => ValueKind::List,
            Self::Map(_) => ValueKind::Map,
        }
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<String, SchemaValue>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Looks up a dotted path (`"spec.owner.name"`) through nested maps.
    ///
    /// Returns `None` as soon as a segment is missing or a non-map value is
    /// reached before the last segment. An empty path returns `self`.
    #[must_use]
    pub fn get_path(&self, path: &str) -> Option<&SchemaValue> {
        if path.is_empty() {
            return Some(self);
        }
        path.split('.')
            .try_fold(self, |current, segment| current.as_map()?.get(segment))
    }

    /// Orders two values of the same kind.
    ///
    /// Numbers, strings, booleans and binary values are ordered; values of
    /// different kinds, lists, maps and `None` are incomparable. `NaN`
    /// compares as incomparable.
    #[must_use]
    pub fn compare(&self, other: &SchemaValue) -> Option<Ordering> {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.partial_cmp(b),
            (Self::String(a), Self::String(b)) => Some(a.cmp(b)),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Binary(a), Self::Binary(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for SchemaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Binary(bytes) => write!(f, "<{} bytes>", bytes.len()),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Map(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

impl From<&str> for SchemaValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for SchemaValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<f64> for SchemaValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for SchemaValue {
    #[allow(clippy::cast_precision_loss)]
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<bool> for SchemaValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Vec<u8>> for SchemaValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(value)
    }
}

impl<V: Into<SchemaValue>> FromIterator<(String, V)> for SchemaValue {
    fn from_iter<I: IntoIterator<Item = (String, V)>>(iter: I) -> Self {
        Self::Map(iter.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

// ---------------------------------------------------------------------------
// Wire encoding
// ---------------------------------------------------------------------------

impl Serialize for SchemaValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::None => serializer.serialize_none(),
            Self::String(s) => serializer.serialize_str(s),
            Self::Number(n) => serializer.serialize_f64(*n),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Binary(bytes) => serializer.serialize_bytes(bytes),
            Self::List(items) => serializer.collect_seq(items),
            Self::Map(entries) => serializer.collect_map(entries),
        }
    }
}

impl<'de> Deserialize<'de> for SchemaValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(SchemaValueVisitor)
    }
}

struct SchemaValueVisitor;

impl<'de> Visitor<'de> for SchemaValueVisitor {
    type Value = SchemaValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a schema value")
    }

    fn visit_unit<E: de::Error>(self) -> Result<SchemaValue, E> {
        Ok(SchemaValue::None)
    }

    fn visit_none<E: de::Error>(self) -> Result<SchemaValue, E> {
        Ok(SchemaValue::None)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<SchemaValue, D::Error> {
        SchemaValue::deserialize(deserializer)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<SchemaValue, E> {
        Ok(SchemaValue::Bool(v))
    }

    #[allow(clippy::cast_precision_loss)]
    fn visit_i64<E: de::Error>(self, v: i64) -> Result<SchemaValue, E> {
        Ok(SchemaValue::Number(v as f64))
    }

    #[allow(clippy::cast_precision_loss)]
    fn visit_u64<E: de::Error>(self, v: u64) -> Result<SchemaValue, E> {
        Ok(SchemaValue::Number(v as f64))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<SchemaValue, E> {
        Ok(SchemaValue::Number(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<SchemaValue, E> {
        Ok(SchemaValue::String(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<SchemaValue, E> {
        Ok(SchemaValue::String(v))
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<SchemaValue, E> {
        Ok(SchemaValue::Binary(v.to_vec()))
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<SchemaValue, E> {
        Ok(SchemaValue::Binary(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<SchemaValue, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(SchemaValue::List(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<SchemaValue, A::Error> {
        let mut entries = BTreeMap::new();
        while let Some((key, value)) = map.next_entry::<String, SchemaValue>()? {
            entries.insert(key, value);
        }
        Ok(SchemaValue::Map(entries))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_named(val: &SchemaValue) -> SchemaValue {
        let bytes = rmp_serde::to_vec_named(val).expect("serialize");
        rmp_serde::from_slice(&bytes).expect("deserialize")
    }

    fn nested() -> SchemaValue {
        let owner: SchemaValue = [("name".to_string(), "alice")].into_iter().collect();
        let mut spec = BTreeMap::new();
        spec.insert("owner".to_string(), owner);
        spec.insert("retries".to_string(), SchemaValue::Number(3.0));
        SchemaValue::Map(BTreeMap::from([("spec".to_string(), SchemaValue::Map(spec))]))
    }

    #[test]
    fn msgpack_preserves_every_kind() {
        let value = SchemaValue::List(vec![
            SchemaValue::None,
            SchemaValue::from("text"),
            SchemaValue::Number(1.5),
            SchemaValue::Bool(true),
            SchemaValue::Binary(vec![0xDE, 0xAD]),
            nested(),
        ]);
        assert_eq!(roundtrip_named(&value), value);
    }

    #[test]
    fn integers_widen_to_number() {
        let bytes = rmp_serde::to_vec_named(&42u32).unwrap();
        let value: SchemaValue = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(value, SchemaValue::Number(42.0));

        let value: SchemaValue = serde_json::from_str("-7").unwrap();
        assert_eq!(value, SchemaValue::Number(-7.0));
    }

    #[test]
    fn json_null_is_none() {
        let value: SchemaValue = serde_json::from_str(r#"{"a": null}"#).unwrap();
        assert_eq!(value.get_path("a"), Some(&SchemaValue::None));
        assert_eq!(serde_json::to_string(&SchemaValue::None).unwrap(), "null");
    }

    #[test]
    fn get_path_walks_nested_maps() {
        let value = nested();
        assert_eq!(
            value.get_path("spec.owner.name"),
            Some(&SchemaValue::from("alice"))
        );
        assert_eq!(value.get_path("spec.retries").and_then(SchemaValue::as_f64), Some(3.0));
        assert_eq!(value.get_path("spec.owner.missing"), None);
        assert_eq!(value.get_path("spec.retries.deeper"), None);
        assert_eq!(value.get_path(""), Some(&value));
    }

    #[test]
    fn compare_orders_same_kind_only() {
        assert_eq!(
            SchemaValue::Number(1.0).compare(&SchemaValue::Number(2.0)),
            Some(Ordering::Less)
        );
        assert_eq!(
            SchemaValue::from("b").compare(&SchemaValue::from("a")),
            Some(Ordering::Greater)
        );
        assert_eq!(SchemaValue::from("1").compare(&SchemaValue::Number(1.0)), None);
        assert_eq!(SchemaValue::None.compare(&SchemaValue::None), None);
        assert_eq!(
            SchemaValue::Number(f64::NAN).compare(&SchemaValue::Number(1.0)),
            None
        );
    }

    #[test]
    fn display_is_readable() {
        let value = SchemaValue::List(vec![SchemaValue::from("a"), SchemaValue::Number(2.0)]);
        assert_eq!(value.to_string(), r#"["a", 2]"#);
        assert_eq!(SchemaValue::Binary(vec![1, 2, 3]).to_string(), "<3 bytes>");
    }
}
