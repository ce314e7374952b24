use std::{
    collections::BTreeMap,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

/// Field map of a document-store document.
pub type DocumentData = BTreeMap<String, TaggedValue>;

/// Transport-neutral value exchanged between the coordinators and the caller.
///
/// Values are built once at the codec boundary and never mutated in place;
/// downstream code matches on the variant instead of re-inspecting the
/// backend's native representation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TaggedValue {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Double(f64),
    String(String),
    List(Vec<TaggedValue>),
    Map(BTreeMap<String, TaggedValue>),
    /// Raw bytes; base64 on the document-store wire.
    Blob(Vec<u8>),
    GeoPoint(GeoPoint),
    Timestamp(Timestamp),
    /// Document reference path, for example `users/alice`.
    Reference(String),
    /// The document-id field path sentinel.
    DocumentId,
    /// Write-time field operation resolved by the document store.
    FieldOp(FieldOperation),
}

/// Latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// Seconds + nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanoseconds: i32,
}

impl Timestamp {
    pub fn new(seconds: i64, nanoseconds: i32) -> Self {
        Self {
            seconds,
            nanoseconds,
        }
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            seconds: i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX),
            nanoseconds: elapsed.subsec_nanos() as i32,
        }
    }
}

/// Sentinel field operations accepted in document-store writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "operand", rename_all = "snake_case")]
pub enum FieldOperation {
    Delete,
    ServerTimestamp,
    Increment(f64),
    ArrayUnion(Vec<TaggedValue>),
    ArrayRemove(Vec<TaggedValue>),
}

impl TaggedValue {
    /// Short, stable name of the variant, used in log fields.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Integer(_) => "integer",
            Self::Double(_) => "double",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Blob(_) => "blob",
            Self::GeoPoint(_) => "geopoint",
            Self::Timestamp(_) => "timestamp",
            Self::Reference(_) => "reference",
            Self::DocumentId => "document_id",
            Self::FieldOp(_) => "field_op",
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, TaggedValue>> {
        match self {
            Self::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Build a map value from key/value pairs.
    pub fn map<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, TaggedValue)>,
        K: Into<String>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(key, value)| (key.into(), value))
                .collect(),
        )
    }
}

impl From<bool> for TaggedValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for TaggedValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for TaggedValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<&str> for TaggedValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for TaggedValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

/// Plain JSON maps onto the structural subset: integral numbers become
/// `Integer`, other numbers `Double`, arrays `List`, objects `Map`.
impl From<serde_json::Value> for TaggedValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => Self::Null,
            Value::Bool(flag) => Self::Bool(flag),
            Value::Number(number) => match number.as_i64() {
                Some(integer) => Self::Integer(integer),
                None => Self::Double(number.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(text) => Self::String(text),
            Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Value::Object(entries) => Self::Map(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, Self::from(value)))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn converts_plain_json_structurally() {
        let value = TaggedValue::from(json!({"a": 1, "b": [true, 2.5, "x"], "c": null}));

        let expected = TaggedValue::map([
            ("a", TaggedValue::Integer(1)),
            (
                "b",
                TaggedValue::List(vec![
                    TaggedValue::Bool(true),
                    TaggedValue::Double(2.5),
                    TaggedValue::from("x"),
                ]),
            ),
            ("c", TaggedValue::Null),
        ]);
        assert_eq!(value, expected);
    }

    #[test]
    fn serializes_with_adjacent_type_tag() {
        let encoded = serde_json::to_value(TaggedValue::Integer(7)).expect("serialize");
        assert_eq!(encoded, json!({"type": "integer", "value": 7}));

        let raw = json!({"type": "field_op", "value": {"op": "increment", "operand": 2.0}});
        let decoded: TaggedValue = serde_json::from_value(raw).expect("deserialize");
        assert_eq!(decoded, TaggedValue::FieldOp(FieldOperation::Increment(2.0)));
    }

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(TaggedValue::Null.kind_name(), "null");
        assert_eq!(TaggedValue::Blob(vec![1]).kind_name(), "blob");
        assert_eq!(TaggedValue::DocumentId.kind_name(), "document_id");
    }
}
