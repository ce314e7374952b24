//! Document-store type-tag wire format.
//!
//! Every value travels as a JSON array whose first element is a [`TypeTag`]
//! code, optionally followed by one payload element. Decoding never needs to
//! guess a type. Anything it cannot read becomes null and is logged.

use base64::{Engine, engine::general_purpose::STANDARD};
use serde_json::{Value, json};
use tracing::warn;

use crate::{
    document::DocumentSnapshot,
    types::{DocumentSnapshotPayload, WireMap},
    value::{DocumentData, FieldOperation, GeoPoint, TaggedValue, Timestamp},
};

/// Leading code of an encoded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    Nan,
    NegativeInfinity,
    PositiveInfinity,
    Null,
    DocumentId,
    BooleanTrue,
    BooleanFalse,
    Double,
    String,
    StringEmpty,
    Array,
    Reference,
    GeoPoint,
    Timestamp,
    Blob,
    FieldValue,
    Object,
    Integer,
    NegativeZero,
    Unknown,
}

impl TypeTag {
    pub fn code(self) -> i64 {
        match self {
            Self::Nan => 0,
            Self::NegativeInfinity => 1,
            Self::PositiveInfinity => 2,
            Self::Null => 3,
            Self::DocumentId => 4,
            Self::BooleanTrue => 5,
            Self::BooleanFalse => 6,
            Self::Double => 7,
            Self::String => 8,
            Self::StringEmpty => 9,
            Self::Array => 10,
            Self::Reference => 11,
            Self::GeoPoint => 12,
            Self::Timestamp => 13,
            Self::Blob => 14,
            Self::FieldValue => 15,
            Self::Object => 16,
            Self::Integer => 17,
            Self::NegativeZero => 18,
            Self::Unknown => -999,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        let tag = match code {
            0 => Self::Nan,
            1 => Self::NegativeInfinity,
            2 => Self::PositiveInfinity,
            3 => Self::Null,
            4 => Self::DocumentId,
            5 => Self::BooleanTrue,
            6 => Self::BooleanFalse,
            7 => Self::Double,
            8 => Self::String,
            9 => Self::StringEmpty,
            10 => Self::Array,
            11 => Self::Reference,
            12 => Self::GeoPoint,
            13 => Self::Timestamp,
            14 => Self::Blob,
            15 => Self::FieldValue,
            16 => Self::Object,
            17 => Self::Integer,
            18 => Self::NegativeZero,
            -999 => Self::Unknown,
            _ => return None,
        };
        Some(tag)
    }
}

fn tagged(tag: TypeTag) -> Value {
    json!([tag.code()])
}

fn tagged_with(tag: TypeTag, payload: Value) -> Value {
    json!([tag.code(), payload])
}

/// Encode one value.
pub fn encode(value: &TaggedValue) -> Value {
    match value {
        TaggedValue::Null => tagged(TypeTag::Null),
        TaggedValue::Bool(true) => tagged(TypeTag::BooleanTrue),
        TaggedValue::Bool(false) => tagged(TypeTag::BooleanFalse),
        // Integers share the double tag so callers never have to tell them apart.
        TaggedValue::Integer(number) => tagged_with(TypeTag::Double, json!(*number as f64)),
        TaggedValue::Double(number) => encode_double(*number),
        TaggedValue::String(text) if text.is_empty() => tagged(TypeTag::StringEmpty),
        TaggedValue::String(text) => tagged_with(TypeTag::String, json!(text)),
        TaggedValue::List(items) => tagged_with(TypeTag::Array, encode_list(items)),
        TaggedValue::Map(entries) => {
            tagged_with(TypeTag::Object, Value::Object(encode_map(entries)))
        }
        TaggedValue::Blob(bytes) => tagged_with(TypeTag::Blob, json!(STANDARD.encode(bytes))),
        TaggedValue::GeoPoint(point) => tagged_with(
            TypeTag::GeoPoint,
            json!([point.latitude, point.longitude]),
        ),
        TaggedValue::Timestamp(stamp) => tagged_with(
            TypeTag::Timestamp,
            json!([stamp.seconds as f64, stamp.nanoseconds]),
        ),
        TaggedValue::Reference(path) => tagged_with(TypeTag::Reference, json!(path)),
        TaggedValue::DocumentId => tagged(TypeTag::DocumentId),
        TaggedValue::FieldOp(operation) => {
            tagged_with(TypeTag::FieldValue, encode_field_operation(operation))
        }
    }
}

/// Encode a document's field map.
pub fn encode_map(data: &DocumentData) -> WireMap {
    data.iter()
        .map(|(key, value)| (key.clone(), encode(value)))
        .collect()
}

/// Encode a native snapshot into its wire payload.
pub fn encode_snapshot(snapshot: &DocumentSnapshot) -> DocumentSnapshotPayload {
    DocumentSnapshotPayload {
        path: snapshot.path.clone(),
        exists: snapshot.exists(),
        metadata: [snapshot.from_cache, snapshot.has_pending_writes],
        data: snapshot.data.as_ref().map(encode_map),
    }
}

fn encode_double(number: f64) -> Value {
    if number.is_nan() {
        tagged(TypeTag::Nan)
    } else if number == f64::INFINITY {
        tagged(TypeTag::PositiveInfinity)
    } else if number == f64::NEG_INFINITY {
        tagged(TypeTag::NegativeInfinity)
    } else {
        tagged_with(TypeTag::Double, json!(number))
    }
}

fn encode_list(items: &[TaggedValue]) -> Value {
    Value::Array(items.iter().map(encode).collect())
}

fn encode_field_operation(operation: &FieldOperation) -> Value {
    match operation {
        FieldOperation::Delete => json!(["delete"]),
        FieldOperation::ServerTimestamp => json!(["timestamp"]),
        FieldOperation::Increment(amount) => json!(["increment", amount]),
        FieldOperation::ArrayUnion(items) => json!(["array_union", encode_list(items)]),
        FieldOperation::ArrayRemove(items) => json!(["array_remove", encode_list(items)]),
    }
}

/// Decode one value. Malformed input decodes to `Null`.
pub fn decode(value: &Value) -> TaggedValue {
    let Some(parts) = value.as_array() else {
        warn!(%value, "typemap value is not an array; decoding as null");
        return TaggedValue::Null;
    };
    let Some(tag) = parts.first().and_then(Value::as_i64).and_then(TypeTag::from_code) else {
        warn!(%value, "typemap value has no known type tag; decoding as null");
        return TaggedValue::Null;
    };

    match decode_tagged(tag, parts.get(1)) {
        Some(decoded) => decoded,
        None => {
            warn!(tag = tag.code(), %value, "malformed typemap payload; decoding as null");
            TaggedValue::Null
        }
    }
}

/// Decode a document's field map.
pub fn decode_map(data: &WireMap) -> DocumentData {
    data.iter()
        .map(|(key, value)| (key.clone(), decode(value)))
        .collect()
}

fn decode_tagged(tag: TypeTag, payload: Option<&Value>) -> Option<TaggedValue> {
    let decoded = match tag {
        TypeTag::Nan => TaggedValue::Double(f64::NAN),
        TypeTag::NegativeInfinity => TaggedValue::Double(f64::NEG_INFINITY),
        TypeTag::PositiveInfinity => TaggedValue::Double(f64::INFINITY),
        TypeTag::Null | TypeTag::Unknown => TaggedValue::Null,
        TypeTag::DocumentId => TaggedValue::DocumentId,
        TypeTag::BooleanTrue => TaggedValue::Bool(true),
        TypeTag::BooleanFalse => TaggedValue::Bool(false),
        TypeTag::NegativeZero => TaggedValue::Double(-0.0),
        TypeTag::Integer => TaggedValue::Integer(payload?.as_f64()? as i64),
        TypeTag::Double => TaggedValue::Double(payload?.as_f64()?),
        TypeTag::String => TaggedValue::String(payload?.as_str()?.to_owned()),
        TypeTag::StringEmpty => TaggedValue::String(String::new()),
        TypeTag::Array => TaggedValue::List(decode_list(payload?)?),
        TypeTag::Reference => TaggedValue::Reference(payload?.as_str()?.to_owned()),
        TypeTag::GeoPoint => {
            let pair = payload?.as_array()?;
            TaggedValue::GeoPoint(GeoPoint {
                latitude: pair.first()?.as_f64()?,
                longitude: pair.get(1)?.as_f64()?,
            })
        }
        TypeTag::Timestamp => {
            let pair = payload?.as_array()?;
            let seconds = pair.first()?.as_f64()? as i64;
            let nanoseconds = i32::try_from(pair.get(1)?.as_i64()?).ok()?;
            TaggedValue::Timestamp(Timestamp::new(seconds, nanoseconds))
        }
        TypeTag::Blob => TaggedValue::Blob(STANDARD.decode(payload?.as_str()?).ok()?),
        TypeTag::FieldValue => decode_field_operation(payload?)?,
        TypeTag::Object => TaggedValue::Map(decode_map(payload?.as_object()?)),
    };
    Some(decoded)
}

fn decode_list(payload: &Value) -> Option<Vec<TaggedValue>> {
    Some(payload.as_array()?.iter().map(decode).collect())
}

fn decode_field_operation(payload: &Value) -> Option<TaggedValue> {
    let parts = payload.as_array()?;
    let name = parts.first()?.as_str()?;

    let operation = match name {
        "delete" => FieldOperation::Delete,
        "timestamp" => FieldOperation::ServerTimestamp,
        "increment" => FieldOperation::Increment(parts.get(1)?.as_f64()?),
        "array_union" => FieldOperation::ArrayUnion(decode_list(parts.get(1)?)?),
        "array_remove" => FieldOperation::ArrayRemove(decode_list(parts.get(1)?)?),
        other => {
            warn!(name = other, "unknown field value sentinel; decoding as null");
            return Some(TaggedValue::Null);
        }
    };
    Some(TaggedValue::FieldOp(operation))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn special_doubles_get_their_own_tags() {
        assert_eq!(encode(&TaggedValue::Double(f64::NAN)), json!([0]));
        assert_eq!(encode(&TaggedValue::Double(f64::NEG_INFINITY)), json!([1]));
        assert_eq!(encode(&TaggedValue::Double(f64::INFINITY)), json!([2]));
        assert_eq!(encode(&TaggedValue::Double(1.5)), json!([7, 1.5]));

        match decode(&json!([0])) {
            TaggedValue::Double(number) => assert!(number.is_nan()),
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn integers_use_the_double_tag() {
        assert_eq!(encode(&TaggedValue::Integer(42)), json!([7, 42.0]));
        assert_eq!(decode(&json!([17, 42.0])), TaggedValue::Integer(42));
        match decode(&json!([18])) {
            TaggedValue::Double(number) => {
                assert_eq!(number, 0.0);
                assert!(number.is_sign_negative());
            }
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn strings_distinguish_empty() {
        assert_eq!(encode(&TaggedValue::from("")), json!([9]));
        assert_eq!(encode(&TaggedValue::from("hi")), json!([8, "hi"]));
        assert_eq!(decode(&json!([9])), TaggedValue::from(""));
    }

    #[test]
    fn backend_leaf_kinds_round_trip() {
        let value = TaggedValue::map([
            ("blob", TaggedValue::Blob(vec![0, 159, 146, 150])),
            (
                "where",
                TaggedValue::GeoPoint(GeoPoint {
                    latitude: 51.5,
                    longitude: -0.12,
                }),
            ),
            ("when", TaggedValue::Timestamp(Timestamp::new(1_700_000_000, 123))),
            ("ref", TaggedValue::Reference("users/alice".into())),
            ("id", TaggedValue::DocumentId),
            (
                "list",
                TaggedValue::List(vec![TaggedValue::Bool(true), TaggedValue::Null]),
            ),
        ]);

        let encoded = encode(&value);
        assert_eq!(encoded[0], json!(16));
        assert_eq!(encoded[1]["blob"], json!([14, "AJ+Slg=="]));
        assert_eq!(decode(&encoded), value);
    }

    #[test]
    fn field_operations_carry_payloads() {
        let increment = TaggedValue::FieldOp(FieldOperation::Increment(2.0));
        assert_eq!(encode(&increment), json!([15, ["increment", 2.0]]));
        assert_eq!(decode(&json!([15, ["increment", 2.0]])), increment);

        let union = decode(&json!([15, ["array_union", [[8, "a"], [7, 1.0]]]]));
        assert_eq!(
            union,
            TaggedValue::FieldOp(FieldOperation::ArrayUnion(vec![
                TaggedValue::from("a"),
                TaggedValue::Double(1.0),
            ]))
        );

        assert_eq!(
            decode(&json!([15, ["timestamp"]])),
            TaggedValue::FieldOp(FieldOperation::ServerTimestamp)
        );
        assert_eq!(
            decode(&json!([15, ["delete"]])),
            TaggedValue::FieldOp(FieldOperation::Delete)
        );
    }

    #[test]
    fn unknown_or_malformed_input_decodes_to_null() {
        assert_eq!(decode(&json!([15, ["shuffle"]])), TaggedValue::Null);
        assert_eq!(decode(&json!([-999])), TaggedValue::Null);
        assert_eq!(decode(&json!([42, "x"])), TaggedValue::Null);
        assert_eq!(decode(&json!({"not": "an array"})), TaggedValue::Null);
        assert_eq!(decode(&json!([8])), TaggedValue::Null);
        assert_eq!(decode(&json!([14, "***"])), TaggedValue::Null);
    }

    #[test]
    fn snapshot_payload_carries_metadata() {
        let mut data = DocumentData::new();
        data.insert("count".into(), TaggedValue::Integer(3));
        let snapshot = DocumentSnapshot {
            has_pending_writes: true,
            ..DocumentSnapshot::found("counters/a", data)
        };

        let payload = encode_snapshot(&snapshot);
        assert!(payload.exists);
        assert_eq!(payload.metadata, [false, true]);
        assert_eq!(
            payload.data.expect("data should be present")["count"],
            json!([7, 3.0])
        );

        let missing = encode_snapshot(&DocumentSnapshot::missing("counters/b"));
        assert!(!missing.exists);
        assert!(missing.data.is_none());
    }
}
