//! `serde_json::Value` bridging.
//!
//! The wire model is richer than JSON, so the conversion to JSON is lossy
//! by design: binary data becomes a base64 data URI, arbitrary-precision
//! integers become decimal strings, and date/duration/uri values surface as
//! their natural JSON shapes.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Value as JsonValue};

use crate::value::{TypedKind, Value};

impl From<JsonValue> for Value<'static> {
    fn from(v: JsonValue) -> Self {
        match v {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::UInt(u)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            JsonValue::String(s) => Value::text(s),
            JsonValue::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            JsonValue::Object(entries) => Value::StrMap(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.into(), Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl Value<'_> {
    /// Converts the tree into JSON.
    ///
    /// Non-finite floats become null, since JSON has no rendering for them.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int(i) => json!(i),
            Value::UInt(u) => json!(u),
            Value::BigInt(b) => JsonValue::String(b.to_string()),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::Bytes(b) => JsonValue::String(format!(
                "data:application/octet-stream;base64,{}",
                STANDARD.encode(b)
            )),
            Value::Text(t) => JsonValue::String(t.to_string()),
            Value::List(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
            Value::StrMap(entries) => JsonValue::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_json()))
                    .collect(),
            ),
            Value::Map(entries) => JsonValue::Object(
                entries
                    .iter()
                    .map(|(k, v)| (json_key(k), v.to_json()))
                    .collect(),
            ),
            Value::Set(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
            Value::DateTime(dt) => json!({
                "epoch_micros": dt.epoch_micros,
                "utc": dt.utc,
            }),
            Value::Duration(micros) => json!(micros),
            Value::Uri(u) => JsonValue::String(u.to_string()),
            Value::TypedArray(arr) => typed_array_to_json(arr),
            Value::BoolBitList(bits) => JsonValue::Array(bits.iter().map(JsonValue::Bool).collect()),
            Value::Ext(e) => JsonValue::String(format!(
                "data:application/octet-stream;base64,{}",
                STANDARD.encode(&e.data)
            )),
        }
    }
}

fn json_key(key: &Value<'_>) -> String {
    match key {
        Value::Text(t) => t.to_string(),
        other => other.to_json().to_string(),
    }
}

fn typed_array_to_json(arr: &crate::value::TypedArray<'_>) -> JsonValue {
    match arr.kind() {
        TypedKind::I8 => json!(arr.to_i8_vec()),
        TypedKind::U16 => json!(arr.to_u16_vec()),
        TypedKind::I16 => json!(arr.to_i16_vec()),
        TypedKind::U32 => json!(arr.to_u32_vec()),
        TypedKind::I32 => json!(arr.to_i32_vec()),
        TypedKind::U64 => json!(arr.to_u64_vec()),
        TypedKind::I64 => json!(arr.to_i64_vec()),
        TypedKind::F32 => json!(arr.to_f32_vec()),
        TypedKind::F64 => json!(arr.to_f64_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_to_value_and_back() {
        let source = json!({
            "name": "x",
            "count": 3,
            "items": [1, 2.5, null, true],
        });
        let value = Value::from(source.clone());
        assert_eq!(value.to_json(), source);
    }

    #[test]
    fn json_objects_become_str_maps() {
        let value = Value::from(json!({"a": 1}));
        match value {
            Value::StrMap(entries) => assert_eq!(entries[0].0, "a"),
            other => panic!("expected str map, got {other:?}"),
        }
    }

    #[test]
    fn bytes_render_as_data_uri() {
        let rendered = Value::bytes(vec![0xde, 0xad]).to_json();
        assert_eq!(
            rendered,
            JsonValue::String("data:application/octet-stream;base64,3q0=".to_string())
        );
    }

    #[test]
    fn nan_renders_as_null() {
        assert_eq!(Value::Float(f64::NAN).to_json(), JsonValue::Null);
    }

    #[test]
    fn typed_arrays_render_as_number_arrays() {
        let arr = crate::value::TypedArray::from_i32s(&[-1, 2]);
        assert_eq!(Value::TypedArray(arr).to_json(), json!([-1, 2]));
    }
}
