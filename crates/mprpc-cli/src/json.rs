//! JSON <-> MessagePack value conversion for the `call` subcommand.
//!
//! MessagePack is a superset of JSON, so the way back is lossy: binary
//! becomes an array of byte values, map keys are stringified and ext values
//! become `{"ext": type, "data": [bytes]}`.

use anyhow::{Context, Result};
use rmpv::Value;
use serde_json::{json, Number, Value as Json};

/// Parses each command-line argument as one JSON positional param.
pub fn parse_params(args: &[String]) -> Result<Vec<Value>> {
    args.iter()
        .map(|arg| {
            let json: Json = serde_json::from_str(arg)
                .with_context(|| format!("Invalid JSON argument '{}'", arg))?;
            Ok(to_msgpack(&json))
        })
        .collect()
}

/// Converts a JSON value to MessagePack.
///
/// Integers keep their sign and width; numbers that fit neither `u64` nor
/// `i64` become floats. Object keys become string keys.
pub fn to_msgpack(json: &Json) -> Value {
    match json {
        Json::Null => Value::Nil,
        Json::Bool(b) => Value::Boolean(*b),
        Json::Number(n) => {
            if let Some(u) = n.as_u64() {
                Value::from(u)
            } else if let Some(i) = n.as_i64() {
                Value::from(i)
            } else {
                n.as_f64().map(Value::from).unwrap_or(Value::Nil)
            }
        }
        Json::String(s) => Value::from(s.as_str()),
        Json::Array(items) => Value::Array(items.iter().map(to_msgpack).collect()),
        Json::Object(map) => Value::Map(
            map.iter()
                .map(|(k, v)| (Value::from(k.as_str()), to_msgpack(v)))
                .collect(),
        ),
    }
}

/// Converts a MessagePack value to JSON for printing.
///
/// Lossy where JSON has no counterpart: binary becomes an array of byte
/// values, invalid UTF-8 is replaced, non-finite floats become `null`.
pub fn to_json(value: &Value) -> Json {
    match value {
        Value::Nil => Json::Null,
        Value::Boolean(b) => Json::Bool(*b),
        Value::Integer(n) => n
            .as_u64()
            .map(Json::from)
            .or_else(|| n.as_i64().map(Json::from))
            .unwrap_or(Json::Null),
        Value::F32(f) => float(f64::from(*f)),
        Value::F64(f) => float(*f),
        Value::String(s) => match s.as_str() {
            Some(s) => Json::from(s),
            None => Json::from(String::from_utf8_lossy(s.as_bytes()).into_owned()),
        },
        Value::Binary(bytes) => Json::from(bytes.clone()),
        Value::Array(items) => Json::Array(items.iter().map(to_json).collect()),
        Value::Map(entries) => Json::Object(
            entries
                .iter()
                .map(|(k, v)| (key_string(k), to_json(v)))
                .collect(),
        ),
        Value::Ext(kind, data) => json!({ "ext": kind, "data": data }),
    }
}

// NaN and infinities have no JSON form
fn float(f: f64) -> Json {
    Number::from_f64(f).map(Json::Number).unwrap_or(Json::Null)
}

fn key_string(key: &Value) -> String {
    match key.as_str() {
        Some(s) => s.to_string(),
        None => key.to_string(),
    }
}
