//! Parameter codecs: request bodies to [`Document`]s and results back to bytes.
//!
//! [`ExtendedJsonCodec`] speaks relaxed extended JSON, so identifiers, dates
//! and binary survive a trip through a plain-text bus payload:
//!
//! | Value            | JSON form                                          |
//! |------------------|----------------------------------------------------|
//! | `ObjectId`       | `{"$oid": "<24 hex>"}`                             |
//! | `DateTime`       | `{"$date": "<RFC 3339>"}` (or `{"$numberLong"}`)   |
//! | `Bytes`          | `{"$binary": {"base64": "...", "subType": "00"}}`  |
//! | non-finite float | `{"$numberDouble": "NaN" / "Infinity" / ...}`      |
//!
//! [`MsgPackCodec`] encodes the same value model with `rmp-serde`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{Map, Number};

use crate::types::{DateTime, Document, ObjectId, Value};

/// Errors from decoding or encoding a payload.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("payload is empty")]
    Empty,
    #[error("payload is not a document (found {found})")]
    NotADocument { found: &'static str },
    #[error("malformed extended JSON {key}: {reason}")]
    InvalidExtended { key: &'static str, reason: String },
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("msgpack decode: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),
    #[error("msgpack encode: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),
}

/// Converts bus payload bytes into named parameters and results into bytes.
pub trait ParameterCodec: Send + Sync {
    /// Short identifier used in logs and configuration.
    fn name(&self) -> &'static str;

    /// Decode a request body into a parameter document.
    ///
    /// # Errors
    ///
    /// Returns `CodecError` if the bytes are empty, malformed, or not a document.
    fn decode(&self, bytes: &[u8]) -> Result<Document, CodecError>;

    /// Encode a shaped result for publishing.
    ///
    /// # Errors
    ///
    /// Returns `CodecError` if the value cannot be represented in this format.
    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError>;
}

// ---------------------------------------------------------------------------
// ExtendedJsonCodec
// ---------------------------------------------------------------------------

/// Relaxed extended JSON codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtendedJsonCodec;

impl ParameterCodec for ExtendedJsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn decode(&self, bytes: &[u8]) -> Result<Document, CodecError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(CodecError::Empty);
        }
        let json: serde_json::Value = serde_json::from_slice(bytes)?;
        match from_json(json)? {
            Value::Document(doc) => Ok(doc),
            other => Err(CodecError::NotADocument {
                found: other.type_name(),
            }),
        }
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(&to_json(value))?)
    }
}

/// Rehydrates a parsed JSON tree, folding extended-JSON wrappers into typed values.
///
/// # Errors
///
/// Returns `CodecError::InvalidExtended` when a `$`-wrapper is recognised but malformed.
pub fn from_json(json: serde_json::Value) -> Result<Value, CodecError> {
    Ok(match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => number_to_value(&n),
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(from_json)
                .collect::<Result<_, _>>()?,
        ),
        serde_json::Value::Object(map) => {
            if map.len() == 1 {
                if let Some(value) = from_extended(&map)? {
                    return Ok(value);
                }
            }
            Value::Document(
                map.into_iter()
                    .map(|(k, v)| Ok((k, from_json(v)?)))
                    .collect::<Result<_, CodecError>>()?,
            )
        }
    })
}

fn number_to_value(n: &Number) -> Value {
    if let Some(i) = n.as_i64() {
        Value::Int(i)
    } else {
        Value::Float(n.as_f64().unwrap_or(f64::NAN))
    }
}

fn invalid(key: &'static str, reason: impl Into<String>) -> CodecError {
    CodecError::InvalidExtended {
        key,
        reason: reason.into(),
    }
}

/// Interprets a single-key object as an extended-JSON scalar, if it is one.
fn from_extended(map: &Map<String, serde_json::Value>) -> Result<Option<Value>, CodecError> {
    let Some((key, inner)) = map.iter().next() else {
        return Ok(None);
    };

    let value = match key.as_str() {
        "$oid" => {
            let hex = inner.as_str().ok_or_else(|| invalid("$oid", "expected a string"))?;
            let id: ObjectId = hex.parse().map_err(|e| invalid("$oid", format!("{e}")))?;
            Value::ObjectId(id)
        }
        "$date" => Value::DateTime(parse_date(inner)?),
        "$numberLong" => Value::Int(parse_number_string("$numberLong", inner)?),
        "$numberInt" => Value::Int(parse_number_string("$numberInt", inner)?),
        "$numberDouble" => {
            let s = inner
                .as_str()
                .ok_or_else(|| invalid("$numberDouble", "expected a string"))?;
            let f = match s {
                "Infinity" => f64::INFINITY,
                "-Infinity" => f64::NEG_INFINITY,
                "NaN" => f64::NAN,
                other => other
                    .parse()
                    .map_err(|_| invalid("$numberDouble", format!("not a number: {other}")))?,
            };
            Value::Float(f)
        }
        "$binary" => {
            let encoded = inner
                .get("base64")
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| invalid("$binary", "missing base64 field"))?;
            let bytes = BASE64
                .decode(encoded)
                .map_err(|e| invalid("$binary", e.to_string()))?;
            Value::Bytes(bytes)
        }
        _ => return Ok(None),
    };
    Ok(Some(value))
}

fn parse_number_string(key: &'static str, inner: &serde_json::Value) -> Result<i64, CodecError> {
    let s = inner.as_str().ok_or_else(|| invalid(key, "expected a string"))?;
    s.parse().map_err(|_| invalid(key, format!("not an integer: {s}")))
}

fn parse_date(inner: &serde_json::Value) -> Result<DateTime, CodecError> {
    match inner {
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(DateTime::from_millis)
            .ok_or_else(|| invalid("$date", "millis must be an integer")),
        serde_json::Value::String(s) => {
            DateTime::parse_rfc3339(s).ok_or_else(|| invalid("$date", format!("not RFC 3339: {s}")))
        }
        serde_json::Value::Object(map) => match map.get("$numberLong") {
            Some(long) => parse_number_string("$date", long).map(DateTime::from_millis),
            None => Err(invalid("$date", "expected $numberLong")),
        },
        _ => Err(invalid("$date", "unsupported representation")),
    }
}

/// Renders a value as relaxed extended JSON.
#[must_use]
pub fn to_json(value: &Value) -> serde_json::Value {
    use serde_json::json;

    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Float(f) => Number::from_f64(*f).map_or_else(
            || {
                let text = if f.is_nan() {
                    "NaN"
                } else if f.is_sign_positive() {
                    "Infinity"
                } else {
                    "-Infinity"
                };
                json!({ "$numberDouble": text })
            },
            serde_json::Value::Number,
        ),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(bytes) => json!({
            "$binary": { "base64": BASE64.encode(bytes), "subType": "00" }
        }),
        Value::ObjectId(id) => json!({ "$oid": id.to_hex() }),
        Value::DateTime(dt) => match dt.to_rfc3339() {
            Some(text) => json!({ "$date": text }),
            None => json!({ "$date": { "$numberLong": dt.timestamp_millis().to_string() } }),
        },
        Value::Array(items) => serde_json::Value::Array(items.iter().map(to_json).collect()),
        Value::Document(doc) => serde_json::Value::Object(
            doc.iter().map(|(k, v)| (k.clone(), to_json(v))).collect(),
        ),
    }
}

// ---------------------------------------------------------------------------
// MsgPackCodec
// ---------------------------------------------------------------------------

/// `MsgPack` codec over the native value model (externally tagged variants,
/// so a request body is the encoding of a `Value::Document`).
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackCodec;

impl ParameterCodec for MsgPackCodec {
    fn name(&self) -> &'static str {
        "msgpack"
    }

    fn decode(&self, bytes: &[u8]) -> Result<Document, CodecError> {
        if bytes.is_empty() {
            return Err(CodecError::Empty);
        }
        match rmp_serde::from_slice::<Value>(bytes)? {
            Value::Document(doc) => Ok(doc),
            other => Err(CodecError::NotADocument {
                found: other.type_name(),
            }),
        }
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        Ok(rmp_serde::to_vec_named(value)?)
    }
}
