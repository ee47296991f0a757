//! Typed decoding of MongoDB Extended JSON.
//!
//! The legacy store hands out documents as Extended JSON (canonical or relaxed
//! mode). They are decoded into [`LegacyValue`] once, at the store boundary,
//! so that the rest of the pipeline never inspects `$`-prefixed wrappers.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::guid::Guid;

/// BSON binary sub-type used by the legacy store for identifiers.
pub const SUBTYPE_UUID_OLD: u8 = 3;

/// A decoded BSON value.
#[derive(Debug, Clone, PartialEq)]
pub enum LegacyValue {
    /// `null`.
    Null,
    /// Boolean.
    Bool(bool),
    /// 32-bit integer.
    Int32(i32),
    /// 64-bit integer.
    Int64(i64),
    /// Double precision float, possibly non-finite.
    Double(f64),
    /// UTF-8 string.
    String(String),
    /// Binary data with its BSON sub-type.
    Binary {
        /// BSON binary sub-type.
        subtype: u8,
        /// Raw bytes.
        bytes: Vec<u8>,
    },
    /// UTC timestamp with millisecond precision.
    DateTime(DateTime<Utc>),
    /// 24 hex digit object id.
    ObjectId(String),
    /// Decimal128 in its string form.
    Decimal128(String),
    /// Array.
    Array(Vec<LegacyValue>),
    /// Document, in field order.
    Document(Vec<(String, LegacyValue)>),
}

impl LegacyValue {
    /// Decodes an Extended JSON value.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if the value uses an unsupported
    /// or malformed `$`-wrapper.
    pub fn from_extended_json(value: &Value) -> Result<Self, String> {
        match value {
            Value::Null => Ok(Self::Null),
            Value::Bool(b) => Ok(Self::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(i32::try_from(i).map_or(Self::Int64(i), Self::Int32))
                } else {
                    n.as_f64()
                        .map(Self::Double)
                        .ok_or_else(|| format!("number {} is out of range", n))
                }
            }
            Value::String(s) => Ok(Self::String(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(Self::from_extended_json)
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Array),
            Value::Object(map) => match map.keys().next() {
                Some(key) if key.starts_with('$') => decode_wrapper(map),
                _ => map
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), Self::from_extended_json(v)?)))
                    .collect::<Result<Vec<_>, String>>()
                    .map(Self::Document),
            },
        }
    }

    /// Looks up a field of a document.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&LegacyValue> {
        match self {
            Self::Document(fields) => fields.iter().find(|(k, _)| k == field).map(|(_, v)| v),
            _ => None,
        }
    }

    /// The value as a signed integer, if it is one.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int32(i) => Some(i64::from(*i)),
            Self::Int64(i) => Some(*i),
            Self::Double(d) if d.fract() == 0.0 && d.is_finite() => Some(*d as i64),
            _ => None,
        }
    }

    /// Short name of the BSON type, for error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int32(_) => "int",
            Self::Int64(_) => "long",
            Self::Double(_) => "double",
            Self::String(_) => "string",
            Self::Binary { .. } => "binData",
            Self::DateTime(_) => "date",
            Self::ObjectId(_) => "objectId",
            Self::Decimal128(_) => "decimal",
            Self::Array(_) => "array",
            Self::Document(_) => "object",
        }
    }
}

fn decode_wrapper(map: &Map<String, Value>) -> Result<LegacyValue, String> {
    if let Some(binary) = map.get("$binary") {
        return decode_binary(binary, map.get("$type"));
    }

    if map.len() != 1 {
        return Err(format!(
            "unexpected extended JSON wrapper with keys {:?}",
            map.keys().collect::<Vec<_>>()
        ));
    }

    let (key, inner) = map.iter().next().ok_or("empty extended JSON wrapper")?;
    match key.as_str() {
        "$numberInt" => parse_number_string(inner)?
            .parse::<i32>()
            .map(LegacyValue::Int32)
            .map_err(|e| format!("invalid $numberInt: {}", e)),
        "$numberLong" => parse_number_string(inner)?
            .parse::<i64>()
            .map(LegacyValue::Int64)
            .map_err(|e| format!("invalid $numberLong: {}", e)),
        "$numberDouble" => {
            let text = parse_number_string(inner)?;
            let value = match text {
                "Infinity" => f64::INFINITY,
                "-Infinity" => f64::NEG_INFINITY,
                "NaN" => f64::NAN,
                other => other
                    .parse::<f64>()
                    .map_err(|e| format!("invalid $numberDouble: {}", e))?,
            };
            Ok(LegacyValue::Double(value))
        }
        "$numberDecimal" => Ok(LegacyValue::Decimal128(
            parse_number_string(inner)?.to_string(),
        )),
        "$oid" => inner
            .as_str()
            .map(|s| LegacyValue::ObjectId(s.to_string()))
            .ok_or_else(|| "$oid must be a string".to_string()),
        "$date" => decode_date(inner).map(LegacyValue::DateTime),
        "$uuid" => {
            let text = inner.as_str().ok_or("$uuid must be a string")?;
            let uuid = uuid::Uuid::parse_str(text).map_err(|e| format!("invalid $uuid: {}", e))?;
            Ok(LegacyValue::Binary {
                subtype: 4,
                bytes: uuid.as_bytes().to_vec(),
            })
        }
        other => Err(format!("unsupported extended JSON type '{}'", other)),
    }
}

fn parse_number_string(value: &Value) -> Result<&str, String> {
    value
        .as_str()
        .ok_or_else(|| "numeric wrapper must hold a string".to_string())
}

/// Canonical `{"$binary": {"base64", "subType"}}` or legacy
/// `{"$binary": "<base64>", "$type": "<hex>"}`.
fn decode_binary(binary: &Value, legacy_type: Option<&Value>) -> Result<LegacyValue, String> {
    let (encoded, subtype) = match binary {
        Value::Object(inner) => (inner.get("base64"), inner.get("subType")),
        Value::String(_) => (Some(binary), legacy_type),
        _ => (None, None),
    };

    let encoded = encoded
        .and_then(Value::as_str)
        .ok_or("$binary is missing its base64 payload")?;
    let subtype = subtype
        .and_then(Value::as_str)
        .ok_or("$binary is missing its sub-type")?;

    let subtype = u8::from_str_radix(subtype, 16)
        .map_err(|e| format!("invalid binary sub-type '{}': {}", subtype, e))?;
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| format!("invalid base64 in $binary: {}", e))?;

    Ok(LegacyValue::Binary { subtype, bytes })
}

fn decode_date(value: &Value) -> Result<DateTime<Utc>, String> {
    let millis = match value {
        Value::String(text) => {
            return DateTime::parse_from_rfc3339(text)
                .map(|d| d.with_timezone(&Utc))
                .map_err(|e| format!("invalid $date '{}': {}", text, e));
        }
        Value::Number(n) => n.as_i64().ok_or("$date must be an integer")?,
        Value::Object(inner) => inner
            .get("$numberLong")
            .and_then(Value::as_str)
            .ok_or("$date object must hold $numberLong")?
            .parse::<i64>()
            .map_err(|e| format!("invalid $date: {}", e))?,
        _ => return Err("unsupported $date representation".to_string()),
    };

    millis_to_datetime(millis)
}

pub(crate) fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>, String> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| format!("timestamp {} is out of range", millis))
}

/// Encodes an identifier the way the legacy store writes it: binary sub-type
/// 3, legacy byte layout.
#[must_use]
pub fn guid_to_extended_json(guid: &Guid) -> Value {
    serde_json::json!({
        "$binary": {
            "base64": BASE64.encode(guid.to_destination_form(false)),
            "subType": format!("{:02x}", SUBTYPE_UUID_OLD),
        }
    })
}

#[cfg(test)]
#[path = "value_tests.rs"]
mod tests;
