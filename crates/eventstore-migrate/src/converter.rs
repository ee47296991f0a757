//! Conversion of legacy event content into destination events.
//!
//! Every event goes through the same universal normalization, followed by
//! a caller supplied [`EventModifier`] that may rewrite the content and
//! decides whether the event is kept:
//!
//! - binary sub-type 2 and 3 values are identifiers and become their string form
//! - any other binary value becomes standard base64
//! - every document key is recased to camelCase; two keys of one document
//!   that recase to the same name are a conversion error
//! - dates become RFC 3339 strings

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::artifacts::ArtifactsMap;
use crate::casing::to_camel_case;
use crate::error::{Error, Result};
use crate::guid::Guid;
use crate::legacy::{LegacyEvent, LegacyValue};

/// An event type: artifact id and generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventType {
    /// Artifact id.
    pub id: Guid,
    /// Generation.
    pub generation: u32,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.id, self.generation)
    }
}

/// A legacy event converted to the destination representation.
///
/// Carries no version. The version is assigned when the commit is written.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedEvent {
    /// Event type.
    pub event_type: EventType,
    /// Normalized content.
    pub content: Map<String, Value>,
    /// Readable type name from the artifact catalog.
    pub type_name: Option<String>,
    /// Always `false` for migrated events.
    pub public: bool,
    /// What the event modifier decided.
    pub include: bool,
}

/// Logging handle passed to event modifiers, scoped to the event at hand.
#[derive(Debug, Clone, Copy)]
pub struct Diagnostics {
    event_id: Guid,
    event_type: EventType,
}

impl Diagnostics {
    /// Logs at debug level.
    pub fn debug(&self, message: impl fmt::Display) {
        debug!(event_id = %self.event_id, event_type = %self.event_type, "{}", message);
    }

    /// Logs at info level.
    pub fn info(&self, message: impl fmt::Display) {
        info!(event_id = %self.event_id, event_type = %self.event_type, "{}", message);
    }

    /// Logs at warn level.
    pub fn warn(&self, message: impl fmt::Display) {
        warn!(event_id = %self.event_id, event_type = %self.event_type, "{}", message);
    }

    /// Id of the legacy event being converted.
    #[must_use]
    pub const fn event_id(&self) -> Guid {
        self.event_id
    }
}

/// Hook run on every normalized event.
///
/// Returns whether the event is kept. An error aborts the migration.
pub trait EventModifier: Send + Sync {
    /// Inspects and possibly rewrites `content`.
    ///
    /// # Errors
    ///
    /// Any error is reported as a conversion failure of the event.
    fn modify(
        &self,
        content: &mut Map<String, Value>,
        event_type: &EventType,
        type_name: Option<&str>,
        diagnostics: &Diagnostics,
    ) -> anyhow::Result<bool>;
}

impl<F> EventModifier for F
where
    F: Fn(&mut Map<String, Value>, &EventType, Option<&str>, &Diagnostics) -> anyhow::Result<bool>
        + Send
        + Sync,
{
    fn modify(
        &self,
        content: &mut Map<String, Value>,
        event_type: &EventType,
        type_name: Option<&str>,
        diagnostics: &Diagnostics,
    ) -> anyhow::Result<bool> {
        self(content, event_type, type_name, diagnostics)
    }
}

/// Keeps every event unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IncludeAll;

impl EventModifier for IncludeAll {
    fn modify(
        &self,
        _content: &mut Map<String, Value>,
        _event_type: &EventType,
        _type_name: Option<&str>,
        _diagnostics: &Diagnostics,
    ) -> anyhow::Result<bool> {
        Ok(true)
    }
}

/// Converts legacy events. Holds no mutable state.
#[derive(Clone)]
pub struct EventConverter {
    artifacts: Arc<ArtifactsMap>,
    modifier: Arc<dyn EventModifier>,
}

impl fmt::Debug for EventConverter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventConverter")
            .field("features", &self.artifacts.features().len())
            .finish_non_exhaustive()
    }
}

impl EventConverter {
    /// Creates a converter.
    #[must_use]
    pub fn new(artifacts: Arc<ArtifactsMap>, modifier: Arc<dyn EventModifier>) -> Self {
        Self {
            artifacts,
            modifier,
        }
    }

    /// Converts a sequence of events, keeping only those the modifier
    /// accepts. Order is preserved.
    ///
    /// # Errors
    ///
    /// Fails on the first event that cannot be converted.
    pub fn convert_events(&self, events: &[LegacyEvent]) -> Result<Vec<ConvertedEvent>> {
        let mut converted = Vec::with_capacity(events.len());
        for event in events {
            let event = self.convert_event(event)?;
            if event.include {
                converted.push(event);
            }
        }
        Ok(converted)
    }

    /// Converts one event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conversion`] if the content is not a document, holds
    /// a malformed identifier, or the modifier fails.
    pub fn convert_event(&self, event: &LegacyEvent) -> Result<ConvertedEvent> {
        let event_type = EventType {
            id: event.event_artifact,
            generation: event.generation,
        };

        let conversion_error = |reason: String| Error::Conversion {
            event_id: event.id,
            reason,
        };

        let mut content = match normalize(&event.content).map_err(conversion_error)? {
            Value::Object(map) => map,
            other => {
                return Err(conversion_error(format!(
                    "content must be a document, found {}",
                    json_kind(&other)
                )))
            }
        };

        let type_name = self.artifacts.find_event_type_name(&event_type);
        let diagnostics = Diagnostics {
            event_id: event.id,
            event_type,
        };

        let include = self
            .modifier
            .modify(&mut content, &event_type, type_name, &diagnostics)
            .map_err(|e| conversion_error(format!("event modifier failed: {:#}", e)))?;

        if !include {
            debug!(event_id = %event.id, event_type = %event_type, "Event dropped by modifier");
        }

        Ok(ConvertedEvent {
            event_type,
            content,
            type_name: type_name.map(str::to_string),
            public: false,
            include,
        })
    }
}

/// Universal normalization of a legacy value.
pub(crate) fn normalize(value: &LegacyValue) -> std::result::Result<Value, String> {
    Ok(match value {
        LegacyValue::Null => Value::Null,
        LegacyValue::Bool(b) => Value::Bool(*b),
        LegacyValue::Int32(i) => Value::from(*i),
        LegacyValue::Int64(i) => Value::from(*i),
        LegacyValue::Double(d) => match Number::from_f64(*d) {
            Some(n) => Value::Number(n),
            None => Value::String(non_finite_to_string(*d)),
        },
        LegacyValue::String(s) => Value::String(s.clone()),
        LegacyValue::Binary { subtype: 2 | 3, bytes } => {
            let guid = Guid::from_slice(bytes, false).map_err(|_| {
                format!(
                    "identifier binary must be 16 bytes, found {} bytes",
                    bytes.len()
                )
            })?;
            Value::String(guid.to_string())
        }
        LegacyValue::Binary { bytes, .. } => Value::String(BASE64.encode(bytes)),
        LegacyValue::DateTime(at) => Value::String(at.to_rfc3339_opts(SecondsFormat::Millis, true)),
        LegacyValue::ObjectId(hex) => Value::String(hex.clone()),
        LegacyValue::Decimal128(text) => Value::String(text.clone()),
        LegacyValue::Array(items) => Value::Array(
            items
                .iter()
                .map(normalize)
                .collect::<std::result::Result<_, _>>()?,
        ),
        LegacyValue::Document(fields) => {
            let mut map = Map::with_capacity(fields.len());
            let mut originals: HashMap<String, &str> = HashMap::with_capacity(fields.len());
            for (key, value) in fields {
                let recased = to_camel_case(key);
                if let Some(previous) = originals.insert(recased.clone(), key.as_str()) {
                    return Err(format!(
                        "fields '{}' and '{}' both map to '{}'",
                        previous, key, recased
                    ));
                }
                map.insert(recased, normalize(value)?);
            }
            Value::Object(map)
        }
    })
}

fn non_finite_to_string(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_sign_positive() {
        "Infinity".to_string()
    } else {
        "-Infinity".to_string()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "a document",
    }
}

#[cfg(test)]
#[path = "converter_tests.rs"]
mod tests;
