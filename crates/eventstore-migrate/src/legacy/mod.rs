//! The legacy commit-oriented event store model.
//!
//! A legacy commit is one document holding every event appended in one
//! atomic write against an event source. Documents are decoded from
//! Extended JSON into [`LegacyCommit`] as soon as they are read.

pub mod value;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::guid::Guid;

pub use value::LegacyValue;

/// A commit read from the legacy store. Immutable once read.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyCommit {
    /// Commit sequence number (`_id`), ascending in commit order.
    pub id: i64,
    /// Correlation id of the commit.
    pub correlation_id: Guid,
    /// Commit id.
    pub commit_id: Guid,
    /// When the commit was written.
    pub timestamp: DateTime<Utc>,
    /// Event source the commit was appended to.
    pub event_source_id: Guid,
    /// Aggregate root type of the event source.
    pub aggregate_root: Guid,
    /// Commit number within the event source.
    pub commit: u64,
    /// Sequence number of the first event.
    pub sequence: u64,
    /// Events, in append order.
    pub events: Vec<LegacyEvent>,
}

/// One event inside a [`LegacyCommit`].
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyEvent {
    /// Event id.
    pub id: Guid,
    /// Correlation id.
    pub correlation_id: Guid,
    /// Event type artifact.
    pub event_artifact: Guid,
    /// Generation of the event type.
    pub generation: u32,
    /// Event source.
    pub event_source_id: Guid,
    /// Aggregate root type.
    pub aggregate_root: Guid,
    /// Commit number.
    pub commit: u64,
    /// Position within the commit.
    pub sequence: u64,
    /// When the event occurred.
    pub occurred: DateTime<Utc>,
    /// Execution context the event was produced in.
    pub original_context: OriginalContext,
    /// Raw content, field names untouched.
    pub content: LegacyValue,
}

/// Execution context snapshot stored with every legacy event.
#[derive(Debug, Clone, PartialEq)]
pub struct OriginalContext {
    /// Application id.
    pub application: Guid,
    /// Bounded context (microservice) id.
    pub bounded_context: Guid,
    /// Tenant id.
    pub tenant: Guid,
    /// Environment name.
    pub environment: String,
    /// Claims of the principal.
    pub claims: Vec<LegacyClaim>,
}

/// A claim stored in an [`OriginalContext`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyClaim {
    /// Claim name.
    pub name: String,
    /// Claim value.
    pub value: String,
    /// Claim value type.
    pub value_type: String,
}

impl LegacyCommit {
    /// Decodes a commit document delivered as Extended JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Deserialization`] naming the document if a field is
    /// missing or has the wrong type.
    pub fn from_document(document: &Value) -> Result<Self> {
        let label = document
            .get("_id")
            .map_or_else(|| "<unknown>".to_string(), |id| id.to_string());

        let decoded = LegacyValue::from_extended_json(document)
            .map_err(|reason| Error::malformed(&label, reason))?;

        Self::from_value(&decoded).map_err(|reason| Error::malformed(label, reason))
    }

    fn from_value(doc: &LegacyValue) -> std::result::Result<Self, String> {
        let events = match field(doc, "events")? {
            LegacyValue::Array(items) => items
                .iter()
                .enumerate()
                .map(|(index, item)| {
                    LegacyEvent::from_value(item).map_err(|reason| format!("events[{}]: {}", index, reason))
                })
                .collect::<std::result::Result<Vec<_>, _>>()?,
            other => return Err(format!("'events' is a {}, expected an array", other.type_name())),
        };

        Ok(Self {
            id: integer(doc, "_id")?,
            correlation_id: guid(doc, "correlation_id")?,
            commit_id: guid(doc, "commit_id")?,
            timestamp: timestamp(doc, "timestamp")?,
            event_source_id: guid(doc, "eventsource_id")?,
            aggregate_root: guid(doc, "event_source_artifact")?,
            commit: unsigned(doc, "commit")?,
            sequence: unsigned(doc, "sequence")?,
            events,
        })
    }

    /// Number of events in the commit.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.events.len()
    }
}

impl LegacyEvent {
    fn from_value(doc: &LegacyValue) -> std::result::Result<Self, String> {
        let generation = unsigned(doc, "generation")?;
        let generation = u32::try_from(generation)
            .map_err(|_| format!("generation {} is out of range", generation))?;

        Ok(Self {
            id: guid(doc, "_id")?,
            correlation_id: guid(doc, "correlation_id")?,
            event_artifact: guid(doc, "event_artifact")?,
            generation,
            event_source_id: guid(doc, "eventsource_id")?,
            aggregate_root: guid(doc, "event_source_artifact")?,
            commit: unsigned(doc, "commit")?,
            sequence: unsigned(doc, "sequence")?,
            occurred: timestamp(doc, "occurred")?,
            original_context: OriginalContext::from_value(field(doc, "original_context")?)
                .map_err(|reason| format!("original_context: {}", reason))?,
            content: field(doc, "event")?.clone(),
        })
    }
}

impl OriginalContext {
    fn from_value(doc: &LegacyValue) -> std::result::Result<Self, String> {
        let claims = match doc.get("claims") {
            None | Some(LegacyValue::Null) => Vec::new(),
            Some(LegacyValue::Array(items)) => items
                .iter()
                .map(LegacyClaim::from_value)
                .collect::<std::result::Result<Vec<_>, _>>()?,
            Some(other) => {
                return Err(format!("'claims' is a {}, expected an array", other.type_name()))
            }
        };

        Ok(Self {
            application: guid(doc, "application")?,
            bounded_context: guid(doc, "bounded_context")?,
            tenant: guid(doc, "tenant")?,
            environment: string(doc, "environment")?,
            claims,
        })
    }
}

impl LegacyClaim {
    fn from_value(doc: &LegacyValue) -> std::result::Result<Self, String> {
        Ok(Self {
            name: string(doc, "name")?,
            value: string(doc, "value")?,
            value_type: optional_string(doc, "value_type")?.unwrap_or_default(),
        })
    }
}

fn field<'a>(doc: &'a LegacyValue, name: &str) -> std::result::Result<&'a LegacyValue, String> {
    match doc {
        LegacyValue::Document(_) => doc
            .get(name)
            .ok_or_else(|| format!("missing field '{}'", name)),
        other => Err(format!("expected a document, found a {}", other.type_name())),
    }
}

/// Identifiers are 16-byte binaries in legacy layout. Sub-type 4 holds the
/// standard layout and is swapped back.
fn guid(doc: &LegacyValue, name: &str) -> std::result::Result<Guid, String> {
    match field(doc, name)? {
        LegacyValue::Binary { subtype, bytes } => Guid::from_slice(bytes, *subtype == 4)
            .map_err(|e| format!("'{}': {}", name, e)),
        LegacyValue::String(text) => text.parse().map_err(|e| format!("'{}': {}", name, e)),
        other => Err(format!("'{}' is a {}, expected an identifier", name, other.type_name())),
    }
}

fn integer(doc: &LegacyValue, name: &str) -> std::result::Result<i64, String> {
    let value = field(doc, name)?;
    value
        .as_i64()
        .ok_or_else(|| format!("'{}' is a {}, expected an integer", name, value.type_name()))
}

fn unsigned(doc: &LegacyValue, name: &str) -> std::result::Result<u64, String> {
    let value = integer(doc, name)?;
    u64::try_from(value).map_err(|_| format!("'{}' is negative: {}", name, value))
}

/// Timestamps are BSON dates, or numbers holding epoch milliseconds.
fn timestamp(doc: &LegacyValue, name: &str) -> std::result::Result<DateTime<Utc>, String> {
    match field(doc, name)? {
        LegacyValue::DateTime(at) => Ok(*at),
        other => match other.as_i64() {
            Some(millis) => value::millis_to_datetime(millis),
            None => Err(format!("'{}' is a {}, expected a date", name, other.type_name())),
        },
    }
}

fn string(doc: &LegacyValue, name: &str) -> std::result::Result<String, String> {
    optional_string(doc, name)?.ok_or_else(|| format!("missing field '{}'", name))
}

fn optional_string(doc: &LegacyValue, name: &str) -> std::result::Result<Option<String>, String> {
    match doc.get(name) {
        None | Some(LegacyValue::Null) => Ok(None),
        Some(LegacyValue::String(text)) => Ok(Some(text.clone())),
        Some(other) => Err(format!("'{}' is a {}, expected a string", name, other.type_name())),
    }
}
