//! In-memory destination store.
//!
//! Applies the same optimistic concurrency rule as the real destination.
//! Used for dry runs and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;

use super::{
    CommitFailure, CommitResponse, EventStore, ExecutionContext, UncommittedAggregateEvents,
};
use crate::converter::EventType;
use crate::error::Result;
use crate::guid::Guid;
use crate::versions::{AggregateKey, AggregateRootVersion};

/// Event horizon metadata of a stored event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventHorizon {
    /// Whether the event came through an event horizon.
    pub from_event_horizon: bool,
    /// Sequence number in the external event log.
    pub external_event_log_sequence_number: u64,
    /// When the event was received.
    pub received: DateTime<Utc>,
    /// Consent the event was received under.
    pub consent: Guid,
}

impl EventHorizon {
    /// Metadata of an event that did not come through an event horizon.
    #[must_use]
    pub fn not_received() -> Self {
        Self {
            from_event_horizon: false,
            external_event_log_sequence_number: 0,
            received: DateTime::<Utc>::default(),
            consent: Guid::EMPTY,
        }
    }
}

/// An event as stored by [`InMemoryEventStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    /// Position in the event log.
    pub sequence_number: u64,
    /// Context of the commit.
    pub execution_context: ExecutionContext,
    /// Event source.
    pub event_source: Guid,
    /// Aggregate root type.
    pub aggregate_root: Guid,
    /// Aggregate version of this event, counting from 0.
    pub aggregate_version: u64,
    /// Event type.
    pub event_type: EventType,
    /// Content.
    pub content: Map<String, Value>,
    /// Whether the event is public.
    pub public: bool,
    /// Event horizon metadata.
    pub event_horizon: EventHorizon,
}

#[derive(Debug, Default)]
struct State {
    streams: HashMap<AggregateKey, u64>,
    events: Vec<StoredEvent>,
    refused: u64,
}

/// Destination store kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    state: Mutex<State>,
}

impl InMemoryEventStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretends `version` events already exist for the aggregate.
    pub fn seed_stream(&self, key: AggregateKey, version: AggregateRootVersion) {
        self.state.lock().streams.insert(key, version.value());
    }

    /// Stored version of an aggregate.
    #[must_use]
    pub fn stream_version(&self, key: &AggregateKey) -> AggregateRootVersion {
        AggregateRootVersion(self.state.lock().streams.get(key).copied().unwrap_or(0))
    }

    /// Snapshot of every stored event, in log order.
    #[must_use]
    pub fn events(&self) -> Vec<StoredEvent> {
        self.state.lock().events.clone()
    }

    /// Number of stored events.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.state.lock().events.len()
    }

    /// Number of refused commits.
    #[must_use]
    pub fn refused_commits(&self) -> u64 {
        self.state.lock().refused
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    fn store_type(&self) -> &'static str {
        "memory"
    }

    async fn commit_for_aggregate(
        &self,
        execution_context: &ExecutionContext,
        events: UncommittedAggregateEvents,
    ) -> Result<CommitResponse> {
        let key = AggregateKey::new(
            execution_context.tenant_id,
            events.aggregate_root,
            events.event_source,
        );

        let mut state = self.state.lock();
        let current = state.streams.get(&key).copied().unwrap_or(0);

        if current != events.expected_version.value() {
            state.refused += 1;
            return Ok(CommitResponse::failed(CommitFailure::concurrency_conflict(
                format!(
                    "aggregate root {} for event source {} is at version {}, expected {}",
                    events.aggregate_root, events.event_source, current, events.expected_version
                ),
            )));
        }

        let mut version = current;
        for event in events.events {
            let sequence_number = state.events.len() as u64;
            state.events.push(StoredEvent {
                sequence_number,
                execution_context: execution_context.clone(),
                event_source: events.event_source,
                aggregate_root: events.aggregate_root,
                aggregate_version: version,
                event_type: event.event_type,
                content: event.content,
                public: event.public,
                event_horizon: EventHorizon::not_received(),
            });
            version += 1;
        }
        state.streams.insert(key, version);

        Ok(CommitResponse::committed(AggregateRootVersion(version)))
    }
}
