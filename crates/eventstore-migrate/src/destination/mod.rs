//! The destination event store.
//!
//! The destination stores one document per event and enforces optimistic
//! concurrency per aggregate: a commit names the version it expects the
//! aggregate to be at, and is refused if the stored version differs.

pub mod memory;
pub mod runtime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::converter::{ConvertedEvent, EventType};
use crate::error::{Error, Result};
use crate::guid::Guid;
use crate::versions::AggregateRootVersion;

pub use memory::InMemoryEventStore;
pub use runtime::RuntimeEventStore;

/// Failure id the destination reports when the expected aggregate root
/// version does not match the stored one.
///
/// Renders as `eb51284e-c7b4-4966-8da4-64a862c07560`.
pub const CONCURRENCY_CONFLICT_FAILURE: Guid = Guid::from_bytes([
    0x4e, 0x28, 0x51, 0xeb, 0xb4, 0xc7, 0x66, 0x49, 0x8d, 0xa4, 0x64, 0xa8, 0x62, 0xc0, 0x75, 0x60,
]);

/// Semantic version of the software that produced an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    /// Major.
    pub major: u32,
    /// Minor.
    pub minor: u32,
    /// Patch.
    pub patch: u32,
    /// Build number.
    pub build: u32,
    /// Pre-release tag, empty for releases.
    pub pre_release: String,
}

/// A claim of the principal on whose behalf events are committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    /// Claim name.
    pub key: String,
    /// Claim value.
    pub value: String,
    /// Claim value type.
    pub value_type: String,
}

/// Context every destination commit carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    /// Microservice performing the commit.
    pub microservice_id: Guid,
    /// Tenant the events belong to.
    pub tenant_id: Guid,
    /// Version of the microservice.
    pub version: Version,
    /// Correlation id.
    pub correlation_id: Guid,
    /// Environment name.
    pub environment: String,
    /// Claims.
    pub claims: Vec<Claim>,
}

/// One event of an aggregate commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UncommittedAggregateEvent {
    /// Event type.
    pub event_type: EventType,
    /// Content.
    pub content: Map<String, Value>,
    /// Whether the event is public.
    pub public: bool,
}

impl From<ConvertedEvent> for UncommittedAggregateEvent {
    fn from(event: ConvertedEvent) -> Self {
        Self {
            event_type: event.event_type,
            content: event.content,
            public: event.public,
        }
    }
}

/// Events to append atomically to one aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UncommittedAggregateEvents {
    /// Event source (aggregate instance).
    #[serde(rename = "eventSourceId")]
    pub event_source: Guid,
    /// Aggregate root type.
    #[serde(rename = "aggregateRootId")]
    pub aggregate_root: Guid,
    /// Version the aggregate must be at for the commit to succeed.
    #[serde(rename = "expectedAggregateRootVersion")]
    pub expected_version: AggregateRootVersion,
    /// The events, in order.
    pub events: Vec<UncommittedAggregateEvent>,
}

/// Why a commit was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitFailure {
    /// Failure id.
    pub id: Guid,
    /// Readable reason.
    pub reason: String,
}

impl CommitFailure {
    /// A concurrency conflict failure.
    #[must_use]
    pub fn concurrency_conflict(reason: impl Into<String>) -> Self {
        Self {
            id: CONCURRENCY_CONFLICT_FAILURE,
            reason: reason.into(),
        }
    }

    /// Whether this is a concurrency conflict.
    #[must_use]
    pub fn is_concurrency_conflict(&self) -> bool {
        self.id == CONCURRENCY_CONFLICT_FAILURE
    }
}

/// Result of an aggregate commit, as reported by the destination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResponse {
    /// Set if the commit was refused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<CommitFailure>,
    /// Aggregate root version after the commit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate_root_version: Option<AggregateRootVersion>,
}

impl CommitResponse {
    /// A successful response.
    #[must_use]
    pub fn committed(version: AggregateRootVersion) -> Self {
        Self {
            failure: None,
            aggregate_root_version: Some(version),
        }
    }

    /// A refused response.
    #[must_use]
    pub fn failed(failure: CommitFailure) -> Self {
        Self {
            failure: Some(failure),
            aggregate_root_version: None,
        }
    }

    /// Turns a refusal into an error.
    ///
    /// # Errors
    ///
    /// [`Error::ConcurrencyConflict`] for conflicts, [`Error::CommitFailed`]
    /// for anything else.
    pub fn into_result(self) -> Result<Option<AggregateRootVersion>> {
        match self.failure {
            Some(failure) if failure.is_concurrency_conflict() => {
                Err(Error::ConcurrencyConflict(failure.reason))
            }
            Some(failure) => Err(Error::CommitFailed(format!(
                "{} ({})",
                failure.reason, failure.id
            ))),
            None => Ok(self.aggregate_root_version),
        }
    }
}

/// Writer side of the destination store.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Store type name, for logging.
    fn store_type(&self) -> &'static str;

    /// Appends events to an aggregate if it is at the expected version.
    ///
    /// A refused commit is reported in the response, not as an error. Errors
    /// are reserved for transport failures.
    async fn commit_for_aggregate(
        &self,
        execution_context: &ExecutionContext,
        events: UncommittedAggregateEvents,
    ) -> Result<CommitResponse>;
}

/// Builds tenant scoped handles on an [`EventStore`].
#[derive(Clone)]
pub struct EventStoreClient {
    store: Arc<dyn EventStore>,
    microservice: Guid,
    version: Version,
    environment: String,
}

impl fmt::Debug for EventStoreClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStoreClient")
            .field("store", &self.store.store_type())
            .field("microservice", &self.microservice)
            .field("environment", &self.environment)
            .finish()
    }
}

impl EventStoreClient {
    /// Creates a client committing on behalf of `microservice`.
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>, microservice: Guid, environment: impl Into<String>) -> Self {
        Self {
            store,
            microservice,
            version: Version::default(),
            environment: environment.into(),
        }
    }

    /// A handle committing for `tenant` with a fresh correlation id.
    #[must_use]
    pub fn for_tenant(&self, tenant: Guid) -> TenantEventStore {
        TenantEventStore {
            store: self.store.clone(),
            context: ExecutionContext {
                microservice_id: self.microservice,
                tenant_id: tenant,
                version: self.version.clone(),
                correlation_id: Guid::new_random(),
                environment: self.environment.clone(),
                claims: Vec::new(),
            },
        }
    }

    /// The ambient environment name.
    #[must_use]
    pub fn environment(&self) -> &str {
        &self.environment
    }
}

/// An [`EventStore`] bound to one execution context.
#[derive(Clone)]
pub struct TenantEventStore {
    store: Arc<dyn EventStore>,
    context: ExecutionContext,
}

impl TenantEventStore {
    /// Replaces the correlation id.
    #[must_use]
    pub fn with_correlation(mut self, correlation_id: Guid) -> Self {
        self.context.correlation_id = correlation_id;
        self
    }

    /// Replaces the environment.
    #[must_use]
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.context.environment = environment.into();
        self
    }

    /// Replaces the claims.
    #[must_use]
    pub fn with_claims(mut self, claims: Vec<Claim>) -> Self {
        self.context.claims = claims;
        self
    }

    /// The execution context commits are sent with.
    #[must_use]
    pub fn execution_context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Commits events to an aggregate.
    ///
    /// # Errors
    ///
    /// Transport errors, [`Error::ConcurrencyConflict`] if the aggregate is
    /// not at the expected version, or [`Error::CommitFailed`].
    pub async fn commit_for_aggregate(
        &self,
        events: UncommittedAggregateEvents,
    ) -> Result<Option<AggregateRootVersion>> {
        debug!(
            tenant = %self.context.tenant_id,
            event_source = %events.event_source,
            expected_version = %events.expected_version,
            events = events.events.len(),
            "Committing aggregate events to {}",
            self.store.store_type()
        );

        self.store
            .commit_for_aggregate(&self.context, events)
            .await?
            .into_result()
    }
}
