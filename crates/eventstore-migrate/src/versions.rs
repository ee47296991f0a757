//! Aggregate root version tracking.
//!
//! The destination store refuses an aggregate commit unless the caller sends
//! the exact number of events already stored for that aggregate. The tracker
//! keeps that number per `(tenant, aggregate root, event source)` for the
//! duration of a run. It is never persisted.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};
use crate::guid::Guid;

/// Identifies one aggregate stream in the destination store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AggregateKey {
    /// Tenant the stream belongs to.
    pub tenant: Guid,
    /// Aggregate root type.
    pub aggregate_root: Guid,
    /// Event source (aggregate instance).
    pub event_source: Guid,
}

impl AggregateKey {
    /// Creates a key.
    #[must_use]
    pub const fn new(tenant: Guid, aggregate_root: Guid, event_source: Guid) -> Self {
        Self {
            tenant,
            aggregate_root,
            event_source,
        }
    }
}

impl fmt::Display for AggregateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tenant {} aggregate root {} event source {}",
            self.tenant, self.aggregate_root, self.event_source
        )
    }
}

/// Number of events stored for an aggregate stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateRootVersion(pub u64);

impl AggregateRootVersion {
    /// Version of a stream that has no events yet.
    pub const INITIAL: Self = Self(0);

    /// The raw counter.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AggregateRootVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process-local table of the next expected version per aggregate stream.
///
/// Shared between all sources of a run; every access takes the inner lock,
/// so a single instance can be used from concurrent tasks.
#[derive(Debug, Default)]
pub struct AggregateVersions {
    versions: Mutex<HashMap<AggregateKey, u64>>,
}

impl AggregateVersions {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the version the destination expects next for the stream,
    /// registering the stream at version 0 the first time it is seen.
    pub fn expected_version_for(
        &self,
        tenant: Guid,
        aggregate_root: Guid,
        event_source: Guid,
    ) -> AggregateRootVersion {
        let key = AggregateKey::new(tenant, aggregate_root, event_source);
        let mut versions = self.versions.lock();
        AggregateRootVersion(*versions.entry(key).or_insert(0))
    }

    /// Advances the stream by `delta` committed events and returns the new
    /// version.
    ///
    /// # Errors
    ///
    /// Returns [`Error::VersionNotInitialized`] if the stream was never read
    /// through [`Self::expected_version_for`] or seeded.
    pub fn increment_version_for(
        &self,
        tenant: Guid,
        aggregate_root: Guid,
        event_source: Guid,
        delta: u64,
    ) -> Result<AggregateRootVersion> {
        let key = AggregateKey::new(tenant, aggregate_root, event_source);
        let mut versions = self.versions.lock();
        let version = versions
            .get_mut(&key)
            .ok_or(Error::VersionNotInitialized(key))?;
        *version += delta;
        Ok(AggregateRootVersion(*version))
    }

    /// Sets the version of a stream explicitly. Used when resuming a run
    /// against a destination that already holds events for the stream.
    pub fn seed(&self, key: AggregateKey, version: AggregateRootVersion) {
        self.versions.lock().insert(key, version.0);
    }

    /// Current version of a stream, if it has been seen.
    #[must_use]
    pub fn version_of(&self, key: &AggregateKey) -> Option<AggregateRootVersion> {
        self.versions.lock().get(key).copied().map(AggregateRootVersion)
    }

    /// Number of streams seen so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.versions.lock().len()
    }

    /// Whether no stream has been seen yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.versions.lock().is_empty()
    }
}
