//! Error types for eventstore-migrate.
//!
//! Every failure halts the source it happened in and, transitively, the whole
//! migration run. Error codes follow the pattern `MIGRATE-XXX`.

use thiserror::Error;

use crate::guid::Guid;
use crate::versions::AggregateKey;

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while migrating an event store.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration (MIGRATE-001).
    #[error("[MIGRATE-001] Configuration error: {0}")]
    Config(String),

    /// Legacy store unreachable or returned an unexpected response (MIGRATE-002).
    #[error("[MIGRATE-002] Source connection error: {0}")]
    SourceConnection(String),

    /// Credentials rejected by a remote store (MIGRATE-003).
    #[error("[MIGRATE-003] Authentication failed: {0}")]
    Authentication(String),

    /// Remote store asked us to slow down (MIGRATE-004).
    #[error("[MIGRATE-004] Rate limited, retry after {0}s")]
    RateLimit(u64),

    /// A legacy document could not be decoded (MIGRATE-005).
    #[error("[MIGRATE-005] Malformed legacy document {document}: {reason}")]
    Deserialization {
        /// Identifier of the offending document, or `<unknown>`.
        document: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A legacy event could not be converted (MIGRATE-006).
    #[error("[MIGRATE-006] Failed to convert event {event_id}: {reason}")]
    Conversion {
        /// Id of the legacy event.
        event_id: Guid,
        /// What went wrong, including hook-raised errors.
        reason: String,
    },

    /// Destination store unreachable (MIGRATE-007).
    #[error("[MIGRATE-007] Destination connection error: {0}")]
    DestinationConnection(String),

    /// The destination rejected the expected aggregate root version (MIGRATE-008).
    ///
    /// This means the version tracker and the destination have diverged and is
    /// never retried.
    #[error("[MIGRATE-008] Aggregate root concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// The destination refused a commit for any other reason (MIGRATE-009).
    #[error("[MIGRATE-009] Commit failed: {0}")]
    CommitFailed(String),

    /// A version increment was requested for a key that was never read (MIGRATE-010).
    #[error("[MIGRATE-010] Aggregate version was never initialized for {0}")]
    VersionNotInitialized(AggregateKey),

    /// The artifact catalog does not have the expected shape (MIGRATE-011).
    #[error("[MIGRATE-011] The provided artifacts are not valid: {0}")]
    InvalidArtifacts(String),

    /// An identifier could not be parsed (MIGRATE-012).
    #[error("[MIGRATE-012] Invalid identifier: {0}")]
    InvalidGuid(String),

    /// IO error (MIGRATE-013).
    #[error("[MIGRATE-013] IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport error (MIGRATE-014).
    #[error("[MIGRATE-014] HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error (MIGRATE-015).
    #[error("[MIGRATE-015] JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error (MIGRATE-016).
    #[error("[MIGRATE-016] YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Returns the error code (e.g., "MIGRATE-001").
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "MIGRATE-001",
            Self::SourceConnection(_) => "MIGRATE-002",
            Self::Authentication(_) => "MIGRATE-003",
            Self::RateLimit(_) => "MIGRATE-004",
            Self::Deserialization { .. } => "MIGRATE-005",
            Self::Conversion { .. } => "MIGRATE-006",
            Self::DestinationConnection(_) => "MIGRATE-007",
            Self::ConcurrencyConflict(_) => "MIGRATE-008",
            Self::CommitFailed(_) => "MIGRATE-009",
            Self::VersionNotInitialized(_) => "MIGRATE-010",
            Self::InvalidArtifacts(_) => "MIGRATE-011",
            Self::InvalidGuid(_) => "MIGRATE-012",
            Self::Io(_) => "MIGRATE-013",
            Self::Http(_) => "MIGRATE-014",
            Self::Json(_) => "MIGRATE-015",
            Self::Yaml(_) => "MIGRATE-016",
        }
    }

    /// Shorthand for a [`Error::Deserialization`].
    pub(crate) fn malformed(document: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Deserialization {
            document: document.into(),
            reason: reason.into(),
        }
    }
}
