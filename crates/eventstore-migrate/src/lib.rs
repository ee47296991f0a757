// Migration tool - pedantic lints relaxed for CLI ergonomics
#![allow(clippy::pedantic)]

//! # Event Store Migration Tool
//!
//! `eventstore-migrate` is a CLI tool and library for moving a legacy,
//! commit-oriented event store into an event store that versions every
//! aggregate event individually.
//!
//! Each legacy commit holds a batch of events appended atomically to one
//! event source. The migrator reads commits in order, converts their events
//! (binary identifiers become strings, field names become camelCase) and
//! commits them to the destination with the aggregate root version the
//! destination expects.
//!
//! ## Supported Stores
//!
//! | Store | Side | Notes |
//! |-------|------|-------|
//! | MongoDB | Legacy | Via the MongoDB Data API (REST) |
//! | Runtime | Destination | HTTP `commit-for-aggregate` endpoint |
//! | In-memory | Both | Tests and dry runs |
//!
//! ## Quick Start
//!
//! ```bash
//! # Migrate
//! eventstore-migrate run --config migration.yaml
//!
//! # Dry run (commits into memory)
//! eventstore-migrate run --config migration.yaml --dry-run
//! ```
//!
//! ## Configuration Example
//!
//! ```yaml
//! microservice: 6a5d3b3e-8c5f-4a0e-9b3a-2f1b1c2d3e4f
//!
//! sources:
//!   - store:
//!       type: mongodb
//!       data_api_url: https://data.mongodb-api.com/app/my-app/endpoint/data/v1
//!       api_key: ${MONGODB_API_KEY}
//!     event_stores:
//!       - name: event_store_tenant_a
//!         tenant: 445f8ea8-1a6f-40d7-b2fc-796dba92dc44
//!
//! destination:
//!   host: localhost
//!   port: 50053
//!
//! options:
//!   batch_size: 1000
//!   progress_interval_secs: 10
//! ```

#![warn(missing_docs)]

pub mod artifacts;
pub mod builder;
pub mod casing;
pub mod config;
pub mod connectors;
pub mod converter;
pub mod destination;
pub mod error;
pub mod guid;
pub mod legacy;
pub mod migrator;
pub mod progress;
pub mod retry;
pub mod source;
pub mod versions;

pub use artifacts::ArtifactsMap;
pub use builder::{MigratorBuilder, SourceBuilder, SourcesBuilder};
pub use config::{LegacyStoreConfig, MigrationConfig, MigrationOptions};
pub use connectors::{CommitTotals, LegacyStore};
pub use converter::{ConvertedEvent, Diagnostics, EventConverter, EventModifier, EventType};
pub use destination::{EventStore, EventStoreClient};
pub use error::{Error, Result};
pub use guid::Guid;
pub use legacy::{LegacyCommit, LegacyEvent};
pub use migrator::{CommitReport, MigrationStats, Migrator};
pub use progress::{LogProgressSink, ProgressSink, TerminalProgressSink};
pub use source::{CommitEnvelope, Source};
pub use versions::{AggregateKey, AggregateRootVersion, AggregateVersions};
