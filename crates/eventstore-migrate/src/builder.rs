//! Assembly of a [`Migrator`] and its collaborators.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::artifacts::ArtifactsMap;
use crate::config::MigrationConfig;
use crate::connectors::{create_store, LegacyStore};
use crate::converter::{EventConverter, EventModifier, IncludeAll};
use crate::destination::memory::InMemoryEventStore;
use crate::destination::runtime::{RuntimeEventStore, DEFAULT_HOST, DEFAULT_PORT};
use crate::destination::{EventStore, EventStoreClient};
use crate::error::{Error, Result};
use crate::guid::Guid;
use crate::migrator::{Migrator, DEFAULT_PROGRESS_INTERVAL};
use crate::progress::{LogProgressSink, ProgressSink};
use crate::retry::RetryConfig;
use crate::source::{Source, DEFAULT_BATCH_SIZE};
use crate::versions::AggregateVersions;

/// Environment used for commits without events to take it from.
pub const DEFAULT_ENVIRONMENT: &str = "Production";

impl Migrator {
    /// Starts building a migrator committing on behalf of `microservice`.
    #[must_use]
    pub fn for_microservice(microservice: Guid) -> MigratorBuilder {
        MigratorBuilder::new(microservice)
    }
}

/// Builds a [`Migrator`].
///
/// # Example
///
/// ```no_run
/// # async fn run() -> eventstore_migrate::Result<()> {
/// use std::sync::Arc;
/// use eventstore_migrate::connectors::{MongoDataApiConfig, MongoDataApiStore};
/// use eventstore_migrate::{Guid, Migrator};
///
/// let store = Arc::new(MongoDataApiStore::new(MongoDataApiConfig {
///     data_api_url: "https://data.mongodb-api.com/app/my-app/endpoint/data/v1".to_string(),
///     api_key: "secret".to_string(),
///     data_source: "mongodb-atlas".to_string(),
///     collection: "commits".to_string(),
/// })?);
///
/// let tenant: Guid = "445f8ea8-1a6f-40d7-b2fc-796dba92dc44".parse()?;
/// let migrator = Migrator::for_microservice(Guid::new_random())
///     .with_runtime_on("localhost", 50053)
///     .with_source(store, |source| source.convert("event_store_tenant", tenant))
///     .build()?;
///
/// let stats = migrator.run().await?;
/// println!("{} events committed", stats.events_committed);
/// # Ok(())
/// # }
/// ```
pub struct MigratorBuilder {
    microservice: Guid,
    host: String,
    port: u16,
    event_store: Option<Arc<dyn EventStore>>,
    artifacts: ArtifactsMap,
    modifier: Arc<dyn EventModifier>,
    sources: SourcesBuilder,
    environment: String,
    progress: Arc<dyn ProgressSink>,
    progress_interval: Duration,
    batch_size: usize,
    retry: RetryConfig,
    versions: Arc<AggregateVersions>,
}

impl MigratorBuilder {
    fn new(microservice: Guid) -> Self {
        Self {
            microservice,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            event_store: None,
            artifacts: ArtifactsMap::empty(),
            modifier: Arc::new(IncludeAll),
            sources: SourcesBuilder::default(),
            environment: DEFAULT_ENVIRONMENT.to_string(),
            progress: Arc::new(LogProgressSink),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
            retry: RetryConfig::default(),
            versions: Arc::new(AggregateVersions::new()),
        }
    }

    /// Wires a migrator from a configuration file.
    ///
    /// Dry runs commit into an [`InMemoryEventStore`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid or a store
    /// cannot be created from it.
    pub fn from_config(config: &MigrationConfig, artifacts: ArtifactsMap) -> Result<Self> {
        config.validate()?;

        let options = &config.options;
        let mut builder = Migrator::for_microservice(config.microservice)
            .with_runtime_on(&config.destination.host, config.destination.port)
            .with_artifacts(artifacts)
            .with_environment(options.environment.clone())
            .with_batch_size(options.batch_size)
            .with_progress_interval(options.progress_interval())
            .with_retry(options.retry());

        if options.dry_run {
            info!("Dry run mode - committing to an in-memory event store");
            builder = builder.with_event_store(Arc::new(InMemoryEventStore::new()));
        }

        for source in &config.sources {
            let store = create_store(&source.store)?;
            builder = builder.with_source(store, |builder| {
                for event_store in &source.event_stores {
                    builder.convert(&event_store.name, event_store.tenant);
                }
            });
        }

        Ok(builder)
    }

    /// Commits to the runtime listening on `host:port`.
    #[must_use]
    pub fn with_runtime_on(mut self, host: &str, port: u16) -> Self {
        self.host = host.to_string();
        self.port = port;
        self
    }

    /// Commits to `event_store` instead of a runtime.
    #[must_use]
    pub fn with_event_store(mut self, event_store: Arc<dyn EventStore>) -> Self {
        self.event_store = Some(event_store);
        self
    }

    /// Uses `artifacts` to resolve event type names.
    #[must_use]
    pub fn with_artifacts(mut self, artifacts: ArtifactsMap) -> Self {
        self.artifacts = artifacts;
        self
    }

    /// Uses an artifact catalog given as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArtifacts`] if the value is not a catalog.
    pub fn with_artifacts_json(self, artifacts: serde_json::Value) -> Result<Self> {
        Ok(self.with_artifacts(ArtifactsMap::from_json(artifacts)?))
    }

    /// Runs `modifier` on every converted event.
    #[must_use]
    pub fn with_event_modifier<M: EventModifier + 'static>(mut self, modifier: M) -> Self {
        self.modifier = Arc::new(modifier);
        self
    }

    /// Adds the event stores `configure` names on `store`.
    #[must_use]
    pub fn with_source<F>(mut self, store: Arc<dyn LegacyStore>, configure: F) -> Self
    where
        F: FnOnce(&mut SourceBuilder<'_>),
    {
        let mut source = self.sources.for_source_store(store);
        configure(&mut source);
        self
    }

    /// Environment for commits that carry no events.
    #[must_use]
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Where progress snapshots go. Defaults to the log.
    #[must_use]
    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    /// Minimum time between two progress snapshots.
    #[must_use]
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Commits read per page from the legacy stores.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Retry policy for legacy reads.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Starts from an existing version tracker, for instance one seeded with
    /// the versions of a partially migrated destination.
    #[must_use]
    pub fn with_aggregate_versions(mut self, versions: Arc<AggregateVersions>) -> Self {
        self.versions = versions;
        self
    }

    /// Builds the migrator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if two event stores are migrated for the same
    /// tenant, the progress interval is zero or the runtime address is invalid.
    pub fn build(self) -> Result<Migrator> {
        if self.progress_interval.is_zero() {
            return Err(Error::Config(
                "progress interval must be greater than 0".to_string(),
            ));
        }

        let sources = self.sources.build(self.batch_size, &self.retry)?;

        let event_store: Arc<dyn EventStore> = match self.event_store {
            Some(event_store) => event_store,
            None => {
                if self.host.trim().is_empty() {
                    return Err(Error::Config("runtime host cannot be empty".to_string()));
                }
                let runtime = RuntimeEventStore::new(&self.host, self.port);
                runtime.validate()?;
                Arc::new(runtime)
            }
        };

        info!(
            microservice = %self.microservice,
            destination = event_store.store_type(),
            sources = sources.len(),
            "Migrator built"
        );

        Ok(Migrator {
            versions: self.versions,
            converter: EventConverter::new(Arc::new(self.artifacts), self.modifier),
            client: EventStoreClient::new(event_store, self.microservice, self.environment),
            sources,
            progress: self.progress,
            progress_interval: self.progress_interval,
        })
    }
}

struct SourceEntry {
    store: Arc<dyn LegacyStore>,
    event_store: String,
    tenant: Guid,
}

/// Collects the sources of a migration.
#[derive(Default)]
pub struct SourcesBuilder {
    entries: Vec<SourceEntry>,
}

impl SourcesBuilder {
    /// Adds event stores hosted on `store`.
    pub fn for_source_store(&mut self, store: Arc<dyn LegacyStore>) -> SourceBuilder<'_> {
        SourceBuilder {
            sources: self,
            store,
        }
    }

    /// Adds one event store.
    pub fn add_source(&mut self, store: Arc<dyn LegacyStore>, event_store: &str, tenant: Guid) {
        self.entries.push(SourceEntry {
            store,
            event_store: event_store.to_string(),
            tenant,
        });
    }

    /// Number of event stores added.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no event store was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Creates the sources.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if two event stores share a tenant. Their
    /// aggregate versions would be tracked under the same keys.
    pub fn build(self, batch_size: usize, retry: &RetryConfig) -> Result<Vec<Source>> {
        let mut tenants = HashSet::new();
        for entry in &self.entries {
            if !tenants.insert(entry.tenant) {
                return Err(Error::Config(format!(
                    "event store '{}' migrates tenant {}, which another source already migrates",
                    entry.event_store, entry.tenant
                )));
            }
        }

        Ok(self
            .entries
            .into_iter()
            .map(|entry| {
                Source::new(entry.store, entry.event_store, entry.tenant)
                    .with_batch_size(batch_size)
                    .with_retry(retry.clone())
            })
            .collect())
    }
}

/// Adds event stores hosted on one legacy store.
pub struct SourceBuilder<'a> {
    sources: &'a mut SourcesBuilder,
    store: Arc<dyn LegacyStore>,
}

impl SourceBuilder<'_> {
    /// Migrates the events of database `event_store` into `tenant`.
    pub fn convert(&mut self, event_store: &str, tenant: Guid) {
        self.sources
            .add_source(self.store.clone(), event_store, tenant);
    }
}
