//! Configuration types for eventstore-migrate.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::connectors::mongodb::MongoDataApiConfig;
use crate::destination::runtime::{DEFAULT_HOST, DEFAULT_PORT};
use crate::error::{Error, Result};
use crate::guid::Guid;
use crate::retry::RetryConfig;

/// Main migration configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Microservice the migrated events are committed on behalf of.
    pub microservice: Guid,
    /// Legacy stores and the event stores to read from each.
    pub sources: Vec<SourceConfig>,
    /// Destination runtime.
    #[serde(default)]
    pub destination: DestinationConfig,
    /// Artifact catalog (JSON) used to resolve event type names.
    #[serde(default)]
    pub artifacts: Option<PathBuf>,
    /// Migration options.
    #[serde(default)]
    pub options: MigrationOptions,
}

/// One legacy store and the event store databases it hosts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Connection to the legacy store.
    pub store: LegacyStoreConfig,
    /// Event store databases to migrate, one per tenant.
    pub event_stores: Vec<EventStoreConfig>,
}

/// Legacy store connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LegacyStoreConfig {
    /// MongoDB reached through the Data API.
    #[serde(rename = "mongodb")]
    MongoDataApi(MongoDataApiConfig),
}

/// A legacy event store database and the tenant its events belong to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStoreConfig {
    /// Database name.
    pub name: String,
    /// Tenant id.
    pub tenant: Guid,
}

/// Destination runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// Runtime host.
    #[serde(default = "default_host")]
    pub host: String,
    /// Runtime port.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Migration options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationOptions {
    /// Commits read per page.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Minimum time between two progress reports.
    #[serde(default = "default_progress_interval_secs")]
    pub progress_interval_secs: u64,
    /// Commit into an in-memory store instead of the runtime.
    #[serde(default)]
    pub dry_run: bool,
    /// Environment used when a commit carries no events to take it from.
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Retries for transient legacy read failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            progress_interval_secs: default_progress_interval_secs(),
            dry_run: false,
            environment: default_environment(),
            max_retries: default_max_retries(),
        }
    }
}

impl MigrationOptions {
    /// Progress interval as a [`Duration`].
    #[must_use]
    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }

    /// Retry policy for legacy reads.
    #[must_use]
    pub fn retry(&self) -> RetryConfig {
        RetryConfig::with_max_retries(self.max_retries)
    }
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_batch_size() -> usize {
    1000
}

fn default_progress_interval_secs() -> u64 {
    10
}

fn default_environment() -> String {
    "Production".to_string()
}

fn default_max_retries() -> u32 {
    3
}

impl MigrationConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(Error::Config("at least one source is required".to_string()));
        }
        if self.options.batch_size == 0 {
            return Err(Error::Config(
                "batch_size must be greater than 0".to_string(),
            ));
        }
        if self.options.progress_interval_secs == 0 {
            return Err(Error::Config(
                "progress_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.destination.host.is_empty() {
            return Err(Error::Config("destination host cannot be empty".to_string()));
        }

        let mut tenants = HashSet::new();
        for source in &self.sources {
            if source.event_stores.is_empty() {
                return Err(Error::Config(
                    "every source needs at least one event store".to_string(),
                ));
            }
            for event_store in &source.event_stores {
                if event_store.name.is_empty() {
                    return Err(Error::Config(
                        "event store name cannot be empty".to_string(),
                    ));
                }
                if !tenants.insert(event_store.tenant) {
                    return Err(Error::Config(format!(
                        "tenant {} is migrated by more than one event store",
                        event_store.tenant
                    )));
                }
            }
        }
        Ok(())
    }

    /// Number of event stores across all sources.
    #[must_use]
    pub fn event_store_count(&self) -> usize {
        self.sources.iter().map(|s| s.event_stores.len()).sum()
    }
}
