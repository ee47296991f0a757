//! Legacy event store connectors.

pub mod common;
pub mod memory;
pub mod mongodb;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::LegacyStoreConfig;
use crate::error::Result;

pub use memory::InMemoryLegacyStore;
pub use mongodb::{MongoDataApiConfig, MongoDataApiStore};

/// Commit and event totals of one legacy event store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitTotals {
    /// Number of commits.
    pub commits: u64,
    /// Number of events across all commits.
    pub events: u64,
}

/// Read access to a legacy commit store.
///
/// One store may host several event store databases. Every call names the
/// database it reads from. Reads are idempotent and may be retried.
#[async_trait]
pub trait LegacyStore: Send + Sync {
    /// Get the store type name.
    fn store_type(&self) -> &'static str;

    /// Connect to the database and validate configuration.
    async fn connect(&self, database: &str) -> Result<()>;

    /// Counts commits and events in one aggregate pass.
    async fn count_commits_and_events(&self, database: &str) -> Result<CommitTotals>;

    /// Fetches up to `limit` commit documents ordered by ascending `_id`.
    ///
    /// # Arguments
    ///
    /// * `database` - Event store database name
    /// * `after` - Only return commits with an `_id` greater than this
    /// * `limit` - Maximum number of commits to return
    ///
    /// # Returns
    ///
    /// Raw Extended JSON commit documents. An empty page means the store is
    /// exhausted.
    async fn fetch_commits(
        &self,
        database: &str,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<serde_json::Value>>;
}

/// Create a legacy store from configuration.
pub fn create_store(config: &LegacyStoreConfig) -> Result<Arc<dyn LegacyStore>> {
    match config {
        LegacyStoreConfig::MongoDataApi(cfg) => {
            Ok(Arc::new(MongoDataApiStore::new(cfg.clone())?))
        }
    }
}
