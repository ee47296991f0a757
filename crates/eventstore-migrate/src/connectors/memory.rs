//! In-memory legacy store, for tests and local experiments.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;

use crate::connectors::{CommitTotals, LegacyStore};
use crate::error::{Error, Result};
use crate::legacy::LegacyValue;

#[derive(Debug, Default)]
struct State {
    databases: HashMap<String, Vec<Value>>,
    transient_failures: u32,
    page_reads: u64,
}

/// Legacy store holding commit documents in memory.
///
/// Documents are kept as Extended JSON and served in ascending `_id` order,
/// exactly like a real store.
#[derive(Debug, Default)]
pub struct InMemoryLegacyStore {
    state: Mutex<State>,
}

impl InMemoryLegacyStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds commit documents to a database.
    #[must_use]
    pub fn with_commits(self, database: &str, commits: Vec<Value>) -> Self {
        self.insert_commits(database, commits);
        self
    }

    /// Adds commit documents to a database.
    pub fn insert_commits(&self, database: &str, commits: Vec<Value>) {
        let mut state = self.state.lock();
        let documents = state.databases.entry(database.to_string()).or_default();
        documents.extend(commits);
        documents.sort_by_key(commit_id);
    }

    /// Makes the next `count` reads fail with a transient error.
    pub fn fail_next_reads(&self, count: u32) {
        self.state.lock().transient_failures = count;
    }

    /// Number of successful page reads so far.
    #[must_use]
    pub fn page_reads(&self) -> u64 {
        self.state.lock().page_reads
    }

    fn check_transient(state: &mut State) -> Result<()> {
        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(Error::SourceConnection(
                "HTTP 503 Service Unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

/// `_id` of a commit document, plain or canonical Extended JSON.
fn commit_id(document: &Value) -> i64 {
    document
        .get("_id")
        .and_then(|id| LegacyValue::from_extended_json(id).ok())
        .and_then(|id| id.as_i64())
        .unwrap_or(i64::MIN)
}

fn event_count(document: &Value) -> u64 {
    document
        .get("events")
        .and_then(Value::as_array)
        .map_or(0, |events| events.len() as u64)
}

#[async_trait]
impl LegacyStore for InMemoryLegacyStore {
    fn store_type(&self) -> &'static str {
        "memory"
    }

    async fn connect(&self, database: &str) -> Result<()> {
        let mut state = self.state.lock();
        Self::check_transient(&mut state)?;
        if state.databases.contains_key(database) {
            Ok(())
        } else {
            Err(Error::SourceConnection(format!(
                "Database '{}' does not exist",
                database
            )))
        }
    }

    async fn count_commits_and_events(&self, database: &str) -> Result<CommitTotals> {
        let mut state = self.state.lock();
        Self::check_transient(&mut state)?;
        let documents = state.databases.get(database).map_or(&[][..], Vec::as_slice);
        Ok(CommitTotals {
            commits: documents.len() as u64,
            events: documents.iter().map(event_count).sum(),
        })
    }

    async fn fetch_commits(
        &self,
        database: &str,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Value>> {
        let mut state = self.state.lock();
        Self::check_transient(&mut state)?;
        state.page_reads += 1;

        let page = state
            .databases
            .get(database)
            .map(|documents| {
                documents
                    .iter()
                    .filter(|d| after.map_or(true, |after| commit_id(d) > after))
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        Ok(page)
    }
}
