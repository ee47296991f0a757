//! A legacy event store database paired with the tenant it belongs to.

use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::connectors::{CommitTotals, LegacyStore};
use crate::error::Result;
use crate::guid::Guid;
use crate::legacy::LegacyCommit;
use crate::retry::{with_retry, RetryConfig};

/// Default number of commits read per page.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// A commit together with its position in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitEnvelope {
    /// The commit.
    pub commit: LegacyCommit,
    /// Tenant the commit belongs to.
    pub tenant: Guid,
    /// Zero-based position of the commit.
    pub commit_index: u64,
    /// Commits in the source, counted when the stream started.
    pub commit_count: u64,
    /// Events in all commits before this one.
    pub event_index: u64,
    /// Events in the source, counted when the stream started.
    pub event_count: u64,
}

/// One legacy event store to migrate.
#[derive(Clone)]
pub struct Source {
    store: Arc<dyn LegacyStore>,
    event_store: String,
    tenant: Guid,
    batch_size: usize,
    retry: RetryConfig,
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("store", &self.store.store_type())
            .field("event_store", &self.event_store)
            .field("tenant", &self.tenant)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

/// Read position while streaming a source.
struct Cursor {
    totals: CommitTotals,
    after: Option<i64>,
    page: VecDeque<Value>,
    exhausted: bool,
    commit_index: u64,
    event_index: u64,
}

impl Source {
    /// Creates a source reading `event_store` from `store` on behalf of `tenant`.
    pub fn new(store: Arc<dyn LegacyStore>, event_store: impl Into<String>, tenant: Guid) -> Self {
        Self {
            store,
            event_store: event_store.into(),
            tenant,
            batch_size: DEFAULT_BATCH_SIZE,
            retry: RetryConfig::default(),
        }
    }

    /// Sets the number of commits read per page (at least one).
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Sets the retry policy for reads.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Name of the legacy event store database.
    pub fn event_store_name(&self) -> &str {
        &self.event_store
    }

    /// Tenant the events are migrated for.
    pub fn tenant(&self) -> Guid {
        self.tenant
    }

    /// Streams every commit in ascending `_id` order.
    ///
    /// The stream connects and counts lazily, on first poll. The first error
    /// is yielded and ends the stream. Dropping the stream stops reading.
    pub fn commits(&self) -> BoxStream<'_, Result<CommitEnvelope>> {
        stream::try_unfold(None, move |cursor| self.advance(cursor)).boxed()
    }

    /// Produces the next envelope, opening the source on the first call.
    async fn advance(
        &self,
        cursor: Option<Cursor>,
    ) -> Result<Option<(CommitEnvelope, Option<Cursor>)>> {
        let mut cursor = match cursor {
            Some(cursor) => cursor,
            None => self.open().await?,
        };

        loop {
            if let Some(document) = cursor.page.pop_front() {
                let commit = LegacyCommit::from_document(&document)?;
                let events = commit.event_count() as u64;
                cursor.after = Some(commit.id);

                let envelope = CommitEnvelope {
                    commit,
                    tenant: self.tenant,
                    commit_index: cursor.commit_index,
                    commit_count: cursor.totals.commits,
                    event_index: cursor.event_index,
                    event_count: cursor.totals.events,
                };

                cursor.commit_index += 1;
                cursor.event_index += events;
                return Ok(Some((envelope, Some(cursor))));
            }

            if cursor.exhausted {
                debug!(
                    event_store = %self.event_store,
                    commits = cursor.commit_index,
                    "Finished reading commits"
                );
                return Ok(None);
            }

            let page = self.fetch_page(cursor.after).await?;
            cursor.exhausted = page.len() < self.batch_size;
            cursor.page = page.into();
        }
    }

    async fn open(&self) -> Result<Cursor> {
        debug!(
            event_store = %self.event_store,
            "Connecting to {} legacy store",
            self.store.store_type()
        );

        with_retry(&self.retry, "connect", || self.store.connect(&self.event_store)).await?;

        let totals = with_retry(&self.retry, "count commits", || {
            self.store.count_commits_and_events(&self.event_store)
        })
        .await?;

        info!(
            event_store = %self.event_store,
            tenant = %self.tenant,
            commits = totals.commits,
            events = totals.events,
            "Counted commits to migrate"
        );

        Ok(Cursor {
            totals,
            after: None,
            page: VecDeque::new(),
            exhausted: false,
            commit_index: 0,
            event_index: 0,
        })
    }

    async fn fetch_page(&self, after: Option<i64>) -> Result<Vec<Value>> {
        with_retry(&self.retry, "fetch commits", || {
            self.store
                .fetch_commits(&self.event_store, after, self.batch_size)
        })
        .await
    }
}
