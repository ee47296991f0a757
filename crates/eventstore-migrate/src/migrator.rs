//! Migration orchestration.
//!
//! All sources are migrated concurrently from one task. Within a source,
//! commits are converted and written strictly in legacy commit order, so the
//! aggregate version tracker always agrees with the destination.

use futures::future::try_join_all;
use futures::TryStreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{interval_at, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::converter::{ConvertedEvent, EventConverter};
use crate::destination::{Claim, EventStoreClient, TenantEventStore, UncommittedAggregateEvents};
use crate::error::Result;
use crate::guid::Guid;
use crate::legacy::{LegacyClaim, LegacyCommit};
use crate::progress::{done_label, progress_label, started_label, ProgressBoard, ProgressSink};
use crate::source::Source;
use crate::versions::AggregateVersions;

/// Default minimum time between two progress reports.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(10);

/// Migration statistics.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MigrationStats {
    /// Sources migrated.
    pub sources: usize,
    /// Legacy commits read.
    pub commits: u64,
    /// Commits that had no events left after conversion.
    pub commits_skipped: u64,
    /// Legacy events read.
    pub events_read: u64,
    /// Events committed to the destination.
    pub events_committed: u64,
    /// Events dropped by the event modifier.
    pub events_skipped: u64,
    /// Duration in seconds.
    pub duration_secs: f64,
}

impl MigrationStats {
    /// Calculate throughput (committed events per second).
    #[must_use]
    pub fn throughput(&self) -> f64 {
        if self.duration_secs > 0.0 {
            self.events_committed as f64 / self.duration_secs
        } else {
            0.0
        }
    }

    fn record(&mut self, report: &CommitReport) {
        self.commits += 1;
        self.events_read += (report.committed_events + report.skipped_events) as u64;
        self.events_committed += report.committed_events as u64;
        self.events_skipped += report.skipped_events as u64;
        if report.committed_events == 0 {
            self.commits_skipped += 1;
        }
    }

    fn merge(&mut self, other: &Self) {
        self.sources += other.sources;
        self.commits += other.commits;
        self.commits_skipped += other.commits_skipped;
        self.events_read += other.events_read;
        self.events_committed += other.events_committed;
        self.events_skipped += other.events_skipped;
    }
}

/// Outcome of migrating one commit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommitReport {
    /// Fraction of the source's events handled so far, in `[0, 1]`.
    ///
    /// Commits without events after the last event of a source report 1.0
    /// again. The source's progress line is only updated when it changes, so
    /// 100% is shown once.
    pub progress: f64,
    /// Events written to the destination.
    pub committed_events: usize,
    /// Events the modifier dropped.
    pub skipped_events: usize,
}

/// Migrates legacy event stores into the destination.
///
/// Built with [`Migrator::for_microservice`].
pub struct Migrator {
    pub(crate) versions: Arc<AggregateVersions>,
    pub(crate) converter: EventConverter,
    pub(crate) client: EventStoreClient,
    pub(crate) sources: Vec<Source>,
    pub(crate) progress: Arc<dyn ProgressSink>,
    pub(crate) progress_interval: Duration,
}

impl std::fmt::Debug for Migrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator")
            .field("client", &self.client)
            .field("sources", &self.sources)
            .field("progress_interval", &self.progress_interval)
            .finish_non_exhaustive()
    }
}

impl Migrator {
    /// Sources this migrator reads from.
    #[must_use]
    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// The aggregate version tracker.
    #[must_use]
    pub fn aggregate_versions(&self) -> &Arc<AggregateVersions> {
        &self.versions
    }

    /// Runs the migration for all sources.
    ///
    /// Progress is reported immediately, then at most once per progress
    /// interval, then once more when every source is done.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by any source. The other sources are
    /// cancelled. Commits already written are not rolled back.
    pub async fn run(&self) -> Result<MigrationStats> {
        let start = Instant::now();
        info!(sources = self.sources.len(), "Starting migration");

        let board = ProgressBoard::new(
            self.sources
                .iter()
                .map(|source| started_label(source.event_store_name()))
                .collect(),
        );

        let migrations = try_join_all(
            self.sources
                .iter()
                .enumerate()
                .map(|(slot, source)| self.migrate_source(slot, source, &board)),
        );
        tokio::pin!(migrations);

        if let Some(lines) = board.take_changed() {
            self.progress.report(&lines);
        }

        let period = self.progress_interval;
        let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                result = &mut migrations => break result,
                _ = ticker.tick() => {
                    if let Some(lines) = board.take_changed() {
                        self.progress.report(&lines);
                    }
                }
            }
        };

        let per_source = match result {
            Ok(per_source) => per_source,
            Err(e) => {
                error!("Migration failed: {}", e);
                self.progress.finish();
                return Err(e);
            }
        };

        if let Some(lines) = board.take_changed() {
            self.progress.report(&lines);
        }
        self.progress.finish();

        let mut stats = MigrationStats::default();
        for source in &per_source {
            stats.merge(source);
        }
        stats.duration_secs = start.elapsed().as_secs_f64();

        info!(
            "Migration complete: {} commits, {} events committed, {} skipped in {:.2}s ({:.0} events/sec)",
            stats.commits,
            stats.events_committed,
            stats.events_skipped,
            stats.duration_secs,
            stats.throughput()
        );

        Ok(stats)
    }

    async fn migrate_source(
        &self,
        slot: usize,
        source: &Source,
        board: &ProgressBoard,
    ) -> Result<MigrationStats> {
        let name = source.event_store_name();
        let mut stats = MigrationStats {
            sources: 1,
            ..MigrationStats::default()
        };

        let mut commits = source.commits();
        while let Some(envelope) = commits.try_next().await? {
            let report = self
                .commit_and_report(
                    envelope.tenant,
                    &envelope.commit,
                    envelope.event_count,
                    envelope.event_index,
                )
                .await?;

            stats.record(&report);
            board.update(slot, progress_label(name, report.progress));
        }

        board.update(slot, done_label(name));
        info!(
            event_store = name,
            tenant = %source.tenant(),
            commits = stats.commits,
            events = stats.events_committed,
            "Finished migrating event store"
        );

        Ok(stats)
    }

    /// Converts one commit, writes it to the destination and returns the
    /// progress of its source.
    ///
    /// `event_count` is the number of events in the whole source and
    /// `event_index` the number of events in the commits before this one.
    /// A commit whose events are all dropped by the modifier is not written,
    /// but still counts towards progress.
    ///
    /// # Errors
    ///
    /// Conversion errors and every refused or failed destination commit. The
    /// version tracker is only advanced after the destination confirmed the
    /// commit.
    pub async fn commit_and_report(
        &self,
        tenant: Guid,
        commit: &LegacyCommit,
        event_count: u64,
        event_index: u64,
    ) -> Result<CommitReport> {
        let event_store = self.event_store_for(tenant, commit);
        let events = self.converter.convert_events(&commit.events)?;
        let read = commit.event_count();

        let committed = if events.is_empty() {
            debug!(
                commit = commit.id,
                events = read,
                "No events left to commit after conversion"
            );
            0
        } else {
            self.commit_events(&event_store, tenant, commit, events).await?
        };

        Ok(CommitReport {
            progress: progress_fraction(event_index + read as u64, event_count),
            committed_events: committed,
            skipped_events: read - committed,
        })
    }

    async fn commit_events(
        &self,
        event_store: &TenantEventStore,
        tenant: Guid,
        commit: &LegacyCommit,
        events: Vec<ConvertedEvent>,
    ) -> Result<usize> {
        let count = events.len();
        let expected_version =
            self.versions
                .expected_version_for(tenant, commit.aggregate_root, commit.event_source_id);

        let uncommitted = UncommittedAggregateEvents {
            event_source: commit.event_source_id,
            aggregate_root: commit.aggregate_root,
            expected_version,
            events: events.into_iter().map(Into::into).collect(),
        };

        let confirmed = event_store
            .commit_for_aggregate(uncommitted)
            .await
            .map_err(|e| {
                error!(
                    commit = commit.id,
                    tenant = %tenant,
                    event_source = %commit.event_source_id,
                    expected_version = %expected_version,
                    "Commit failed: {}",
                    e
                );
                e
            })?;

        let version = self.versions.increment_version_for(
            tenant,
            commit.aggregate_root,
            commit.event_source_id,
            count as u64,
        )?;

        if let Some(confirmed) = confirmed {
            if confirmed != version {
                warn!(
                    commit = commit.id,
                    event_source = %commit.event_source_id,
                    "Destination reports aggregate version {}, tracker is at {}",
                    confirmed,
                    version
                );
            }
        }

        Ok(count)
    }

    /// Destination handle carrying the execution context of the commit's
    /// first event.
    fn event_store_for(&self, tenant: Guid, commit: &LegacyCommit) -> TenantEventStore {
        let event_store = self.client.for_tenant(tenant);
        match commit.events.first() {
            Some(first) => event_store
                .with_correlation(first.correlation_id)
                .with_environment(first.original_context.environment.clone())
                .with_claims(first.original_context.claims.iter().map(claim).collect()),
            None => event_store
                .with_correlation(commit.correlation_id)
                .with_environment(self.client.environment()),
        }
    }
}

fn claim(legacy: &LegacyClaim) -> Claim {
    Claim {
        key: legacy.name.clone(),
        value: legacy.value.clone(),
        value_type: legacy.value_type.clone(),
    }
}

/// `handled / total`, 1.0 for an empty source, never above 1.0.
fn progress_fraction(handled: u64, total: u64) -> f64 {
    if total == 0 {
        return 1.0;
    }
    (handled as f64 / total as f64).min(1.0)
}

#[cfg(test)]
#[path = "migrator_tests.rs"]
mod tests;
