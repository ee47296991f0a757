//! Tests for the migrator.

use super::*;
use crate::connectors::InMemoryLegacyStore;
use crate::converter::{Diagnostics, EventType};
use crate::destination::{CommitResponse, EventStore, ExecutionContext, UncommittedAggregateEvents};
use crate::destination::memory::InMemoryEventStore;
use crate::error::Error;
use crate::legacy::fixtures::{commit_document, event_document};
use crate::progress::{progress_label, started_label, MemoryProgressSink, ProgressBoard, ProgressSink};
use crate::versions::{AggregateKey, AggregateRootVersion};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;

struct Stream {
    event_source: Guid,
    aggregate_root: Guid,
}

impl Stream {
    fn new() -> Self {
        Self {
            event_source: Guid::new_random(),
            aggregate_root: Guid::new_random(),
        }
    }

    fn commit(&self, id: i64, tenant: Guid, events: usize) -> Value {
        let documents = (0..events)
            .map(|i| {
                event_document(
                    Guid::new_random(),
                    Guid::new_random(),
                    self.event_source,
                    self.aggregate_root,
                    tenant,
                    json!({"Position_In_Commit": i}),
                )
            })
            .collect();
        commit_document(id, self.event_source, self.aggregate_root, documents)
    }

    fn key(&self, tenant: Guid) -> AggregateKey {
        AggregateKey::new(tenant, self.aggregate_root, self.event_source)
    }
}

struct Harness {
    legacy: Arc<InMemoryLegacyStore>,
    destination: Arc<InMemoryEventStore>,
    progress: Arc<MemoryProgressSink>,
}

impl Harness {
    fn new() -> Self {
        Self {
            legacy: Arc::new(InMemoryLegacyStore::new()),
            destination: Arc::new(InMemoryEventStore::new()),
            progress: Arc::new(MemoryProgressSink::new()),
        }
    }

    fn builder(&self) -> crate::builder::MigratorBuilder {
        Migrator::for_microservice(Guid::new_random())
            .with_event_store(self.destination.clone())
            .with_progress_sink(self.progress.clone())
            .with_batch_size(2)
    }

    fn migrator(&self, sources: &[(&str, Guid)]) -> Migrator {
        let mut builder = self.builder();
        for (name, tenant) in sources {
            builder = builder.with_source(self.legacy.clone(), |source| source.convert(name, *tenant));
        }
        builder.build().unwrap()
    }
}

#[tokio::test]
async fn test_versions_follow_commits() {
    let harness = Harness::new();
    let tenant = Guid::new_random();
    let stream = Stream::new();
    harness.legacy.insert_commits(
        "event_store",
        vec![stream.commit(1, tenant, 2), stream.commit(2, tenant, 2)],
    );

    let migrator = harness.migrator(&[("event_store", tenant)]);
    let stats = migrator.run().await.unwrap();

    let versions: Vec<_> = harness
        .destination
        .events()
        .iter()
        .map(|e| e.aggregate_version)
        .collect();
    assert_eq!(versions, vec![0, 1, 2, 3]);
    assert_eq!(
        migrator.aggregate_versions().version_of(&stream.key(tenant)),
        Some(AggregateRootVersion(4))
    );
    assert_eq!(harness.destination.stream_version(&stream.key(tenant)), AggregateRootVersion(4));

    assert_eq!(stats.sources, 1);
    assert_eq!(stats.commits, 2);
    assert_eq!(stats.events_read, 4);
    assert_eq!(stats.events_committed, 4);
    assert_eq!(stats.events_skipped, 0);
}

#[tokio::test]
async fn test_content_is_normalized_and_context_is_taken_from_first_event() {
    let harness = Harness::new();
    let tenant = Guid::new_random();
    let stream = Stream::new();
    let document = stream.commit(1, tenant, 2);
    harness.legacy.insert_commits("event_store", vec![document.clone()]);

    let migrator = harness.migrator(&[("event_store", tenant)]);
    migrator.run().await.unwrap();

    let commit = LegacyCommit::from_document(&document).unwrap();
    let stored = harness.destination.events();
    assert_eq!(stored.len(), 2);

    let first = &stored[0];
    assert_eq!(first.content, *json!({"positionInCommit": 0}).as_object().unwrap());
    assert_eq!(first.event_type.id, commit.events[0].event_artifact);
    assert!(!first.public);
    assert_eq!(first.execution_context.tenant_id, tenant);
    assert_eq!(first.execution_context.correlation_id, commit.events[0].correlation_id);
    assert_eq!(first.execution_context.environment, "Production");
    assert_eq!(first.execution_context.claims[0].key, "sub");
    // Both events go out in one commit with one context
    assert_eq!(stored[1].execution_context, first.execution_context);
}

#[tokio::test]
async fn test_modifier_dropping_every_event_skips_commit() {
    let harness = Harness::new();
    let tenant = Guid::new_random();
    let stream = Stream::new();
    let commit = LegacyCommit::from_document(&stream.commit(1, tenant, 3)).unwrap();

    let migrator = harness
        .builder()
        .with_event_modifier(
            |_: &mut Map<String, Value>,
             _: &EventType,
             _: Option<&str>,
             _: &Diagnostics|
             -> anyhow::Result<bool> { Ok(false) },
        )
        .build()
        .unwrap();

    let report = migrator.commit_and_report(tenant, &commit, 6, 0).await.unwrap();

    assert_eq!(report.committed_events, 0);
    assert_eq!(report.skipped_events, 3);
    assert!((report.progress - 0.5).abs() < f64::EPSILON);
    assert_eq!(harness.destination.event_count(), 0);
    assert_eq!(migrator.aggregate_versions().version_of(&stream.key(tenant)), None);
}

#[tokio::test]
async fn test_modifier_can_rewrite_content() {
    let harness = Harness::new();
    let tenant = Guid::new_random();
    let stream = Stream::new();
    let commit = LegacyCommit::from_document(&stream.commit(1, tenant, 2)).unwrap();

    let migrator = harness
        .builder()
        .with_event_modifier(
            |content: &mut Map<String, Value>,
             _: &EventType,
             _: Option<&str>,
             _: &Diagnostics|
             -> anyhow::Result<bool> {
                content.insert("migrated".to_string(), json!(true));
                Ok(content["positionInCommit"] == json!(1))
            },
        )
        .build()
        .unwrap();

    let report = migrator.commit_and_report(tenant, &commit, 2, 0).await.unwrap();
    assert_eq!(report.committed_events, 1);
    assert_eq!(report.skipped_events, 1);

    let stored = harness.destination.events();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].content["migrated"], json!(true));
    assert_eq!(stored[0].aggregate_version, 0);
    assert_eq!(
        migrator.aggregate_versions().version_of(&stream.key(tenant)),
        Some(AggregateRootVersion(1))
    );
}

#[tokio::test]
async fn test_modifier_error_fails_conversion() {
    let harness = Harness::new();
    let tenant = Guid::new_random();
    let commit = LegacyCommit::from_document(&Stream::new().commit(1, tenant, 1)).unwrap();

    let migrator = harness
        .builder()
        .with_event_modifier(
            |_: &mut Map<String, Value>,
             _: &EventType,
             _: Option<&str>,
             _: &Diagnostics|
             -> anyhow::Result<bool> { anyhow::bail!("unexpected event") },
        )
        .build()
        .unwrap();

    let result = migrator.commit_and_report(tenant, &commit, 1, 0).await;
    assert!(matches!(result, Err(Error::Conversion { .. })));
    assert_eq!(harness.destination.event_count(), 0);
}

#[tokio::test]
async fn test_conflict_stops_migration_and_keeps_tracker() {
    let harness = Harness::new();
    let tenant = Guid::new_random();
    let healthy = Stream::new();
    let conflicting = Stream::new();
    harness
        .destination
        .seed_stream(conflicting.key(tenant), AggregateRootVersion(5));
    harness.legacy.insert_commits(
        "event_store",
        vec![
            healthy.commit(1, tenant, 1),
            conflicting.commit(2, tenant, 2),
            healthy.commit(3, tenant, 1),
        ],
    );

    let migrator = harness.migrator(&[("event_store", tenant)]);
    let result = migrator.run().await;

    assert!(matches!(result, Err(Error::ConcurrencyConflict(_))));
    assert_eq!(harness.destination.event_count(), 1);
    assert_eq!(harness.destination.refused_commits(), 1);
    assert_eq!(
        migrator.aggregate_versions().version_of(&conflicting.key(tenant)),
        Some(AggregateRootVersion(0))
    );
    assert_eq!(
        migrator.aggregate_versions().version_of(&healthy.key(tenant)),
        Some(AggregateRootVersion(1))
    );
    assert!(harness.progress.is_finished());
}

#[tokio::test]
async fn test_seeded_versions_resume_a_migration() {
    let harness = Harness::new();
    let tenant = Guid::new_random();
    let stream = Stream::new();
    harness
        .destination
        .seed_stream(stream.key(tenant), AggregateRootVersion(3));
    harness
        .legacy
        .insert_commits("event_store", vec![stream.commit(4, tenant, 2)]);

    let versions = Arc::new(AggregateVersions::new());
    versions.seed(stream.key(tenant), AggregateRootVersion(3));

    let migrator = harness
        .builder()
        .with_aggregate_versions(versions.clone())
        .with_source(harness.legacy.clone(), |source| source.convert("event_store", tenant))
        .build()
        .unwrap();
    migrator.run().await.unwrap();

    assert_eq!(versions.version_of(&stream.key(tenant)), Some(AggregateRootVersion(5)));
    let stored: Vec<_> = harness
        .destination
        .events()
        .iter()
        .map(|e| e.aggregate_version)
        .collect();
    assert_eq!(stored, vec![3, 4]);
}

#[tokio::test]
async fn test_progress_starts_at_zero_and_ends_done() {
    let harness = Harness::new();
    let tenant = Guid::new_random();
    let stream = Stream::new();
    harness.legacy.insert_commits(
        "event_store",
        (1..=5).map(|id| stream.commit(id, tenant, 1)).collect(),
    );

    let migrator = harness.migrator(&[("event_store", tenant)]);
    migrator.run().await.unwrap();

    let snapshots = harness.progress.snapshots();
    assert_eq!(snapshots.first(), Some(&vec!["event_store 0%".to_string()]));
    assert_eq!(snapshots.last(), Some(&vec!["event_store Done!".to_string()]));
    assert!(harness.progress.is_finished());
}

#[tokio::test]
async fn test_progress_fractions_are_monotonic_and_complete() {
    let harness = Harness::new();
    let tenant = Guid::new_random();
    let stream = Stream::new();
    let migrator = harness.builder().build().unwrap();

    let sizes = [2_usize, 0, 3, 1];
    let total: usize = sizes.iter().sum();
    let mut index = 0;
    let mut fractions = Vec::new();
    for (id, size) in sizes.iter().enumerate() {
        let commit =
            LegacyCommit::from_document(&stream.commit(id as i64, tenant, *size)).unwrap();
        let report = migrator
            .commit_and_report(tenant, &commit, total as u64, index)
            .await
            .unwrap();
        fractions.push(report.progress);
        index += *size as u64;
    }

    assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(fractions.last().copied(), Some(1.0));
    assert_eq!(fractions.iter().filter(|f| **f == 1.0).count(), 1);
}

#[tokio::test]
async fn test_trailing_empty_commits_repeat_full_progress_once_on_board() {
    let harness = Harness::new();
    let tenant = Guid::new_random();
    let stream = Stream::new();
    let migrator = harness.builder().build().unwrap();

    let sizes = [2_usize, 1, 0, 0];
    let total: usize = sizes.iter().sum();
    let board = ProgressBoard::new(vec![started_label("event_store")]);
    assert!(board.take_changed().is_some());

    let mut index = 0;
    let mut fractions = Vec::new();
    let mut reported = Vec::new();
    for (id, size) in sizes.iter().enumerate() {
        let commit =
            LegacyCommit::from_document(&stream.commit(id as i64, tenant, *size)).unwrap();
        let report = migrator
            .commit_and_report(tenant, &commit, total as u64, index)
            .await
            .unwrap();
        fractions.push(report.progress);
        board.update(0, progress_label("event_store", report.progress));
        reported.extend(board.take_changed());
        index += *size as u64;
    }

    // Empty commits after the last event report 1.0 again
    assert_eq!(fractions[1..], [1.0, 1.0, 1.0]);
    // but the source line only changes to 100% once
    let full: Vec<_> = reported
        .iter()
        .filter(|lines| lines[0] == "event_store 100%")
        .collect();
    assert_eq!(full.len(), 1);
}

/// Destination that takes a while for every commit.
struct SlowEventStore {
    inner: Arc<InMemoryEventStore>,
    delay: Duration,
}

#[async_trait]
impl EventStore for SlowEventStore {
    fn store_type(&self) -> &'static str {
        "slow"
    }

    async fn commit_for_aggregate(
        &self,
        execution_context: &ExecutionContext,
        events: UncommittedAggregateEvents,
    ) -> crate::error::Result<CommitResponse> {
        tokio::time::sleep(self.delay).await;
        self.inner
            .commit_for_aggregate(execution_context, events)
            .await
    }
}

/// Records when each snapshot arrived and how many events were committed by then.
struct TimedProgressSink {
    start: tokio::time::Instant,
    destination: Arc<InMemoryEventStore>,
    reports: parking_lot::Mutex<Vec<(Duration, usize, Vec<String>)>>,
}

impl ProgressSink for TimedProgressSink {
    fn report(&self, lines: &[String]) {
        self.reports.lock().push((
            self.start.elapsed(),
            self.destination.event_count(),
            lines.to_vec(),
        ));
    }
}

#[tokio::test(start_paused = true)]
async fn test_progress_is_reported_at_most_once_per_interval() {
    let interval = Duration::from_secs(10);
    let tenant = Guid::new_random();
    let stream = Stream::new();
    let legacy = Arc::new(InMemoryLegacyStore::new().with_commits(
        "event_store",
        (1..=20).map(|id| stream.commit(id, tenant, 1)).collect(),
    ));
    let destination = Arc::new(InMemoryEventStore::new());
    let sink = Arc::new(TimedProgressSink {
        start: tokio::time::Instant::now(),
        destination: destination.clone(),
        reports: parking_lot::Mutex::new(Vec::new()),
    });

    let migrator = Migrator::for_microservice(Guid::new_random())
        .with_event_store(Arc::new(SlowEventStore {
            inner: destination.clone(),
            delay: Duration::from_secs(3),
        }))
        .with_progress_sink(sink.clone())
        .with_progress_interval(interval)
        .with_batch_size(5)
        .with_source(legacy, |source| source.convert("event_store", tenant))
        .build()
        .unwrap();

    migrator.run().await.unwrap();
    let elapsed = sink.start.elapsed();
    let reports = sink.reports.lock().clone();

    assert_eq!(elapsed, Duration::from_secs(60));
    let bound = (elapsed.as_secs() / interval.as_secs()) as usize + 2;
    assert!(reports.len() <= bound, "{} snapshots, bound {}", reports.len(), bound);
    // Intermediate snapshots were emitted while commits kept flowing
    assert!(reports.len() >= 4, "only {} snapshots", reports.len());

    let (first, rest) = reports.split_first().unwrap();
    assert_eq!(first.0, Duration::ZERO);
    assert_eq!(first.2, vec!["event_store 0%".to_string()]);

    // Ticks are spaced by the interval; only the final snapshot may come early
    let (last, ticks) = rest.split_last().unwrap();
    let mut previous = first.0;
    for (at, committed, _) in ticks {
        assert!(*at >= previous + interval, "tick at {:?} after {:?}", at, previous);
        // Commits are not held back until the tick
        assert!(*committed as u64 >= at.as_secs() / 3 - 1);
        previous = *at;
    }

    assert_eq!(last.1, 20);
    assert_eq!(last.2, vec!["event_store Done!".to_string()]);
    assert!(reports.windows(2).all(|w| w[0].1 <= w[1].1));
}

#[tokio::test]
async fn test_empty_source_completes() {
    let harness = Harness::new();
    harness.legacy.insert_commits("empty", vec![]);

    let migrator = harness.migrator(&[("empty", Guid::new_random())]);
    let stats = migrator.run().await.unwrap();

    assert_eq!(stats.commits, 0);
    assert_eq!(
        harness.progress.snapshots().last(),
        Some(&vec!["empty Done!".to_string()])
    );
}

#[tokio::test]
async fn test_sources_run_concurrently_into_their_tenants() {
    let harness = Harness::new();
    let (tenant_a, tenant_b) = (Guid::new_random(), Guid::new_random());
    let stream = Stream::new();
    harness
        .legacy
        .insert_commits("b_store", vec![stream.commit(1, tenant_b, 1)]);
    harness.legacy.insert_commits(
        "a_store",
        vec![stream.commit(1, tenant_a, 2), stream.commit(2, tenant_a, 1)],
    );

    let migrator = harness.migrator(&[("b_store", tenant_b), ("a_store", tenant_a)]);
    let stats = migrator.run().await.unwrap();

    assert_eq!(stats.sources, 2);
    assert_eq!(stats.events_committed, 4);
    // Same event source, different tenants: separate version streams
    assert_eq!(
        harness.destination.stream_version(&stream.key(tenant_a)),
        AggregateRootVersion(3)
    );
    assert_eq!(
        harness.destination.stream_version(&stream.key(tenant_b)),
        AggregateRootVersion(1)
    );
    assert_eq!(
        harness.progress.snapshots().last(),
        Some(&vec!["a_store Done!".to_string(), "b_store Done!".to_string()])
    );
}

#[tokio::test]
async fn test_commit_without_events_uses_commit_context() {
    let harness = Harness::new();
    let tenant = Guid::new_random();
    let commit = LegacyCommit::from_document(&Stream::new().commit(1, tenant, 0)).unwrap();
    let migrator = harness
        .builder()
        .with_environment("Staging")
        .build()
        .unwrap();

    let event_store = migrator.event_store_for(tenant, &commit);
    let context = event_store.execution_context();
    assert_eq!(context.correlation_id, commit.correlation_id);
    assert_eq!(context.environment, "Staging");
    assert!(context.claims.is_empty());

    let report = migrator.commit_and_report(tenant, &commit, 0, 0).await.unwrap();
    assert_eq!(report.progress, 1.0);
    assert_eq!(report.committed_events, 0);
}

#[test]
fn test_progress_fraction() {
    assert_eq!(progress_fraction(0, 0), 1.0);
    assert_eq!(progress_fraction(5, 10), 0.5);
    assert_eq!(progress_fraction(12, 10), 1.0);
}

#[test]
fn test_migration_stats_throughput() {
    let stats = MigrationStats {
        events_committed: 1000,
        duration_secs: 2.0,
        ..MigrationStats::default()
    };
    assert!((stats.throughput() - 500.0).abs() < 0.001);
    assert_eq!(MigrationStats::default().throughput(), 0.0);
}
