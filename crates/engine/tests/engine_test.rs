//! Integration tests for the sync and inactivity paths over the in-memory
//! store, with in-process fakes for the provider and the mail transport.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};

use cfwatch_core::{
    ContestResult, EntityId, EntityUpdate, MemoryStore, NewEntity, Profile, ReminderStatus,
    Store, SubmissionRecord, TrackerError,
};
use cfwatch_engine::{
    BatchEntryOutcome, EntitySyncOutcome, InactivityDetector, ReminderOutcome, SyncOrchestrator,
    SyncOutcome,
};
use cfwatch_fetch::{ActivitySource, FetchError, FetchedActivity, RateGovernor};
use cfwatch_notify::{Mailer, Notification, NotificationDispatcher, NotifyError};

// ── Fakes ────────────────────────────────────────────────────────────

#[derive(Clone)]
enum Reply {
    Ok(FetchedActivity),
    NotFound,
    Upstream(String),
}

#[derive(Default)]
struct FakeSource {
    replies: Mutex<HashMap<String, Reply>>,
    calls: AtomicUsize,
    delay: Mutex<Duration>,
}

impl FakeSource {
    fn reply(&self, handle: &str, reply: Reply) {
        self.replies.lock().unwrap().insert(handle.to_string(), reply);
    }

    fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActivitySource for FakeSource {
    async fn fetch_all(&self, handle: &str) -> Result<FetchedActivity, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let reply = self.replies.lock().unwrap().get(handle).cloned();
        match reply {
            Some(Reply::Ok(activity)) => Ok(activity),
            Some(Reply::NotFound) | None => Err(FetchError::NotFound(handle.to_string())),
            Some(Reply::Upstream(msg)) => Err(FetchError::upstream("user.rating", msg)),
        }
    }
}

/// Every fetch takes three turns at a shared governor, like the real client.
/// Fetches for `held` wait until the test calls `release`.
struct GatedSource {
    governor: RateGovernor,
    held: String,
    gate: tokio::sync::Notify,
    in_flight: Mutex<HashMap<String, usize>>,
    max_in_flight: AtomicUsize,
    fetches: Mutex<HashMap<String, usize>>,
}

impl GatedSource {
    fn new(interval: Duration, held: &str) -> Self {
        Self {
            governor: RateGovernor::new(interval),
            held: held.to_string(),
            gate: tokio::sync::Notify::new(),
            in_flight: Mutex::new(HashMap::new()),
            max_in_flight: AtomicUsize::new(0),
            fetches: Mutex::new(HashMap::new()),
        }
    }

    fn release(&self) {
        self.gate.notify_one();
    }

    fn started(&self, handle: &str) -> bool {
        self.fetches.lock().unwrap().contains_key(handle)
    }

    fn fetches(&self, handle: &str) -> usize {
        self.fetches.lock().unwrap().get(handle).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ActivitySource for GatedSource {
    async fn fetch_all(&self, handle: &str) -> Result<FetchedActivity, FetchError> {
        *self.fetches.lock().unwrap().entry(handle.to_string()).or_default() += 1;
        let now = {
            let mut in_flight = self.in_flight.lock().unwrap();
            let n = in_flight.entry(handle.to_string()).or_default();
            *n += 1;
            *n
        };
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if handle == self.held {
            self.gate.notified().await;
        }
        for _ in 0..3 {
            self.governor.acquire().await;
        }

        *self.in_flight.lock().unwrap().entry(handle.to_string()).or_default() -= 1;
        match recent(handle) {
            Reply::Ok(activity) => Ok(activity),
            _ => Err(FetchError::NotFound(handle.to_string())),
        }
    }
}

#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingMailer {
    fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, notification: &Notification) -> Result<Option<String>, NotifyError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push(notification.clone());
        Ok(Some(format!("<{}@test>", sent.len())))
    }
    async fn verify(&self) -> Result<(), NotifyError> {
        Ok(())
    }
    fn channel_name(&self) -> &str {
        "recording"
    }
}

// ── Harness ──────────────────────────────────────────────────────────

struct Harness {
    store: Arc<MemoryStore>,
    source: Arc<FakeSource>,
    mailer: Arc<RecordingMailer>,
    detector: Arc<InactivityDetector>,
    orchestrator: SyncOrchestrator,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let source = Arc::new(FakeSource::default());
        let mailer = Arc::new(RecordingMailer::default());
        let dispatcher = Arc::new(NotificationDispatcher::new(mailer.clone()));
        let detector = Arc::new(
            InactivityDetector::new(store.clone(), dispatcher).with_pause(Duration::ZERO),
        );
        let orchestrator = SyncOrchestrator::new(store.clone(), source.clone(), detector.clone())
            .with_lease(Duration::from_secs(15 * 60));
        Self {
            store,
            source,
            mailer,
            detector,
            orchestrator,
        }
    }

    async fn register(&self, handle: &str, reminders: bool) -> EntityId {
        let mut new = NewEntity::new(format!("Student {handle}"), handle)
            .with_email(format!("{handle}@example.com"));
        new.reminders_enabled = reminders;
        self.store.insert_entity(new).await.unwrap().id
    }
}

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn contest(at: i64, new_rating: i32) -> ContestResult {
    ContestResult {
        contest_id: at,
        contest_name: format!("Round {at}"),
        rank: 10,
        old_rating: 0,
        new_rating,
        rated_at: ts(at),
    }
}

fn accepted(at: DateTime<Utc>) -> SubmissionRecord {
    SubmissionRecord {
        id: at.timestamp(),
        problem_id: "1520A".into(),
        verdict: Some("OK".into()),
        submitted_at: at,
    }
}

fn activity(handle: &str, contests: Vec<ContestResult>, submissions: Vec<SubmissionRecord>) -> Reply {
    Reply::Ok(FetchedActivity {
        profile: Profile {
            handle: handle.to_string(),
            rating: None,
            max_rating: None,
            rank: None,
        },
        contests,
        submissions,
    })
}

fn recent(handle: &str) -> Reply {
    activity(
        handle,
        vec![contest(100, 1500)],
        vec![accepted(Utc::now() - ChronoDuration::days(1))],
    )
}

fn stale(handle: &str, days: i64) -> Reply {
    activity(
        handle,
        vec![contest(100, 1500)],
        vec![accepted(Utc::now() - ChronoDuration::days(days))],
    )
}

// ── Sync ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn sync_commits_snapshot_and_derived_ratings() {
    let h = Harness::new();
    let id = h.register("ada", true).await;
    h.source.reply(
        "ada",
        activity(
            "ada",
            vec![contest(300, 1400), contest(100, 1500), contest(200, 1800)],
            vec![accepted(Utc::now() - ChronoDuration::hours(3))],
        ),
    );

    let outcome = h.orchestrator.sync_entity(id, false).await.unwrap();
    let report = match outcome {
        SyncOutcome::Synced(r) => r,
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(report.current_rating, 1400);
    assert_eq!(report.max_rating, 1800);
    assert_eq!(report.contests, 3);
    assert!(!report.inactivity.unwrap().is_inactive);

    let entity = h.store.get_entity(id).await.unwrap().unwrap();
    assert!(!entity.sync_in_progress);
    assert!(entity.sync_started_at.is_none());
    assert!(entity.last_synced_at.is_some());
    assert_eq!(entity.current_rating, 1400);

    let snapshot = h.store.get_snapshot(id).await.unwrap().unwrap();
    assert_eq!(snapshot.contests.len(), 3);
    assert_eq!(snapshot.submissions.len(), 1);
}

#[tokio::test]
async fn unknown_entity_is_not_found() {
    let h = Harness::new();
    let missing = uuid::Uuid::new_v4();
    let err = h.orchestrator.sync_entity(missing, false).await.unwrap_err();
    assert_eq!(err, TrackerError::EntityNotFound(missing));
    assert_eq!(h.source.calls(), 0);
}

#[tokio::test]
async fn concurrent_syncs_are_single_flight() {
    let h = Harness::new();
    let id = h.register("ada", true).await;
    h.source.reply("ada", recent("ada"));
    h.source.set_delay(Duration::from_millis(100));

    let (a, b) = tokio::join!(
        h.orchestrator.sync_entity(id, false),
        h.orchestrator.sync_entity(id, false)
    );
    let outcomes = [a.unwrap(), b.unwrap()];
    let synced = outcomes
        .iter()
        .filter(|o| matches!(o, SyncOutcome::Synced(_)))
        .count();
    let skipped = outcomes
        .iter()
        .filter(|o| matches!(o, SyncOutcome::Skipped { .. }))
        .count();
    assert_eq!((synced, skipped), (1, 1));
    assert_eq!(h.source.calls(), 1);
}

#[tokio::test]
async fn held_lease_skips_unless_forced() {
    let h = Harness::new();
    let id = h.register("ada", true).await;
    h.source.reply("ada", recent("ada"));

    h.store
        .try_acquire_sync(id, Utc::now(), ChronoDuration::minutes(15), false)
        .await
        .unwrap()
        .unwrap();

    let skipped = h.orchestrator.sync_entity(id, false).await.unwrap();
    assert_eq!(skipped, SyncOutcome::Skipped { entity_id: id });
    assert_eq!(h.source.calls(), 0);

    let forced = h.orchestrator.sync_entity(id, true).await.unwrap();
    assert!(matches!(forced, SyncOutcome::Synced(_)));
    assert!(!h.store.get_entity(id).await.unwrap().unwrap().sync_in_progress);
}

#[tokio::test]
async fn abandoned_lease_is_reclaimed() {
    let h = Harness::new();
    let id = h.register("ada", true).await;
    h.source.reply("ada", recent("ada"));

    let long_ago = Utc::now() - ChronoDuration::minutes(20);
    h.store
        .try_acquire_sync(id, long_ago, ChronoDuration::minutes(15), false)
        .await
        .unwrap()
        .unwrap();

    let outcome = h.orchestrator.sync_entity(id, false).await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Synced(_)));
}

#[tokio::test]
async fn failed_fetch_releases_lease_and_keeps_old_data() {
    let h = Harness::new();
    let id = h.register("ada", true).await;
    h.source.reply("ada", recent("ada"));
    h.orchestrator.sync_entity(id, false).await.unwrap();
    let before = h.store.get_snapshot(id).await.unwrap().unwrap();

    h.source
        .reply("ada", Reply::Upstream("Call limit exceeded".to_string()));
    let err = h.orchestrator.sync_entity(id, false).await.unwrap_err();
    match err {
        TrackerError::Upstream(msg) => assert!(msg.contains("Call limit exceeded"), "{msg}"),
        other => panic!("unexpected {other:?}"),
    }

    let entity = h.store.get_entity(id).await.unwrap().unwrap();
    assert!(!entity.sync_in_progress);
    assert_eq!(entity.current_rating, 1500);
    assert_eq!(h.store.get_snapshot(id).await.unwrap().unwrap(), before);
}

#[tokio::test]
async fn unknown_handle_is_handle_not_found() {
    let h = Harness::new();
    let id = h.register("ghost", true).await;
    h.source.reply("ghost", Reply::NotFound);

    let err = h.orchestrator.sync_entity(id, false).await.unwrap_err();
    assert_eq!(err, TrackerError::HandleNotFound("ghost".into()));
    assert!(!h.store.get_entity(id).await.unwrap().unwrap().sync_in_progress);
    assert!(h.store.get_snapshot(id).await.unwrap().is_none());
}

#[tokio::test]
async fn sync_all_captures_partial_failures() {
    let h = Harness::new();
    let ok = h.register("ok", true).await;
    let broken = h.register("broken", true).await;
    let ghost = h.register("ghost", true).await;
    h.source.reply("ok", recent("ok"));
    h.source.reply("broken", Reply::Upstream("boom".into()));
    h.source.reply("ghost", Reply::NotFound);

    let report = h.orchestrator.sync_all().await.unwrap();
    assert_eq!(report.summary.total, 3);
    assert_eq!(report.summary.synced, 1);
    assert_eq!(report.summary.failed, 2);

    let by_id: HashMap<_, _> = report.results.iter().map(|r| (r.entity_id, &r.outcome)).collect();
    assert!(matches!(by_id[&ok], EntitySyncOutcome::Synced { current_rating: 1500, .. }));
    assert!(matches!(by_id[&broken], EntitySyncOutcome::Failed { .. }));
    assert!(matches!(by_id[&ghost], EntitySyncOutcome::Failed { error } if error.contains("ghost")));

    // Only entities that synced feed the inactivity pass.
    assert_eq!(report.inactivity.summary.total, 1);
    assert_eq!(report.inactivity.entries[0].entity_id, ok);

    let schedule = h.store.load_schedule().await.unwrap().unwrap();
    assert_eq!(schedule.last_global_run_at, Some(report.finished_at));
}

#[tokio::test]
async fn sync_all_with_one_upstream_failure_keeps_the_rest_fresh() {
    let h = Harness::new();
    let first = h.register("first", true).await;
    let second = h.register("second", true).await;
    let third = h.register("third", true).await;
    h.source.reply("first", recent("first"));
    h.source.reply("second", Reply::Upstream("Internal Server Error".into()));
    h.source.reply("third", recent("third"));

    let report = h.orchestrator.sync_all().await.unwrap();
    assert_eq!(report.summary.total, 3);
    assert_eq!(report.summary.synced, 2);
    assert_eq!(report.summary.failed, 1);

    let failed: Vec<_> = report
        .results
        .iter()
        .filter(|r| matches!(r.outcome, EntitySyncOutcome::Failed { .. }))
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].entity_id, second);

    for id in [first, third] {
        let entity = h.store.get_entity(id).await.unwrap().unwrap();
        let synced_at = entity.last_synced_at.expect("synced entity has a sync time");
        assert!(synced_at >= report.started_at, "{synced_at} < {}", report.started_at);
        assert!(!entity.sync_in_progress);
    }
    let broken = h.store.get_entity(second).await.unwrap().unwrap();
    assert!(broken.last_synced_at.is_none());
    assert!(!broken.sync_in_progress);
}

#[tokio::test]
async fn queued_entities_hold_no_lease_during_global_sync() {
    let store = Arc::new(MemoryStore::new());
    for i in 0..6 {
        let new = NewEntity::new(format!("Student {i}"), format!("h{i}"));
        store.insert_entity(new).await.unwrap();
    }
    // The batch walks entities in list order.
    let order = store.list_entities().await.unwrap();
    let (head, last) = (&order[0], &order[5]);

    let source = Arc::new(GatedSource::new(Duration::from_millis(20), &head.handle));
    let dispatcher = Arc::new(NotificationDispatcher::new(Arc::new(RecordingMailer::default())));
    let detector = Arc::new(
        InactivityDetector::new(store.clone(), dispatcher).with_pause(Duration::ZERO),
    );
    let orchestrator = Arc::new(
        SyncOrchestrator::new(store.clone(), source.clone(), detector)
            .with_lease(Duration::from_secs(1))
            .with_concurrency(1),
    );

    let global = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.sync_all().await }
    });

    // The head entity is stuck at the gate and holds the only slot.
    for _ in 0..200 {
        if source.started(&head.handle) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(source.started(&head.handle));
    // Outlive the lease while the rest of the batch is still queued.
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert!(!source.started(&last.handle));
    let queued = store.get_entity(last.id).await.unwrap().unwrap();
    assert!(!queued.sync_in_progress, "lease taken while still queued");

    let manual = orchestrator.sync_entity(last.id, false).await.unwrap();
    assert!(matches!(manual, SyncOutcome::Synced(_)));

    source.release();
    let report = global.await.unwrap().unwrap();
    assert_eq!(report.summary.total, 6);
    assert_eq!(report.summary.failed, 0);
    assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
    // Once by hand, once by the batch after the manual sync released it.
    assert_eq!(source.fetches(&last.handle), 2);
    for entity in &order {
        assert!(!store.get_entity(entity.id).await.unwrap().unwrap().sync_in_progress);
    }
}

// ── Inactivity ───────────────────────────────────────────────────────

#[tokio::test]
async fn inactive_entity_gets_one_reminder_per_window() {
    let h = Harness::new();
    let id = h.register("ada", true).await;
    h.source.reply("ada", stale("ada", 10));

    let first = h.orchestrator.sync_entity(id, false).await.unwrap();
    let SyncOutcome::Synced(first) = first else {
        panic!("expected sync")
    };
    let inactivity = first.inactivity.unwrap();
    assert!(inactivity.is_inactive);
    assert_eq!(inactivity.inactive_days, Some(10));
    assert!(inactivity.reminder.is_sent());

    let second = h.orchestrator.sync_entity(id, false).await.unwrap();
    let SyncOutcome::Synced(second) = second else {
        panic!("expected sync")
    };
    assert_eq!(second.inactivity.unwrap().reminder, ReminderOutcome::Throttled);

    assert_eq!(h.mailer.count(), 1);
    let entity = h.store.get_entity(id).await.unwrap().unwrap();
    assert_eq!(entity.reminder_count, 1);
    assert!(entity.last_reminder_sent_at.is_some());

    let history = h.detector.reminder_history(id, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, ReminderStatus::Sent);
    assert_eq!(history[0].inactive_days, Some(10));
    assert_eq!(history[0].message_id.as_deref(), Some("<1@test>"));
}

#[tokio::test]
async fn throttle_window_is_twenty_four_hours() {
    let h = Harness::new();
    let id = h.register("ada", true).await;
    let now = Utc::now();
    let subs = vec![accepted(now - ChronoDuration::days(30))];

    let r = h.detector.check_entity_at(id, &subs, now).await.unwrap();
    assert!(r.reminder.is_sent());

    let r = h
        .detector
        .check_entity_at(id, &subs, now + ChronoDuration::hours(23))
        .await
        .unwrap();
    assert_eq!(r.reminder, ReminderOutcome::Throttled);

    let r = h
        .detector
        .check_entity_at(id, &subs, now + ChronoDuration::hours(25))
        .await
        .unwrap();
    assert!(r.reminder.is_sent());
    assert_eq!(h.mailer.count(), 2);
}

#[tokio::test]
async fn seven_day_boundary_on_both_sides() {
    let h = Harness::new();
    let id = h.register("ada", false).await;
    let now = Utc::now();

    let just_short = vec![accepted(now - ChronoDuration::days(7) + ChronoDuration::seconds(1))];
    let r = h.detector.check_entity_at(id, &just_short, now).await.unwrap();
    assert!(!r.is_inactive);
    assert_eq!(r.inactive_days, Some(0));
    assert_eq!(r.reminder, ReminderOutcome::NotNeeded);

    let exactly = vec![accepted(now - ChronoDuration::days(7))];
    let r = h.detector.check_entity_at(id, &exactly, now).await.unwrap();
    assert!(r.is_inactive);
    assert_eq!(r.inactive_days, Some(7));
    assert_eq!(r.reminder, ReminderOutcome::Disabled);
}

#[tokio::test]
async fn zero_submissions_with_reminders_on_and_off() {
    let h = Harness::new();
    let on = h.register("on", true).await;
    let off = h.register("off", false).await;

    let r = h.detector.check_entity(on, &[]).await.unwrap();
    assert!(r.is_inactive);
    assert_eq!(r.inactive_days, None);
    match &r.reminder {
        ReminderOutcome::Sent { record } => assert_eq!(record.inactive_days, None),
        other => panic!("unexpected {other:?}"),
    }

    let r = h.detector.check_entity(off, &[]).await.unwrap();
    assert!(r.is_inactive);
    assert_eq!(r.reminder, ReminderOutcome::Disabled);

    assert_eq!(h.mailer.count(), 1);
    assert!(h.mailer.sent.lock().unwrap()[0].body.contains("any accepted submission"));
}

#[tokio::test]
async fn missing_email_is_logged_as_failed_and_throttles() {
    let h = Harness::new();
    let id = h
        .store
        .insert_entity(NewEntity::new("No Mail", "nomail"))
        .await
        .unwrap()
        .id;
    let now = Utc::now();

    let r = h.detector.check_entity_at(id, &[], now).await.unwrap();
    match r.reminder {
        ReminderOutcome::Failed { record } => {
            assert_eq!(record.status, ReminderStatus::Failed);
            assert!(record.error.unwrap().contains("no email"));
        }
        other => panic!("unexpected {other:?}"),
    }
    let entity = h.store.get_entity(id).await.unwrap().unwrap();
    assert_eq!(entity.reminder_count, 0);

    let r = h
        .detector
        .check_entity_at(id, &[], now + ChronoDuration::hours(1))
        .await
        .unwrap();
    assert_eq!(r.reminder, ReminderOutcome::Throttled);
    assert_eq!(h.mailer.count(), 0);
}

#[tokio::test]
async fn detection_time_is_stamped_on_the_edge_only() {
    let h = Harness::new();
    let id = h.register("ada", false).await;
    let t0 = Utc::now();
    let old = vec![accepted(t0 - ChronoDuration::days(9))];

    h.detector.check_entity_at(id, &old, t0).await.unwrap();
    let e = h.store.get_entity(id).await.unwrap().unwrap();
    assert!(e.is_inactive);
    assert_eq!(e.inactivity_detected_at, Some(t0));

    h.detector
        .check_entity_at(id, &old, t0 + ChronoDuration::days(1))
        .await
        .unwrap();
    let e = h.store.get_entity(id).await.unwrap().unwrap();
    assert_eq!(e.inactivity_detected_at, Some(t0));

    let fresh = vec![accepted(t0 + ChronoDuration::days(2))];
    h.detector
        .check_entity_at(id, &fresh, t0 + ChronoDuration::days(2))
        .await
        .unwrap();
    let e = h.store.get_entity(id).await.unwrap().unwrap();
    assert!(!e.is_inactive);
    assert_eq!(e.inactivity_detected_at, None);
    assert_eq!(e.last_submission_at, Some(t0 + ChronoDuration::days(2)));
}

#[tokio::test]
async fn check_unknown_entity_is_not_found() {
    let h = Harness::new();
    let missing = uuid::Uuid::new_v4();
    let err = h.detector.check_entity(missing, &[]).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(h.detector.reminder_history(missing, 5).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn batch_check_reports_errors_and_pauses_after_inactive() {
    let store = Arc::new(MemoryStore::new());
    let dispatcher = Arc::new(NotificationDispatcher::new(Arc::new(RecordingMailer::default())));
    let detector = InactivityDetector::new(store.clone(), dispatcher)
        .with_pause(Duration::from_millis(60));

    let a = store.insert_entity(NewEntity::new("A", "a")).await.unwrap().id;
    let b = store.insert_entity(NewEntity::new("B", "b")).await.unwrap().id;
    let missing = uuid::Uuid::new_v4();

    let started = std::time::Instant::now();
    let report = detector
        .batch_check(vec![
            (a, vec![]),
            (missing, vec![]),
            (b, vec![accepted(Utc::now())]),
        ])
        .await;

    // Only the one inactive entity pauses.
    assert!(started.elapsed() >= Duration::from_millis(60));
    assert_eq!(report.summary.total, 3);
    assert_eq!(report.summary.inactive_count, 1);
    assert_eq!(report.summary.error_count, 1);
    assert_eq!(report.summary.success_rate, 66.7);
    assert!(matches!(report.entries[1].outcome, BatchEntryOutcome::Error { .. }));
}

#[tokio::test]
async fn stats_aggregate_entities_and_reminders() {
    let h = Harness::new();
    let a = h.register("a", true).await;
    let _b = h.register("b", false).await;
    let c = h.register("c", true).await;
    let _d = h.register("d", true).await;

    h.detector.check_entity(a, &[]).await.unwrap();
    h.detector
        .check_entity(c, &[accepted(Utc::now())])
        .await
        .unwrap();

    let stats = h.detector.stats().await.unwrap();
    assert_eq!(stats.total_entities, 4);
    assert_eq!(stats.inactive_entities, 1);
    assert_eq!(stats.active_entities, 3);
    assert_eq!(stats.reminders_disabled, 1);
    assert_eq!(stats.reminders_sent, 1);
    assert_eq!(stats.reminders_failed, 0);
    assert_eq!(stats.inactivity_rate, 25.0);

    let inactive = h.detector.inactive_entities().await.unwrap();
    assert_eq!(inactive.len(), 1);
    assert_eq!(inactive[0].id, a);
}

#[tokio::test]
async fn stats_on_empty_store() {
    let h = Harness::new();
    let stats = h.detector.stats().await.unwrap();
    assert_eq!(stats.total_entities, 0);
    assert_eq!(stats.inactivity_rate, 0.0);
}

// ── Races between the two jobs ───────────────────────────────────────

#[tokio::test]
async fn concurrent_checks_send_a_single_reminder() {
    let h = Harness::new();
    let id = h.register("ada", true).await;

    let (a, b) = tokio::join!(h.detector.check_entity(id, &[]), h.detector.check_entity(id, &[]));
    let reminders = [a.unwrap().reminder, b.unwrap().reminder];
    assert_eq!(reminders.iter().filter(|r| r.is_sent()).count(), 1);
    assert!(reminders.contains(&ReminderOutcome::Throttled));
    assert_eq!(h.mailer.count(), 1);
    assert_eq!(h.detector.reminder_history(id, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn stored_pass_skips_entities_mid_sync() {
    let h = Harness::new();
    let id = h.register("ada", false).await;
    h.source.reply("ada", stale("ada", 12));
    h.orchestrator.sync_entity(id, false).await.unwrap();
    h.store
        .update_entity(id, EntityUpdate::RemindersEnabled(true))
        .await
        .unwrap();

    h.source.set_delay(Duration::from_millis(150));
    let (sync, pass) = tokio::join!(h.orchestrator.sync_entity(id, false), async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        h.detector.check_stored().await
    });

    assert!(matches!(sync.unwrap(), SyncOutcome::Synced(_)));
    assert_eq!(pass.unwrap().summary.total, 0);
    assert_eq!(h.mailer.count(), 1);

    // Once the sync is done the stored pass sees the entity but is throttled.
    let pass = h.detector.check_stored().await.unwrap();
    assert_eq!(pass.summary.total, 1);
    match &pass.entries[0].outcome {
        BatchEntryOutcome::Checked(r) => assert_eq!(r.reminder, ReminderOutcome::Throttled),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(h.mailer.count(), 1);
}

#[tokio::test]
async fn stored_pass_ignores_never_synced_entities() {
    let h = Harness::new();
    h.register("fresh", true).await;
    let report = h.detector.check_stored().await.unwrap();
    assert_eq!(report.summary.total, 0);
    assert_eq!(report.summary.success_rate, 100.0);
    assert_eq!(h.mailer.count(), 0);
}

#[tokio::test]
async fn stored_pass_reads_snapshots_that_commit_mid_pass() {
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(FakeSource::default());
    let mailer = Arc::new(RecordingMailer::default());
    let dispatcher = Arc::new(NotificationDispatcher::new(mailer.clone()));
    let detector = Arc::new(
        InactivityDetector::new(store.clone(), dispatcher).with_pause(Duration::from_millis(300)),
    );
    let orchestrator = SyncOrchestrator::new(store.clone(), source.clone(), detector.clone());

    store.insert_entity(NewEntity::new("First", "first")).await.unwrap();
    store.insert_entity(NewEntity::new("Second", "second")).await.unwrap();
    // The pass walks entities in list order.
    let order = store.list_entities().await.unwrap();
    let (head, tail) = (order[0].clone(), order[1].clone());
    for entity in &order {
        source.reply(&entity.handle, stale(&entity.handle, 10));
        orchestrator.sync_entity(entity.id, false).await.unwrap();
    }
    assert!(store.get_entity(tail.id).await.unwrap().unwrap().is_inactive);

    // While the pass pauses after the head entity, the tail becomes active again.
    source.reply(&tail.handle, recent(&tail.handle));
    let (pass, resync) = tokio::join!(detector.check_stored(), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        orchestrator.sync_entity(tail.id, false).await
    });
    assert!(matches!(resync.unwrap(), SyncOutcome::Synced(_)));

    let pass = pass.unwrap();
    assert_eq!(pass.summary.total, 2);
    assert_eq!(pass.entries[0].entity_id, head.id);
    let entity = store.get_entity(tail.id).await.unwrap().unwrap();
    assert!(!entity.is_inactive);
    assert!(entity.inactivity_detected_at.is_none());
}
