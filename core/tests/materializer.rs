//! Aggregation materializer integration tests: k-anonymity filtering,
//! replace-on-refresh semantics, and source failure handling.

use chrono::{TimeZone, Utc};
use crossrisk_core::changelog::{
    ChangeEvent, ChangeLogAdapter, ChangeOp, RecordSnapshot, SqliteChangeLog,
};
use crossrisk_core::clock::Clock;
use crossrisk_core::error::{CoreError, CoreResult};
use crossrisk_core::fraud::ActivityTier;
use crossrisk_core::job::{JobContext, RefreshJob};
use crossrisk_core::materializer::Materializer;
use crossrisk_core::scheduler::Scheduler;
use crossrisk_core::store::{Store, SEGMENT_TABLE};
use crossrisk_core::types::SourceId;

fn test_clock() -> Clock {
    Clock::fixed(Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap())
}

fn setup(tag: &str) -> (Store, SqliteChangeLog, Scheduler) {
    let store = Store::shared_memory(tag).unwrap();
    store.migrate().unwrap();
    let feed = SqliteChangeLog::new(store.reopen().unwrap());
    let sched = Scheduler::build(&store, test_clock()).unwrap();
    (store, feed, sched)
}

fn record(key: &str, score: f64, flags: i64, tier: ActivityTier) -> RecordSnapshot {
    RecordSnapshot {
        customer_key: key.to_string(),
        age_band: "25-34".to_string(),
        region: "West".to_string(),
        occupation_band: "Technology".to_string(),
        risk_score: score,
        fraud_flags: flags,
        activity_tier: tier,
    }
}

/// Push `n` members of one demographic group into both feeds.
fn seed_group(feed: &SqliteChangeLog, prefix: &str, n: usize, score_a: f64, score_b: f64) {
    let at = test_clock().now();
    for i in 0..n {
        let key = format!("{prefix}-{i}");
        feed.push(
            SourceId::Bank,
            ChangeOp::Insert,
            &record(&key, score_a, 0, ActivityTier::Low),
            at,
        )
        .unwrap();
        feed.push(
            SourceId::Insurance,
            ChangeOp::Insert,
            &record(&key, score_b, 0, ActivityTier::Low),
            at,
        )
        .unwrap();
    }
}

#[test]
fn group_of_three_is_published() {
    let (store, feed, mut sched) = setup("mat_three");
    seed_group(&feed, "c", 3, 40.0, 60.0);

    sched.run_wave().unwrap();

    let segments = store.published_segments().unwrap();
    assert_eq!(segments.len(), 1);
    let seg = &segments[0];
    assert_eq!(seg.record_count, 3);
    // 40*0.6 + 60*0.4 with no flags
    assert!((seg.composite_score - 48.0).abs() < 1e-9);
    assert_eq!(seg.risk_category.as_str(), "MEDIUM");
}

#[test]
fn undersized_group_is_dropped_entirely() {
    let (store, feed, mut sched) = setup("mat_undersized");
    seed_group(&feed, "c", 2, 40.0, 60.0);

    sched.run_wave().unwrap();

    // Dropped, never published with a truncated count.
    assert!(store.published_segments().unwrap().is_empty());
    assert_eq!(store.overview().unwrap().total_segments, 0);
}

#[test]
fn watermarks_advance_after_consumption() {
    let (_store, feed, mut sched) = setup("mat_watermark");
    seed_group(&feed, "c", 3, 40.0, 60.0);

    assert!(feed.pending(SourceId::Bank).unwrap() > 0);
    sched.run_wave().unwrap();

    assert_eq!(feed.pending(SourceId::Bank).unwrap(), 0);
    assert_eq!(feed.pending(SourceId::Insurance).unwrap(), 0);
}

#[test]
fn unmatched_keys_stay_out_of_the_join() {
    let (store, feed, mut sched) = setup("mat_unmatched");
    seed_group(&feed, "c", 3, 40.0, 60.0);
    // Bank-only record: no insurance counterpart, must not join.
    let at = test_clock().now();
    feed.push(
        SourceId::Bank,
        ChangeOp::Insert,
        &record("bank-only", 99.0, 0, ActivityTier::Low),
        at,
    )
    .unwrap();

    sched.run_wave().unwrap();

    let segments = store.published_segments().unwrap();
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].record_count, 3);
}

#[test]
fn forced_rerun_yields_identical_rows() {
    let (store, feed, mut sched) = setup("mat_idempotent");
    seed_group(&feed, "c", 3, 40.0, 60.0);

    sched.run_wave().unwrap();
    let first = store.published_segments().unwrap();

    // No new change events; a forced refresh recomputes from the mirrors.
    sched.refresh_now(None).unwrap();
    let second = store.published_segments().unwrap();

    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.age_band, b.age_band);
        assert_eq!(a.record_count, b.record_count);
        assert_eq!(a.composite_score, b.composite_score);
        assert_eq!(a.risk_category, b.risk_category);
        assert_eq!(a.fraud_pattern, b.fraud_pattern);
    }
}

#[test]
fn delete_shrinking_group_below_k_unpublishes_it() {
    let (store, feed, mut sched) = setup("mat_delete");
    seed_group(&feed, "c", 3, 40.0, 60.0);
    sched.run_wave().unwrap();
    assert_eq!(store.published_segments().unwrap().len(), 1);

    feed.push(
        SourceId::Bank,
        ChangeOp::Delete,
        &record("c-0", 40.0, 0, ActivityTier::Low),
        test_clock().now(),
    )
    .unwrap();
    sched.run_wave().unwrap();

    assert!(store.published_segments().unwrap().is_empty());
}

/// Change log adapter standing in for an unreachable upstream.
struct DeadFeed;

impl ChangeLogAdapter for DeadFeed {
    fn poll(&self, source: SourceId) -> CoreResult<Vec<ChangeEvent>> {
        Err(CoreError::SourceUnavailable { source_id: source })
    }

    fn ack(&self, _source: SourceId, _watermark: i64) -> CoreResult<()> {
        Ok(())
    }

    fn pending(&self, _source: SourceId) -> CoreResult<i64> {
        Ok(0)
    }
}

#[test]
fn source_failure_keeps_prior_snapshot() {
    let (store, feed, mut sched) = setup("mat_dead_source");
    seed_group(&feed, "c", 3, 40.0, 60.0);
    sched.run_wave().unwrap();
    let before = store.published_version(SEGMENT_TABLE).unwrap();
    assert!(before.is_some());

    let mut mat = Materializer::new(store.reopen().unwrap(), Box::new(DeadFeed));
    let ctx = JobContext {
        wave: 99,
        now: test_clock().now(),
        deadline: None,
        clock: test_clock(),
    };
    let err = mat.run(&ctx).unwrap_err();
    assert!(matches!(err, CoreError::SourceUnavailable { .. }));

    // Prior snapshot still served.
    assert_eq!(store.published_version(SEGMENT_TABLE).unwrap(), before);
    assert_eq!(store.published_segments().unwrap().len(), 1);
}

#[test]
fn overrun_deadline_fails_before_publishing() {
    let (store, feed, mut sched) = setup("mat_deadline");
    seed_group(&feed, "c", 3, 40.0, 60.0);
    sched.run_wave().unwrap();
    let before = store.published_version(SEGMENT_TABLE).unwrap();

    let mut mat = Materializer::new(
        store.reopen().unwrap(),
        Box::new(SqliteChangeLog::new(store.reopen().unwrap())),
    );
    let clock = test_clock();
    let ctx = JobContext {
        wave: 99,
        now: clock.now(),
        deadline: Some(clock.now() - chrono::Duration::seconds(1)),
        clock,
    };
    let err = mat.run(&ctx).unwrap_err();
    assert!(matches!(err, CoreError::DeadlineExceeded { .. }));
    assert_eq!(store.published_version(SEGMENT_TABLE).unwrap(), before);
}

#[test]
fn failed_wave_replays_unacked_change_events() {
    let (store, feed, mut sched) = setup("mat_replay");
    seed_group(&feed, "c", 3, 40.0, 60.0);

    // A wave that consumes the events but dies before publishing must
    // leave the watermarks untouched.
    let mut mat = Materializer::new(
        store.reopen().unwrap(),
        Box::new(SqliteChangeLog::new(store.reopen().unwrap())),
    );
    let clock = test_clock();
    let ctx = JobContext {
        wave: 1,
        now: clock.now(),
        deadline: Some(clock.now() - chrono::Duration::seconds(1)),
        clock,
    };
    let err = mat.run(&ctx).unwrap_err();
    assert!(matches!(err, CoreError::DeadlineExceeded { .. }));
    assert!(store.published_segments().unwrap().is_empty());

    // Still pending, so the change-pending trigger re-fires and the next
    // wave publishes the data.
    assert!(feed.pending(SourceId::Bank).unwrap() > 0);
    let outcome = sched.run_wave().unwrap();
    assert!(!outcome.executed.is_empty());
    assert_eq!(store.published_segments().unwrap().len(), 1);
    assert_eq!(feed.pending(SourceId::Bank).unwrap(), 0);
}

#[test]
fn watermark_defaults_to_zero_and_stays_monotonic() {
    let store = Store::in_memory().unwrap();
    store.migrate().unwrap();

    assert_eq!(store.watermark(SourceId::Bank).unwrap(), 0);
    store.advance_watermark(SourceId::Bank, 5).unwrap();
    assert_eq!(store.watermark(SourceId::Bank).unwrap(), 5);
    // An older ack must not move the watermark backwards.
    store.advance_watermark(SourceId::Bank, 3).unwrap();
    assert_eq!(store.watermark(SourceId::Bank).unwrap(), 5);
}
