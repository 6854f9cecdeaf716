//! Fraud signal scan tests: the confidence threshold gate and the
//! append-only detection log.

use chrono::{TimeZone, Utc};
use crossrisk_core::changelog::{ChangeOp, RecordSnapshot, SqliteChangeLog};
use crossrisk_core::clock::Clock;
use crossrisk_core::fraud::ActivityTier;
use crossrisk_core::scheduler::Scheduler;
use crossrisk_core::store::Store;
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

fn push_group(
    feed: &SqliteChangeLog,
    op: ChangeOp,
    prefix: &str,
    region: &str,
    flags: i64,
    tier: ActivityTier,
    n: usize,
) {
    let at = test_clock().now();
    for i in 0..n {
        let r = RecordSnapshot {
            customer_key: format!("{prefix}-{i}"),
            age_band: "25-34".to_string(),
            region: region.to_string(),
            occupation_band: "Finance".to_string(),
            risk_score: 50.0,
            fraud_flags: flags,
            activity_tier: tier,
        };
        feed.push(SourceId::Bank, op, &r, at).unwrap();
        feed.push(SourceId::Insurance, op, &r, at).unwrap();
    }
}

#[test]
fn flagged_elevated_segment_produces_a_signal() {
    let (store, feed, mut sched) = setup("fs_signal");
    // Flags on both sides, critical tiers on both sides: 0.95 rung.
    push_group(&feed, ChangeOp::Insert, "hot", "West", 1, ActivityTier::Critical, 3);
    sched.run_wave().unwrap();

    let signals = store.fraud_signals().unwrap();
    assert_eq!(signals.len(), 1);
    let s = &signals[0];
    assert_eq!(s.pattern, "dual_flag_dual_elevated");
    assert_eq!(s.confidence, 0.95);
    assert_eq!(s.affected_count, 3);
    assert_eq!(s.region, "West");
}

#[test]
fn quiet_segment_stays_below_the_threshold() {
    let (store, feed, mut sched) = setup("fs_quiet");
    // No flags, low tiers: 0.05 floor, well under 0.70.
    push_group(&feed, ChangeOp::Insert, "cold", "Midwest", 0, ActivityTier::Low, 3);
    sched.run_wave().unwrap();

    assert_eq!(store.published_segments().unwrap().len(), 1);
    assert!(store.fraud_signals().unwrap().is_empty());
}

#[test]
fn mid_ladder_patterns_are_gated_by_confidence() {
    let (store, feed, mut sched) = setup("fs_gate");
    let at = test_clock().now();
    // "warm": flag and elevation on the banking side only, a quiet
    // insurance side. One-sided signals land on the 0.75 rung, above
    // the threshold.
    for i in 0..3 {
        let hot = RecordSnapshot {
            customer_key: format!("warm-{i}"),
            age_band: "25-34".to_string(),
            region: "West".to_string(),
            occupation_band: "Finance".to_string(),
            risk_score: 50.0,
            fraud_flags: 1,
            activity_tier: ActivityTier::High,
        };
        let quiet = RecordSnapshot {
            fraud_flags: 0,
            activity_tier: ActivityTier::Low,
            ..hot.clone()
        };
        feed.push(SourceId::Bank, ChangeOp::Insert, &hot, at).unwrap();
        feed.push(SourceId::Insurance, ChangeOp::Insert, &quiet, at)
            .unwrap();
    }
    // "mild": flags without any elevation score 0.50, below threshold.
    push_group(&feed, ChangeOp::Insert, "mild", "Southeast", 1, ActivityTier::Low, 3);
    sched.run_wave().unwrap();

    let signals = store.fraud_signals().unwrap();
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0].pattern, "flag_with_elevated_activity");
    assert_eq!(signals[0].confidence, 0.75);
    assert_eq!(signals[0].region, "West");
}

#[test]
fn redetection_appends_rather_than_updating() {
    let (store, feed, mut sched) = setup("fs_append");
    push_group(&feed, ChangeOp::Insert, "hot", "West", 1, ActivityTier::Critical, 3);
    sched.run_wave().unwrap();
    assert_eq!(store.fraud_signal_count().unwrap(), 1);

    // Same segment still hot on the next wave: a second row, not an update.
    push_group(&feed, ChangeOp::Update, "hot", "West", 1, ActivityTier::Critical, 3);
    sched.run_wave().unwrap();
    assert_eq!(store.fraud_signal_count().unwrap(), 2);
}
