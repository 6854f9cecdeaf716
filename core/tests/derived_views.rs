//! Derived-view chain tests: rollups, the high-risk tracker, and the
//! regional trend across successive waves.

use chrono::{TimeZone, Utc};
use crossrisk_core::changelog::{ChangeOp, RecordSnapshot, SqliteChangeLog};
use crossrisk_core::clock::Clock;
use crossrisk_core::derived::TrendDirection;
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

fn record(key: &str, age: &str, region: &str, occ: &str, score: f64) -> RecordSnapshot {
    RecordSnapshot {
        customer_key: key.to_string(),
        age_band: age.to_string(),
        region: region.to_string(),
        occupation_band: occ.to_string(),
        risk_score: score,
        fraud_flags: 0,
        activity_tier: ActivityTier::Low,
    }
}

fn push_group(
    feed: &SqliteChangeLog,
    op: ChangeOp,
    prefix: &str,
    age: &str,
    region: &str,
    occ: &str,
    score: f64,
    n: usize,
) {
    let at = test_clock().now();
    for i in 0..n {
        let r = record(&format!("{prefix}-{i}"), age, region, occ, score);
        feed.push(SourceId::Bank, op, &r, at).unwrap();
        feed.push(SourceId::Insurance, op, &r, at).unwrap();
    }
}

/// Both sources score identically, so composite == the raw score.
fn seed_two_regions(feed: &SqliteChangeLog) {
    push_group(feed, ChangeOp::Insert, "w", "25-34", "West", "Technology", 80.0, 3);
    push_group(feed, ChangeOp::Insert, "m", "35-44", "Midwest", "Retail", 10.0, 4);
}

#[test]
fn age_rollup_sums_published_segments() {
    let (store, feed, mut sched) = setup("dv_age");
    seed_two_regions(&feed);
    sched.run_wave().unwrap();

    let rollup = store.published_age_rollup().unwrap();
    assert_eq!(rollup.len(), 2);

    let young = rollup.iter().find(|r| r.age_band == "25-34").unwrap();
    assert_eq!(young.segment_count, 1);
    assert_eq!(young.customer_count, 3);
    assert!((young.avg_composite - 80.0).abs() < 1e-9);

    let mid = rollup.iter().find(|r| r.age_band == "35-44").unwrap();
    assert_eq!(mid.customer_count, 4);
}

#[test]
fn region_rollup_sums_published_segments() {
    let (store, feed, mut sched) = setup("dv_region");
    seed_two_regions(&feed);
    sched.run_wave().unwrap();

    let rollup = store.published_region_rollup().unwrap();
    assert_eq!(rollup.len(), 2);
    let west = rollup.iter().find(|r| r.region == "West").unwrap();
    assert_eq!(west.customer_count, 3);
    assert!((west.avg_composite - 80.0).abs() < 1e-9);
}

#[test]
fn high_risk_tracker_keeps_only_high_and_critical() {
    let (store, feed, mut sched) = setup("dv_highrisk");
    seed_two_regions(&feed);
    sched.run_wave().unwrap();

    let tracked = store.published_high_risk().unwrap();
    assert_eq!(tracked.len(), 1);
    assert_eq!(tracked[0].region, "West");
    assert!(tracked[0].risk_category.is_high_risk());
}

#[test]
fn first_trend_snapshot_is_new() {
    let (store, feed, mut sched) = setup("dv_trend_new");
    seed_two_regions(&feed);
    sched.run_wave().unwrap();

    let trend = store.published_region_trend().unwrap();
    assert_eq!(trend.len(), 2);
    for row in &trend {
        assert_eq!(row.direction, TrendDirection::New);
        assert!(row.prior_avg.is_none());
    }
}

#[test]
fn unchanged_scores_trend_stable() {
    let (store, feed, mut sched) = setup("dv_trend_stable");
    seed_two_regions(&feed);
    sched.run_wave().unwrap();

    // Re-push the same values so a second wave triggers.
    push_group(&feed, ChangeOp::Update, "w", "25-34", "West", "Technology", 80.0, 3);
    sched.run_wave().unwrap();

    let trend = store.published_region_trend().unwrap();
    for row in &trend {
        assert_eq!(row.direction, TrendDirection::Stable, "region {}", row.region);
        assert!(row.prior_avg.is_some());
    }
}

#[test]
fn rising_scores_trend_increasing() {
    let (store, feed, mut sched) = setup("dv_trend_up");
    seed_two_regions(&feed);
    sched.run_wave().unwrap();

    // Midwest banking scores jump 10 -> 30: composite 0.6*30 + 0.4*10 = 22,
    // more than the 5-point band above the prior 10.
    let at = test_clock().now();
    for i in 0..4 {
        let r = record(&format!("m-{i}"), "35-44", "Midwest", "Retail", 30.0);
        feed.push(SourceId::Bank, ChangeOp::Update, &r, at).unwrap();
    }
    sched.run_wave().unwrap();

    let trend = store.published_region_trend().unwrap();
    let midwest = trend.iter().find(|r| r.region == "Midwest").unwrap();
    assert_eq!(midwest.direction, TrendDirection::Increasing);
    assert!((midwest.current_avg - 22.0).abs() < 1e-9);
    assert_eq!(midwest.prior_avg, Some(10.0));

    let west = trend.iter().find(|r| r.region == "West").unwrap();
    assert_eq!(west.direction, TrendDirection::Stable);
}

#[test]
fn falling_scores_trend_decreasing() {
    let (store, feed, mut sched) = setup("dv_trend_down");
    seed_two_regions(&feed);
    sched.run_wave().unwrap();

    let at = test_clock().now();
    for i in 0..3 {
        let r = record(&format!("w-{i}"), "25-34", "West", "Technology", 40.0);
        feed.push(SourceId::Bank, ChangeOp::Update, &r, at).unwrap();
        feed.push(SourceId::Insurance, ChangeOp::Update, &r, at).unwrap();
    }
    sched.run_wave().unwrap();

    let trend = store.published_region_trend().unwrap();
    let west = trend.iter().find(|r| r.region == "West").unwrap();
    assert_eq!(west.direction, TrendDirection::Decreasing);
    assert_eq!(west.prior_avg, Some(80.0));
}

#[test]
fn views_read_only_the_published_version() {
    let (store, feed, mut sched) = setup("dv_versioned");
    seed_two_regions(&feed);
    sched.run_wave().unwrap();
    let v1 = store.published_age_rollup().unwrap();

    push_group(&feed, ChangeOp::Update, "w", "25-34", "West", "Technology", 80.0, 3);
    sched.run_wave().unwrap();
    let v2 = store.published_age_rollup().unwrap();

    // One consistent snapshot each time, not an accumulation of versions.
    assert_eq!(v1.len(), v2.len());
}
