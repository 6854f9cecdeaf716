//! Aggregation Materializer — the single writer of aggregated_segment.
//!
//! Per wave:
//!   1. Drain pending change events for both sources into the mirrors
//!      and ack the watermarks.
//!   2. Inner-join the mirrors on the pseudonymous key.
//!   3. Group by (age band, region, occupation band).
//!   4. Drop every group below k = 3.
//!   5. Score survivors (composite risk + fraud correlation).
//!   6. Publish wholesale under a new version; the pointer bump is the
//!      last statement of the transaction.
//!
//! Replace-on-refresh, not incremental diffing: group membership near the
//! k threshold can shift unpredictably as data changes, so the filter is
//! re-derived from scratch every wave. Re-running on unchanged sources
//! yields identical rows modulo last_refreshed.

use crate::{
    auditor::{CheckResult, CheckType, ComplianceRecord},
    changelog::{ChangeLogAdapter, ChangeOp},
    error::{CoreError, CoreResult},
    fraud::{correlation_score, ActivityTier, SegmentSignals},
    job::{JobContext, JobReport, RefreshJob},
    scoring::{composite_score, RiskCategory},
    store::{Store, SEGMENT_TABLE},
    types::SourceId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Minimum group size for any published row.
pub const K_ANONYMITY_MIN: i64 = 3;

/// One joined group as it comes back from the store, before filtering
/// and scoring. Tier ranks are the max across the group's members.
#[derive(Debug, Clone)]
pub struct JoinedGroup {
    pub age_band: String,
    pub region: String,
    pub occupation_band: String,
    pub record_count: i64,
    pub avg_score_a: f64,
    pub avg_score_b: f64,
    pub flags_a: i64,
    pub flags_b: i64,
    pub tier_a_rank: i64,
    pub tier_b_rank: i64,
}

/// A published privacy-safe segment. record_count >= 3 always.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedSegment {
    pub age_band: String,
    pub region: String,
    pub occupation_band: String,
    pub record_count: i64,
    pub avg_score_a: f64,
    pub avg_score_b: f64,
    pub composite_score: f64,
    pub risk_category: RiskCategory,
    pub fraud_correlation_score: f64,
    pub fraud_pattern: String,
    pub last_refreshed: DateTime<Utc>,
}

pub struct Materializer {
    store: Store,
    changelog: Box<dyn ChangeLogAdapter>,
}

impl Materializer {
    pub const NAME: &'static str = "materialize_segments";

    pub fn new(store: Store, changelog: Box<dyn ChangeLogAdapter>) -> Self {
        Self { store, changelog }
    }

    /// Apply pending change events to the source mirrors. A poll failure
    /// aborts the wave before any mirror write for that source; prior
    /// published data stays authoritative.
    ///
    /// Watermarks are NOT advanced here. Acks are deferred until the
    /// wave's publish commits, so a wave that fails after consuming
    /// (deadline overrun, publish error) replays its events on the next
    /// one — at-least-once consumption keeps the replay harmless because
    /// mirror writes are idempotent upserts/deletes.
    fn consume_changes(&self) -> CoreResult<(usize, Vec<(SourceId, i64)>)> {
        let mut applied = 0usize;
        let mut acks = Vec::new();
        for source in SourceId::ALL {
            let events = self.changelog.poll(source)?;
            if events.is_empty() {
                continue;
            }
            for event in &events {
                match event.op {
                    ChangeOp::Insert | ChangeOp::Update => {
                        self.store.upsert_source_record(source, &event.record)?;
                    }
                    ChangeOp::Delete => {
                        self.store
                            .delete_source_record(source, &event.record.customer_key)?;
                    }
                }
            }
            let last_seq = events.last().map(|e| e.seq).unwrap_or(0);
            acks.push((source, last_seq));
            log::debug!("applied {} change event(s) from {source}", events.len());
            applied += events.len();
        }
        Ok((applied, acks))
    }

    fn score_group(group: &JoinedGroup, refreshed_at: DateTime<Utc>) -> AggregatedSegment {
        let composite = composite_score(
            group.avg_score_a,
            group.avg_score_b,
            group.flags_a,
            group.flags_b,
        );
        let signals = SegmentSignals {
            flag_a: group.flags_a > 0,
            flag_b: group.flags_b > 0,
            velocity: ActivityTier::from_rank(group.tier_a_rank),
            claims: ActivityTier::from_rank(group.tier_b_rank),
        };
        let (confidence, pattern) = correlation_score(&signals);

        AggregatedSegment {
            age_band: group.age_band.clone(),
            region: group.region.clone(),
            occupation_band: group.occupation_band.clone(),
            record_count: group.record_count,
            avg_score_a: group.avg_score_a,
            avg_score_b: group.avg_score_b,
            composite_score: composite,
            risk_category: RiskCategory::from_score(composite),
            fraud_correlation_score: confidence,
            fraud_pattern: pattern.to_string(),
            last_refreshed: refreshed_at,
        }
    }
}

impl RefreshJob for Materializer {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&mut self, ctx: &JobContext) -> CoreResult<JobReport> {
        let (consumed, acks) = self.consume_changes()?;

        let groups = self.store.joined_groups()?;
        let total_groups = groups.len();

        let mut rows = Vec::new();
        let mut dropped = 0usize;
        for group in &groups {
            if group.record_count < K_ANONYMITY_MIN {
                dropped += 1;
                continue;
            }
            rows.push(Self::score_group(group, ctx.now));
        }

        // Last exit before the publish transaction. An overrun wave
        // fails here with the prior table intact.
        if ctx.deadline_exceeded() {
            return Err(CoreError::DeadlineExceeded {
                job: Self::NAME.to_string(),
            });
        }

        let version = self.store.replace_segments(&rows, ctx.now)?;
        self.store
            .record_snapshot_published(ctx.wave, SEGMENT_TABLE, version, ctx.now)?;

        // Published; only now are the consumed events acknowledged.
        for (source, last_seq) in acks {
            self.changelog.ack(source, last_seq)?;
            log::debug!("watermark for {source} -> {last_seq}");
        }

        log::info!(
            "wave {}: published segment version {version} ({} retained, {dropped} dropped below k={K_ANONYMITY_MIN}, {consumed} change event(s) consumed)",
            ctx.wave,
            rows.len(),
        );

        self.store.append_compliance(&ComplianceRecord::new(
            CheckType::KAnonymity,
            SEGMENT_TABLE,
            CheckResult::Passed,
            &format!(
                "retained {} of {total_groups} group(s); dropped {dropped} below k={K_ANONYMITY_MIN}",
                rows.len()
            ),
            ctx.now,
        ))?;

        Ok(JobReport {
            rows_written: rows.len(),
            detail: format!("version {version}, {dropped} group(s) dropped"),
        })
    }
}
