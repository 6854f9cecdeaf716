//! Fraud Correlation Scorer and the fraud signal scan job.
//!
//! The scorer is an ordered decision table: (predicate, confidence,
//! pattern) triples evaluated top-down, first match wins. Priority order
//! is explicit so each rung is unit-testable in isolation and the score
//! for any segment can be explained to an examiner.

use crate::{
    error::CoreResult,
    job::{JobContext, JobReport, RefreshJob},
    store::Store,
};
use serde::{Deserialize, Serialize};

// ── Activity tiers ───────────────────────────────────────────────────────────

/// Per-source activity tier: transaction velocity on the banking side,
/// claim frequency on the insurance side. Same ladder for both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityTier {
    Low,
    Moderate,
    High,
    Critical,
}

impl ActivityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityTier::Low => "low",
            ActivityTier::Moderate => "moderate",
            ActivityTier::High => "high",
            ActivityTier::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(ActivityTier::Low),
            "moderate" => Some(ActivityTier::Moderate),
            "high" => Some(ActivityTier::High),
            "critical" => Some(ActivityTier::Critical),
            _ => None,
        }
    }

    /// Rank used when taking the max tier across a segment's members.
    pub fn rank(&self) -> i64 {
        match self {
            ActivityTier::Low => 0,
            ActivityTier::Moderate => 1,
            ActivityTier::High => 2,
            ActivityTier::Critical => 3,
        }
    }

    pub fn from_rank(rank: i64) -> Self {
        match rank {
            3 => ActivityTier::Critical,
            2 => ActivityTier::High,
            1 => ActivityTier::Moderate,
            _ => ActivityTier::Low,
        }
    }

    pub fn is_elevated(&self) -> bool {
        matches!(self, ActivityTier::High | ActivityTier::Critical)
    }
}

// ── Decision table ───────────────────────────────────────────────────────────

/// Segment-level cross-source indicators. Flags are "any member of the
/// group carries a flag"; tiers are the highest tier among members.
#[derive(Debug, Clone, Copy)]
pub struct SegmentSignals {
    pub flag_a: bool,
    pub flag_b: bool,
    pub velocity: ActivityTier,
    pub claims: ActivityTier,
}

pub struct FraudRule {
    pub pattern: &'static str,
    pub confidence: f64,
    pub applies: fn(&SegmentSignals) -> bool,
}

/// Evaluated top-down; ties resolve to the higher-severity branch by
/// construction. The final rule is a catch-all, so every input matches.
pub const FRAUD_RULES: &[FraudRule] = &[
    FraudRule {
        pattern: "dual_flag_dual_elevated",
        confidence: 0.95,
        applies: |s| s.flag_a && s.flag_b && s.velocity.is_elevated() && s.claims.is_elevated(),
    },
    FraudRule {
        pattern: "flag_with_elevated_activity",
        confidence: 0.75,
        applies: |s| (s.flag_a || s.flag_b) && (s.velocity.is_elevated() || s.claims.is_elevated()),
    },
    FraudRule {
        pattern: "single_source_flag",
        confidence: 0.50,
        applies: |s| s.flag_a || s.flag_b,
    },
    FraudRule {
        pattern: "elevated_activity_only",
        confidence: 0.25,
        applies: |s| s.velocity.is_elevated() || s.claims.is_elevated(),
    },
    FraudRule {
        pattern: "no_correlation",
        confidence: 0.05,
        applies: |_| true,
    },
];

/// Walk the decision table. Returns (confidence, pattern label).
pub fn correlation_score(signals: &SegmentSignals) -> (f64, &'static str) {
    for rule in FRAUD_RULES {
        if (rule.applies)(signals) {
            return (rule.confidence, rule.pattern);
        }
    }
    unreachable!("fraud rule table must end with a catch-all");
}

// ── Fraud signal log ─────────────────────────────────────────────────────────

/// Segments whose correlation score clears this threshold produce a
/// FraudSignal. 0.70 admits the two flag-bearing upper rungs and nothing
/// below them.
pub const SIGNAL_THRESHOLD: f64 = 0.70;

/// Append-only detection record derived from a published segment.
/// Never mutated — a re-detection appends a newer row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudSignal {
    pub signal_id: String,
    pub age_band: String,
    pub region: String,
    pub occupation_band: String,
    pub pattern: String,
    pub affected_count: i64,
    pub confidence: f64,
    pub detected_at: chrono::DateTime<chrono::Utc>,
}

/// Refresh job: scan the published segment table and append a signal for
/// every segment at or above the threshold. Runs after the auditor has
/// cleared the wave's snapshot.
pub struct FraudSignalScan {
    store: Store,
}

impl FraudSignalScan {
    pub const NAME: &'static str = "fraud_signal_scan";

    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

impl RefreshJob for FraudSignalScan {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&mut self, ctx: &JobContext) -> CoreResult<JobReport> {
        let segments = self.store.published_segments()?;
        let mut appended = 0usize;

        for seg in &segments {
            if seg.fraud_correlation_score < SIGNAL_THRESHOLD {
                continue;
            }
            let signal = FraudSignal {
                signal_id: uuid::Uuid::new_v4().to_string(),
                age_band: seg.age_band.clone(),
                region: seg.region.clone(),
                occupation_band: seg.occupation_band.clone(),
                pattern: seg.fraud_pattern.clone(),
                // affected_count >= k because the segment survived the
                // materializer's filter.
                affected_count: seg.record_count,
                confidence: seg.fraud_correlation_score,
                detected_at: ctx.clock.now(),
            };
            self.store.append_fraud_signal(&signal)?;
            appended += 1;
        }

        if appended > 0 {
            log::info!(
                "wave {}: appended {appended} fraud signal(s) at threshold {SIGNAL_THRESHOLD}",
                ctx.wave
            );
        }

        Ok(JobReport {
            rows_written: appended,
            detail: format!("{appended} signal(s) above {SIGNAL_THRESHOLD}"),
        })
    }
}
