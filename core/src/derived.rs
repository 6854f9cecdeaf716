//! Derived-View Chain — second-order materializations.
//!
//! Every view here is a pure aggregation over the currently published
//! aggregated_segment snapshot, never over raw sources, and publishes
//! through the same versioned-pointer discipline. The views are
//! independent of each other; the scheduler runs them once their shared
//! upstream has committed.

use crate::{
    error::CoreResult,
    job::{JobContext, JobReport, RefreshJob},
    scoring::RiskCategory,
    store::{
        Store, AGE_ROLLUP_TABLE, HIGH_RISK_TABLE, REGION_ROLLUP_TABLE, REGION_TREND_TABLE,
    },
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Row shapes ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgeRollupRow {
    pub age_band: String,
    pub segment_count: i64,
    pub customer_count: i64,
    pub avg_composite: f64,
    pub last_refreshed: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionRollupRow {
    pub region: String,
    pub segment_count: i64,
    pub customer_count: i64,
    pub avg_composite: f64,
    pub last_refreshed: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HighRiskRow {
    pub age_band: String,
    pub region: String,
    pub occupation_band: String,
    pub record_count: i64,
    pub composite_score: f64,
    pub risk_category: RiskCategory,
    pub last_refreshed: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendRow {
    pub region: String,
    pub current_avg: f64,
    pub prior_avg: Option<f64>,
    pub direction: TrendDirection,
    pub last_refreshed: DateTime<Utc>,
}

// ── Trend direction ──────────────────────────────────────────────────────────

/// Band within which a region's average is considered unchanged.
pub const TREND_BAND: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrendDirection {
    New,
    Increasing,
    Decreasing,
    Stable,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendDirection::New => "NEW",
            TrendDirection::Increasing => "INCREASING",
            TrendDirection::Decreasing => "DECREASING",
            TrendDirection::Stable => "STABLE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NEW" => Some(TrendDirection::New),
            "INCREASING" => Some(TrendDirection::Increasing),
            "DECREASING" => Some(TrendDirection::Decreasing),
            "STABLE" => Some(TrendDirection::Stable),
            _ => None,
        }
    }
}

/// Compare against the most recent prior snapshot for the region. The
/// original platform compared against a literal 7-day-ago row; the most
/// recent committed value is used instead so multi-day refresh gaps do
/// not silently report NEW.
pub fn trend_direction(current: f64, prior: Option<f64>) -> TrendDirection {
    match prior {
        None => TrendDirection::New,
        Some(p) if current > p + TREND_BAND => TrendDirection::Increasing,
        Some(p) if current < p - TREND_BAND => TrendDirection::Decreasing,
        Some(_) => TrendDirection::Stable,
    }
}

// ── Jobs ─────────────────────────────────────────────────────────────────────

pub struct AgeRollupJob {
    store: Store,
}

impl AgeRollupJob {
    pub const NAME: &'static str = "age_rollup";

    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

impl RefreshJob for AgeRollupJob {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&mut self, ctx: &JobContext) -> CoreResult<JobReport> {
        let (version, rows) = self.store.replace_age_rollup(ctx.now)?;
        self.store
            .record_snapshot_published(ctx.wave, AGE_ROLLUP_TABLE, version, ctx.now)?;
        log::debug!("wave {}: age_rollup version {version} ({rows} rows)", ctx.wave);
        Ok(JobReport {
            rows_written: rows,
            detail: format!("version {version}"),
        })
    }
}

pub struct RegionRollupJob {
    store: Store,
}

impl RegionRollupJob {
    pub const NAME: &'static str = "region_rollup";

    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

impl RefreshJob for RegionRollupJob {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&mut self, ctx: &JobContext) -> CoreResult<JobReport> {
        let (version, rows) = self.store.replace_region_rollup(ctx.now)?;
        self.store
            .record_snapshot_published(ctx.wave, REGION_ROLLUP_TABLE, version, ctx.now)?;
        log::debug!("wave {}: region_rollup version {version} ({rows} rows)", ctx.wave);
        Ok(JobReport {
            rows_written: rows,
            detail: format!("version {version}"),
        })
    }
}

pub struct HighRiskTrackerJob {
    store: Store,
}

impl HighRiskTrackerJob {
    pub const NAME: &'static str = "high_risk_tracker";

    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

impl RefreshJob for HighRiskTrackerJob {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&mut self, ctx: &JobContext) -> CoreResult<JobReport> {
        let (version, rows) = self.store.replace_high_risk_tracker(ctx.now)?;
        self.store
            .record_snapshot_published(ctx.wave, HIGH_RISK_TABLE, version, ctx.now)?;
        log::debug!(
            "wave {}: high_risk_tracker version {version} ({rows} rows)",
            ctx.wave
        );
        Ok(JobReport {
            rows_written: rows,
            detail: format!("version {version}"),
        })
    }
}

pub struct RegionTrendJob {
    store: Store,
}

impl RegionTrendJob {
    pub const NAME: &'static str = "region_trend";

    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

impl RefreshJob for RegionTrendJob {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&mut self, ctx: &JobContext) -> CoreResult<JobReport> {
        let (version, rows) = self.store.replace_region_trend(ctx.now)?;
        self.store
            .record_snapshot_published(ctx.wave, REGION_TREND_TABLE, version, ctx.now)?;
        log::debug!("wave {}: region_trend version {version} ({rows} rows)", ctx.wave);
        Ok(JobReport {
            rows_written: rows,
            detail: format!("version {version}"),
        })
    }
}
