//! Compliance Auditor — defense-in-depth validation after each refresh.
//!
//! The materializer filters undersized groups by construction, so a
//! published row below k indicates a logic defect, not bad data. On a
//! violation the auditor records FAILED, rolls the published pointer back
//! to the previous snapshot, and fails the wave so nothing downstream
//! reads the rejected version.

use crate::{
    error::{CoreError, CoreResult},
    job::{JobContext, JobReport, RefreshJob},
    materializer::K_ANONYMITY_MIN,
    store::{Store, SEGMENT_TABLE},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckType {
    KAnonymity,
    SourceAvailability,
    Staleness,
    Retention,
}

impl CheckType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckType::KAnonymity => "K_ANONYMITY",
            CheckType::SourceAvailability => "SOURCE_AVAILABILITY",
            CheckType::Staleness => "STALENESS",
            CheckType::Retention => "RETENTION",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "K_ANONYMITY" => Some(CheckType::KAnonymity),
            "SOURCE_AVAILABILITY" => Some(CheckType::SourceAvailability),
            "STALENESS" => Some(CheckType::Staleness),
            "RETENTION" => Some(CheckType::Retention),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckResult {
    Passed,
    Warning,
    Failed,
}

impl CheckResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckResult::Passed => "PASSED",
            CheckResult::Warning => "WARNING",
            CheckResult::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PASSED" => Some(CheckResult::Passed),
            "WARNING" => Some(CheckResult::Warning),
            "FAILED" => Some(CheckResult::Failed),
            _ => None,
        }
    }
}

/// Append-only compliance log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceRecord {
    pub compliance_id: String,
    pub check_type: CheckType,
    pub target: String,
    pub result: CheckResult,
    pub details: String,
    pub checked_at: DateTime<Utc>,
}

impl ComplianceRecord {
    pub fn new(
        check_type: CheckType,
        target: &str,
        result: CheckResult,
        details: &str,
        checked_at: DateTime<Utc>,
    ) -> Self {
        Self {
            compliance_id: uuid::Uuid::new_v4().to_string(),
            check_type,
            target: target.to_string(),
            result,
            details: details.to_string(),
            checked_at,
        }
    }
}

pub struct ComplianceAuditor {
    store: Store,
}

impl ComplianceAuditor {
    pub const NAME: &'static str = "compliance_audit";

    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

impl RefreshJob for ComplianceAuditor {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&mut self, ctx: &JobContext) -> CoreResult<JobReport> {
        let undersized = self.store.undersized_published_segments(K_ANONYMITY_MIN)?;

        if undersized > 0 {
            let rolled_back = self.store.rollback_publish(SEGMENT_TABLE)?;
            log::error!(
                "wave {}: {undersized} published segment(s) below k={K_ANONYMITY_MIN}; rollback {}",
                ctx.wave,
                if rolled_back { "applied" } else { "unavailable (no previous version)" }
            );
            self.store.append_compliance(&ComplianceRecord::new(
                CheckType::KAnonymity,
                SEGMENT_TABLE,
                CheckResult::Failed,
                &format!(
                    "{undersized} segment(s) below k={K_ANONYMITY_MIN}; publish {}",
                    if rolled_back { "rolled back to previous version" } else { "left in place, no previous version" }
                ),
                ctx.now,
            ))?;
            return Err(CoreError::KAnonymityViolation {
                undersized,
                k: K_ANONYMITY_MIN,
            });
        }

        self.store.append_compliance(&ComplianceRecord::new(
            CheckType::KAnonymity,
            SEGMENT_TABLE,
            CheckResult::Passed,
            &format!("all published segments meet k>={K_ANONYMITY_MIN}"),
            ctx.now,
        ))?;

        Ok(JobReport {
            rows_written: 1,
            detail: "k-anonymity rescan clean".to_string(),
        })
    }
}
