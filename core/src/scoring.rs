//! Composite Risk Calculator.
//!
//! Pure functions over aggregate inputs only — nothing here ever sees an
//! individual record. The weighting is fixed and auditable: scores drive
//! escalation decisions, so there is no tunable or learned component.

use serde::{Deserialize, Serialize};

// ── Constants ────────────────────────────────────────────────────────────────

/// Weight of the banking-side average score.
pub const WEIGHT_A: f64 = 0.6;
/// Weight of the insurance-side average score.
pub const WEIGHT_B: f64 = 0.4;
/// Additive penalty per banking-side fraud flag.
pub const FLAG_PENALTY_A: f64 = 5.0;
/// Additive penalty per insurance-side fraud flag.
pub const FLAG_PENALTY_B: f64 = 3.0;

/// Weighted combination of both source averages plus fraud-flag
/// penalties. Unbounded above 100: penalties are additive, not capped.
pub fn composite_score(avg_a: f64, avg_b: f64, flags_a: i64, flags_b: i64) -> f64 {
    avg_a * WEIGHT_A
        + avg_b * WEIGHT_B
        + flags_a as f64 * FLAG_PENALTY_A
        + flags_b as f64 * FLAG_PENALTY_B
}

// ── Risk category ────────────────────────────────────────────────────────────

/// Ordered severity bands over the composite score. Bounds are half-open:
/// [0,25) [25,50) [50,75) [75,∞).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskCategory {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskCategory {
    pub fn from_score(score: f64) -> Self {
        if score >= 75.0 {
            RiskCategory::Critical
        } else if score >= 50.0 {
            RiskCategory::High
        } else if score >= 25.0 {
            RiskCategory::Medium
        } else {
            RiskCategory::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskCategory::Low => "LOW",
            RiskCategory::Medium => "MEDIUM",
            RiskCategory::High => "HIGH",
            RiskCategory::Critical => "CRITICAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LOW" => Some(RiskCategory::Low),
            "MEDIUM" => Some(RiskCategory::Medium),
            "HIGH" => Some(RiskCategory::High),
            "CRITICAL" => Some(RiskCategory::Critical),
            _ => None,
        }
    }

    /// HIGH and CRITICAL feed the high-risk tracker view.
    pub fn is_high_risk(&self) -> bool {
        matches!(self, RiskCategory::High | RiskCategory::Critical)
    }
}

impl std::fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
