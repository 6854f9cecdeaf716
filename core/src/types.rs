//! Shared primitive types used across the whole pipeline.

use serde::{Deserialize, Serialize};

/// A refresh wave. One wave = one execution pass of the job graph.
pub type Wave = u64;

/// The pseudonymous join key shared by both sources.
pub type CustomerKey = String;

/// Canonical job identifier within the scheduler graph.
pub type JobName = String;

/// The two independently-owned record sets. Source A is the banking
/// feed, source B the insurance feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    Bank,
    Insurance,
}

impl SourceId {
    pub const ALL: [SourceId; 2] = [SourceId::Bank, SourceId::Insurance];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::Bank => "bank",
            SourceId::Insurance => "insurance",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bank" => Some(SourceId::Bank),
            "insurance" => Some(SourceId::Insurance),
            _ => None,
        }
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
