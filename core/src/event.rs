//! Operational event log — the audit trail of every wave.
//!
//! RULE: Scheduler and jobs record state changes as events; nothing in
//! the pipeline communicates through this log, it is write-once history
//! for operators and post-mortems.

use crate::types::{JobName, Wave};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Every event emitted during orchestration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OpsEvent {
    WaveStarted {
        wave: Wave,
    },
    WaveCompleted {
        wave: Wave,
        succeeded: usize,
        failed: usize,
        blocked: usize,
    },
    JobStarted {
        wave: Wave,
        job: JobName,
    },
    JobSucceeded {
        wave: Wave,
        job: JobName,
        rows_written: usize,
    },
    JobFailed {
        wave: Wave,
        job: JobName,
        error: String,
    },
    JobBlocked {
        wave: Wave,
        job: JobName,
        upstream: JobName,
    },
    StalenessBreached {
        wave: Wave,
        job: JobName,
        target_secs: i64,
        actual_secs: i64,
    },
    SnapshotPublished {
        wave: Wave,
        table: String,
        version: i64,
    },
    FreezeEngaged {
        wave: Wave,
    },
    FreezeLifted {
        wave: Wave,
    },
    AllSuspended {
        wave: Wave,
    },
    AllResumed {
        wave: Wave,
    },
}

impl OpsEvent {
    /// Stable string name for the event_type column.
    pub fn type_name(&self) -> &'static str {
        match self {
            OpsEvent::WaveStarted { .. } => "wave_started",
            OpsEvent::WaveCompleted { .. } => "wave_completed",
            OpsEvent::JobStarted { .. } => "job_started",
            OpsEvent::JobSucceeded { .. } => "job_succeeded",
            OpsEvent::JobFailed { .. } => "job_failed",
            OpsEvent::JobBlocked { .. } => "job_blocked",
            OpsEvent::StalenessBreached { .. } => "staleness_breached",
            OpsEvent::SnapshotPublished { .. } => "snapshot_published",
            OpsEvent::FreezeEngaged { .. } => "freeze_engaged",
            OpsEvent::FreezeLifted { .. } => "freeze_lifted",
            OpsEvent::AllSuspended { .. } => "all_suspended",
            OpsEvent::AllResumed { .. } => "all_resumed",
        }
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpsEventEntry {
    pub id: Option<i64>,
    pub wave: Wave,
    pub event_type: String,
    pub payload: String, // JSON-serialized OpsEvent
    pub created_at: DateTime<Utc>,
}
