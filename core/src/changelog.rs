//! Change Log adapter — the core's only view of ingestion.
//!
//! Ingestion (external) appends insert/update/delete events per source;
//! the materializer drains them through this adapter and advances a
//! monotonic per-source watermark once its publish commits. Consumption
//! is at-least-once: a wave that fails after draining leaves the
//! watermark behind and replays the same events next wave, and a
//! replayed event re-applies the same snapshot, so the wholesale
//! recomputation downstream makes that harmless.

use crate::{
    error::CoreResult,
    fraud::ActivityTier,
    store::Store,
    types::SourceId,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

impl ChangeOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOp::Insert => "insert",
            ChangeOp::Update => "update",
            ChangeOp::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "insert" => Some(ChangeOp::Insert),
            "update" => Some(ChangeOp::Update),
            "delete" => Some(ChangeOp::Delete),
            _ => None,
        }
    }
}

/// The per-source record as captured at event time. Categorical
/// attributes are low-cardinality and public; the key is pseudonymous.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSnapshot {
    pub customer_key: String,
    pub age_band: String,
    pub region: String,
    pub occupation_band: String,
    pub risk_score: f64,
    pub fraud_flags: i64,
    pub activity_tier: ActivityTier,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub source: SourceId,
    pub seq: i64,
    pub op: ChangeOp,
    pub record: RecordSnapshot,
}

/// Seam between the core and the (external) ingestion side. The SQLite
/// implementation below is the production path; tests substitute failing
/// implementations to exercise SourceUnavailable handling.
pub trait ChangeLogAdapter: Send {
    /// Ordered events since the last acknowledged watermark.
    fn poll(&self, source: SourceId) -> CoreResult<Vec<ChangeEvent>>;

    /// Advance the watermark. Monotonic: an older watermark is a no-op.
    fn ack(&self, source: SourceId, watermark: i64) -> CoreResult<()>;

    /// Count of unconsumed events; drives the change-pending trigger.
    fn pending(&self, source: SourceId) -> CoreResult<i64>;
}

pub struct SqliteChangeLog {
    store: Store,
}

impl SqliteChangeLog {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Append an event on behalf of ingestion. Returns the assigned
    /// sequence number. Used by the ops-runner seeder and tests; the
    /// real feed writes the same table out-of-process.
    pub fn push(
        &self,
        source: SourceId,
        op: ChangeOp,
        record: &RecordSnapshot,
        at: chrono::DateTime<chrono::Utc>,
    ) -> CoreResult<i64> {
        let payload = serde_json::to_string(record)?;
        self.store.append_change_event(source, op, &payload, at)
    }
}

impl ChangeLogAdapter for SqliteChangeLog {
    fn poll(&self, source: SourceId) -> CoreResult<Vec<ChangeEvent>> {
        let acked = self.store.watermark(source)?;
        let raw = self.store.change_events_after(source, acked)?;
        let mut events = Vec::with_capacity(raw.len());
        for (seq, op, payload) in raw {
            let record: RecordSnapshot = serde_json::from_str(&payload)?;
            events.push(ChangeEvent {
                source,
                seq,
                op,
                record,
            });
        }
        Ok(events)
    }

    fn ack(&self, source: SourceId, watermark: i64) -> CoreResult<()> {
        self.store.advance_watermark(source, watermark)
    }

    fn pending(&self, source: SourceId) -> CoreResult<i64> {
        let acked = self.store.watermark(source)?;
        self.store.count_change_events_after(source, acked)
    }
}
