//! Scheduler-owned job state rows and the operational event log.

use super::{ts_from_sql, ts_to_sql, Store};
use crate::{
    error::CoreResult,
    event::{OpsEvent, OpsEventEntry},
    scheduler::{JobState, JobStatus},
    types::Wave,
};
use chrono::{DateTime, Utc};
use rusqlite::params;

impl Store {
    pub fn upsert_job_state(
        &self,
        name: &str,
        state: JobState,
        last_run: Option<DateTime<Utc>>,
        next_run: Option<DateTime<Utc>>,
        last_error: Option<&str>,
    ) -> CoreResult<()> {
        self.conn.execute(
            "INSERT INTO refresh_job (name, state, last_run, next_run, last_error)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(name) DO UPDATE SET
                 state      = excluded.state,
                 last_run   = excluded.last_run,
                 next_run   = excluded.next_run,
                 last_error = excluded.last_error",
            params![
                name,
                state.as_str(),
                last_run.map(ts_to_sql),
                next_run.map(ts_to_sql),
                last_error,
            ],
        )?;
        Ok(())
    }

    pub fn job_states(&self) -> CoreResult<Vec<JobStatus>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, state, last_run, next_run, last_error
             FROM refresh_job ORDER BY name",
        )?;
        let rows = stmt.query_map([], |row| {
            let state: String = row.get(1)?;
            let last_run: Option<String> = row.get(2)?;
            let next_run: Option<String> = row.get(3)?;
            Ok(JobStatus {
                name: row.get(0)?,
                state: JobState::parse(&state).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        1,
                        rusqlite::types::Type::Text,
                        format!("unknown job state '{state}'").into(),
                    )
                })?,
                last_run: last_run.as_deref().map(ts_from_sql).transpose()?,
                next_run: next_run.as_deref().map(ts_from_sql).transpose()?,
                last_error: row.get(4)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn append_ops_event(&self, entry: &OpsEventEntry) -> CoreResult<()> {
        self.conn.execute(
            "INSERT INTO ops_event (wave, event_type, payload, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.wave as i64,
                entry.event_type,
                entry.payload,
                ts_to_sql(entry.created_at),
            ],
        )?;
        Ok(())
    }

    /// Record a versioned-table publish in the event log. Called by each
    /// publishing job right after its pointer bump commits.
    pub fn record_snapshot_published(
        &self,
        wave: Wave,
        table: &str,
        version: i64,
        at: DateTime<Utc>,
    ) -> CoreResult<()> {
        let event = OpsEvent::SnapshotPublished {
            wave,
            table: table.to_string(),
            version,
        };
        self.append_ops_event(&OpsEventEntry {
            id: None,
            wave,
            event_type: event.type_name().to_string(),
            payload: serde_json::to_string(&event)?,
            created_at: at,
        })
    }

    pub fn ops_events_for_wave(&self, wave: Wave) -> CoreResult<Vec<OpsEventEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, wave, event_type, payload, created_at
             FROM ops_event WHERE wave = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![wave as i64], |row| {
            let created: String = row.get(4)?;
            Ok(OpsEventEntry {
                id: Some(row.get(0)?),
                wave: row.get::<_, i64>(1)? as u64,
                event_type: row.get(2)?,
                payload: row.get(3)?,
                created_at: ts_from_sql(&created)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
