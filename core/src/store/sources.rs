//! Source mirrors and change log queries.

use super::{ts_to_sql, Store};
use crate::{
    changelog::{ChangeOp, RecordSnapshot},
    error::CoreResult,
    materializer::JoinedGroup,
    types::SourceId,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

impl Store {
    // ── Source mirrors ─────────────────────────────────────────────

    pub fn upsert_source_record(
        &self,
        source: SourceId,
        record: &RecordSnapshot,
    ) -> CoreResult<()> {
        self.conn.execute(
            "INSERT INTO source_record
                 (source, customer_key, age_band, region, occupation_band,
                  risk_score, fraud_flags, activity_tier)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(source, customer_key) DO UPDATE SET
                 age_band        = excluded.age_band,
                 region          = excluded.region,
                 occupation_band = excluded.occupation_band,
                 risk_score      = excluded.risk_score,
                 fraud_flags     = excluded.fraud_flags,
                 activity_tier   = excluded.activity_tier",
            params![
                source.as_str(),
                record.customer_key,
                record.age_band,
                record.region,
                record.occupation_band,
                record.risk_score,
                record.fraud_flags,
                record.activity_tier.as_str(),
            ],
        )?;
        Ok(())
    }

    pub fn delete_source_record(&self, source: SourceId, customer_key: &str) -> CoreResult<()> {
        self.conn.execute(
            "DELETE FROM source_record WHERE source = ?1 AND customer_key = ?2",
            params![source.as_str(), customer_key],
        )?;
        Ok(())
    }

    pub fn source_record_count(&self, source: SourceId) -> CoreResult<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM source_record WHERE source = ?1",
            params![source.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Inner-join both mirrors on the pseudonymous key and group by the
    /// banking-side demographics. Tiers come back as severity ranks so
    /// MAX() picks the highest tier among a group's members.
    pub fn joined_groups(&self) -> CoreResult<Vec<JoinedGroup>> {
        let mut stmt = self.conn.prepare(
            "SELECT a.age_band, a.region, a.occupation_band,
                    COUNT(DISTINCT a.customer_key),
                    AVG(a.risk_score), AVG(b.risk_score),
                    SUM(a.fraud_flags), SUM(b.fraud_flags),
                    MAX(CASE a.activity_tier
                        WHEN 'critical' THEN 3 WHEN 'high' THEN 2
                        WHEN 'moderate' THEN 1 ELSE 0 END),
                    MAX(CASE b.activity_tier
                        WHEN 'critical' THEN 3 WHEN 'high' THEN 2
                        WHEN 'moderate' THEN 1 ELSE 0 END)
             FROM source_record a
             JOIN source_record b
               ON b.customer_key = a.customer_key AND b.source = 'insurance'
             WHERE a.source = 'bank'
             GROUP BY a.age_band, a.region, a.occupation_band
             ORDER BY a.age_band, a.region, a.occupation_band",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(JoinedGroup {
                age_band: row.get(0)?,
                region: row.get(1)?,
                occupation_band: row.get(2)?,
                record_count: row.get(3)?,
                avg_score_a: row.get(4)?,
                avg_score_b: row.get(5)?,
                flags_a: row.get(6)?,
                flags_b: row.get(7)?,
                tier_a_rank: row.get(8)?,
                tier_b_rank: row.get(9)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ── Change log ─────────────────────────────────────────────────

    pub fn append_change_event(
        &self,
        source: SourceId,
        op: ChangeOp,
        payload: &str,
        at: DateTime<Utc>,
    ) -> CoreResult<i64> {
        self.conn.execute(
            "INSERT INTO change_event (source, op, payload, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![source.as_str(), op.as_str(), payload, ts_to_sql(at)],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn change_events_after(
        &self,
        source: SourceId,
        after_seq: i64,
    ) -> CoreResult<Vec<(i64, ChangeOp, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT seq, op, payload FROM change_event
             WHERE source = ?1 AND seq > ?2
             ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![source.as_str(), after_seq], |row| {
            let op_str: String = row.get(1)?;
            let op = ChangeOp::parse(&op_str).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    1,
                    rusqlite::types::Type::Text,
                    format!("unknown change op '{op_str}'").into(),
                )
            })?;
            Ok((row.get::<_, i64>(0)?, op, row.get::<_, String>(2)?))
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn count_change_events_after(&self, source: SourceId, after_seq: i64) -> CoreResult<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM change_event WHERE source = ?1 AND seq > ?2",
            params![source.as_str(), after_seq],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn watermark(&self, source: SourceId) -> CoreResult<i64> {
        // Only a missing row defaults to zero; real errors propagate.
        let wm: Option<i64> = self
            .conn
            .query_row(
                "SELECT acked_seq FROM change_watermark WHERE source = ?1",
                params![source.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(wm.unwrap_or(0))
    }

    /// Monotonic: acking an older watermark is a no-op.
    pub fn advance_watermark(&self, source: SourceId, watermark: i64) -> CoreResult<()> {
        self.conn.execute(
            "INSERT INTO change_watermark (source, acked_seq) VALUES (?1, ?2)
             ON CONFLICT(source) DO UPDATE SET
                 acked_seq = MAX(acked_seq, excluded.acked_seq)",
            params![source.as_str(), watermark],
        )?;
        Ok(())
    }
}
