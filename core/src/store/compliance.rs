//! Compliance log and fraud signal queries. Both tables are append-only.

use super::{ts_from_sql, ts_to_sql, Store};
use crate::{
    auditor::{CheckResult, CheckType, ComplianceRecord},
    error::CoreResult,
    fraud::FraudSignal,
};
use chrono::{DateTime, Utc};
use rusqlite::params;

impl Store {
    pub fn append_compliance(&self, record: &ComplianceRecord) -> CoreResult<()> {
        self.conn.execute(
            "INSERT INTO compliance_log
                 (compliance_id, check_type, target, result, details, checked_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.compliance_id,
                record.check_type.as_str(),
                record.target,
                record.result.as_str(),
                record.details,
                ts_to_sql(record.checked_at),
            ],
        )?;
        Ok(())
    }

    /// Compliance export surface: optional check-type filter plus a date
    /// range, newest first.
    pub fn export_compliance(
        &self,
        check_type: Option<CheckType>,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> CoreResult<Vec<ComplianceRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT compliance_id, check_type, target, result, details, checked_at
             FROM compliance_log
             WHERE checked_at >= ?1 AND checked_at <= ?2
               AND (?3 IS NULL OR check_type = ?3)
             ORDER BY checked_at DESC, compliance_id",
        )?;

        let filter = check_type.map(|c| c.as_str());
        let rows = stmt.query_map(
            params![ts_to_sql(since), ts_to_sql(until), filter],
            |row| {
                let check: String = row.get(1)?;
                let result: String = row.get(3)?;
                let checked: String = row.get(5)?;
                Ok(ComplianceRecord {
                    compliance_id: row.get(0)?,
                    check_type: CheckType::parse(&check).ok_or_else(|| {
                        rusqlite::Error::FromSqlConversionFailure(
                            1,
                            rusqlite::types::Type::Text,
                            format!("unknown check type '{check}'").into(),
                        )
                    })?,
                    target: row.get(2)?,
                    result: CheckResult::parse(&result).ok_or_else(|| {
                        rusqlite::Error::FromSqlConversionFailure(
                            3,
                            rusqlite::types::Type::Text,
                            format!("unknown check result '{result}'").into(),
                        )
                    })?,
                    details: row.get(4)?,
                    checked_at: ts_from_sql(&checked)?,
                })
            },
        )?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn append_fraud_signal(&self, signal: &FraudSignal) -> CoreResult<()> {
        self.conn.execute(
            "INSERT INTO fraud_signal
                 (signal_id, age_band, region, occupation_band, pattern,
                  affected_count, confidence, detected_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                signal.signal_id,
                signal.age_band,
                signal.region,
                signal.occupation_band,
                signal.pattern,
                signal.affected_count,
                signal.confidence,
                ts_to_sql(signal.detected_at),
            ],
        )?;
        Ok(())
    }

    pub fn fraud_signals(&self) -> CoreResult<Vec<FraudSignal>> {
        let mut stmt = self.conn.prepare(
            "SELECT signal_id, age_band, region, occupation_band, pattern,
                    affected_count, confidence, detected_at
             FROM fraud_signal
             ORDER BY detected_at DESC, signal_id",
        )?;
        let rows = stmt.query_map([], |row| {
            let detected: String = row.get(7)?;
            Ok(FraudSignal {
                signal_id: row.get(0)?,
                age_band: row.get(1)?,
                region: row.get(2)?,
                occupation_band: row.get(3)?,
                pattern: row.get(4)?,
                affected_count: row.get(5)?,
                confidence: row.get(6)?,
                detected_at: ts_from_sql(&detected)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn fraud_signal_count(&self) -> CoreResult<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM fraud_signal", [], |row| row.get(0))?;
        Ok(count)
    }
}
