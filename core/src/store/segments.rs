//! Aggregated segment reads and the versioned replace.

use super::{ts_from_sql, ts_to_sql, Store, SEGMENT_TABLE};
use crate::{error::CoreResult, materializer::AggregatedSegment, scoring::RiskCategory};
use rusqlite::params;
use serde::Serialize;

/// Platform-overview numbers backing the operator surface.
#[derive(Debug, Clone, Serialize)]
pub struct Overview {
    pub total_segments: i64,
    pub total_customers: i64,
    pub avg_composite: f64,
    pub high_risk_customers: i64,
}

impl Store {
    /// Write a complete new segment snapshot and advance the pointer.
    /// The k filter is the materializer's concern; this method publishes
    /// whatever it is handed.
    pub fn replace_segments(
        &self,
        rows: &[AggregatedSegment],
        refreshed_at: chrono::DateTime<chrono::Utc>,
    ) -> CoreResult<i64> {
        let (version, _) = self.replace_versioned(SEGMENT_TABLE, refreshed_at, |conn, version| {
            let mut stmt = conn.prepare(
                "INSERT INTO aggregated_segment
                     (version, age_band, region, occupation_band, record_count,
                      avg_score_a, avg_score_b, composite_score, risk_category,
                      fraud_correlation_score, fraud_pattern, last_refreshed)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?;
            for row in rows {
                stmt.execute(params![
                    version,
                    row.age_band,
                    row.region,
                    row.occupation_band,
                    row.record_count,
                    row.avg_score_a,
                    row.avg_score_b,
                    row.composite_score,
                    row.risk_category.as_str(),
                    row.fraud_correlation_score,
                    row.fraud_pattern,
                    ts_to_sql(row.last_refreshed),
                ])?;
            }
            Ok(rows.len())
        })?;
        Ok(version)
    }

    pub fn published_segments(&self) -> CoreResult<Vec<AggregatedSegment>> {
        let mut stmt = self.conn.prepare(
            "SELECT age_band, region, occupation_band, record_count,
                    avg_score_a, avg_score_b, composite_score, risk_category,
                    fraud_correlation_score, fraud_pattern, last_refreshed
             FROM aggregated_segment
             WHERE version = (SELECT published_version FROM table_version
                              WHERE table_name = 'aggregated_segment')
             ORDER BY age_band, region, occupation_band",
        )?;

        let rows = stmt.query_map([], |row| {
            let category: String = row.get(7)?;
            let refreshed: String = row.get(10)?;
            Ok(AggregatedSegment {
                age_band: row.get(0)?,
                region: row.get(1)?,
                occupation_band: row.get(2)?,
                record_count: row.get(3)?,
                avg_score_a: row.get(4)?,
                avg_score_b: row.get(5)?,
                composite_score: row.get(6)?,
                risk_category: RiskCategory::parse(&category).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        7,
                        rusqlite::types::Type::Text,
                        format!("unknown risk category '{category}'").into(),
                    )
                })?,
                fraud_correlation_score: row.get(8)?,
                fraud_pattern: row.get(9)?,
                last_refreshed: ts_from_sql(&refreshed)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Auditor's defense-in-depth rescan: published rows below k.
    pub fn undersized_published_segments(&self, k: i64) -> CoreResult<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM aggregated_segment
             WHERE version = (SELECT published_version FROM table_version
                              WHERE table_name = 'aggregated_segment')
               AND record_count < ?1",
            params![k],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn overview(&self) -> CoreResult<Overview> {
        self.conn
            .query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(record_count), 0),
                        COALESCE(AVG(composite_score), 0.0),
                        COALESCE(SUM(CASE WHEN risk_category IN ('HIGH', 'CRITICAL')
                                          THEN record_count ELSE 0 END), 0)
                 FROM aggregated_segment
                 WHERE version = (SELECT published_version FROM table_version
                                  WHERE table_name = 'aggregated_segment')",
                [],
                |row| {
                    Ok(Overview {
                        total_segments: row.get(0)?,
                        total_customers: row.get(1)?,
                        avg_composite: row.get(2)?,
                        high_risk_customers: row.get(3)?,
                    })
                },
            )
            .map_err(Into::into)
    }

    /// Per-category segment and customer counts, ordered CRITICAL first.
    pub fn category_distribution(&self) -> CoreResult<Vec<(String, i64, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT risk_category, COUNT(*), SUM(record_count)
             FROM aggregated_segment
             WHERE version = (SELECT published_version FROM table_version
                              WHERE table_name = 'aggregated_segment')
             GROUP BY risk_category
             ORDER BY CASE risk_category
                 WHEN 'CRITICAL' THEN 1 WHEN 'HIGH' THEN 2
                 WHEN 'MEDIUM' THEN 3 WHEN 'LOW' THEN 4 END",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
