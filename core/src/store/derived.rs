//! Derived view tables: rollups, high-risk tracker, regional trend.
//!
//! The replace_* methods aggregate SQL-side over the published segment
//! version so each view's snapshot is internally consistent with exactly
//! one upstream snapshot.

use super::{
    ts_from_sql, ts_to_sql, Store, AGE_ROLLUP_TABLE, HIGH_RISK_TABLE, REGION_ROLLUP_TABLE,
    REGION_TREND_TABLE,
};
use crate::{
    derived::{trend_direction, AgeRollupRow, HighRiskRow, RegionRollupRow, TrendDirection, TrendRow},
    error::CoreResult,
    scoring::RiskCategory,
};
use chrono::{DateTime, Utc};
use rusqlite::params;

const PUBLISHED_SEGMENTS: &str = "SELECT published_version FROM table_version
                                  WHERE table_name = 'aggregated_segment'";

impl Store {
    // ── Writes ─────────────────────────────────────────────────────

    pub fn replace_age_rollup(&self, refreshed_at: DateTime<Utc>) -> CoreResult<(i64, usize)> {
        self.replace_versioned(AGE_ROLLUP_TABLE, refreshed_at, |conn, version| {
            conn.execute(
                &format!(
                    "INSERT INTO age_rollup
                         (version, age_band, segment_count, customer_count,
                          avg_composite, last_refreshed)
                     SELECT ?1, age_band, COUNT(*), SUM(record_count),
                            AVG(composite_score), ?2
                     FROM aggregated_segment
                     WHERE version = ({PUBLISHED_SEGMENTS})
                     GROUP BY age_band"
                ),
                params![version, ts_to_sql(refreshed_at)],
            )
        })
    }

    pub fn replace_region_rollup(&self, refreshed_at: DateTime<Utc>) -> CoreResult<(i64, usize)> {
        self.replace_versioned(REGION_ROLLUP_TABLE, refreshed_at, |conn, version| {
            conn.execute(
                &format!(
                    "INSERT INTO region_rollup
                         (version, region, segment_count, customer_count,
                          avg_composite, last_refreshed)
                     SELECT ?1, region, COUNT(*), SUM(record_count),
                            AVG(composite_score), ?2
                     FROM aggregated_segment
                     WHERE version = ({PUBLISHED_SEGMENTS})
                     GROUP BY region"
                ),
                params![version, ts_to_sql(refreshed_at)],
            )
        })
    }

    pub fn replace_high_risk_tracker(
        &self,
        refreshed_at: DateTime<Utc>,
    ) -> CoreResult<(i64, usize)> {
        self.replace_versioned(HIGH_RISK_TABLE, refreshed_at, |conn, version| {
            conn.execute(
                &format!(
                    "INSERT INTO high_risk_tracker
                         (version, age_band, region, occupation_band, record_count,
                          composite_score, risk_category, last_refreshed)
                     SELECT ?1, age_band, region, occupation_band, record_count,
                            composite_score, risk_category, ?2
                     FROM aggregated_segment
                     WHERE version = ({PUBLISHED_SEGMENTS})
                       AND risk_category IN ('HIGH', 'CRITICAL')"
                ),
                params![version, ts_to_sql(refreshed_at)],
            )
        })
    }

    /// The trend view is a look-back join against its own previously
    /// published snapshot: the prior value for a region is whatever the
    /// outgoing trend version carried as current.
    pub fn replace_region_trend(&self, refreshed_at: DateTime<Utc>) -> CoreResult<(i64, usize)> {
        self.replace_versioned(REGION_TREND_TABLE, refreshed_at, |conn, version| {
            // Prior values from the still-published trend snapshot.
            let mut priors: std::collections::HashMap<String, f64> = std::collections::HashMap::new();
            {
                let mut stmt = conn.prepare(
                    "SELECT region, current_avg FROM region_trend
                     WHERE version = (SELECT published_version FROM table_version
                                      WHERE table_name = 'region_trend')",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
                })?;
                for row in rows {
                    let (region, avg) = row?;
                    priors.insert(region, avg);
                }
            }

            let current: Vec<(String, f64)> = {
                let mut stmt = conn.prepare(&format!(
                    "SELECT region, AVG(composite_score)
                     FROM aggregated_segment
                     WHERE version = ({PUBLISHED_SEGMENTS})
                     GROUP BY region
                     ORDER BY region"
                ))?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
                })?;
                rows.collect::<Result<Vec<_>, _>>()?
            };

            let mut stmt = conn.prepare(
                "INSERT INTO region_trend
                     (version, region, current_avg, prior_avg, direction, last_refreshed)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (region, avg) in &current {
                let prior = priors.get(region).copied();
                let direction = trend_direction(*avg, prior);
                stmt.execute(params![
                    version,
                    region,
                    avg,
                    prior,
                    direction.as_str(),
                    ts_to_sql(refreshed_at),
                ])?;
            }
            Ok(current.len())
        })
    }

    // ── Reads (published snapshots only) ───────────────────────────

    pub fn published_age_rollup(&self) -> CoreResult<Vec<AgeRollupRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT age_band, segment_count, customer_count, avg_composite, last_refreshed
             FROM age_rollup
             WHERE version = (SELECT published_version FROM table_version
                              WHERE table_name = 'age_rollup')
             ORDER BY age_band",
        )?;
        let rows = stmt.query_map([], |row| {
            let refreshed: String = row.get(4)?;
            Ok(AgeRollupRow {
                age_band: row.get(0)?,
                segment_count: row.get(1)?,
                customer_count: row.get(2)?,
                avg_composite: row.get(3)?,
                last_refreshed: ts_from_sql(&refreshed)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn published_region_rollup(&self) -> CoreResult<Vec<RegionRollupRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT region, segment_count, customer_count, avg_composite, last_refreshed
             FROM region_rollup
             WHERE version = (SELECT published_version FROM table_version
                              WHERE table_name = 'region_rollup')
             ORDER BY region",
        )?;
        let rows = stmt.query_map([], |row| {
            let refreshed: String = row.get(4)?;
            Ok(RegionRollupRow {
                region: row.get(0)?,
                segment_count: row.get(1)?,
                customer_count: row.get(2)?,
                avg_composite: row.get(3)?,
                last_refreshed: ts_from_sql(&refreshed)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn published_high_risk(&self) -> CoreResult<Vec<HighRiskRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT age_band, region, occupation_band, record_count,
                    composite_score, risk_category, last_refreshed
             FROM high_risk_tracker
             WHERE version = (SELECT published_version FROM table_version
                              WHERE table_name = 'high_risk_tracker')
             ORDER BY composite_score DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            let category: String = row.get(5)?;
            let refreshed: String = row.get(6)?;
            Ok(HighRiskRow {
                age_band: row.get(0)?,
                region: row.get(1)?,
                occupation_band: row.get(2)?,
                record_count: row.get(3)?,
                composite_score: row.get(4)?,
                risk_category: RiskCategory::parse(&category).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        5,
                        rusqlite::types::Type::Text,
                        format!("unknown risk category '{category}'").into(),
                    )
                })?,
                last_refreshed: ts_from_sql(&refreshed)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn published_region_trend(&self) -> CoreResult<Vec<TrendRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT region, current_avg, prior_avg, direction, last_refreshed
             FROM region_trend
             WHERE version = (SELECT published_version FROM table_version
                              WHERE table_name = 'region_trend')
             ORDER BY region",
        )?;
        let rows = stmt.query_map([], |row| {
            let direction: String = row.get(3)?;
            let refreshed: String = row.get(4)?;
            Ok(TrendRow {
                region: row.get(0)?,
                current_avg: row.get(1)?,
                prior_avg: row.get(2)?,
                direction: TrendDirection::parse(&direction).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        3,
                        rusqlite::types::Type::Text,
                        format!("unknown trend direction '{direction}'").into(),
                    )
                })?,
                last_refreshed: ts_from_sql(&refreshed)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
