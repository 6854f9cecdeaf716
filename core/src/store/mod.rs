//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database. Jobs and the scheduler
//! call store methods — they never execute SQL directly.
//!
//! Published tables (the aggregate and every derived view) follow a
//! versioned-pointer discipline: writers insert a complete result set
//! under a fresh version inside one transaction, then advance the
//! `table_version` pointer as the last statement before commit. Readers
//! resolve the pointer first, so they observe either the fully-old or the
//! fully-new snapshot, never a mix.

mod compliance;
mod derived;
mod jobs;
mod segments;
mod sources;

pub use segments::Overview;

use crate::error::CoreResult;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

pub const SEGMENT_TABLE: &str = "aggregated_segment";
pub const AGE_ROLLUP_TABLE: &str = "age_rollup";
pub const REGION_ROLLUP_TABLE: &str = "region_rollup";
pub const HIGH_RISK_TABLE: &str = "high_risk_tracker";
pub const REGION_TREND_TABLE: &str = "region_trend";

pub struct Store {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path/URI) otherwise
}

impl Store {
    pub fn open(path: &str) -> CoreResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an isolated in-memory database. Fine for store-level tests;
    /// use `shared_memory` when jobs need to see the same data.
    pub fn in_memory() -> CoreResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Shared in-memory database addressable by tag. Every `reopen` of
    /// this store (one per registered job) sees the same tables.
    pub fn shared_memory(tag: &str) -> CoreResult<Self> {
        Self::open(&format!("file:{tag}?mode=memory&cache=shared"))
    }

    /// Open a new connection to the same database. For an isolated
    /// in-memory store this returns a fresh, empty database.
    pub fn reopen(&self) -> CoreResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> CoreResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_aggregates.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_derived_views.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/004_scheduler.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/005_compliance.sql"))?;
        Ok(())
    }

    // ── Versioned publish ──────────────────────────────────────────

    /// Replace the contents of a published table. `insert_rows` writes
    /// the new result set under the version it is handed; the pointer
    /// bump and the prune of superseded versions happen in the same
    /// transaction. Returns (new version, rows written).
    pub(crate) fn replace_versioned<F>(
        &self,
        table: &str,
        refreshed_at: DateTime<Utc>,
        insert_rows: F,
    ) -> CoreResult<(i64, usize)>
    where
        F: FnOnce(&Connection, i64) -> rusqlite::Result<usize>,
    {
        let tx = self.conn.unchecked_transaction()?;

        let current: Option<i64> = tx
            .query_row(
                "SELECT published_version FROM table_version WHERE table_name = ?1",
                params![table],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        let next = current.unwrap_or(0) + 1;

        let written = insert_rows(&tx, next)?;

        tx.execute(
            "INSERT INTO table_version (table_name, published_version, previous_version, last_refreshed)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(table_name) DO UPDATE SET
                 published_version = excluded.published_version,
                 previous_version  = excluded.previous_version,
                 last_refreshed    = excluded.last_refreshed",
            params![table, next, current, ts_to_sql(refreshed_at)],
        )?;

        // Keep exactly the new and the previous version; the previous one
        // backs the auditor's rollback path.
        if let Some(prev) = current {
            tx.execute(
                &format!("DELETE FROM {table} WHERE version < ?1"),
                params![prev],
            )?;
        }

        tx.commit()?;
        Ok((next, written))
    }

    pub fn published_version(&self, table: &str) -> CoreResult<Option<i64>> {
        let v: Option<Option<i64>> = self
            .conn
            .query_row(
                "SELECT published_version FROM table_version WHERE table_name = ?1",
                params![table],
                |row| row.get(0),
            )
            .optional()?;
        Ok(v.flatten())
    }

    pub fn last_refreshed(&self, table: &str) -> CoreResult<Option<DateTime<Utc>>> {
        let v: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT last_refreshed FROM table_version WHERE table_name = ?1",
                params![table],
                |row| row.get(0),
            )
            .optional()?;
        match v.flatten() {
            Some(s) => Ok(Some(ts_from_sql(&s)?)),
            None => Ok(None),
        }
    }

    /// Revert the published pointer to the previous version and drop the
    /// rejected rows. Returns false when there is nothing to roll back.
    pub fn rollback_publish(&self, table: &str) -> CoreResult<bool> {
        let tx = self.conn.unchecked_transaction()?;

        let row: Option<(Option<i64>, Option<i64>)> = tx
            .query_row(
                "SELECT published_version, previous_version FROM table_version WHERE table_name = ?1",
                params![table],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (published, previous) = match row {
            Some((Some(p), Some(prev))) => (p, prev),
            _ => return Ok(false),
        };

        tx.execute(
            &format!("DELETE FROM {table} WHERE version = ?1"),
            params![published],
        )?;
        tx.execute(
            "UPDATE table_version SET published_version = ?2, previous_version = NULL
             WHERE table_name = ?1",
            params![table, previous],
        )?;

        tx.commit()?;
        Ok(true)
    }
}

// ── Timestamp mapping ──────────────────────────────────────────────

// Fixed precision keeps the TEXT column lexicographically ordered, so
// date-range filters can compare strings directly.
pub(crate) fn ts_to_sql(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

pub(crate) fn ts_from_sql(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}
