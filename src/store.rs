//! SQLite telemetry store
//!
//! A single connection behind a mutex. Every operation is short, so callers
//! on the async runtime use it directly.

use crate::backfill::BackfillCursor;
use crate::config::SystemConfig;
use crate::credentials::OAuthToken;
use crate::error::{HelionError, Result};
use crate::source::{PointSpec, Reading};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS systems (
    id              TEXT PRIMARY KEY,
    name            TEXT NOT NULL,
    vendor          TEXT NOT NULL,
    vendor_site_id  TEXT NOT NULL,
    timezone        TEXT NOT NULL,
    latitude        REAL NOT NULL,
    longitude       REAL NOT NULL,
    earliest_day    TEXT
);

CREATE TABLE IF NOT EXISTS points (
    system_id  TEXT NOT NULL REFERENCES systems(id) ON DELETE CASCADE,
    key        TEXT NOT NULL,
    unit       TEXT NOT NULL,
    label      TEXT NOT NULL,
    UNIQUE (system_id, key)
);

CREATE TABLE IF NOT EXISTS readings (
    system_id  TEXT NOT NULL REFERENCES systems(id) ON DELETE CASCADE,
    point      TEXT NOT NULL,
    ts         INTEGER NOT NULL,
    value      REAL NOT NULL,
    UNIQUE (system_id, point, ts)
);

CREATE INDEX IF NOT EXISTS idx_readings_point_ts
    ON readings(system_id, point, ts);

CREATE TABLE IF NOT EXISTS credentials (
    system_id      TEXT PRIMARY KEY REFERENCES systems(id) ON DELETE CASCADE,
    access_token   TEXT NOT NULL,
    refresh_token  TEXT NOT NULL,
    expires_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS poll_runs (
    id                TEXT PRIMARY KEY,
    system_id         TEXT NOT NULL REFERENCES systems(id) ON DELETE CASCADE,
    reason            TEXT NOT NULL,
    started_at        TEXT NOT NULL,
    finished_at       TEXT NOT NULL,
    outcome           TEXT NOT NULL,
    message           TEXT,
    readings_written  INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_poll_runs_system_started
    ON poll_runs(system_id, started_at DESC);

CREATE TABLE IF NOT EXISTS backfill_state (
    system_id   TEXT PRIMARY KEY REFERENCES systems(id) ON DELETE CASCADE,
    oldest_day  TEXT,
    complete    INTEGER NOT NULL DEFAULT 0
);
";

/// A monitored system as stored
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemRecord {
    pub id: String,
    pub name: String,
    pub vendor: String,
    pub vendor_site_id: String,
    pub timezone: String,
    pub latitude: f64,
    pub longitude: f64,
    pub earliest_day: Option<NaiveDate>,
}

impl SystemRecord {
    pub fn from_config(system: &SystemConfig, timezone: &str) -> Self {
        let name = if system.name.trim().is_empty() {
            system.id.clone()
        } else {
            system.name.clone()
        };
        Self {
            id: system.id.clone(),
            name,
            vendor: system.vendor.as_str().to_string(),
            vendor_site_id: system.site_id.clone(),
            timezone: timezone.to_string(),
            latitude: system.latitude,
            longitude: system.longitude,
            earliest_day: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PointRecord {
    pub key: String,
    pub unit: String,
    pub label: String,
}

/// Why a poll ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollReason {
    Scheduled,
    Correction,
    Manual,
    Backfill,
}

impl PollReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Correction => "correction",
            Self::Manual => "manual",
            Self::Backfill => "backfill",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "correction" => Self::Correction,
            "manual" => Self::Manual,
            "backfill" => Self::Backfill,
            _ => Self::Scheduled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Ok,
    Error,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }
}

/// One row of the poll audit log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollRun {
    pub id: String,
    pub system_id: String,
    pub reason: PollReason,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub message: Option<String>,
    pub readings_written: u64,
}

impl PollRun {
    /// Start a run record with a fresh id; finish it with `succeeded`/`failed`
    pub fn begin(system_id: &str, reason: PollReason, started_at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            system_id: system_id.to_string(),
            reason,
            started_at,
            finished_at: started_at,
            outcome: RunOutcome::Ok,
            message: None,
            readings_written: 0,
        }
    }

    pub fn succeeded(mut self, finished_at: DateTime<Utc>, written: u64) -> Self {
        self.finished_at = finished_at;
        self.outcome = RunOutcome::Ok;
        self.readings_written = written;
        self
    }

    pub fn failed(mut self, finished_at: DateTime<Utc>, message: impl Into<String>) -> Self {
        self.finished_at = finished_at;
        self.outcome = RunOutcome::Error;
        self.message = Some(message.into());
        self
    }
}

#[derive(Debug)]
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (creating if needed) the database file and apply the schema
    pub fn open(path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                HelionError::database(format!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        let conn = Connection::open(path)
            .map_err(|e| HelionError::database(format!("Failed to open {}: {}", path, e)))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| HelionError::database("database mutex poisoned"))
    }

    /// Insert or update a system, keeping a previously learned earliest day
    pub fn upsert_system(&self, system: &SystemRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO systems (id, name, vendor, vendor_site_id, timezone, latitude, longitude, earliest_day)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                vendor = excluded.vendor,
                vendor_site_id = excluded.vendor_site_id,
                timezone = excluded.timezone,
                latitude = excluded.latitude,
                longitude = excluded.longitude,
                earliest_day = COALESCE(excluded.earliest_day, systems.earliest_day)",
            params![
                system.id,
                system.name,
                system.vendor,
                system.vendor_site_id,
                system.timezone,
                system.latitude,
                system.longitude,
                system.earliest_day
            ],
        )?;
        Ok(())
    }

    pub fn list_systems(&self) -> Result<Vec<SystemRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, vendor, vendor_site_id, timezone, latitude, longitude, earliest_day
             FROM systems ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], system_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn get_system(&self, id: &str) -> Result<Option<SystemRecord>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, name, vendor, vendor_site_id, timezone, latitude, longitude, earliest_day
                 FROM systems WHERE id = ?1",
                params![id],
                system_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn set_earliest_day(&self, id: &str, day: NaiveDate) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE systems SET earliest_day = ?2 WHERE id = ?1",
            params![id, day],
        )?;
        if changed == 0 {
            return Err(HelionError::not_found(format!("system '{}'", id)));
        }
        Ok(())
    }

    /// Declare the points a system reports; existing labels are refreshed
    pub fn register_points(&self, system_id: &str, specs: &[PointSpec]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO points (system_id, key, unit, label) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(system_id, key) DO UPDATE SET unit = excluded.unit, label = excluded.label",
            )?;
            for spec in specs {
                stmt.execute(params![system_id, spec.key, spec.unit, spec.label])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn list_points(&self, system_id: &str) -> Result<Vec<PointRecord>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT key, unit, label FROM points WHERE system_id = ?1 ORDER BY key")?;
        let rows = stmt
            .query_map(params![system_id], |row| {
                Ok(PointRecord {
                    key: row.get(0)?,
                    unit: row.get(1)?,
                    label: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Upsert readings; a later value for the same point and instant wins.
    /// Returns the number of rows written.
    pub fn insert_readings(&self, system_id: &str, readings: &[Reading]) -> Result<usize> {
        if readings.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut written = 0;
        {
            let mut point_stmt = tx.prepare(
                "INSERT OR IGNORE INTO points (system_id, key, unit, label) VALUES (?1, ?2, '', ?2)",
            )?;
            let mut stmt = tx.prepare(
                "INSERT INTO readings (system_id, point, ts, value) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(system_id, point, ts) DO UPDATE SET value = excluded.value",
            )?;
            for r in readings {
                if !r.value.is_finite() {
                    continue;
                }
                point_stmt.execute(params![system_id, r.point])?;
                written += stmt.execute(params![system_id, r.point, r.ts.timestamp(), r.value])?;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    /// Most recent reading of every point
    pub fn latest_readings(&self, system_id: &str) -> Result<Vec<Reading>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT r.point, r.ts, r.value
             FROM readings r
             JOIN (SELECT point, MAX(ts) AS ts FROM readings WHERE system_id = ?1 GROUP BY point) m
               ON r.point = m.point AND r.ts = m.ts
             WHERE r.system_id = ?1
             ORDER BY r.point",
        )?;
        let rows = stmt
            .query_map(params![system_id], reading_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Readings of one point in `[from, to)`, oldest first
    pub fn readings_between(
        &self,
        system_id: &str,
        point: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reading>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT point, ts, value FROM readings
             WHERE system_id = ?1 AND point = ?2 AND ts >= ?3 AND ts < ?4
             ORDER BY ts ASC LIMIT ?5",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(
                params![system_id, point, from.timestamp(), to.timestamp(), limit],
                reading_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn save_credentials(&self, system_id: &str, token: &OAuthToken) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO credentials (system_id, access_token, refresh_token, expires_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(system_id) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at",
            params![
                system_id,
                token.access_token,
                token.refresh_token,
                token.expires_at,
                Utc::now()
            ],
        )?;
        Ok(())
    }

    pub fn load_credentials(&self, system_id: &str) -> Result<Option<OAuthToken>> {
        let conn = self.conn()?;
        let token = conn
            .query_row(
                "SELECT access_token, refresh_token, expires_at FROM credentials WHERE system_id = ?1",
                params![system_id],
                |row| {
                    Ok(OAuthToken {
                        access_token: row.get(0)?,
                        refresh_token: row.get(1)?,
                        expires_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(token)
    }

    pub fn record_poll_run(&self, run: &PollRun) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO poll_runs (id, system_id, reason, started_at, finished_at, outcome, message, readings_written)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run.id,
                run.system_id,
                run.reason.as_str(),
                run.started_at,
                run.finished_at,
                run.outcome.as_str(),
                run.message,
                i64::try_from(run.readings_written).unwrap_or(i64::MAX)
            ],
        )?;
        Ok(())
    }

    /// Start of the latest successful live poll; backfill runs do not count
    pub fn last_successful_poll(&self, system_id: &str) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn()?;
        let ts: Option<DateTime<Utc>> = conn
            .query_row(
                "SELECT started_at FROM poll_runs
                 WHERE system_id = ?1 AND outcome = 'ok' AND reason != 'backfill'
                 ORDER BY started_at DESC LIMIT 1",
                params![system_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(ts)
    }

    pub fn recent_poll_runs(&self, system_id: &str, limit: usize) -> Result<Vec<PollRun>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, system_id, reason, started_at, finished_at, outcome, message, readings_written
             FROM poll_runs WHERE system_id = ?1
             ORDER BY started_at DESC LIMIT ?2",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![system_id, limit], |row| {
                let reason: String = row.get(2)?;
                let outcome: String = row.get(5)?;
                let written: i64 = row.get(7)?;
                Ok(PollRun {
                    id: row.get(0)?,
                    system_id: row.get(1)?,
                    reason: PollReason::parse(&reason),
                    started_at: row.get(3)?,
                    finished_at: row.get(4)?,
                    outcome: if outcome == "ok" {
                        RunOutcome::Ok
                    } else {
                        RunOutcome::Error
                    },
                    message: row.get(6)?,
                    readings_written: u64::try_from(written).unwrap_or(0),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn backfill_cursor(&self, system_id: &str) -> Result<BackfillCursor> {
        let conn = self.conn()?;
        let cursor = conn
            .query_row(
                "SELECT oldest_day, complete FROM backfill_state WHERE system_id = ?1",
                params![system_id],
                |row| {
                    Ok(BackfillCursor {
                        oldest_day: row.get(0)?,
                        complete: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(cursor.unwrap_or(BackfillCursor {
            oldest_day: None,
            complete: false,
        }))
    }

    pub fn set_backfill_cursor(&self, system_id: &str, oldest_day: NaiveDate) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO backfill_state (system_id, oldest_day, complete) VALUES (?1, ?2, 0)
             ON CONFLICT(system_id) DO UPDATE SET oldest_day = excluded.oldest_day",
            params![system_id, oldest_day],
        )?;
        Ok(())
    }

    pub fn mark_backfill_complete(&self, system_id: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO backfill_state (system_id, oldest_day, complete) VALUES (?1, NULL, 1)
             ON CONFLICT(system_id) DO UPDATE SET complete = 1",
            params![system_id],
        )?;
        Ok(())
    }
}

fn system_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SystemRecord> {
    Ok(SystemRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        vendor: row.get(2)?,
        vendor_site_id: row.get(3)?,
        timezone: row.get(4)?,
        latitude: row.get(5)?,
        longitude: row.get(6)?,
        earliest_day: row.get(7)?,
    })
}

fn reading_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Reading> {
    let ts: i64 = row.get(1)?;
    Ok(Reading {
        point: row.get(0)?,
        ts: DateTime::<Utc>::from_timestamp(ts, 0).unwrap_or_default(),
        value: row.get(2)?,
    })
}
