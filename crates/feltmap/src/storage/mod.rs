//! Storage layer for feltmap.
//!
//! This module provides `SQLite`-based persistent storage for processed
//! quakes and their sensitivity records, so that repeated runs only fetch
//! quakes that have not been seen before.

pub mod migrations;
pub mod schema;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::geo::Coordinates;
use crate::report::{Quake, SensitivityRecord};

/// Metadata key holding the time of the last completed update.
const LAST_UPDATE_KEY: &str = "last_update";

/// Storage engine for quakes and sensitivity records.
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
}

impl Storage {
    /// Open or create a storage database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create an in-memory storage instance for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Public IDs of every quake already processed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn known_quake_ids(&self) -> Result<HashSet<String>> {
        let mut stmt = self.conn.prepare("SELECT public_id FROM quakes")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<HashSet<String>, _>>()?;
        Ok(ids)
    }

    /// Store a processed quake together with its sensitivity records.
    ///
    /// Both land in one transaction. `report_count` is the number of felt
    /// report points fetched, before validation. Returns the number of
    /// records stored, or `None` if the quake was already recorded (in
    /// which case nothing is written).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn record_quake(
        &self,
        quake: &Quake,
        report_count: usize,
        records: &[SensitivityRecord],
    ) -> Result<Option<usize>> {
        let tx = self.conn.unchecked_transaction()?;

        let inserted = tx.execute(
            r"
            INSERT OR IGNORE INTO quakes
                (public_id, longitude, latitude, time, magnitude, depth_km, mmi, locality,
                 report_count, processed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ",
            params![
                quake.public_id,
                quake.location.longitude,
                quake.location.latitude,
                quake.time.map(|t| t.to_rfc3339()),
                quake.magnitude,
                quake.depth_km,
                quake.mmi,
                quake.locality,
                i64::try_from(report_count).unwrap_or(i64::MAX),
                Utc::now().to_rfc3339(),
            ],
        )?;

        if inserted == 0 {
            debug!("Quake {} already recorded", quake.public_id);
            return Ok(None);
        }

        let stored = insert_records(&tx, records)?;
        tx.commit()?;

        debug!(
            "Recorded quake {} with {} sensitivity record(s)",
            quake.public_id, stored
        );
        Ok(Some(stored))
    }

    /// Mark quakes as processed without storing any reports for them.
    ///
    /// Used when taking over a quake list from an earlier export, so that
    /// updates do not fetch those quakes again. Quakes already recorded are
    /// left untouched. Returns the number newly marked.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn mark_processed(&self, quakes: &[Quake]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let processed_at = Utc::now().to_rfc3339();
        let mut marked = 0;
        {
            let mut stmt = tx.prepare(
                r"
                INSERT OR IGNORE INTO quakes
                    (public_id, longitude, latitude, time, magnitude, depth_km, mmi, locality,
                     report_count, processed_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, ?9)
                ",
            )?;
            for quake in quakes {
                marked += stmt.execute(params![
                    quake.public_id,
                    quake.location.longitude,
                    quake.location.latitude,
                    quake.time.map(|t| t.to_rfc3339()),
                    quake.magnitude,
                    quake.depth_km,
                    quake.mmi,
                    quake.locality,
                    processed_at,
                ])?;
            }
        }
        tx.commit()?;

        debug!("Marked {} of {} quake(s) as processed", marked, quakes.len());
        Ok(marked)
    }

    /// Insert sensitivity records that are not tied to a fresh quake, such
    /// as rows merged from an earlier export.
    ///
    /// Records already present are skipped. Returns the number inserted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn insert_records(&self, records: &[SensitivityRecord]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let stored = insert_records(&tx, records)?;
        tx.commit()?;

        if stored < records.len() {
            info!(
                "Skipped {} sensitivity record(s) already stored",
                records.len() - stored
            );
        }
        Ok(stored)
    }

    /// All processed quakes, most recent origin time first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn quakes(&self) -> Result<Vec<Quake>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT public_id, longitude, latitude, time, magnitude, depth_km, mmi, locality
            FROM quakes ORDER BY time DESC, public_id
            ",
        )?;

        let quakes = stmt
            .query_map([], Self::row_to_quake)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(quakes)
    }

    /// All sensitivity records, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn records(&self) -> Result<Vec<SensitivityRecord>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT public_id, longitude, latitude, mmi, distance_km, sensitivity
            FROM sensitivity ORDER BY id
            ",
        )?;

        let records = stmt
            .query_map([], Self::row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// Count processed quakes.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count_quakes(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM quakes", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Count sensitivity records.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count_records(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM sensitivity", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Remember when the last update completed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn set_last_update(&self, at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            (LAST_UPDATE_KEY, at.to_rfc3339()),
        )?;
        Ok(())
    }

    /// When the last update completed, if ever.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn last_update(&self) -> Result<Option<DateTime<Utc>>> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM metadata WHERE key = ?1",
                [LAST_UPDATE_KEY],
                |row| row.get(0),
            )
            .optional()?;

        Ok(value.as_deref().and_then(parse_timestamp))
    }

    /// Get database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let total_quakes = self.count_quakes()?;
        let total_records = self.count_records()?;

        let quakes_without_reports: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM quakes WHERE report_count = 0",
            [],
            |row| row.get(0),
        )?;

        let newest: Option<String> = self
            .conn
            .query_row(
                "SELECT time FROM quakes WHERE time IS NOT NULL ORDER BY time DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            total_quakes,
            total_records,
            quakes_without_reports,
            newest_quake: newest.as_deref().and_then(parse_timestamp),
            last_update: self.last_update()?,
            db_size_bytes,
        })
    }

    fn row_to_quake(row: &rusqlite::Row) -> rusqlite::Result<Quake> {
        let public_id: String = row.get(0)?;
        let time: Option<String> = row.get(3)?;

        Ok(Quake {
            location: row_location(row, 1, 2)?,
            time: time.as_deref().and_then(parse_timestamp),
            magnitude: row.get(4)?,
            depth_km: row.get(5)?,
            mmi: row.get(6)?,
            locality: row.get(7)?,
            public_id,
        })
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<SensitivityRecord> {
        Ok(SensitivityRecord {
            public_id: row.get(0)?,
            location: row_location(row, 1, 2)?,
            mmi: row.get(3)?,
            distance_km: row.get(4)?,
            sensitivity: row.get(5)?,
        })
    }
}

/// Insert records inside an open transaction, skipping ones already stored.
///
/// Records without a quake ID count as duplicates only when every value
/// matches, since several quakes may have reports at the same place.
fn insert_records(conn: &Connection, records: &[SensitivityRecord]) -> Result<usize> {
    let mut stmt = conn.prepare(
        r"
        INSERT OR IGNORE INTO sensitivity
            (public_id, longitude, latitude, mmi, distance_km, sensitivity)
        SELECT ?1, ?2, ?3, ?4, ?5, ?6
        WHERE NOT EXISTS (
            SELECT 1 FROM sensitivity
            WHERE public_id IS ?1 AND longitude = ?2 AND latitude = ?3
              AND (?1 IS NOT NULL OR (mmi = ?4 AND distance_km = ?5))
        )
        ",
    )?;

    let mut stored = 0;
    for record in records {
        stored += stmt.execute(params![
            record.public_id,
            record.location.longitude,
            record.location.latitude,
            record.mmi,
            record.distance_km,
            record.sensitivity,
        ])?;
    }
    Ok(stored)
}

fn row_location(row: &rusqlite::Row, lon_idx: usize, lat_idx: usize) -> rusqlite::Result<Coordinates> {
    let longitude: f64 = row.get(lon_idx)?;
    let latitude: f64 = row.get(lat_idx)?;
    Coordinates::new(longitude, latitude).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(lon_idx, rusqlite::types::Type::Real, Box::new(e))
    })
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(value) {
        Ok(dt) => Some(dt.with_timezone(&Utc)),
        Err(e) => {
            warn!("Ignoring unreadable timestamp {:?}: {}", value, e);
            None
        }
    }
}

/// Statistics about the storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    /// Number of quakes processed.
    pub total_quakes: i64,
    /// Number of sensitivity records stored.
    pub total_records: i64,
    /// Processed quakes that had no felt reports.
    pub quakes_without_reports: i64,
    /// Origin time of the most recent processed quake.
    pub newest_quake: Option<DateTime<Utc>>,
    /// When the last update completed.
    pub last_update: Option<DateTime<Utc>>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}
