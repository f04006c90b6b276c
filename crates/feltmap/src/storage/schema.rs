//! `SQLite` schema definitions for feltmap.
//!
//! This module contains the SQL statements for creating and managing
//! the database schema.

/// SQL statement to create the quakes table.
///
/// A row here means the quake has been processed, even if it had no felt
/// reports. `report_count` is NULL for quakes taken over from an imported
/// quake list, where the number of reports is unknown.
pub const CREATE_QUAKES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS quakes (
    public_id TEXT PRIMARY KEY,
    longitude REAL NOT NULL,
    latitude REAL NOT NULL,
    time TEXT,
    magnitude REAL,
    depth_km REAL,
    mmi INTEGER,
    locality TEXT,
    report_count INTEGER,
    processed_at TEXT NOT NULL
)
";

/// SQL statement to create the sensitivity table.
///
/// `public_id` is NULL for records merged from files that did not carry it.
pub const CREATE_SENSITIVITY_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS sensitivity (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    public_id TEXT,
    longitude REAL NOT NULL,
    latitude REAL NOT NULL,
    mmi REAL NOT NULL,
    distance_km REAL NOT NULL CHECK (distance_km >= 0),
    sensitivity REAL NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (public_id, longitude, latitude)
)
";

/// SQL statement to create an index on `public_id` for per-quake lookups.
pub const CREATE_SENSITIVITY_QUAKE_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_sensitivity_quake ON sensitivity(public_id)
";

/// SQL statement to create an index on location for map collation.
pub const CREATE_SENSITIVITY_LOCATION_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_sensitivity_location ON sensitivity(longitude, latitude)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_QUAKES_TABLE,
    CREATE_SENSITIVITY_TABLE,
    CREATE_SENSITIVITY_QUAKE_INDEX,
    CREATE_SENSITIVITY_LOCATION_INDEX,
    CREATE_METADATA_TABLE,
];
