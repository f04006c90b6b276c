//! Schema versioning for the feltmap database.
//!
//! The base schema is created idempotently from [`SCHEMA_STATEMENTS`]; the
//! version recorded in `metadata` then decides which numbered migrations
//! still have to run. Each migration runs in its own transaction together
//! with the version bump.

use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use crate::error::{Error, Result};

use super::schema::SCHEMA_STATEMENTS;

/// The current schema version.
pub const CURRENT_VERSION: i32 = 1;

/// Key used to store the schema version in the metadata table.
const VERSION_KEY: &str = "schema_version";

/// Numbered migrations, applied in order on top of the base schema.
///
/// Version 1 is the base schema itself and has nothing to apply.
const MIGRATIONS: &[(i32, &str)] = &[(1, "")];

/// Initialize the database schema.
///
/// # Errors
///
/// Returns an error if schema creation or migration fails, or if the
/// database was written by a newer version of feltmap.
pub fn initialize_schema(conn: &Connection) -> Result<()> {
    for statement in SCHEMA_STATEMENTS {
        conn.execute(statement, [])?;
    }

    let version = schema_version(conn)?;
    if version > CURRENT_VERSION {
        return Err(Error::DatabaseMigration {
            message: format!(
                "database schema version {version} is newer than supported version {CURRENT_VERSION}"
            ),
        });
    }

    for (target, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > version) {
        apply(conn, *target, sql)?;
    }

    Ok(())
}

/// Read the schema version, 0 for a fresh database.
pub(crate) fn schema_version(conn: &Connection) -> Result<i32> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            [VERSION_KEY],
            |row| row.get(0),
        )
        .optional()?;

    match value {
        None => Ok(0),
        Some(value) => value.parse().map_err(|_| Error::DatabaseMigration {
            message: format!("invalid schema version: {value}"),
        }),
    }
}

fn apply(conn: &Connection, version: i32, sql: &str) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    if !sql.is_empty() {
        tx.execute_batch(sql).map_err(|e| Error::DatabaseMigration {
            message: format!("migration to version {version} failed: {e}"),
        })?;
    }
    tx.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        (VERSION_KEY, version.to_string()),
    )?;
    tx.commit()?;

    info!("Database schema at version {}", version);
    Ok(())
}
