//! Database schema.

use rusqlite::Connection;

use crate::error::{Error, Result};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema.
///
/// A database stamped with any other version is rejected.
pub fn initialize(conn: &Connection) -> Result<()> {
    match get_schema_version(conn)? {
        0 => {
            create_schema_v1(conn)?;
            set_schema_version(conn, SCHEMA_VERSION)
        }
        SCHEMA_VERSION => Ok(()),
        other => Err(Error::UnsupportedSchema(other)),
    }
}

fn get_schema_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 =
        conn.query_row("SELECT version FROM schema_version", [], |row| row.get(0))?;

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?)",
        [version],
    )?;
    Ok(())
}

/// Create the initial schema (version 1).
///
/// All timestamps are unix milliseconds.
fn create_schema_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS devices (
            id TEXT PRIMARY KEY,
            display_name TEXT,
            kind TEXT NOT NULL DEFAULT 'unrecognized',
            pairing_state TEXT NOT NULL DEFAULT 'unpaired',
            last_known_address TEXT,
            extra_config TEXT NOT NULL DEFAULT '{}',
            first_seen INTEGER NOT NULL,
            last_seen INTEGER NOT NULL
        );

        -- device_id is not a foreign key; deleting a device keeps its sessions.
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            device_id TEXT NOT NULL,
            started_at INTEGER NOT NULL,
            ended_at INTEGER,
            note TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_sessions_device
            ON sessions(device_id, started_at);

        CREATE TABLE IF NOT EXISTS telemetry (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
            probe_id TEXT NOT NULL,
            value REAL NOT NULL,
            captured_at INTEGER NOT NULL,
            channel TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_telemetry_captured_at
            ON telemetry(captured_at);
        CREATE INDEX IF NOT EXISTS idx_telemetry_session
            ON telemetry(session_id);
        CREATE INDEX IF NOT EXISTS idx_telemetry_session_time
            ON telemetry(session_id, captured_at);
        CREATE INDEX IF NOT EXISTS idx_telemetry_probe
            ON telemetry(probe_id);
        "#,
    )?;

    Ok(())
}
