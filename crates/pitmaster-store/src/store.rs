//! Main store implementation.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::types::Type;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, params};
use time::OffsetDateTime;
use tracing::{debug, info};

use pitmaster_types::{DeviceKind, PairingState, ProbeChannel, TelemetrySample};

use crate::error::{Error, Result};
use crate::models::{Session, StoredDevice, StoredSample};
use crate::queries::TelemetryQuery;
use crate::schema;

/// How long a connection waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Idle read connections kept open between queries.
const MAX_IDLE_READERS: usize = 4;

const DEVICE_COLUMNS: &str = "id, display_name, kind, pairing_state, last_known_address, \
                              extra_config, first_seen, last_seen";

const SESSION_COLUMNS: &str = "id, device_id, started_at, ended_at, note";

/// SQLite-based store for devices, cook sessions and probe telemetry.
///
/// Writes are serialized through a single connection. File-backed stores
/// serve reads from a small pool of read-only connections so queries do not
/// wait behind an in-progress write; in-memory stores read through the writer.
///
/// The API is synchronous. Async callers should move calls onto a blocking
/// worker with `tokio::task::spawn_blocking`.
pub struct Store {
    writer: Mutex<Connection>,
    readers: Option<ReaderPool>,
    path: Option<PathBuf>,
}

struct ReaderPool {
    path: PathBuf,
    idle: Mutex<Vec<Connection>>,
}

impl ReaderPool {
    fn checkout(&self) -> Result<Connection> {
        let pooled = self.idle.lock().map_err(|_| Error::LockPoisoned)?.pop();
        match pooled {
            Some(conn) => Ok(conn),
            None => {
                debug!("Opening read connection to {}", self.path.display());
                let conn = Connection::open_with_flags(
                    &self.path,
                    OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
                )?;
                conn.busy_timeout(BUSY_TIMEOUT)?;
                Ok(conn)
            }
        }
    }

    fn checkin(&self, conn: Connection) {
        if let Ok(mut idle) = self.idle.lock()
            && idle.len() < MAX_IDLE_READERS
        {
            idle.push(conn);
        }
    }
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self {
            writer: Mutex::new(conn),
            readers: Some(ReaderPool {
                path: path.to_path_buf(),
                idle: Mutex::new(Vec::new()),
            }),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        schema::initialize(&conn)?;
        Ok(Self {
            writer: Mutex::new(conn),
            readers: None,
            path: None,
        })
    }

    /// Database file, or `None` for an in-memory store.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn writer(&self) -> Result<MutexGuard<'_, Connection>> {
        self.writer.lock().map_err(|_| Error::LockPoisoned)
    }

    fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        match &self.readers {
            Some(pool) => {
                let conn = pool.checkout()?;
                let result = f(&conn);
                pool.checkin(conn);
                result
            }
            None => {
                let conn = self.writer()?;
                f(&*conn)
            }
        }
    }
}

// Device operations
impl Store {
    /// Get or create a device entry. A `None` name keeps the stored one.
    pub fn upsert_device(&self, device_id: &str, display_name: Option<&str>) -> Result<StoredDevice> {
        let now = to_millis(OffsetDateTime::now_utc());

        self.writer()?.execute(
            "INSERT INTO devices (id, display_name, first_seen, last_seen) VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(id) DO UPDATE SET
                display_name = COALESCE(?2, display_name),
                last_seen = ?3",
            params![device_id, display_name, now],
        )?;

        self.get_device(device_id)?
            .ok_or_else(|| Error::device_not_found(device_id))
    }

    /// Get a device by ID.
    pub fn get_device(&self, device_id: &str) -> Result<Option<StoredDevice>> {
        self.read(|conn| {
            let device = conn
                .prepare_cached(&format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE id = ?"))?
                .query_row([device_id], device_from_row)
                .optional()?;
            Ok(device)
        })
    }

    /// List all devices, most recently seen first.
    pub fn list_devices(&self) -> Result<Vec<StoredDevice>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DEVICE_COLUMNS} FROM devices ORDER BY last_seen DESC, id ASC"
            ))?;
            let devices = stmt
                .query_map([], device_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(devices)
        })
    }

    /// Record the address the device was last reached on.
    pub fn set_device_address(&self, device_id: &str, address: Option<&str>) -> Result<()> {
        self.update_device(device_id, "last_known_address", &address)
    }

    pub fn set_device_kind(&self, device_id: &str, kind: DeviceKind) -> Result<()> {
        self.update_device(device_id, "kind", &kind.as_str())
    }

    pub fn set_pairing_state(&self, device_id: &str, state: PairingState) -> Result<()> {
        self.update_device(device_id, "pairing_state", &state.as_str())
    }

    /// Replace the free-form per-device settings document.
    pub fn set_extra_config(&self, device_id: &str, config: &serde_json::Value) -> Result<()> {
        let json = serde_json::to_string(config)?;
        self.update_device(device_id, "extra_config", &json)
    }

    /// Remove a device record. Its sessions and telemetry are kept.
    ///
    /// Returns `false` if the device did not exist.
    pub fn delete_device(&self, device_id: &str) -> Result<bool> {
        let removed = self
            .writer()?
            .execute("DELETE FROM devices WHERE id = ?", [device_id])?;
        if removed > 0 {
            info!("Deleted device {}", device_id);
        }
        Ok(removed > 0)
    }

    fn update_device(
        &self,
        device_id: &str,
        column: &'static str,
        value: &dyn rusqlite::ToSql,
    ) -> Result<()> {
        let now = to_millis(OffsetDateTime::now_utc());
        let changed = self.writer()?.execute(
            &format!("UPDATE devices SET {column} = ?1, last_seen = ?2 WHERE id = ?3"),
            params![value, now, device_id],
        )?;
        if changed == 0 {
            return Err(Error::device_not_found(device_id));
        }
        debug!("Updated {} for device {}", column, device_id);
        Ok(())
    }
}

// Session operations
impl Store {
    /// Start a new session for a device.
    ///
    /// Having at most one active session per device is left to the caller.
    pub fn create_session(&self, device_id: &str, note: Option<&str>) -> Result<Session> {
        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            device_id: device_id.to_string(),
            started_at: truncate_to_millis(OffsetDateTime::now_utc()),
            ended_at: None,
            note: note.map(str::to_string),
        };

        self.writer()?.execute(
            "INSERT INTO sessions (id, device_id, started_at, ended_at, note)
             VALUES (?1, ?2, ?3, NULL, ?4)",
            params![
                session.id,
                session.device_id,
                to_millis(session.started_at),
                session.note
            ],
        )?;

        info!("Started session {} for {}", session.id, device_id);
        Ok(session)
    }

    /// Set the end time of a session.
    ///
    /// # Errors
    ///
    /// [`Error::SessionAlreadyEnded`] if the session was ended before,
    /// [`Error::SessionNotFound`] if it does not exist.
    pub fn end_session(&self, session_id: &str) -> Result<Session> {
        let now = to_millis(OffsetDateTime::now_utc());
        let changed = self.writer()?.execute(
            "UPDATE sessions SET ended_at = ?1 WHERE id = ?2 AND ended_at IS NULL",
            params![now, session_id],
        )?;

        let session = self
            .get_session(session_id)?
            .ok_or_else(|| Error::session_not_found(session_id))?;
        if changed == 0 {
            return Err(Error::SessionAlreadyEnded(session_id.to_string()));
        }

        info!("Ended session {}", session_id);
        Ok(session)
    }

    pub fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        self.read(|conn| {
            let session = conn
                .prepare_cached(&format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?"
                ))?
                .query_row([session_id], session_from_row)
                .optional()?;
            Ok(session)
        })
    }

    /// List sessions, newest first, optionally for one device.
    pub fn list_sessions(&self, device_id: Option<&str>) -> Result<Vec<Session>> {
        self.read(|conn| {
            let sessions = match device_id {
                Some(id) => conn
                    .prepare(&format!(
                        "SELECT {SESSION_COLUMNS} FROM sessions WHERE device_id = ?
                         ORDER BY started_at DESC"
                    ))?
                    .query_map([id], session_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?,
                None => conn
                    .prepare(&format!(
                        "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY started_at DESC"
                    ))?
                    .query_map([], session_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?,
            };
            Ok(sessions)
        })
    }

    /// The most recently started session of a device that has not ended.
    pub fn active_session(&self, device_id: &str) -> Result<Option<Session>> {
        self.read(|conn| {
            let session = conn
                .prepare_cached(&format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions
                     WHERE device_id = ? AND ended_at IS NULL
                     ORDER BY started_at DESC LIMIT 1"
                ))?
                .query_row([device_id], session_from_row)
                .optional()?;
            Ok(session)
        })
    }

    pub fn set_session_note(&self, session_id: &str, note: Option<&str>) -> Result<()> {
        let changed = self.writer()?.execute(
            "UPDATE sessions SET note = ?1 WHERE id = ?2",
            params![note, session_id],
        )?;
        if changed == 0 {
            return Err(Error::session_not_found(session_id));
        }
        Ok(())
    }

    /// Delete a session together with its telemetry.
    ///
    /// Returns `false` if the session did not exist.
    pub fn delete_session(&self, session_id: &str) -> Result<bool> {
        let mut conn = self.writer()?;
        let tx = conn.transaction()?;
        let samples = tx.execute("DELETE FROM telemetry WHERE session_id = ?", [session_id])?;
        let removed = tx.execute("DELETE FROM sessions WHERE id = ?", [session_id])?;
        tx.commit()?;

        if removed > 0 {
            info!("Deleted session {} ({} samples)", session_id, samples);
        }
        Ok(removed > 0)
    }
}

// Telemetry operations
impl Store {
    /// Insert a single sample under a session.
    pub fn insert(&self, sample: &TelemetrySample, session_id: &str) -> Result<i64> {
        let conn = self.writer()?;
        conn.prepare_cached(INSERT_SAMPLE)?
            .execute(sample_params(sample, session_id))?;
        Ok(conn.last_insert_rowid())
    }

    /// Insert samples in a single transaction.
    ///
    /// Either every sample is written or none is. Returned ids follow the
    /// input order.
    pub fn insert_batch(&self, samples: &[TelemetrySample], session_id: &str) -> Result<Vec<i64>> {
        if samples.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.writer()?;
        let tx = conn.transaction()?;
        let mut ids = Vec::with_capacity(samples.len());
        {
            let mut stmt = tx.prepare_cached(INSERT_SAMPLE)?;
            for sample in samples {
                stmt.execute(sample_params(sample, session_id))?;
                ids.push(tx.last_insert_rowid());
            }
        }
        tx.commit()?;

        debug!("Inserted {} samples into session {}", ids.len(), session_id);
        Ok(ids)
    }

    /// Query samples with filters.
    pub fn query_telemetry(&self, query: &TelemetryQuery) -> Result<Vec<StoredSample>> {
        let sql = query.build_sql();
        let (_, params) = query.build_where();

        debug!("Executing query: {}", sql);

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        self.read(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let samples = stmt
                .query_map(params_ref.as_slice(), sample_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(samples)
        })
    }

    /// All samples of a session, oldest first.
    pub fn by_session(&self, session_id: &str) -> Result<Vec<StoredSample>> {
        self.query_telemetry(&TelemetryQuery::new().session(session_id))
    }

    /// Samples of every session captured within `[start, end]`, oldest first.
    pub fn by_time_range(&self, start: OffsetDateTime, end: OffsetDateTime) -> Result<Vec<StoredSample>> {
        self.query_telemetry(&TelemetryQuery::new().between(start, end))
    }

    pub fn by_session_and_time_range(
        &self,
        session_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<StoredSample>> {
        self.query_telemetry(&TelemetryQuery::new().session(session_id).between(start, end))
    }

    /// Most recent sample for a probe across all sessions.
    pub fn latest_for_probe(&self, probe_id: &str) -> Result<Option<StoredSample>> {
        let query = TelemetryQuery::new().probe(probe_id).newest_first().limit(1);
        Ok(self.query_telemetry(&query)?.pop())
    }

    pub fn count_by_session(&self, session_id: &str) -> Result<u64> {
        self.read(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM telemetry WHERE session_id = ?",
                [session_id],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    /// Remove every sample of a session; the session record stays.
    pub fn delete_by_session(&self, session_id: &str) -> Result<usize> {
        let removed = self
            .writer()?
            .execute("DELETE FROM telemetry WHERE session_id = ?", [session_id])?;
        debug!("Deleted {} samples from session {}", removed, session_id);
        Ok(removed)
    }

    /// Remove samples captured strictly before `cutoff`.
    pub fn delete_older_than(&self, cutoff: OffsetDateTime) -> Result<usize> {
        let removed = self.writer()?.execute(
            "DELETE FROM telemetry WHERE captured_at < ?",
            [to_millis(cutoff)],
        )?;
        if removed > 0 {
            info!("Pruned {} samples older than {}", removed, cutoff);
        }
        Ok(removed)
    }
}

const INSERT_SAMPLE: &str = "INSERT INTO telemetry (session_id, probe_id, value, captured_at, channel)
                             VALUES (?1, ?2, ?3, ?4, ?5)";

fn sample_params<'a>(
    sample: &'a TelemetrySample,
    session_id: &'a str,
) -> (&'a str, &'a str, f64, i64, &'static str) {
    (
        session_id,
        &sample.probe_id,
        sample.value,
        to_millis(sample.captured_at),
        sample.channel.token(),
    )
}

/// Unix milliseconds for a timestamp.
pub(crate) fn to_millis(time: OffsetDateTime) -> i64 {
    (time.unix_timestamp_nanos() / 1_000_000) as i64
}

fn truncate_to_millis(time: OffsetDateTime) -> OffsetDateTime {
    let nanos = time.nanosecond();
    time.replace_nanosecond(nanos - nanos % 1_000_000)
        .unwrap_or(time)
}

fn from_millis(row: &Row<'_>, idx: usize) -> rusqlite::Result<OffsetDateTime> {
    let millis: i64 = row.get(idx)?;
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            Box::new(Error::InvalidTimestamp(e.to_string())),
        )
    })
}

fn optional_millis(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<OffsetDateTime>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(_) => from_millis(row, idx).map(Some),
        None => Ok(None),
    }
}

fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn device_from_row(row: &Row<'_>) -> rusqlite::Result<StoredDevice> {
    let extra: String = row.get(5)?;
    Ok(StoredDevice {
        id: row.get(0)?,
        display_name: row.get(1)?,
        kind: parse_column(row, 2)?,
        pairing_state: parse_column(row, 3)?,
        last_known_address: row.get(4)?,
        extra_config: serde_json::from_str(&extra)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?,
        first_seen: from_millis(row, 6)?,
        last_seen: from_millis(row, 7)?,
    })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        device_id: row.get(1)?,
        started_at: from_millis(row, 2)?,
        ended_at: optional_millis(row, 3)?,
        note: row.get(4)?,
    })
}

fn sample_from_row(row: &Row<'_>) -> rusqlite::Result<StoredSample> {
    Ok(StoredSample {
        id: row.get(0)?,
        session_id: row.get(1)?,
        probe_id: row.get(2)?,
        value: row.get(3)?,
        captured_at: from_millis(row, 4)?,
        channel: parse_column::<ProbeChannel>(row, 5)?,
    })
}
