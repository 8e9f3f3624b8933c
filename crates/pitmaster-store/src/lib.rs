//! Local time-series persistence for grill controller telemetry.
//!
//! This crate provides SQLite-based storage for paired devices, cook
//! sessions and the probe samples recorded under them.
//!
//! # Features
//!
//! - Device records with pairing state, kind and last known address
//! - Cook sessions with an end time that can be set exactly once
//! - Batched, transactional sample inserts
//! - Queries by session, probe and time range, always oldest first by default
//! - Retention pruning
//!
//! # Example
//!
//! ```no_run
//! use pitmaster_store::{Store, TelemetryQuery};
//!
//! let store = Store::open_default()?;
//!
//! let session = store.create_session("backyard", Some("brisket"))?;
//! let query = TelemetryQuery::new()
//!     .session(&session.id)
//!     .limit(10);
//! let samples = store.query_telemetry(&query)?;
//! # Ok::<(), pitmaster_store::Error>(())
//! ```

mod error;
mod models;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::{Session, StoredDevice, StoredSample};
pub use queries::TelemetryQuery;
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/pitmaster/data.db`
/// - macOS: `~/Library/Application Support/pitmaster/data.db`
/// - Windows: `C:\Users\<user>\AppData\Local\pitmaster\data.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("pitmaster")
        .join("data.db")
}
