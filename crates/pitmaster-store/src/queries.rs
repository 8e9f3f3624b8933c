//! Query builder for stored telemetry.
//!
//! # Example
//!
//! ```
//! use pitmaster_store::{Store, TelemetryQuery};
//! use time::{Duration, OffsetDateTime};
//!
//! let store = Store::open_in_memory()?;
//! let hour_ago = OffsetDateTime::now_utc() - Duration::hours(1);
//!
//! let query = TelemetryQuery::new()
//!     .probe("kitchen_primary")
//!     .since(hour_ago)
//!     .limit(100);
//!
//! let samples = store.query_telemetry(&query)?;
//! assert!(samples.is_empty());
//! # Ok::<(), pitmaster_store::Error>(())
//! ```

use time::OffsetDateTime;

use crate::store::to_millis;

/// Fluent query builder for [`Store::query_telemetry`](crate::Store::query_telemetry).
///
/// Filters are optional and combine with `AND`. Results are ordered by
/// `captured_at` ascending unless [`newest_first`](Self::newest_first) is set.
/// Time bounds are inclusive.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TelemetryQuery {
    pub session_id: Option<String>,
    pub probe_id: Option<String>,
    pub since: Option<OffsetDateTime>,
    pub until: Option<OffsetDateTime>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub newest_first: bool,
}

impl TelemetryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only samples recorded under this session.
    pub fn session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    /// Only samples from this probe (`"{device_id}_{channel}"`).
    pub fn probe(mut self, probe_id: &str) -> Self {
        self.probe_id = Some(probe_id.to_string());
        self
    }

    pub fn since(mut self, time: OffsetDateTime) -> Self {
        self.since = Some(time);
        self
    }

    pub fn until(mut self, time: OffsetDateTime) -> Self {
        self.until = Some(time);
        self
    }

    /// Shorthand for `since(start).until(end)`.
    pub fn between(self, start: OffsetDateTime, end: OffsetDateTime) -> Self {
        self.since(start).until(end)
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first N results. SQLite needs a `LIMIT` to honour an
    /// `OFFSET`, so an unlimited query gets `LIMIT -1`.
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn newest_first(mut self) -> Self {
        self.newest_first = true;
        self
    }

    pub(crate) fn build_where(&self) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref session_id) = self.session_id {
            conditions.push("session_id = ?");
            params.push(Box::new(session_id.clone()));
        }

        if let Some(ref probe_id) = self.probe_id {
            conditions.push("probe_id = ?");
            params.push(Box::new(probe_id.clone()));
        }

        if let Some(since) = self.since {
            conditions.push("captured_at >= ?");
            params.push(Box::new(to_millis(since)));
        }

        if let Some(until) = self.until {
            conditions.push("captured_at <= ?");
            params.push(Box::new(to_millis(until)));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    pub(crate) fn build_sql(&self) -> String {
        let (where_clause, _) = self.build_where();
        let order = if self.newest_first { "DESC" } else { "ASC" };

        // `id` breaks ties so samples from one frame keep insertion order.
        let mut sql = format!(
            "SELECT id, session_id, probe_id, value, captured_at, channel \
             FROM telemetry {} ORDER BY captured_at {}, id {}",
            where_clause, order, order
        );

        match (self.limit, self.offset) {
            (Some(limit), _) => sql.push_str(&format!(" LIMIT {}", limit)),
            (None, Some(_)) => sql.push_str(" LIMIT -1"),
            (None, None) => {}
        }

        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        sql
    }
}
