//! Data models for stored data.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use pitmaster_types::{DeviceKind, PairingState, ProbeChannel, TelemetrySample};

/// A device stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDevice {
    /// Device identifier (BLE id or user-assigned).
    pub id: String,
    /// Name shown to the user, usually the advertised BLE name.
    pub display_name: Option<String>,
    pub kind: DeviceKind,
    pub pairing_state: PairingState,
    /// Last address the device answered on over WiFi.
    pub last_known_address: Option<String>,
    /// Free-form per-device settings.
    pub extra_config: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub first_seen: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,
}

impl StoredDevice {
    /// Display name, falling back to the id.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }
}

/// A cook session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub device_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    /// Set exactly once when the cook is stopped.
    #[serde(with = "time::serde::rfc3339::option")]
    pub ended_at: Option<OffsetDateTime>,
    pub note: Option<String>,
}

impl Session {
    /// True while the session has no end time.
    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Elapsed time, up to `now` for an active session.
    pub fn duration(&self, now: OffsetDateTime) -> time::Duration {
        self.ended_at.unwrap_or(now) - self.started_at
    }
}

/// A telemetry sample stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSample {
    /// Database row ID.
    pub id: i64,
    pub session_id: String,
    pub probe_id: String,
    pub value: f64,
    /// Capture time, millisecond precision.
    #[serde(with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
    pub channel: ProbeChannel,
}

impl StoredSample {
    /// Convert back to a [`TelemetrySample`].
    pub fn to_sample(&self) -> TelemetrySample {
        TelemetrySample {
            probe_id: self.probe_id.clone(),
            value: self.value,
            captured_at: self.captured_at,
            channel: self.channel,
        }
    }
}

impl From<StoredSample> for TelemetrySample {
    fn from(stored: StoredSample) -> Self {
        TelemetrySample {
            probe_id: stored.probe_id,
            value: stored.value,
            captured_at: stored.captured_at,
            channel: stored.channel,
        }
    }
}
