//! Platform-agnostic types for networked grill controllers.
//!
//! This crate provides the value types shared by the connectivity core, the
//! store and the CLI, together with the JSON wire codec spoken by the
//! controller's HTTP interface.
//!
//! # Features
//!
//! - Status and command payloads with range validation
//! - Telemetry samples keyed by `"{device_id}_{channel}"` probe ids
//! - BLE UUIDs for WiFi provisioning
//!
//! # Example
//!
//! ```
//! use pitmaster_types::{codec, ProbeChannel};
//! use time::OffsetDateTime;
//!
//! let status = codec::decode_status(
//!     br#"{"grill_temp":250.5,"food1_temp":165.0,"fan_speed":45,"target_temp":275.0}"#,
//! )
//! .unwrap();
//! let samples = status.samples("kitchen", OffsetDateTime::now_utc());
//! assert_eq!(samples.len(), 2);
//! assert_eq!(samples[1].channel, ProbeChannel::Aux1);
//! ```

pub mod codec;
pub mod error;
pub mod types;
pub mod uuid;

pub use codec::{decode_status, encode_command};
pub use error::{CodecError, CodecResult};
pub use types::{
    Command, DeviceKind, FAN_SPEED_MAX, FAN_SPEED_MIN, PROBE_CHANNELS, PairingState,
    ProbeChannel, ProbeReading, Status, TARGET_TEMP_MAX, TARGET_TEMP_MIN, TelemetrySample,
};
pub use uuid as uuids;
