//! Bluetooth UUIDs used while provisioning a grill controller.
//!
//! Only the provisioning surface is exposed over BLE; telemetry and control
//! travel over HTTP once the controller has joined a WiFi network.

use uuid::{Uuid, uuid};

/// Provisioning service advertised by controllers that are awaiting setup.
pub const PROVISIONING_SERVICE: Uuid = uuid!("6e400001-b5a3-f393-e0a9-e50e24dcca9e");

/// Characteristic accepting the WiFi credential document.
///
/// Writes must be confirmed (with response). The payload is UTF-8 JSON of
/// the form `{"ssid": "...", "password": "..."}`.
pub const WIFI_CREDENTIALS: Uuid = uuid!("6e400002-b5a3-f393-e0a9-e50e24dcca9e");

/// Generic Access Profile (GAP) service.
pub const GAP_SERVICE: Uuid = uuid!("00001800-0000-1000-8000-00805f9b34fb");

/// Device name characteristic.
pub const DEVICE_NAME: Uuid = uuid!("00002a00-0000-1000-8000-00805f9b34fb");

/// Name prefixes used by controllers when advertising in provisioning mode.
pub const ADVERTISED_NAME_PREFIXES: &[&str] = &["Pitmaster", "GrillCtl"];
