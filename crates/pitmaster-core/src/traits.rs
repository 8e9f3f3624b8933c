//! Trait abstractions over the two links a grill controller is reached by.
//!
//! [`GrillTransport`] is the network side (status and command over the local
//! network); [`ShortRangeLink`] is the Bluetooth side used during pairing.
//! Real implementations live in [`crate::transport`] and [`crate::ble`], the
//! mocks in [`crate::mock`].

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use pitmaster_types::{Command, Status};

use crate::error::{PairingResult, TransportResult};
use crate::transport::DeviceAddress;

/// Network transport to a controller.
///
/// Implementations must not retry; retry policy belongs to
/// [`crate::ReconnectEngine`].
///
/// # Example
///
/// ```ignore
/// use pitmaster_core::{DeviceAddress, GrillTransport};
///
/// async fn pit_temp<T: GrillTransport>(t: &T, addr: &DeviceAddress) -> Option<f64> {
///     t.fetch_status(addr).await.ok().map(|s| s.grill_temp)
/// }
/// ```
#[async_trait]
pub trait GrillTransport: Send + Sync {
    /// Read the current status document.
    async fn fetch_status(&self, address: &DeviceAddress) -> TransportResult<Status>;

    /// Send a control command.
    async fn send_command(&self, address: &DeviceAddress, command: &Command) -> TransportResult<()>;
}

/// A controller seen during a short-range scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredGrill {
    /// Stable identifier (MAC address, or peripheral UUID on macOS).
    pub device_id: String,
    /// Advertised local name.
    pub name: Option<String>,
    /// Signal strength at discovery time.
    pub rssi: Option<i16>,
}

impl DiscoveredGrill {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            name: None,
            rssi: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }
}

/// Bluetooth link used for discovery and WiFi provisioning.
///
/// Timeouts are applied by [`crate::PairingChannel`]; implementations may
/// block for as long as the radio stack does.
#[async_trait]
pub trait ShortRangeLink: Send + Sync {
    /// Start discovery. Candidates (possibly repeated) arrive on the stream
    /// until [`ShortRangeLink::stop_scan`] is called.
    async fn start_scan(&self) -> PairingResult<BoxStream<'static, DiscoveredGrill>>;

    /// Stop discovery. Safe to call when no scan is running.
    async fn stop_scan(&self) -> PairingResult<()>;

    /// Open a link to a previously discovered device.
    async fn connect(&self, device_id: &str) -> PairingResult<()>;

    /// Confirmed (with-response) write to the credential characteristic.
    async fn write_credentials(&self, device_id: &str, payload: &[u8]) -> PairingResult<()>;

    /// Close the link.
    async fn disconnect(&self, device_id: &str) -> PairingResult<()>;
}
