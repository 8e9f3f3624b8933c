//! Connectivity core for WiFi grill controllers.
//!
//! This crate takes a controller from first Bluetooth contact to a monitored
//! network device, and records what it reports.
//!
//! # Features
//!
//! - **Pairing**: Scan for controllers over BLE and open a provisioning link
//! - **Provisioning**: Hand the controller WiFi credentials over that link
//! - **Monitoring**: Poll `GET /status` on an interval and stream decoded state
//! - **Auto-reconnection**: Bounded exponential backoff after a failed poll
//! - **Control**: Range-checked fan speed and set-point commands
//! - **Recording**: Persist telemetry into cook sessions via [`SessionBinder`]
//!
//! # Platform Differences
//!
//! BLE device identifiers are Bluetooth addresses on Linux and Windows and
//! CoreBluetooth UUIDs on macOS. Store the id you got from the scan on the
//! machine that will reconnect to it.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use pitmaster_core::{Orchestrator, OrchestratorConfig};
//! use pitmaster_store::Store;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(Store::open_default()?);
//!     let orchestrator = Orchestrator::with_hardware(store, OrchestratorConfig::default())?;
//!
//!     orchestrator.pair("AA:BB:CC:DD:EE:FF").await?;
//!     orchestrator.provision_wifi("AA:BB:CC:DD:EE:FF", "home", "secret").await?;
//!     orchestrator.bind_address("AA:BB:CC:DD:EE:FF", "192.168.1.40").await?;
//!
//!     let mut states = orchestrator.watch("AA:BB:CC:DD:EE:FF").await?;
//!     while let Some(state) = states.next().await {
//!         println!("{:?}", state?.grill_temp());
//!     }
//!     Ok(())
//! }
//! ```

pub mod binder;
pub mod ble;
pub mod error;
pub mod events;
pub mod mock;
pub mod orchestrator;
pub mod pairing;
pub mod poller;
pub mod reconnect;
pub mod traits;
pub mod transport;

pub use binder::{BinderStats, SessionBinder};
pub use ble::BleLink;
pub use error::{Error, PairingError, PairingResult, Result, TransportError, TransportResult};
pub use events::{DeviceEvent, DisconnectReason, EventDispatcher, EventReceiver, EventSender};
pub use mock::{MockLink, MockTransport};
pub use orchestrator::{
    ConnectionState, DeviceState, DeviceStateStream, Orchestrator, OrchestratorConfig,
    TelemetryFrame,
};
pub use pairing::{DiscoveryStream, PairingChannel, PairingOptions, PairingPhase};
pub use poller::{PollOptions, StatusPoller, StatusStream};
pub use reconnect::{EpisodeOutcome, ReconnectEngine, ReconnectHandle, ReconnectOptions};
pub use traits::{DiscoveredGrill, GrillTransport, ShortRangeLink};
pub use transport::{DeviceAddress, HttpTransport, TransportConfig};

// Re-export from pitmaster-types
pub use pitmaster_types::uuids;
pub use pitmaster_types::{Command, DeviceKind, PairingState, ProbeChannel, ProbeReading, Status};
