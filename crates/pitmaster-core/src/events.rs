//! Device event system for pairing, connectivity and reconnection notifications.
//!
//! Every component that changes a device's connectivity publishes onto one
//! shared [`EventDispatcher`]. Subscribers that fall behind lose the oldest
//! events (broadcast semantics); publishing never blocks.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted by the pairing channel, reconnection engine and orchestrator.
///
/// All events are serializable for logging, persistence, and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum DeviceEvent {
    /// A controller was seen during a short-range scan.
    Discovered {
        device_id: String,
        name: Option<String>,
        rssi: Option<i16>,
    },
    /// Short-range link established and device persisted.
    Paired {
        device_id: String,
        name: Option<String>,
    },
    /// WiFi credentials were written to the device.
    Provisioned { device_id: String },
    /// A network address was bound and answered a status probe.
    Networked { device_id: String, address: String },
    /// Device was torn down.
    Disconnected {
        device_id: String,
        reason: DisconnectReason,
    },
    /// An operation on a device failed.
    Error { device_id: String, error: String },
    /// A reconnection attempt was scheduled.
    ReconnectAttempting {
        address: String,
        attempt: u32,
        delay: Duration,
    },
    /// The device answered again.
    ReconnectSucceeded { address: String, attempts: u32 },
    /// All attempts of an episode failed.
    ReconnectFailed { address: String, attempts: u32 },
}

impl DeviceEvent {
    /// Short name of the event kind, matching its serialized `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Discovered { .. } => "discovered",
            Self::Paired { .. } => "paired",
            Self::Provisioned { .. } => "provisioned",
            Self::Networked { .. } => "networked",
            Self::Disconnected { .. } => "disconnected",
            Self::Error { .. } => "error",
            Self::ReconnectAttempting { .. } => "reconnect_attempting",
            Self::ReconnectSucceeded { .. } => "reconnect_succeeded",
            Self::ReconnectFailed { .. } => "reconnect_failed",
        }
    }
}

/// Reason for disconnection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum DisconnectReason {
    /// Normal disconnection requested by user.
    UserRequested,
    /// Handed over from the short-range link to the network.
    Networked,
    /// Orchestrator shutting down.
    Shutdown,
}

/// Sender for device events.
pub type EventSender = broadcast::Sender<DeviceEvent>;

/// Receiver for device events.
pub type EventReceiver = broadcast::Receiver<DeviceEvent>;

/// Default channel capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 100;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: DeviceEvent) {
        // no receivers is fine
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
