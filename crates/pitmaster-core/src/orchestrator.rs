//! Connectivity orchestration for grill controllers.
//!
//! [`Orchestrator`] takes a device from first discovery to a networked,
//! monitored controller:
//!
//! 1. [`scan`](Orchestrator::scan) and [`pair`](Orchestrator::pair) over Bluetooth
//! 2. [`provision_wifi`](Orchestrator::provision_wifi) with the home network credentials
//! 3. [`bind_address`](Orchestrator::bind_address) once the controller has an IP
//! 4. [`watch`](Orchestrator::watch) for live state, with automatic reconnection
//!
//! Every status received while watching is also published as a
//! [`TelemetryFrame`] for subscribers such as [`crate::SessionBinder`].
//! Device records are persisted in the injected [`Store`].

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pitmaster_store::{Store, StoredDevice};
use pitmaster_types::{
    Command, DeviceKind, PROBE_CHANNELS, PairingState, ProbeReading, Status, TelemetrySample,
};

use crate::ble::BleLink;
use crate::error::{Error, Result, TransportError};
use crate::events::{DEFAULT_EVENT_CAPACITY, DeviceEvent, DisconnectReason, EventDispatcher};
use crate::pairing::{DiscoveryStream, PairingChannel, PairingOptions};
use crate::poller::{PollOptions, StatusPoller, StatusStream};
use crate::reconnect::{ReconnectEngine, ReconnectOptions};
use crate::traits::{GrillTransport, ShortRangeLink};
use crate::transport::{DeviceAddress, HttpTransport, TransportConfig};

/// All samples captured from one status fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    pub device_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
    pub samples: Vec<TelemetrySample>,
}

/// Link health as seen by a watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Status received normally.
    Online,
    /// First status after one or more failures.
    Reconnected,
}

/// Snapshot of a controller delivered by [`Orchestrator::watch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub device_id: String,
    pub probes: [ProbeReading; PROBE_CHANNELS],
    pub fan_speed: u8,
    pub target_temp: f64,
    pub connection_state: ConnectionState,
    #[serde(with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
}

impl DeviceState {
    pub fn from_status(
        device_id: &str,
        status: &Status,
        connection_state: ConnectionState,
        captured_at: OffsetDateTime,
    ) -> Self {
        Self {
            device_id: device_id.to_string(),
            probes: status.probes(),
            fan_speed: status.fan_speed,
            target_temp: status.target_temp,
            connection_state,
            captured_at,
        }
    }

    /// Pit temperature.
    pub fn grill_temp(&self) -> Option<f64> {
        self.probes[0].value
    }
}

/// Result type for watch stream items.
pub type DeviceStateResult = std::result::Result<DeviceState, TransportError>;

/// Live state of one device. Dropping it stops polling.
#[derive(Debug)]
pub struct DeviceStateStream {
    receiver: mpsc::Receiver<DeviceStateResult>,
    handle: tokio::task::JoinHandle<()>,
    cancel_token: CancellationToken,
}

impl DeviceStateStream {
    pub fn close(self) {
        self.cancel_token.cancel();
    }

    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for DeviceStateStream {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

impl Stream for DeviceStateStream {
    type Item = DeviceStateResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_recv(cx)
    }
}

/// Configuration for the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    pub poll: PollOptions,
    pub reconnect: ReconnectOptions,
    pub pairing: PairingOptions,
    /// Used by [`Orchestrator::with_hardware`].
    pub transport: TransportConfig,
    /// Event channel capacity.
    pub event_capacity: usize,
    /// Telemetry channel capacity.
    pub telemetry_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll: PollOptions::default(),
            reconnect: ReconnectOptions::default(),
            pairing: PairingOptions::default(),
            transport: TransportConfig::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            telemetry_capacity: 256,
        }
    }
}

impl OrchestratorConfig {
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll.interval = interval;
        self
    }

    pub fn reconnect(mut self, options: ReconnectOptions) -> Self {
        self.reconnect = options;
        self
    }

    pub fn pairing(mut self, options: PairingOptions) -> Self {
        self.pairing = options;
        self
    }

    pub fn transport(mut self, config: TransportConfig) -> Self {
        self.transport = config;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn telemetry_capacity(mut self, capacity: usize) -> Self {
        self.telemetry_capacity = capacity;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.poll.validate()?;
        self.reconnect.validate()?;
        if self.event_capacity == 0 {
            return Err(Error::invalid_config("event_capacity must be > 0"));
        }
        if self.telemetry_capacity == 0 {
            return Err(Error::invalid_config("telemetry_capacity must be > 0"));
        }
        Ok(())
    }
}

struct WatchEntry {
    id: u64,
    address: DeviceAddress,
    cancel: CancellationToken,
}

type WatchMap = Arc<RwLock<HashMap<String, WatchEntry>>>;

/// Pairing, provisioning, monitoring and control of grill controllers.
pub struct Orchestrator {
    store: Arc<Store>,
    transport: Arc<dyn GrillTransport>,
    pairing: PairingChannel,
    reconnect: ReconnectEngine,
    poller: StatusPoller,
    events: EventDispatcher,
    telemetry: broadcast::Sender<TelemetryFrame>,
    watches: WatchMap,
    next_watch: AtomicU64,
    config: OrchestratorConfig,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(
        store: Arc<Store>,
        transport: Arc<dyn GrillTransport>,
        link: Arc<dyn ShortRangeLink>,
        config: OrchestratorConfig,
    ) -> Result<Self> {
        config.validate()?;

        let events = EventDispatcher::new(config.event_capacity);
        let reconnect = ReconnectEngine::new(
            Arc::clone(&transport),
            events.clone(),
            config.reconnect.clone(),
        )?;
        let poller = StatusPoller::new(Arc::clone(&transport), reconnect.clone());
        let pairing = PairingChannel::new(link, config.pairing.clone()).with_events(events.clone());
        let (telemetry, _) = broadcast::channel(config.telemetry_capacity);

        Ok(Self {
            store,
            transport,
            pairing,
            reconnect,
            poller,
            events,
            telemetry,
            watches: Arc::new(RwLock::new(HashMap::new())),
            next_watch: AtomicU64::new(1),
            config,
        })
    }

    /// Orchestrator over HTTP and the platform Bluetooth stack.
    pub fn with_hardware(store: Arc<Store>, config: OrchestratorConfig) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(config.transport.clone())?);
        Self::new(store, transport, Arc::new(BleLink::new()), config)
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Get the event dispatcher.
    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn pairing(&self) -> &PairingChannel {
        &self.pairing
    }

    pub fn reconnect_engine(&self) -> &ReconnectEngine {
        &self.reconnect
    }

    /// Receive a frame for every status fetched by any watch.
    pub fn subscribe_telemetry(&self) -> broadcast::Receiver<TelemetryFrame> {
        self.telemetry.subscribe()
    }

    async fn with_store<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Store) -> pitmaster_store::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        Ok(tokio::task::spawn_blocking(move || f(&store)).await??)
    }

    pub async fn device(&self, device_id: &str) -> Result<Option<StoredDevice>> {
        let id = device_id.to_string();
        self.with_store(move |store| store.get_device(&id)).await
    }

    pub async fn devices(&self) -> Result<Vec<StoredDevice>> {
        self.with_store(|store| store.list_devices()).await
    }

    async fn require_device(&self, device_id: &str) -> Result<StoredDevice> {
        self.device(device_id)
            .await?
            .ok_or_else(|| Error::device_not_found(device_id))
    }

    async fn device_address(&self, device_id: &str) -> Result<DeviceAddress> {
        let device = self.require_device(device_id).await?;
        let raw = device
            .last_known_address
            .ok_or_else(|| Error::NoAddress(device_id.to_string()))?;
        Ok(DeviceAddress::parse(&raw)?)
    }

    /// Scan for controllers over Bluetooth.
    pub async fn scan(&self, timeout: Duration) -> Result<DiscoveryStream> {
        Ok(self.pairing.scan(timeout).await?)
    }

    /// Open a Bluetooth link and persist the device as short-range paired.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn pair(&self, device_id: &str) -> Result<StoredDevice> {
        let grill = self.pairing.connect(device_id).await?;

        let id = device_id.to_string();
        let name = grill.name.clone();
        let device = self
            .with_store(move |store| {
                store.upsert_device(&id, name.as_deref())?;
                store.set_pairing_state(&id, PairingState::ShortRange)?;
                store
                    .get_device(&id)?
                    .ok_or_else(|| pitmaster_store::Error::device_not_found(&id))
            })
            .await?;

        self.events.send(DeviceEvent::Paired {
            device_id: device_id.to_string(),
            name: grill.name,
        });
        Ok(device)
    }

    /// Send WiFi credentials over the open Bluetooth link.
    pub async fn provision_wifi(&self, device_id: &str, ssid: &str, password: &str) -> Result<()> {
        self.pairing
            .send_credentials(device_id, ssid, password)
            .await?;
        self.events.send(DeviceEvent::Provisioned {
            device_id: device_id.to_string(),
        });
        Ok(())
    }

    /// Record the controller's network address and probe it.
    ///
    /// On success the device becomes networked, its Bluetooth link is closed
    /// and its kind is set to known. On failure the device drops back to
    /// short-range (even if it was networked before), keeps the attempted
    /// address for a later [`detect_device_kind`](Self::detect_device_kind),
    /// is marked unrecognized, and the probe error is returned.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn bind_address(&self, device_id: &str, address: &str) -> Result<StoredDevice> {
        let address = DeviceAddress::parse(address)?;

        let id = device_id.to_string();
        let raw = address.to_string();
        self.with_store(move |store| {
            store.upsert_device(&id, None)?;
            store.set_device_address(&id, Some(&raw))
        })
        .await?;

        match self.transport.fetch_status(&address).await {
            Ok(_) => {
                let id = device_id.to_string();
                self.with_store(move |store| {
                    store.set_pairing_state(&id, PairingState::Networked)?;
                    store.set_device_kind(&id, DeviceKind::KnownProtocol)
                })
                .await?;
                self.pairing.disconnect(device_id).await;

                info!("{} is reachable at {}", device_id, address);
                self.events.send(DeviceEvent::Networked {
                    device_id: device_id.to_string(),
                    address: address.to_string(),
                });
            }
            Err(e) => {
                warn!("Probe of {} at {} failed: {}", device_id, address, e);
                let id = device_id.to_string();
                self.with_store(move |store| {
                    store.set_pairing_state(&id, PairingState::ShortRange)?;
                    store.set_device_kind(&id, DeviceKind::Unrecognized)
                })
                .await?;
                self.events.send(DeviceEvent::Error {
                    device_id: device_id.to_string(),
                    error: e.to_string(),
                });
                return Err(e.into());
            }
        }

        self.require_device(device_id).await
    }

    /// Decide whether the device speaks the controller protocol.
    ///
    /// Without a bound address the persisted kind is returned as-is.
    pub async fn detect_device_kind(&self, device_id: &str) -> Result<DeviceKind> {
        let device = self.require_device(device_id).await?;
        let Some(raw) = device.last_known_address else {
            return Ok(device.kind);
        };
        let address = DeviceAddress::parse(&raw)?;

        let kind = match self.transport.fetch_status(&address).await {
            Ok(_) => DeviceKind::KnownProtocol,
            Err(e) => {
                debug!("Detection probe of {} failed: {}", device_id, e);
                DeviceKind::Unrecognized
            }
        };

        if kind != device.kind {
            let id = device_id.to_string();
            self.with_store(move |store| store.set_device_kind(&id, kind))
                .await?;
        }
        Ok(kind)
    }

    /// Poll the device and stream its state.
    ///
    /// Starting a new watch for the same device replaces the previous one.
    pub async fn watch(&self, device_id: &str) -> Result<DeviceStateStream> {
        let address = self.device_address(device_id).await?;
        self.stop_watch(device_id).await;

        let statuses = self
            .poller
            .start_polling(&address, self.config.poll.clone())
            .await?;

        let id = self.next_watch.fetch_add(1, Ordering::Relaxed);
        let cancel_token = CancellationToken::new();
        self.watches.write().await.insert(
            device_id.to_string(),
            WatchEntry {
                id,
                address,
                cancel: cancel_token.clone(),
            },
        );

        let (tx, rx) = mpsc::channel(self.config.poll.buffer_size);
        let handle = tokio::spawn(forward_states(
            device_id.to_string(),
            id,
            statuses,
            tx,
            self.telemetry.clone(),
            Arc::clone(&self.watches),
            cancel_token.clone(),
        ));

        Ok(DeviceStateStream {
            receiver: rx,
            handle,
            cancel_token,
        })
    }

    async fn stop_watch(&self, device_id: &str) -> Option<DeviceAddress> {
        let entry = self.watches.write().await.remove(device_id)?;
        entry.cancel.cancel();
        Some(entry.address)
    }

    pub async fn set_fan_speed(&self, device_id: &str, percent: u8) -> Result<()> {
        let command = Command::fan_speed(percent).map_err(Error::from_codec_range)?;
        self.send_command(device_id, &command).await
    }

    pub async fn set_target_temperature(&self, device_id: &str, fahrenheit: f64) -> Result<()> {
        let command = Command::target_temperature(fahrenheit).map_err(Error::from_codec_range)?;
        self.send_command(device_id, &command).await
    }

    /// Validate and send an arbitrary command.
    pub async fn send_command(&self, device_id: &str, command: &Command) -> Result<()> {
        command.validate().map_err(Error::from_codec_range)?;
        let address = self.device_address(device_id).await?;
        self.transport.send_command(&address, command).await?;
        info!("Sent {:?} to {}", command, device_id);
        Ok(())
    }

    /// Tear down everything held for `device_id`. Never fails.
    pub async fn disconnect(&self, device_id: &str) {
        let mut address = self.stop_watch(device_id).await;
        let mut torn_down = address.is_some();

        if address.is_none() {
            address = match self.device(device_id).await {
                Ok(device) => device
                    .and_then(|d| d.last_known_address)
                    .and_then(|raw| DeviceAddress::parse(&raw).ok()),
                Err(e) => {
                    debug!("No stored address for {}: {}", device_id, e);
                    None
                }
            };
        }

        if let Some(address) = &address {
            torn_down |= self.poller.is_polling(address).await;
            torn_down |= self.reconnect.is_reconnecting(address).await;
            self.poller.stop_polling(address).await;
            self.reconnect.cancel_reconnect(address).await;
        }

        if self.pairing.is_connected(device_id).await {
            torn_down = true;
            self.pairing.disconnect(device_id).await;
        }

        if torn_down {
            info!("Disconnected {}", device_id);
            self.events.send(DeviceEvent::Disconnected {
                device_id: device_id.to_string(),
                reason: DisconnectReason::UserRequested,
            });
        }
    }

    /// Stop every watch, poll loop, episode and link.
    pub async fn shutdown(&self) {
        let watches: Vec<_> = self.watches.write().await.drain().collect();
        for (device_id, entry) in watches {
            entry.cancel.cancel();
            self.events.send(DeviceEvent::Disconnected {
                device_id,
                reason: DisconnectReason::Shutdown,
            });
        }
        self.poller.shutdown().await;
        self.reconnect.shutdown().await;
        self.pairing.shutdown().await;
    }
}

async fn forward_states(
    device_id: String,
    id: u64,
    mut statuses: StatusStream,
    tx: mpsc::Sender<DeviceStateResult>,
    telemetry: broadcast::Sender<TelemetryFrame>,
    watches: WatchMap,
    cancel: CancellationToken,
) {
    let mut recovering = false;

    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => break,
            item = statuses.next() => item,
        };
        let Some(item) = item else { break };

        let state = match item {
            Ok(status) => {
                let captured_at = OffsetDateTime::now_utc();
                // no subscribers is fine
                let _ = telemetry.send(TelemetryFrame {
                    device_id: device_id.clone(),
                    captured_at,
                    samples: status.samples(&device_id, captured_at),
                });

                let connection_state = if recovering {
                    ConnectionState::Reconnected
                } else {
                    ConnectionState::Online
                };
                recovering = false;
                Ok(DeviceState::from_status(
                    &device_id,
                    &status,
                    connection_state,
                    captured_at,
                ))
            }
            Err(e) => {
                recovering = true;
                Err(e)
            }
        };

        if tx.send(state).await.is_err() {
            debug!("Watch receiver for {} dropped", device_id);
            break;
        }
    }

    statuses.close();
    let mut watches = watches.write().await;
    if watches.get(&device_id).is_some_and(|w| w.id == id) {
        watches.remove(&device_id);
    }
}
