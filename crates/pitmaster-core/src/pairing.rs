//! Short-range pairing: discovery, link setup and WiFi provisioning.
//!
//! [`PairingChannel`] drives a [`ShortRangeLink`] through
//! `Idle → Scanning → FoundCandidates → Connected → CredentialsSent`.
//! Scans are bounded by a timeout and always stopped on the radio when the
//! scan finishes, is superseded, or its [`DiscoveryStream`] is dropped.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::{RwLock, mpsc};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{PairingError, PairingResult};
use crate::events::{DeviceEvent, EventDispatcher};
use crate::traits::{DiscoveredGrill, ShortRangeLink};

/// Where the channel is in the pairing flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PairingPhase {
    #[default]
    Idle,
    Scanning,
    FoundCandidates,
    Connected,
    CredentialsSent,
}

/// Timeouts used by the pairing channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingOptions {
    /// Default scan duration for callers without their own.
    pub scan_timeout: Duration,
    /// Scan run by `connect` when the device is not in the last result set.
    pub rediscovery_timeout: Duration,
    /// Bound on link establishment.
    pub connect_timeout: Duration,
    /// Bound on the confirmed credential write.
    pub write_timeout: Duration,
}

impl Default for PairingOptions {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_secs(10),
            rediscovery_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(15),
            write_timeout: Duration::from_secs(10),
        }
    }
}

impl PairingOptions {
    pub fn scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn rediscovery_timeout(mut self, timeout: Duration) -> Self {
        self.rediscovery_timeout = timeout;
        self
    }
}

#[derive(Serialize)]
struct WifiCredentials<'a> {
    ssid: &'a str,
    password: &'a str,
}

#[derive(Default)]
struct ChannelState {
    phase: PairingPhase,
    last_scan: Vec<DiscoveredGrill>,
    connected: HashSet<String>,
    scan: Option<(u64, CancellationToken)>,
    next_scan: u64,
}

impl ChannelState {
    fn settle(&mut self) {
        self.phase = if !self.connected.is_empty() {
            PairingPhase::Connected
        } else if self.last_scan.is_empty() {
            PairingPhase::Idle
        } else {
            PairingPhase::FoundCandidates
        };
    }
}

/// A bounded scan in progress.
///
/// Yields each device once. The scan stops when the timeout elapses, when
/// [`close`](Self::close) is called, or when the stream is dropped.
pub struct DiscoveryStream {
    receiver: mpsc::Receiver<DiscoveredGrill>,
    handle: tokio::task::JoinHandle<()>,
    cancel_token: CancellationToken,
}

impl DiscoveryStream {
    pub fn close(self) {
        self.cancel_token.cancel();
    }

    /// Check if the scan is still running.
    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for DiscoveryStream {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

impl Stream for DiscoveryStream {
    type Item = DiscoveredGrill;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_recv(cx)
    }
}

/// Pairing state machine over a [`ShortRangeLink`].
#[derive(Clone)]
pub struct PairingChannel {
    link: Arc<dyn ShortRangeLink>,
    options: PairingOptions,
    state: Arc<RwLock<ChannelState>>,
    events: Option<EventDispatcher>,
}

impl std::fmt::Debug for PairingChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingChannel")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl PairingChannel {
    pub fn new(link: Arc<dyn ShortRangeLink>, options: PairingOptions) -> Self {
        Self {
            link,
            options,
            state: Arc::new(RwLock::new(ChannelState::default())),
            events: None,
        }
    }

    /// Publish a [`DeviceEvent::Discovered`] for every device a scan finds.
    pub fn with_events(mut self, events: EventDispatcher) -> Self {
        self.events = Some(events);
        self
    }

    pub fn options(&self) -> &PairingOptions {
        &self.options
    }

    pub async fn phase(&self) -> PairingPhase {
        self.state.read().await.phase
    }

    /// Devices seen by the most recent scan.
    pub async fn last_scan(&self) -> Vec<DiscoveredGrill> {
        self.state.read().await.last_scan.clone()
    }

    pub async fn is_connected(&self, device_id: &str) -> bool {
        self.state.read().await.connected.contains(device_id)
    }

    /// Scan for controllers for at most `duration`.
    ///
    /// A scan already running is superseded. The last scan result set is
    /// replaced by what this scan finds.
    pub async fn scan(&self, duration: Duration) -> PairingResult<DiscoveryStream> {
        let adverts = self.link.start_scan().await?;

        let cancel_token = CancellationToken::new();
        let generation = {
            let mut state = self.state.write().await;
            state.next_scan += 1;
            let generation = state.next_scan;
            if let Some((_, previous)) = state.scan.replace((generation, cancel_token.clone())) {
                previous.cancel();
            }
            state.last_scan.clear();
            state.phase = PairingPhase::Scanning;
            generation
        };

        info!("Scanning for grill controllers for {:?}", duration);
        let (tx, rx) = mpsc::channel(32);
        let link = Arc::clone(&self.link);
        let state = Arc::clone(&self.state);
        let task_token = cancel_token.clone();
        let events = self.events.clone();

        let handle = tokio::spawn(async move {
            let mut adverts = adverts;
            let deadline = tokio::time::sleep(duration);
            tokio::pin!(deadline);
            let mut seen = HashSet::new();

            loop {
                tokio::select! {
                    _ = &mut deadline => break,
                    _ = task_token.cancelled() => break,
                    advert = adverts.next() => {
                        let Some(grill) = advert else { break };
                        if !seen.insert(grill.device_id.clone()) {
                            continue;
                        }
                        debug!("Found {} ({:?})", grill.device_id, grill.name);
                        {
                            let mut state = state.write().await;
                            if state.scan.as_ref().is_some_and(|(g, _)| *g == generation) {
                                state.last_scan.push(grill.clone());
                            }
                        }
                        if let Some(events) = &events {
                            events.send(DeviceEvent::Discovered {
                                device_id: grill.device_id.clone(),
                                name: grill.name.clone(),
                                rssi: grill.rssi,
                            });
                        }
                        if tx.send(grill).await.is_err() {
                            break;
                        }
                    }
                }
            }

            // a superseding scan owns the radio now
            let current = {
                let mut state = state.write().await;
                let current = state.scan.as_ref().is_some_and(|(g, _)| *g == generation);
                if current {
                    state.scan = None;
                    if state.phase == PairingPhase::Scanning {
                        state.settle();
                    }
                    debug!("Scan finished with {} candidate(s)", state.last_scan.len());
                }
                current
            };
            if current && let Err(e) = link.stop_scan().await {
                warn!("Failed to stop scan: {}", e);
            }
        });

        Ok(DiscoveryStream {
            receiver: rx,
            handle,
            cancel_token,
        })
    }

    /// Open a link to `device_id`.
    ///
    /// If the device is not in the last scan result set a short rediscovery
    /// scan runs first. Returns the discovery descriptor of the device.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn connect(&self, device_id: &str) -> PairingResult<DiscoveredGrill> {
        let known = self
            .state
            .read()
            .await
            .last_scan
            .iter()
            .find(|g| g.device_id == device_id)
            .cloned();

        let grill = match known {
            Some(grill) => grill,
            None => self.rediscover(device_id).await?,
        };

        match timeout(self.options.connect_timeout, self.link.connect(device_id)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                // leave no half-open link behind
                let _ = self.link.disconnect(device_id).await;
                return Err(PairingError::connect_timeout(
                    device_id,
                    self.options.connect_timeout,
                ));
            }
        }

        let mut state = self.state.write().await;
        state.connected.insert(device_id.to_string());
        state.phase = PairingPhase::Connected;
        info!("Connected to {}", device_id);
        Ok(grill)
    }

    async fn rediscover(&self, device_id: &str) -> PairingResult<DiscoveredGrill> {
        debug!("{} not in last scan, rediscovering", device_id);
        let mut scan = self.scan(self.options.rediscovery_timeout).await?;
        while let Some(grill) = scan.next().await {
            if grill.device_id == device_id {
                scan.close();
                return Ok(grill);
            }
        }
        Err(PairingError::not_found(device_id))
    }

    /// Write WiFi credentials to a connected device.
    ///
    /// The write is confirmed by the device; whether it actually joins the
    /// network is not checked here.
    pub async fn send_credentials(
        &self,
        device_id: &str,
        ssid: &str,
        password: &str,
    ) -> PairingResult<()> {
        if !self.is_connected(device_id).await {
            return Err(PairingError::NotConnected(device_id.to_string()));
        }

        let payload = serde_json::to_vec(&WifiCredentials { ssid, password })
            .map_err(|e| PairingError::WriteFailed(e.to_string()))?;

        match timeout(
            self.options.write_timeout,
            self.link.write_credentials(device_id, &payload),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(PairingError::WriteFailed(format!(
                    "no confirmation within {:?}",
                    self.options.write_timeout
                )));
            }
        }

        let mut state = self.state.write().await;
        if state.connected.contains(device_id) {
            state.phase = PairingPhase::CredentialsSent;
        }
        info!("Sent WiFi credentials for '{}' to {}", ssid, device_id);
        Ok(())
    }

    /// Close the link to `device_id`. Never fails; repeated calls are no-ops.
    pub async fn disconnect(&self, device_id: &str) {
        let was_connected = {
            let mut state = self.state.write().await;
            let removed = state.connected.remove(device_id);
            if removed && state.phase != PairingPhase::Scanning {
                state.settle();
            }
            removed
        };

        if was_connected {
            if let Err(e) = self.link.disconnect(device_id).await {
                warn!("Error disconnecting {}: {}", device_id, e);
            }
            info!("Disconnected from {}", device_id);
        }
    }

    /// Stop any running scan and close every link.
    pub async fn shutdown(&self) {
        let (scan, connected) = {
            let mut state = self.state.write().await;
            let scan = state.scan.take();
            let connected: Vec<_> = state.connected.drain().collect();
            state.settle();
            (scan, connected)
        };
        if let Some((_, token)) = scan {
            token.cancel();
            if let Err(e) = self.link.stop_scan().await {
                warn!("Failed to stop scan: {}", e);
            }
        }
        for device_id in connected {
            if let Err(e) = self.link.disconnect(&device_id).await {
                warn!("Error disconnecting {}: {}", device_id, e);
            }
        }
    }
}
