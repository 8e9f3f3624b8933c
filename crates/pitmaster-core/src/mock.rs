//! Mock transport and short-range link for testing.
//!
//! [`MockTransport`] implements [`GrillTransport`] and [`MockLink`] implements
//! [`ShortRangeLink`], so the pairing channel, poller, reconnection engine and
//! orchestrator can be exercised without a controller or a radio.
//!
//! # Features
//!
//! - **Failure injection**: fail every call, or only the next `n` calls
//! - **Latency simulation**: delay calls to exercise timeouts (works with a paused clock)
//! - **Call recording**: counts and captured command/credential payloads

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use tokio::sync::RwLock;

use pitmaster_types::{Command, Status};

use crate::error::{PairingError, PairingResult, TransportError, TransportResult};
use crate::traits::{DiscoveredGrill, GrillTransport, ShortRangeLink};
use crate::transport::DeviceAddress;

/// A status document matching a typical mid-cook controller.
pub fn sample_status() -> Status {
    Status {
        grill_temp: 225.0,
        food1_temp: Some(145.5),
        food2_temp: None,
        food3_temp: None,
        fan_speed: 35,
        target_temp: 225.0,
    }
}

/// In-memory [`GrillTransport`].
///
/// # Example
///
/// ```
/// use pitmaster_core::{DeviceAddress, GrillTransport, MockTransport, TransportError};
///
/// #[tokio::main]
/// async fn main() {
///     let transport = MockTransport::new();
///     let addr = DeviceAddress::parse("10.0.0.5").unwrap();
///
///     transport.set_transient_failures(1);
///     assert!(transport.fetch_status(&addr).await.is_err());
///     assert!(transport.fetch_status(&addr).await.is_ok());
///     assert_eq!(transport.fetch_count(), 2);
/// }
/// ```
pub struct MockTransport {
    status: RwLock<Status>,
    failure: RwLock<TransportError>,
    commands: RwLock<Vec<(DeviceAddress, Command)>>,
    should_fail: AtomicBool,
    remaining_failures: AtomicU32,
    fetch_count: AtomicU32,
    latency_ms: AtomicU64,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("should_fail", &self.should_fail.load(Ordering::Relaxed))
            .field(
                "remaining_failures",
                &self.remaining_failures.load(Ordering::Relaxed),
            )
            .field("fetch_count", &self.fetch_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::with_status(sample_status())
    }

    pub fn with_status(status: Status) -> Self {
        Self {
            status: RwLock::new(status),
            failure: RwLock::new(TransportError::Network("connection refused".to_string())),
            commands: RwLock::new(Vec::new()),
            should_fail: AtomicBool::new(false),
            remaining_failures: AtomicU32::new(0),
            fetch_count: AtomicU32::new(0),
            latency_ms: AtomicU64::new(0),
        }
    }

    /// Replace the status returned by subsequent fetches.
    pub async fn set_status(&self, status: Status) {
        *self.status.write().await = status;
    }

    /// Fail every call until switched off.
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::Relaxed);
    }

    /// Fail the next `count` calls, then succeed.
    pub fn set_transient_failures(&self, count: u32) {
        self.remaining_failures.store(count, Ordering::Relaxed);
    }

    /// Error returned by injected failures.
    pub async fn set_failure(&self, error: TransportError) {
        *self.failure.write().await = error;
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Number of `fetch_status` calls so far, failed ones included.
    pub fn fetch_count(&self) -> u32 {
        self.fetch_count.load(Ordering::Relaxed)
    }

    /// Commands that were accepted, in order.
    pub async fn commands(&self) -> Vec<(DeviceAddress, Command)> {
        self.commands.read().await.clone()
    }

    async fn simulate(&self) -> TransportResult<()> {
        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        let transient = self
            .remaining_failures
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok();
        if transient || self.should_fail.load(Ordering::Relaxed) {
            return Err(self.failure.read().await.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl GrillTransport for MockTransport {
    async fn fetch_status(&self, _address: &DeviceAddress) -> TransportResult<Status> {
        self.fetch_count.fetch_add(1, Ordering::Relaxed);
        self.simulate().await?;
        Ok(*self.status.read().await)
    }

    async fn send_command(&self, address: &DeviceAddress, command: &Command) -> TransportResult<()> {
        self.simulate().await?;
        self.commands
            .write()
            .await
            .push((address.clone(), *command));
        Ok(())
    }
}

/// In-memory [`ShortRangeLink`].
///
/// Advertised candidates are emitted once per scan, each after the configured
/// advertising interval; the scan stream then stays open until stopped.
pub struct MockLink {
    candidates: RwLock<Vec<DiscoveredGrill>>,
    connected: RwLock<HashSet<String>>,
    writes: RwLock<Vec<(String, Vec<u8>)>>,
    scanning: AtomicBool,
    fail_scan: AtomicBool,
    fail_write: AtomicBool,
    remaining_connect_failures: AtomicU32,
    scan_count: AtomicU32,
    stop_count: AtomicU32,
    advertise_interval_ms: AtomicU64,
    connect_latency_ms: AtomicU64,
}

impl std::fmt::Debug for MockLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLink")
            .field("scanning", &self.scanning.load(Ordering::Relaxed))
            .field("scan_count", &self.scan_count.load(Ordering::Relaxed))
            .field("stop_count", &self.stop_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for MockLink {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl MockLink {
    pub fn new(candidates: Vec<DiscoveredGrill>) -> Self {
        Self {
            candidates: RwLock::new(candidates),
            connected: RwLock::new(HashSet::new()),
            writes: RwLock::new(Vec::new()),
            scanning: AtomicBool::new(false),
            fail_scan: AtomicBool::new(false),
            fail_write: AtomicBool::new(false),
            remaining_connect_failures: AtomicU32::new(0),
            scan_count: AtomicU32::new(0),
            stop_count: AtomicU32::new(0),
            advertise_interval_ms: AtomicU64::new(100),
            connect_latency_ms: AtomicU64::new(0),
        }
    }

    /// Make a device visible to subsequent scans.
    pub async fn add_candidate(&self, grill: DiscoveredGrill) {
        self.candidates.write().await.push(grill);
    }

    pub fn set_scan_fails(&self, fail: bool) {
        self.fail_scan.store(fail, Ordering::Relaxed);
    }

    pub fn set_write_fails(&self, fail: bool) {
        self.fail_write.store(fail, Ordering::Relaxed);
    }

    /// Fail the next `count` connects with a Bluetooth error.
    pub fn set_connect_failures(&self, count: u32) {
        self.remaining_connect_failures
            .store(count, Ordering::Relaxed);
    }

    pub fn set_advertise_interval(&self, interval: Duration) {
        self.advertise_interval_ms
            .store(interval.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn set_connect_latency(&self, latency: Duration) {
        self.connect_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::Relaxed)
    }

    pub fn scan_count(&self) -> u32 {
        self.scan_count.load(Ordering::Relaxed)
    }

    pub fn stop_count(&self) -> u32 {
        self.stop_count.load(Ordering::Relaxed)
    }

    pub async fn is_linked(&self, device_id: &str) -> bool {
        self.connected.read().await.contains(device_id)
    }

    /// Credential payloads written so far.
    pub async fn writes(&self) -> Vec<(String, Vec<u8>)> {
        self.writes.read().await.clone()
    }
}

#[async_trait]
impl ShortRangeLink for MockLink {
    async fn start_scan(&self) -> PairingResult<BoxStream<'static, DiscoveredGrill>> {
        if self.fail_scan.load(Ordering::Relaxed) {
            return Err(PairingError::Bluetooth("adapter powered off".to_string()));
        }
        self.scan_count.fetch_add(1, Ordering::Relaxed);
        self.scanning.store(true, Ordering::Relaxed);

        let interval = Duration::from_millis(self.advertise_interval_ms.load(Ordering::Relaxed));
        let candidates = self.candidates.read().await.clone();
        let adverts = stream::iter(candidates)
            .then(move |grill| async move {
                tokio::time::sleep(interval).await;
                grill
            })
            .chain(stream::pending());
        Ok(adverts.boxed())
    }

    async fn stop_scan(&self) -> PairingResult<()> {
        self.stop_count.fetch_add(1, Ordering::Relaxed);
        self.scanning.store(false, Ordering::Relaxed);
        Ok(())
    }

    async fn connect(&self, device_id: &str) -> PairingResult<()> {
        let latency = self.connect_latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        let known = self
            .candidates
            .read()
            .await
            .iter()
            .any(|g| g.device_id == device_id);
        if !known {
            return Err(PairingError::not_found(device_id));
        }

        let failed = self
            .remaining_connect_failures
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(PairingError::Bluetooth("connection rejected".to_string()));
        }

        self.connected.write().await.insert(device_id.to_string());
        Ok(())
    }

    async fn write_credentials(&self, device_id: &str, payload: &[u8]) -> PairingResult<()> {
        if !self.connected.read().await.contains(device_id) {
            return Err(PairingError::NotConnected(device_id.to_string()));
        }
        if self.fail_write.load(Ordering::Relaxed) {
            return Err(PairingError::WriteFailed("GATT write rejected".to_string()));
        }
        self.writes
            .write()
            .await
            .push((device_id.to_string(), payload.to_vec()));
        Ok(())
    }

    async fn disconnect(&self, device_id: &str) -> PairingResult<()> {
        self.connected.write().await.remove(device_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> DeviceAddress {
        DeviceAddress::parse("10.0.0.5").unwrap()
    }

    #[tokio::test]
    async fn test_mock_transport_default_status() {
        let transport = MockTransport::new();
        let status = transport.fetch_status(&addr()).await.unwrap();
        assert_eq!(status, sample_status());
        assert_eq!(transport.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_transport_transient_failures() {
        let transport = MockTransport::new();
        transport.set_transient_failures(2);

        assert!(transport.fetch_status(&addr()).await.is_err());
        assert!(transport.fetch_status(&addr()).await.is_err());
        assert!(transport.fetch_status(&addr()).await.is_ok());
        assert_eq!(transport.fetch_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_transport_custom_failure() {
        let transport = MockTransport::new();
        transport.set_failure(TransportError::Http(500)).await;
        transport.set_should_fail(true);

        let err = transport.fetch_status(&addr()).await.unwrap_err();
        assert_eq!(err, TransportError::Http(500));

        transport.set_should_fail(false);
        assert!(transport.fetch_status(&addr()).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_transport_records_commands() {
        let transport = MockTransport::new();
        let command = Command::fan_speed(50).unwrap();
        transport.send_command(&addr(), &command).await.unwrap();

        let commands = transport.commands().await;
        assert_eq!(commands, vec![(addr(), command)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_link_scan_emits_candidates() {
        let link = MockLink::new(vec![
            DiscoveredGrill::new("AA:BB:CC:00:00:01").with_name("Pitmaster 1"),
            DiscoveredGrill::new("AA:BB:CC:00:00:02"),
        ]);

        let mut adverts = link.start_scan().await.unwrap();
        assert!(link.is_scanning());
        let first = adverts.next().await.unwrap();
        assert_eq!(first.name.as_deref(), Some("Pitmaster 1"));
        let second = adverts.next().await.unwrap();
        assert_eq!(second.device_id, "AA:BB:CC:00:00:02");

        link.stop_scan().await.unwrap();
        assert!(!link.is_scanning());
        assert_eq!(link.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_link_connect_unknown() {
        let link = MockLink::default();
        let err = link.connect("nope").await.unwrap_err();
        assert_eq!(err, PairingError::not_found("nope"));
    }

    #[tokio::test]
    async fn test_mock_link_write_requires_connection() {
        let link = MockLink::new(vec![DiscoveredGrill::new("g1")]);
        let err = link.write_credentials("g1", b"{}").await.unwrap_err();
        assert!(matches!(err, PairingError::NotConnected(_)));

        link.connect("g1").await.unwrap();
        link.write_credentials("g1", b"{}").await.unwrap();
        assert_eq!(link.writes().await.len(), 1);

        link.disconnect("g1").await.unwrap();
        assert!(!link.is_linked("g1").await);
    }
}
