//! Periodic status polling with failure hand-off to the reconnection engine.
//!
//! [`StatusPoller::start_polling`] spawns one loop per device address. The
//! loop fetches immediately, then once per interval, and delivers every result
//! (success or failure) on the returned [`StatusStream`]. After a failure it
//! suspends ticking until the reconnection episode for that address finishes,
//! then resumes the normal interval whatever the outcome.
//!
//! The stream supports graceful shutdown via [`StatusStream::close`]; dropping
//! it has the same effect. A loop that stops while waiting on a reconnection
//! episode cancels that episode.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::stream::Stream;
use tokio::sync::{RwLock, mpsc};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pitmaster_types::Status;

use crate::error::{Error, Result, TransportError};
use crate::reconnect::{EpisodeOutcome, ReconnectEngine};
use crate::traits::GrillTransport;
use crate::transport::DeviceAddress;

/// Default time between status fetches.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Options for a poll loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOptions {
    /// Time between fetches. Default: 5 seconds.
    pub interval: Duration,
    /// Buffer size for the status channel. Default: 16.
    pub buffer_size: usize,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            buffer_size: 16,
        }
    }
}

impl PollOptions {
    /// Create options with a specific interval.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::invalid_config("poll interval must be > 0"));
        }
        if self.buffer_size == 0 {
            return Err(Error::invalid_config("buffer_size must be > 0"));
        }
        Ok(())
    }
}

/// Result type for stream items.
pub type StatusResult = std::result::Result<Status, TransportError>;

/// A stream of status results for one device.
pub struct StatusStream {
    address: DeviceAddress,
    receiver: mpsc::Receiver<StatusResult>,
    handle: tokio::task::JoinHandle<()>,
    cancel_token: CancellationToken,
}

impl StatusStream {
    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    /// Close the stream and stop the poll loop.
    pub fn close(self) {
        self.cancel_token.cancel();
    }

    /// Get a cancellation token that stops the loop when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Check if the poll loop is still running.
    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for StatusStream {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

impl Stream for StatusStream {
    type Item = StatusResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_recv(cx)
    }
}

struct PollLoop {
    id: u64,
    cancel: CancellationToken,
}

/// Owns the poll loops of all devices.
#[derive(Clone)]
pub struct StatusPoller {
    transport: Arc<dyn GrillTransport>,
    reconnect: ReconnectEngine,
    loops: Arc<RwLock<HashMap<DeviceAddress, PollLoop>>>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for StatusPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusPoller").finish_non_exhaustive()
    }
}

impl StatusPoller {
    pub fn new(transport: Arc<dyn GrillTransport>, reconnect: ReconnectEngine) -> Self {
        Self {
            transport,
            reconnect,
            loops: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Start (or restart) the poll loop for `address`.
    ///
    /// Any previous loop for the same address is stopped and any running
    /// reconnection episode is cancelled before the new loop starts.
    pub async fn start_polling(
        &self,
        address: &DeviceAddress,
        options: PollOptions,
    ) -> Result<StatusStream> {
        options.validate()?;

        self.stop_polling(address).await;
        self.reconnect.cancel_reconnect(address).await;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel_token = CancellationToken::new();
        self.loops.write().await.insert(
            address.clone(),
            PollLoop {
                id,
                cancel: cancel_token.clone(),
            },
        );

        let (tx, rx) = mpsc::channel(options.buffer_size);
        let task = PollTask {
            transport: Arc::clone(&self.transport),
            reconnect: self.reconnect.clone(),
            loops: Arc::clone(&self.loops),
            address: address.clone(),
            id,
            interval: options.interval,
            cancel: cancel_token.clone(),
            tx,
        };
        info!("Polling {} every {:?}", address, options.interval);
        let handle = tokio::spawn(task.run());

        Ok(StatusStream {
            address: address.clone(),
            receiver: rx,
            handle,
            cancel_token,
        })
    }

    /// Stop the poll loop for `address` and any reconnection it started.
    ///
    /// No-op when nothing is running.
    pub async fn stop_polling(&self, address: &DeviceAddress) {
        let removed = self.loops.write().await.remove(address);
        if let Some(poll) = removed {
            debug!("Stopping poll loop for {}", address);
            poll.cancel.cancel();
            self.reconnect.cancel_reconnect(address).await;
        }
    }

    pub async fn is_polling(&self, address: &DeviceAddress) -> bool {
        self.loops.read().await.contains_key(address)
    }

    /// Stop every loop.
    pub async fn shutdown(&self) {
        for (_, poll) in self.loops.write().await.drain() {
            poll.cancel.cancel();
        }
    }
}

struct PollTask {
    transport: Arc<dyn GrillTransport>,
    reconnect: ReconnectEngine,
    loops: Arc<RwLock<HashMap<DeviceAddress, PollLoop>>>,
    address: DeviceAddress,
    id: u64,
    interval: Duration,
    cancel: CancellationToken,
    tx: mpsc::Sender<StatusResult>,
}

impl PollTask {
    async fn run(self) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.transport.fetch_status(&self.address) => result,
            };

            let error = match result {
                Ok(status) => {
                    if self.tx.send(Ok(status)).await.is_err() {
                        debug!("Status receiver for {} dropped, stopping", self.address);
                        break;
                    }
                    continue;
                }
                Err(e) => e,
            };

            warn!("Status fetch from {} failed: {}", self.address, error);
            if self.tx.send(Err(error)).await.is_err() {
                debug!("Status receiver for {} dropped, stopping", self.address);
                break;
            }

            let episode = self.reconnect.attempt_reconnect(&self.address).await;
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.reconnect.cancel_episode(&self.address, &episode).await;
                    break;
                }
                outcome = episode.clone().outcome() => outcome,
            };
            match outcome {
                EpisodeOutcome::Recovered { attempts } => {
                    info!("{} is back after {} attempt(s)", self.address, attempts)
                }
                EpisodeOutcome::Exhausted => {
                    warn!("{} unreachable, continuing at normal interval", self.address)
                }
                EpisodeOutcome::Cancelled | EpisodeOutcome::Pending => {}
            }
            ticker.reset();
        }

        let mut loops = self.loops.write().await;
        if loops.get(&self.address).is_some_and(|l| l.id == self.id) {
            loops.remove(&self.address);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{DeviceEvent, EventDispatcher};
    use crate::mock::MockTransport;
    use crate::reconnect::ReconnectOptions;
    use futures::StreamExt;

    fn addr() -> DeviceAddress {
        DeviceAddress::parse("10.0.0.9").unwrap()
    }

    fn poller(transport: Arc<MockTransport>) -> StatusPoller {
        poller_with_events(transport).0
    }

    fn poller_with_events(transport: Arc<MockTransport>) -> (StatusPoller, EventDispatcher) {
        let events = EventDispatcher::new(64);
        let engine =
            ReconnectEngine::new(transport.clone(), events.clone(), ReconnectOptions::default())
                .unwrap();
        (StatusPoller::new(transport, engine), events)
    }

    #[test]
    fn test_poll_options_default() {
        let opts = PollOptions::default();
        assert_eq!(opts.interval, Duration::from_secs(5));
        assert_eq!(opts.buffer_size, 16);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_poll_options_validate() {
        assert!(PollOptions::with_interval(Duration::ZERO).validate().is_err());
        assert!(PollOptions::default().buffer_size(0).validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetches_immediately_then_per_tick() {
        let transport = Arc::new(MockTransport::new());
        let poller = poller(Arc::clone(&transport));

        let mut stream = poller
            .start_polling(&addr(), PollOptions::default())
            .await
            .unwrap();
        let start = tokio::time::Instant::now();

        assert!(stream.next().await.unwrap().is_ok());
        assert_eq!(start.elapsed(), Duration::ZERO);

        assert!(stream.next().await.unwrap().is_ok());
        assert_eq!(start.elapsed(), Duration::from_secs(5));
        assert_eq!(transport.fetch_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_loop() {
        let transport = Arc::new(MockTransport::new());
        let poller = poller(Arc::clone(&transport));

        let mut first = poller
            .start_polling(&addr(), PollOptions::default())
            .await
            .unwrap();
        let _second = poller
            .start_polling(&addr(), PollOptions::default())
            .await
            .unwrap();

        // the first loop is stopped; its stream ends after any buffered item
        while first.next().await.is_some() {}
        assert!(poller.is_polling(&addr()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_polling_closes_stream() {
        let transport = Arc::new(MockTransport::new());
        let poller = poller(Arc::clone(&transport));

        let mut stream = poller
            .start_polling(&addr(), PollOptions::default())
            .await
            .unwrap();
        assert!(stream.next().await.unwrap().is_ok());

        poller.stop_polling(&addr()).await;
        assert!(stream.next().await.is_none());
        assert!(!poller.is_polling(&addr()).await);

        // idempotent
        poller.stop_polling(&addr()).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_forwarded_and_suspends_ticking() {
        let transport = Arc::new(MockTransport::new());
        transport.set_transient_failures(1);
        let poller = poller(Arc::clone(&transport));

        let mut stream = poller
            .start_polling(&addr(), PollOptions::default())
            .await
            .unwrap();
        let start = tokio::time::Instant::now();

        assert!(stream.next().await.unwrap().is_err());

        // episode recovers after 1s, then the loop waits one full interval
        assert!(stream.next().await.unwrap().is_ok());
        assert_eq!(start.elapsed(), Duration::from_secs(6));
        // initial failure, recovery probe, resumed poll
        assert_eq!(transport.fetch_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_stream_stops_loop() {
        let transport = Arc::new(MockTransport::new());
        let poller = poller(Arc::clone(&transport));

        let stream = poller
            .start_polling(&addr(), PollOptions::default())
            .await
            .unwrap();
        drop(stream);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!poller.is_polling(&addr()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_stream_cancels_reconnection() {
        let transport = Arc::new(MockTransport::new());
        transport.set_should_fail(true);
        let (poller, events) = poller_with_events(Arc::clone(&transport));
        let mut rx = events.subscribe();

        let mut stream = poller
            .start_polling(&addr(), PollOptions::default())
            .await
            .unwrap();
        assert!(stream.next().await.unwrap().is_err());
        drop(stream);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.fetch_count(), 1);
        assert!(!poller.reconnect.is_reconnecting(&addr()).await);
        assert_eq!(poller.reconnect.attempt_count(&addr()).await, 0);
        while let Ok(event) = rx.try_recv() {
            assert!(!matches!(event, DeviceEvent::ReconnectFailed { .. }));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_polling_cancels_reconnection() {
        let transport = Arc::new(MockTransport::new());
        transport.set_should_fail(true);
        let (poller, events) = poller_with_events(Arc::clone(&transport));
        let mut rx = events.subscribe();

        let mut stream = poller
            .start_polling(&addr(), PollOptions::default())
            .await
            .unwrap();
        assert!(stream.next().await.unwrap().is_err());
        assert!(matches!(
            rx.recv().await.unwrap(),
            DeviceEvent::ReconnectAttempting { attempt: 1, .. }
        ));

        poller.stop_polling(&addr()).await;
        assert!(!poller.reconnect.is_reconnecting(&addr()).await);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.fetch_count(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_cancels_running_episode() {
        let transport = Arc::new(MockTransport::new());
        transport.set_should_fail(true);
        let (poller, events) = poller_with_events(Arc::clone(&transport));
        let mut rx = events.subscribe();

        let mut first = poller
            .start_polling(&addr(), PollOptions::default())
            .await
            .unwrap();
        assert!(first.next().await.unwrap().is_err());
        assert!(matches!(
            rx.recv().await.unwrap(),
            DeviceEvent::ReconnectAttempting { attempt: 1, .. }
        ));
        assert_eq!(poller.reconnect.attempt_count(&addr()).await, 1);

        // restart inside the 1s backoff
        transport.set_should_fail(false);
        let mut second = poller
            .start_polling(&addr(), PollOptions::default())
            .await
            .unwrap();
        assert_eq!(poller.reconnect.attempt_count(&addr()).await, 0);
        assert!(!poller.reconnect.is_reconnecting(&addr()).await);
        assert!(second.next().await.unwrap().is_ok());

        // the cancelled episode never probes
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(transport.fetch_count(), 2);
        assert!(rx.try_recv().is_err());

        // the next failure starts over at attempt 1
        transport.set_should_fail(true);
        assert!(second.next().await.unwrap().is_err());
        assert!(matches!(
            rx.recv().await.unwrap(),
            DeviceEvent::ReconnectAttempting { attempt: 1, .. }
        ));
    }
}
