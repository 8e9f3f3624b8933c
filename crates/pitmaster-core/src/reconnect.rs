//! Per-device reconnection with exponential backoff.
//!
//! An *episode* starts when a poll fails and [`ReconnectEngine::attempt_reconnect`]
//! is called. Each attempt waits `initial_delay * multiplier^(attempt-1)`, then
//! probes the controller with `fetch_status`. The episode ends on the first
//! successful probe, after `max_attempts` failed probes, or when cancelled.
//!
//! Only one episode runs per device. Calling `attempt_reconnect` while one is in
//! flight returns a handle to the running episode rather than starting a
//! second timer.
//!
//! Events are published for every scheduled attempt
//! ([`DeviceEvent::ReconnectAttempting`]), on recovery
//! ([`DeviceEvent::ReconnectSucceeded`]) and exactly once when an episode is
//! exhausted ([`DeviceEvent::ReconnectFailed`]).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{RwLock, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::events::{DeviceEvent, EventDispatcher};
use crate::traits::GrillTransport;
use crate::transport::DeviceAddress;

/// Options for automatic reconnection.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectOptions {
    /// Probes per episode before giving up.
    pub max_attempts: u32,
    /// Delay before the first probe.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectOptions {
    /// Create new reconnect options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum number of reconnection attempts.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set initial delay before first reconnection attempt.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay between attempts.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier for exponential backoff.
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Delay before the given attempt. Attempts are numbered from 1.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_ms = self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let delay = if delay_ms.is_finite() {
            Duration::from_millis(delay_ms as u64)
        } else {
            self.max_delay
        };

        delay.min(self.max_delay)
    }

    /// Validate the options and return an error if invalid.
    ///
    /// Checks that:
    /// - `max_attempts` is >= 1
    /// - `backoff_multiplier` is >= 1.0
    /// - `initial_delay` is > 0
    /// - `max_delay` >= `initial_delay`
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::invalid_config("max_attempts must be >= 1"));
        }
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier < 1.0 {
            return Err(Error::invalid_config("backoff_multiplier must be >= 1.0"));
        }
        if self.initial_delay.is_zero() {
            return Err(Error::invalid_config("initial_delay must be > 0"));
        }
        if self.max_delay < self.initial_delay {
            return Err(Error::invalid_config("max_delay must be >= initial_delay"));
        }
        Ok(())
    }
}

/// How an episode ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodeOutcome {
    /// Still running.
    Pending,
    /// A probe succeeded on attempt `attempts`.
    Recovered { attempts: u32 },
    /// Every attempt failed.
    Exhausted,
    /// Cancelled before it finished.
    Cancelled,
}

impl EpisodeOutcome {
    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Handle to a running (or finished) episode.
#[derive(Debug, Clone)]
pub struct ReconnectHandle {
    episode: u64,
    outcome: watch::Receiver<EpisodeOutcome>,
}

impl ReconnectHandle {
    fn new(episode: u64, outcome: watch::Receiver<EpisodeOutcome>) -> Self {
        Self { episode, outcome }
    }

    /// Identifier of the episode this handle follows.
    pub fn episode_id(&self) -> u64 {
        self.episode
    }

    /// Current state without waiting.
    pub fn current(&self) -> EpisodeOutcome {
        *self.outcome.borrow()
    }

    /// Wait for the episode to finish.
    pub async fn outcome(mut self) -> EpisodeOutcome {
        match self.outcome.wait_for(EpisodeOutcome::is_finished).await {
            Ok(outcome) => *outcome,
            // episode task went away without reporting
            Err(_) => EpisodeOutcome::Cancelled,
        }
    }
}

struct Episode {
    id: u64,
    attempts: u32,
    cancel: CancellationToken,
    outcome: Arc<watch::Sender<EpisodeOutcome>>,
}

struct EngineInner {
    transport: Arc<dyn GrillTransport>,
    events: EventDispatcher,
    options: ReconnectOptions,
    episodes: RwLock<HashMap<DeviceAddress, Episode>>,
    next_id: AtomicU64,
}

/// Schedules and tracks reconnection episodes for every device.
///
/// Cheap to clone; clones share the same episode registry.
#[derive(Clone)]
pub struct ReconnectEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for ReconnectEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectEngine")
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

impl ReconnectEngine {
    pub fn new(
        transport: Arc<dyn GrillTransport>,
        events: EventDispatcher,
        options: ReconnectOptions,
    ) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            inner: Arc::new(EngineInner {
                transport,
                events,
                options,
                episodes: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        })
    }

    pub fn options(&self) -> &ReconnectOptions {
        &self.inner.options
    }

    /// Start an episode for `address`, or join the one already running.
    pub async fn attempt_reconnect(&self, address: &DeviceAddress) -> ReconnectHandle {
        let mut episodes = self.inner.episodes.write().await;
        if let Some(episode) = episodes.get(address) {
            debug!("Joining reconnection episode for {}", address);
            return ReconnectHandle::new(episode.id, episode.outcome.subscribe());
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let (tx, rx) = watch::channel(EpisodeOutcome::Pending);
        let outcome = Arc::new(tx);
        episodes.insert(
            address.clone(),
            Episode {
                id,
                attempts: 0,
                cancel: cancel.clone(),
                outcome: Arc::clone(&outcome),
            },
        );
        drop(episodes);

        info!("Starting reconnection for {}", address);
        let inner = Arc::clone(&self.inner);
        let address = address.clone();
        tokio::spawn(async move {
            run_episode(inner, address, id, cancel, outcome).await;
        });

        ReconnectHandle::new(id, rx)
    }

    /// Cancel the running episode for `address` and reset its counter.
    ///
    /// Safe to call when nothing is running.
    pub async fn cancel_reconnect(&self, address: &DeviceAddress) {
        let removed = self.inner.episodes.write().await.remove(address);
        if let Some(episode) = removed {
            info!("Cancelled reconnection for {}", address);
            episode.cancel.cancel();
            episode.outcome.send_replace(EpisodeOutcome::Cancelled);
        }
    }

    /// Cancel the episode `handle` follows, if it is still the running one.
    ///
    /// A newer episode for the same address is left alone.
    pub async fn cancel_episode(&self, address: &DeviceAddress, handle: &ReconnectHandle) {
        let mut episodes = self.inner.episodes.write().await;
        if !episodes
            .get(address)
            .is_some_and(|e| e.id == handle.episode)
        {
            return;
        }
        if let Some(episode) = episodes.remove(address) {
            drop(episodes);
            info!("Cancelled reconnection for {}", address);
            episode.cancel.cancel();
            episode.outcome.send_replace(EpisodeOutcome::Cancelled);
        }
    }

    /// Attempt number of the running episode, 0 when idle.
    pub async fn attempt_count(&self, address: &DeviceAddress) -> u32 {
        self.inner
            .episodes
            .read()
            .await
            .get(address)
            .map_or(0, |e| e.attempts)
    }

    pub async fn is_reconnecting(&self, address: &DeviceAddress) -> bool {
        self.inner.episodes.read().await.contains_key(address)
    }

    /// Cancel every running episode.
    pub async fn shutdown(&self) {
        let drained: Vec<_> = self.inner.episodes.write().await.drain().collect();
        for (_, episode) in drained {
            episode.cancel.cancel();
            episode.outcome.send_replace(EpisodeOutcome::Cancelled);
        }
    }
}

enum Step {
    Wait { attempt: u32 },
    GiveUp,
    Stale,
}

async fn run_episode(
    inner: Arc<EngineInner>,
    address: DeviceAddress,
    id: u64,
    cancel: CancellationToken,
    outcome: Arc<watch::Sender<EpisodeOutcome>>,
) {
    let max_attempts = inner.options.max_attempts;

    loop {
        let step = {
            let mut episodes = inner.episodes.write().await;
            match episodes.get_mut(&address) {
                Some(episode) if episode.id == id => {
                    if episode.attempts >= max_attempts {
                        episodes.remove(&address);
                        Step::GiveUp
                    } else {
                        episode.attempts += 1;
                        Step::Wait {
                            attempt: episode.attempts,
                        }
                    }
                }
                _ => Step::Stale,
            }
        };

        let attempt = match step {
            Step::Stale => return,
            Step::GiveUp => {
                warn!(
                    "Reconnection to {} failed after {} attempts",
                    address, max_attempts
                );
                inner.events.send(DeviceEvent::ReconnectFailed {
                    address: address.to_string(),
                    attempts: max_attempts,
                });
                outcome.send_replace(EpisodeOutcome::Exhausted);
                return;
            }
            Step::Wait { attempt } => attempt,
        };

        let delay = inner.options.delay_for_attempt(attempt);
        info!(
            "Reconnect attempt {}/{} to {} in {:?}",
            attempt, max_attempts, address, delay
        );
        inner.events.send(DeviceEvent::ReconnectAttempting {
            address: address.to_string(),
            attempt,
            delay,
        });

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        let probe = tokio::select! {
            _ = cancel.cancelled() => return,
            result = inner.transport.fetch_status(&address) => result,
        };

        match probe {
            Ok(_) => {
                let mut episodes = inner.episodes.write().await;
                if !episodes.get(&address).is_some_and(|e| e.id == id) {
                    return;
                }
                episodes.remove(&address);
                drop(episodes);

                info!("Reconnected to {} after {} attempt(s)", address, attempt);
                inner.events.send(DeviceEvent::ReconnectSucceeded {
                    address: address.to_string(),
                    attempts: attempt,
                });
                outcome.send_replace(EpisodeOutcome::Recovered { attempts: attempt });
                return;
            }
            Err(e) => {
                warn!("Reconnect attempt {} to {} failed: {}", attempt, address, e);
            }
        }
    }
}
