//! Persists live telemetry into cook sessions.
//!
//! The binder subscribes to the orchestrator's telemetry broadcast. Frames for
//! a device with a registered session are written with one `insert_batch` per
//! frame on the blocking pool; frames for other devices are ignored. Storage
//! failures are logged and dropped so the live stream never stalls.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pitmaster_store::{Session, Store};

use crate::error::{Error, Result};
use crate::orchestrator::TelemetryFrame;

/// Counters for what the binder has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BinderStats {
    /// Frames written to the store.
    pub frames_persisted: u64,
    /// Frames that failed to write, or were lost to a lagging subscription.
    pub frames_dropped: u64,
}

#[derive(Default)]
struct Counters {
    persisted: AtomicU64,
    dropped: AtomicU64,
}

/// Routes telemetry frames into the active session of their device.
pub struct SessionBinder {
    store: Arc<Store>,
    active: Arc<RwLock<HashMap<String, String>>>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SessionBinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBinder")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl SessionBinder {
    /// Start persisting frames received on `telemetry`.
    pub fn spawn(store: Arc<Store>, telemetry: broadcast::Receiver<TelemetryFrame>) -> Self {
        let active = Arc::new(RwLock::new(HashMap::new()));
        let counters = Arc::new(Counters::default());
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(persist_frames(
            Arc::clone(&store),
            Arc::clone(&active),
            Arc::clone(&counters),
            cancel.clone(),
            telemetry,
        ));

        Self {
            store,
            active,
            counters,
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Create a session for `device_id` and start recording into it.
    pub async fn begin_session(&self, device_id: &str, note: Option<&str>) -> Result<Session> {
        let store = Arc::clone(&self.store);
        let id = device_id.to_string();
        let note = note.map(str::to_string);
        let session =
            tokio::task::spawn_blocking(move || store.create_session(&id, note.as_deref()))
                .await??;

        self.active
            .write()
            .await
            .insert(device_id.to_string(), session.id.clone());
        info!("Recording {} into session {}", device_id, session.id);
        Ok(session)
    }

    /// Record `device_id` into an existing session.
    ///
    /// The session must belong to the device and must not have ended.
    pub async fn register(&self, device_id: &str, session_id: &str) -> Result<()> {
        let store = Arc::clone(&self.store);
        let sid = session_id.to_string();
        let session = tokio::task::spawn_blocking(move || store.get_session(&sid))
            .await??
            .ok_or_else(|| pitmaster_store::Error::session_not_found(session_id))?;

        if session.device_id != device_id {
            return Err(Error::SessionMismatch {
                session_id: session.id,
                owner: session.device_id,
                device_id: device_id.to_string(),
            });
        }
        if !session.is_active() {
            return Err(pitmaster_store::Error::SessionAlreadyEnded(session.id).into());
        }

        self.active
            .write()
            .await
            .insert(device_id.to_string(), session.id);
        Ok(())
    }

    /// Stop recording `device_id` and close its session.
    ///
    /// Returns the ended session, or `None` when nothing was recording.
    pub async fn end_session(&self, device_id: &str) -> Result<Option<Session>> {
        let Some(session_id) = self.active.write().await.remove(device_id) else {
            return Ok(None);
        };

        let store = Arc::clone(&self.store);
        let session = tokio::task::spawn_blocking(move || store.end_session(&session_id)).await??;
        info!("Ended session {} for {}", session.id, device_id);
        Ok(Some(session))
    }

    /// Session currently recording `device_id`.
    pub async fn active_session(&self, device_id: &str) -> Option<String> {
        self.active.read().await.get(device_id).cloned()
    }

    pub fn stats(&self) -> BinderStats {
        BinderStats {
            frames_persisted: self.counters.persisted.load(Ordering::Relaxed),
            frames_dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Stop the persistence task and wait for it to finish.
    ///
    /// Sessions are left open; the next run can `register` them again.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.lock().await.take()
            && let Err(e) = handle.await
        {
            warn!("Session binder task failed: {}", e);
        }
    }
}

impl Drop for SessionBinder {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn persist_frames(
    store: Arc<Store>,
    active: Arc<RwLock<HashMap<String, String>>>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
    mut telemetry: broadcast::Receiver<TelemetryFrame>,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = telemetry.recv() => frame,
        };

        let frame = match frame {
            Ok(frame) => frame,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!("Session binder lagged, {} frame(s) not recorded", missed);
                counters.dropped.fetch_add(missed, Ordering::Relaxed);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let Some(session_id) = active.read().await.get(&frame.device_id).cloned() else {
            continue;
        };
        if frame.samples.is_empty() {
            continue;
        }

        let writer = Arc::clone(&store);
        let device_id = frame.device_id.clone();
        let sid = session_id.clone();
        let written =
            tokio::task::spawn_blocking(move || writer.insert_batch(&frame.samples, &sid)).await;

        match written {
            Ok(Ok(ids)) => {
                counters.persisted.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Stored {} sample(s) from {} in session {}",
                    ids.len(),
                    device_id,
                    session_id
                );
            }
            Ok(Err(e)) => {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Failed to store telemetry from {}: {}", device_id, e);
            }
            Err(e) => {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Telemetry write task for {} failed: {}", device_id, e);
            }
        }
    }
    debug!("Session binder stopped");
}
