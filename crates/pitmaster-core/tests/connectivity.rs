//! End-to-end connectivity tests over the in-memory transport and link.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use pitmaster_core::events::EventReceiver;
use pitmaster_core::{
    ConnectionState, DeviceAddress, DeviceEvent, DeviceKind, DiscoveredGrill, EpisodeOutcome,
    Error, EventDispatcher, MockLink, MockTransport, Orchestrator, OrchestratorConfig,
    PairingState, ReconnectEngine, ReconnectOptions, SessionBinder,
};
use pitmaster_store::Store;

const GRILL: &str = "AA:BB:CC:00:00:01";

fn address() -> DeviceAddress {
    DeviceAddress::parse("192.168.1.40").unwrap()
}

fn drain(events: &mut EventReceiver) -> Vec<DeviceEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

fn setup(config: OrchestratorConfig) -> (Orchestrator, Arc<MockTransport>, Arc<MockLink>) {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let transport = Arc::new(MockTransport::new());
    let link = Arc::new(MockLink::new(vec![
        DiscoveredGrill::new(GRILL)
            .with_name("Pitmaster 01")
            .with_rssi(-58),
    ]));
    let orchestrator =
        Orchestrator::new(store, transport.clone(), link.clone(), config).unwrap();
    (orchestrator, transport, link)
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_backoff_then_give_up() {
    let transport = Arc::new(MockTransport::new());
    transport.set_should_fail(true);
    let events = EventDispatcher::default();
    let mut rx = events.subscribe();
    let engine =
        ReconnectEngine::new(transport.clone(), events, ReconnectOptions::default()).unwrap();

    let started = tokio::time::Instant::now();
    let outcome = engine.attempt_reconnect(&address()).await.outcome().await;

    assert_eq!(outcome, EpisodeOutcome::Exhausted);
    assert_eq!(started.elapsed(), Duration::from_secs(7));
    assert_eq!(transport.fetch_count(), 3);
    assert_eq!(engine.attempt_count(&address()).await, 0);
    assert!(!engine.is_reconnecting(&address()).await);

    let addr = address().to_string();
    assert_eq!(
        drain(&mut rx),
        vec![
            DeviceEvent::ReconnectAttempting {
                address: addr.clone(),
                attempt: 1,
                delay: Duration::from_secs(1),
            },
            DeviceEvent::ReconnectAttempting {
                address: addr.clone(),
                attempt: 2,
                delay: Duration::from_secs(2),
            },
            DeviceEvent::ReconnectAttempting {
                address: addr.clone(),
                attempt: 3,
                delay: Duration::from_secs(4),
            },
            DeviceEvent::ReconnectFailed {
                address: addr,
                attempts: 3,
            },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_counter_resets_after_success() {
    let transport = Arc::new(MockTransport::new());
    transport.set_transient_failures(1);
    let engine = ReconnectEngine::new(
        transport.clone(),
        EventDispatcher::default(),
        ReconnectOptions::default(),
    )
    .unwrap();

    let first = engine.attempt_reconnect(&address()).await.outcome().await;
    assert_eq!(first, EpisodeOutcome::Recovered { attempts: 2 });
    assert_eq!(engine.attempt_count(&address()).await, 0);

    let second = engine.attempt_reconnect(&address()).await.outcome().await;
    assert_eq!(second, EpisodeOutcome::Recovered { attempts: 1 });
}

#[tokio::test(start_paused = true)]
async fn test_pair_provision_bind_watch_disconnect() {
    let (orchestrator, transport, link) = setup(OrchestratorConfig::default());
    let mut events = orchestrator.events().subscribe();

    let device = orchestrator.pair(GRILL).await.unwrap();
    assert_eq!(device.display_name.as_deref(), Some("Pitmaster 01"));
    assert_eq!(device.pairing_state, PairingState::ShortRange);
    assert!(link.is_linked(GRILL).await);

    orchestrator
        .provision_wifi(GRILL, "home", "hunter22")
        .await
        .unwrap();
    let writes = link.writes().await;
    assert_eq!(writes.len(), 1);
    let payload: serde_json::Value = serde_json::from_slice(&writes[0].1).unwrap();
    assert_eq!(payload["ssid"], "home");

    let device = orchestrator.bind_address(GRILL, "192.168.1.40").await.unwrap();
    assert_eq!(device.pairing_state, PairingState::Networked);
    assert_eq!(device.kind, DeviceKind::KnownProtocol);
    assert_eq!(device.last_known_address.as_deref(), Some("http://192.168.1.40"));
    assert_eq!(device.display_name.as_deref(), Some("Pitmaster 01"));
    assert!(!link.is_linked(GRILL).await);

    let kinds: Vec<_> = drain(&mut events)
        .iter()
        .map(|e| e.kind())
        .filter(|k| *k != "discovered")
        .collect();
    assert_eq!(kinds, vec!["paired", "provisioned", "networked"]);

    let mut states = orchestrator.watch(GRILL).await.unwrap();
    let state = states.next().await.unwrap().unwrap();
    assert_eq!(state.device_id, GRILL);
    assert_eq!(state.grill_temp(), Some(225.0));
    assert_eq!(state.connection_state, ConnectionState::Online);

    // next poll fails, the first reconnect probe succeeds
    transport.set_transient_failures(1);
    assert!(states.next().await.unwrap().is_err());
    let state = states.next().await.unwrap().unwrap();
    assert_eq!(state.connection_state, ConnectionState::Reconnected);
    let state = states.next().await.unwrap().unwrap();
    assert_eq!(state.connection_state, ConnectionState::Online);

    orchestrator.set_fan_speed(GRILL, 60).await.unwrap();
    let commands = transport.commands().await;
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].1.fan_speed, Some(60));

    drain(&mut events);
    orchestrator.disconnect(GRILL).await;
    // anything already buffered is delivered, then the stream ends
    while states.next().await.is_some() {}
    assert!(matches!(
        drain(&mut events).as_slice(),
        [DeviceEvent::Disconnected { .. }]
    ));

    // second teardown has nothing left to do
    orchestrator.disconnect(GRILL).await;
    assert!(drain(&mut events).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_bind_address_probe_failure() {
    let (orchestrator, transport, link) = setup(OrchestratorConfig::default());
    orchestrator.pair(GRILL).await.unwrap();
    transport.set_should_fail(true);

    let err = orchestrator
        .bind_address(GRILL, "192.168.1.40")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transport(_)));

    let device = orchestrator.device(GRILL).await.unwrap().unwrap();
    assert_eq!(device.pairing_state, PairingState::ShortRange);
    assert_eq!(device.kind, DeviceKind::Unrecognized);
    assert!(link.is_linked(GRILL).await);

    transport.set_should_fail(false);
    let kind = orchestrator.detect_device_kind(GRILL).await.unwrap();
    assert_eq!(kind, DeviceKind::KnownProtocol);
}

#[tokio::test(start_paused = true)]
async fn test_bind_failure_of_unpaired_device() {
    let (orchestrator, transport, _) = setup(OrchestratorConfig::default());
    orchestrator.store().upsert_device(GRILL, None).unwrap();
    transport.set_should_fail(true);

    assert!(orchestrator.bind_address(GRILL, "192.168.1.40").await.is_err());

    let device = orchestrator.device(GRILL).await.unwrap().unwrap();
    assert_eq!(device.pairing_state, PairingState::ShortRange);
    assert_eq!(device.kind, DeviceKind::Unrecognized);
}

#[tokio::test(start_paused = true)]
async fn test_failed_rebind_drops_to_short_range() {
    let (orchestrator, transport, _) = setup(OrchestratorConfig::default());
    orchestrator.bind_address(GRILL, "192.168.1.40").await.unwrap();
    transport.set_should_fail(true);

    assert!(orchestrator.bind_address(GRILL, "192.168.1.99").await.is_err());

    let device = orchestrator.device(GRILL).await.unwrap().unwrap();
    assert_eq!(device.pairing_state, PairingState::ShortRange);
    assert_eq!(device.kind, DeviceKind::Unrecognized);
    assert_eq!(device.last_known_address.as_deref(), Some("http://192.168.1.99"));
}

#[tokio::test(start_paused = true)]
async fn test_dropping_watch_cancels_reconnection() {
    let (orchestrator, transport, _) = setup(OrchestratorConfig::default());
    orchestrator.bind_address(GRILL, "192.168.1.40").await.unwrap();
    let mut events = orchestrator.events().subscribe();

    let mut states = orchestrator.watch(GRILL).await.unwrap();
    states.next().await.unwrap().unwrap();

    transport.set_should_fail(true);
    assert!(states.next().await.unwrap().is_err());
    let fetches = transport.fetch_count();
    drop(states);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(transport.fetch_count(), fetches);
    assert!(!orchestrator.reconnect_engine().is_reconnecting(&address()).await);
    assert!(
        drain(&mut events)
            .iter()
            .all(|e| !matches!(e, DeviceEvent::ReconnectFailed { .. }))
    );
}

#[tokio::test(start_paused = true)]
async fn test_bind_rejects_bad_address() {
    let (orchestrator, transport, _) = setup(OrchestratorConfig::default());
    let err = orchestrator
        .bind_address(GRILL, "ftp://grill")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transport(_)));
    assert_eq!(transport.fetch_count(), 0);
}

#[tokio::test]
async fn test_watch_requires_address() {
    let (orchestrator, _, _) = setup(OrchestratorConfig::default());
    let err = orchestrator.watch(GRILL).await.unwrap_err();
    assert!(matches!(err, Error::DeviceNotFound(_)));

    orchestrator.store().upsert_device(GRILL, None).unwrap();
    let err = orchestrator.watch(GRILL).await.unwrap_err();
    assert!(matches!(err, Error::NoAddress(_)));
}

#[tokio::test]
async fn test_watch_records_into_session() {
    let config = OrchestratorConfig::default().poll_interval(Duration::from_millis(20));
    let (orchestrator, _, _) = setup(config);
    orchestrator
        .bind_address(GRILL, "192.168.1.40")
        .await
        .unwrap();

    let binder = SessionBinder::spawn(
        Arc::clone(orchestrator.store()),
        orchestrator.subscribe_telemetry(),
    );
    let session = binder.begin_session(GRILL, Some("ribs")).await.unwrap();

    let mut states = orchestrator.watch(GRILL).await.unwrap();
    for _ in 0..3 {
        states.next().await.unwrap().unwrap();
    }

    for _ in 0..200 {
        if binder.stats().frames_persisted >= 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    orchestrator.disconnect(GRILL).await;
    let ended = binder.end_session(GRILL).await.unwrap().unwrap();
    assert!(!ended.is_active());

    let store = orchestrator.store();
    let samples = store.by_session(&session.id).unwrap();
    // grill and food1 are active in the sample status
    assert!(samples.len() >= 6);
    assert_eq!(samples.len() % 2, 0);
    let primary = format!("{GRILL}_primary");
    let aux1 = format!("{GRILL}_aux1");
    assert!(
        samples
            .iter()
            .all(|s| s.probe_id == primary || s.probe_id == aux1)
    );
    binder.shutdown().await;
}
