//! Watch command against the in-memory transport and link.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pitmaster_cli::cli::OutputFormat;
use pitmaster_cli::commands::{WatchArgs, cmd_watch};
use pitmaster_cli::format::FormatOptions;
use pitmaster_core::{MockLink, MockTransport, Orchestrator, OrchestratorConfig};
use pitmaster_store::Store;
use tempfile::TempDir;

const GRILL: &str = "AA:BB:CC:00:00:01";

fn orchestrator() -> Orchestrator {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let config = OrchestratorConfig::default().poll_interval(Duration::from_millis(20));
    Orchestrator::new(
        store,
        Arc::new(MockTransport::new()),
        Arc::new(MockLink::new(Vec::new())),
        config,
    )
    .unwrap()
}

fn recording<'a>(
    count: u32,
    output: Option<&'a PathBuf>,
    opts: &'a FormatOptions,
) -> WatchArgs<'a> {
    WatchArgs {
        device_id: GRILL,
        count,
        record: true,
        note: Some("brisket"),
        format: OutputFormat::Json,
        output,
        quiet: true,
        opts,
    }
}

#[tokio::test]
async fn test_failed_watch_leaves_no_session_behind() {
    let orchestrator = orchestrator();
    orchestrator.store().upsert_device(GRILL, None).unwrap();
    let opts = FormatOptions::new(true);

    // no address bound yet
    for _ in 0..2 {
        let err = cmd_watch(&orchestrator, recording(1, None, &opts))
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("network address"));
    }

    let store = orchestrator.store();
    assert!(store.active_session(GRILL).unwrap().is_none());
    assert!(store.list_sessions(Some(GRILL)).unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_watch_of_unknown_device() {
    let orchestrator = orchestrator();
    let opts = FormatOptions::new(true);

    assert!(
        cmd_watch(&orchestrator, recording(1, None, &opts))
            .await
            .is_err()
    );
    assert!(orchestrator.store().list_sessions(None).unwrap().is_empty());
}

#[tokio::test]
async fn test_recorded_watch_ends_its_session() {
    let orchestrator = orchestrator();
    orchestrator
        .bind_address(GRILL, "192.168.1.40")
        .await
        .unwrap();
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("watch.jsonl");
    let opts = FormatOptions::new(true);

    cmd_watch(&orchestrator, recording(2, Some(&out), &opts))
        .await
        .unwrap();

    let lines = std::fs::read_to_string(&out).unwrap();
    assert_eq!(lines.lines().count(), 2);
    for line in lines.lines() {
        let state: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(state["device_id"], GRILL);
    }

    let store = orchestrator.store();
    let sessions = store.list_sessions(Some(GRILL)).unwrap();
    assert_eq!(sessions.len(), 1);
    assert!(!sessions[0].is_active());
    assert_eq!(sessions[0].note.as_deref(), Some("brisket"));
    assert!(store.active_session(GRILL).unwrap().is_none());
}
