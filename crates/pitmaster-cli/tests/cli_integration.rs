//! CLI integration tests.
//!
//! Store-backed commands run against a temporary config and database.
//! Tests that need a controller on the network are marked with #[ignore].
//!
//! Run hardware tests:
//! ```
//! PITMASTER_DEVICE="AA:BB:CC:DD:EE:FF" cargo test --package pitmaster-cli --test cli_integration -- --ignored --nocapture
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

fn run_pitmaster(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_pitmaster"))
        .args(args)
        .env_remove("PITMASTER_CONFIG")
        .env("NO_COLOR", "1")
        .output()
        .expect("Failed to run pitmaster binary")
}

/// Write a config whose database lives inside `dir`.
fn write_config(dir: &Path, extra: &str) -> PathBuf {
    let db = dir.join("data.db");
    let path = dir.join("config.toml");
    let content = format!("[storage]\npath = '{}'\n{}", db.display(), extra);
    std::fs::write(&path, content).expect("write config");
    path
}

fn run_with_config(config: &Path, args: &[&str]) -> Output {
    let config = config.to_str().expect("utf-8 path");
    let mut full = vec!["--config", config];
    full.extend_from_slice(args);
    run_pitmaster(&full)
}

fn get_device() -> Option<String> {
    env::var("PITMASTER_DEVICE").ok().filter(|s| !s.is_empty())
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_command() {
    let output = run_pitmaster(&["--help"]);
    assert!(output.status.success(), "Help should succeed");

    let stdout = String::from_utf8_lossy(&output.stdout);
    for cmd in ["scan", "pair", "provision", "bind", "watch", "history"] {
        assert!(stdout.contains(cmd), "Help should list {}", cmd);
    }
}

#[test]
fn test_version_command() {
    let output = run_pitmaster(&["--version"]);
    assert!(output.status.success(), "Version should succeed");
    assert!(String::from_utf8_lossy(&output.stdout).contains("pitmaster"));
}

#[test]
fn test_subcommand_help() {
    let subcommands = [
        "scan", "pair", "provision", "bind", "detect", "watch", "set-fan", "set-target",
        "sessions", "history", "prune", "devices",
    ];

    for cmd in subcommands {
        let output = run_pitmaster(&[cmd, "--help"]);
        assert!(output.status.success(), "{} --help should succeed", cmd);
        assert!(
            !output.stdout.is_empty(),
            "{} --help should produce output",
            cmd
        );
    }
}

#[test]
fn test_completions() {
    let output = run_pitmaster(&["completions", "bash"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("pitmaster"));
}

// =============================================================================
// Store-backed Commands
// =============================================================================

#[test]
fn test_devices_json_empty() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "");

    let output = run_with_config(&config, &["devices", "--format", "json"]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "[]");
    assert!(dir.path().join("data.db").exists());
}

#[test]
fn test_sessions_text_empty() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "");

    let output = run_with_config(&config, &["sessions"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("No sessions recorded"));
}

#[test]
fn test_sessions_output_file() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "");
    let out = dir.path().join("sessions.json");

    let output = run_with_config(
        &config,
        &[
            "sessions",
            "--format",
            "json",
            "--output",
            out.to_str().unwrap(),
        ],
    );
    assert!(output.status.success());
    assert_eq!(std::fs::read_to_string(&out).unwrap().trim(), "[]");
}

#[test]
fn test_prune_empty_store() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "");

    let output = run_with_config(&config, &["prune", "--older-than-days", "30"]);
    assert!(output.status.success());
}

#[test]
fn test_watch_unknown_device() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "");

    let output = run_with_config(&config, &["watch", "nosuch", "-n", "1"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Device not found"));
}

// =============================================================================
// Error Handling Tests
// =============================================================================

#[test]
fn test_invalid_config_rejected() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "[polling]\ninterval_secs = 0\n");

    let output = run_with_config(&config, &["devices"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("polling.interval_secs"));
}

#[test]
fn test_invalid_subcommand() {
    let output = run_pitmaster(&["notacommand"]);
    assert!(!output.status.success(), "Invalid subcommand should fail");
}

#[test]
fn test_fan_speed_out_of_range() {
    let output = run_pitmaster(&["set-fan", "grill", "101"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("101"));
}

#[test]
fn test_target_out_of_range() {
    let output = run_pitmaster(&["set-target", "grill", "5000"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("out of range"));
}

// =============================================================================
// Hardware Tests
// =============================================================================

#[test]
#[ignore = "requires a bound controller on the network"]
fn test_watch_json_single_reading() {
    let Some(device) = get_device() else {
        eprintln!("PITMASTER_DEVICE not set, skipping");
        return;
    };

    let output = run_pitmaster(&["watch", &device, "--format", "json", "-n", "1"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout.lines().next().expect("one reading");
    let json: serde_json::Value = serde_json::from_str(line).expect("valid JSON");
    assert!(json.get("fan_speed").is_some());
    assert!(json.get("probes").is_some());
}
