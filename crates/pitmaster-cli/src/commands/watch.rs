//! Watch command implementation.
//!
//! Polling and reconnection are handled by the orchestrator; this command only
//! renders what the state stream delivers. With `--record` every reading is
//! also written into a new cook session.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::StreamExt;
use owo_colors::OwoColorize;
use pitmaster_core::{DeviceState, Orchestrator, SessionBinder};

use crate::cli::OutputFormat;
use crate::format::{FormatOptions, format_state_line};
use crate::util::append_output;

/// Arguments for the watch command.
pub struct WatchArgs<'a> {
    pub device_id: &'a str,
    pub count: u32,
    pub record: bool,
    pub note: Option<&'a str>,
    pub format: OutputFormat,
    pub output: Option<&'a PathBuf>,
    pub quiet: bool,
    pub opts: &'a FormatOptions,
}

pub async fn cmd_watch(orchestrator: &Orchestrator, args: WatchArgs<'_>) -> Result<()> {
    let WatchArgs {
        device_id,
        count,
        record,
        note,
        format,
        output,
        quiet,
        opts,
    } = args;

    // the first reading is broadcast as soon as the watch starts
    let recording = if record {
        let binder = SessionBinder::spawn(
            Arc::clone(orchestrator.store()),
            orchestrator.subscribe_telemetry(),
        );
        match binder.begin_session(device_id, note).await {
            Ok(session) => Some((binder, session)),
            Err(e) => {
                binder.shutdown().await;
                return Err(e).context("Failed to start a session");
            }
        }
    } else {
        None
    };

    let mut states = match orchestrator.watch(device_id).await {
        Ok(states) => states,
        Err(e) => {
            if let Some((binder, session)) = recording {
                discard_session(orchestrator, &binder, device_id, &session.id).await;
                binder.shutdown().await;
            }
            return Err(e).with_context(|| format!("Failed to watch {}", device_id));
        }
    };

    if let Some((_, session)) = &recording
        && !quiet
    {
        eprintln!("Recording into session {}", session.id);
    }

    if !quiet {
        let target = if opts.no_color {
            device_id.to_string()
        } else {
            format!("{}", device_id.cyan())
        };
        eprintln!(
            "Watching: {} | every {}s | Press Ctrl+C to stop",
            target,
            orchestrator.config().poll.interval.as_secs()
        );
        eprintln!("{}", "-".repeat(50));
    }

    let mut readings_taken: u32 = 0;
    let mut previous: Option<DeviceState> = None;
    let result = loop {
        if count > 0 && readings_taken >= count {
            if !quiet {
                eprintln!("Completed {} readings.", readings_taken);
            }
            break Ok(());
        }

        let item = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\nShutting down...");
                break Ok(());
            }
            item = states.next() => item,
        };

        match item {
            Some(Ok(state)) => {
                readings_taken += 1;
                let written = match format {
                    OutputFormat::Json => serde_json::to_string(&state)
                        .map_err(anyhow::Error::from)
                        .and_then(|line| append_output(output, &(line + "\n"))),
                    OutputFormat::Text => append_output(
                        output,
                        &format_state_line(&state, previous.as_ref(), opts),
                    ),
                };
                if let Err(e) = written {
                    break Err(e);
                }
                previous = Some(state);
            }
            Some(Err(e)) if e.is_connectivity() => {
                eprintln!("Controller unreachable: {}. Reconnecting...", e);
            }
            Some(Err(e)) => {
                eprintln!("Unexpected reply from controller: {}. Retrying...", e);
            }
            None => break Ok(()),
        }
    };

    states.close();
    orchestrator.disconnect(device_id).await;

    if let Some((binder, _)) = recording {
        match binder.end_session(device_id).await {
            Ok(Some(session)) if !quiet => {
                let samples = orchestrator
                    .store()
                    .count_by_session(&session.id)
                    .unwrap_or_default();
                eprintln!("Session {} ended with {} sample(s)", session.id, samples);
            }
            Ok(_) => {}
            Err(e) => eprintln!("Failed to end session: {}", e),
        }
        binder.shutdown().await;
    }

    result
}

/// Close and delete a session that never recorded anything.
async fn discard_session(
    orchestrator: &Orchestrator,
    binder: &SessionBinder,
    device_id: &str,
    session_id: &str,
) {
    if let Err(e) = binder.end_session(device_id).await {
        eprintln!("Failed to end session: {}", e);
    }
    if let Err(e) = orchestrator.store().delete_session(session_id) {
        eprintln!("Failed to remove empty session {}: {}", session_id, e);
    }
}
