//! Session and history commands. These read the database directly.

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use pitmaster_store::{Store, TelemetryQuery};
use pitmaster_types::ProbeChannel;
use time::OffsetDateTime;

use crate::cli::OutputFormat;
use crate::format::{FormatOptions, format_samples_text, format_sessions_text};
use crate::util::{parse_datetime, write_output};

pub fn cmd_sessions(
    store: &Store,
    device_id: Option<&str>,
    format: OutputFormat,
    output: Option<&PathBuf>,
    opts: &FormatOptions,
) -> Result<()> {
    let sessions = store
        .list_sessions(device_id)
        .context("Failed to list sessions")?;
    let content = match format {
        OutputFormat::Json => opts.as_json(&sessions)?,
        OutputFormat::Text => format_sessions_text(&sessions),
    };
    write_output(output, &content)
}

/// Arguments for the history command.
pub struct HistoryArgs<'a> {
    pub session_id: &'a str,
    pub channel: Option<&'a str>,
    pub since: Option<&'a str>,
    pub until: Option<&'a str>,
    pub limit: Option<u32>,
    pub format: OutputFormat,
    pub output: Option<&'a PathBuf>,
    pub opts: &'a FormatOptions,
}

pub fn cmd_history(store: &Store, args: HistoryArgs<'_>) -> Result<()> {
    let HistoryArgs {
        session_id,
        channel,
        since,
        until,
        limit,
        format,
        output,
        opts,
    } = args;

    // parse filters upfront to fail fast
    let channel: Option<ProbeChannel> = channel
        .map(|c| c.parse().map_err(|e: String| anyhow!(e)))
        .transpose()?;
    let since = since.map(parse_datetime).transpose()?;
    let until = until.map(parse_datetime).transpose()?;

    let session = store
        .get_session(session_id)?
        .ok_or_else(|| anyhow!("Session not found: {}", session_id))?;

    let mut query = TelemetryQuery::new().session(&session.id);
    if let Some(channel) = channel {
        query = query.probe(&channel.probe_id(&session.device_id));
    }
    if let Some(since) = since {
        query = query.since(since);
    }
    if let Some(until) = until {
        query = query.until(until);
    }
    if let Some(limit) = limit {
        query = query.limit(limit);
    }

    let samples = store
        .query_telemetry(&query)
        .context("Failed to query telemetry")?;
    let content = match format {
        OutputFormat::Json => opts.as_json(&samples)?,
        OutputFormat::Text => format_samples_text(&samples),
    };
    write_output(output, &content)
}

pub fn cmd_prune(store: &Store, older_than_days: u32, quiet: bool) -> Result<()> {
    let cutoff = OffsetDateTime::now_utc() - time::Duration::days(i64::from(older_than_days));
    let deleted = store
        .delete_older_than(cutoff)
        .context("Failed to prune telemetry")?;
    if !quiet {
        println!(
            "Deleted {} sample(s) older than {} day(s)",
            deleted, older_than_days
        );
    }
    Ok(())
}
