//! Scan command implementation.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use pitmaster_core::Orchestrator;

use crate::cli::OutputFormat;
use crate::format::{FormatOptions, format_discovered_line};
use crate::util::{append_output, write_output};

pub async fn cmd_scan(
    orchestrator: &Orchestrator,
    timeout: Duration,
    format: OutputFormat,
    output: Option<&PathBuf>,
    quiet: bool,
    opts: &FormatOptions,
) -> Result<()> {
    if !quiet && format == OutputFormat::Text {
        eprintln!(
            "Scanning for grill controllers ({}s, Ctrl+C to stop)...",
            timeout.as_secs()
        );
    }

    let mut scan = orchestrator
        .scan(timeout)
        .await
        .context("Failed to start Bluetooth scan")?;

    let mut found = Vec::new();
    loop {
        let grill = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            grill = scan.next() => grill,
        };
        let Some(grill) = grill else { break };

        // text results stream as they arrive
        if format == OutputFormat::Text {
            append_output(output, &format_discovered_line(&grill, opts))?;
        }
        found.push(grill);
    }
    scan.close();

    match format {
        OutputFormat::Json => write_output(output, &opts.as_json(&found)?)?,
        OutputFormat::Text if found.is_empty() => {
            write_output(output, "No grill controllers found.\n")?
        }
        OutputFormat::Text => {
            if !quiet {
                eprintln!("Found {} controller(s). Pair with 'pitmaster pair <id>'.", found.len());
            }
        }
    }
    Ok(())
}
