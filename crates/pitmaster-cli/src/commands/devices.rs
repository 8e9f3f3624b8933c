//! Devices command implementation.

use std::path::PathBuf;

use anyhow::Result;
use pitmaster_core::Orchestrator;

use crate::cli::OutputFormat;
use crate::config::Config;
use crate::format::{FormatOptions, format_devices_text};
use crate::util::write_output;

pub async fn cmd_devices(
    orchestrator: &Orchestrator,
    config: &Config,
    format: OutputFormat,
    output: Option<&PathBuf>,
    opts: &FormatOptions,
) -> Result<()> {
    let devices = orchestrator.devices().await?;
    let content = match format {
        OutputFormat::Json => opts.as_json(&devices)?,
        OutputFormat::Text => format_devices_text(&devices, config),
    };
    write_output(output, &content)
}
