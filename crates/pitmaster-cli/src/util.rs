//! Utility functions for CLI operations.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use pitmaster_core::{Orchestrator, OrchestratorConfig};
use pitmaster_store::Store;

use crate::config::Config;

/// Open the configured database.
pub fn open_store(config: &Config) -> Result<Arc<Store>> {
    let path = &config.storage.path;
    let store =
        Store::open(path).with_context(|| format!("Failed to open database {}", path.display()))?;
    Ok(Arc::new(store))
}

/// Orchestrator over the configured database and the host's Bluetooth and network.
pub fn orchestrator(config: &Config, overrides: OrchestratorConfig) -> Result<Orchestrator> {
    let store = open_store(config)?;
    Orchestrator::with_hardware(store, overrides).context("Failed to initialise orchestrator")
}

/// Parse a date/time string in RFC3339 or YYYY-MM-DD format.
pub fn parse_datetime(s: &str) -> Result<OffsetDateTime> {
    if let Ok(dt) = OffsetDateTime::parse(s, &Rfc3339) {
        return Ok(dt);
    }

    // YYYY-MM-DD is taken as midnight UTC
    let format = time::format_description::parse("[year]-[month]-[day]")
        .context("Invalid date format description")?;
    if let Ok(date) = time::Date::parse(s, &format) {
        return Ok(date.midnight().assume_utc());
    }

    bail!(
        "Invalid date format '{}'. Use RFC3339 (e.g., 2026-06-01T10:30:00Z) or YYYY-MM-DD",
        s
    )
}

/// Write output to file or stdout
pub fn write_output(output: Option<&PathBuf>, content: &str) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write to {}", path.display()))?;
        }
        None => {
            print!("{}", content);
            io::stdout().flush()?;
        }
    }
    Ok(())
}

/// Append output to a file, or print it, for streaming commands.
pub fn append_output(output: Option<&PathBuf>, content: &str) -> Result<()> {
    match output {
        Some(path) => {
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            file.write_all(content.as_bytes())
                .with_context(|| format!("Failed to write to {}", path.display()))?;
        }
        None => {
            print!("{}", content);
            io::stdout().flush()?;
        }
    }
    Ok(())
}
