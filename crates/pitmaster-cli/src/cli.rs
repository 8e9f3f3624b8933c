//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Reusable output format arguments
#[derive(Debug, Clone, Args)]
pub struct OutputArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Parser)]
#[command(name = "pitmaster")]
#[command(author, version, about = "CLI for WiFi grill controllers", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Use this configuration file instead of the default
    #[arg(long, global = true, env = "PITMASTER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Write output to file instead of stdout
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan for nearby controllers over Bluetooth
    Scan {
        /// Scan timeout in seconds (defaults to the configured value)
        #[arg(short, long)]
        timeout: Option<u64>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Open a Bluetooth link to a controller and remember it
    Pair {
        /// Device id from `scan`, or a configured alias
        device: String,
    },

    /// Pair with a controller and send it WiFi credentials
    Provision {
        /// Device id from `scan`, or a configured alias
        device: String,

        /// Network name
        #[arg(long)]
        ssid: String,

        /// Network password
        #[arg(long, env = "PITMASTER_WIFI_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Bind a controller to its network address and probe it
    Bind {
        /// Device id or alias
        device: String,

        /// IP address or host, optionally with scheme and port
        address: String,
    },

    /// Check whether a controller speaks the grill protocol
    Detect {
        /// Device id or alias
        device: String,
    },

    /// Continuously monitor a controller
    Watch {
        /// Device id or alias
        device: String,

        #[command(flatten)]
        output: OutputArgs,

        /// Polling interval in seconds (defaults to the configured value)
        #[arg(short, long)]
        interval: Option<u64>,

        /// Number of readings to take before exiting (0 for unlimited)
        #[arg(short = 'n', long, default_value = "0")]
        count: u32,

        /// Record readings into a new cook session
        #[arg(short, long)]
        record: bool,

        /// Note attached to the recorded session
        #[arg(long, requires = "record")]
        note: Option<String>,
    },

    /// Set the fan duty cycle
    SetFan {
        /// Device id or alias
        device: String,

        /// Fan speed in percent (0-100)
        #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
        percent: u8,
    },

    /// Set the pit target temperature
    SetTarget {
        /// Device id or alias
        device: String,

        /// Target temperature in °F (32-1000)
        #[arg(value_parser = parse_target)]
        fahrenheit: f64,
    },

    /// List recorded cook sessions
    Sessions {
        /// Only sessions for this device id or alias
        #[arg(short, long)]
        device: Option<String>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Show telemetry recorded in a session
    History {
        /// Session id
        session: String,

        #[command(flatten)]
        output: OutputArgs,

        /// Only this probe channel (primary, aux1, aux2, aux3)
        #[arg(long)]
        channel: Option<String>,

        /// Filter records since this date/time (RFC3339 or YYYY-MM-DD)
        #[arg(long)]
        since: Option<String>,

        /// Filter records until this date/time (RFC3339 or YYYY-MM-DD)
        #[arg(long)]
        until: Option<String>,

        /// Maximum number of records
        #[arg(short, long)]
        limit: Option<u32>,
    },

    /// Delete telemetry older than a number of days
    Prune {
        /// Age in days
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        older_than_days: u32,
    },

    /// List known controllers
    Devices {
        #[command(flatten)]
        output: OutputArgs,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Parse a target temperature with range validation
fn parse_target(s: &str) -> Result<f64, String> {
    let value: f64 = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid number", s))?;
    if !(32.0..=1000.0).contains(&value) {
        return Err(format!(
            "Target {} is out of range. Valid values: 32-1000 °F",
            value
        ));
    }
    Ok(value)
}
