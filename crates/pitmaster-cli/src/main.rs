use std::io;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use pitmaster_cli::cli::{Cli, Commands};
use pitmaster_cli::commands::{
    HistoryArgs, WatchArgs, cmd_bind, cmd_detect, cmd_devices, cmd_history, cmd_pair,
    cmd_provision, cmd_prune, cmd_scan, cmd_sessions, cmd_set_fan, cmd_set_target, cmd_watch,
};
use pitmaster_cli::config::Config;
use pitmaster_cli::format::FormatOptions;
use pitmaster_cli::util::{open_store, orchestrator};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle completions command early (before tracing init)
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "pitmaster", &mut io::stdout());
        return Ok(());
    }

    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => Config::load(path),
        None => Config::load_default(),
    }
    .context("Failed to load configuration")?;
    config.validate()?;

    let opts = FormatOptions::new(cli.no_color);
    let output = cli.output.as_ref();
    let quiet = cli.quiet;

    match cli.command {
        Commands::Sessions { device, output: out } => {
            let store = open_store(&config)?;
            let device = device.map(|d| config.resolve_device(&d));
            return cmd_sessions(&store, device.as_deref(), out.format, output, &opts);
        }
        Commands::History {
            session,
            output: out,
            channel,
            since,
            until,
            limit,
        } => {
            let store = open_store(&config)?;
            return cmd_history(
                &store,
                HistoryArgs {
                    session_id: &session,
                    channel: channel.as_deref(),
                    since: since.as_deref(),
                    until: until.as_deref(),
                    limit,
                    format: out.format,
                    output,
                    opts: &opts,
                },
            );
        }
        Commands::Prune { older_than_days } => {
            let store = open_store(&config)?;
            return cmd_prune(&store, older_than_days, quiet);
        }
        _ => {}
    }

    let mut settings = config.orchestrator_config();
    if let Commands::Watch {
        interval: Some(secs),
        ..
    } = &cli.command
    {
        settings = settings.poll_interval(Duration::from_secs(*secs));
    }
    let orchestrator = orchestrator(&config, settings)?;

    let result = match cli.command {
        Commands::Scan {
            timeout,
            output: out,
        } => {
            let timeout = timeout
                .map(Duration::from_secs)
                .unwrap_or(orchestrator.config().pairing.scan_timeout);
            cmd_scan(&orchestrator, timeout, out.format, output, quiet, &opts).await
        }
        Commands::Pair { device } => {
            cmd_pair(&orchestrator, &config.resolve_device(&device), quiet).await
        }
        Commands::Provision {
            device,
            ssid,
            password,
        } => {
            let device = config.resolve_device(&device);
            cmd_provision(&orchestrator, &device, &ssid, &password, quiet).await
        }
        Commands::Bind { device, address } => {
            cmd_bind(&orchestrator, &config.resolve_device(&device), &address, quiet).await
        }
        Commands::Detect { device } => {
            cmd_detect(&orchestrator, &config.resolve_device(&device)).await
        }
        Commands::Watch {
            device,
            output: out,
            count,
            record,
            note,
            ..
        } => {
            let device = config.resolve_device(&device);
            cmd_watch(
                &orchestrator,
                WatchArgs {
                    device_id: &device,
                    count,
                    record,
                    note: note.as_deref(),
                    format: out.format,
                    output,
                    quiet,
                    opts: &opts,
                },
            )
            .await
        }
        Commands::SetFan { device, percent } => {
            cmd_set_fan(&orchestrator, &config.resolve_device(&device), percent, quiet).await
        }
        Commands::SetTarget { device, fahrenheit } => {
            let device = config.resolve_device(&device);
            cmd_set_target(&orchestrator, &device, fahrenheit, quiet).await
        }
        Commands::Devices { output: out } => {
            cmd_devices(&orchestrator, &config, out.format, output, &opts).await
        }
        Commands::Sessions { .. }
        | Commands::History { .. }
        | Commands::Prune { .. }
        | Commands::Completions { .. } => Ok(()),
    };

    orchestrator.shutdown().await;
    result
}
