//! Pair and provision commands.

use anyhow::{Context, Result};
use pitmaster_core::Orchestrator;

/// Pair and remember the controller.
///
/// The Bluetooth link is closed when the command exits, so WiFi credentials
/// are sent with `provision`, which pairs again in the same process.
pub async fn cmd_pair(orchestrator: &Orchestrator, device_id: &str, quiet: bool) -> Result<()> {
    let device = orchestrator
        .pair(device_id)
        .await
        .with_context(|| format!("Failed to pair with {}", device_id))?;

    if !quiet {
        println!("Paired with {} ({})", device.label(), device.id);
        println!(
            "Next: pitmaster provision {} --ssid <network> (pairs again and sends credentials)",
            device.id
        );
    }
    orchestrator.disconnect(device_id).await;
    Ok(())
}

/// Pair, then hand the controller WiFi credentials over the same link.
pub async fn cmd_provision(
    orchestrator: &Orchestrator,
    device_id: &str,
    ssid: &str,
    password: &str,
    quiet: bool,
) -> Result<()> {
    let device = orchestrator
        .pair(device_id)
        .await
        .with_context(|| format!("Failed to pair with {}", device_id))?;

    let sent = orchestrator
        .provision_wifi(device_id, ssid, password)
        .await
        .with_context(|| format!("Failed to send WiFi credentials to {}", device_id));
    orchestrator.disconnect(device_id).await;
    sent?;

    if !quiet {
        println!("Sent credentials for '{}' to {}", ssid, device.label());
        println!(
            "Once it joins the network: pitmaster bind {} <address>",
            device.id
        );
    }
    Ok(())
}
