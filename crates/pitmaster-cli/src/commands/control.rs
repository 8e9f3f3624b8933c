//! Bind, detect and control commands.

use anyhow::{Context, Result};
use pitmaster_core::{DeviceKind, Orchestrator};

pub async fn cmd_bind(
    orchestrator: &Orchestrator,
    device_id: &str,
    address: &str,
    quiet: bool,
) -> Result<()> {
    let device = orchestrator
        .bind_address(device_id, address)
        .await
        .with_context(|| format!("Failed to bind {} to {}", device_id, address))?;

    if !quiet {
        println!(
            "{} is networked at {}",
            device.label(),
            device.last_known_address.as_deref().unwrap_or(address)
        );
    }
    Ok(())
}

pub async fn cmd_detect(orchestrator: &Orchestrator, device_id: &str) -> Result<()> {
    let kind = orchestrator
        .detect_device_kind(device_id)
        .await
        .with_context(|| format!("Failed to detect {}", device_id))?;

    match kind {
        DeviceKind::KnownProtocol => println!("{}: grill controller protocol", device_id),
        DeviceKind::Unrecognized => println!("{}: unrecognized", device_id),
    }
    Ok(())
}

pub async fn cmd_set_fan(
    orchestrator: &Orchestrator,
    device_id: &str,
    percent: u8,
    quiet: bool,
) -> Result<()> {
    orchestrator
        .set_fan_speed(device_id, percent)
        .await
        .with_context(|| format!("Failed to set fan speed on {}", device_id))?;
    if !quiet {
        println!("Fan speed set to {}%", percent);
    }
    Ok(())
}

pub async fn cmd_set_target(
    orchestrator: &Orchestrator,
    device_id: &str,
    fahrenheit: f64,
    quiet: bool,
) -> Result<()> {
    orchestrator
        .set_target_temperature(device_id, fahrenheit)
        .await
        .with_context(|| format!("Failed to set target temperature on {}", device_id))?;
    if !quiet {
        println!("Target set to {:.0}°F", fahrenheit);
    }
    Ok(())
}
