//! Bluetooth Low Energy implementation of [`ShortRangeLink`].
//!
//! Discovery listens to adapter events and keeps any peripheral that
//! advertises the provisioning service or a known name prefix. Peripherals
//! are remembered by identifier so `connect` can find them after the scan.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use pitmaster_types::uuids::{ADVERTISED_NAME_PREFIXES, PROVISIONING_SERVICE, WIFI_CREDENTIALS};

use crate::error::{PairingError, PairingResult};
use crate::traits::{DiscoveredGrill, ShortRangeLink};

type PeripheralMap = Arc<RwLock<HashMap<String, Peripheral>>>;

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> PairingResult<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters
        .into_iter()
        .next()
        .ok_or_else(|| PairingError::Bluetooth("no Bluetooth adapter available".to_string()))
}

/// Whether an advertisement looks like a grill controller.
pub fn is_grill_controller(local_name: Option<&str>, services: &[Uuid]) -> bool {
    if services.contains(&PROVISIONING_SERVICE) {
        return true;
    }
    local_name.is_some_and(|name| {
        ADVERTISED_NAME_PREFIXES
            .iter()
            .any(|prefix| name.starts_with(prefix))
    })
}

/// Format a peripheral ID as a string.
fn format_peripheral_id(id: &PeripheralId) -> String {
    format!("{:?}", id)
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

/// Stable device id: the Bluetooth address, or the peripheral UUID on
/// platforms that hide addresses (all-zero address).
fn device_identifier(address: &str, id: &PeripheralId) -> String {
    if is_hidden_address(address) {
        format_peripheral_id(id)
    } else {
        address.to_string()
    }
}

fn is_hidden_address(address: &str) -> bool {
    address == "00:00:00:00:00:00"
}

/// [`ShortRangeLink`] backed by the platform Bluetooth stack.
#[derive(Default)]
pub struct BleLink {
    adapter: OnceCell<Adapter>,
    peripherals: PeripheralMap,
}

impl std::fmt::Debug for BleLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleLink")
            .field("adapter_ready", &self.adapter.initialized())
            .finish_non_exhaustive()
    }
}

impl BleLink {
    pub fn new() -> Self {
        Self::default()
    }

    async fn adapter(&self) -> PairingResult<&Adapter> {
        self.adapter.get_or_try_init(get_adapter).await
    }

    async fn peripheral(&self, device_id: &str) -> PairingResult<Peripheral> {
        self.peripherals
            .read()
            .await
            .get(device_id)
            .cloned()
            .ok_or_else(|| PairingError::not_found(device_id))
    }
}

async fn describe(
    adapter: &Adapter,
    id: PeripheralId,
    peripherals: &PeripheralMap,
) -> Option<DiscoveredGrill> {
    let peripheral = adapter.peripheral(&id).await.ok()?;
    let properties = peripheral.properties().await.ok().flatten()?;
    if !is_grill_controller(properties.local_name.as_deref(), &properties.services) {
        return None;
    }

    let device_id = device_identifier(&properties.address.to_string(), &id);
    peripherals
        .write()
        .await
        .insert(device_id.clone(), peripheral);

    Some(DiscoveredGrill {
        device_id,
        name: properties.local_name,
        rssi: properties.rssi,
    })
}

#[async_trait]
impl ShortRangeLink for BleLink {
    async fn start_scan(&self) -> PairingResult<BoxStream<'static, DiscoveredGrill>> {
        let adapter = self.adapter().await?.clone();
        let events = adapter.events().await?;
        adapter.start_scan(ScanFilter::default()).await?;
        info!("BLE scan started");

        // peripherals the stack already knows do not always re-announce
        let cached: Vec<PeripheralId> = adapter
            .peripherals()
            .await?
            .iter()
            .map(|p| p.id())
            .collect();

        let discovered = events.filter_map(|event| async move {
            match event {
                CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => Some(id),
                _ => None,
            }
        });

        let peripherals = Arc::clone(&self.peripherals);
        let adverts = stream::iter(cached)
            .chain(discovered)
            .filter_map(move |id| {
                let adapter = adapter.clone();
                let peripherals = Arc::clone(&peripherals);
                async move { describe(&adapter, id, &peripherals).await }
            });

        Ok(adverts.boxed())
    }

    async fn stop_scan(&self) -> PairingResult<()> {
        if let Some(adapter) = self.adapter.get() {
            adapter.stop_scan().await?;
            debug!("BLE scan stopped");
        }
        Ok(())
    }

    async fn connect(&self, device_id: &str) -> PairingResult<()> {
        let peripheral = self.peripheral(device_id).await?;
        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }
        peripheral.discover_services().await?;
        debug!(
            "Discovered {} characteristics on {}",
            peripheral.characteristics().len(),
            device_id
        );
        Ok(())
    }

    async fn write_credentials(&self, device_id: &str, payload: &[u8]) -> PairingResult<()> {
        let peripheral = self.peripheral(device_id).await?;
        if !peripheral.is_connected().await? {
            return Err(PairingError::NotConnected(device_id.to_string()));
        }

        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == WIFI_CREDENTIALS)
            .ok_or_else(|| {
                PairingError::WriteFailed(format!(
                    "characteristic {} not found on {}",
                    WIFI_CREDENTIALS, device_id
                ))
            })?;

        peripheral
            .write(&characteristic, payload, WriteType::WithResponse)
            .await
            .map_err(|e| PairingError::WriteFailed(e.to_string()))
    }

    async fn disconnect(&self, device_id: &str) -> PairingResult<()> {
        let Ok(peripheral) = self.peripheral(device_id).await else {
            return Ok(());
        };
        if peripheral.is_connected().await? {
            peripheral.disconnect().await?;
        }
        Ok(())
    }
}
