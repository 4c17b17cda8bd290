//! [`GattBackend`] on top of `btleplug`.
//!
//! Each request spawns a task on the current tokio runtime and reports its
//! result through the device event channel. While connected, a watcher on
//! the adapter's event stream reports a link dropped by the peer as a
//! disconnect.

use std::collections::{hash_map::Entry, HashMap};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use btleplug::api::{
    BDAddr, CentralEvent, CharPropFlags, Central, Characteristic as BtleCharacteristic,
    Manager as _, Peripheral as _, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::{Stream, StreamExt};
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::ble::backend::{GattBackend, SignalHandle};
use crate::ble::errors::{
    AdapterError, ERROR_DOES_NOT_EXIST, ERROR_FAILED, ERROR_INVALID_VALUE_LENGTH,
    ERROR_NOT_SUPPORTED, ERROR_UNKNOWN_INTERFACE,
};
use crate::ble::events::{DeviceEvent, PropertiesChanged, PropertyValue};
use crate::ble::gatt::{Characteristic, Service};
use crate::ble::uuids::{
    BATTERY_INTERFACE, BATTERY_LEVEL_UUID, BATTERY_PERCENTAGE_PROPERTY, BATTERY_SERVICE_UUID,
};
use crate::device_manager::EventSender;
use crate::error::{Error, Result};

/// Settings for the btleplug backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Adapter name prefix (e.g. `hci0`); `None` picks the first adapter.
    pub adapter: Option<String>,
    /// How long to scan for the peripheral before the connect fails.
    pub scan_timeout: Duration,
    /// Delay between peripheral list polls while scanning.
    pub poll_interval: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            adapter: None,
            scan_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Characteristics are looked up by `(service, characteristic)` UUID.
///
/// btleplug exposes no attribute handle, so repeated service instances share
/// a key; the first instance in the service tree owns it, which is the one
/// the resolver picks.
type CharacteristicKey = (Uuid, Uuid);

/// State filled in by the connect task.
#[derive(Default)]
struct Shared {
    peripheral: Option<Peripheral>,
    characteristics: HashMap<CharacteristicKey, BtleCharacteristic>,
    battery_level: Option<std::result::Result<u8, AdapterError>>,
    link_watch: Option<JoinHandle<()>>,
}

impl Shared {
    fn stop_link_watch(&mut self) {
        if let Some(watch) = self.link_watch.take() {
            debug!("Stopping link watcher");
            watch.abort();
        }
    }
}

/// Insert `value` unless `key` is already present. Returns whether it was
/// inserted.
fn insert_first<K: Eq + Hash, V>(map: &mut HashMap<K, V>, key: K, value: V) -> bool {
    match map.entry(key) {
        Entry::Occupied(_) => false,
        Entry::Vacant(slot) => {
            slot.insert(value);
            true
        }
    }
}

/// btleplug implementation of [`GattBackend`] for one device address.
pub struct BtleplugBackend {
    _manager: Manager,
    adapter: Adapter,
    address: BDAddr,
    config: BackendConfig,
    events: EventSender,
    shared: Arc<RwLock<Shared>>,
    signal_counter: AtomicU64,
}

impl BtleplugBackend {
    /// Open the configured adapter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BluetoothUnavailable`] when the system has no adapter
    /// and [`Error::AdapterNotFound`] when the named one does not exist.
    pub async fn new(address: BDAddr, config: BackendConfig, events: EventSender) -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = Self::select_adapter(&manager, config.adapter.as_deref()).await?;
        info!("Using adapter {}", adapter.adapter_info().await?);

        Ok(Self {
            _manager: manager,
            adapter,
            address,
            config,
            events,
            shared: Arc::new(RwLock::new(Shared::default())),
            signal_counter: AtomicU64::new(0),
        })
    }

    async fn select_adapter(manager: &Manager, name: Option<&str>) -> Result<Adapter> {
        let adapters = manager.adapters().await?;
        if adapters.is_empty() {
            return Err(Error::BluetoothUnavailable);
        }

        let name = match name {
            Some(name) => name,
            None => return adapters.into_iter().next().ok_or(Error::BluetoothUnavailable),
        };

        for adapter in adapters {
            let info = adapter.adapter_info().await?;
            trace!("Found adapter {}", info);
            if info.starts_with(name) {
                return Ok(adapter);
            }
        }

        Err(Error::AdapterNotFound {
            name: name.to_string(),
        })
    }

    /// Scan until the peripheral with `address` shows up or the window ends.
    async fn find_peripheral(
        adapter: &Adapter,
        address: BDAddr,
        config: &BackendConfig,
    ) -> std::result::Result<Peripheral, AdapterError> {
        debug!("Scanning for {}", address);
        adapter.start_scan(ScanFilter::default()).await?;

        let deadline = tokio::time::Instant::now() + config.scan_timeout;
        let found = loop {
            let peripherals = adapter.peripherals().await?;
            if let Some(peripheral) = peripherals.into_iter().find(|p| p.address() == address) {
                break Some(peripheral);
            }
            if tokio::time::Instant::now() >= deadline {
                break None;
            }
            tokio::time::sleep(config.poll_interval).await;
        };

        if let Err(e) = adapter.stop_scan().await {
            debug!("Failed to stop scan: {}", e);
        }

        found.ok_or_else(|| {
            AdapterError::new(
                ERROR_DOES_NOT_EXIST,
                format!(
                    "Device {} not found within {:?}",
                    address, config.scan_timeout
                ),
            )
        })
    }

    async fn find_and_connect(
        adapter: &Adapter,
        address: BDAddr,
        config: &BackendConfig,
    ) -> std::result::Result<Peripheral, AdapterError> {
        let peripheral = Self::find_peripheral(adapter, address, config).await?;
        if peripheral.is_connected().await? {
            info!("Peripheral already connected at BLE level");
        } else {
            peripheral.connect().await?;
        }
        Ok(peripheral)
    }

    /// Discover services, cache characteristics and the battery level, and
    /// convert the table into the crate's service tree.
    async fn resolve_services(
        peripheral: &Peripheral,
        shared: &RwLock<Shared>,
    ) -> std::result::Result<Vec<Service>, AdapterError> {
        peripheral.discover_services().await?;

        let mut services = Vec::new();
        let mut characteristics = HashMap::new();
        for service in peripheral.services() {
            let mut converted = Vec::with_capacity(service.characteristics.len());
            for characteristic in service.characteristics {
                debug!(
                    "Found characteristic: {} in service {}",
                    characteristic.uuid, service.uuid
                );
                converted.push(Characteristic::new(characteristic.uuid, service.uuid));
                let key = (service.uuid, characteristic.uuid);
                if !insert_first(&mut characteristics, key, characteristic) {
                    debug!(
                        "Duplicate characteristic {} in service {}, keeping the first",
                        key.1, key.0
                    );
                }
            }
            services.push(Service {
                uuid: service.uuid,
                characteristics: converted,
            });
        }

        let battery_level = match characteristics.get(&(BATTERY_SERVICE_UUID, BATTERY_LEVEL_UUID)) {
            Some(characteristic) => Self::read_battery_level(peripheral, characteristic).await,
            None => Err(AdapterError::new(
                ERROR_UNKNOWN_INTERFACE,
                "Device exposes no battery service",
            )),
        };

        let mut state = shared.write();
        state.characteristics = characteristics;
        state.battery_level = Some(battery_level);

        Ok(services)
    }

    async fn read_battery_level(
        peripheral: &Peripheral,
        characteristic: &BtleCharacteristic,
    ) -> std::result::Result<u8, AdapterError> {
        let data = peripheral.read(characteristic).await?;
        data.first().copied().ok_or_else(|| {
            AdapterError::new(ERROR_INVALID_VALUE_LENGTH, "Empty battery level value")
        })
    }

    fn peripheral(&self) -> Option<Peripheral> {
        self.shared.read().peripheral.clone()
    }

    fn send(events: &EventSender, event: DeviceEvent) {
        if events.send(event).is_err() {
            debug!("Event loop gone, dropping event");
        }
    }

    /// Report the first adapter event matching `lost` as a disconnect.
    async fn watch_link<S, T, F>(mut stream: S, lost: F, events: EventSender)
    where
        S: Stream<Item = T> + Unpin,
        F: Fn(&T) -> bool,
    {
        while let Some(event) = stream.next().await {
            if lost(&event) {
                info!("Peer dropped the connection");
                Self::send(&events, DeviceEvent::DisconnectSucceeded);
                return;
            }
        }
        debug!("Adapter event stream ended");
    }
}

impl Drop for BtleplugBackend {
    fn drop(&mut self) {
        self.shared.write().stop_link_watch();
    }
}

impl GattBackend for BtleplugBackend {
    fn connect(&self) {
        let adapter = self.adapter.clone();
        let address = self.address;
        let config = self.config.clone();
        let events = self.events.clone();
        let shared = self.shared.clone();

        tokio::spawn(async move {
            let adapter_events = match adapter.events().await {
                Ok(stream) => Some(stream),
                Err(e) => {
                    warn!("Failed to get adapter events: {}", e);
                    None
                }
            };

            let peripheral = match Self::find_and_connect(&adapter, address, &config).await {
                Ok(peripheral) => peripheral,
                Err(e) => {
                    warn!("Connection to {} failed: {}", address, e);
                    Self::send(&events, DeviceEvent::ConnectFailed(e));
                    return;
                }
            };

            {
                let mut state = shared.write();
                state.peripheral = Some(peripheral.clone());
                if let Some(stream) = adapter_events {
                    let id = peripheral.id();
                    let lost = move |event: &CentralEvent| {
                        matches!(event, CentralEvent::DeviceDisconnected(gone) if *gone == id)
                    };
                    state.stop_link_watch();
                    state.link_watch =
                        Some(tokio::spawn(Self::watch_link(stream, lost, events.clone())));
                }
            }
            Self::send(&events, DeviceEvent::ConnectSucceeded);

            let event = match Self::resolve_services(&peripheral, &shared).await {
                Ok(services) => DeviceEvent::ServicesResolved(services),
                Err(e) => DeviceEvent::ServicesResolutionFailed(e),
            };
            Self::send(&events, event);
        });
    }

    fn disconnect(&self) {
        self.shared.write().stop_link_watch();
        let peripheral = self.peripheral();
        let events = self.events.clone();

        tokio::spawn(async move {
            let event = match peripheral {
                Some(peripheral) => match peripheral.disconnect().await {
                    Ok(()) => DeviceEvent::DisconnectSucceeded,
                    Err(e) => DeviceEvent::DisconnectFailed(e.into()),
                },
                None => DeviceEvent::DisconnectSucceeded,
            };
            Self::send(&events, event);
        });
    }

    fn read_value(&self, characteristic: &Characteristic) {
        let uuid = characteristic.uuid;
        let target = {
            let state = self.shared.read();
            state.peripheral.clone().zip(
                state
                    .characteristics
                    .get(&(characteristic.service_uuid, uuid))
                    .cloned(),
            )
        };
        let events = self.events.clone();

        tokio::spawn(async move {
            let result = match target {
                Some((peripheral, characteristic)) => {
                    peripheral.read(&characteristic).await.map_err(AdapterError::from)
                }
                None => Err(AdapterError::new(
                    ERROR_FAILED,
                    format!("Characteristic {} is not available", uuid),
                )),
            };

            let event = match result {
                Ok(value) => {
                    trace!("Read {} bytes from characteristic {}", value.len(), uuid);
                    DeviceEvent::CharacteristicValueUpdated { uuid, value }
                }
                Err(error) => DeviceEvent::CharacteristicReadFailed { uuid, error },
            };
            Self::send(&events, event);
        });
    }

    fn battery_level(&self) -> std::result::Result<u8, AdapterError> {
        self.shared
            .read()
            .battery_level
            .clone()
            .unwrap_or_else(|| Err(AdapterError::new(ERROR_FAILED, "Services not resolved")))
    }

    fn subscribe_battery(&self) -> std::result::Result<SignalHandle, AdapterError> {
        let (peripheral, characteristic) = {
            let state = self.shared.read();
            (
                state.peripheral.clone(),
                state
                    .characteristics
                    .get(&(BATTERY_SERVICE_UUID, BATTERY_LEVEL_UUID))
                    .cloned(),
            )
        };

        let peripheral =
            peripheral.ok_or_else(|| AdapterError::new(ERROR_FAILED, "Device not connected"))?;
        let characteristic = characteristic.ok_or_else(|| {
            AdapterError::new(ERROR_UNKNOWN_INTERFACE, "Device exposes no battery service")
        })?;
        if !characteristic.properties.contains(CharPropFlags::NOTIFY) {
            return Err(AdapterError::new(
                ERROR_NOT_SUPPORTED,
                "Battery level does not support notifications",
            ));
        }

        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = peripheral.subscribe(&characteristic).await {
                warn!("Failed to subscribe to battery level: {}", e);
                return;
            }
            let mut notifications = match peripheral.notifications().await {
                Ok(n) => n,
                Err(e) => {
                    warn!("Failed to get notifications stream: {}", e);
                    return;
                }
            };

            while let Some(notification) = notifications.next().await {
                if notification.uuid != BATTERY_LEVEL_UUID {
                    continue;
                }
                let mut signal = PropertiesChanged::new(BATTERY_INTERFACE);
                match notification.value.first() {
                    Some(level) => {
                        signal = signal
                            .with_changed(BATTERY_PERCENTAGE_PROPERTY, PropertyValue::Byte(*level));
                    }
                    None => signal
                        .invalidated
                        .push(BATTERY_PERCENTAGE_PROPERTY.to_string()),
                }
                if events.send(DeviceEvent::PropertiesChanged(signal)).is_err() {
                    break;
                }
            }

            debug!("Battery notification listener stopped");
        });

        let id = self.signal_counter.fetch_add(1, Ordering::SeqCst);
        Ok(SignalHandle::new(id, move || {
            handle.abort();
        }))
    }
}
