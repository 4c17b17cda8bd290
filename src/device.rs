//! Connection lifecycle for a single peripheral.
//!
//! [`Device`] consumes [`DeviceEvent`]s one at a time and walks
//! `Idle -> Connecting -> Connected -> Disconnecting -> Disconnected`,
//! reading exactly one characteristic along the way. Every path ends in
//! `Disconnected`, and reaching it stops the shared [`EventLoop`] once.

use std::fmt;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ble::backend::GattBackend;
use crate::ble::battery::BatterySignal;
use crate::ble::errors::{classify, GattError};
use crate::ble::events::{DeviceEvent, PropertiesChanged};
use crate::ble::gatt::{resolve, Characteristic, Service};
use crate::device_manager::EventLoop;
use crate::target::TargetSelector;

/// Lifecycle state of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LifecycleState {
    /// Nothing requested yet.
    #[default]
    Idle,
    /// Connect requested.
    Connecting,
    /// Connected; `services_resolved` tells whether the service table is
    /// known (and the read is in flight).
    Connected {
        /// Whether the service table has been resolved.
        services_resolved: bool,
    },
    /// Disconnect requested.
    Disconnecting,
    /// Terminal.
    Disconnected,
}

impl LifecycleState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// Check if in a transitional state.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting | Self::Disconnecting)
    }

    /// Check if the lifecycle is over.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected {
                services_resolved: false,
            } => write!(f, "Connected(ServicesUnresolved)"),
            Self::Connected {
                services_resolved: true,
            } => write!(f, "Connected(ServicesResolved)"),
            Self::Disconnecting => write!(f, "Disconnecting"),
            Self::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ReadOutcome {
    /// The characteristic was read; value decoded as UTF-8.
    Value(String),
    /// The device could not be connected.
    ConnectFailed(GattError),
    /// Service discovery failed.
    ResolutionFailed(GattError),
    /// The service or characteristic does not exist on the device.
    NotFound,
    /// The read was rejected.
    ReadFailed(GattError),
    /// The peer dropped the connection before the read finished.
    ConnectionLost,
}

impl ReadOutcome {
    /// Check if the characteristic was read.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Value(_))
    }
}

/// A user-visible status line, one per lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// Connect requested.
    Connecting {
        /// Device address.
        address: String,
    },
    /// Connect failed.
    ConnectFailed {
        /// Device address.
        address: String,
        /// Classified failure.
        error: GattError,
    },
    /// Connected, waiting for services.
    Connected {
        /// Device address.
        address: String,
    },
    /// Battery level, read at resolution time or from a change signal.
    BatteryLevel {
        /// Charge in percent.
        percent: u8,
        /// True for the level read when services resolved.
        initial: bool,
    },
    /// The initial battery level could not be read.
    BatteryUnavailable {
        /// Classified failure.
        error: GattError,
    },
    /// Battery change signals cannot be subscribed to.
    BatteryUntracked {
        /// Classified failure.
        error: GattError,
    },
    /// Service discovery failed.
    ResolutionFailed {
        /// Device address.
        address: String,
        /// Classified failure.
        error: GattError,
    },
    /// Target found, read requested.
    Reading {
        /// Service identifier.
        service: String,
        /// Characteristic identifier.
        characteristic: String,
    },
    /// Target does not exist.
    NotFound {
        /// Service identifier.
        service: String,
        /// Characteristic identifier.
        characteristic: String,
    },
    /// Value read.
    Value {
        /// Service identifier.
        service: String,
        /// Characteristic identifier.
        characteristic: String,
        /// Decoded value.
        value: String,
    },
    /// Read rejected.
    ReadFailed {
        /// Service identifier.
        service: String,
        /// Characteristic identifier.
        characteristic: String,
        /// Classified failure.
        error: GattError,
    },
    /// Disconnect requested.
    Disconnecting {
        /// Device address.
        address: String,
    },
    /// Disconnected.
    Disconnected {
        /// Device address.
        address: String,
    },
    /// Disconnect failed.
    DisconnectFailed {
        /// Device address.
        address: String,
        /// Classified failure.
        error: GattError,
    },
    /// The peer disconnected unexpectedly.
    ConnectionLost {
        /// Device address.
        address: String,
    },
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting { address } => write!(f, "Connecting to {} ...", address),
            Self::ConnectFailed { address, error } => {
                write!(f, "Connection to {} failed, error: {}", address, error)
            }
            Self::Connected { address } => write!(
                f,
                "Connection to {} succeeded, waiting for services to be resolved...",
                address
            ),
            Self::BatteryLevel {
                percent,
                initial: true,
            } => write!(f, "Battery level is initially at {} percent.", percent),
            Self::BatteryLevel {
                percent,
                initial: false,
            } => write!(f, "Battery level is now at {} percent.", percent),
            Self::BatteryUnavailable { error } => {
                write!(f, "Battery level cannot be read, error: {}", error)
            }
            Self::BatteryUntracked { error } => {
                write!(f, "Battery level changes cannot be tracked, error: {}", error)
            }
            Self::ResolutionFailed { address, error } => write!(
                f,
                "Services of {} could not be resolved, error: {}",
                address, error
            ),
            Self::Reading {
                service,
                characteristic,
            } => write!(
                f,
                "Service {} Characteristic {} exists, reading value...",
                service, characteristic
            ),
            Self::NotFound {
                service,
                characteristic,
            } => write!(
                f,
                "Service {} Characteristic {} does not exist!",
                service, characteristic
            ),
            Self::Value {
                service,
                characteristic,
                value,
            } => write!(
                f,
                "Service {} Characteristic {} value: {}",
                service, characteristic, value
            ),
            Self::ReadFailed {
                service,
                characteristic,
                error,
            } => write!(
                f,
                "Service {} Characteristic {} read_value failed, error: {}",
                service, characteristic, error
            ),
            Self::Disconnecting { address } => write!(f, "Disconnecting from {} ...", address),
            Self::Disconnected { address } => {
                write!(f, "Disconnection from {} succeeded.", address)
            }
            Self::DisconnectFailed { address, error } => {
                write!(f, "Disconnection from {} failed, error: {}", address, error)
            }
            Self::ConnectionLost { address } => write!(f, "Connection to {} was lost.", address),
        }
    }
}

/// One peripheral and its read lifecycle.
pub struct Device<B: GattBackend> {
    target: TargetSelector,
    backend: B,
    state: LifecycleState,
    services: Vec<Service>,
    battery: BatterySignal,
    event_loop: EventLoop,
    status_tx: broadcast::Sender<Status>,
    outcome: Option<ReadOutcome>,
}

impl<B: GattBackend> Device<B> {
    /// Create a device for `target` driven through `backend`.
    ///
    /// `event_loop` is stopped when the lifecycle reaches its terminal state.
    pub fn new(target: TargetSelector, backend: B, event_loop: EventLoop) -> Self {
        let (status_tx, _) = broadcast::channel(64);

        Self {
            target,
            backend,
            state: LifecycleState::Idle,
            services: Vec::new(),
            battery: BatterySignal::new(),
            event_loop,
            status_tx,
            outcome: None,
        }
    }

    /// Get the current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// The target this device reads.
    pub fn target(&self) -> &TargetSelector {
        &self.target
    }

    /// The resolved service tree; empty until services resolve.
    pub fn services(&self) -> &[Service] {
        &self.services
    }

    /// How the run ended, once it has.
    pub fn outcome(&self) -> Option<&ReadOutcome> {
        self.outcome.as_ref()
    }

    /// Check if the battery signal is attached.
    pub fn is_battery_attached(&self) -> bool {
        self.battery.is_attached()
    }

    /// Subscribe to status lines.
    pub fn subscribe(&self) -> broadcast::Receiver<Status> {
        self.status_tx.subscribe()
    }

    /// Request the connection. Only valid once, from `Idle`.
    pub fn connect(&mut self) {
        if self.state != LifecycleState::Idle {
            warn!("Ignoring connect request in state {}", self.state);
            return;
        }

        self.emit(Status::Connecting {
            address: self.address(),
        });
        self.set_state(LifecycleState::Connecting);
        self.backend.connect();
    }

    /// Tear down a live link ahead of the normal lifecycle, e.g. on shutdown.
    ///
    /// Returns whether a disconnect was requested. Only a connected device
    /// has a link to tear down; the terminal transition still arrives as a
    /// regular disconnect event.
    pub fn interrupt(&mut self) -> bool {
        if !self.state.is_connected() {
            debug!("Nothing to interrupt in state {}", self.state);
            return false;
        }

        info!("Interrupting {}", self.target.mac_address());
        self.begin_disconnect();
        true
    }

    /// Dispatch one adapter event.
    pub fn handle_event(&mut self, event: DeviceEvent) {
        debug!("Handling {} in state {}", event.name(), self.state);

        match (self.state, event) {
            (LifecycleState::Connecting, DeviceEvent::ConnectFailed(error)) => {
                self.on_connect_failed(classify(&error));
            }
            (LifecycleState::Connecting, DeviceEvent::ConnectSucceeded) => {
                self.on_connect_succeeded();
            }
            (
                LifecycleState::Connected {
                    services_resolved: false,
                },
                DeviceEvent::ServicesResolved(services),
            ) => {
                self.on_services_resolved(services);
            }
            (
                LifecycleState::Connected {
                    services_resolved: false,
                },
                DeviceEvent::ServicesResolutionFailed(error),
            ) => {
                self.on_services_resolution_failed(classify(&error));
            }
            (
                LifecycleState::Connected {
                    services_resolved: true,
                },
                DeviceEvent::CharacteristicValueUpdated { uuid, value },
            ) if uuid == self.target.characteristic_uuid() => {
                self.on_read_succeeded(value);
            }
            (
                LifecycleState::Connected {
                    services_resolved: true,
                },
                DeviceEvent::CharacteristicReadFailed { uuid, error },
            ) if uuid == self.target.characteristic_uuid() => {
                self.on_read_failed(classify(&error));
            }
            (LifecycleState::Disconnecting, DeviceEvent::DisconnectSucceeded) => {
                self.on_disconnect_succeeded();
            }
            (LifecycleState::Disconnecting, DeviceEvent::DisconnectFailed(error)) => {
                self.on_disconnect_failed(classify(&error));
            }
            (LifecycleState::Connected { .. }, DeviceEvent::DisconnectSucceeded) => {
                self.on_connection_lost();
            }
            (_, DeviceEvent::PropertiesChanged(signal)) => {
                self.on_properties_changed(&signal);
            }
            (state, event) => {
                warn!("Ignoring {} in state {}", event.name(), state);
            }
        }
    }

    fn on_connect_failed(&mut self, error: GattError) {
        self.emit(Status::ConnectFailed {
            address: self.address(),
            error: error.clone(),
        });
        self.set_outcome(ReadOutcome::ConnectFailed(error));
        self.finish();
    }

    fn on_connect_succeeded(&mut self) {
        info!("Connected to {}", self.target.mac_address());
        self.emit(Status::Connected {
            address: self.address(),
        });
        self.set_state(LifecycleState::Connected {
            services_resolved: false,
        });
    }

    fn on_services_resolved(&mut self, services: Vec<Service>) {
        debug!("Resolved {} services", services.len());
        self.services = services;
        self.set_state(LifecycleState::Connected {
            services_resolved: true,
        });

        match self.backend.battery_level() {
            Ok(percent) => self.emit(Status::BatteryLevel {
                percent,
                initial: true,
            }),
            Err(e) => self.emit(Status::BatteryUnavailable { error: classify(&e) }),
        }
        if let Err(error) = self.battery.attach(&self.backend) {
            self.emit(Status::BatteryUntracked { error });
        }

        let characteristic = resolve(
            &self.services,
            self.target.service(),
            self.target.characteristic(),
        )
        .map(|(_, c)| c.clone());

        match characteristic {
            Ok(characteristic) => {
                self.emit(Status::Reading {
                    service: self.target.service().to_string(),
                    characteristic: self.target.characteristic().to_string(),
                });
                self.backend.read_value(&characteristic);
            }
            Err(e) => {
                debug!("Target resolution failed: {}", e);
                self.emit(Status::NotFound {
                    service: self.target.service().to_string(),
                    characteristic: self.target.characteristic().to_string(),
                });
                self.set_outcome(ReadOutcome::NotFound);
                self.begin_disconnect();
            }
        }
    }

    fn on_services_resolution_failed(&mut self, error: GattError) {
        self.emit(Status::ResolutionFailed {
            address: self.address(),
            error: error.clone(),
        });
        self.set_outcome(ReadOutcome::ResolutionFailed(error));
        self.begin_disconnect();
    }

    fn on_read_succeeded(&mut self, value: Vec<u8>) {
        let text = String::from_utf8_lossy(&value).into_owned();
        if let Some(characteristic) = self.target_characteristic_mut() {
            characteristic.value = Some(value);
        }

        self.emit(Status::Value {
            service: self.target.service().to_string(),
            characteristic: self.target.characteristic().to_string(),
            value: text.clone(),
        });
        self.set_outcome(ReadOutcome::Value(text));
        self.begin_disconnect();
    }

    fn on_read_failed(&mut self, error: GattError) {
        self.emit(Status::ReadFailed {
            service: self.target.service().to_string(),
            characteristic: self.target.characteristic().to_string(),
            error: error.clone(),
        });
        self.set_outcome(ReadOutcome::ReadFailed(error));
        self.begin_disconnect();
    }

    fn on_disconnect_succeeded(&mut self) {
        self.battery.detach();
        self.emit(Status::Disconnected {
            address: self.address(),
        });
        self.finish();
    }

    fn on_disconnect_failed(&mut self, error: GattError) {
        self.battery.detach();
        self.emit(Status::DisconnectFailed {
            address: self.address(),
            error,
        });
        self.finish();
    }

    fn on_connection_lost(&mut self) {
        self.battery.detach();
        self.emit(Status::ConnectionLost {
            address: self.address(),
        });
        self.set_outcome(ReadOutcome::ConnectionLost);
        self.finish();
    }

    fn on_properties_changed(&mut self, signal: &PropertiesChanged) {
        match self.battery.level_from(signal) {
            Some(percent) => self.emit(Status::BatteryLevel {
                percent,
                initial: false,
            }),
            None => debug!(
                "Ignoring property change on {} ({} changed, {} invalidated)",
                signal.interface,
                signal.changed.len(),
                signal.invalidated.len()
            ),
        }
    }

    fn begin_disconnect(&mut self) {
        self.emit(Status::Disconnecting {
            address: self.address(),
        });
        self.set_state(LifecycleState::Disconnecting);
        self.backend.disconnect();
    }

    /// Enter the terminal state and stop the event loop.
    fn finish(&mut self) {
        self.set_state(LifecycleState::Disconnected);
        self.event_loop.stop();
    }

    fn target_characteristic_mut(&mut self) -> Option<&mut Characteristic> {
        let service_uuid: Uuid = self.target.service_uuid();
        let characteristic_uuid: Uuid = self.target.characteristic_uuid();
        self.services
            .iter_mut()
            .find(|s| s.uuid == service_uuid)
            .and_then(|s| {
                s.characteristics
                    .iter_mut()
                    .find(|c| c.uuid == characteristic_uuid)
            })
    }

    /// Keep the first outcome; later failures (e.g. on disconnect) do not
    /// overwrite it.
    fn set_outcome(&mut self, outcome: ReadOutcome) {
        if self.outcome.is_none() {
            self.outcome = Some(outcome);
        }
    }

    fn set_state(&mut self, new_state: LifecycleState) {
        if self.state != new_state {
            debug!("Lifecycle state changed: {} -> {}", self.state, new_state);
            self.state = new_state;
        }
    }

    fn emit(&self, status: Status) {
        debug!("{}", status);
        let _ = self.status_tx.send(status);
    }

    fn address(&self) -> String {
        self.target.mac_address().to_string()
    }
}

impl<B: GattBackend> Drop for Device<B> {
    fn drop(&mut self) {
        self.battery.detach();
    }
}
