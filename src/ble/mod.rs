//! BLE communication module.
//!
//! This module provides the GATT data model, adapter error classification
//! and the backend capability the device lifecycle drives.

pub mod backend;
pub mod battery;
pub mod btleplug_backend;
pub mod errors;
pub mod events;
pub mod gatt;
pub mod uuids;

pub use backend::{GattBackend, SignalHandle};
pub use battery::BatterySignal;
pub use btleplug_backend::{BackendConfig, BtleplugBackend};
pub use errors::{classify, AdapterError, GattError, GattErrorKind};
pub use events::{DeviceEvent, PropertiesChanged, PropertyValue};
pub use gatt::{resolve, Characteristic, Service};
pub use uuids::*;
