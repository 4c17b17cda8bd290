//! Events delivered by the adapter into the device lifecycle.

use std::collections::HashMap;

use uuid::Uuid;

use crate::ble::errors::AdapterError;
use crate::ble::gatt::Service;

/// A property value carried by a property-change signal.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// Unsigned byte (D-Bus `y`).
    Byte(u8),
    /// Unsigned integer.
    UInt(u32),
    /// Signed integer.
    Int(i64),
    /// Boolean flag.
    Bool(bool),
    /// Text.
    Text(String),
}

impl PropertyValue {
    /// Numeric view of the value, if it is numeric.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Byte(v) => Some(i64::from(*v)),
            Self::UInt(v) => Some(i64::from(*v)),
            Self::Int(v) => Some(*v),
            Self::Bool(_) | Self::Text(_) => None,
        }
    }
}

/// A `PropertiesChanged` signal for one sub-interface of the device.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PropertiesChanged {
    /// The interface whose properties changed.
    pub interface: String,
    /// Properties with new values.
    pub changed: HashMap<String, PropertyValue>,
    /// Properties whose cached value was invalidated.
    pub invalidated: Vec<String>,
}

impl PropertiesChanged {
    /// Create a signal for `interface` with no fields.
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            ..Default::default()
        }
    }

    /// Add a changed property.
    pub fn with_changed(mut self, name: impl Into<String>, value: PropertyValue) -> Self {
        self.changed.insert(name.into(), value);
        self
    }
}

/// Asynchronous results and signals from the adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// The connect request completed.
    ConnectSucceeded,
    /// The connect request failed.
    ConnectFailed(AdapterError),
    /// The GATT service table was discovered.
    ServicesResolved(Vec<Service>),
    /// Service discovery failed after connecting.
    ServicesResolutionFailed(AdapterError),
    /// A characteristic read returned a value.
    CharacteristicValueUpdated {
        /// The characteristic that was read.
        uuid: Uuid,
        /// The value read.
        value: Vec<u8>,
    },
    /// A characteristic read was rejected.
    CharacteristicReadFailed {
        /// The characteristic that was read.
        uuid: Uuid,
        /// Why it failed.
        error: AdapterError,
    },
    /// The device disconnected, on request or from the peer side.
    DisconnectSucceeded,
    /// The disconnect request failed.
    DisconnectFailed(AdapterError),
    /// A property-change signal for a sub-interface.
    PropertiesChanged(PropertiesChanged),
}

impl DeviceEvent {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConnectSucceeded => "connect_succeeded",
            Self::ConnectFailed(_) => "connect_failed",
            Self::ServicesResolved(_) => "services_resolved",
            Self::ServicesResolutionFailed(_) => "services_resolution_failed",
            Self::CharacteristicValueUpdated { .. } => "read_succeeded",
            Self::CharacteristicReadFailed { .. } => "read_failed",
            Self::DisconnectSucceeded => "disconnect_succeeded",
            Self::DisconnectFailed(_) => "disconnect_failed",
            Self::PropertiesChanged(_) => "properties_changed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_value_numeric_view() {
        assert_eq!(PropertyValue::Byte(87).as_i64(), Some(87));
        assert_eq!(PropertyValue::UInt(100).as_i64(), Some(100));
        assert_eq!(PropertyValue::Int(-1).as_i64(), Some(-1));
        assert_eq!(PropertyValue::Bool(true).as_i64(), None);
        assert_eq!(PropertyValue::Text("87".into()).as_i64(), None);
    }

    #[test]
    fn test_properties_changed_builder() {
        let signal = PropertiesChanged::new("org.bluez.Battery1")
            .with_changed("Percentage", PropertyValue::Byte(50));
        assert_eq!(signal.interface, "org.bluez.Battery1");
        assert_eq!(signal.changed.get("Percentage"), Some(&PropertyValue::Byte(50)));
        assert!(signal.invalidated.is_empty());
    }
}
