//! Error types for the gatt-reader crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// The adapter requested by name does not exist.
    #[error("Adapter not found: {name}")]
    AdapterNotFound {
        /// The adapter name that was searched for.
        name: String,
    },

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },

    /// Service not found on the device.
    #[error("Service not found: {uuid}")]
    ServiceNotFound {
        /// The UUID of the service that was not found.
        uuid: String,
    },

    /// Characteristic not found on the device.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// Every event sender was dropped before the lifecycle finished.
    #[error("Event channel closed before the device reached a terminal state")]
    EventChannelClosed,

    /// The run was interrupted before the device reached a terminal state.
    #[error("Interrupted")]
    Interrupted,

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for either resolver miss (service or characteristic).
    pub fn is_target_not_found(&self) -> bool {
        matches!(
            self,
            Self::ServiceNotFound { .. } | Self::CharacteristicNotFound { .. }
        )
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_not_found_covers_both_lookups() {
        let service = Error::ServiceNotFound {
            uuid: "180a".to_string(),
        };
        let characteristic = Error::CharacteristicNotFound {
            uuid: "2a26".to_string(),
        };
        assert!(service.is_target_not_found());
        assert!(characteristic.is_target_not_found());
        assert!(!Error::BluetoothUnavailable.is_target_not_found());
    }

    #[test]
    fn test_invalid_parameter_display() {
        let err = Error::InvalidParameter {
            name: "service".to_string(),
            value: "xyz".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid parameter: service = xyz");
    }
}
