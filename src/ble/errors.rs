//! Adapter error classification.
//!
//! Errors coming out of the Bluetooth stack carry a namespaced identifier
//! (for BlueZ, the D-Bus error name) and a message. [`classify`] maps them
//! onto the closed [`GattErrorKind`] taxonomy; nothing past the adapter
//! boundary sees an unclassified error.

use std::fmt;

use thiserror::Error;

/// Identifier prefixes that mark an error name inside free-form text.
const ERROR_NAMESPACES: [&str; 2] = ["org.bluez.Error.", "org.freedesktop.DBus.Error."];

/// BlueZ identifier for a generic failure.
pub const ERROR_FAILED: &str = "org.bluez.Error.Failed";
/// BlueZ identifier for an operation already in progress.
pub const ERROR_IN_PROGRESS: &str = "org.bluez.Error.InProgress";
/// BlueZ identifier for invalid arguments.
pub const ERROR_INVALID_ARGS: &str = "org.bluez.Error.InvalidArgs";
/// BlueZ identifier for a bad value length.
pub const ERROR_INVALID_VALUE_LENGTH: &str = "org.bluez.Error.InvalidValueLength";
/// BlueZ identifier for missing authorization.
pub const ERROR_NOT_AUTHORIZED: &str = "org.bluez.Error.NotAuthorized";
/// BlueZ identifier for a forbidden operation.
pub const ERROR_NOT_PERMITTED: &str = "org.bluez.Error.NotPermitted";
/// BlueZ identifier for an unsupported operation.
pub const ERROR_NOT_SUPPORTED: &str = "org.bluez.Error.NotSupported";
/// D-Bus identifier for a denied bus call.
pub const ERROR_ACCESS_DENIED: &str = "org.freedesktop.DBus.Error.AccessDenied";
/// BlueZ identifier for an object that does not exist.
pub const ERROR_DOES_NOT_EXIST: &str = "org.bluez.Error.DoesNotExist";
/// D-Bus identifier for a missing interface on an object.
pub const ERROR_UNKNOWN_INTERFACE: &str = "org.freedesktop.DBus.Error.UnknownInterface";

/// Message reported for [`GattErrorKind::AccessDenied`].
const ACCESS_DENIED_MESSAGE: &str = "Root permissions required";

/// An error as reported by the adapter, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterError {
    /// Namespaced error identifier, e.g. `org.bluez.Error.NotPermitted`.
    pub name: String,
    /// Human-readable message.
    pub message: String,
}

impl AdapterError {
    /// Create a new adapter error.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Build an error from free-form text, recovering an embedded identifier.
    ///
    /// Falls back to `fallback` when the text does not carry one.
    pub fn from_text(text: &str, fallback: &str) -> Self {
        let name = find_error_name(text).unwrap_or(fallback);
        Self::new(name, text)
    }
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl From<btleplug::Error> for AdapterError {
    fn from(err: btleplug::Error) -> Self {
        let message = err.to_string();
        let name = match &err {
            btleplug::Error::PermissionDenied => ERROR_ACCESS_DENIED,
            btleplug::Error::DeviceNotFound => ERROR_DOES_NOT_EXIST,
            btleplug::Error::NoSuchCharacteristic => ERROR_DOES_NOT_EXIST,
            btleplug::Error::NotSupported(_) => ERROR_NOT_SUPPORTED,
            btleplug::Error::Uuid(_) | btleplug::Error::InvalidBDAddr(_) => ERROR_INVALID_ARGS,
            _ => return Self::from_text(&message, ERROR_FAILED),
        };
        Self::new(name, message)
    }
}

/// Locate the first namespaced error identifier inside `text`.
fn find_error_name(text: &str) -> Option<&str> {
    ERROR_NAMESPACES
        .iter()
        .filter_map(|ns| text.find(ns))
        .min()
        .map(|start| {
            let rest = &text[start..];
            let end = rest
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '.'))
                .unwrap_or(rest.len());
            rest[..end].trim_end_matches('.')
        })
}

/// The closed set of error kinds surfaced to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GattErrorKind {
    /// The operation failed.
    OperationFailed,
    /// Another operation is already running.
    OperationInProgress,
    /// The arguments were rejected.
    InvalidArguments,
    /// The value has the wrong length.
    InvalidValueLength,
    /// The peer requires authorization.
    NotAuthorized,
    /// The peer does not permit the operation.
    NotPermitted,
    /// The operation is not supported.
    NotSupported,
    /// Access to the adapter was denied.
    AccessDenied,
    /// Anything the table does not recognise.
    UnknownFailure,
}

impl GattErrorKind {
    /// Look up the kind for an adapter identifier. Total: unknown names map
    /// to [`GattErrorKind::UnknownFailure`].
    pub fn from_error_name(name: &str) -> Self {
        match name {
            ERROR_FAILED => Self::OperationFailed,
            ERROR_IN_PROGRESS => Self::OperationInProgress,
            ERROR_INVALID_ARGS => Self::InvalidArguments,
            ERROR_INVALID_VALUE_LENGTH => Self::InvalidValueLength,
            ERROR_NOT_AUTHORIZED => Self::NotAuthorized,
            ERROR_NOT_PERMITTED => Self::NotPermitted,
            ERROR_NOT_SUPPORTED => Self::NotSupported,
            ERROR_ACCESS_DENIED => Self::AccessDenied,
            _ => Self::UnknownFailure,
        }
    }
}

impl fmt::Display for GattErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::OperationFailed => "Operation failed",
            Self::OperationInProgress => "Operation in progress",
            Self::InvalidArguments => "Invalid arguments",
            Self::InvalidValueLength => "Invalid value length",
            Self::NotAuthorized => "Not authorized",
            Self::NotPermitted => "Not permitted",
            Self::NotSupported => "Not supported",
            Self::AccessDenied => "Access denied",
            Self::UnknownFailure => "Unknown failure",
        };
        f.write_str(name)
    }
}

/// A classified adapter error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[error("{kind}: {message}")]
pub struct GattError {
    /// Kind in the closed taxonomy.
    pub kind: GattErrorKind,
    /// Message shown to the user.
    pub message: String,
}

/// Map an adapter error onto the closed taxonomy.
///
/// Pure and total; unknown identifiers become
/// [`GattErrorKind::UnknownFailure`] carrying the original message.
pub fn classify(err: &AdapterError) -> GattError {
    let kind = GattErrorKind::from_error_name(&err.name);
    let message = match kind {
        GattErrorKind::AccessDenied => ACCESS_DENIED_MESSAGE.to_string(),
        _ => err.message.clone(),
    };
    GattError { kind, message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_mapping_table() {
        let table = [
            (ERROR_FAILED, GattErrorKind::OperationFailed),
            (ERROR_IN_PROGRESS, GattErrorKind::OperationInProgress),
            (ERROR_INVALID_ARGS, GattErrorKind::InvalidArguments),
            (ERROR_INVALID_VALUE_LENGTH, GattErrorKind::InvalidValueLength),
            (ERROR_NOT_AUTHORIZED, GattErrorKind::NotAuthorized),
            (ERROR_NOT_PERMITTED, GattErrorKind::NotPermitted),
            (ERROR_NOT_SUPPORTED, GattErrorKind::NotSupported),
            (ERROR_ACCESS_DENIED, GattErrorKind::AccessDenied),
        ];
        for (name, kind) in table {
            let classified = classify(&AdapterError::new(name, "boom"));
            assert_eq!(classified.kind, kind, "identifier {}", name);
        }
    }

    #[test]
    fn test_access_denied_uses_fixed_message() {
        let classified = classify(&AdapterError::new(ERROR_ACCESS_DENIED, "Rejected send"));
        assert_eq!(classified.message, "Root permissions required");
    }

    #[test]
    fn test_unknown_identifier_preserves_message() {
        let err = AdapterError::new("org.bluez.Error.AuthenticationTimeout", "took too long");
        assert_eq!(
            classify(&err),
            GattError {
                kind: GattErrorKind::UnknownFailure,
                message: "took too long".to_string(),
            }
        );
    }

    #[test]
    fn test_display() {
        let classified = classify(&AdapterError::new(ERROR_NOT_PERMITTED, "Read not permitted"));
        assert_eq!(classified.to_string(), "Not permitted: Read not permitted");
    }

    #[test]
    fn test_from_text_recovers_embedded_name() {
        let err = AdapterError::from_text(
            "Method call failed: org.bluez.Error.NotPermitted: Read not permitted",
            ERROR_FAILED,
        );
        assert_eq!(err.name, ERROR_NOT_PERMITTED);

        let err = AdapterError::from_text("no identifier here", ERROR_FAILED);
        assert_eq!(err.name, ERROR_FAILED);
        assert_eq!(err.message, "no identifier here");
    }

    #[test]
    fn test_from_btleplug_error() {
        let err = AdapterError::from(btleplug::Error::PermissionDenied);
        assert_eq!(classify(&err).kind, GattErrorKind::AccessDenied);

        let err = AdapterError::from(btleplug::Error::NotSupported("notify".into()));
        assert_eq!(classify(&err).kind, GattErrorKind::NotSupported);

        let err = AdapterError::from(btleplug::Error::RuntimeError(
            "org.bluez.Error.InProgress: busy".into(),
        ));
        assert_eq!(classify(&err).kind, GattErrorKind::OperationInProgress);
    }

    proptest! {
        #[test]
        fn prop_classify_is_total(name in ".*", message in ".*") {
            let err = AdapterError::new(name.clone(), message.clone());
            let classified = classify(&err);
            if classified.kind == GattErrorKind::UnknownFailure {
                prop_assert_eq!(classified.message, message);
            }
            prop_assert_eq!(classify(&err).kind, GattErrorKind::from_error_name(&name));
        }

        #[test]
        fn prop_unmapped_names_fall_back(suffix in "[A-Za-z]{1,12}") {
            let name = format!("com.example.Error.{}", suffix);
            let classified = classify(&AdapterError::new(name, "msg"));
            prop_assert_eq!(classified.kind, GattErrorKind::UnknownFailure);
            prop_assert_eq!(classified.message, "msg");
        }
    }
}
