//! Battery level tracking.
//!
//! Holds at most one battery property-change subscription per device.
//! Attaching while a subscription is live and detaching while none is live
//! are both no-ops.

use tracing::{debug, warn};

use crate::ble::backend::{GattBackend, SignalHandle};
use crate::ble::errors::{classify, GattError};
use crate::ble::events::PropertiesChanged;
use crate::ble::uuids::{BATTERY_INTERFACE, BATTERY_PERCENTAGE_PROPERTY};

/// Single-slot owner of the battery property-change subscription.
#[derive(Debug, Default)]
pub struct BatterySignal {
    handle: Option<SignalHandle>,
}

impl BatterySignal {
    /// Create a tracker with no subscription.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a subscription is live.
    pub fn is_attached(&self) -> bool {
        self.handle.is_some()
    }

    /// Open the subscription unless one is already live.
    ///
    /// Returns `Ok(true)` when a new subscription was opened and `Ok(false)`
    /// when one was already active. A device without a battery sub-interface
    /// yields the classified error; the caller decides whether that matters.
    pub fn attach<B: GattBackend + ?Sized>(&mut self, backend: &B) -> Result<bool, GattError> {
        if self.handle.is_some() {
            debug!("Battery signal already attached");
            return Ok(false);
        }

        match backend.subscribe_battery() {
            Ok(handle) => {
                debug!("Battery signal attached (id {})", handle.id());
                self.handle = Some(handle);
                Ok(true)
            }
            Err(e) => {
                let error = classify(&e);
                warn!("Battery signal unavailable: {}", error);
                Err(error)
            }
        }
    }

    /// Release the subscription if there is one.
    ///
    /// Returns whether a subscription was released.
    pub fn detach(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                debug!("Battery signal detached (id {})", handle.id());
                handle.remove();
                true
            }
            None => false,
        }
    }

    /// Extract the battery level from a property-change signal.
    ///
    /// Signals for other interfaces, signals without a numeric `Percentage`
    /// field and signals arriving while detached all yield `None`.
    pub fn level_from(&self, signal: &PropertiesChanged) -> Option<u8> {
        if self.handle.is_none() || signal.interface != BATTERY_INTERFACE {
            return None;
        }
        signal
            .changed
            .get(BATTERY_PERCENTAGE_PROPERTY)
            .and_then(|v| v.as_i64())
            .and_then(|v| u8::try_from(v).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::backend::MockGattBackend;
    use crate::ble::errors::{AdapterError, GattErrorKind, ERROR_NOT_SUPPORTED};
    use crate::ble::events::PropertyValue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_backend(removed: Arc<AtomicUsize>) -> MockGattBackend {
        let mut backend = MockGattBackend::new();
        backend.expect_subscribe_battery().times(1).returning(move || {
            let removed = removed.clone();
            Ok(SignalHandle::new(1, move || {
                removed.fetch_add(1, Ordering::SeqCst);
            }))
        });
        backend
    }

    #[test]
    fn test_attach_twice_keeps_one_subscription() {
        let removed = Arc::new(AtomicUsize::new(0));
        let backend = counting_backend(removed.clone());
        let mut signal = BatterySignal::new();

        assert_eq!(signal.attach(&backend), Ok(true));
        assert_eq!(signal.attach(&backend), Ok(false));
        assert!(signal.is_attached());
        assert_eq!(removed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_detach_twice_is_harmless() {
        let removed = Arc::new(AtomicUsize::new(0));
        let backend = counting_backend(removed.clone());
        let mut signal = BatterySignal::new();
        signal.attach(&backend).unwrap();

        assert!(signal.detach());
        assert!(!signal.detach());
        assert!(!signal.is_attached());
        assert_eq!(removed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_detach_without_attach() {
        let mut signal = BatterySignal::new();
        assert!(!signal.detach());
    }

    #[test]
    fn test_missing_interface_is_reported_not_fatal() {
        let mut backend = MockGattBackend::new();
        backend
            .expect_subscribe_battery()
            .returning(|| Err(AdapterError::new(ERROR_NOT_SUPPORTED, "no Battery1")));
        let mut signal = BatterySignal::new();

        let err = signal.attach(&backend).unwrap_err();
        assert_eq!(err.kind, GattErrorKind::NotSupported);
        assert!(!signal.is_attached());
    }

    #[test]
    fn test_level_from_signal() {
        let backend = counting_backend(Arc::new(AtomicUsize::new(0)));
        let mut signal = BatterySignal::new();
        signal.attach(&backend).unwrap();

        let event = PropertiesChanged::new(BATTERY_INTERFACE)
            .with_changed(BATTERY_PERCENTAGE_PROPERTY, PropertyValue::Byte(73));
        assert_eq!(signal.level_from(&event), Some(73));

        let no_level = PropertiesChanged::new(BATTERY_INTERFACE)
            .with_changed("Source", PropertyValue::Text("GATT".into()));
        assert_eq!(signal.level_from(&no_level), None);

        let other = PropertiesChanged::new("org.bluez.Device1")
            .with_changed(BATTERY_PERCENTAGE_PROPERTY, PropertyValue::Byte(73));
        assert_eq!(signal.level_from(&other), None);
    }

    #[test]
    fn test_level_ignored_when_detached() {
        let signal = BatterySignal::new();
        let event = PropertiesChanged::new(BATTERY_INTERFACE)
            .with_changed(BATTERY_PERCENTAGE_PROPERTY, PropertyValue::Byte(73));
        assert_eq!(signal.level_from(&event), None);
    }
}
