//! Adapter-side capabilities the device lifecycle drives.
//!
//! Every request is fire-and-forget: the call returns immediately and the
//! outcome arrives later as a [`DeviceEvent`](crate::ble::events::DeviceEvent)
//! on the manager's event channel.

use crate::ble::errors::AdapterError;
use crate::ble::gatt::Characteristic;

/// Handle for a live property-change subscription.
///
/// The subscription is released by [`SignalHandle::remove`] or on drop,
/// whichever comes first.
pub struct SignalHandle {
    id: u64,
    remove_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl SignalHandle {
    /// Create a new signal handle.
    pub fn new(id: u64, remove_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            remove_fn: Some(Box::new(remove_fn)),
        }
    }

    /// Release the subscription.
    pub fn remove(mut self) {
        if let Some(f) = self.remove_fn.take() {
            f();
        }
    }

    /// Get the subscription ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for SignalHandle {
    fn drop(&mut self) {
        if let Some(f) = self.remove_fn.take() {
            f();
        }
    }
}

impl std::fmt::Debug for SignalHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalHandle")
            .field("id", &self.id)
            .field("active", &self.remove_fn.is_some())
            .finish()
    }
}

/// Requests the lifecycle sends to the Bluetooth stack for one device.
#[cfg_attr(test, mockall::automock)]
pub trait GattBackend: Send {
    /// Start connecting. Answers with `ConnectSucceeded` or `ConnectFailed`,
    /// then `ServicesResolved` once the service table is known.
    fn connect(&self);

    /// Start disconnecting. Answers with `DisconnectSucceeded` or
    /// `DisconnectFailed`.
    fn disconnect(&self);

    /// Start reading a characteristic. Answers with
    /// `CharacteristicValueUpdated` or `CharacteristicReadFailed`.
    fn read_value(&self, characteristic: &Characteristic);

    /// Current battery level from the optional battery sub-interface.
    fn battery_level(&self) -> Result<u8, AdapterError>;

    /// Open the battery property-change subscription. Changes arrive as
    /// `PropertiesChanged` events until the handle is released.
    fn subscribe_battery(&self) -> Result<SignalHandle, AdapterError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_remove_runs_once() {
        let removed = Arc::new(AtomicUsize::new(0));
        let counter = removed.clone();
        let handle = SignalHandle::new(7, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(handle.id(), 7);
        handle.remove();
        assert_eq!(removed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_releases() {
        let removed = Arc::new(AtomicUsize::new(0));
        let counter = removed.clone();
        {
            let _handle = SignalHandle::new(1, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(removed.load(Ordering::SeqCst), 1);
    }
}
