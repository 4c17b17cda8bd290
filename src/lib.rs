// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # gatt-reader
//!
//! Connect to one Bluetooth Low Energy peripheral, wait for its GATT
//! service table, read a single characteristic addressed by 16-bit UUID,
//! report the value and disconnect.
//!
//! The run is an event-driven lifecycle: the backend turns every adapter
//! request into a later [`DeviceEvent`], the [`DeviceManager`] feeds those
//! events one at a time into the [`Device`], and the device stops the event
//! loop exactly once when it reaches its terminal state.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gatt_reader::{BackendConfig, BtleplugBackend, Device, DeviceManager, Result, TargetSelector};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let target = TargetSelector::new("AA:BB:CC:DD:EE:FF", "180a", "2a26")?;
//!
//!     let (mut manager, events) = DeviceManager::new();
//!     let backend = BtleplugBackend::new(target.address(), BackendConfig::default(), events).await?;
//!     let mut device = Device::new(target, backend, manager.event_loop());
//!
//!     let mut status = device.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(line) = status.recv().await {
//!             println!("{}", line);
//!         }
//!     });
//!
//!     manager.connect(&mut device);
//!     let outcome = manager.run(&mut device).await?;
//!     println!("{:?}", outcome);
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for outcome types

// Public modules
pub mod ble;
pub mod device;
pub mod device_manager;
pub mod error;
pub mod target;

// Re-exports for convenience
pub use ble::{
    classify, AdapterError, BackendConfig, BtleplugBackend, DeviceEvent, GattBackend, GattError,
    GattErrorKind,
};
pub use device::{Device, LifecycleState, ReadOutcome, Status};
pub use device_manager::{DeviceManager, EventLoop, EventSender};
pub use error::{Error, Result};
pub use target::TargetSelector;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that key types are exported
        let _ = std::any::TypeId::of::<DeviceManager>();
        let _ = std::any::TypeId::of::<EventLoop>();
        let _ = std::any::TypeId::of::<Error>();
        let _ = std::any::TypeId::of::<TargetSelector>();
        let _ = std::any::TypeId::of::<ReadOutcome>();
        let _ = std::any::TypeId::of::<GattError>();
    }
}
