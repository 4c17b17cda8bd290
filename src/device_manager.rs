//! Event loop driving one device to a terminal state.
//!
//! Adapter results arrive on an unbounded channel and are dispatched into
//! the [`Device`] one at a time, in arrival order. The loop ends when the
//! device stops the shared [`EventLoop`] from a terminal transition.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::ble::backend::GattBackend;
use crate::ble::events::DeviceEvent;
use crate::device::{Device, ReadOutcome};
use crate::error::{Error, Result};

/// Sending half of the device event channel, handed to the backend.
pub type EventSender = mpsc::UnboundedSender<DeviceEvent>;

/// Shared stop handle for the event loop.
///
/// Cloning shares the handle. Stopping more than once is a lifecycle bug
/// and is logged as such.
#[derive(Debug, Clone, Default)]
pub struct EventLoop {
    stops: Arc<AtomicUsize>,
}

impl EventLoop {
    /// Create a running event loop handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop the loop.
    pub fn stop(&self) {
        let previous = self.stops.fetch_add(1, Ordering::SeqCst);
        if previous == 0 {
            debug!("Event loop stop requested");
        } else {
            warn!("Event loop stopped {} times", previous + 1);
        }
    }

    /// Check if the loop has been stopped.
    pub fn is_stopped(&self) -> bool {
        self.stop_count() > 0
    }

    /// Number of times `stop` was called.
    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

/// Owns the event loop for a single managed device.
pub struct DeviceManager {
    /// Incoming adapter events.
    events: mpsc::UnboundedReceiver<DeviceEvent>,
    /// Stop handle shared with the device.
    event_loop: EventLoop,
}

impl DeviceManager {
    /// Create a manager and the sender the backend delivers events through.
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (Self, EventSender) {
        let (tx, events) = mpsc::unbounded_channel();

        (
            Self {
                events,
                event_loop: EventLoop::new(),
            },
            tx,
        )
    }

    /// Stop handle to give to the managed [`Device`].
    pub fn event_loop(&self) -> EventLoop {
        self.event_loop.clone()
    }

    /// Request the device's connection.
    pub fn connect<B: GattBackend>(&self, device: &mut Device<B>) {
        device.connect();
    }

    /// Stop the loop. Normally the device does this from its terminal
    /// transition.
    pub fn stop(&self) {
        self.event_loop.stop();
    }

    /// Dispatch events into `device` until the loop is stopped.
    ///
    /// Returns the device's outcome.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EventChannelClosed`] if every sender is dropped
    /// before the device reaches a terminal state.
    pub async fn run<B: GattBackend>(&mut self, device: &mut Device<B>) -> Result<ReadOutcome> {
        info!("Event loop running for {}", device.target().mac_address());

        while !self.event_loop.is_stopped() {
            match self.events.recv().await {
                Some(event) => device.handle_event(event),
                None => {
                    warn!("Event channel closed in state {}", device.state());
                    return Err(Error::EventChannelClosed);
                }
            }
        }

        debug!("Event loop finished in state {}", device.state());
        device
            .outcome()
            .cloned()
            .ok_or_else(|| Error::Internal("event loop stopped without an outcome".to_string()))
    }

    /// Disconnect a device whose run was cut short, waiting at most `grace`
    /// for the adapter to confirm.
    ///
    /// Returns whether the device reached its terminal state.
    pub async fn shutdown<B: GattBackend>(
        &mut self,
        device: &mut Device<B>,
        grace: Duration,
    ) -> bool {
        if !device.interrupt() {
            return device.state().is_terminal();
        }

        match tokio::time::timeout(grace, self.run(device)).await {
            Ok(Err(Error::EventChannelClosed)) => {
                warn!("Event channel closed while disconnecting");
            }
            Ok(_) => debug!("Shutdown disconnect finished"),
            Err(_) => warn!("Disconnect did not finish within {:?}", grace),
        }
        device.state().is_terminal()
    }
}
