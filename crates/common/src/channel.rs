//! Async channel bridge between the USB callback thread and the dispatcher
//!
//! libusb delivers hot-plug notifications on its own event thread and the
//! permission broker answers from a helper thread. Both push `HostEvent`s
//! through a `HostEventSink`; the dispatcher drains the matching
//! `HostEventSource` in arrival order.

use crate::types::DeviceInstance;
use async_channel::{Receiver, Sender, bounded};

/// Notifications from the host USB subsystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// A device matching the hot-plug filter arrived
    Attached(DeviceInstance),

    /// A device left the bus
    Detached(DeviceInstance),

    /// The host answered a permission request
    PermissionResult {
        /// Instance the answer refers to
        device: DeviceInstance,
        /// Whether access was granted
        granted: bool,
    },
}

impl HostEvent {
    /// Short name of the event kind, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            HostEvent::Attached(_) => "attached",
            HostEvent::Detached(_) => "detached",
            HostEvent::PermissionResult { .. } => "permission-result",
        }
    }

    /// The device instance the event refers to
    pub fn device(&self) -> &DeviceInstance {
        match self {
            HostEvent::Attached(device)
            | HostEvent::Detached(device)
            | HostEvent::PermissionResult { device, .. } => device,
        }
    }
}

/// Producer side, held by host callbacks (blocking or async)
#[derive(Clone)]
pub struct HostEventSink {
    event_tx: Sender<HostEvent>,
}

impl HostEventSink {
    /// Send an event from an async context
    pub async fn send(&self, event: HostEvent) -> crate::Result<()> {
        self.event_tx
            .send(event)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Send an event from a host callback thread (blocking)
    pub fn send_blocking(&self, event: HostEvent) -> crate::Result<()> {
        self.event_tx
            .send_blocking(event)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Close the channel for every sink
    ///
    /// Events already queued are still delivered; the source then reports
    /// the channel as closed even while other sinks are alive.
    pub fn close(&self) -> bool {
        self.event_tx.close()
    }

    /// Whether the dispatcher side has gone away
    pub fn is_closed(&self) -> bool {
        self.event_tx.is_closed()
    }
}

/// Consumer side, held by the dispatcher
pub struct HostEventSource {
    event_rx: Receiver<HostEvent>,
}

impl HostEventSource {
    /// Receive the next event (async)
    ///
    /// Fails once every sink has been dropped and the queue is drained.
    pub async fn recv(&self) -> crate::Result<HostEvent> {
        self.event_rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Receive the next event (blocking)
    pub fn recv_blocking(&self) -> crate::Result<HostEvent> {
        self.event_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&self) -> Option<HostEvent> {
        self.event_rx.try_recv().ok()
    }
}

/// Create the channel bridge between host callbacks and the dispatcher
///
/// Returns (HostEventSink for callbacks, HostEventSource for the dispatcher)
pub fn create_event_bridge() -> (HostEventSink, HostEventSource) {
    let (event_tx, event_rx) = bounded(256);

    (HostEventSink { event_tx }, HostEventSource { event_rx })
}
