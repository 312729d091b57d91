//! USB subsystem
//!
//! rusb-backed implementations of the session's collaborators:
//! - Device enumeration and opening (`UsbEnumerator`)
//! - HID interrupt exchange over the claimed interface (`UsbBinding`)
//! - Permission re-probing (`ProbePermissionBroker`)
//! - Hot-plug notifications pumped on a dedicated thread (`HotplugWatcher`)
//!
//! Hot-plug and permission callbacks never touch the session directly. They
//! push `HostEvent`s into the channel bridge drained by the dispatcher.

pub mod binding;
pub mod device;
pub mod hotplug;
pub mod permission;

use std::time::Duration;

pub use binding::UsbBinding;
pub use device::{UsbDeviceInfo, UsbEnumerator};
pub use hotplug::HotplugWatcher;
pub use permission::ProbePermissionBroker;

/// Interface and endpoint layout used to talk to the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbSettings {
    /// HID interface to claim
    pub interface: u8,
    /// Interrupt OUT endpoint
    pub out_endpoint: u8,
    /// Interrupt IN endpoint
    pub in_endpoint: u8,
    /// Timeout for each interrupt transfer
    pub timeout: Duration,
}

impl Default for UsbSettings {
    fn default() -> Self {
        // MCP2210: single HID interface with one interrupt endpoint pair
        Self {
            interface: 0,
            out_endpoint: 0x01,
            in_endpoint: 0x81,
            timeout: Duration::from_millis(1000),
        }
    }
}
