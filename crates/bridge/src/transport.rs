//! Collaborator capabilities consumed by the device session
//!
//! The session never talks to the USB stack directly. Device enumeration,
//! the permission broker and the open transport channel are reached
//! through these traits, so the rusb backend in [`crate::usb`] and the
//! mocks in [`crate::test_utils`] are interchangeable.

use crate::error::{OpenError, TransferFault};
use common::{DeviceInstance, PermissionRequest};

/// Open transport channel to the bridge device
///
/// Shared between the session and in-flight transfers, so both methods
/// take `&self`. After `close` every `exchange` must fail with a fault
/// instead of touching the device.
pub trait TransportBinding: Send + Sync {
    /// Send `outbound`, then receive into `inbound`; returns bytes received
    fn exchange(&self, outbound: &[u8], inbound: &mut [u8]) -> Result<usize, TransferFault>;

    /// Release the channel. Calling it more than once is harmless.
    fn close(&self);
}

/// Lists attached devices and opens them
pub trait DeviceEnumerator: Send + Sync {
    type Binding: TransportBinding + 'static;

    /// Devices currently on the bus, of any model
    fn list_attached(&self) -> common::Result<Vec<DeviceInstance>>;

    /// Open one attached instance
    fn open(&self, device: &DeviceInstance) -> Result<Self::Binding, OpenError>;
}

/// Host subsystem mediating user consent
///
/// The answer comes back asynchronously as a
/// [`common::HostEvent::PermissionResult`]; `request_permission` must not
/// call back into the session itself.
pub trait PermissionBroker: Send + Sync {
    fn request_permission(&self, request: &PermissionRequest);
}
