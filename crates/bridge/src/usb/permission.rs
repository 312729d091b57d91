//! Permission broker for desktop hosts
//!
//! Desktop libusb has no consent dialog: access is decided by device node
//! permissions (udev rules on Linux). The broker answers a request by
//! probing the device again after a short delay, on a helper thread, and
//! posting the outcome as a `PermissionResult` event.

use crate::transport::PermissionBroker;
use common::{HostEvent, HostEventSink, PermissionRequest};
use rusb::{Context, UsbContext};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Re-probes device access and reports the result through the event channel
pub struct ProbePermissionBroker {
    context: Context,
    sink: HostEventSink,
    delay: Duration,
}

impl ProbePermissionBroker {
    pub fn new(context: Context, sink: HostEventSink, delay: Duration) -> Self {
        Self {
            context,
            sink,
            delay,
        }
    }
}

impl PermissionBroker for ProbePermissionBroker {
    fn request_permission(&self, request: &PermissionRequest) {
        let context = self.context.clone();
        let sink = self.sink.clone();
        let delay = self.delay;
        let request = *request;

        let spawned = std::thread::Builder::new()
            .name("usb-permission".to_string())
            .spawn(move || {
                std::thread::sleep(delay);

                let Some(granted) = probe_access(&context, &request) else {
                    debug!(device = %request.device, "Device gone before permission probe");
                    return;
                };

                if !granted {
                    warn!(
                        device = %request.device,
                        "No access to {:04x}:{:04x}; add a udev rule granting it, then re-plug the device",
                        request.device.identity.vendor_id,
                        request.device.identity.product_id
                    );
                }

                let event = HostEvent::PermissionResult {
                    device: request.device,
                    granted,
                };
                if let Err(e) = sink.send_blocking(event) {
                    error!("Failed to deliver permission result: {}", e);
                }
            });

        if let Err(e) = spawned {
            error!("Failed to spawn permission probe: {}", e);
        }
    }
}

/// Some(true) if the device can be opened now, None if it is not attached
fn probe_access(context: &Context, request: &PermissionRequest) -> Option<bool> {
    let devices = context.devices().ok()?;
    let device = devices
        .iter()
        .find(|d| d.bus_number() == request.device.bus && d.address() == request.device.address)?;

    match device.open() {
        Ok(_handle) => Some(true),
        Err(rusb::Error::Access) => Some(false),
        Err(rusb::Error::NoDevice | rusb::Error::NotFound) => None,
        Err(e) => {
            // Not a permission problem; let the session's open attempt report it
            debug!("Permission probe open failed: {}", e);
            Some(true)
        }
    }
}
