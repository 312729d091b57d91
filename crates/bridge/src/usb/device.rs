//! USB device enumeration and opening
//!
//! Lists devices on the bus and opens the bridge for transfers: the kernel
//! HID driver is detached from the configured interface and the interface
//! is claimed.

use super::UsbSettings;
use super::binding::UsbBinding;
use crate::error::OpenError;
use crate::transport::DeviceEnumerator;
use common::{DeviceIdentity, DeviceInstance};
use rusb::{Context, Device, DeviceHandle, UsbContext};
use tracing::{debug, warn};

/// Attached device with its string descriptors, for listings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDeviceInfo {
    pub instance: DeviceInstance,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
}

/// Device enumerator over a libusb context
pub struct UsbEnumerator {
    context: Context,
    settings: UsbSettings,
}

impl UsbEnumerator {
    pub fn new(context: Context, settings: UsbSettings) -> Self {
        Self { context, settings }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn settings(&self) -> UsbSettings {
        self.settings
    }

    /// List attached devices with manufacturer/product/serial strings
    ///
    /// Strings are only available for devices we are allowed to open.
    pub fn list_detailed(&self) -> Result<Vec<UsbDeviceInfo>, rusb::Error> {
        let devices = self.context.devices()?;

        let mut infos = Vec::new();
        for device in devices.iter() {
            let Some(instance) = instance_of(&device) else {
                continue;
            };
            let (manufacturer, product, serial_number) = device
                .open()
                .ok()
                .map(|handle| read_string_descriptors(&device, &handle))
                .unwrap_or((None, None, None));

            infos.push(UsbDeviceInfo {
                instance,
                manufacturer,
                product,
                serial_number,
            });
        }

        Ok(infos)
    }

    /// Find the rusb device for an instance by bus position
    fn find(&self, instance: &DeviceInstance) -> Result<Option<Device<Context>>, rusb::Error> {
        let devices = self.context.devices()?;
        Ok(devices
            .iter()
            .find(|d| d.bus_number() == instance.bus && d.address() == instance.address))
    }
}

impl DeviceEnumerator for UsbEnumerator {
    type Binding = UsbBinding;

    fn list_attached(&self) -> common::Result<Vec<DeviceInstance>> {
        let devices = self
            .context
            .devices()
            .map_err(|e| common::Error::Usb(e.to_string()))?;

        let instances: Vec<DeviceInstance> = devices.iter().filter_map(|d| instance_of(&d)).collect();
        debug!("Enumerated {} devices", instances.len());
        Ok(instances)
    }

    fn open(&self, instance: &DeviceInstance) -> Result<UsbBinding, OpenError> {
        let device = self
            .find(instance)
            .map_err(|e| OpenError::ConnectionFailed(e.to_string()))?
            .ok_or_else(|| OpenError::ConnectionFailed(format!("{} is no longer attached", instance)))?;

        let handle = device.open().map_err(|e| {
            warn!(device = %instance, "Failed to open device: {}", e);
            map_open_error(e)
        })?;

        let interface = self.settings.interface;

        // Detach kernel driver if active
        let detached_driver = match handle.kernel_driver_active(interface) {
            Ok(true) => {
                debug!(
                    "Detaching kernel driver from interface {} on {}",
                    interface, instance
                );
                handle
                    .detach_kernel_driver(interface)
                    .map_err(|e| {
                        warn!("Failed to detach kernel driver from interface {}: {}", interface, e);
                        map_open_error(e)
                    })?;
                true
            }
            Ok(false) => {
                debug!("No kernel driver active on interface {}", interface);
                false
            }
            Err(e) => {
                debug!(
                    "Could not check kernel driver status for interface {}: {}",
                    interface, e
                );
                false
            }
        };

        if let Err(e) = handle.claim_interface(interface) {
            warn!("Failed to claim interface {}: {}", interface, e);
            if detached_driver && let Err(e) = handle.attach_kernel_driver(interface) {
                debug!("Could not reattach kernel driver to interface {}: {}", interface, e);
            }
            return Err(map_open_error(e));
        }

        debug!("Claimed interface {} on {}", interface, instance);
        Ok(UsbBinding::new(handle, self.settings, detached_driver))
    }
}

/// Map an rusb open/claim failure to the session's open outcome
pub fn map_open_error(err: rusb::Error) -> OpenError {
    match err {
        rusb::Error::Access => OpenError::NoPermission,
        other => OpenError::ConnectionFailed(other.to_string()),
    }
}

/// Build the instance for an rusb device, if its descriptor is readable
fn instance_of<T: UsbContext>(device: &Device<T>) -> Option<DeviceInstance> {
    match device.device_descriptor() {
        Ok(desc) => Some(DeviceInstance::new(
            DeviceIdentity::new(desc.vendor_id(), desc.product_id()),
            device.bus_number(),
            device.address(),
        )),
        Err(e) => {
            debug!(
                "Skipping device without descriptor: bus={}, addr={}: {}",
                device.bus_number(),
                device.address(),
                e
            );
            None
        }
    }
}

/// Read string descriptors from device
fn read_string_descriptors(
    device: &Device<Context>,
    handle: &DeviceHandle<Context>,
) -> (Option<String>, Option<String>, Option<String>) {
    let Ok(descriptor) = device.device_descriptor() else {
        return (None, None, None);
    };

    let manufacturer = descriptor
        .manufacturer_string_index()
        .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());

    let product = descriptor
        .product_string_index()
        .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());

    let serial_number = descriptor
        .serial_number_string_index()
        .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());

    (manufacturer, product, serial_number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_maps_to_no_permission() {
        assert_eq!(map_open_error(rusb::Error::Access), OpenError::NoPermission);
    }

    #[test]
    fn test_other_errors_map_to_connection_failed() {
        for err in [rusb::Error::Busy, rusb::Error::NoDevice, rusb::Error::NotFound] {
            assert!(matches!(
                map_open_error(err),
                OpenError::ConnectionFailed(_)
            ));
        }
    }

    #[test]
    fn test_enumerator_creation() {
        // May fail without libusb access; only exercise what is available
        match Context::new() {
            Ok(context) => {
                let enumerator = UsbEnumerator::new(context, UsbSettings::default());
                assert_eq!(enumerator.settings().interface, 0);
                if let Err(e) = enumerator.list_attached() {
                    eprintln!("Device listing failed (expected without USB access): {}", e);
                }
            }
            Err(e) => {
                eprintln!("USB context creation failed (expected without libusb): {}", e);
            }
        }
    }
}
