//! HID interrupt transport binding
//!
//! One exchange is an interrupt OUT write of the request followed by an
//! interrupt IN read of the response. The byte layout of the bridge's SPI
//! commands is the caller's business; the binding moves opaque buffers.

use super::UsbSettings;
use crate::error::TransferFault;
use crate::transport::TransportBinding;
use rusb::{Context, DeviceHandle};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Open, claimed bridge interface
pub struct UsbBinding {
    handle: DeviceHandle<Context>,
    settings: UsbSettings,
    /// The kernel driver was detached on open and is handed back on close
    reattach_driver: bool,
    closed: AtomicBool,
}

impl UsbBinding {
    pub(crate) fn new(handle: DeviceHandle<Context>, settings: UsbSettings, reattach_driver: bool) -> Self {
        Self {
            handle,
            settings,
            reattach_driver,
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl TransportBinding for UsbBinding {
    fn exchange(&self, outbound: &[u8], inbound: &mut [u8]) -> Result<usize, TransferFault> {
        if self.is_closed() {
            return Err(TransferFault::Closed);
        }

        let timeout = self.settings.timeout;

        debug!(
            "Interrupt exchange: out={:#x}, in={:#x}, out_len={}, in_len={}",
            self.settings.out_endpoint,
            self.settings.in_endpoint,
            outbound.len(),
            inbound.len()
        );

        let written = self
            .handle
            .write_interrupt(self.settings.out_endpoint, outbound, timeout)
            .map_err(map_rusb_fault)?;
        if written != outbound.len() {
            return Err(TransferFault::ShortWrite {
                written,
                expected: outbound.len(),
            });
        }

        if inbound.is_empty() {
            return Ok(0);
        }

        let received = self
            .handle
            .read_interrupt(self.settings.in_endpoint, inbound, timeout)
            .map_err(map_rusb_fault)?;

        debug!("Interrupt exchange succeeded: {} bytes received", received);
        Ok(received)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let interface = self.settings.interface;
        // The device may already be gone; release failures are expected then
        if let Err(e) = self.handle.release_interface(interface) {
            debug!("Could not release interface {}: {}", interface, e);
        }

        // Reattach kernel driver to restore device to kernel control
        if self.reattach_driver {
            match self.handle.attach_kernel_driver(interface) {
                Ok(()) => debug!("Reattached kernel driver to interface {}", interface),
                Err(rusb::Error::NoDevice) => {}
                Err(e) => warn!("Could not reattach kernel driver to interface {}: {}", interface, e),
            }
        }

        debug!("Closed USB binding");
    }
}

impl Drop for UsbBinding {
    fn drop(&mut self) {
        self.close();
    }
}

/// Map rusb transfer errors to transport faults
pub fn map_rusb_fault(err: rusb::Error) -> TransferFault {
    match err {
        rusb::Error::Timeout => TransferFault::Timeout,
        rusb::Error::NoDevice | rusb::Error::NotFound => TransferFault::Disconnected,
        rusb::Error::Pipe => TransferFault::Stall,
        other => TransferFault::Io(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_rusb_fault() {
        assert_eq!(map_rusb_fault(rusb::Error::Timeout), TransferFault::Timeout);
        assert_eq!(map_rusb_fault(rusb::Error::NoDevice), TransferFault::Disconnected);
        assert_eq!(map_rusb_fault(rusb::Error::Pipe), TransferFault::Stall);
        assert!(matches!(
            map_rusb_fault(rusb::Error::Overflow),
            TransferFault::Io(_)
        ));
    }
}
