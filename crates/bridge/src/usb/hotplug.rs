//! Hot-plug notifications
//!
//! Registers a libusb hot-plug callback filtered to the bridge's
//! vendor/product pair and pumps libusb events on a dedicated thread. The
//! callback only translates arrivals and departures into `HostEvent`s; all
//! session work happens on the dispatcher side of the channel.

use common::{DeviceIdentity, DeviceInstance, HostEvent, HostEventSink};
use rusb::{Context, Device, Hotplug, HotplugBuilder, UsbContext};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How long one `handle_events` call may block before the stop flag is checked
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Background libusb event pump with a registered hot-plug callback
pub struct HotplugWatcher {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl HotplugWatcher {
    /// Register the callback and start the `usb-events` thread
    ///
    /// Fails with `NotSupported` when libusb has no hot-plug support on this
    /// platform.
    pub fn spawn(
        context: Context,
        target: DeviceIdentity,
        sink: HostEventSink,
    ) -> Result<Self, rusb::Error> {
        if !rusb::has_hotplug() {
            return Err(rusb::Error::NotSupported);
        }

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();

        let thread = std::thread::Builder::new()
            .name("usb-events".to_string())
            .spawn(move || {
                let callback: Box<dyn Hotplug<Context>> = Box::new(HotplugCallback { target, sink });

                // Registration must stay alive for as long as events are pumped
                let _registration = match HotplugBuilder::new()
                    .vendor_id(target.vendor_id)
                    .product_id(target.product_id)
                    .enumerate(false) // The dispatcher's startup scan covers present devices
                    .register(&context, callback)
                {
                    Ok(registration) => {
                        let _ = ready_tx.send(Ok(()));
                        registration
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                pump_events(&context, &thread_stop);
            })
            .map_err(|e| {
                error!("Failed to spawn USB event thread: {}", e);
                rusb::Error::Other
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!(model = %target, "Hot-plug callbacks registered");
                Ok(Self {
                    stop,
                    thread: Some(thread),
                })
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(rusb::Error::Other)
            }
        }
    }

    /// Stop pumping events and wait for the thread to exit
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            error!("USB event thread panicked");
        }
    }
}

impl Drop for HotplugWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Run libusb event handling until `stop` is set
fn pump_events(context: &Context, stop: &AtomicBool) {
    info!("USB event thread started");

    while !stop.load(Ordering::Acquire) {
        match context.handle_events(Some(EVENT_POLL_INTERVAL)) {
            Ok(()) => {}
            Err(rusb::Error::Interrupted) => {
                debug!("USB event handling interrupted");
            }
            Err(e) => {
                // Transient failures are retried rather than ending hot-plug delivery
                warn!("Error handling USB events: {}", e);
                std::thread::sleep(EVENT_POLL_INTERVAL);
            }
        }
    }

    info!("USB event thread stopped");
}

/// Hot-plug callback handler
///
/// Runs on the libusb event thread.
struct HotplugCallback {
    target: DeviceIdentity,
    sink: HostEventSink,
}

impl HotplugCallback {
    fn instance(&self, device: &Device<Context>) -> DeviceInstance {
        // Descriptors are cached by libusb, so this works after removal too
        let identity = device
            .device_descriptor()
            .map(|d| DeviceIdentity::new(d.vendor_id(), d.product_id()))
            .unwrap_or(self.target);
        DeviceInstance::new(identity, device.bus_number(), device.address())
    }

    fn forward(&self, event: HostEvent) {
        debug!(event = event.kind(), device = %event.device(), "Hot-plug callback");
        if let Err(e) = self.sink.send_blocking(event) {
            error!("Failed to forward hot-plug event: {}", e);
        }
    }
}

impl Hotplug<Context> for HotplugCallback {
    fn device_arrived(&mut self, device: Device<Context>) {
        let instance = self.instance(&device);
        self.forward(HostEvent::Attached(instance));
    }

    fn device_left(&mut self, device: Device<Context>) {
        let instance = self.instance(&device);
        self.forward(HostEvent::Detached(instance));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::create_event_bridge;

    #[test]
    fn test_watcher_lifecycle() {
        let (sink, _source) = create_event_bridge();

        // Without libusb or hot-plug support spawning fails cleanly
        let context = match Context::new() {
            Ok(context) => context,
            Err(e) => {
                eprintln!("USB context creation failed (expected without libusb): {}", e);
                return;
            }
        };

        match HotplugWatcher::spawn(context, DeviceIdentity::MCP2210, sink) {
            Ok(watcher) => watcher.stop(),
            Err(e) => eprintln!("Hot-plug unavailable: {}", e),
        }
    }
}
