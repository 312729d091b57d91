//! Event dispatcher
//!
//! Translates host USB notifications into device session calls. Events are
//! forwarded one at a time in the order they were received; the session's
//! own instance checks decide whether a late event still applies.
//!
//! Nothing escapes a dispatch: session errors are logged, and a panic while
//! handling one event is caught so the next event is still processed.

use crate::session::DeviceSession;
use crate::transport::{DeviceEnumerator, PermissionBroker};
use common::{ConnectionState, HostEvent, HostEventSource};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Forwards host events to one device session
pub struct EventDispatcher<E: DeviceEnumerator, P: PermissionBroker> {
    session: Arc<DeviceSession<E, P>>,
}

impl<E: DeviceEnumerator, P: PermissionBroker> Clone for EventDispatcher<E, P> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
        }
    }
}

impl<E: DeviceEnumerator, P: PermissionBroker> EventDispatcher<E, P> {
    pub fn new(session: Arc<DeviceSession<E, P>>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<DeviceSession<E, P>> {
        &self.session
    }

    /// Startup scan: connect if the bridge is already attached
    pub fn start(&self) -> ConnectionState {
        match self.session.try_connect() {
            Ok(state) => {
                info!(%state, "Initial device scan complete");
                state
            }
            Err(e) => {
                warn!("Initial connection attempt failed: {}", e);
                self.session.state()
            }
        }
    }

    /// Forward one event and return the session state afterwards
    pub fn dispatch(&self, event: HostEvent) -> ConnectionState {
        let kind = event.kind();
        let device = *event.device();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.dispatch_inner(event)
        }));

        match result {
            Ok(Ok(state)) => state,
            Ok(Err(e)) => {
                warn!(event = kind, device = %device, "Host event not applied: {}", e);
                self.session.state()
            }
            Err(e) => {
                error!(event = kind, "Panic while dispatching host event: {:?}", e);
                self.session.state()
            }
        }
    }

    /// Inner dispatch (can panic, caught by dispatch)
    fn dispatch_inner(&self, event: HostEvent) -> crate::Result<ConnectionState> {
        debug!(event = event.kind(), device = %event.device(), "Dispatching host event");

        match event {
            HostEvent::Attached(device) => self.session.on_attach(device),
            HostEvent::Detached(device) => {
                info!(device = %device, "Device detached");
                Ok(self.session.on_detach())
            }
            HostEvent::PermissionResult { device, granted } => {
                self.session.on_permission_result(granted, device)
            }
        }
    }

    /// Drain `source` until every sink is dropped
    ///
    /// Returns the number of events dispatched.
    pub async fn run(&self, source: HostEventSource) -> usize {
        info!("Event dispatcher started");

        let mut dispatched = 0;
        while let Ok(event) = source.recv().await {
            self.dispatch(event);
            dispatched += 1;
        }

        info!(dispatched, "Event dispatcher stopped");
        dispatched
    }

    /// Blocking variant of [`run`](Self::run) for a dedicated thread
    pub fn run_blocking(&self, source: HostEventSource) -> usize {
        info!("Event dispatcher started");

        let mut dispatched = 0;
        while let Ok(event) = source.recv_blocking() {
            self.dispatch(event);
            dispatched += 1;
        }

        info!(dispatched, "Event dispatcher stopped");
        dispatched
    }
}

/// Spawn a dispatcher thread draining `source`
pub fn spawn_dispatcher<E, P>(
    dispatcher: EventDispatcher<E, P>,
    source: HostEventSource,
) -> std::io::Result<std::thread::JoinHandle<usize>>
where
    E: DeviceEnumerator + 'static,
    P: PermissionBroker + 'static,
{
    std::thread::Builder::new()
        .name("event-dispatcher".to_string())
        .spawn(move || dispatcher.run_blocking(source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockBroker, MockUsb, OpenBehavior, mcp2210_instance};
    use crate::transport::PermissionBroker;
    use common::{DeviceIdentity, PermissionRequest};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Broker that panics on every request
    #[derive(Default)]
    struct PanickingBroker {
        called: Arc<AtomicBool>,
    }

    impl PermissionBroker for PanickingBroker {
        fn request_permission(&self, _request: &PermissionRequest) {
            self.called.store(true, Ordering::SeqCst);
            panic!("broker exploded");
        }
    }

    #[test]
    fn test_dispatch_contains_panics() {
        let usb = MockUsb::new();
        usb.attach(mcp2210_instance(4));
        usb.set_open_behavior(OpenBehavior::NeedPermission);
        let broker = PanickingBroker::default();
        let called = Arc::clone(&broker.called);
        let session = Arc::new(DeviceSession::new(
            DeviceIdentity::MCP2210,
            usb.enumerator(),
            broker,
        ));
        let dispatcher = EventDispatcher::new(session.clone());

        let state = dispatcher.dispatch(HostEvent::Attached(mcp2210_instance(4)));

        // State was committed before the broker call blew up
        assert!(called.load(Ordering::SeqCst));
        assert_eq!(state, ConnectionState::PermissionRequested);
        assert_eq!(usb.open_calls(), 1);

        // The session is still usable afterwards
        assert_eq!(
            dispatcher.dispatch(HostEvent::Detached(mcp2210_instance(4))),
            ConnectionState::Disconnected
        );
    }

    #[test]
    fn test_start_without_device() {
        let usb = MockUsb::new();
        let session = Arc::new(DeviceSession::new(
            DeviceIdentity::MCP2210,
            usb.enumerator(),
            MockBroker::default(),
        ));
        let dispatcher = EventDispatcher::new(session);

        assert_eq!(dispatcher.start(), ConnectionState::Disconnected);
        assert_eq!(usb.open_calls(), 0);
    }
}
