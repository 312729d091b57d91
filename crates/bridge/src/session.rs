//! Device session
//!
//! Single owner of the connection to the bridge device. Tracks the
//! connection state, opens and closes the transport binding, issues
//! permission requests and runs transfers.
//!
//! State and binding live behind one mutex. Every read-modify-write of the
//! pair happens while holding it, so notifications arriving on the host
//! callback thread and calls from the application thread commit one
//! transition at a time. Transfers only hold the lock long enough to check
//! the state and clone the binding; the I/O itself runs unlocked, and a
//! detach during a transfer closes the binding underneath it.
//!
//! Observer events and broker calls are delivered after the state lock is
//! released, under a second delivery lock taken before the first is
//! dropped. Effects therefore reach the observer in commit order.

use crate::error::{OpenError, Result, SessionError, TransferError};
use crate::observer::{SessionEvent, SessionObserver, TracingObserver};
use crate::state::{Trigger, next_state};
use crate::transport::{DeviceEnumerator, PermissionBroker, TransportBinding};
use common::{
    ConnectionState, DeviceIdentity, DeviceInstance, PermissionRequest, RequestId, TransferJob,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Default size of the outbound transfer buffer
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Open binding together with the instance it was opened against
struct Connection<B> {
    device: DeviceInstance,
    binding: Arc<B>,
}

struct SessionInner<B> {
    state: ConnectionState,
    /// Some exactly when `state` is Connected
    connection: Option<Connection<B>>,
    /// Some only while `state` is PermissionRequested
    pending: Option<PermissionRequest>,
    next_request_id: u64,
}

/// Observer notifications and broker calls collected under the lock
#[derive(Default)]
struct Effects {
    events: Vec<SessionEvent>,
    permission: Option<PermissionRequest>,
}

/// Connection to one bridge device model
pub struct DeviceSession<E: DeviceEnumerator, P: PermissionBroker> {
    target: DeviceIdentity,
    buffer_size: usize,
    enumerator: E,
    broker: P,
    observer: Arc<dyn SessionObserver>,
    inner: Mutex<SessionInner<E::Binding>>,
    delivery: Mutex<()>,
}

impl<E: DeviceEnumerator, P: PermissionBroker> DeviceSession<E, P> {
    /// Create a disconnected session targeting `target`
    pub fn new(target: DeviceIdentity, enumerator: E, broker: P) -> Self {
        Self {
            target,
            buffer_size: DEFAULT_BUFFER_SIZE,
            enumerator,
            broker,
            observer: Arc::new(TracingObserver),
            inner: Mutex::new(SessionInner {
                state: ConnectionState::Disconnected,
                connection: None,
                pending: None,
                next_request_id: 1,
            }),
            delivery: Mutex::new(()),
        }
    }

    /// Replace the default tracing observer
    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Set the outbound buffer size (the largest request a transfer accepts)
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn target(&self) -> DeviceIdentity {
        self.target
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// The outstanding permission request, if any
    pub fn pending_request(&self) -> Option<PermissionRequest> {
        self.lock().pending
    }

    /// The instance the open binding belongs to
    pub fn connected_device(&self) -> Option<DeviceInstance> {
        self.lock().connection.as_ref().map(|c| c.device)
    }

    /// Look for the target among attached devices and open it
    ///
    /// Returns the resulting state. Finding no matching device is not an
    /// error; the session simply stays where it is.
    pub fn try_connect(&self) -> Result<ConnectionState> {
        let devices = self.enumerator.list_attached().map_err(|e| {
            warn!("Failed to list attached devices: {}", e);
            SessionError::Enumeration(e.to_string())
        })?;

        match devices.into_iter().find(|d| d.matches(self.target)) {
            Some(device) => self.connect(device),
            None => {
                debug!(model = %self.target, "Bridge device not attached");
                Ok(self.state())
            }
        }
    }

    /// A device arrived; connect if it is the target model
    pub fn on_attach(&self, device: DeviceInstance) -> Result<ConnectionState> {
        if !device.matches(self.target) {
            debug!(device = %device, "Ignoring attach of non-target device");
            return Ok(self.state());
        }

        info!(device = %device, "Bridge device attached");
        self.connect(device)
    }

    /// The host answered a permission request
    ///
    /// Only an answer for the outstanding request's instance is honoured.
    /// A grant is followed by exactly one open attempt.
    pub fn on_permission_result(
        &self,
        granted: bool,
        device: DeviceInstance,
    ) -> Result<ConnectionState> {
        let mut effects = Effects::default();

        let mut inner = self.lock();
        let state = inner.state;
        let pending = inner.pending;
        let result = match pending {
            Some(request)
                if request.device == device && state == ConnectionState::PermissionRequested =>
            {
                inner.pending = None;
                if granted {
                    info!(request_id = request.id.0, device = %device, "USB permission granted");
                    self.open_locked(&mut inner, device, false, &mut effects)
                } else {
                    warn!(request_id = request.id.0, device = %device, "USB permission denied");
                    commit(&mut inner, Trigger::PermissionDenied, &mut effects);
                    Err(SessionError::PermissionDenied)
                }
            }
            _ => {
                debug!(
                    device = %device,
                    granted,
                    %state,
                    "Ignoring stale permission result"
                );
                Ok(state)
            }
        };

        self.release(inner, effects);
        result
    }

    /// A device left the bus
    ///
    /// Always resets to Disconnected: the binding is closed, and a pending
    /// permission request is discarded. Which device left is not checked
    /// since at most one bridge is expected to be attached.
    pub fn on_detach(&self) -> ConnectionState {
        let mut effects = Effects::default();

        let mut inner = self.lock();
        if let Some(connection) = inner.connection.take() {
            connection.binding.close();
            info!(device = %connection.device, "Closed bridge connection");
        }
        if let Some(request) = inner.pending.take() {
            effects.events.push(SessionEvent::PermissionDiscarded(request));
        }
        commit(&mut inner, Trigger::Detached, &mut effects);
        let state = inner.state;

        self.release(inner, effects);
        state
    }

    /// Run one bidirectional transfer
    ///
    /// Fails with `NotConnected` without touching the transport unless the
    /// session is connected. A transport fault is reported but leaves the
    /// session connected.
    pub fn transfer(&self, job: &TransferJob) -> Result<Vec<u8>> {
        let binding = {
            let inner = self.lock();
            match (inner.state, inner.connection.as_ref()) {
                (ConnectionState::Connected, Some(connection)) => Arc::clone(&connection.binding),
                _ => return Err(SessionError::NotConnected),
            }
        };

        let len = job.request.len();
        if len > self.buffer_size {
            return Err(TransferError::RequestTooLarge {
                len,
                capacity: self.buffer_size,
            }
            .into());
        }
        if job.response_capacity > self.buffer_size {
            return Err(TransferError::ResponseTooLarge {
                len: job.response_capacity,
                capacity: self.buffer_size,
            }
            .into());
        }

        let mut inbound = vec![0u8; job.response_capacity];

        match binding.exchange(&job.request, &mut inbound) {
            Ok(received) => {
                inbound.truncate(received.min(job.response_capacity));
                debug!(sent = len, received = inbound.len(), "Transfer complete");
                Ok(inbound)
            }
            Err(fault) => {
                let _delivery = self.delivery_lock();
                self.observer
                    .on_event(&SessionEvent::TransferFailed(fault.clone()));
                Err(TransferError::Fault(fault).into())
            }
        }
    }

    /// Connect to a specific instance of the target model
    fn connect(&self, device: DeviceInstance) -> Result<ConnectionState> {
        let mut effects = Effects::default();

        let mut inner = self.lock();
        let pending = inner.pending;
        let result = match inner.state {
            ConnectionState::Connected => {
                debug!(device = %device, "Already connected");
                Ok(ConnectionState::Connected)
            }
            ConnectionState::PermissionRequested if pending.is_some_and(|r| r.device == device) => {
                debug!(device = %device, "Permission request already outstanding");
                Ok(ConnectionState::PermissionRequested)
            }
            _ => self.open_locked(&mut inner, device, true, &mut effects),
        };

        self.release(inner, effects);
        result
    }

    /// Single open attempt; the caller holds the lock
    ///
    /// `may_request_permission` is false on the open following a grant, so
    /// a second NoPermission fails the connection instead of looping.
    fn open_locked(
        &self,
        inner: &mut SessionInner<E::Binding>,
        device: DeviceInstance,
        may_request_permission: bool,
        effects: &mut Effects,
    ) -> Result<ConnectionState> {
        match self.enumerator.open(&device) {
            Ok(binding) => {
                inner.pending = None;
                inner.connection = Some(Connection {
                    device,
                    binding: Arc::new(binding),
                });
                commit(inner, Trigger::OpenSucceeded, effects);
                info!(device = %device, "Bridge connection opened");
                Ok(inner.state)
            }
            Err(OpenError::NoPermission) if may_request_permission => {
                let request = PermissionRequest {
                    id: RequestId(inner.next_request_id),
                    device,
                };
                inner.next_request_id += 1;
                inner.pending = Some(request);
                commit(inner, Trigger::PermissionNeeded, effects);
                effects.events.push(SessionEvent::PermissionRequested(request));
                effects.permission = Some(request);
                Ok(inner.state)
            }
            Err(err) => {
                inner.pending = None;
                commit(inner, Trigger::OpenFailed, effects);
                warn!(device = %device, error = %err, "Bridge connection failed");
                Err(SessionError::ConnectionFailed {
                    reason: err.to_string(),
                })
            }
        }
    }

    /// Drop the state lock and deliver `effects` in commit order
    fn release(&self, inner: MutexGuard<'_, SessionInner<E::Binding>>, effects: Effects) {
        let _delivery = self.delivery_lock();
        drop(inner);
        self.flush(effects);
    }

    /// Deliver effects; the caller holds the delivery lock
    fn flush(&self, effects: Effects) {
        // Broker first: a panicking observer must not leave the request unsent
        if let Some(request) = effects.permission {
            self.broker.request_permission(&request);
        }
        for event in &effects.events {
            self.observer.on_event(event);
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner<E::Binding>> {
        // A panicking observer must not wedge the session
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn delivery_lock(&self) -> MutexGuard<'_, ()> {
        self.delivery.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E: DeviceEnumerator, P: PermissionBroker> Drop for DeviceSession<E, P> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(connection) = inner.connection.take() {
            connection.binding.close();
        }
    }
}

/// Apply `trigger` through the transition table
fn commit<B>(inner: &mut SessionInner<B>, trigger: Trigger, effects: &mut Effects) {
    let from = inner.state;
    match next_state(from, trigger) {
        Some(to) => {
            inner.state = to;
            if from != to {
                effects
                    .events
                    .push(SessionEvent::StateChanged { from, to, trigger });
            }
        }
        None => warn!(%from, %trigger, "Rejected state transition"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockBinding;

    fn inner(state: ConnectionState) -> SessionInner<MockBinding> {
        SessionInner {
            state,
            connection: None,
            pending: None,
            next_request_id: 1,
        }
    }

    #[test]
    fn test_commit_records_transition() {
        let mut inner = inner(ConnectionState::Disconnected);
        let mut effects = Effects::default();

        commit(&mut inner, Trigger::OpenSucceeded, &mut effects);

        assert_eq!(inner.state, ConnectionState::Connected);
        assert_eq!(
            effects.events,
            vec![SessionEvent::StateChanged {
                from: ConnectionState::Disconnected,
                to: ConnectionState::Connected,
                trigger: Trigger::OpenSucceeded,
            }]
        );
    }

    #[test]
    fn test_commit_rejects_unknown_transition() {
        let mut inner = inner(ConnectionState::Connected);
        let mut effects = Effects::default();

        commit(&mut inner, Trigger::PermissionDenied, &mut effects);

        assert_eq!(inner.state, ConnectionState::Connected);
        assert!(effects.events.is_empty());
    }

    #[test]
    fn test_commit_self_loop_is_silent() {
        let mut inner = inner(ConnectionState::Disconnected);
        let mut effects = Effects::default();

        commit(&mut inner, Trigger::Detached, &mut effects);

        assert_eq!(inner.state, ConnectionState::Disconnected);
        assert!(effects.events.is_empty());
    }
}
