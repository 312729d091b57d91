//! Test utilities for spi-bridge
//!
//! Provides mock collaborators for driving a [`DeviceSession`] without USB
//! hardware, and helpers shared by unit and integration tests.
//!
//! # Example
//!
//! ```
//! use bridge::test_utils::{MockBroker, MockUsb, mcp2210_instance};
//! use bridge::DeviceSession;
//! use common::{ConnectionState, DeviceIdentity};
//!
//! let usb = MockUsb::new();
//! usb.attach(mcp2210_instance(5));
//!
//! let session = DeviceSession::new(DeviceIdentity::MCP2210, usb.enumerator(), MockBroker::default());
//! assert_eq!(session.try_connect().unwrap(), ConnectionState::Connected);
//! ```
//!
//! [`DeviceSession`]: crate::DeviceSession

use crate::error::{OpenError, TransferFault};
use crate::observer::{SessionEvent, SessionObserver};
use crate::transport::{DeviceEnumerator, PermissionBroker, TransportBinding};
use common::{ConnectionState, DeviceIdentity, DeviceInstance, PermissionRequest};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Instance of the MCP2210 bridge on bus 1
pub fn mcp2210_instance(address: u8) -> DeviceInstance {
    DeviceInstance::new(DeviceIdentity::MCP2210, 1, address)
}

/// Instance of some other device on bus 1
pub fn foreign_instance(address: u8) -> DeviceInstance {
    DeviceInstance::new(DeviceIdentity::new(0x1234, 0x5678), 1, address)
}

/// Outcome the mock transport gives an open attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenBehavior {
    Succeed,
    Fail,
    NeedPermission,
}

type ExchangeHook = Box<dyn FnOnce() + Send>;

struct MockUsbState {
    attached: Mutex<Vec<DeviceInstance>>,
    open_script: Mutex<VecDeque<OpenBehavior>>,
    default_open: Mutex<OpenBehavior>,
    list_fails: AtomicBool,
    open_calls: AtomicUsize,
    exchange_calls: AtomicUsize,
    close_calls: AtomicUsize,
    response: Mutex<Result<Vec<u8>, TransferFault>>,
    sent: Mutex<Vec<Vec<u8>>>,
    exchange_hook: Mutex<Option<ExchangeHook>>,
}

/// Simulated USB bus and bridge device
///
/// Clones share state, so a test keeps one handle for inspection after
/// moving the enumerator into a session.
#[derive(Clone)]
pub struct MockUsb {
    state: Arc<MockUsbState>,
}

impl Default for MockUsb {
    fn default() -> Self {
        Self::new()
    }
}

impl MockUsb {
    /// Empty bus; opens succeed and exchanges return no data
    pub fn new() -> Self {
        Self {
            state: Arc::new(MockUsbState {
                attached: Mutex::new(Vec::new()),
                open_script: Mutex::new(VecDeque::new()),
                default_open: Mutex::new(OpenBehavior::Succeed),
                list_fails: AtomicBool::new(false),
                open_calls: AtomicUsize::new(0),
                exchange_calls: AtomicUsize::new(0),
                close_calls: AtomicUsize::new(0),
                response: Mutex::new(Ok(Vec::new())),
                sent: Mutex::new(Vec::new()),
                exchange_hook: Mutex::new(None),
            }),
        }
    }

    pub fn enumerator(&self) -> MockEnumerator {
        MockEnumerator { usb: self.clone() }
    }

    pub fn attach(&self, device: DeviceInstance) {
        self.state.attached.lock().unwrap().push(device);
    }

    pub fn detach(&self, device: DeviceInstance) {
        self.state.attached.lock().unwrap().retain(|d| *d != device);
    }

    /// Outcome for every open not covered by [`script_open`](Self::script_open)
    pub fn set_open_behavior(&self, behavior: OpenBehavior) {
        *self.state.default_open.lock().unwrap() = behavior;
    }

    /// Queue the outcome of the next open attempt
    pub fn script_open(&self, behavior: OpenBehavior) {
        self.state.open_script.lock().unwrap().push_back(behavior);
    }

    pub fn fail_listing(&self, fail: bool) {
        self.state.list_fails.store(fail, Ordering::SeqCst);
    }

    /// What every exchange returns from now on
    pub fn set_response(&self, response: Result<Vec<u8>, TransferFault>) {
        *self.state.response.lock().unwrap() = response;
    }

    /// Run `hook` at the start of the next exchange, before the binding
    /// checks whether it was closed
    pub fn on_next_exchange(&self, hook: impl FnOnce() + Send + 'static) {
        *self.state.exchange_hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn open_calls(&self) -> usize {
        self.state.open_calls.load(Ordering::SeqCst)
    }

    pub fn exchange_calls(&self) -> usize {
        self.state.exchange_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.state.close_calls.load(Ordering::SeqCst)
    }

    /// Outbound payloads of all completed exchanges
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state.sent.lock().unwrap().clone()
    }

    fn next_open(&self) -> OpenBehavior {
        self.state
            .open_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(*self.state.default_open.lock().unwrap())
    }
}

/// Enumerator over a [`MockUsb`] bus
pub struct MockEnumerator {
    usb: MockUsb,
}

impl DeviceEnumerator for MockEnumerator {
    type Binding = MockBinding;

    fn list_attached(&self) -> common::Result<Vec<DeviceInstance>> {
        if self.usb.state.list_fails.load(Ordering::SeqCst) {
            return Err(common::Error::Usb("mock enumeration failure".to_string()));
        }
        Ok(self.usb.state.attached.lock().unwrap().clone())
    }

    fn open(&self, device: &DeviceInstance) -> Result<MockBinding, OpenError> {
        self.usb.state.open_calls.fetch_add(1, Ordering::SeqCst);

        if !self.usb.state.attached.lock().unwrap().contains(device) {
            return Err(OpenError::ConnectionFailed(format!("{} not attached", device)));
        }

        match self.usb.next_open() {
            OpenBehavior::Succeed => Ok(MockBinding {
                usb: self.usb.clone(),
                closed: AtomicBool::new(false),
            }),
            OpenBehavior::Fail => Err(OpenError::ConnectionFailed("mock open failure".to_string())),
            OpenBehavior::NeedPermission => Err(OpenError::NoPermission),
        }
    }
}

/// Binding opened by [`MockEnumerator`]
pub struct MockBinding {
    usb: MockUsb,
    closed: AtomicBool,
}

impl TransportBinding for MockBinding {
    fn exchange(&self, outbound: &[u8], inbound: &mut [u8]) -> Result<usize, TransferFault> {
        let hook = self.usb.state.exchange_hook.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }

        if self.closed.load(Ordering::SeqCst) {
            return Err(TransferFault::Closed);
        }

        self.usb.state.exchange_calls.fetch_add(1, Ordering::SeqCst);
        self.usb.state.sent.lock().unwrap().push(outbound.to_vec());

        let response = self.usb.state.response.lock().unwrap().clone();
        let data = response?;
        let len = data.len().min(inbound.len());
        inbound[..len].copy_from_slice(&data[..len]);
        Ok(len)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.usb.state.close_calls.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Broker recording every permission request
#[derive(Clone, Default)]
pub struct MockBroker {
    requests: Arc<Mutex<Vec<PermissionRequest>>>,
}

impl MockBroker {
    pub fn requests(&self) -> Vec<PermissionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl PermissionBroker for MockBroker {
    fn request_permission(&self, request: &PermissionRequest) {
        self.requests.lock().unwrap().push(*request);
    }
}

/// Observer keeping every event it sees
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<SessionEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Committed state changes, in order
    pub fn transitions(&self) -> Vec<(ConnectionState, ConnectionState)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SessionEvent::StateChanged { from, to, .. } => Some((from, to)),
                _ => None,
            })
            .collect()
    }
}

impl SessionObserver for RecordingObserver {
    fn on_event(&self, event: &SessionEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Run a future with a timeout
///
/// # Example
/// ```
/// use bridge::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let value = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await.unwrap();
/// assert_eq!(value, 42);
/// # }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_open_script_then_default() {
        let usb = MockUsb::new();
        let device = mcp2210_instance(2);
        usb.attach(device);
        usb.script_open(OpenBehavior::NeedPermission);

        let enumerator = usb.enumerator();
        assert_eq!(enumerator.open(&device).err(), Some(OpenError::NoPermission));
        assert!(enumerator.open(&device).is_ok());
        assert_eq!(usb.open_calls(), 2);
    }

    #[test]
    fn test_mock_open_requires_attached_device() {
        let usb = MockUsb::new();
        let result = usb.enumerator().open(&mcp2210_instance(2));
        assert!(matches!(result, Err(OpenError::ConnectionFailed(_))));
    }

    #[test]
    fn test_mock_binding_close_is_idempotent() {
        let usb = MockUsb::new();
        let device = mcp2210_instance(2);
        usb.attach(device);
        let binding = usb.enumerator().open(&device).unwrap();

        binding.close();
        binding.close();

        assert_eq!(usb.close_calls(), 1);
        let mut inbound = [0u8; 4];
        assert_eq!(binding.exchange(&[1], &mut inbound), Err(TransferFault::Closed));
        assert_eq!(usb.exchange_calls(), 0);
    }

    #[test]
    fn test_mock_exchange_truncates_to_inbound() {
        let usb = MockUsb::new();
        let device = mcp2210_instance(2);
        usb.attach(device);
        usb.set_response(Ok(vec![1, 2, 3, 4, 5]));
        let binding = usb.enumerator().open(&device).unwrap();

        let mut inbound = [0u8; 3];
        assert_eq!(binding.exchange(&[9], &mut inbound), Ok(3));
        assert_eq!(inbound, [1, 2, 3]);
        assert_eq!(usb.sent(), vec![vec![9]]);
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
        })
        .await;

        assert!(result.is_err());
    }
}
