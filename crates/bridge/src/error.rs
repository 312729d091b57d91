//! Session error types

use thiserror::Error;

/// Fault reported by the transport binding during an exchange
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferFault {
    /// The binding was closed (device detached or session reset)
    #[error("transport closed")]
    Closed,

    /// The device did not answer in time
    #[error("transfer timed out")]
    Timeout,

    /// The device went away during the exchange
    #[error("device disconnected")]
    Disconnected,

    /// Endpoint halted
    #[error("endpoint stalled")]
    Stall,

    /// Fewer bytes were accepted than were sent
    #[error("short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    /// Any other I/O failure
    #[error("I/O fault: {0}")]
    Io(String),
}

/// Transfer failures while the session is connected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("transfer fault: {0}")]
    Fault(#[from] TransferFault),

    #[error("request of {len} bytes exceeds the {capacity}-byte outbound buffer")]
    RequestTooLarge { len: usize, capacity: usize },

    #[error("response capacity of {len} bytes exceeds the {capacity}-byte limit")]
    ResponseTooLarge { len: usize, capacity: usize },
}

/// Result of a failed open attempt
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OpenError {
    /// The host requires user consent before the device can be opened
    #[error("no USB permission")]
    NoPermission,

    #[error("connection failed: {0}")]
    ConnectionFailed(String),
}

/// Errors reported by the device session
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Transfer attempted while not connected; reconnect and retry
    #[error("device not connected")]
    NotConnected,

    /// Open attempt failed; needs a new attach or an explicit reconnect
    #[error("connection failed: {reason}")]
    ConnectionFailed { reason: String },

    /// The user refused access to the device
    #[error("USB permission denied")]
    PermissionDenied,

    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// Listing attached devices failed
    #[error("device enumeration failed: {0}")]
    Enumeration(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;
