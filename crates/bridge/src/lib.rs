//! spi-bridge
//!
//! Host-side connection management for a USB-to-SPI bridge (MCP2210 by
//! default). A [`DeviceSession`] owns the connection to the bridge and
//! tracks it through a small state machine; an [`EventDispatcher`] feeds it
//! hot-plug and permission notifications from the host USB stack.
//!
//! # Architecture
//!
//! ```text
//! usb-events thread ──┐
//!                     ├─> HostEventSink ─> HostEventSource ─> EventDispatcher ─> DeviceSession
//! usb-permission ─────┘                                                               │
//!                                                          application ── transfer() ─┘
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod observer;
pub mod session;
pub mod state;
pub mod test_utils;
pub mod transport;
pub mod usb;

pub use config::BridgeConfig;
pub use dispatcher::{EventDispatcher, spawn_dispatcher};
pub use error::{OpenError, Result, SessionError, TransferError, TransferFault};
pub use observer::{ChannelObserver, SessionEvent, SessionObserver, TracingObserver};
pub use session::{DEFAULT_BUFFER_SIZE, DeviceSession};
pub use state::{TRANSITIONS, Trigger, next_state};
pub use transport::{DeviceEnumerator, PermissionBroker, TransportBinding};
