//! Common types for spi-bridge
//!
//! This crate provides what both the connection core and its host glue
//! share: device identity and connection state types, the host-event
//! channel bridge between the USB callback thread and the dispatcher,
//! error handling and logging setup.

pub mod channel;
pub mod error;
pub mod logging;
pub mod types;

pub use channel::{HostEvent, HostEventSink, HostEventSource, create_event_bridge};
pub use error::{Error, Result};
pub use logging::setup_logging;
pub use types::{
    ConnectionState, DeviceIdentity, DeviceInstance, PermissionRequest, RequestId, TransferJob,
};
