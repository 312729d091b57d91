//! Device and connection types
//!
//! These are the values that cross the boundary between the host USB
//! subsystem, the event dispatcher and the device session.

use std::fmt;

/// Microchip vendor ID
pub const MCP2210_VENDOR_ID: u16 = 0x04d8;

/// MCP2210 USB-to-SPI bridge product ID
pub const MCP2210_PRODUCT_ID: u16 = 0x00de;

/// Vendor/product pair identifying one supported bridge model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceIdentity {
    /// The MCP2210 bridge this system targets by default
    pub const MCP2210: DeviceIdentity = DeviceIdentity::new(MCP2210_VENDOR_ID, MCP2210_PRODUCT_ID);

    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self::MCP2210
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

/// One physically attached device
///
/// Two instances of the same model differ by bus position. A re-plugged
/// device gets a new address, so permission results for the old instance
/// can be told apart from the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceInstance {
    pub identity: DeviceIdentity,
    pub bus: u8,
    pub address: u8,
}

impl DeviceInstance {
    pub fn new(identity: DeviceIdentity, bus: u8, address: u8) -> Self {
        Self {
            identity,
            bus,
            address,
        }
    }

    /// Whether this instance is of the given model
    pub fn matches(&self, identity: DeviceIdentity) -> bool {
        self.identity == identity
    }
}

impl fmt::Display for DeviceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (bus {:03} addr {:03})", self.identity, self.bus, self.address)
    }
}

/// Identifier of a permission request, unique within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

/// Outstanding request for host consent to open a device instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionRequest {
    pub id: RequestId,
    pub device: DeviceInstance,
}

/// Connection state of the device session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    PermissionRequested,
    Connected,
    ConnectionFailed,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::PermissionRequested => "permission-requested",
            ConnectionState::Connected => "connected",
            ConnectionState::ConnectionFailed => "connection-failed",
        };
        f.write_str(name)
    }
}

/// A single bidirectional transfer
///
/// Lives only for the duration of one transfer call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferJob {
    /// Bytes clocked out to the bridge
    pub request: Vec<u8>,
    /// Size of the inbound buffer handed to the transport
    pub response_capacity: usize,
}

impl TransferJob {
    pub fn new(request: impl Into<Vec<u8>>, response_capacity: usize) -> Self {
        Self {
            request: request.into(),
            response_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mcp2210_identity() {
        let id = DeviceIdentity::MCP2210;
        assert_eq!(id.vendor_id, 0x4D8);
        assert_eq!(id.product_id, 0xDE);
        assert_eq!(id.to_string(), "04d8:00de");
        assert_eq!(DeviceIdentity::default(), id);
    }

    #[test]
    fn test_instance_matching() {
        let device = DeviceInstance::new(DeviceIdentity::MCP2210, 1, 7);
        assert!(device.matches(DeviceIdentity::MCP2210));
        assert!(!device.matches(DeviceIdentity::new(0x04d8, 0x00dd)));

        let replugged = DeviceInstance::new(DeviceIdentity::MCP2210, 1, 8);
        assert_ne!(device, replugged);
        assert_eq!(device.to_string(), "04d8:00de (bus 001 addr 007)");
    }

    #[test]
    fn test_default_state_is_disconnected() {
        let state = ConnectionState::default();
        assert_eq!(state, ConnectionState::Disconnected);
        assert!(!state.is_connected());
        assert!(ConnectionState::Connected.is_connected());
        assert_eq!(
            ConnectionState::PermissionRequested.to_string(),
            "permission-requested"
        );
    }

    #[test]
    fn test_transfer_job() {
        let job = TransferJob::new([10u8, 20, 30], 64);
        assert_eq!(job.request, vec![10, 20, 30]);
        assert_eq!(job.response_capacity, 64);
    }
}
