//! Bridge configuration management

use crate::usb::UsbSettings;
use anyhow::{Context, Result, anyhow};
use common::DeviceIdentity;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub bridge: BridgeSettings,
    #[serde(default)]
    pub device: DeviceSettings,
    #[serde(default)]
    pub transfer: TransferSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSettings {
    #[serde(default = "BridgeSettings::default_log_level")]
    pub log_level: String,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

impl BridgeSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

/// Which device to connect to and how to reach it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Vendor ID as a hex string, e.g. "0x04d8"
    #[serde(default = "DeviceSettings::default_vendor_id")]
    pub vendor_id: String,
    /// Product ID as a hex string, e.g. "0x00de"
    #[serde(default = "DeviceSettings::default_product_id")]
    pub product_id: String,
    /// HID interface carrying the bridge's reports
    #[serde(default)]
    pub interface: u8,
    /// Delay before re-probing access after a permission request
    #[serde(default = "DeviceSettings::default_permission_probe_ms")]
    pub permission_probe_ms: u64,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            vendor_id: Self::default_vendor_id(),
            product_id: Self::default_product_id(),
            interface: 0,
            permission_probe_ms: Self::default_permission_probe_ms(),
        }
    }
}

impl DeviceSettings {
    fn default_vendor_id() -> String {
        format!("{:#06x}", common::types::MCP2210_VENDOR_ID)
    }

    fn default_product_id() -> String {
        format!("{:#06x}", common::types::MCP2210_PRODUCT_ID)
    }

    fn default_permission_probe_ms() -> u64 {
        500
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSettings {
    /// Outbound buffer size; larger requests are rejected
    #[serde(default = "TransferSettings::default_buffer_size")]
    pub buffer_size: usize,
    /// Timeout per interrupt transfer in milliseconds
    #[serde(default = "TransferSettings::default_timeout_ms")]
    pub timeout_ms: u64,
    /// Interrupt OUT endpoint address (decimal in TOML, e.g. 1)
    #[serde(default = "TransferSettings::default_out_endpoint")]
    pub out_endpoint: u8,
    /// Interrupt IN endpoint address (decimal in TOML, e.g. 129 for 0x81)
    #[serde(default = "TransferSettings::default_in_endpoint")]
    pub in_endpoint: u8,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            buffer_size: Self::default_buffer_size(),
            timeout_ms: Self::default_timeout_ms(),
            out_endpoint: Self::default_out_endpoint(),
            in_endpoint: Self::default_in_endpoint(),
        }
    }
}

impl TransferSettings {
    fn default_buffer_size() -> usize {
        crate::session::DEFAULT_BUFFER_SIZE
    }

    fn default_timeout_ms() -> u64 {
        1000
    }

    fn default_out_endpoint() -> u8 {
        0x01
    }

    fn default_in_endpoint() -> u8 {
        0x81
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bridge: BridgeSettings::default(),
            device: DeviceSettings::default(),
            transfer: TransferSettings::default(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).as_ref())
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/spi-bridge/bridge.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Parse and validate a TOML document
    pub fn parse(content: &str) -> Result<Self> {
        let config: BridgeConfig = toml::from_str(content).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {:#}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("spi-bridge").join("bridge.toml")
        } else {
            PathBuf::from(".config/spi-bridge/bridge.toml")
        }
    }

    /// The device model to connect to
    pub fn identity(&self) -> Result<DeviceIdentity> {
        Ok(DeviceIdentity::new(
            Self::parse_hex_id(&self.device.vendor_id, "vendor_id")?,
            Self::parse_hex_id(&self.device.product_id, "product_id")?,
        ))
    }

    /// Interface/endpoint layout for the USB binding
    pub fn usb_settings(&self) -> UsbSettings {
        UsbSettings {
            interface: self.device.interface,
            out_endpoint: self.transfer.out_endpoint,
            in_endpoint: self.transfer.in_endpoint,
            timeout: Duration::from_millis(self.transfer.timeout_ms),
        }
    }

    pub fn permission_probe_delay(&self) -> Duration {
        Duration::from_millis(self.device.permission_probe_ms)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.bridge.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.bridge.log_level,
                valid_levels.join(", ")
            ));
        }

        self.identity()?;

        if self.transfer.buffer_size == 0 {
            return Err(anyhow!("transfer.buffer_size must be greater than 0"));
        }

        if self.transfer.out_endpoint & 0x80 != 0 {
            return Err(anyhow!(
                "Invalid out_endpoint {:#04x}, direction bit must be clear",
                self.transfer.out_endpoint
            ));
        }

        if self.transfer.in_endpoint & 0x80 == 0 {
            return Err(anyhow!(
                "Invalid in_endpoint {:#04x}, direction bit must be set",
                self.transfer.in_endpoint
            ));
        }

        Ok(())
    }

    /// Parse a hex ID (VID or PID)
    fn parse_hex_id(id: &str, name: &str) -> Result<u16> {
        let hex_part = id
            .strip_prefix("0x")
            .or_else(|| id.strip_prefix("0X"))
            .ok_or_else(|| {
                anyhow!(
                    "Invalid {} '{}', must start with '0x' (e.g., '0x04d8')",
                    name,
                    id
                )
            })?;

        if hex_part.is_empty() || hex_part.len() > 4 {
            return Err(anyhow!(
                "Invalid {} '{}', hex part must be 1-4 digits",
                name,
                id
            ));
        }

        u16::from_str_radix(hex_part, 16)
            .map_err(|_| anyhow!("Invalid {} '{}', not a valid hex number", name, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.bridge.log_level, "info");
        assert_eq!(config.device.vendor_id, "0x04d8");
        assert_eq!(config.device.product_id, "0x00de");
        assert_eq!(config.identity().unwrap(), DeviceIdentity::MCP2210);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_hex_id() {
        assert_eq!(BridgeConfig::parse_hex_id("0x04d8", "VID").unwrap(), 0x04d8);
        assert_eq!(BridgeConfig::parse_hex_id("0XDE", "PID").unwrap(), 0xde);
        assert!(BridgeConfig::parse_hex_id("04d8", "VID").is_err());
        assert!(BridgeConfig::parse_hex_id("0x", "VID").is_err());
        assert!(BridgeConfig::parse_hex_id("0x12345", "VID").is_err());
        assert!(BridgeConfig::parse_hex_id("0xGHIJ", "VID").is_err());
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = BridgeConfig::default();
        config.bridge.log_level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.bridge.log_level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_endpoints() {
        let mut config = BridgeConfig::default();
        config.transfer.out_endpoint = 0x81;
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::default();
        config.transfer.in_endpoint = 0x01;
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::default();
        config.transfer.buffer_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_usb_settings() {
        let mut config = BridgeConfig::default();
        config.transfer.timeout_ms = 250;
        config.device.interface = 1;

        let settings = config.usb_settings();
        assert_eq!(settings.interface, 1);
        assert_eq!(settings.out_endpoint, 0x01);
        assert_eq!(settings.in_endpoint, 0x81);
        assert_eq!(settings.timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_config_serialization() {
        let config = BridgeConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed = BridgeConfig::parse(&toml_str).unwrap();

        assert_eq!(config.bridge.log_level, parsed.bridge.log_level);
        assert_eq!(config.device.vendor_id, parsed.device.vendor_id);
        assert_eq!(config.transfer.buffer_size, parsed.transfer.buffer_size);
    }
}
