//! Integration tests for configuration parsing
//!
//! Tests bridge configuration files, including:
//! - Minimal and full documents
//! - Defaults for omitted sections
//! - Invalid configuration handling
//! - Save/load through the filesystem

use bridge::BridgeConfig;
use common::DeviceIdentity;
use std::time::Duration;

const FULL_CONFIG: &str = r#"
[bridge]
log_level = "debug"

[device]
vendor_id = "0x04d8"
product_id = "0x00df"
interface = 1
permission_probe_ms = 250

[transfer]
buffer_size = 64
timeout_ms = 500
out_endpoint = 2
in_endpoint = 130
"#;

#[test]
fn test_parse_full_config() {
    let config = BridgeConfig::parse(FULL_CONFIG).unwrap();

    assert_eq!(config.bridge.log_level, "debug");
    assert_eq!(config.identity().unwrap(), DeviceIdentity::new(0x04d8, 0x00df));
    assert_eq!(config.permission_probe_delay(), Duration::from_millis(250));
    assert_eq!(config.transfer.buffer_size, 64);

    let settings = config.usb_settings();
    assert_eq!(settings.interface, 1);
    assert_eq!(settings.out_endpoint, 0x02);
    assert_eq!(settings.in_endpoint, 0x82);
    assert_eq!(settings.timeout, Duration::from_millis(500));
}

#[test]
fn test_empty_config_uses_defaults() {
    let config = BridgeConfig::parse("").unwrap();

    assert_eq!(config.bridge.log_level, "info");
    assert_eq!(config.identity().unwrap(), DeviceIdentity::MCP2210);
    assert_eq!(config.transfer.buffer_size, bridge::DEFAULT_BUFFER_SIZE);
    assert_eq!(config.permission_probe_delay(), Duration::from_millis(500));
}

#[test]
fn test_partial_section_fills_defaults() {
    let config = BridgeConfig::parse(
        r#"
[transfer]
timeout_ms = 2000
"#,
    )
    .unwrap();

    assert_eq!(config.transfer.timeout_ms, 2000);
    assert_eq!(config.transfer.out_endpoint, 0x01);
    assert_eq!(config.transfer.in_endpoint, 0x81);
}

#[test]
fn test_invalid_configs_rejected() {
    let invalid = [
        "[bridge]\nlog_level = \"loud\"\n",
        "[device]\nvendor_id = \"04d8\"\n",
        "[device]\nproduct_id = \"0xzz\"\n",
        "[transfer]\nbuffer_size = 0\n",
        "[transfer]\nin_endpoint = 1\n",
        "[transfer]\nout_endpoint = 129\n",
        "[transfer]\nbuffer_size = \"big\"\n",
    ];

    for content in invalid {
        assert!(
            BridgeConfig::parse(content).is_err(),
            "accepted invalid config: {}",
            content
        );
    }
}

#[test]
fn test_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("bridge.toml");

    let mut config = BridgeConfig::default();
    config.bridge.log_level = "trace".to_string();
    config.device.product_id = "0x00df".to_string();
    config.save(&path).unwrap();

    assert!(path.exists());

    let loaded = BridgeConfig::load(Some(path)).unwrap();
    assert_eq!(loaded.bridge.log_level, "trace");
    assert_eq!(loaded.identity().unwrap(), DeviceIdentity::new(0x04d8, 0x00df));
}

#[test]
fn test_load_missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let result = BridgeConfig::load(Some(dir.path().join("absent.toml")));
    assert!(result.is_err());
}

#[test]
fn test_load_invalid_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bridge.toml");
    std::fs::write(&path, "[transfer]\nbuffer_size = 0\n").unwrap();

    let err = BridgeConfig::load(Some(path)).unwrap_err();
    assert!(format!("{:#}", err).contains("buffer_size"));
}
