//! Integration tests for configuration parsing
//!
//! Loads complete and partial config files from disk and checks the values
//! handed to the transport and firmware layers.

use cli::config::Config;
use std::fs;
use std::time::Duration;
use tempfile::tempdir;
use transport::LineCoding;

const FULL_CONFIG: &str = r#"
[general]
log_level = "debug"

[usb]
extra_devices = ["0x1234:0x5678", "0X2aad:0x0001"]
baud_rate = 921600
data_bits = 8
stop_bits = 0
parity = 0
control_timeout_ms = 250

[permission]
timeout_secs = 5

[firmware]
min_wait_after_restart_ms = 3000
max_wait_after_restart_ms = 12000
probe_interval_ms = 500
image_dir = "/opt/rsid/firmware"
"#;

fn write_config(content: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, content).unwrap();
    (dir, path)
}

#[test]
fn test_load_full_config() {
    let (_dir, path) = write_config(FULL_CONFIG);
    let config = Config::load(Some(path)).unwrap();

    assert_eq!(config.general.log_level, "debug");
    assert_eq!(
        config.line_coding(),
        LineCoding {
            baud_rate: 921_600,
            stop_bits: 0,
            parity: 0,
            data_bits: 8,
        }
    );
    assert_eq!(config.control_timeout(), Duration::from_millis(250));
    assert_eq!(config.permission_timeout(), Duration::from_secs(5));

    let registry = config.registry().unwrap();
    assert!(registry.contains(0x1234, 0x5678));
    assert!(registry.contains(0x2aad, 0x0001));
    assert!(registry.contains(10925, 25462));
    assert!(registry.contains(10925, 25459));

    let options = config.update_options().unwrap();
    assert!(!options.force_full);
    assert_eq!(options.reboot_wait.min_wait, Duration::from_millis(3000));
    assert_eq!(options.reboot_wait.probe_interval, Duration::from_millis(500));
    assert_eq!(options.reboot_wait.max_wait, Duration::from_millis(12000));
    assert_eq!(
        config.image_dir().unwrap(),
        std::path::PathBuf::from("/opt/rsid/firmware")
    );
}

#[test]
fn test_load_empty_config_uses_defaults() {
    let (_dir, path) = write_config("");
    let config = Config::load(Some(path)).unwrap();

    assert_eq!(config.general.log_level, "info");
    assert_eq!(config.line_coding(), LineCoding::default());
    assert_eq!(config.permission_timeout(), Duration::from_secs(30));
    assert_eq!(config.reboot_wait().min_wait, Duration::from_millis(7000));
    assert_eq!(config.reboot_wait().max_wait, Duration::from_millis(30000));
    assert!(config.image_dir().is_none());
    assert_eq!(config.registry().unwrap().entries().len(), 2);
}

#[test]
fn test_reject_invalid_values() {
    let cases = [
        "[general]\nlog_level = \"loud\"\n",
        "[usb]\nextra_devices = [\"2aad:6373\"]\n",
        "[usb]\nbaud_rate = 0\n",
        "[usb]\nparity = 9\n",
        "[firmware]\nprobe_interval_ms = 0\n",
        "[firmware]\nmin_wait_after_restart_ms = 9000\nmax_wait_after_restart_ms = 1000\n",
    ];

    for case in cases {
        let (_dir, path) = write_config(case);
        assert!(Config::load(Some(path)).is_err(), "accepted: {}", case);
    }
}

#[test]
fn test_reject_malformed_toml() {
    let (_dir, path) = write_config("[usb\nbaud_rate = ");
    assert!(Config::load(Some(path)).is_err());
}

#[test]
fn test_saved_config_reloads() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = Config::default();
    config.usb.extra_devices.push("0xabcd:0x0042".to_string());
    config.firmware.probe_interval_ms = 250;
    config.save(&path).unwrap();

    let loaded = Config::load(Some(path)).unwrap();
    assert_eq!(loaded.firmware.probe_interval_ms, 250);
    assert!(loaded.registry().unwrap().contains(0xabcd, 0x0042));
}
