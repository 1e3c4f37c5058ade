//! Supported device registry
//!
//! Fixed list of VID/PID pairs identifying RealSense ID peripherals. The
//! registry is built once at start-up and never mutated afterwards; callers
//! that need more entries (from configuration) build a new registry.

use crate::host::AttachedDevice;
use serde::{Deserialize, Serialize};

/// Built-in supported devices as (VID, PID)
pub const BUILTIN_DEVICES: &[(u16, u16)] = &[(10925, 25462), (10925, 25459)];

/// One supported peripheral
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedDeviceDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl SupportedDeviceDescriptor {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Check whether this entry identifies the given VID/PID pair
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

/// Registry of supported devices
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRegistry {
    entries: Vec<SupportedDeviceDescriptor>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl DeviceRegistry {
    /// Registry holding only the built-in devices
    pub fn builtin() -> Self {
        Self {
            entries: BUILTIN_DEVICES
                .iter()
                .map(|&(vid, pid)| SupportedDeviceDescriptor::new(vid, pid))
                .collect(),
        }
    }

    /// Registry with explicit entries
    pub fn from_entries(entries: Vec<SupportedDeviceDescriptor>) -> Self {
        Self { entries }
    }

    /// Extend the registry with additional entries, skipping duplicates
    pub fn with_extra(mut self, extra: impl IntoIterator<Item = SupportedDeviceDescriptor>) -> Self {
        for entry in extra {
            if !self.contains(entry.vendor_id, entry.product_id) {
                self.entries.push(entry);
            }
        }
        self
    }

    pub fn entries(&self) -> &[SupportedDeviceDescriptor] {
        &self.entries
    }

    pub fn contains(&self, vendor_id: u16, product_id: u16) -> bool {
        self.lookup(vendor_id, product_id).is_some()
    }

    /// Find the registry entry for a VID/PID pair
    pub fn lookup(&self, vendor_id: u16, product_id: u16) -> Option<&SupportedDeviceDescriptor> {
        self.entries
            .iter()
            .find(|entry| entry.matches(vendor_id, product_id))
    }

    /// Return the first attached device that matches any registry entry
    pub fn find_supported<'a>(&self, devices: &'a [AttachedDevice]) -> Option<&'a AttachedDevice> {
        devices
            .iter()
            .find(|device| self.contains(device.vendor_id, device.product_id))
    }
}

/// Parse a "0xVID:0xPID" pair
pub fn parse_vid_pid(s: &str) -> Result<(u16, u16), String> {
    let (vid, pid) = s
        .split_once(':')
        .ok_or_else(|| format!("Invalid device '{}', expected VID:PID (e.g. '0x2aad:0x6373')", s))?;
    Ok((parse_hex_id(vid, "VID")?, parse_hex_id(pid, "PID")?))
}

fn parse_hex_id(id: &str, name: &str) -> Result<u16, String> {
    let hex_part = id
        .strip_prefix("0x")
        .or_else(|| id.strip_prefix("0X"))
        .ok_or_else(|| format!("Invalid {} '{}', must start with '0x' (e.g. '0x2aad')", name, id))?;

    if hex_part.is_empty() || hex_part.len() > 4 {
        return Err(format!("Invalid {} '{}', hex part must be 1-4 digits", name, id));
    }

    u16::from_str_radix(hex_part, 16)
        .map_err(|_| format!("Invalid {} '{}', not a valid hex number", name, id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry() {
        let registry = DeviceRegistry::builtin();
        assert_eq!(registry.entries().len(), 2);
        assert!(registry.contains(10925, 25462));
        assert!(registry.contains(10925, 25459));
        assert!(!registry.contains(10925, 25460));
        assert!(!registry.contains(0x1d6b, 0x0002));
    }

    #[test]
    fn test_with_extra_skips_duplicates() {
        let registry = DeviceRegistry::builtin().with_extra([
            SupportedDeviceDescriptor::new(10925, 25462),
            SupportedDeviceDescriptor::new(0x1234, 0x5678).with_display_name("bench unit"),
        ]);
        assert_eq!(registry.entries().len(), 3);
        assert_eq!(
            registry.lookup(0x1234, 0x5678).and_then(|e| e.display_name.as_deref()),
            Some("bench unit")
        );
    }

    #[test]
    fn test_parse_vid_pid() {
        assert_eq!(parse_vid_pid("0x2aad:0x6373"), Ok((0x2aad, 0x6373)));
        assert_eq!(parse_vid_pid("0X2AAD:0x6376"), Ok((10925, 25462)));
        assert!(parse_vid_pid("2aad:6373").is_err());
        assert!(parse_vid_pid("0x2aad").is_err());
        assert!(parse_vid_pid("0x2aad:*").is_err());
        assert!(parse_vid_pid("0x12345:0x0001").is_err());
        assert!(parse_vid_pid("0xGHIJ:0x0001").is_err());
    }
}
