//! USB host abstraction
//!
//! The transport never talks to libusb directly. It goes through [`UsbHost`]
//! (enumeration and open) and [`DeviceLink`] (one opened device), so the
//! connection lifecycle can run against the real host or the in-memory one
//! used by tests.

use crate::error::Result;
use rusb::{Direction, TransferType};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// USB class code of a CDC communication (control) interface
pub const USB_CLASS_COMM: u8 = 0x02;

/// USB class code of a CDC data interface
pub const USB_CLASS_CDC_DATA: u8 = 0x0a;

/// Identity of one enumerated device instance
///
/// The address changes when the device re-enumerates (e.g. after a reboot
/// into new firmware), so a key only identifies a device until it leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceKey {
    pub bus: u8,
    pub address: u8,
}

impl DeviceKey {
    pub const fn new(bus: u8, address: u8) -> Self {
        Self { bus, address }
    }

    /// usbfs node for this device
    pub fn usbfs_path(&self) -> PathBuf {
        PathBuf::from(format!("/dev/bus/usb/{:03}/{:03}", self.bus, self.address))
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bus {:03} device {:03}", self.bus, self.address)
    }
}

/// Endpoint descriptor summary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointInfo {
    pub address: u8,
    pub transfer_type: TransferType,
    pub direction: Direction,
}

/// Interface descriptor summary (alternate setting 0)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub number: u8,
    pub class_code: u8,
    pub endpoints: Vec<EndpointInfo>,
}

/// Snapshot of an attached device as seen during enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedDevice {
    pub key: DeviceKey,
    pub vendor_id: u16,
    pub product_id: u16,
    pub interfaces: Vec<InterfaceInfo>,
}

impl fmt::Display for AttachedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} ({}, {} interfaces)",
            self.vendor_id,
            self.product_id,
            self.key,
            self.interfaces.len()
        )
    }
}

/// Setup fields of a host-to-device control transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRequest {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub timeout: Duration,
}

/// OS USB subsystem: enumeration and low-level open
pub trait UsbHost: Send + Sync {
    /// Opened device type
    type Link: DeviceLink + Send;

    /// Enumerate all currently attached devices
    fn attached_devices(&self) -> Result<Vec<AttachedDevice>>;

    /// Open a low-level connection to the device
    fn open(&self, device: &AttachedDevice) -> Result<Self::Link>;
}

/// An opened device
///
/// `close` must be idempotent; implementations also close on drop.
pub trait DeviceLink {
    /// Raw file descriptor of the opened device, handed to the SDK binding
    fn file_descriptor(&self) -> i32;

    /// Claim an interface exclusively
    fn claim_interface(&mut self, interface: u8) -> Result<()>;

    /// Host-to-device control transfer, returns bytes written
    fn write_control(&mut self, request: &ControlRequest, data: &[u8]) -> Result<usize>;

    /// Release claimed interfaces and the device handle
    fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usbfs_path() {
        let key = DeviceKey::new(1, 12);
        assert_eq!(key.usbfs_path(), PathBuf::from("/dev/bus/usb/001/012"));
    }

    #[test]
    fn test_attached_device_display() {
        let device = AttachedDevice {
            key: DeviceKey::new(3, 4),
            vendor_id: 0x2aad,
            product_id: 0x6373,
            interfaces: Vec::new(),
        };
        assert_eq!(device.to_string(), "2aad:6373 (bus 003 device 004, 0 interfaces)");
    }
}
