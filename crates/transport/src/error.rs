//! Transport error types

use crate::host::DeviceKey;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while discovering, permissioning, opening or configuring
/// the CDC link.
///
/// None of these are fatal to the process; a failed open leaves the
/// connection closed and the caller aborts its workflow.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No attached device matches the registry
    #[error("No supported USB device found")]
    DeviceNotFound,

    /// The OS refused access to the device
    #[error("Permission to access device {device} was denied")]
    PermissionDenied { device: DeviceKey },

    /// No matching permission response arrived in time
    #[error("No permission response for device {device} within {timeout:?}")]
    PermissionTimeout { device: DeviceKey, timeout: Duration },

    /// The low-level device connection could not be opened
    #[error("Failed to open device connection: {0}")]
    ConnectionOpenFailed(String),

    /// Interface walk did not yield a control, read and write endpoint
    #[error(
        "CDC endpoints unresolved (control: {control}, read: {read}, write: {write})"
    )]
    EndpointsUnresolved {
        control: bool,
        read: bool,
        write: bool,
    },

    /// Exclusive claim of an interface was refused
    #[error("Failed to claim interface {interface}: {message}")]
    InterfaceClaimFailed { interface: u8, message: String },

    /// SET_LINE_CODING was rejected
    #[error("Failed to configure line coding: {0}")]
    ConfigurationFailed(String),

    /// Operation requires an open link
    #[error("Device link is closed")]
    LinkClosed,

    /// Underlying libusb error
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),
}

/// Type alias for transport results
pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TransportError::InterfaceClaimFailed {
            interface: 1,
            message: "Resource busy".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("interface 1"));
        assert!(msg.contains("Resource busy"));
    }

    #[test]
    fn test_permission_timeout_display() {
        let err = TransportError::PermissionTimeout {
            device: DeviceKey::new(1, 7),
            timeout: Duration::from_secs(30),
        };
        let msg = err.to_string();
        assert!(msg.contains("bus 001 device 007"));
        assert!(msg.contains("30s"));
    }
}
