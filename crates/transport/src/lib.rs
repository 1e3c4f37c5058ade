//! USB-CDC transport for RealSense ID peripherals
//!
//! This crate owns the link between the host and a face-authentication
//! peripheral:
//! - Device registry of supported VID/PID pairs
//! - Discovery over the OS USB subsystem
//! - One-shot permission negotiation with a timeout
//! - Opening, configuring (SET_LINE_CODING) and closing the CDC link
//!
//! The open link is reduced to a [`SerialConfig`] (file descriptor plus bulk
//! endpoint addresses) which is what the biometric SDK binding consumes.

pub mod connection;
pub mod error;
pub mod host;
pub mod line_coding;
pub mod permission;
pub mod registry;
pub mod rusb_host;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use connection::{
    CdcEndpoints, ConnectionDetails, ConnectionState, OpenConnection, SerialConfig, UNSET,
    UsbCdcConnection, resolve_cdc_endpoints,
};
pub use error::{Result, TransportError};
pub use host::{
    AttachedDevice, ControlRequest, DeviceKey, DeviceLink, EndpointInfo, InterfaceInfo, UsbHost,
};
pub use line_coding::LineCoding;
pub use permission::{
    PermissionAuthority, PermissionResponder, PermissionResponse, negotiate_permission,
};
pub use registry::{DeviceRegistry, SupportedDeviceDescriptor};
pub use rusb_host::RusbHost;
