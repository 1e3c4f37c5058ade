//! USB-CDC connection lifecycle
//!
//! Two layers:
//! - [`OpenConnection`] is the open state as a value. It only exists once
//!   the link is opened, both CDC interfaces are claimed and the line coding
//!   is applied, so endpoint addresses are never observable half-populated.
//! - [`UsbCdcConnection`] is the Closed/Open state machine that owns
//!   discovery and at most one `OpenConnection`, with -1 sentinels on the
//!   accessors the SDK binding reads.

use crate::error::{Result, TransportError};
use crate::host::{
    AttachedDevice, DeviceLink, USB_CLASS_CDC_DATA, USB_CLASS_COMM, UsbHost,
};
use crate::line_coding::{LINE_CODING_TIMEOUT, LineCoding};
use crate::registry::DeviceRegistry;
use rusb::{Direction, TransferType};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Sentinel for unset connection fields
pub const UNSET: i32 = -1;

/// Transport triple handed to the SDK binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialConfig {
    pub file_descriptor: i32,
    pub read_endpoint: i32,
    pub write_endpoint: i32,
}

/// Flat view of the connection fields
///
/// Either every field is [`UNSET`] or every field is valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionDetails {
    pub control_interface_index: i32,
    pub control_endpoint_address: i32,
    pub read_endpoint_address: i32,
    pub write_endpoint_address: i32,
    pub file_descriptor: i32,
}

impl ConnectionDetails {
    pub const fn unset() -> Self {
        Self {
            control_interface_index: UNSET,
            control_endpoint_address: UNSET,
            read_endpoint_address: UNSET,
            write_endpoint_address: UNSET,
            file_descriptor: UNSET,
        }
    }

    pub fn is_unset(&self) -> bool {
        *self == Self::unset()
    }
}

impl Default for ConnectionDetails {
    fn default() -> Self {
        Self::unset()
    }
}

/// Interfaces and endpoints resolved from the descriptor walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CdcEndpoints {
    pub control_interface: u8,
    pub control_endpoint: u8,
    pub data_interface: u8,
    pub read_endpoint: u8,
    pub write_endpoint: u8,
}

/// Walk the interface list and classify the CDC endpoints
///
/// A communication-class interface yields the control interface and its
/// first endpoint. A CDC-data interface is scanned for bulk endpoints: IN is
/// the read endpoint, OUT the write endpoint. Later interfaces of the same
/// class override earlier ones.
pub fn resolve_cdc_endpoints(device: &AttachedDevice) -> Result<CdcEndpoints> {
    let mut control: Option<(u8, u8)> = None;
    let mut data_interface: Option<u8> = None;
    let mut read_endpoint: Option<u8> = None;
    let mut write_endpoint: Option<u8> = None;

    for interface in &device.interfaces {
        match interface.class_code {
            USB_CLASS_COMM => {
                debug!("Interface {} is a control interface", interface.number);
                if let Some(endpoint) = interface.endpoints.first() {
                    control = Some((interface.number, endpoint.address));
                }
            }
            USB_CLASS_CDC_DATA => {
                debug!(
                    "Interface {} is a CDC data interface with {} endpoints",
                    interface.number,
                    interface.endpoints.len()
                );
                for endpoint in &interface.endpoints {
                    if endpoint.transfer_type != TransferType::Bulk {
                        continue;
                    }
                    data_interface = Some(interface.number);
                    match endpoint.direction {
                        Direction::In => read_endpoint = Some(endpoint.address),
                        Direction::Out => write_endpoint = Some(endpoint.address),
                    }
                }
            }
            other => {
                debug!("Skipping interface {} with class {:#04x}", interface.number, other);
            }
        }
    }

    match (control, data_interface, read_endpoint, write_endpoint) {
        (Some((control_interface, control_endpoint)), Some(data_interface), Some(read), Some(write)) => {
            Ok(CdcEndpoints {
                control_interface,
                control_endpoint,
                data_interface,
                read_endpoint: read,
                write_endpoint: write,
            })
        }
        _ => Err(TransportError::EndpointsUnresolved {
            control: control.is_some(),
            read: read_endpoint.is_some(),
            write: write_endpoint.is_some(),
        }),
    }
}

/// An opened, claimed and configured CDC link
///
/// Dropping it closes the underlying link.
pub struct OpenConnection<L: DeviceLink> {
    device: AttachedDevice,
    endpoints: CdcEndpoints,
    file_descriptor: i32,
    link: L,
}

impl<L: DeviceLink> OpenConnection<L> {
    /// Run the open sequence against `device`
    ///
    /// Opens the link, resolves and claims the CDC interfaces and applies the
    /// line coding. On any failure the link is closed before returning.
    pub fn establish<H>(
        host: &H,
        device: &AttachedDevice,
        line_coding: &LineCoding,
        control_timeout: Duration,
    ) -> Result<Self>
    where
        H: UsbHost<Link = L> + ?Sized,
    {
        let mut link = host.open(device)?;
        let file_descriptor = link.file_descriptor();
        debug!("Opened {} with file descriptor {}", device.key, file_descriptor);

        match Self::configure(&mut link, device, line_coding, control_timeout) {
            Ok(endpoints) => Ok(Self {
                device: device.clone(),
                endpoints,
                file_descriptor,
                link,
            }),
            Err(e) => {
                link.close();
                Err(e)
            }
        }
    }

    fn configure(
        link: &mut L,
        device: &AttachedDevice,
        line_coding: &LineCoding,
        control_timeout: Duration,
    ) -> Result<CdcEndpoints> {
        let endpoints = resolve_cdc_endpoints(device)?;

        link.claim_interface(endpoints.control_interface)
            .inspect_err(|e| error!("Failed to claim the control interface: {}", e))?;
        link.claim_interface(endpoints.data_interface)
            .inspect_err(|e| error!("Failed to claim the data interface: {}", e))?;

        let request = line_coding.control_request(endpoints.control_interface, control_timeout);
        link.write_control(&request, &line_coding.to_bytes())
            .map_err(|e| TransportError::ConfigurationFailed(e.to_string()))?;

        debug!(
            "Line coding applied: {} baud, {} data bits, stop {}, parity {}",
            line_coding.baud_rate, line_coding.data_bits, line_coding.stop_bits, line_coding.parity
        );
        Ok(endpoints)
    }

    pub fn device(&self) -> &AttachedDevice {
        &self.device
    }

    pub fn endpoints(&self) -> CdcEndpoints {
        self.endpoints
    }

    pub fn file_descriptor(&self) -> i32 {
        self.file_descriptor
    }

    pub fn read_endpoint_address(&self) -> i32 {
        i32::from(self.endpoints.read_endpoint)
    }

    pub fn write_endpoint_address(&self) -> i32 {
        i32::from(self.endpoints.write_endpoint)
    }

    pub fn serial_config(&self) -> SerialConfig {
        SerialConfig {
            file_descriptor: self.file_descriptor,
            read_endpoint: self.read_endpoint_address(),
            write_endpoint: self.write_endpoint_address(),
        }
    }

    pub fn details(&self) -> ConnectionDetails {
        ConnectionDetails {
            control_interface_index: i32::from(self.endpoints.control_interface),
            control_endpoint_address: i32::from(self.endpoints.control_endpoint),
            read_endpoint_address: self.read_endpoint_address(),
            write_endpoint_address: self.write_endpoint_address(),
            file_descriptor: self.file_descriptor,
        }
    }

    /// Close the link
    pub fn close(self) {
        debug!("Closing connection to {}", self.device.key);
        drop(self);
    }
}

impl<L: DeviceLink> Drop for OpenConnection<L> {
    fn drop(&mut self) {
        self.link.close();
    }
}

/// Closed/Open state of a [`UsbCdcConnection`]
pub enum ConnectionState<L: DeviceLink> {
    Closed,
    Open(OpenConnection<L>),
}

/// Connection to exactly one supported peripheral
///
/// Not meant to be shared between tasks; one orchestration task owns it.
pub struct UsbCdcConnection<H: UsbHost> {
    host: Arc<H>,
    registry: DeviceRegistry,
    line_coding: LineCoding,
    control_timeout: Duration,
    discovered: Option<AttachedDevice>,
    state: ConnectionState<H::Link>,
}

impl<H: UsbHost> UsbCdcConnection<H> {
    /// Create a closed connection using the built-in registry and default
    /// line coding
    pub fn new(host: Arc<H>) -> Self {
        Self {
            host,
            registry: DeviceRegistry::default(),
            line_coding: LineCoding::default(),
            control_timeout: LINE_CODING_TIMEOUT,
            discovered: None,
            state: ConnectionState::Closed,
        }
    }

    pub fn with_registry(mut self, registry: DeviceRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_line_coding(mut self, line_coding: LineCoding, control_timeout: Duration) -> Self {
        self.line_coding = line_coding;
        self.control_timeout = control_timeout;
        self
    }

    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Look for an attached supported device
    ///
    /// On success the device is recorded for the next open. On failure the
    /// recorded device is left as it was.
    pub fn find_supported_device(&mut self) -> bool {
        let devices = match self.host.attached_devices() {
            Ok(devices) => devices,
            Err(e) => {
                error!("Failed to enumerate USB devices: {}", e);
                return false;
            }
        };

        if devices.is_empty() {
            info!("USB device list is empty");
            return false;
        }

        match self.registry.find_supported(&devices) {
            Some(device) => {
                info!("Found supported USB device {}", device);
                self.discovered = Some(device.clone());
                true
            }
            None => {
                error!("No supported USB device found");
                info!("The following USB devices were detected:");
                for device in &devices {
                    info!("  {}", device);
                }
                false
            }
        }
    }

    /// Device recorded by the last successful discovery
    pub fn discovered_device(&self) -> Option<&AttachedDevice> {
        self.discovered.as_ref()
    }

    /// Open the discovered device
    ///
    /// Returns immediately when already open. Any failure leaves the
    /// connection closed with nothing retained.
    pub fn open_connection(&mut self) -> Result<()> {
        if self.is_open() {
            info!("Device connection already open");
            return Ok(());
        }

        let device = self.discovered.as_ref().ok_or(TransportError::DeviceNotFound)?;

        match OpenConnection::establish(
            self.host.as_ref(),
            device,
            &self.line_coding,
            self.control_timeout,
        ) {
            Ok(open) => {
                info!("Device connection established with {}", device.key);
                self.state = ConnectionState::Open(open);
                Ok(())
            }
            Err(e) => {
                error!("Failed to open device connection: {}", e);
                Err(e)
            }
        }
    }

    /// Close the connection and forget the discovered device
    pub fn close_connection(&mut self) {
        if let ConnectionState::Open(open) = std::mem::replace(&mut self.state, ConnectionState::Closed) {
            open.close();
            self.discovered = None;
            info!("Device connection closed");
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, ConnectionState::Open(_))
    }

    /// The open connection, if any
    pub fn open(&self) -> Option<&OpenConnection<H::Link>> {
        match &self.state {
            ConnectionState::Open(open) => Some(open),
            ConnectionState::Closed => None,
        }
    }

    pub fn file_descriptor(&self) -> i32 {
        self.open_or_log().map_or(UNSET, |open| open.file_descriptor())
    }

    pub fn read_endpoint_address(&self) -> i32 {
        self.open_or_log().map_or(UNSET, |open| open.read_endpoint_address())
    }

    pub fn write_endpoint_address(&self) -> i32 {
        self.open_or_log().map_or(UNSET, |open| open.write_endpoint_address())
    }

    pub fn serial_config(&self) -> Option<SerialConfig> {
        self.open().map(|open| open.serial_config())
    }

    pub fn details(&self) -> ConnectionDetails {
        self.open().map_or_else(ConnectionDetails::unset, |open| open.details())
    }

    fn open_or_log(&self) -> Option<&OpenConnection<H::Link>> {
        let open = self.open();
        if open.is_none() {
            error!("Connection to the device is not opened");
        }
        open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{DeviceKey, EndpointInfo, InterfaceInfo};
    use crate::mock::{MockUsbHost, cdc_device};

    fn endpoint(address: u8, transfer_type: TransferType, direction: Direction) -> EndpointInfo {
        EndpointInfo {
            address,
            transfer_type,
            direction,
        }
    }

    #[test]
    fn test_resolve_standard_cdc_device() {
        let device = cdc_device(1, 4, 10925, 25459);
        let endpoints = resolve_cdc_endpoints(&device).unwrap();
        assert_eq!(endpoints.control_interface, 0);
        assert_eq!(endpoints.control_endpoint, 0x83);
        assert_eq!(endpoints.data_interface, 1);
        assert_eq!(endpoints.read_endpoint, 0x81);
        assert_eq!(endpoints.write_endpoint, 0x02);
    }

    #[test]
    fn test_resolve_ignores_non_bulk_data_endpoints() {
        let mut device = cdc_device(1, 4, 10925, 25459);
        device.interfaces[1].endpoints = vec![
            endpoint(0x85, TransferType::Interrupt, Direction::In),
            endpoint(0x02, TransferType::Bulk, Direction::Out),
        ];
        let err = resolve_cdc_endpoints(&device).unwrap_err();
        assert!(matches!(
            err,
            TransportError::EndpointsUnresolved {
                control: true,
                read: false,
                write: true
            }
        ));
    }

    #[test]
    fn test_resolve_without_control_interface() {
        let mut device = cdc_device(1, 4, 10925, 25459);
        device.interfaces.remove(0);
        assert!(matches!(
            resolve_cdc_endpoints(&device),
            Err(TransportError::EndpointsUnresolved { control: false, .. })
        ));
    }

    #[test]
    fn test_resolve_control_interface_without_endpoints() {
        let mut device = cdc_device(1, 4, 10925, 25459);
        device.interfaces[0].endpoints.clear();
        assert!(resolve_cdc_endpoints(&device).is_err());
    }

    #[test]
    fn test_resolve_skips_other_classes() {
        let mut device = cdc_device(1, 4, 10925, 25459);
        device.interfaces.insert(
            0,
            InterfaceInfo {
                number: 5,
                class_code: 0xff,
                endpoints: vec![endpoint(0x86, TransferType::Bulk, Direction::In)],
            },
        );
        let endpoints = resolve_cdc_endpoints(&device).unwrap();
        assert_eq!(endpoints.read_endpoint, 0x81);
    }

    #[test]
    fn test_find_supported_device_empty_enumeration() {
        let host = Arc::new(MockUsbHost::new());
        let mut connection = UsbCdcConnection::new(host);
        assert!(!connection.find_supported_device());
        assert!(connection.discovered_device().is_none());
    }

    #[test]
    fn test_find_supported_device_no_match_keeps_state() {
        let host = Arc::new(MockUsbHost::with_devices(vec![
            cdc_device(1, 2, 0x1d6b, 0x0002),
            cdc_device(1, 3, 10925, 1),
        ]));
        let mut connection = UsbCdcConnection::new(host);
        assert!(!connection.find_supported_device());
        assert!(connection.discovered_device().is_none());
        assert!(!connection.is_open());
        assert!(connection.details().is_unset());
    }

    #[test]
    fn test_find_supported_device_first_match() {
        let host = Arc::new(MockUsbHost::with_devices(vec![
            cdc_device(1, 2, 0x1d6b, 0x0002),
            cdc_device(1, 3, 10925, 25462),
            cdc_device(1, 4, 10925, 25459),
        ]));
        let mut connection = UsbCdcConnection::new(host);
        assert!(connection.find_supported_device());
        assert_eq!(connection.discovered_device().unwrap().key, DeviceKey::new(1, 3));
    }

    #[test]
    fn test_open_without_discovery() {
        let host = Arc::new(MockUsbHost::new());
        let mut connection = UsbCdcConnection::new(host.clone());
        assert!(matches!(
            connection.open_connection(),
            Err(TransportError::DeviceNotFound)
        ));
        assert_eq!(host.open_count(), 0);
    }

    #[test]
    fn test_open_populates_details() {
        let host = Arc::new(MockUsbHost::with_devices(vec![cdc_device(1, 4, 10925, 25459)]));
        let mut connection = UsbCdcConnection::new(host.clone());
        assert!(connection.find_supported_device());
        connection.open_connection().unwrap();

        assert!(connection.is_open());
        let details = connection.details();
        assert_eq!(details.control_interface_index, 0);
        assert_eq!(details.control_endpoint_address, 0x83);
        assert_eq!(details.read_endpoint_address, 0x81);
        assert_eq!(details.write_endpoint_address, 0x02);
        assert_eq!(details.file_descriptor, connection.file_descriptor());
        assert_ne!(details.file_descriptor, UNSET);

        assert_eq!(host.claimed_interfaces(), vec![0, 1]);
        let requests = host.control_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0.request_type, 0x21);
        assert_eq!(requests[0].0.request, 0x20);
        assert_eq!(requests[0].1, LineCoding::default().to_bytes().to_vec());
    }

    #[test]
    fn test_open_is_idempotent() {
        let host = Arc::new(MockUsbHost::with_devices(vec![cdc_device(1, 4, 10925, 25459)]));
        let mut connection = UsbCdcConnection::new(host.clone());
        assert!(connection.find_supported_device());

        assert!(connection.open_connection().is_ok());
        assert!(connection.open_connection().is_ok());
        assert_eq!(host.open_count(), 1);
        assert_eq!(host.control_requests().len(), 1);
    }

    #[test]
    fn test_failed_open_leaves_nothing_behind() {
        let failures: Vec<fn(&MockUsbHost)> = vec![
            |host| host.fail_open(true),
            |host| host.refuse_claim(0),
            |host| host.refuse_claim(1),
            |host| host.fail_line_coding(true),
        ];

        for inject in failures {
            let host = Arc::new(MockUsbHost::with_devices(vec![cdc_device(1, 4, 10925, 25459)]));
            inject(&host);
            let mut connection = UsbCdcConnection::new(host.clone());
            assert!(connection.find_supported_device());

            assert!(connection.open_connection().is_err());
            assert!(!connection.is_open());
            assert!(connection.details().is_unset());
            assert_eq!(connection.file_descriptor(), UNSET);
            assert!(connection.serial_config().is_none());
            assert_eq!(host.live_links(), 0);
        }
    }

    #[test]
    fn test_failed_open_error_kinds() {
        let host = Arc::new(MockUsbHost::with_devices(vec![cdc_device(1, 4, 10925, 25459)]));
        host.refuse_claim(1);
        let mut connection = UsbCdcConnection::new(host.clone());
        connection.find_supported_device();
        assert!(matches!(
            connection.open_connection(),
            Err(TransportError::InterfaceClaimFailed { interface: 1, .. })
        ));

        let host = Arc::new(MockUsbHost::with_devices(vec![cdc_device(1, 4, 10925, 25459)]));
        host.fail_line_coding(true);
        let mut connection = UsbCdcConnection::new(host);
        connection.find_supported_device();
        assert!(matches!(
            connection.open_connection(),
            Err(TransportError::ConfigurationFailed(_))
        ));
    }

    #[test]
    fn test_close_resets_accessors() {
        let host = Arc::new(MockUsbHost::with_devices(vec![cdc_device(1, 4, 10925, 25459)]));
        let mut connection = UsbCdcConnection::new(host.clone());
        connection.find_supported_device();
        connection.open_connection().unwrap();
        assert!(connection.serial_config().is_some());

        connection.close_connection();
        assert!(!connection.is_open());
        assert_eq!(connection.file_descriptor(), UNSET);
        assert_eq!(connection.read_endpoint_address(), UNSET);
        assert_eq!(connection.write_endpoint_address(), UNSET);
        assert!(connection.details().is_unset());
        assert!(connection.discovered_device().is_none());
        assert_eq!(host.live_links(), 0);

        // Closing again is a no-op
        connection.close_connection();
        assert_eq!(host.close_count(), 1);
    }

    #[test]
    fn test_reopen_after_close_requires_discovery() {
        let host = Arc::new(MockUsbHost::with_devices(vec![cdc_device(1, 4, 10925, 25459)]));
        let mut connection = UsbCdcConnection::new(host.clone());
        connection.find_supported_device();
        connection.open_connection().unwrap();
        connection.close_connection();

        assert!(matches!(
            connection.open_connection(),
            Err(TransportError::DeviceNotFound)
        ));
        assert!(connection.find_supported_device());
        assert!(connection.open_connection().is_ok());
        assert_eq!(host.open_count(), 2);
    }

    #[test]
    fn test_custom_line_coding() {
        let host = Arc::new(MockUsbHost::with_devices(vec![cdc_device(1, 4, 10925, 25459)]));
        let coding = LineCoding {
            baud_rate: 9600,
            ..LineCoding::default()
        };
        let mut connection =
            UsbCdcConnection::new(host.clone()).with_line_coding(coding, Duration::from_millis(100));
        connection.find_supported_device();
        connection.open_connection().unwrap();

        let (request, payload) = host.control_requests().remove(0);
        assert_eq!(request.timeout, Duration::from_millis(100));
        assert_eq!(payload, coding.to_bytes().to_vec());
    }
}
