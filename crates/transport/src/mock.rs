//! In-memory USB host for testing
//!
//! [`MockUsbHost`] implements both [`UsbHost`] and [`PermissionAuthority`]
//! and can be scripted to fail at each step of the open sequence, to answer
//! permission requests in different ways, and to simulate a device reboot
//! during which the device is absent for a number of enumerations and then
//! comes back at a new address.

use crate::error::{Result, TransportError};
use crate::host::{
    AttachedDevice, ControlRequest, DeviceKey, DeviceLink, EndpointInfo, InterfaceInfo,
    USB_CLASS_CDC_DATA, USB_CLASS_COMM, UsbHost,
};
use crate::permission::{PermissionAuthority, PermissionResponder, PermissionResponse};
use rusb::{Direction, TransferType};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// First file descriptor handed out by the mock
const BASE_FD: i32 = 40;

/// Build a device with a standard CDC-ACM interface layout
///
/// Interface 0 is the communication interface with an interrupt IN endpoint
/// at 0x83; interface 1 is the data interface with bulk IN 0x81 and bulk
/// OUT 0x02.
pub fn cdc_device(bus: u8, address: u8, vendor_id: u16, product_id: u16) -> AttachedDevice {
    AttachedDevice {
        key: DeviceKey::new(bus, address),
        vendor_id,
        product_id,
        interfaces: vec![
            InterfaceInfo {
                number: 0,
                class_code: USB_CLASS_COMM,
                endpoints: vec![EndpointInfo {
                    address: 0x83,
                    transfer_type: TransferType::Interrupt,
                    direction: Direction::In,
                }],
            },
            InterfaceInfo {
                number: 1,
                class_code: USB_CLASS_CDC_DATA,
                endpoints: vec![
                    EndpointInfo {
                        address: 0x81,
                        transfer_type: TransferType::Bulk,
                        direction: Direction::In,
                    },
                    EndpointInfo {
                        address: 0x02,
                        transfer_type: TransferType::Bulk,
                        direction: Direction::Out,
                    },
                ],
            },
        ],
    }
}

/// How the mock answers permission requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockPermission {
    /// Every device is already permitted
    Granted,
    /// Not permitted up front; a request is granted
    GrantOnRequest,
    /// Not permitted up front; a request is denied
    DenyOnRequest,
    /// Requests are never answered
    Silent,
    /// Requests are answered with a grant for another device only
    GrantOtherDevice(DeviceKey),
}

#[derive(Debug)]
struct MockState {
    devices: Vec<AttachedDevice>,
    hidden_probes: usize,
    unplugged: bool,
    fail_enumeration: bool,
    fail_open: bool,
    refused_claims: HashSet<u8>,
    fail_line_coding: bool,
    permission: MockPermission,
    granted: HashSet<DeviceKey>,
    pending_responders: Vec<PermissionResponder>,
    permission_requests: usize,
    enumerations: usize,
    opened: usize,
    closed: usize,
    live_links: usize,
    claimed: Vec<u8>,
    control_requests: Vec<(ControlRequest, Vec<u8>)>,
}

/// Scriptable in-memory USB host
#[derive(Debug, Clone)]
pub struct MockUsbHost {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockUsbHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MockUsbHost {
    /// Host with no attached devices
    pub fn new() -> Self {
        Self::with_devices(Vec::new())
    }

    pub fn with_devices(devices: Vec<AttachedDevice>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                devices,
                hidden_probes: 0,
                unplugged: false,
                fail_enumeration: false,
                fail_open: false,
                refused_claims: HashSet::new(),
                fail_line_coding: false,
                permission: MockPermission::Granted,
                granted: HashSet::new(),
                pending_responders: Vec::new(),
                permission_requests: 0,
                enumerations: 0,
                opened: 0,
                closed: 0,
                live_links: 0,
                claimed: Vec::new(),
                control_requests: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_devices(&self, devices: Vec<AttachedDevice>) {
        self.lock().devices = devices;
    }

    pub fn set_permission(&self, permission: MockPermission) {
        self.lock().permission = permission;
    }

    pub fn fail_enumeration(&self, fail: bool) {
        self.lock().fail_enumeration = fail;
    }

    pub fn fail_open(&self, fail: bool) {
        self.lock().fail_open = fail;
    }

    pub fn refuse_claim(&self, interface: u8) {
        self.lock().refused_claims.insert(interface);
    }

    pub fn fail_line_coding(&self, fail: bool) {
        self.lock().fail_line_coding = fail;
    }

    /// Drop off the bus and come back after `hidden_probes` enumerations
    ///
    /// Every device returns with its address incremented, the way a real
    /// re-enumeration assigns a fresh address.
    pub fn simulate_reboot(&self, hidden_probes: usize) {
        let mut state = self.lock();
        state.hidden_probes = hidden_probes;
        for device in &mut state.devices {
            device.key.address = device.key.address.wrapping_add(1);
        }
    }

    /// Drop off the bus for good
    pub fn unplug(&self) {
        self.lock().unplugged = true;
    }

    pub fn enumeration_count(&self) -> usize {
        self.lock().enumerations
    }

    pub fn permission_requests(&self) -> usize {
        self.lock().permission_requests
    }

    pub fn open_count(&self) -> usize {
        self.lock().opened
    }

    pub fn close_count(&self) -> usize {
        self.lock().closed
    }

    /// Links opened and not yet closed
    pub fn live_links(&self) -> usize {
        self.lock().live_links
    }

    /// Interfaces claimed so far, in order, across all links
    pub fn claimed_interfaces(&self) -> Vec<u8> {
        self.lock().claimed.clone()
    }

    /// Control transfers written so far with their payloads
    pub fn control_requests(&self) -> Vec<(ControlRequest, Vec<u8>)> {
        self.lock().control_requests.clone()
    }
}

impl UsbHost for MockUsbHost {
    type Link = MockLink;

    fn attached_devices(&self) -> Result<Vec<AttachedDevice>> {
        let mut state = self.lock();
        state.enumerations += 1;

        if state.fail_enumeration {
            return Err(TransportError::Usb(rusb::Error::Io));
        }
        if state.unplugged {
            return Ok(Vec::new());
        }
        if state.hidden_probes > 0 {
            state.hidden_probes -= 1;
            return Ok(Vec::new());
        }
        Ok(state.devices.clone())
    }

    fn open(&self, device: &AttachedDevice) -> Result<MockLink> {
        let mut state = self.lock();
        if state.fail_open {
            return Err(TransportError::ConnectionOpenFailed(format!(
                "{} refused to open",
                device.key
            )));
        }
        state.opened += 1;
        state.live_links += 1;
        let fd = BASE_FD + i32::try_from(state.opened).unwrap_or(i32::MAX - BASE_FD);

        Ok(MockLink {
            state: Arc::clone(&self.state),
            fd,
            open: true,
        })
    }
}

impl PermissionAuthority for MockUsbHost {
    fn has_permission(&self, device: &AttachedDevice) -> bool {
        let state = self.lock();
        state.permission == MockPermission::Granted || state.granted.contains(&device.key)
    }

    fn request_permission(&self, device: &AttachedDevice, responder: PermissionResponder) {
        let mut state = self.lock();
        state.permission_requests += 1;

        match state.permission {
            MockPermission::Granted | MockPermission::GrantOnRequest => {
                state.granted.insert(device.key);
                responder.respond(PermissionResponse::granted(device.key));
            }
            MockPermission::DenyOnRequest => {
                responder.respond(PermissionResponse::denied(device.key));
            }
            MockPermission::Silent => {
                state.pending_responders.push(responder);
            }
            MockPermission::GrantOtherDevice(other) => {
                responder.respond(PermissionResponse::granted(other));
                state.pending_responders.push(responder);
            }
        }
    }
}

/// Link returned by [`MockUsbHost::open`]
#[derive(Debug)]
pub struct MockLink {
    state: Arc<Mutex<MockState>>,
    fd: i32,
    open: bool,
}

impl MockLink {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DeviceLink for MockLink {
    fn file_descriptor(&self) -> i32 {
        if self.open { self.fd } else { -1 }
    }

    fn claim_interface(&mut self, interface: u8) -> Result<()> {
        if !self.open {
            return Err(TransportError::LinkClosed);
        }
        let mut state = self.lock();
        if state.refused_claims.contains(&interface) {
            return Err(TransportError::InterfaceClaimFailed {
                interface,
                message: "Resource busy".to_string(),
            });
        }
        state.claimed.push(interface);
        Ok(())
    }

    fn write_control(&mut self, request: &ControlRequest, data: &[u8]) -> Result<usize> {
        if !self.open {
            return Err(TransportError::LinkClosed);
        }
        let mut state = self.lock();
        if state.fail_line_coding {
            return Err(TransportError::Usb(rusb::Error::Pipe));
        }
        state.control_requests.push((*request, data.to_vec()));
        Ok(data.len())
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            let mut state = self.lock();
            state.closed += 1;
            state.live_links -= 1;
        }
    }
}

impl Drop for MockLink {
    fn drop(&mut self) {
        self.close();
    }
}
