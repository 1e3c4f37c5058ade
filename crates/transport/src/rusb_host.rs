//! libusb-backed host
//!
//! Enumeration goes through a libusb context. Opening goes through the usbfs
//! node of the device: the node is opened by this process and the resulting
//! file descriptor is wrapped by libusb, so the descriptor the SDK binding
//! receives is the same one our claims are held on.

use crate::error::{Result, TransportError};
use crate::host::{AttachedDevice, ControlRequest, DeviceKey, DeviceLink, EndpointInfo, InterfaceInfo, UsbHost};
use crate::permission::{PermissionAuthority, PermissionResponder, PermissionResponse};
use rusb::{ConfigDescriptor, Context, Device, DeviceHandle, UsbContext};
use std::fs::{File, OpenOptions};
use tracing::{debug, warn};

/// Host backed by the system libusb
pub struct RusbHost {
    context: Context,
}

impl RusbHost {
    pub fn new() -> Result<Self> {
        let context = Context::new()?;
        Ok(Self { context })
    }

    fn describe(device: &Device<Context>) -> Result<AttachedDevice> {
        let descriptor = device.device_descriptor()?;

        // Unconfigured devices have no active configuration; fall back to the first
        let config = match device.active_config_descriptor() {
            Ok(config) => Some(config),
            Err(_) => device.config_descriptor(0).ok(),
        };

        Ok(AttachedDevice {
            key: DeviceKey::new(device.bus_number(), device.address()),
            vendor_id: descriptor.vendor_id(),
            product_id: descriptor.product_id(),
            interfaces: config.as_ref().map(interfaces_of).unwrap_or_default(),
        })
    }
}

fn interfaces_of(config: &ConfigDescriptor) -> Vec<InterfaceInfo> {
    config
        .interfaces()
        .filter_map(|interface| {
            let setting = interface.descriptors().next()?;
            Some(InterfaceInfo {
                number: setting.interface_number(),
                class_code: setting.class_code(),
                endpoints: setting
                    .endpoint_descriptors()
                    .map(|endpoint| EndpointInfo {
                        address: endpoint.address(),
                        transfer_type: endpoint.transfer_type(),
                        direction: endpoint.direction(),
                    })
                    .collect(),
            })
        })
        .collect()
}

impl UsbHost for RusbHost {
    type Link = RusbLink;

    fn attached_devices(&self) -> Result<Vec<AttachedDevice>> {
        let devices = self.context.devices()?;
        let mut attached = Vec::with_capacity(devices.len());

        for device in devices.iter() {
            match Self::describe(&device) {
                Ok(info) => attached.push(info),
                Err(e) => {
                    debug!(
                        "Skipping device on bus {} address {}: {}",
                        device.bus_number(),
                        device.address(),
                        e
                    );
                }
            }
        }

        Ok(attached)
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn open(&self, device: &AttachedDevice) -> Result<RusbLink> {
        use std::os::fd::AsRawFd;

        let path = device.key.usbfs_path();
        let node = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| {
                warn!("Failed to open {}: {}", path.display(), e);
                TransportError::ConnectionOpenFailed(format!("{}: {}", path.display(), e))
            })?;

        let fd = node.as_raw_fd();
        // SAFETY: `fd` refers to the usbfs node owned by `node`, which is kept
        // alive in the link until after the handle is dropped.
        let handle = unsafe { self.context.open_device_with_fd(fd) }
            .map_err(|e| TransportError::ConnectionOpenFailed(e.to_string()))?;

        debug!("Opened {} (fd {})", device.key, fd);
        Ok(RusbLink {
            handle: Some(handle),
            node: Some(node),
            fd,
            claimed: Vec::new(),
            detached: Vec::new(),
        })
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    fn open(&self, device: &AttachedDevice) -> Result<RusbLink> {
        Err(TransportError::ConnectionOpenFailed(format!(
            "opening {} by file descriptor is only supported on Linux and Android",
            device.key
        )))
    }
}

impl PermissionAuthority for RusbHost {
    fn has_permission(&self, device: &AttachedDevice) -> bool {
        let path = device.key.usbfs_path();
        match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(_) => true,
            Err(e) => {
                debug!("No access to {}: {}", path.display(), e);
                false
            }
        }
    }

    // File permissions are the grant on a desktop host; the answer is final
    // and immediate.
    fn request_permission(&self, device: &AttachedDevice, responder: PermissionResponder) {
        let response = if self.has_permission(device) {
            PermissionResponse::granted(device.key)
        } else {
            warn!(
                "No read/write access to {}; check udev rules for {:04x}:{:04x}",
                device.key.usbfs_path().display(),
                device.vendor_id,
                device.product_id
            );
            PermissionResponse::denied(device.key)
        };
        responder.respond(response);
    }
}

/// Opened usbfs device
pub struct RusbLink {
    // Dropped before `node` so libusb lets go of the descriptor first
    handle: Option<DeviceHandle<Context>>,
    node: Option<File>,
    fd: i32,
    claimed: Vec<u8>,
    detached: Vec<u8>,
}

impl DeviceLink for RusbLink {
    fn file_descriptor(&self) -> i32 {
        if self.node.is_some() { self.fd } else { -1 }
    }

    fn claim_interface(&mut self, interface: u8) -> Result<()> {
        let handle = self.handle.as_ref().ok_or(TransportError::LinkClosed)?;

        match handle.kernel_driver_active(interface) {
            Ok(true) => {
                debug!("Detaching kernel driver from interface {}", interface);
                match handle.detach_kernel_driver(interface) {
                    Ok(()) => self.detached.push(interface),
                    Err(e) => warn!(
                        "Failed to detach kernel driver from interface {}: {}",
                        interface, e
                    ),
                }
            }
            Ok(false) => {}
            Err(e) => {
                debug!(
                    "Could not check kernel driver status for interface {}: {}",
                    interface, e
                );
            }
        }

        handle
            .claim_interface(interface)
            .map_err(|e| TransportError::InterfaceClaimFailed {
                interface,
                message: e.to_string(),
            })?;

        debug!("Claimed interface {}", interface);
        self.claimed.push(interface);
        Ok(())
    }

    fn write_control(&mut self, request: &ControlRequest, data: &[u8]) -> Result<usize> {
        let handle = self.handle.as_ref().ok_or(TransportError::LinkClosed)?;
        let written = handle.write_control(
            request.request_type,
            request.request,
            request.value,
            request.index,
            data,
            request.timeout,
        )?;
        Ok(written)
    }

    fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            for interface in self.claimed.drain(..) {
                if let Err(e) = handle.release_interface(interface) {
                    warn!("Failed to release interface {}: {}", interface, e);
                }
            }
            for interface in self.detached.drain(..) {
                if let Err(e) = handle.attach_kernel_driver(interface) {
                    debug!("Could not reattach kernel driver to interface {}: {}", interface, e);
                }
            }
            drop(handle);
        }
        if self.node.take().is_some() {
            debug!("Closed usbfs descriptor {}", self.fd);
        }
    }
}

impl Drop for RusbLink {
    fn drop(&mut self) {
        self.close();
    }
}
