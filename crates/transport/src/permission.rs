//! Device permission negotiation
//!
//! Access to a USB device may need an OS grant. The request is one-shot: the
//! authority is asked once and answers through a [`PermissionResponder`].
//! Answers are broadcast-like, so a response can name a different device
//! than the one requested. Those are logged and dropped, and the caller's
//! timeout bounds the wait so a stray grant can never strand it.

use crate::error::{Result, TransportError};
use crate::host::{AttachedDevice, DeviceKey};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Answer from the OS permission dialog or policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionResponse {
    /// Device the answer refers to, if the OS named one
    pub device: Option<DeviceKey>,
    pub granted: bool,
}

impl PermissionResponse {
    pub fn granted(device: DeviceKey) -> Self {
        Self {
            device: Some(device),
            granted: true,
        }
    }

    pub fn denied(device: DeviceKey) -> Self {
        Self {
            device: Some(device),
            granted: false,
        }
    }
}

/// Sending half handed to the authority for one request
#[derive(Debug, Clone)]
pub struct PermissionResponder {
    tx: async_channel::Sender<PermissionResponse>,
}

impl PermissionResponder {
    /// Deliver a response
    ///
    /// Returns false when nobody is waiting any more (the request timed out
    /// or already resolved).
    pub fn respond(&self, response: PermissionResponse) -> bool {
        match self.tx.try_send(response) {
            Ok(()) => true,
            Err(e) => {
                debug!("Permission response not delivered: {}", e);
                false
            }
        }
    }
}

/// Source of device access grants
pub trait PermissionAuthority: Send + Sync {
    /// Whether access is already granted
    fn has_permission(&self, device: &AttachedDevice) -> bool;

    /// Ask for access; the answer is delivered through `responder`
    fn request_permission(&self, device: &AttachedDevice, responder: PermissionResponder);
}

/// Negotiate access to `device`, waiting at most `timeout` for the answer
///
/// Resolves immediately when permission is already held. Otherwise the
/// first response for `device` decides; responses for other devices are
/// ignored. A denial without a device reference counts as a denial.
pub async fn negotiate_permission<A>(
    authority: &A,
    device: &AttachedDevice,
    timeout: Duration,
) -> Result<()>
where
    A: PermissionAuthority + ?Sized,
{
    let wanted = device.key;

    if authority.has_permission(device) {
        debug!("Device {} already has permission", wanted);
        return Ok(());
    }

    // Unbounded so answers for other devices never push ours out
    let (tx, rx) = async_channel::unbounded();
    authority.request_permission(device, PermissionResponder { tx });

    let wait = async {
        loop {
            match rx.recv().await {
                Ok(PermissionResponse {
                    device: Some(key),
                    granted: true,
                }) if key == wanted => {
                    info!("Granted permission to access USB device {}", wanted);
                    return Ok(());
                }
                Ok(PermissionResponse {
                    device: Some(key),
                    granted,
                }) if key != wanted => {
                    warn!(
                        "Ignoring permission response for a different USB device {} (granted: {})",
                        key, granted
                    );
                }
                Ok(_) => {
                    error!("Denied permission to access USB device {}", wanted);
                    return Err(TransportError::PermissionDenied { device: wanted });
                }
                Err(_) => {
                    error!("Permission request for {} abandoned by the OS", wanted);
                    return Err(TransportError::PermissionDenied { device: wanted });
                }
            }
        }
    };

    match tokio::time::timeout(timeout, wait).await {
        Ok(result) => result,
        Err(_) => {
            error!("No permission response for {} within {:?}", wanted, timeout);
            Err(TransportError::PermissionTimeout {
                device: wanted,
                timeout,
            })
        }
    }
}
