//! Firmware update error types

use crate::policy::Sku;
use crate::status::Status;
use std::time::Duration;
use thiserror::Error;
use transport::TransportError;

/// Fatal faults of an update attempt
///
/// Cloneable so the same fault can end the state machine and be published
/// on the event bridge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpdateError {
    #[error("Supported USB device not found")]
    DeviceNotFound,

    #[error("Permission to access the USB device was denied")]
    PermissionDenied,

    #[error("No permission response within {0:?}")]
    PermissionTimeout(Duration),

    #[error("Couldn't open connection to USB device: {0}")]
    ConnectionOpenFailed(String),

    #[error("Couldn't claim USB interface: {0}")]
    InterfaceClaimFailed(String),

    #[error("Couldn't configure USB device: {0}")]
    ConfigurationFailed(String),

    #[error("Couldn't extract firmware information from image: {0}")]
    MetadataExtractionFailed(String),

    #[error("Image is not encrypted for this device ({0})")]
    IncompatibleSku(Sku),

    #[error("Update policy does not allow flashing this image")]
    PolicyNotAllowed,

    #[error("Firmware {0} must be flashed before this image")]
    PolicyRequiresIntermediate(String),

    #[error("Flashing failed: {0}")]
    FlashFailed(Status),

    #[error("Device did not reappear within {0:?}")]
    RebootTimeout(Duration),

    #[error("Invalid update transition: {0}")]
    InvalidTransition(String),

    #[error("Update worker failed: {0}")]
    Worker(String),
}

impl From<TransportError> for UpdateError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::DeviceNotFound => UpdateError::DeviceNotFound,
            TransportError::PermissionDenied { .. } => UpdateError::PermissionDenied,
            TransportError::PermissionTimeout { timeout, .. } => UpdateError::PermissionTimeout(timeout),
            TransportError::InterfaceClaimFailed { interface, message } => {
                UpdateError::InterfaceClaimFailed(format!("interface {}: {}", interface, message))
            }
            TransportError::ConfigurationFailed(message) => UpdateError::ConfigurationFailed(message),
            other => UpdateError::ConnectionOpenFailed(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for UpdateError {
    fn from(err: tokio::task::JoinError) -> Self {
        UpdateError::Worker(err.to_string())
    }
}

/// Type alias for update results
pub type Result<T> = std::result::Result<T, UpdateError>;
