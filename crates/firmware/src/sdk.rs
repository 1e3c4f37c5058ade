//! Biometric SDK seam
//!
//! The firmware updater lives in a native SDK; this crate only drives it.
//! Calls are blocking and are issued from the blocking thread pool.

use crate::policy::UpdatePolicy;
use crate::status::Status;
use std::path::Path;
use transport::SerialConfig;

/// Name of the core firmware module
pub const OPFW: &str = "OPFW";

/// Settings handed to every updater call that talks to the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdaterSettings {
    pub serial: SerialConfig,
    /// Flash every module even when its CRC already matches
    pub force_full: bool,
}

impl UpdaterSettings {
    pub fn new(serial: SerialConfig) -> Self {
        Self {
            serial,
            force_full: false,
        }
    }

    pub fn with_force_full(mut self, force_full: bool) -> Self {
        self.force_full = force_full;
        self
    }
}

/// Metadata embedded in a firmware image
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FirmwareInfo {
    pub firmware_version: String,
    pub recognition_version: String,
    pub module_names: Vec<String>,
}

impl FirmwareInfo {
    pub fn has_module(&self, name: &str) -> bool {
        self.module_names.iter().any(|m| m == name)
    }
}

/// Firmware updater provided by the SDK binding
pub trait FirmwareUpdater: Send + Sync {
    /// Decide how `image` may be flashed given the device's current state
    fn decide_update_policy(&self, settings: &UpdaterSettings, image: &Path) -> UpdatePolicy;

    /// Read version and module list from the image
    fn extract_fw_information(&self, image: &Path) -> Result<FirmwareInfo, Status>;

    /// Flash the named modules; `on_progress` receives fractions in [0, 1]
    fn update_modules(
        &self,
        settings: &UpdaterSettings,
        image: &Path,
        modules: &[String],
        on_progress: &mut dyn FnMut(f32),
    ) -> Status;

    /// Whether the image is encrypted for the device with this serial number
    fn is_encryption_supported(&self, image: &Path, device_serial: &str) -> bool;
}
