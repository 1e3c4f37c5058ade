//! Firmware update orchestrator
//!
//! Drives the [`transition`] state machine: each effect is executed here,
//! against the USB host and the SDK updater, and its outcome fed back in.
//! Updater calls block, so they run on the blocking pool; everything else
//! stays on the update task, which owns the connection for the whole run.

use crate::bridge::{UpdateEvent, UpdateMonitor, UpdateReporter, create_update_bridge};
use crate::error::{Result, UpdateError};
use crate::machine::{Effect, FlashStep, Outcome, UpdateState, transition};
use crate::policy::{Sku, UpdatePolicy};
use crate::reboot::RebootWait;
use crate::sdk::{FirmwareInfo, FirmwareUpdater, UpdaterSettings};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, spawn_blocking};
use tracing::{debug, error, info, warn};
use transport::line_coding::LINE_CODING_TIMEOUT;
use transport::{
    DeviceRegistry, LineCoding, PermissionAuthority, UsbCdcConnection, UsbHost,
    negotiate_permission,
};

/// Default wait for a permission answer
pub const DEFAULT_PERMISSION_TIMEOUT: Duration = Duration::from_secs(30);

/// Tunables of an update run
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    pub registry: DeviceRegistry,
    pub line_coding: LineCoding,
    pub control_timeout: Duration,
    pub permission_timeout: Duration,
    pub reboot_wait: RebootWait,
    pub force_full: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            registry: DeviceRegistry::default(),
            line_coding: LineCoding::default(),
            control_timeout: LINE_CODING_TIMEOUT,
            permission_timeout: DEFAULT_PERMISSION_TIMEOUT,
            reboot_wait: RebootWait::default(),
            force_full: false,
        }
    }
}

/// Firmware update orchestrator
pub struct FirmwareUpdateLogic<H>
where
    H: UsbHost + PermissionAuthority,
{
    host: Arc<H>,
    updater: Arc<dyn FirmwareUpdater>,
    options: UpdateOptions,
}

impl<H> FirmwareUpdateLogic<H>
where
    H: UsbHost + PermissionAuthority,
{
    pub fn new(host: Arc<H>, updater: Arc<dyn FirmwareUpdater>) -> Self {
        Self {
            host,
            updater,
            options: UpdateOptions::default(),
        }
    }

    pub fn with_options(mut self, options: UpdateOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &UpdateOptions {
        &self.options
    }

    fn new_connection(&self) -> UsbCdcConnection<H> {
        UsbCdcConnection::new(Arc::clone(&self.host))
            .with_registry(self.options.registry.clone())
            .with_line_coding(self.options.line_coding, self.options.control_timeout)
    }

    /// Discover if needed, negotiate permission and open
    async fn connect(&self, connection: &mut UsbCdcConnection<H>) -> Result<UpdaterSettings> {
        if !connection.is_open() {
            if connection.discovered_device().is_none() && !connection.find_supported_device() {
                return Err(UpdateError::DeviceNotFound);
            }
            let device = connection
                .discovered_device()
                .cloned()
                .ok_or(UpdateError::DeviceNotFound)?;

            negotiate_permission(self.host.as_ref(), &device, self.options.permission_timeout).await?;
            connection.open_connection()?;
        }
        self.settings(connection)
    }

    fn settings(&self, connection: &UsbCdcConnection<H>) -> Result<UpdaterSettings> {
        connection
            .serial_config()
            .map(|serial| UpdaterSettings::new(serial).with_force_full(self.options.force_full))
            .ok_or_else(|| UpdateError::ConnectionOpenFailed("connection is closed".to_string()))
    }

    /// Ask the updater how `image` may be flashed
    ///
    /// Uses a connection of its own which is closed before returning. Nothing
    /// is flashed.
    pub async fn decide_update_policy(&self, image: &Path) -> Result<UpdatePolicy> {
        let mut connection = self.new_connection();
        let settings = self.connect(&mut connection).await?;

        let updater = Arc::clone(&self.updater);
        let path = image.to_path_buf();
        let policy = spawn_blocking(move || updater.decide_update_policy(&settings, &path)).await;
        connection.close_connection();

        let policy = policy?;
        info!("Update policy for {}: {}", image.display(), policy);
        Ok(policy)
    }

    /// Check an image before offering it for flashing
    ///
    /// Fails when the image metadata cannot be read or when the image is
    /// not encrypted for the device with `device_serial`.
    pub async fn preflight(&self, image: &Path, device_serial: &str) -> Result<FirmwareInfo> {
        let updater = Arc::clone(&self.updater);
        let path = image.to_path_buf();
        let serial = device_serial.to_string();

        let (info, encryption_supported) = spawn_blocking(move || {
            let info = updater.extract_fw_information(&path);
            let supported = info.is_ok() && updater.is_encryption_supported(&path, &serial);
            (info, supported)
        })
        .await?;

        let info = info.map_err(|status| {
            warn!("{} is not a valid firmware image: {}", image.display(), status);
            UpdateError::MetadataExtractionFailed(status.to_string())
        })?;

        if !encryption_supported {
            let sku = Sku::from_serial(device_serial);
            warn!("{} is not encrypted for {} devices", image.display(), sku);
            return Err(UpdateError::IncompatibleSku(sku));
        }

        info!(
            "{}: firmware {}, recognition {}, modules [{}]",
            image.display(),
            info.firmware_version,
            info.recognition_version,
            info.module_names.join(", ")
        );
        Ok(info)
    }

    /// Run a full update of `image`, reporting through `reporter`
    ///
    /// Returns once the device is back after the final flash, or with the
    /// fault that ended the run.
    pub async fn update_firmware(&self, image: &Path, reporter: UpdateReporter) -> Result<()> {
        let mut connection = self.new_connection();
        let mut state = UpdateState::Idle;
        let mut outcome = Outcome::Started;

        loop {
            let previous = state.phase();
            let (next, effect) = transition(state, outcome);
            state = next;

            if state.phase() != previous {
                debug!("Update phase: {} -> {}", previous, state.phase());
                reporter.send_event(UpdateEvent::PhaseChanged(state.phase()));
            }

            outcome = match effect {
                Effect::DecidePolicy => self.run_decide_policy(&mut connection, image).await,
                Effect::ExtractMetadata => self.run_extract_metadata(image).await,
                Effect::Flash(step) => self.run_flash(&mut connection, image, step, &reporter).await,
                Effect::Settle => match self.options.reboot_wait.wait_for_device(&mut connection).await {
                    Ok(_) => Outcome::DeviceSettled,
                    Err(e) => Outcome::Faulted(e),
                },
                Effect::AwaitReboot => {
                    info!("Waiting for the device to reboot into the new core firmware");
                    match self.options.reboot_wait.wait_for_device(&mut connection).await {
                        Ok(_) => Outcome::DeviceReappeared,
                        Err(e) => Outcome::Faulted(e),
                    }
                }
                Effect::Reconnect => match self.connect(&mut connection).await {
                    Ok(_) => Outcome::Reconnected,
                    Err(e) => Outcome::Faulted(e),
                },
                Effect::Finish => {
                    info!("Firmware update of {} finished", image.display());
                    reporter.send_event(UpdateEvent::Finished);
                    return Ok(());
                }
                Effect::Abort => {
                    connection.close_connection();
                    let err = match &state {
                        UpdateState::Failed(e) => e.clone(),
                        other => UpdateError::InvalidTransition(format!("abort in phase {}", other.phase())),
                    };
                    error!("Firmware update of {} failed: {}", image.display(), err);
                    reporter.send_event(UpdateEvent::Failed(err.clone()));
                    return Err(err);
                }
            };
        }
    }

    async fn run_decide_policy(&self, connection: &mut UsbCdcConnection<H>, image: &Path) -> Outcome {
        let settings = match self.connect(connection).await {
            Ok(settings) => settings,
            Err(e) => return Outcome::Faulted(e),
        };

        let updater = Arc::clone(&self.updater);
        let path = image.to_path_buf();
        match spawn_blocking(move || updater.decide_update_policy(&settings, &path)).await {
            Ok(policy) => {
                info!("Update policy: {}", policy);
                Outcome::PolicyDecided(policy)
            }
            Err(e) => Outcome::Faulted(e.into()),
        }
    }

    async fn run_extract_metadata(&self, image: &Path) -> Outcome {
        let updater = Arc::clone(&self.updater);
        let path = image.to_path_buf();
        match spawn_blocking(move || updater.extract_fw_information(&path)).await {
            Ok(Ok(info)) => {
                info!(
                    "Firmware {} (recognition {}) with {} modules",
                    info.firmware_version,
                    info.recognition_version,
                    info.module_names.len()
                );
                Outcome::MetadataExtracted(info)
            }
            Ok(Err(status)) => Outcome::Faulted(UpdateError::MetadataExtractionFailed(status.to_string())),
            Err(e) => Outcome::Faulted(e.into()),
        }
    }

    /// Flash one step, then close the connection whatever the result
    async fn run_flash(
        &self,
        connection: &mut UsbCdcConnection<H>,
        image: &Path,
        step: FlashStep,
        reporter: &UpdateReporter,
    ) -> Outcome {
        let settings = match self.settings(connection) {
            Ok(settings) => settings,
            Err(e) => return Outcome::Faulted(e),
        };

        info!(
            "Flashing modules [{}] (progress {}..{})",
            step.modules.join(", "),
            step.range.min,
            step.range.max
        );

        let updater = Arc::clone(&self.updater);
        let path = image.to_path_buf();
        let reporter = reporter.clone();
        let FlashStep { modules, range } = step;
        let result = spawn_blocking(move || {
            let mut on_progress = |progress: f32| reporter.progress(range.scale(progress));
            updater.update_modules(&settings, &path, &modules, &mut on_progress)
        })
        .await;

        connection.close_connection();

        match result {
            Ok(status) => {
                info!("Flash finished: {}", status);
                Outcome::Flashed(status)
            }
            Err(e) => Outcome::Faulted(e.into()),
        }
    }
}

/// Run [`FirmwareUpdateLogic::update_firmware`] on a new task
///
/// Returns the monitor for the run's events and the task handle.
pub fn spawn_firmware_update<H>(
    logic: Arc<FirmwareUpdateLogic<H>>,
    image: PathBuf,
) -> (UpdateMonitor, JoinHandle<Result<()>>)
where
    H: UsbHost + PermissionAuthority + 'static,
{
    let (monitor, reporter) = create_update_bridge();
    let handle = tokio::spawn(async move { logic.update_firmware(&image, reporter).await });
    (monitor, handle)
}
