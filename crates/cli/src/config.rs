//! rsid-usb configuration management

use anyhow::{Context, Result, anyhow};
use firmware::{RebootWait, UpdateOptions};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use transport::registry::parse_vid_pid;
use transport::{DeviceRegistry, LineCoding, SupportedDeviceDescriptor};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralSettings,
    #[serde(default)]
    pub usb: UsbSettings,
    #[serde(default)]
    pub permission: PermissionSettings,
    #[serde(default)]
    pub firmware: FirmwareSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralSettings {
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// USB transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsbSettings {
    /// Devices to accept in addition to the built-in ones ("0xVID:0xPID")
    #[serde(default)]
    pub extra_devices: Vec<String>,
    #[serde(default = "UsbSettings::default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "UsbSettings::default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "UsbSettings::default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: u8,
    /// Timeout of the SET_LINE_CODING control transfer
    #[serde(default = "UsbSettings::default_control_timeout_ms")]
    pub control_timeout_ms: u64,
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            extra_devices: Vec::new(),
            baud_rate: Self::default_baud_rate(),
            data_bits: Self::default_data_bits(),
            stop_bits: Self::default_stop_bits(),
            parity: 0,
            control_timeout_ms: Self::default_control_timeout_ms(),
        }
    }
}

impl UsbSettings {
    fn default_baud_rate() -> u32 {
        115_200
    }

    fn default_data_bits() -> u8 {
        8
    }

    fn default_stop_bits() -> u8 {
        1
    }

    fn default_control_timeout_ms() -> u64 {
        5000
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionSettings {
    /// How long to wait for a permission answer
    #[serde(default = "PermissionSettings::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PermissionSettings {
    fn default() -> Self {
        Self {
            timeout_secs: Self::default_timeout_secs(),
        }
    }
}

impl PermissionSettings {
    fn default_timeout_secs() -> u64 {
        30
    }
}

/// Firmware update settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirmwareSettings {
    #[serde(default = "FirmwareSettings::default_min_wait_ms")]
    pub min_wait_after_restart_ms: u64,
    #[serde(default = "FirmwareSettings::default_max_wait_ms")]
    pub max_wait_after_restart_ms: u64,
    #[serde(default = "FirmwareSettings::default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    /// Directory searched for firmware images (supports ~)
    #[serde(default)]
    pub image_dir: Option<String>,
}

impl Default for FirmwareSettings {
    fn default() -> Self {
        Self {
            min_wait_after_restart_ms: Self::default_min_wait_ms(),
            max_wait_after_restart_ms: Self::default_max_wait_ms(),
            probe_interval_ms: Self::default_probe_interval_ms(),
            image_dir: None,
        }
    }
}

impl FirmwareSettings {
    fn default_min_wait_ms() -> u64 {
        7000
    }

    fn default_max_wait_ms() -> u64 {
        30000
    }

    fn default_probe_interval_ms() -> u64 {
        1000
    }
}

impl Config {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/rsid-usb/config.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("{}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("rsid-usb").join("config.toml")
        } else {
            PathBuf::from(".config/rsid-usb/config.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.general.log_level,
                valid_levels.join(", ")
            ));
        }

        for device in &self.usb.extra_devices {
            parse_vid_pid(device).map_err(|e| anyhow!(e))?;
        }

        self.line_coding().validate().map_err(|e| anyhow!(e))?;

        let fw = &self.firmware;
        if fw.probe_interval_ms == 0 {
            return Err(anyhow!("probe_interval_ms must be greater than 0"));
        }
        if fw.max_wait_after_restart_ms < fw.min_wait_after_restart_ms {
            return Err(anyhow!(
                "max_wait_after_restart_ms ({}) is less than min_wait_after_restart_ms ({})",
                fw.max_wait_after_restart_ms,
                fw.min_wait_after_restart_ms
            ));
        }

        Ok(())
    }

    /// Built-in registry plus the configured extra devices
    pub fn registry(&self) -> Result<DeviceRegistry> {
        let extra = self
            .usb
            .extra_devices
            .iter()
            .map(|device| {
                parse_vid_pid(device)
                    .map(|(vid, pid)| SupportedDeviceDescriptor::new(vid, pid))
                    .map_err(|e| anyhow!(e))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(DeviceRegistry::builtin().with_extra(extra))
    }

    pub fn line_coding(&self) -> LineCoding {
        LineCoding {
            baud_rate: self.usb.baud_rate,
            stop_bits: self.usb.stop_bits,
            parity: self.usb.parity,
            data_bits: self.usb.data_bits,
        }
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.usb.control_timeout_ms)
    }

    pub fn permission_timeout(&self) -> Duration {
        Duration::from_secs(self.permission.timeout_secs)
    }

    pub fn reboot_wait(&self) -> RebootWait {
        RebootWait {
            min_wait: Duration::from_millis(self.firmware.min_wait_after_restart_ms),
            probe_interval: Duration::from_millis(self.firmware.probe_interval_ms),
            max_wait: Duration::from_millis(self.firmware.max_wait_after_restart_ms),
        }
    }

    /// Options for the firmware orchestrator
    ///
    /// For callers that embed an SDK binding and run updates. Whether to
    /// force a full flash is a per-run choice and stays off here.
    pub fn update_options(&self) -> Result<UpdateOptions> {
        Ok(UpdateOptions {
            registry: self.registry()?,
            line_coding: self.line_coding(),
            control_timeout: self.control_timeout(),
            permission_timeout: self.permission_timeout(),
            reboot_wait: self.reboot_wait(),
            force_full: false,
        })
    }

    /// Configured image directory with `~` expanded
    pub fn image_dir(&self) -> Option<PathBuf> {
        self.firmware
            .image_dir
            .as_deref()
            .map(|dir| PathBuf::from(shellexpand::tilde(dir).as_ref()))
    }
}
