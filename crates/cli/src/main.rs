//! rsid-usb
//!
//! Host tool for RealSense ID peripherals attached over USB-CDC. Discovers
//! the device, negotiates access, opens and configures the serial link and
//! reports the transport triple the biometric SDK binding consumes.

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use cli::config::Config;
use cli::images::{EntryKind, list_directory};
use common::setup_logging;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use transport::{RusbHost, UsbCdcConnection, UsbHost, negotiate_permission};

#[derive(Parser, Debug)]
#[command(name = "rsid-usb")]
#[command(
    author,
    version,
    about = "rsid-usb - RealSense ID USB-CDC transport tool"
)]
#[command(long_about = "
Discovers a RealSense ID face-authentication peripheral on USB, negotiates
access, opens the CDC serial link and prints the file descriptor and bulk
endpoint addresses handed to the SDK.

EXAMPLES:
    # Probe the attached device (default action)
    rsid-usb

    # List all USB devices
    rsid-usb --list-devices

    # Wait for a rebooting device to come back
    rsid-usb --wait-for-device

    # List firmware images in a directory
    rsid-usb --list-images ~/firmware

CONFIGURATION:
    rsid-usb looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/rsid-usb/config.toml
    3. /etc/rsid-usb/config.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// List USB devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Discover, open and configure the device, print the transport, close
    #[arg(long)]
    probe: bool,

    /// Wait for a supported device to (re)appear using the reboot poll
    #[arg(long)]
    wait_for_device: bool,

    /// List firmware images (defaults to the configured image_dir)
    #[arg(long, value_name = "DIR", num_args = 0..=1)]
    list_images: Option<Option<PathBuf>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = Config::default();
        let path = Config::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        Config::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        Config::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.general.log_level);

    setup_logging(log_level).context("Failed to setup logging")?;

    info!("rsid-usb v{}", env!("CARGO_PKG_VERSION"));

    if let Some(dir) = args.list_images {
        let dir = dir
            .or_else(|| config.image_dir())
            .ok_or_else(|| anyhow!("No directory given and no firmware.image_dir configured"))?;
        return list_images_mode(&dir);
    }

    let host = Arc::new(RusbHost::new().context("Failed to initialize libusb")?);

    if args.list_devices {
        return list_devices_mode(&host, &config);
    }

    if args.wait_for_device {
        return wait_for_device_mode(host, &config).await;
    }

    if !args.probe {
        info!("No action given, probing");
    }
    probe_mode(host, &config).await
}

/// List USB devices and exit
fn list_devices_mode(host: &RusbHost, config: &Config) -> Result<()> {
    let registry = config.registry()?;
    let devices = host.attached_devices().context("Failed to enumerate USB devices")?;

    if devices.is_empty() {
        println!("No USB devices found.");
        return Ok(());
    }

    println!("Found {} USB device(s):\n", devices.len());
    for device in devices {
        let supported = registry.contains(device.vendor_id, device.product_id);
        println!(
            "  {:04x}:{:04x}  Bus {:03} Device {:03}{}",
            device.vendor_id,
            device.product_id,
            device.key.bus,
            device.key.address,
            if supported { "  [supported]" } else { "" }
        );
    }

    Ok(())
}

fn new_connection(host: Arc<RusbHost>, config: &Config) -> Result<UsbCdcConnection<RusbHost>> {
    Ok(UsbCdcConnection::new(host)
        .with_registry(config.registry()?)
        .with_line_coding(config.line_coding(), config.control_timeout()))
}

/// Open the device once, print its transport and close it again
async fn probe_mode(host: Arc<RusbHost>, config: &Config) -> Result<()> {
    let mut connection = new_connection(Arc::clone(&host), config)?;

    if !connection.find_supported_device() {
        bail!("Supported USB device not found");
    }
    let device = connection
        .discovered_device()
        .cloned()
        .ok_or_else(|| anyhow!("Supported USB device not found"))?;

    negotiate_permission(host.as_ref(), &device, config.permission_timeout())
        .await
        .context("Failed to get permission for the USB device")?;

    connection
        .open_connection()
        .context("Couldn't open connection to USB device")?;

    let details = connection.details();
    println!("Device:            {}", device);
    println!("File descriptor:   {}", details.file_descriptor);
    println!("Control interface: {}", details.control_interface_index);
    println!("Control endpoint:  {:#04x}", details.control_endpoint_address);
    println!("Read endpoint:     {:#04x}", details.read_endpoint_address);
    println!("Write endpoint:    {:#04x}", details.write_endpoint_address);

    connection.close_connection();
    Ok(())
}

/// Wait for a supported device with the reboot poll
async fn wait_for_device_mode(host: Arc<RusbHost>, config: &Config) -> Result<()> {
    let mut connection = new_connection(host, config)?;
    let wait = config.reboot_wait();

    println!(
        "Waiting for device (first probe after {:?}, giving up after {:?})...",
        wait.min_wait, wait.max_wait
    );
    let probes = wait.wait_for_device(&mut connection).await?;

    if let Some(device) = connection.discovered_device() {
        println!("Found {} after {} probe(s)", device, probes);
    }
    Ok(())
}

/// List a directory of firmware images
fn list_images_mode(dir: &std::path::Path) -> Result<()> {
    let entries = list_directory(dir)?;

    if entries.is_empty() {
        println!("{} is empty.", dir.display());
        return Ok(());
    }

    println!("{}:\n", dir.display());
    for entry in &entries {
        match entry.kind {
            EntryKind::Folder { sub_files } => {
                println!("  {}/  ({} files)", entry.name, sub_files);
            }
            EntryKind::File { size_mb } => {
                let marker = if entry.is_firmware_image() { "*" } else { " " };
                println!("{} {}  {:.2} MB", marker, entry.name, size_mb);
            }
        }
    }

    Ok(())
}
