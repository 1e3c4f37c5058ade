//! Firmware update orchestration for RealSense ID peripherals
//!
//! Sequences a firmware flash across device reboots:
//! - Asks the SDK for an update policy for the candidate image
//! - Flashes all modules in one pass, or the core module (OPFW) first and the
//!   rest after the device has rebooted into it
//! - Polls for the device to reappear within a bounded window
//! - Reports phases and a single continuous progress value over an event
//!   bridge
//!
//! The SDK updater is an external collaborator behind [`FirmwareUpdater`].

pub mod bridge;
pub mod error;
pub mod logic;
pub mod machine;
pub mod policy;
pub mod progress;
pub mod reboot;
pub mod sdk;
pub mod status;

pub use bridge::{UpdateEvent, UpdateMonitor, UpdateReporter, create_update_bridge};
pub use error::{Result, UpdateError};
pub use logic::{FirmwareUpdateLogic, UpdateOptions, spawn_firmware_update};
pub use machine::{Effect, FlashMode, FlashPlan, FlashStep, Outcome, UpdatePhase, UpdateState, transition};
pub use policy::{Sku, UpdatePolicy};
pub use progress::ProgressRange;
pub use reboot::RebootWait;
pub use sdk::{FirmwareInfo, FirmwareUpdater, OPFW, UpdaterSettings};
pub use status::Status;
