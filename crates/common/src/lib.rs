//! Common utilities for rsid-usb
//!
//! This crate provides the pieces shared by the transport, firmware and CLI
//! crates: the workspace-wide error type and tracing setup.

pub mod error;
pub mod logging;

pub use error::{Error, Result};
pub use logging::setup_logging;
