//! rsid-usb command-line support
//!
//! Configuration loading and firmware image listing for the `rsid-usb`
//! binary.

pub mod config;
pub mod images;
