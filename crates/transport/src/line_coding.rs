//! CDC line coding
//!
//! The peripheral exposes a virtual serial port; before the SDK talks to it
//! the host sends SET_LINE_CODING on the control interface.

use crate::host::ControlRequest;
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// bmRequestType: host-to-device, class, interface recipient
pub const CLASS_INTERFACE_REQUEST_TYPE: u8 = 0x21;

/// CDC SET_LINE_CODING request code
pub const SET_LINE_CODING: u8 = 0x20;

/// Timeout for the line coding control transfer
pub const LINE_CODING_TIMEOUT: Duration = Duration::from_millis(5000);

/// Size of the SET_LINE_CODING payload
pub const LINE_CODING_LEN: usize = 7;

/// Serial parameters for the virtual port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineCoding {
    pub baud_rate: u32,
    pub stop_bits: u8,
    pub parity: u8,
    pub data_bits: u8,
}

impl Default for LineCoding {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            stop_bits: 1,
            parity: 0,
            data_bits: 8,
        }
    }
}

impl LineCoding {
    /// Encode as the 7-byte payload: dwDTERate (LE), bCharFormat, bParityType, bDataBits
    pub fn to_bytes(&self) -> [u8; LINE_CODING_LEN] {
        let mut buf = [0u8; LINE_CODING_LEN];
        LittleEndian::write_u32(&mut buf[..4], self.baud_rate);
        buf[4] = self.stop_bits;
        buf[5] = self.parity;
        buf[6] = self.data_bits;
        buf
    }

    /// Control request addressed to the given control interface
    pub fn control_request(&self, control_interface: u8, timeout: Duration) -> ControlRequest {
        ControlRequest {
            request_type: CLASS_INTERFACE_REQUEST_TYPE,
            request: SET_LINE_CODING,
            value: 0,
            index: u16::from(control_interface),
            timeout,
        }
    }

    /// Check the values against what CDC allows
    pub fn validate(&self) -> Result<(), String> {
        if self.baud_rate == 0 {
            return Err("baud_rate must be greater than 0".to_string());
        }
        if self.stop_bits > 2 {
            return Err(format!("Invalid stop_bits {}, must be 0-2", self.stop_bits));
        }
        if self.parity > 4 {
            return Err(format!("Invalid parity {}, must be 0-4", self.parity));
        }
        if !matches!(self.data_bits, 5 | 6 | 7 | 8 | 16) {
            return Err(format!(
                "Invalid data_bits {}, must be one of 5, 6, 7, 8, 16",
                self.data_bits
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_payload() {
        let payload = LineCoding::default().to_bytes();
        assert_eq!(payload, [0x00, 0xC2, 0x01, 0x00, 0x01, 0x00, 0x08]);
    }

    #[test]
    fn test_baud_rate_little_endian() {
        let coding = LineCoding {
            baud_rate: 0x0102_0304,
            ..LineCoding::default()
        };
        assert_eq!(&coding.to_bytes()[..4], &[0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn test_control_request() {
        let request = LineCoding::default().control_request(2, LINE_CODING_TIMEOUT);
        assert_eq!(request.request_type, 0x21);
        assert_eq!(request.request, 0x20);
        assert_eq!(request.value, 0);
        assert_eq!(request.index, 2);
        assert_eq!(request.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_validate() {
        assert!(LineCoding::default().validate().is_ok());

        let mut coding = LineCoding::default();
        coding.baud_rate = 0;
        assert!(coding.validate().is_err());

        let mut coding = LineCoding::default();
        coding.data_bits = 9;
        assert!(coding.validate().is_err());

        let mut coding = LineCoding::default();
        coding.stop_bits = 3;
        assert!(coding.validate().is_err());

        let mut coding = LineCoding::default();
        coding.parity = 5;
        assert!(coding.validate().is_err());
    }
}
