//! Update policy and device SKU

use std::fmt;

/// How an image may be flashed onto the device, as decided by the SDK
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdatePolicy {
    /// The image cannot be flashed from the current firmware
    NotAllowed,
    /// The named intermediate firmware must be flashed first
    RequireIntermediateFirmware(String),
    /// All modules in a single pass
    Continuous,
    /// The core module first, then the rest after a reboot
    OpfwFirst,
}

impl UpdatePolicy {
    /// Whether the orchestrator may start a flash under this policy
    pub fn allows_update(&self) -> bool {
        matches!(self, UpdatePolicy::Continuous | UpdatePolicy::OpfwFirst)
    }
}

impl fmt::Display for UpdatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdatePolicy::NotAllowed => write!(f, "not allowed"),
            UpdatePolicy::RequireIntermediateFirmware(version) => {
                write!(f, "requires intermediate firmware {}", version)
            }
            UpdatePolicy::Continuous => write!(f, "continuous"),
            UpdatePolicy::OpfwFirst => write!(f, "OPFW first"),
        }
    }
}

/// Hardware variant, derived from the device serial number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sku {
    Sku1,
    Sku2,
}

impl Sku {
    /// Map a serial number to its SKU
    ///
    /// SKU2 serials are `12[02]d6228dddd...` or `dddd6229dddd...`
    /// (d = decimal digit); everything else is SKU1.
    pub fn from_serial(serial: &str) -> Self {
        let bytes = serial.as_bytes();
        if bytes.len() < 12 || !bytes[..12].iter().all(u8::is_ascii_digit) {
            return Sku::Sku1;
        }

        let first = bytes[0] == b'1' && bytes[1] == b'2' && matches!(bytes[2], b'0' | b'2');
        let first = first && &bytes[4..8] == b"6228";
        let second = &bytes[4..8] == b"6229";

        if first || second { Sku::Sku2 } else { Sku::Sku1 }
    }
}

impl fmt::Display for Sku {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sku::Sku1 => write!(f, "sku1"),
            Sku::Sku2 => write!(f, "sku2"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_update() {
        assert!(UpdatePolicy::Continuous.allows_update());
        assert!(UpdatePolicy::OpfwFirst.allows_update());
        assert!(!UpdatePolicy::NotAllowed.allows_update());
        assert!(!UpdatePolicy::RequireIntermediateFirmware("2.6.0".into()).allows_update());
    }

    #[test]
    fn test_sku_from_serial() {
        assert_eq!(Sku::from_serial("120362281234"), Sku::Sku2);
        assert_eq!(Sku::from_serial("122562280001XYZ"), Sku::Sku2);
        assert_eq!(Sku::from_serial("987662290000"), Sku::Sku2);
        assert_eq!(Sku::from_serial("121362281234"), Sku::Sku1);
        assert_eq!(Sku::from_serial("120362271234"), Sku::Sku1);
        assert_eq!(Sku::from_serial("12036228123"), Sku::Sku1);
        assert_eq!(Sku::from_serial("1203622A1234"), Sku::Sku1);
        assert_eq!(Sku::from_serial(""), Sku::Sku1);
    }
}
