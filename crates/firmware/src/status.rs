//! SDK status codes

use std::fmt;

/// Result status reported by the biometric SDK
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    Error,
    SerialError,
    SecurityError,
    VersionMismatch,
    CrcError,
    LicenseError,
    LicenseCheck,
    TooManySpoofs,
}

impl Status {
    /// Numeric code as reported by the SDK
    pub const fn code(self) -> u32 {
        match self {
            Status::Ok => 100,
            Status::Error => 101,
            Status::SerialError => 102,
            Status::SecurityError => 103,
            Status::VersionMismatch => 104,
            Status::CrcError => 105,
            Status::LicenseError => 106,
            Status::LicenseCheck => 107,
            Status::TooManySpoofs => 108,
        }
    }

    pub const fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            100 => Status::Ok,
            101 => Status::Error,
            102 => Status::SerialError,
            103 => Status::SecurityError,
            104 => Status::VersionMismatch,
            105 => Status::CrcError,
            106 => Status::LicenseError,
            107 => Status::LicenseCheck,
            108 => Status::TooManySpoofs,
            _ => return None,
        })
    }

    pub const fn is_ok(self) -> bool {
        matches!(self, Status::Ok)
    }

    pub const fn description(self) -> &'static str {
        match self {
            Status::Ok => "Ok",
            Status::Error => "Error",
            Status::SerialError => "Serial Error",
            Status::SecurityError => "Security Error",
            Status::VersionMismatch => "Version Mismatch",
            Status::CrcError => "CRC Error",
            Status::LicenseError => "License Error",
            Status::LicenseCheck => "License Check",
            Status::TooManySpoofs => "Too Many Spoofs",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}
