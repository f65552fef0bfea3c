//! Library version reported to callers

use serde::{Deserialize, Serialize};

/// Version of the emulated library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryVersion {
    pub major: u16,
    pub minor: u16,
    pub micro: u16,
    pub nano: u16,
    /// Release candidate suffix, empty for final releases
    pub rc: &'static str,
    pub describe: &'static str,
}

/// libusb 1.0.24, the release whose API the emulation reproduces
pub const LIBRARY_VERSION: LibraryVersion = LibraryVersion {
    major: 1,
    minor: 0,
    micro: 24,
    nano: 0,
    rc: "",
    describe: "http://libusb.info",
};

impl LibraryVersion {
    /// Check whether callers built against `other` can use this version
    pub fn is_compatible_with(&self, other: &LibraryVersion) -> bool {
        self.major == other.major
            && (self.minor, self.micro) >= (other.minor, other.micro)
    }
}

impl std::fmt::Display for LibraryVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}{}",
            self.major, self.minor, self.micro, self.nano, self.rc
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_version() {
        assert_eq!(LIBRARY_VERSION.to_string(), "1.0.24.0");
        assert_eq!(LIBRARY_VERSION.describe, "http://libusb.info");
    }

    #[test]
    fn test_version_compatibility() {
        let older = LibraryVersion {
            micro: 22,
            ..LIBRARY_VERSION
        };
        let next_major = LibraryVersion {
            major: 2,
            ..LIBRARY_VERSION
        };

        assert!(LIBRARY_VERSION.is_compatible_with(&older));
        assert!(!older.is_compatible_with(&LIBRARY_VERSION));
        assert!(!next_major.is_compatible_with(&LIBRARY_VERSION));
    }
}
