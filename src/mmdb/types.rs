//! MMDB-specific Type Definitions
//!
//! Data values use the `DataValue` type from the `data_section` module.

use serde::{Deserialize, Serialize};

/// MMDB metadata marker: "\xAB\xCD\xEFMaxMind.com"
pub const METADATA_MARKER: &[u8] = b"\xAB\xCD\xEFMaxMind.com";

/// Size of the zero-filled separator between search tree and data section
pub const DATA_SECTION_SEPARATOR_SIZE: usize = 16;

/// MMDB reader errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MmdbError {
    /// Invalid file format
    #[error("Invalid MMDB format: {0}")]
    InvalidFormat(String),
    /// Metadata not found
    #[error("MMDB metadata marker not found")]
    MetadataNotFound,
    /// Invalid metadata structure
    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),
    /// Data decoding error
    #[error("Data decode error: {0}")]
    DecodeError(String),
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),
}

/// IP version of the search tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum IpVersion {
    /// IPv4 only
    V4,
    /// IPv6 (may include IPv4 at ::/96)
    V6,
}

impl TryFrom<u16> for IpVersion {
    type Error = String;

    fn try_from(version: u16) -> Result<Self, Self::Error> {
        match version {
            4 => Ok(IpVersion::V4),
            6 => Ok(IpVersion::V6),
            _ => Err(format!("Invalid IP version: {}", version)),
        }
    }
}

impl From<IpVersion> for u16 {
    fn from(version: IpVersion) -> Self {
        match version {
            IpVersion::V4 => 4,
            IpVersion::V6 => 6,
        }
    }
}

/// Record size in bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum RecordSize {
    /// 24-bit records (3 bytes per record, 6 bytes per node)
    #[default]
    Bits24 = 24,
    /// 28-bit records (3.5 bytes per record, 7 bytes per node)
    Bits28 = 28,
    /// 32-bit records (4 bytes per record, 8 bytes per node)
    Bits32 = 32,
}

impl RecordSize {
    /// Get the size of a node (2 records) in bytes
    pub fn node_bytes(self) -> usize {
        match self {
            RecordSize::Bits24 => 6,
            RecordSize::Bits28 => 7,
            RecordSize::Bits32 => 8,
        }
    }

    /// Largest value a single record can hold
    pub fn max_value(self) -> u32 {
        match self {
            RecordSize::Bits24 => (1 << 24) - 1,
            RecordSize::Bits28 => (1 << 28) - 1,
            RecordSize::Bits32 => u32::MAX,
        }
    }

    /// Width in bits
    pub fn bits(self) -> u16 {
        self as u16
    }

    /// Create from bit size
    pub fn from_bits(bits: u16) -> Result<Self, MmdbError> {
        match bits {
            24 => Ok(RecordSize::Bits24),
            28 => Ok(RecordSize::Bits28),
            32 => Ok(RecordSize::Bits32),
            _ => Err(MmdbError::InvalidFormat(format!(
                "Invalid record size: {} bits",
                bits
            ))),
        }
    }
}

impl TryFrom<u16> for RecordSize {
    type Error = String;

    fn try_from(bits: u16) -> Result<Self, Self::Error> {
        RecordSize::from_bits(bits).map_err(|e| e.to_string())
    }
}

impl From<RecordSize> for u16 {
    fn from(size: RecordSize) -> Self {
        size.bits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_size_from_bits() {
        assert_eq!(RecordSize::from_bits(24).unwrap(), RecordSize::Bits24);
        assert_eq!(RecordSize::from_bits(28).unwrap(), RecordSize::Bits28);
        assert_eq!(RecordSize::from_bits(32).unwrap(), RecordSize::Bits32);
        assert!(RecordSize::from_bits(16).is_err());
    }

    #[test]
    fn test_record_size_limits() {
        assert_eq!(RecordSize::Bits24.max_value(), 0xFF_FFFF);
        assert_eq!(RecordSize::Bits28.max_value(), 0x0FFF_FFFF);
        assert_eq!(RecordSize::Bits28.node_bytes(), 7);
    }

    #[test]
    fn test_serde_as_integers() {
        let size: RecordSize = serde_json::from_str("28").unwrap();
        assert_eq!(size, RecordSize::Bits28);
        assert!(serde_json::from_str::<RecordSize>("20").is_err());
        assert_eq!(serde_json::to_string(&IpVersion::V6).unwrap(), "6");
    }
}
