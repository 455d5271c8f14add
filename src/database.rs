//! Reading built databases back
//!
//! A small MMDB reader used to inspect and verify the files produced by
//! [`crate::MmdbWriter`]. Files are memory-mapped on open.

use crate::data_section::{DataDecoder, DataValue};
use crate::mmdb::format::decode_metadata;
use crate::mmdb::{IpVersion, MmdbError, MmdbHeader, RecordSize, SearchTree};
use crate::network::Network;
use memmap2::Mmap;
use std::fs::File;
use std::net::IpAddr;
use std::path::Path;

/// Result of a successful IP lookup
#[derive(Debug, Clone, PartialEq)]
pub struct IpLookup {
    /// Largest block around the queried address that resolves to the same
    /// record. A less specific network split by more specific ones shows up
    /// as the piece that holds the address, e.g. `10.1.3.0/24` out of
    /// `10.1.0.0/16` when `10.1.2.0/24` is also present.
    pub network: Network,
    /// Record stored for that network
    pub data: DataValue,
}

/// Storage for database data - either owned or memory-mapped
enum DatabaseStorage {
    Owned(Vec<u8>),
    Mmap(Mmap),
}

impl DatabaseStorage {
    fn as_slice(&self) -> &[u8] {
        match self {
            DatabaseStorage::Owned(v) => v.as_slice(),
            DatabaseStorage::Mmap(m) => &m[..],
        }
    }
}

/// An opened MMDB file
///
/// # Example
///
/// ```no_run
/// use asn_mmdb::Database;
///
/// let db = Database::open("GeoLite2-ASN.mmdb")?;
/// if let Some(hit) = db.lookup("1.1.1.1".parse()?)? {
///     println!("{} -> {:?}", hit.network, hit.data);
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Database {
    data: DatabaseStorage,
    header: MmdbHeader,
}

impl Database {
    /// Open a database file using memory mapping
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MmdbError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            MmdbError::IoError(format!("Failed to open {}: {}", path.display(), e))
        })?;

        // SAFETY: the mapping is read-only and lives as long as `Database`;
        // callers must not truncate the file while it is open.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| {
            MmdbError::IoError(format!("Failed to mmap {}: {}", path.display(), e))
        })?;

        Self::from_storage(DatabaseStorage::Mmap(mmap))
    }

    /// Create a database from raw bytes
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, MmdbError> {
        Self::from_storage(DatabaseStorage::Owned(data))
    }

    fn from_storage(data: DatabaseStorage) -> Result<Self, MmdbError> {
        let header = MmdbHeader::from_file(data.as_slice())?;
        Ok(Self { data, header })
    }

    /// Look up the record for an IP address
    ///
    /// Returns `None` when no inserted network contains the address.
    pub fn lookup(&self, ip: IpAddr) -> Result<Option<IpLookup>, MmdbError> {
        let bytes = self.data.as_slice();
        let tree = SearchTree::new(bytes, &self.header);

        let Some(result) = tree.lookup(ip)? else {
            return Ok(None);
        };

        let section = &bytes[self.header.data_section_range()];
        let data = DataDecoder::new(section)
            .decode(result.data_offset)
            .map_err(MmdbError::DecodeError)?;

        let network = Network::new(ip, result.prefix_len).ok_or_else(|| {
            MmdbError::InvalidFormat(format!("Invalid prefix length {}", result.prefix_len))
        })?;

        Ok(Some(IpLookup { network, data }))
    }

    /// Full metadata map
    pub fn metadata(&self) -> Result<DataValue, MmdbError> {
        decode_metadata(self.data.as_slice(), self.header.metadata_offset)
    }

    /// Number of nodes in the search tree
    pub fn node_count(&self) -> u32 {
        self.header.node_count
    }

    /// Record size of the search tree
    pub fn record_size(&self) -> RecordSize {
        self.header.record_size
    }

    /// IP version of the search tree
    pub fn ip_version(&self) -> IpVersion {
        self.header.ip_version
    }

    /// Size of the file in bytes
    pub fn size(&self) -> usize {
        self.data.as_slice().len()
    }

    /// Size of the data section in bytes
    pub fn data_section_size(&self) -> usize {
        self.header.data_section_range().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmdb::METADATA_MARKER;

    #[test]
    fn test_rejects_garbage() {
        assert_eq!(
            Database::from_bytes(b"definitely not a database".to_vec()).err(),
            Some(MmdbError::MetadataNotFound)
        );
    }

    #[test]
    fn test_rejects_marker_without_metadata() {
        let mut bytes = vec![0u8; 16];
        bytes.extend_from_slice(METADATA_MARKER);
        assert!(matches!(
            Database::from_bytes(bytes),
            Err(MmdbError::InvalidMetadata(_))
        ));
    }

    #[test]
    fn test_open_missing_file() {
        assert!(matches!(
            Database::open("/nonexistent/asn.mmdb"),
            Err(MmdbError::IoError(_))
        ));
    }
}
