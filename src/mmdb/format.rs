//! MMDB Binary Format Parsing
//!
//! Locates the metadata section and extracts the few fields needed to walk
//! the search tree. Everything else is decoded on demand.

use super::types::{
    IpVersion, MmdbError, RecordSize, DATA_SECTION_SEPARATOR_SIZE, METADATA_MARKER,
};
use crate::data_section::{DataDecoder, DataValue};
use std::collections::BTreeMap;

/// Metadata must start within this many bytes of the end of the file
const METADATA_SEARCH_SIZE: usize = 128 * 1024;

/// MMDB file header
#[derive(Debug, Clone, Copy)]
pub struct MmdbHeader {
    /// Number of nodes in the search tree
    pub node_count: u32,
    /// Record size in bits (24, 28, or 32)
    pub record_size: RecordSize,
    /// IP version (4 or 6)
    pub ip_version: IpVersion,
    /// Size of the search tree in bytes
    pub tree_size: usize,
    /// Offset of the first byte after the metadata marker
    pub metadata_offset: usize,
}

impl MmdbHeader {
    /// Parse an MMDB file and extract header information
    pub fn from_file(data: &[u8]) -> Result<Self, MmdbError> {
        let marker_offset = find_metadata_marker(data)?;
        let metadata_offset = marker_offset + METADATA_MARKER.len();

        let metadata = decode_metadata(data, metadata_offset)?;
        let map = metadata
            .as_map()
            .ok_or_else(|| MmdbError::InvalidMetadata("Metadata is not a map".to_string()))?;

        let node_count = extract_uint(map, "node_count")?;
        let node_count = u32::try_from(node_count).map_err(|_| {
            MmdbError::InvalidMetadata(format!("node_count {} out of range", node_count))
        })?;
        let record_size = RecordSize::from_bits(extract_uint(map, "record_size")? as u16)?;
        let ip_version = IpVersion::try_from(extract_uint(map, "ip_version")? as u16)
            .map_err(MmdbError::InvalidMetadata)?;

        let tree_size = node_count as usize * record_size.node_bytes();
        if tree_size + DATA_SECTION_SEPARATOR_SIZE > marker_offset {
            return Err(MmdbError::InvalidFormat(format!(
                "Search tree of {} bytes does not fit before metadata at {}",
                tree_size, marker_offset
            )));
        }

        Ok(MmdbHeader {
            node_count,
            record_size,
            ip_version,
            tree_size,
            metadata_offset,
        })
    }

    /// Byte range of the data section within the file
    pub fn data_section_range(&self) -> std::ops::Range<usize> {
        let start = self.tree_size + DATA_SECTION_SEPARATOR_SIZE;
        let end = self.metadata_offset - METADATA_MARKER.len();
        start..end
    }
}

/// Decode the full metadata map starting at `metadata_offset`
pub fn decode_metadata(data: &[u8], metadata_offset: usize) -> Result<DataValue, MmdbError> {
    DataDecoder::new(&data[metadata_offset..])
        .decode(0)
        .map_err(|e| MmdbError::InvalidMetadata(format!("Failed to decode metadata: {}", e)))
}

/// Find the metadata marker in an MMDB file
///
/// The marker appears in the last 128KB of the file; if there are several,
/// the last one wins.
pub fn find_metadata_marker(data: &[u8]) -> Result<usize, MmdbError> {
    let search_start = data.len().saturating_sub(METADATA_SEARCH_SIZE);
    memchr::memmem::rfind(&data[search_start..], METADATA_MARKER)
        .map(|pos| search_start + pos)
        .ok_or(MmdbError::MetadataNotFound)
}

fn extract_uint(map: &BTreeMap<String, DataValue>, key: &str) -> Result<u64, MmdbError> {
    match map.get(key) {
        Some(value) => value.as_u64().ok_or_else(|| {
            MmdbError::InvalidMetadata(format!("Field '{}' is not an unsigned integer", key))
        }),
        None => Err(MmdbError::InvalidMetadata(format!(
            "Required field '{}' not found",
            key
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_section::DataEncoder;

    fn metadata_bytes(fields: Vec<(&str, DataValue)>) -> Vec<u8> {
        let map = fields
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let mut buf = Vec::new();
        DataEncoder::encode_to_buffer(&DataValue::Map(map), &mut buf);
        buf
    }

    #[test]
    fn test_find_metadata_marker() {
        let mut data = vec![0u8; 100];
        data.extend_from_slice(METADATA_MARKER);
        data.extend_from_slice(b"tail");
        assert_eq!(find_metadata_marker(&data).unwrap(), 100);
    }

    #[test]
    fn test_last_marker_wins() {
        let mut data = Vec::new();
        data.extend_from_slice(METADATA_MARKER);
        data.extend_from_slice(&[1, 2, 3]);
        data.extend_from_slice(METADATA_MARKER);
        assert_eq!(
            find_metadata_marker(&data).unwrap(),
            METADATA_MARKER.len() + 3
        );
    }

    #[test]
    fn test_metadata_not_found() {
        assert_eq!(
            find_metadata_marker(b"no marker here").unwrap_err(),
            MmdbError::MetadataNotFound
        );
        assert!(find_metadata_marker(&[]).is_err());
    }

    #[test]
    fn test_parse_header_minimal() {
        // one 24-bit node, separator, empty data section
        let mut data = vec![0u8; 6 + DATA_SECTION_SEPARATOR_SIZE];
        data.extend_from_slice(METADATA_MARKER);
        data.extend_from_slice(&metadata_bytes(vec![
            ("node_count", DataValue::Uint32(1)),
            ("record_size", DataValue::Uint16(24)),
            ("ip_version", DataValue::Uint16(6)),
        ]));

        let header = MmdbHeader::from_file(&data).unwrap();
        assert_eq!(header.node_count, 1);
        assert_eq!(header.record_size, RecordSize::Bits24);
        assert_eq!(header.ip_version, IpVersion::V6);
        assert_eq!(header.tree_size, 6);
        assert_eq!(header.data_section_range(), 22..22);
    }

    #[test]
    fn test_missing_field_is_invalid_metadata() {
        let mut data = vec![0u8; 32];
        data.extend_from_slice(METADATA_MARKER);
        data.extend_from_slice(&metadata_bytes(vec![("node_count", DataValue::Uint32(1))]));

        assert!(matches!(
            MmdbHeader::from_file(&data),
            Err(MmdbError::InvalidMetadata(_))
        ));
    }

    #[test]
    fn test_tree_larger_than_file_is_rejected() {
        let mut data = vec![0u8; 8];
        data.extend_from_slice(METADATA_MARKER);
        data.extend_from_slice(&metadata_bytes(vec![
            ("node_count", DataValue::Uint32(1000)),
            ("record_size", DataValue::Uint16(24)),
            ("ip_version", DataValue::Uint16(4)),
        ]));

        assert!(matches!(
            MmdbHeader::from_file(&data),
            Err(MmdbError::InvalidFormat(_))
        ));
    }
}
