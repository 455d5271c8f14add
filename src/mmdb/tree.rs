//! MMDB Search Tree Traversal
//!
//! Each node holds two records (left for bit 0, right for bit 1). A record
//! is either another node id, the "not found" marker (`node_count`), or a
//! pointer into the data section (`node_count + 16 + offset`).

use super::format::MmdbHeader;
use super::types::{IpVersion, MmdbError, RecordSize, DATA_SECTION_SEPARATOR_SIZE};
use std::net::IpAddr;

/// Result of an IP lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupResult {
    /// Offset into the data section (relative to data section start)
    pub data_offset: u32,
    /// Prefix length of the matching network, in the queried address family
    pub prefix_len: u8,
}

/// Search tree for IP address lookups
pub struct SearchTree<'a> {
    data: &'a [u8],
    header: &'a MmdbHeader,
}

impl<'a> SearchTree<'a> {
    /// Create a new search tree over the start of an MMDB file
    pub fn new(data: &'a [u8], header: &'a MmdbHeader) -> Self {
        Self { data, header }
    }

    /// Look up an IP address
    ///
    /// IPv4 addresses in an IPv6 tree are looked up at `::a.b.c.d`.
    pub fn lookup(&self, ip: IpAddr) -> Result<Option<LookupResult>, MmdbError> {
        let (bits, bit_count, v4_in_v6): (u128, u8, bool) = match (ip, self.header.ip_version) {
            (IpAddr::V4(v4), IpVersion::V4) => ((u32::from(v4) as u128) << 96, 32, false),
            (IpAddr::V4(v4), IpVersion::V6) => (u32::from(v4) as u128, 128, true),
            (IpAddr::V6(v6), IpVersion::V6) => (u128::from(v6), 128, false),
            (IpAddr::V6(_), IpVersion::V4) => {
                return Err(MmdbError::InvalidFormat(
                    "Cannot look up an IPv6 address in an IPv4-only database".to_string(),
                ))
            }
        };

        let node_count = self.header.node_count;
        let mut node = 0u32;

        for depth in 0..bit_count {
            let bit = ((bits >> (127 - depth)) & 1) as u8;
            let record = self.read_record(node, bit)?;

            if record == node_count {
                return Ok(None);
            } else if record < node_count {
                node = record;
            } else {
                let data_offset = self.calculate_data_offset(record)?;
                let prefix_len = if v4_in_v6 {
                    (depth + 1).saturating_sub(96)
                } else {
                    depth + 1
                };
                return Ok(Some(LookupResult {
                    data_offset,
                    prefix_len,
                }));
            }
        }

        Err(MmdbError::InvalidFormat(format!(
            "Search tree deeper than {} bits",
            bit_count
        )))
    }

    /// Read the left (`side == 0`) or right record of a node
    fn read_record(&self, node: u32, side: u8) -> Result<u32, MmdbError> {
        if node >= self.header.node_count {
            return Err(MmdbError::InvalidFormat(format!(
                "Node index {} exceeds node count {}",
                node, self.header.node_count
            )));
        }

        let node_bytes = self.header.record_size.node_bytes();
        let offset = node as usize * node_bytes;
        if offset + node_bytes > self.header.tree_size || offset + node_bytes > self.data.len() {
            return Err(MmdbError::InvalidFormat(format!(
                "Node offset {} exceeds tree size {}",
                offset, self.header.tree_size
            )));
        }
        let b = &self.data[offset..offset + node_bytes];

        let be = |bytes: &[u8]| bytes.iter().fold(0u32, |acc, x| (acc << 8) | *x as u32);

        let value = match (self.header.record_size, side) {
            (RecordSize::Bits24, 0) => be(&b[0..3]),
            (RecordSize::Bits24, _) => be(&b[3..6]),
            // Middle byte: high nibble extends the left record, low nibble the right
            (RecordSize::Bits28, 0) => (((b[3] >> 4) as u32) << 24) | be(&b[0..3]),
            (RecordSize::Bits28, _) => (((b[3] & 0x0F) as u32) << 24) | be(&b[4..7]),
            (RecordSize::Bits32, 0) => be(&b[0..4]),
            (RecordSize::Bits32, _) => be(&b[4..8]),
        };
        Ok(value)
    }

    /// Data offset = record - node_count - 16
    fn calculate_data_offset(&self, record: u32) -> Result<u32, MmdbError> {
        record
            .checked_sub(self.header.node_count)
            .and_then(|r| r.checked_sub(DATA_SECTION_SEPARATOR_SIZE as u32))
            .ok_or_else(|| {
                MmdbError::InvalidFormat(format!(
                    "Record {} points into the data section separator (node_count = {})",
                    record, self.header.node_count
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AttributeRecord, DatabaseSink, MmdbWriter, WriterOptions};

    fn build(ip_version: IpVersion, network: &str) -> Vec<u8> {
        let mut writer = MmdbWriter::new(WriterOptions {
            ip_version,
            build_epoch: Some(0),
            ..WriterOptions::default()
        });
        writer
            .insert(&network.parse().unwrap(), &AttributeRecord::new().with_asn(7))
            .unwrap();
        writer.build().unwrap()
    }

    #[test]
    fn test_prefix_len_in_ipv6_tree() {
        let bytes = build(IpVersion::V6, "1.2.0.0/16");
        let header = MmdbHeader::from_file(&bytes).unwrap();
        let tree = SearchTree::new(&bytes, &header);

        let v4 = tree.lookup("1.2.3.4".parse().unwrap()).unwrap().unwrap();
        assert_eq!(v4.prefix_len, 16);
        let v6 = tree.lookup("::102:304".parse().unwrap()).unwrap().unwrap();
        assert_eq!(v6.prefix_len, 112);
        assert_eq!(v4.data_offset, v6.data_offset);
        assert_eq!(tree.lookup("1.3.0.1".parse().unwrap()).unwrap(), None);
    }

    #[test]
    fn test_prefix_len_in_ipv4_tree() {
        let bytes = build(IpVersion::V4, "1.2.0.0/16");
        let header = MmdbHeader::from_file(&bytes).unwrap();
        let tree = SearchTree::new(&bytes, &header);

        let hit = tree.lookup("1.2.255.255".parse().unwrap()).unwrap().unwrap();
        assert_eq!(hit.prefix_len, 16);
        assert!(tree.lookup("2001:db8::1".parse().unwrap()).is_err());
    }
}
