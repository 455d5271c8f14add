//! IP Tree Builder for MMDB Format
//!
//! Builds the binary search tree of an MMDB file. Nodes live in an arena;
//! node 0 is the root. Overlapping networks resolve by longest prefix, so
//! the result does not depend on insertion order.
//!
//! Leaves hold record ids chosen by the caller. Ids are turned into data
//! section offsets only when the tree is serialized.

use crate::mmdb::{IpVersion, RecordSize, DATA_SECTION_SEPARATOR_SIZE};
use crate::network::Network;
use rustc_hash::FxHashSet;
use std::io;
use std::net::IpAddr;

/// Networks that resolve to the IPv4 subtree (`::/96`) of an IPv6 tree
pub const IPV4_ALIASES: [(u128, u8); 2] = [
    // ::ffff:0:0/96 (IPv4-mapped)
    (0xffff_0000_0000, 96),
    // 2002::/16 (6to4)
    (0x2002 << 112, 16),
];

/// IP tree builder using arena allocation
#[derive(Debug, Clone)]
pub struct IpTreeBuilder {
    record_size: RecordSize,
    nodes: Vec<Node>,
    ip_version: IpVersion,
}

/// A node in the IP tree
#[derive(Debug, Clone)]
struct Node {
    /// Left child (bit 0)
    left: NodePointer,
    /// Right child (bit 1)
    right: NodePointer,
}

/// Node pointer - can point to another node, data, or be empty
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodePointer {
    /// Another node (arena index)
    Node(u32),
    /// Record id plus the prefix length that put it there.
    /// The prefix length only matters while building: a longer prefix
    /// always wins over a shorter one.
    Data(u32, u8),
    /// Not found
    Empty,
}

impl IpTreeBuilder {
    /// Create a tree builder for the given IP version
    pub fn new(ip_version: IpVersion, record_size: RecordSize) -> Self {
        Self {
            record_size,
            nodes: vec![Node::new_empty()],
            ip_version,
        }
    }

    /// IP version of the tree
    pub fn ip_version(&self) -> IpVersion {
        self.ip_version
    }

    /// Nodes allocated so far (aliases not included)
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Insert a network pointing at `record_id`
    ///
    /// IPv4 networks in an IPv6 tree live at `::a.b.c.d/(96 + len)`.
    pub fn insert(&mut self, network: &Network, record_id: u32) -> Result<(), String> {
        let prefix_len = network.prefix_len();
        match (network.addr(), self.ip_version) {
            (IpAddr::V4(v4), IpVersion::V4) => {
                self.insert_bits((u32::from(v4) as u128) << 96, prefix_len, record_id);
            }
            (IpAddr::V4(v4), IpVersion::V6) => {
                self.insert_bits(u32::from(v4) as u128, 96 + prefix_len, record_id);
            }
            (IpAddr::V6(v6), IpVersion::V6) => {
                self.insert_bits(u128::from(v6), prefix_len, record_id);
            }
            (IpAddr::V6(_), IpVersion::V4) => {
                return Err("cannot insert an IPv6 network into an IPv4-only tree".to_string());
            }
        }
        Ok(())
    }

    /// Insert the first `prefix_len` bits of `bits` (MSB first)
    fn insert_bits(&mut self, bits: u128, prefix_len: u8, record_id: u32) {
        if prefix_len == 0 {
            // A default route covers both halves of the root
            self.backfill_less_specific(0, record_id, 0);
            return;
        }

        let mut node_id = 0u32;

        for depth in 0..prefix_len {
            let bit = ((bits >> (127 - depth)) & 1) as u8;
            let child = self.nodes[node_id as usize].child(bit);

            if depth + 1 == prefix_len {
                match child {
                    NodePointer::Empty => {
                        self.nodes[node_id as usize]
                            .set_child(bit, NodePointer::Data(record_id, prefix_len));
                    }
                    NodePointer::Data(_, existing_prefix_len) => {
                        // Equal prefix means the same network: last insert wins
                        if prefix_len >= existing_prefix_len {
                            self.nodes[node_id as usize]
                                .set_child(bit, NodePointer::Data(record_id, prefix_len));
                        }
                    }
                    NodePointer::Node(child_id) => {
                        // More specific networks already exist below; fill around them
                        self.backfill_less_specific(child_id, record_id, prefix_len);
                    }
                }
                return;
            }

            node_id = match child {
                NodePointer::Empty => {
                    let new_id = self.allocate_node();
                    self.nodes[node_id as usize].set_child(bit, NodePointer::Node(new_id));
                    new_id
                }
                NodePointer::Node(child_id) => child_id,
                NodePointer::Data(existing_id, existing_prefix_len) => {
                    // A less specific network covers this path: split it so both
                    // halves keep the old data, then keep descending
                    let new_id = self.allocate_node();
                    let inherited = NodePointer::Data(existing_id, existing_prefix_len);
                    self.nodes[new_id as usize].left = inherited;
                    self.nodes[new_id as usize].right = inherited;
                    self.nodes[node_id as usize].set_child(bit, NodePointer::Node(new_id));
                    new_id
                }
            };
        }
    }

    fn allocate_node(&mut self) -> u32 {
        let id = self.nodes.len() as u32;
        self.nodes.push(Node::new_empty());
        id
    }

    /// Fill a subtree with less specific data without overriding more
    /// specific entries
    fn backfill_less_specific(&mut self, node_id: u32, record_id: u32, prefix_len: u8) {
        for bit in [0u8, 1] {
            match self.nodes[node_id as usize].child(bit) {
                NodePointer::Empty => {
                    self.nodes[node_id as usize]
                        .set_child(bit, NodePointer::Data(record_id, prefix_len));
                }
                NodePointer::Data(_, existing_prefix_len) => {
                    if prefix_len >= existing_prefix_len {
                        self.nodes[node_id as usize]
                            .set_child(bit, NodePointer::Data(record_id, prefix_len));
                    }
                }
                NodePointer::Node(child_id) => {
                    self.backfill_less_specific(child_id, record_id, prefix_len);
                }
            }
        }
    }

    /// Record ids still referenced by the tree, in node order
    ///
    /// Nodes are never unlinked once allocated, so every id found here is
    /// reachable from the root. Ids replaced by a later insert are gone.
    pub fn record_ids(&self) -> Vec<u32> {
        let mut seen = FxHashSet::default();
        let mut ids = Vec::new();
        for node in &self.nodes {
            for pointer in [node.left, node.right] {
                if let NodePointer::Data(id, _) = pointer {
                    if seen.insert(id) {
                        ids.push(id);
                    }
                }
            }
        }
        ids
    }

    /// Serialize the tree
    ///
    /// `offsets[id]` is the data section offset of record `id`. With
    /// `ipv4_aliasing` (IPv6 trees only) the networks in [`IPV4_ALIASES`]
    /// point at the `::/96` subtree. Returns the tree bytes and the node
    /// count.
    pub fn build(&self, ipv4_aliasing: bool, offsets: &[u32]) -> io::Result<(Vec<u8>, u32)> {
        let mut tree = self.clone();
        if ipv4_aliasing && self.ip_version == IpVersion::V6 {
            tree.apply_ipv4_aliases();
        }

        let node_count = u32::try_from(tree.nodes.len())
            .ok()
            .filter(|count| *count < self.record_size.max_value())
            .ok_or_else(|| {
                invalid_data(format!(
                    "{} nodes do not fit in {}-bit records",
                    tree.nodes.len(),
                    self.record_size.bits()
                ))
            })?;

        let node_size = self.record_size.node_bytes();
        let mut bytes = vec![0u8; tree.nodes.len() * node_size];

        for (node_id, node) in tree.nodes.iter().enumerate() {
            let left = self.pointer_to_value(node.left, node_count, offsets)?;
            let right = self.pointer_to_value(node.right, node_count, offsets)?;
            let slot = &mut bytes[node_id * node_size..(node_id + 1) * node_size];
            write_node(self.record_size, slot, left, right);
        }

        Ok((bytes, node_count))
    }

    /// Point every alias network at the IPv4 subtree
    fn apply_ipv4_aliases(&mut self) {
        let ipv4_root = self.node_at_path(0, 96);
        for (bits, prefix_len) in IPV4_ALIASES {
            let parent = self.node_at_path(bits, prefix_len - 1);
            let bit = ((bits >> (128 - prefix_len)) & 1) as u8;
            self.nodes[parent as usize].set_child(bit, NodePointer::Node(ipv4_root));
        }
    }

    /// Node reached after following `depth` bits, creating it if needed
    fn node_at_path(&mut self, bits: u128, depth: u8) -> u32 {
        let mut node_id = 0u32;
        for d in 0..depth {
            let bit = ((bits >> (127 - d)) & 1) as u8;
            node_id = match self.nodes[node_id as usize].child(bit) {
                NodePointer::Node(child_id) => child_id,
                NodePointer::Empty => {
                    let new_id = self.allocate_node();
                    self.nodes[node_id as usize].set_child(bit, NodePointer::Node(new_id));
                    new_id
                }
                inherited @ NodePointer::Data(..) => {
                    let new_id = self.allocate_node();
                    self.nodes[new_id as usize].left = inherited;
                    self.nodes[new_id as usize].right = inherited;
                    self.nodes[node_id as usize].set_child(bit, NodePointer::Node(new_id));
                    new_id
                }
            };
        }
        node_id
    }

    /// Record value for a pointer: node id, `node_count` for "not found",
    /// or `node_count + 16 + offset` for data
    fn pointer_to_value(
        &self,
        pointer: NodePointer,
        node_count: u32,
        offsets: &[u32],
    ) -> io::Result<u32> {
        let value = match pointer {
            NodePointer::Empty => Some(node_count),
            NodePointer::Node(id) => Some(id),
            NodePointer::Data(id, _) => {
                let offset = offsets.get(id as usize).copied().ok_or_else(|| {
                    invalid_data(format!("no data section offset for record {}", id))
                })?;
                node_count
                    .checked_add(DATA_SECTION_SEPARATOR_SIZE as u32)
                    .and_then(|base| base.checked_add(offset))
            }
        };

        value
            .filter(|v| *v <= self.record_size.max_value())
            .ok_or_else(|| {
                invalid_data(format!(
                    "data section too large for {}-bit records (node_count={})",
                    self.record_size.bits(),
                    node_count
                ))
            })
    }
}

impl Node {
    fn new_empty() -> Self {
        Self {
            left: NodePointer::Empty,
            right: NodePointer::Empty,
        }
    }

    fn child(&self, bit: u8) -> NodePointer {
        if bit == 0 {
            self.left
        } else {
            self.right
        }
    }

    fn set_child(&mut self, bit: u8, pointer: NodePointer) {
        if bit == 0 {
            self.left = pointer;
        } else {
            self.right = pointer;
        }
    }
}

/// Write one node (two big-endian records) into a node-sized slot
fn write_node(record_size: RecordSize, slot: &mut [u8], left: u32, right: u32) {
    let l = left.to_be_bytes();
    let r = right.to_be_bytes();
    match record_size {
        RecordSize::Bits24 => {
            slot[0..3].copy_from_slice(&l[1..]);
            slot[3..6].copy_from_slice(&r[1..]);
        }
        RecordSize::Bits28 => {
            // [left low 24][left high 4 | right high 4][right low 24]
            slot[0..3].copy_from_slice(&l[1..]);
            slot[3] = ((l[0] & 0x0F) << 4) | (r[0] & 0x0F);
            slot[4..7].copy_from_slice(&r[1..]);
        }
        RecordSize::Bits32 => {
            slot[0..4].copy_from_slice(&l);
            slot[4..8].copy_from_slice(&r);
        }
    }
}

fn invalid_data(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> Network {
        s.parse().unwrap()
    }

    #[test]
    fn test_new_builder_has_root() {
        let builder = IpTreeBuilder::new(IpVersion::V4, RecordSize::Bits24);
        assert_eq!(builder.node_count(), 1);
    }

    #[test]
    fn test_build_empty_tree() {
        let builder = IpTreeBuilder::new(IpVersion::V4, RecordSize::Bits24);
        let (bytes, node_count) = builder.build(false, &[]).unwrap();
        assert_eq!(node_count, 1);
        // Both records are the "not found" marker (node_count = 1)
        assert_eq!(bytes, vec![0, 0, 1, 0, 0, 1]);
    }

    #[test]
    fn test_insert_ipv4_cidr() {
        let mut builder = IpTreeBuilder::new(IpVersion::V4, RecordSize::Bits24);
        builder.insert(&net("192.168.0.0/16"), 0).unwrap();

        let (bytes, node_count) = builder.build(false, &[0]).unwrap();
        // One node per level above the leaf record
        assert_eq!(node_count, 16);
        assert_eq!(bytes.len(), 16 * 6);
    }

    #[test]
    fn test_ipv4_lands_under_96_zero_bits() {
        let mut builder = IpTreeBuilder::new(IpVersion::V6, RecordSize::Bits24);
        builder.insert(&net("1.0.0.0/8"), 0).unwrap();
        assert_eq!(builder.node_count(), 96 + 8);
    }

    #[test]
    fn test_ipv6_in_ipv4_tree_fails() {
        let mut builder = IpTreeBuilder::new(IpVersion::V4, RecordSize::Bits24);
        assert!(builder.insert(&net("2001:db8::/32"), 0).is_err());
    }

    #[test]
    fn test_default_route_fills_root() {
        let mut builder = IpTreeBuilder::new(IpVersion::V4, RecordSize::Bits24);
        builder.insert(&net("0.0.0.0/0"), 0).unwrap();
        let (bytes, node_count) = builder.build(false, &[5]).unwrap();
        assert_eq!(node_count, 1);
        // 1 + 16 + 5 in both records
        assert_eq!(bytes, vec![0, 0, 22, 0, 0, 22]);
    }

    #[test]
    fn test_aliases_share_ipv4_subtree() {
        let mut builder = IpTreeBuilder::new(IpVersion::V6, RecordSize::Bits24);
        builder.insert(&net("1.2.3.0/24"), 0).unwrap();
        let plain = builder.build(false, &[0]).unwrap().1;
        let aliased = builder.build(true, &[0]).unwrap().1;
        // Alias paths add nodes but never duplicate the IPv4 subtree
        assert!(aliased > plain);
        assert!(aliased < plain + 96 + 16);
        // Building does not mutate the builder
        assert_eq!(builder.node_count() as u32, plain);
    }

    #[test]
    fn test_record_overflow_is_an_error() {
        let mut builder = IpTreeBuilder::new(IpVersion::V4, RecordSize::Bits24);
        builder.insert(&net("10.0.0.0/8"), 0).unwrap();
        let err = builder.build(false, &[0xFF_FFF0]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let mut builder = IpTreeBuilder::new(IpVersion::V4, RecordSize::Bits32);
        builder.insert(&net("10.0.0.0/8"), 0).unwrap();
        assert!(builder.build(false, &[0xFF_FFF0]).is_ok());
    }

    #[test]
    fn test_missing_offset_is_an_error() {
        let mut builder = IpTreeBuilder::new(IpVersion::V4, RecordSize::Bits24);
        builder.insert(&net("10.0.0.0/8"), 3).unwrap();
        assert!(builder.build(false, &[0]).is_err());
    }

    #[test]
    fn test_record_ids_drop_replaced_records() {
        let mut builder = IpTreeBuilder::new(IpVersion::V6, RecordSize::Bits24);
        builder.insert(&net("10.0.0.0/24"), 0).unwrap();
        builder.insert(&net("10.0.0.0/24"), 1).unwrap();
        assert_eq!(builder.record_ids(), vec![1]);

        // Both halves covered by more specific networks
        builder.insert(&net("10.0.0.0/25"), 2).unwrap();
        builder.insert(&net("10.0.0.128/25"), 3).unwrap();
        assert_eq!(builder.record_ids(), vec![2, 3]);

        // A less specific network still reaches the addresses around them
        builder.insert(&net("10.0.0.0/8"), 4).unwrap();
        let mut ids = builder.record_ids();
        ids.sort_unstable();
        assert_eq!(ids, vec![2, 3, 4]);
    }

    #[test]
    fn test_28bit_node_layout() {
        let mut slot = [0u8; 7];
        write_node(RecordSize::Bits28, &mut slot, 0x0ABC_DEF1, 0x0123_4567);
        assert_eq!(slot, [0xBC, 0xDE, 0xF1, 0xA1, 0x23, 0x45, 0x67]);
    }
}
