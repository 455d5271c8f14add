//! MMDB Database Writer
//!
//! The [`DatabaseSink`] implementation that produces MaxMind DB v2.0 files.
//! Inserted records are deduplicated and kept by id. On serialization only
//! the records the search tree still points at are encoded into the data
//! section, followed by the metadata.

use crate::data_section::{DataEncoder, DataValue};
use crate::error::InsertError;
use crate::ip_tree_builder::{IpTreeBuilder, IPV4_ALIASES};
use crate::mmdb::{IpVersion, RecordSize, DATA_SECTION_SEPARATOR_SIZE, METADATA_MARKER};
use crate::network::Network;
use crate::record::AttributeRecord;
use crate::sink::DatabaseSink;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::net::{IpAddr, Ipv6Addr};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Database type written when none is configured
pub const DEFAULT_DATABASE_TYPE: &str = "GeoLite2-ASN";

const DEFAULT_DESCRIPTION: &str = "ASN database built from GeoLite2-style CSV blocks";

/// Settings for [`MmdbWriter`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WriterOptions {
    /// `database_type` metadata value
    pub database_type: String,
    /// Search tree record width
    pub record_size: RecordSize,
    /// Tree IP version; IPv4 trees reject IPv6 networks
    pub ip_version: IpVersion,
    /// Make `::ffff:0:0/96` and `2002::/16` resolve to IPv4 data (IPv6 trees only)
    pub ipv4_aliasing: bool,
    /// `languages` metadata value
    pub languages: Vec<String>,
    /// `description` metadata value (language -> text)
    pub description: BTreeMap<String, String>,
    /// Fixed `build_epoch`; the current time when unset
    pub build_epoch: Option<u64>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            database_type: DEFAULT_DATABASE_TYPE.to_string(),
            record_size: RecordSize::Bits24,
            ip_version: IpVersion::V6,
            ipv4_aliasing: true,
            languages: vec!["en".to_string()],
            description: BTreeMap::new(),
            build_epoch: None,
        }
    }
}

/// Writer statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterStats {
    /// Networks inserted
    pub networks: usize,
    /// Distinct records reachable from the search tree
    pub unique_records: usize,
    /// Search tree nodes (before aliasing)
    pub nodes: usize,
    /// Data section size in bytes
    pub data_section_bytes: usize,
}

/// MMDB database writer
///
/// # Example
///
/// ```
/// use asn_mmdb::{AttributeRecord, DatabaseSink, MmdbWriter, WriterOptions};
///
/// let mut writer = MmdbWriter::new(WriterOptions::default());
/// let record = AttributeRecord::new()
///     .with_asn(13335)
///     .with_organization("Cloudflare, Inc.");
/// writer.insert(&"1.1.1.0/24".parse()?, &record)?;
///
/// let mut out = Vec::new();
/// writer.serialize(&mut out)?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct MmdbWriter {
    options: WriterOptions,
    tree: IpTreeBuilder,
    /// Distinct records, indexed by the ids stored in the tree
    records: Vec<DataValue>,
    /// Encoded record -> id
    record_ids: FxHashMap<Vec<u8>, u32>,
    inserted: usize,
}

impl MmdbWriter {
    /// Create an empty writer
    pub fn new(options: WriterOptions) -> Self {
        let tree = IpTreeBuilder::new(options.ip_version, options.record_size);
        Self {
            options,
            tree,
            records: Vec::new(),
            record_ids: FxHashMap::default(),
            inserted: 0,
        }
    }

    /// Set a custom database type name
    pub fn with_database_type(mut self, db_type: impl Into<String>) -> Self {
        self.options.database_type = db_type.into();
        self
    }

    /// Add a description in a specific language
    pub fn with_description(
        mut self,
        language: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        self.options.description.insert(language.into(), text.into());
        self
    }

    /// Writer settings
    pub fn options(&self) -> &WriterOptions {
        &self.options
    }

    /// Get statistics about the writer
    ///
    /// Encodes the reachable records to size the data section.
    pub fn stats(&self) -> WriterStats {
        let (data, _) = self.encode_reachable();
        WriterStats {
            networks: self.inserted,
            unique_records: data.unique_values(),
            nodes: self.tree.node_count(),
            data_section_bytes: data.size(),
        }
    }

    /// Encode the records the tree points at, returning the encoder and
    /// each record id's data section offset
    fn encode_reachable(&self) -> (DataEncoder, Vec<u32>) {
        let mut data = DataEncoder::new();
        let mut offsets = vec![0u32; self.records.len()];
        for id in self.tree.record_ids() {
            offsets[id as usize] = data.encode(&self.records[id as usize]);
        }
        (data, offsets)
    }

    /// Assemble the complete database file in memory
    pub fn build(&self) -> io::Result<Vec<u8>> {
        let (data, offsets) = self.encode_reachable();
        let aliasing = self.options.ipv4_aliasing && self.options.ip_version == IpVersion::V6;
        let (tree_bytes, node_count) = self.tree.build(aliasing, &offsets)?;

        let mut metadata_bytes = Vec::new();
        DataEncoder::encode_to_buffer(&self.metadata(node_count), &mut metadata_bytes);

        let data_section = data.as_bytes();
        let mut database = Vec::with_capacity(
            tree_bytes.len()
                + DATA_SECTION_SEPARATOR_SIZE
                + data_section.len()
                + METADATA_MARKER.len()
                + metadata_bytes.len(),
        );
        database.extend_from_slice(&tree_bytes);
        database.extend_from_slice(&[0u8; DATA_SECTION_SEPARATOR_SIZE]);
        database.extend_from_slice(data_section);
        database.extend_from_slice(METADATA_MARKER);
        database.extend_from_slice(&metadata_bytes);

        debug!(
            nodes = node_count,
            data_bytes = data_section.len(),
            total_bytes = database.len(),
            "assembled MMDB"
        );
        Ok(database)
    }

    fn metadata(&self, node_count: u32) -> DataValue {
        let build_epoch = self.options.build_epoch.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0)
        });

        let description = if self.options.description.is_empty() {
            BTreeMap::from([(
                "en".to_string(),
                DataValue::String(DEFAULT_DESCRIPTION.to_string()),
            )])
        } else {
            self.options
                .description
                .iter()
                .map(|(k, v)| (k.clone(), DataValue::String(v.clone())))
                .collect()
        };

        let metadata = BTreeMap::from([
            ("binary_format_major_version".to_string(), DataValue::Uint16(2)),
            ("binary_format_minor_version".to_string(), DataValue::Uint16(0)),
            ("build_epoch".to_string(), DataValue::Uint64(build_epoch)),
            (
                "database_type".to_string(),
                DataValue::String(self.options.database_type.clone()),
            ),
            ("description".to_string(), DataValue::Map(description)),
            (
                "ip_version".to_string(),
                DataValue::Uint16(self.options.ip_version.into()),
            ),
            (
                "languages".to_string(),
                DataValue::Array(
                    self.options
                        .languages
                        .iter()
                        .map(|l| DataValue::String(l.clone()))
                        .collect(),
                ),
            ),
            ("node_count".to_string(), DataValue::Uint32(node_count)),
            (
                "record_size".to_string(),
                DataValue::Uint16(self.options.record_size.bits()),
            ),
        ]);
        DataValue::Map(metadata)
    }

    /// IPv6 networks inside an alias range would be shadowed by the alias
    fn check_alias_overlap(&self, network: &Network) -> Result<(), InsertError> {
        if !self.options.ipv4_aliasing || self.options.ip_version != IpVersion::V6 {
            return Ok(());
        }
        if let IpAddr::V6(addr) = network.addr() {
            for (bits, prefix_len) in IPV4_ALIASES {
                let alias = Network::new(IpAddr::V6(Ipv6Addr::from(bits)), prefix_len)
                    .ok_or_else(|| InsertError::new(*network, "invalid alias network"))?;
                if network.prefix_len() >= prefix_len && alias.contains(IpAddr::V6(addr)) {
                    return Err(InsertError::new(
                        *network,
                        format!("network lies inside the IPv4 alias {}", alias),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Id of an identical record already stored, or a new one
    fn record_id(&mut self, value: DataValue) -> u32 {
        let mut key = Vec::new();
        DataEncoder::encode_to_buffer(&value, &mut key);
        if let Some(&id) = self.record_ids.get(&key) {
            return id;
        }
        let id = self.records.len() as u32;
        self.records.push(value);
        self.record_ids.insert(key, id);
        id
    }
}

impl DatabaseSink for MmdbWriter {
    fn insert(&mut self, network: &Network, record: &AttributeRecord) -> Result<(), InsertError> {
        if self.tree.ip_version() == IpVersion::V4 && !network.is_ipv4() {
            return Err(InsertError::new(
                *network,
                "cannot insert an IPv6 network into an IPv4-only tree",
            ));
        }
        self.check_alias_overlap(network)?;

        let value = record
            .to_data_value()
            .map_err(|reason| InsertError::new(*network, reason))?;

        let id = self.record_id(value);
        self.tree
            .insert(network, id)
            .map_err(|reason| InsertError::new(*network, reason))?;
        self.inserted += 1;
        Ok(())
    }

    fn serialize(&self, destination: &mut dyn Write) -> io::Result<u64> {
        let database = self.build()?;
        destination.write_all(&database)?;
        destination.flush()?;
        Ok(database.len() as u64)
    }
}
