//! asn-mmdb - Build MaxMind DB files from GeoLite2-style ASN CSV blocks
//!
//! The crate reads `network,autonomous_system_number,autonomous_system_organization`
//! CSV files (plain or gzip), validates each row into an [`AttributeRecord`],
//! and feeds it to a [`DatabaseSink`]. The shipped sink, [`MmdbWriter`],
//! produces MMDB v2 files readable by any MaxMind DB reader, including the
//! bundled [`Database`].
//!
//! # Quick Start
//!
//! ```rust
//! use asn_mmdb::row_source::RowSource;
//! use asn_mmdb::{pipeline, Database, MmdbWriter, DatabaseSink, WriterOptions};
//! use std::io::Cursor;
//!
//! let csv = "network,autonomous_system_number,autonomous_system_organization\n\
//!            1.0.0.0/24,13335,\"Cloudflare, Inc.\"\n";
//! let rows = RowSource::from_reader("blocks.csv", Cursor::new(csv));
//!
//! let mut writer = MmdbWriter::new(WriterOptions::default());
//! pipeline::ingest_rows(rows, &mut writer)?;
//!
//! let mut bytes = Vec::new();
//! writer.serialize(&mut bytes)?;
//!
//! let db = Database::from_bytes(bytes)?;
//! let hit = db.lookup("1.0.0.1".parse()?)?.expect("inserted above");
//! assert_eq!(hit.network.to_string(), "1.0.0.0/24");
//! assert_eq!(
//!     hit.data.as_map().unwrap()["autonomous_system_number"].as_u64(),
//!     Some(13335)
//! );
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Architecture
//!
//! ```text
//!  CSV file ──► RowSource ──► build_record ──► DatabaseSink::insert
//!  (per source, in order)                            │
//!                                 after all sources  ▼
//!                                       DatabaseSink::serialize ──► file
//! ```
//!
//! Every error is fatal. The first one stops the run and carries the file
//! and line it came from.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Data section encoding/decoding for v2 format
pub mod data_section;
/// Reading MMDB files back
pub mod database;
/// Error types
pub mod error;
/// IP tree builder for MMDB format
pub mod ip_tree_builder;
/// MMDB format implementation (internal)
mod mmdb;
pub mod mmdb_writer;
/// CIDR networks
pub mod network;
pub mod pipeline;
/// CSV row to record conversion
pub mod record;
pub mod row_source;
pub mod sink;

// Re-exports for Rust consumers

pub use crate::data_section::DataValue;
pub use crate::database::{Database, IpLookup};
pub use crate::error::{Error, InsertError, RecordError, Result};
pub use crate::mmdb::{IpVersion, MmdbError, RecordSize};
pub use crate::mmdb_writer::{MmdbWriter, WriterOptions, WriterStats};
pub use crate::network::Network;
pub use crate::pipeline::{run, IngestStats, InputSource, PipelineConfig};
pub use crate::record::{build_record, AttributeRecord};
pub use crate::sink::DatabaseSink;

/// Library version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
