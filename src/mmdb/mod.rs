//! MaxMind DB (MMDB) format support
//!
//! - **types**: record sizes, IP versions, constants and reader errors
//! - **format**: metadata location and header parsing
//! - **tree**: search tree traversal for IP lookups
//!
//! Data decoding reuses `crate::data_section::DataDecoder`.

pub mod format;
pub mod tree;
pub mod types;

pub use format::MmdbHeader;
pub use tree::SearchTree;
pub use types::{IpVersion, MmdbError, RecordSize, DATA_SECTION_SEPARATOR_SIZE, METADATA_MARKER};
