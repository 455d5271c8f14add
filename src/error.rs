//! Error types for the asn-mmdb library

use crate::network::Network;
use std::num::ParseIntError;
use std::path::PathBuf;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Why a single CSV row could not be turned into a (network, record) pair
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// The row did not have exactly three fields
    #[error("unexpected CSV row shape: expected 3 fields, got {}: {fields:?}", .fields.len())]
    Schema {
        /// Raw fields of the offending row
        fields: Vec<String>,
    },

    /// Column 0 is not valid CIDR notation
    #[error("invalid network {input:?}: {reason}")]
    NetworkParse {
        /// Raw network text
        input: String,
        /// What was wrong with it
        reason: String,
    },

    /// Column 1 is not a base-10 integer
    #[error("invalid ASN {input:?}: {source}")]
    NumericParse {
        /// Raw ASN text
        input: String,
        /// Underlying integer parse failure
        source: ParseIntError,
    },
}

/// Rejection of an insertion by a database sink
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot insert {network}: {reason}")]
pub struct InsertError {
    /// Network that was being inserted
    pub network: Network,
    /// Sink-specific reason
    pub reason: String,
}

impl InsertError {
    pub(crate) fn new(network: Network, reason: impl Into<String>) -> Self {
        Self {
            network,
            reason: reason.into(),
        }
    }
}

/// Main error type for the ingestion pipeline
///
/// Every variant is fatal: the pipeline stops at the first one it sees.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Opening, creating or reading a file failed
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Structural CSV violation (field count mismatch, bad UTF-8, ...)
    #[error("{}:{line}: malformed CSV: {source}", .path.display())]
    Csv {
        /// Input file
        path: PathBuf,
        /// 1-based line number, 0 if unknown
        line: u64,
        /// Underlying parser error
        source: csv::Error,
    },

    /// A data row failed validation
    #[error("{}:{line}: {source}", .path.display())]
    Row {
        /// Input file
        path: PathBuf,
        /// 1-based line number
        line: u64,
        /// What was wrong with the row
        source: RecordError,
    },

    /// The sink refused a record
    #[error("{}:{line}: {source}", .path.display())]
    Insert {
        /// Input file
        path: PathBuf,
        /// 1-based line number
        line: u64,
        /// Sink rejection
        source: InsertError,
    },

    /// Writing the finished database failed
    #[error("failed to write database to {}: {source}", .path.display())]
    Serialize {
        /// Output file
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Configuration could not be loaded
    #[error("invalid configuration {}: {reason}", .path.display())]
    Config {
        /// Config file
        path: PathBuf,
        /// What was wrong with it
        reason: String,
    },
}
