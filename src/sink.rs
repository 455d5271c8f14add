//! The database sink seam
//!
//! The ingestion pipeline only needs two things from a database writer:
//! accept (network, record) pairs in any order, then write everything out
//! once. [`crate::MmdbWriter`] is the shipped implementation.

use crate::error::InsertError;
use crate::network::Network;
use crate::record::AttributeRecord;
use std::io::{self, Write};

/// Destination for validated records
pub trait DatabaseSink {
    /// Associate `record` with `network`
    ///
    /// Insertion order must not affect the serialized result. Overlap
    /// resolution is up to the sink.
    fn insert(&mut self, network: &Network, record: &AttributeRecord) -> Result<(), InsertError>;

    /// Write the accumulated database to `destination`
    ///
    /// Called once, after the last insertion. Returns the number of bytes
    /// written.
    fn serialize(&self, destination: &mut dyn Write) -> io::Result<u64>;
}

impl<S: DatabaseSink + ?Sized> DatabaseSink for &mut S {
    fn insert(&mut self, network: &Network, record: &AttributeRecord) -> Result<(), InsertError> {
        (**self).insert(network, record)
    }

    fn serialize(&self, destination: &mut dyn Write) -> io::Result<u64> {
        (**self).serialize(destination)
    }
}
