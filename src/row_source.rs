//! Streaming CSV row source
//!
//! Wraps a `csv::Reader` configured for the ASN blocks layout: the first
//! record is a header and is always skipped, and every later record must
//! have as many fields as the header. Files ending in `.gz` are
//! decompressed on the fly.
//!
//! # Example
//!
//! ```rust,no_run
//! use asn_mmdb::row_source::RowSource;
//!
//! let mut rows = RowSource::open("GeoLite2-ASN-Blocks-IPv4.csv")?;
//! while let Some(row) = rows.next_row()? {
//!     println!("line {}: {:?}", row.line, row.fields);
//! }
//! # Ok::<(), asn_mmdb::Error>(())
//! ```

use crate::error::{Error, Result};
use csv::StringRecord;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Buffer size for file reading (128KB)
const BUFFER_SIZE: usize = 128 * 1024;

/// One data row, valid for a single iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRow {
    /// 1-based line number where the row starts
    pub line: u64,
    /// Raw fields
    pub fields: StringRecord,
}

/// Sequential reader of data rows from one CSV input
pub struct RowSource {
    path: PathBuf,
    reader: csv::Reader<Box<dyn Read>>,
    record: StringRecord,
}

impl RowSource {
    /// Open a CSV file
    ///
    /// Paths ending in `.gz` (case-insensitive) are gzip-decompressed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let is_gzip = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("gz"))
            .unwrap_or(false);

        let reader: Box<dyn Read> = if is_gzip {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };

        Ok(Self::from_reader(path, reader))
    }

    /// Read rows from an arbitrary reader; `name` is used in error messages
    pub fn from_reader(name: impl Into<PathBuf>, reader: impl Read + 'static) -> Self {
        let reader: Box<dyn Read> = Box::new(reader);
        let reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .buffer_capacity(BUFFER_SIZE)
            .from_reader(reader);

        Self {
            path: name.into(),
            reader,
            record: StringRecord::new(),
        }
    }

    /// Input this source reads from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next data row, or `None` at end of input
    pub fn next_row(&mut self) -> Result<Option<InputRow>> {
        match self.reader.read_record(&mut self.record) {
            Ok(true) => {
                let line = self.record.position().map(|p| p.line()).unwrap_or(0);
                Ok(Some(InputRow {
                    line,
                    fields: self.record.clone(),
                }))
            }
            Ok(false) => Ok(None),
            Err(source) => Err(self.csv_error(source)),
        }
    }

    fn csv_error(&self, source: csv::Error) -> Error {
        let line = source.position().map(|p| p.line()).unwrap_or(0);
        if let csv::ErrorKind::Io(_) = source.kind() {
            // Keep I/O failures (e.g. corrupt gzip) distinguishable from bad CSV
            if let csv::ErrorKind::Io(err) = source.into_kind() {
                return Error::Io {
                    path: self.path.clone(),
                    source: err,
                };
            }
            unreachable!("kind checked above");
        }
        Error::Csv {
            path: self.path.clone(),
            line,
            source,
        }
    }
}

impl Iterator for RowSource {
    type Item = Result<InputRow>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row().transpose()
    }
}
