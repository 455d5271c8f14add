//! Ingestion pipeline
//!
//! Drives rows from each configured input through [`build_record`] into a
//! [`DatabaseSink`], then serializes the sink once. The first error of any
//! kind stops the run.

use crate::error::{Error, Result};
use crate::mmdb_writer::WriterOptions;
use crate::record::build_record;
use crate::row_source::RowSource;
use crate::sink::DatabaseSink;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace};

/// Default IPv4 blocks file
pub const DEFAULT_IPV4_CSV: &str = "GeoLite2-ASN-Blocks-IPv4.csv";
/// Default IPv6 blocks file
pub const DEFAULT_IPV6_CSV: &str = "GeoLite2-ASN-Blocks-IPv6.csv";
/// Default output database
pub const DEFAULT_OUTPUT: &str = "test-asn.mmdb";

/// One named CSV input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputSource {
    /// Label used in logs and statistics
    pub name: String,
    /// CSV file (optionally `.gz`)
    pub path: PathBuf,
}

impl InputSource {
    /// Create a named input
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// Everything a full run needs
///
/// Sources are processed in order. The defaults match the GeoLite2 ASN
/// distribution: the IPv4 blocks, then the IPv6 blocks, into
/// `test-asn.mmdb`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Inputs, in processing order
    pub sources: Vec<InputSource>,
    /// Database file to create
    pub output: PathBuf,
    /// Writer settings
    pub writer: WriterOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sources: vec![
                InputSource::new("ipv4", DEFAULT_IPV4_CSV),
                InputSource::new("ipv6", DEFAULT_IPV6_CSV),
            ],
            output: PathBuf::from(DEFAULT_OUTPUT),
            writer: WriterOptions::default(),
        }
    }
}

impl PipelineConfig {
    /// Load a config from a JSON file
    ///
    /// Missing fields take their default values.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

/// Counters for one input
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceStats {
    /// Source label
    pub name: String,
    /// Source file
    pub path: PathBuf,
    /// Data rows inserted
    pub rows: u64,
    /// Records carrying an ASN
    pub with_asn: u64,
    /// Records carrying an organization
    pub with_organization: u64,
    /// Records with neither field
    pub empty_records: u64,
}

/// Summary of an ingestion run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Per-source counters, in processing order
    pub sources: Vec<SourceStats>,
    /// Bytes written by [`run`]; zero after [`ingest`]
    pub bytes_written: u64,
}

impl IngestStats {
    /// Data rows across all sources
    pub fn total_rows(&self) -> u64 {
        self.sources.iter().map(|s| s.rows).sum()
    }

    /// Records carrying an ASN across all sources
    pub fn with_asn(&self) -> u64 {
        self.sources.iter().map(|s| s.with_asn).sum()
    }

    /// Records carrying an organization across all sources
    pub fn with_organization(&self) -> u64 {
        self.sources.iter().map(|s| s.with_organization).sum()
    }

    /// Records with neither field across all sources
    pub fn empty_records(&self) -> u64 {
        self.sources.iter().map(|s| s.empty_records).sum()
    }
}

/// Ingest every source, build the database and write it to `config.output`
///
/// The output file is created only after all rows were inserted, so a
/// failed ingestion leaves no file behind.
pub fn run<S>(config: &PipelineConfig, sink: &mut S) -> Result<IngestStats>
where
    S: DatabaseSink + ?Sized,
{
    let mut stats = ingest(&config.sources, sink)?;

    let output = &config.output;
    info!(output = %output.display(), "writing database");
    let file = File::create(output).map_err(|source| Error::Io {
        path: output.clone(),
        source,
    })?;

    let mut writer = BufWriter::new(file);
    match sink.serialize(&mut writer) {
        Ok(bytes) => {
            stats.bytes_written = bytes;
            info!(output = %output.display(), bytes, "database written");
            Ok(stats)
        }
        Err(source) => {
            drop(writer);
            // Best effort: don't leave a truncated database around
            let _ = fs::remove_file(output);
            Err(Error::Serialize {
                path: output.clone(),
                source,
            })
        }
    }
}

/// Ingest sources in order without serializing
pub fn ingest<S>(sources: &[InputSource], sink: &mut S) -> Result<IngestStats>
where
    S: DatabaseSink + ?Sized,
{
    let mut stats = IngestStats::default();
    for source in sources {
        stats.sources.push(ingest_source(source, sink)?);
    }
    debug!(
        sources = stats.sources.len(),
        rows = stats.total_rows(),
        "ingestion complete"
    );
    Ok(stats)
}

/// Open one source and ingest all of its rows
pub fn ingest_source<S>(source: &InputSource, sink: &mut S) -> Result<SourceStats>
where
    S: DatabaseSink + ?Sized,
{
    info!(source = %source.name, path = %source.path.display(), "ingesting");
    let rows = RowSource::open(&source.path)?;
    let mut stats = ingest_rows(rows, sink)?;
    stats.name = source.name.clone();
    debug!(
        source = %stats.name,
        rows = stats.rows,
        with_asn = stats.with_asn,
        with_organization = stats.with_organization,
        empty = stats.empty_records,
        "source complete"
    );
    Ok(stats)
}

/// Ingest every row of an already opened source
pub fn ingest_rows<S>(mut rows: RowSource, sink: &mut S) -> Result<SourceStats>
where
    S: DatabaseSink + ?Sized,
{
    let path = rows.path().to_path_buf();
    let mut stats = SourceStats {
        name: path.display().to_string(),
        path,
        ..SourceStats::default()
    };

    while let Some(row) = rows.next_row()? {
        let (network, record) = build_record(&row.fields).map_err(|source| Error::Row {
            path: stats.path.clone(),
            line: row.line,
            source,
        })?;

        sink.insert(&network, &record)
            .map_err(|source| Error::Insert {
                path: stats.path.clone(),
                line: row.line,
                source,
            })?;
        trace!(line = row.line, %network, "inserted");

        stats.rows += 1;
        if record.autonomous_system_number().is_some() {
            stats.with_asn += 1;
        }
        if record.autonomous_system_organization().is_some() {
            stats.with_organization += 1;
        }
        if record.is_empty() {
            stats.empty_records += 1;
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{InsertError, RecordError};
    use crate::network::Network;
    use crate::record::AttributeRecord;
    use std::io::{self, Cursor, Write};
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingSink {
        inserted: Vec<(Network, AttributeRecord)>,
        reject: Option<Network>,
        fail_serialize: bool,
    }

    impl DatabaseSink for RecordingSink {
        fn insert(
            &mut self,
            network: &Network,
            record: &AttributeRecord,
        ) -> std::result::Result<(), InsertError> {
            if self.reject == Some(*network) {
                return Err(InsertError::new(*network, "rejected"));
            }
            self.inserted.push((*network, record.clone()));
            Ok(())
        }

        fn serialize(&self, destination: &mut dyn Write) -> io::Result<u64> {
            if self.fail_serialize {
                return Err(io::Error::other("disk full"));
            }
            let text = format!("{} records", self.inserted.len());
            destination.write_all(text.as_bytes())?;
            Ok(text.len() as u64)
        }
    }

    fn rows(text: &str) -> RowSource {
        RowSource::from_reader("mem.csv", Cursor::new(text.as_bytes().to_vec()))
    }

    fn write_file(dir: &TempDir, name: &str, text: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[0].path, PathBuf::from(DEFAULT_IPV4_CSV));
        assert_eq!(config.sources[1].path, PathBuf::from(DEFAULT_IPV6_CSV));
        assert_eq!(config.output, PathBuf::from("test-asn.mmdb"));
    }

    #[test]
    fn test_counts_and_order() {
        let mut sink = RecordingSink::default();
        let stats = ingest_rows(
            rows("n,a,o\n1.0.0.0/24,13335,Cloudflare\n1.0.1.0/24,0,\n1.0.2.0/24,0,Org Only\n"),
            &mut sink,
        )
        .unwrap();

        assert_eq!(stats.rows, 3);
        assert_eq!(stats.with_asn, 1);
        assert_eq!(stats.with_organization, 2);
        assert_eq!(stats.empty_records, 1);

        let networks: Vec<String> = sink.inserted.iter().map(|(n, _)| n.to_string()).collect();
        assert_eq!(networks, ["1.0.0.0/24", "1.0.1.0/24", "1.0.2.0/24"]);
        assert!(sink.inserted[1].1.is_empty());
    }

    #[test]
    fn test_bad_row_stops_ingestion() {
        let mut sink = RecordingSink::default();
        let err = ingest_rows(
            rows("n,a,o\n1.0.0.0/24,1,A\n1.0.1.0/24,x,B\n1.0.2.0/24,3,C\n"),
            &mut sink,
        )
        .unwrap_err();

        match err {
            Error::Row { line, source, .. } => {
                assert_eq!(line, 3);
                assert!(matches!(source, RecordError::NumericParse { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(sink.inserted.len(), 1);
    }

    #[test]
    fn test_schema_error_from_wide_header() {
        let mut sink = RecordingSink::default();
        let err = ingest_rows(rows("a,b,c,d\n1.0.0.0/24,1,A,extra\n"), &mut sink).unwrap_err();
        assert!(matches!(
            err,
            Error::Row {
                source: RecordError::Schema { .. },
                ..
            }
        ));
        assert!(sink.inserted.is_empty());
    }

    #[test]
    fn test_sink_rejection_carries_location() {
        let mut sink = RecordingSink {
            reject: Some("1.0.1.0/24".parse().unwrap()),
            ..RecordingSink::default()
        };
        let err = ingest_rows(rows("n,a,o\n1.0.0.0/24,1,A\n1.0.1.0/24,2,B\n"), &mut sink)
            .unwrap_err();
        match err {
            Error::Insert { path, line, .. } => {
                assert_eq!(path, PathBuf::from("mem.csv"));
                assert_eq!(line, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_run_writes_output() {
        let dir = TempDir::new().unwrap();
        let v4 = write_file(&dir, "v4.csv", "n,a,o\n1.0.0.0/24,1,A\n");
        let v6 = write_file(&dir, "v6.csv", "n,a,o\n2001:db8::/32,2,B\n2001:db9::/32,3,C\n");
        let output = dir.path().join("out.db");

        let config = PipelineConfig {
            sources: vec![InputSource::new("ipv4", v4), InputSource::new("ipv6", v6)],
            output: output.clone(),
            writer: WriterOptions::default(),
        };
        let mut sink = RecordingSink::default();
        let stats = run(&config, &mut sink).unwrap();

        assert_eq!(stats.total_rows(), 3);
        assert_eq!(stats.sources[0].name, "ipv4");
        assert_eq!(stats.sources[1].rows, 2);
        assert_eq!(fs::read_to_string(&output).unwrap(), "3 records");
        assert_eq!(stats.bytes_written, 9);
    }

    #[test]
    fn test_run_failure_creates_no_output() {
        let dir = TempDir::new().unwrap();
        let v4 = write_file(&dir, "v4.csv", "n,a,o\n1.0.0.0/24,1,A\n");
        let output = dir.path().join("out.db");

        let config = PipelineConfig {
            sources: vec![
                InputSource::new("ipv4", v4),
                InputSource::new("ipv6", dir.path().join("missing.csv")),
            ],
            output: output.clone(),
            writer: WriterOptions::default(),
        };
        let mut sink = RecordingSink::default();
        let err = run(&config, &mut sink).unwrap_err();

        assert!(matches!(err, Error::Io { ref path, .. } if path.ends_with("missing.csv")));
        assert!(!output.exists());
    }

    #[test]
    fn test_serialize_failure_removes_output() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("out.db");
        let config = PipelineConfig {
            sources: Vec::new(),
            output: output.clone(),
            writer: WriterOptions::default(),
        };
        let mut sink = RecordingSink {
            fail_serialize: true,
            ..RecordingSink::default()
        };

        assert!(matches!(
            run(&config, &mut sink),
            Err(Error::Serialize { .. })
        ));
        assert!(!output.exists());
    }

    #[test]
    fn test_config_from_json() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "config.json",
            r#"{
                "sources": [{"name": "v4", "path": "blocks.csv.gz"}],
                "output": "asn.mmdb",
                "writer": {"record_size": 28, "database_type": "Custom-ASN"}
            }"#,
        );

        let config = PipelineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.sources, vec![InputSource::new("v4", "blocks.csv.gz")]);
        assert_eq!(config.output, PathBuf::from("asn.mmdb"));
        assert_eq!(config.writer.database_type, "Custom-ASN");
        assert_eq!(config.writer.record_size, crate::RecordSize::Bits28);
        assert!(config.writer.ipv4_aliasing);
    }

    #[test]
    fn test_config_rejects_unknown_fields() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "config.json", r#"{"outptu": "typo.mmdb"}"#);
        assert!(matches!(
            PipelineConfig::from_json_file(&path),
            Err(Error::Config { .. })
        ));

        let path = write_file(&dir, "sizes.json", r#"{"writer": {"record_size": 20}}"#);
        assert!(matches!(
            PipelineConfig::from_json_file(&path),
            Err(Error::Config { .. })
        ));
    }
}
