mod cli_utils;
mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use commands::{cmd_build, cmd_inspect, cmd_query, BuildArgs};

#[derive(Parser)]
#[command(name = "asn-mmdb")]
#[command(
    about = "Build MaxMind DB files from GeoLite2-style ASN CSV blocks",
    long_about = "asn-mmdb - Convert ASN CSV blocks into an MMDB database\n\n\
    Reads `network,autonomous_system_number,autonomous_system_organization` rows\n\
    from the IPv4 and IPv6 block files (plain or .gz) and writes a MaxMind DB v2\n\
    file. The first bad row stops the build and no output file is written.\n\n\
    Examples:\n\
      asn-mmdb build\n\
      asn-mmdb build --ipv4 v4.csv.gz --ipv6 v6.csv.gz -o GeoLite2-ASN.mmdb\n\
      asn-mmdb query test-asn.mmdb 1.0.0.1\n\
      asn-mmdb inspect test-asn.mmdb --verbose"
)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a database from ASN CSV block files
    Build {
        /// IPv4 blocks CSV (default: GeoLite2-ASN-Blocks-IPv4.csv)
        #[arg(long, value_name = "FILE")]
        ipv4: Option<PathBuf>,

        /// IPv6 blocks CSV (default: GeoLite2-ASN-Blocks-IPv6.csv)
        #[arg(long, value_name = "FILE")]
        ipv6: Option<PathBuf>,

        /// Output database file (default: test-asn.mmdb)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Search tree record size in bits: 24, 28 or 32 (default: 24)
        #[arg(short = 'r', long, value_name = "BITS")]
        record_size: Option<u16>,

        /// Database type name for metadata (default: GeoLite2-ASN)
        #[arg(short = 't', long, value_name = "NAME")]
        database_type: Option<String>,

        /// Description text for metadata
        #[arg(short = 'd', long)]
        description: Option<String>,

        /// Language code for description
        #[arg(long, default_value = "en")]
        desc_lang: String,

        /// JSON config file; flags override its values
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Verbose output during build
        #[arg(short, long)]
        verbose: bool,

        /// Show detailed debug output (per-source and per-row logging)
        #[arg(long)]
        debug: bool,
    },

    /// Look up an IP address in a database
    Query {
        /// Path to the database
        #[arg(value_name = "DATABASE")]
        database: PathBuf,

        /// IPv4 or IPv6 address
        #[arg(value_name = "IP")]
        ip: String,

        /// Quiet mode - no output, only exit code (0 = found, 1 = not found)
        #[arg(short, long)]
        quiet: bool,
    },

    /// Show database metadata
    Inspect {
        /// Path to the database
        #[arg(value_name = "DATABASE")]
        database: PathBuf,

        /// Output metadata as JSON
        #[arg(short, long)]
        json: bool,

        /// Show full metadata and section sizes
        #[arg(short, long)]
        verbose: bool,
    },
}

fn init_logging(default_level: &str) {
    // RUST_LOG wins over the command-line verbosity
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match &cli.command {
        Commands::Build { debug: true, .. } => "asn_mmdb=trace",
        Commands::Build { verbose: true, .. } => "asn_mmdb=debug",
        _ => "warn",
    };
    init_logging(level);

    match cli.command {
        Commands::Build {
            ipv4,
            ipv6,
            output,
            record_size,
            database_type,
            description,
            desc_lang,
            config,
            verbose,
            debug,
        } => cmd_build(BuildArgs {
            ipv4,
            ipv6,
            output,
            record_size,
            database_type,
            description,
            desc_lang,
            config,
            verbose: verbose || debug,
        }),
        Commands::Query {
            database,
            ip,
            quiet,
        } => cmd_query(database, ip, quiet),
        Commands::Inspect {
            database,
            json,
            verbose,
        } => cmd_inspect(database, json, verbose),
    }
}
