use anyhow::{Context, Result};
use asn_mmdb::{InputSource, MmdbWriter, PipelineConfig, RecordSize};
use std::path::{Path, PathBuf};

use crate::cli_utils::{format_bytes, format_number};

/// Flags of the `build` subcommand
pub struct BuildArgs {
    pub ipv4: Option<PathBuf>,
    pub ipv6: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub record_size: Option<u16>,
    pub database_type: Option<String>,
    pub description: Option<String>,
    pub desc_lang: String,
    pub config: Option<PathBuf>,
    pub verbose: bool,
}

pub fn cmd_build(args: BuildArgs) -> Result<()> {
    let config = resolve_config(&args)?;

    if args.verbose {
        println!("Building ASN database...");
        for source in &config.sources {
            println!("  Input ({}): {}", source.name, source.path.display());
        }
        println!("  Output:      {}", config.output.display());
        println!("  Record size: {} bits", config.writer.record_size.bits());
        println!();
    }

    let mut writer = MmdbWriter::new(config.writer.clone());
    let stats = asn_mmdb::run(&config, &mut writer)
        .with_context(|| format!("Failed to build {}", config.output.display()))?;

    if args.verbose {
        for source in &stats.sources {
            println!(
                "  {:<6} {} rows from {}",
                source.name,
                format_number(source.rows),
                source.path.display()
            );
        }
        let writer_stats = writer.stats();
        println!();
        println!("✓ Database built successfully!");
        println!("  Output:         {}", config.output.display());
        println!("  Rows:           {}", format_number(stats.total_rows()));
        println!("  With ASN:       {}", format_number(stats.with_asn()));
        println!("  With org:       {}", format_number(stats.with_organization()));
        println!("  Empty records:  {}", format_number(stats.empty_records()));
        println!(
            "  Unique records: {}",
            format_number(writer_stats.unique_records as u64)
        );
        println!("  Tree nodes:     {}", format_number(writer_stats.nodes as u64));
        println!("  Size:           {}", format_bytes(stats.bytes_written));
    } else {
        println!("✓ Database built: {}", config.output.display());
    }

    Ok(())
}

/// Start from the config file (or defaults) and apply explicit flags on top
fn resolve_config(args: &BuildArgs) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    if let Some(path) = &args.ipv4 {
        set_source(&mut config, "ipv4", path);
    }
    if let Some(path) = &args.ipv6 {
        set_source(&mut config, "ipv6", path);
    }
    if let Some(output) = &args.output {
        config.output = output.clone();
    }
    if let Some(bits) = args.record_size {
        config.writer.record_size = RecordSize::from_bits(bits)
            .with_context(|| format!("Invalid record size: {}", bits))?;
    }
    if let Some(db_type) = &args.database_type {
        config.writer.database_type = db_type.clone();
    }
    if let Some(desc) = &args.description {
        config
            .writer
            .description
            .insert(args.desc_lang.clone(), desc.clone());
    }

    Ok(config)
}

/// Replace the path of the named source, adding the source if it is missing
fn set_source(config: &mut PipelineConfig, name: &str, path: &Path) {
    if let Some(source) = config.sources.iter_mut().find(|s| s.name == name) {
        source.path = path.to_path_buf();
        return;
    }
    let source = InputSource::new(name, path);
    // Keep the IPv4-then-IPv6 order when both are added back
    if name == "ipv4" {
        config.sources.insert(0, source);
    } else {
        config.sources.push(source);
    }
}
