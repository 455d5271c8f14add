use anyhow::{Context, Result};
use asn_mmdb::{DataValue, Database};
use serde_json::json;
use std::path::PathBuf;

use crate::cli_utils::{data_value_to_json, format_bytes, format_unix_timestamp};

pub fn cmd_inspect(database: PathBuf, json_output: bool, verbose: bool) -> Result<()> {
    let db = Database::open(&database)
        .with_context(|| format!("Failed to load database: {}", database.display()))?;
    let metadata = db
        .metadata()
        .with_context(|| format!("Failed to read metadata: {}", database.display()))?;

    if json_output {
        let output = json!({
            "file": database.display().to_string(),
            "size": db.size(),
            "data_section_size": db.data_section_size(),
            "metadata": data_value_to_json(&metadata),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Database: {}", database.display());
    println!("Format:   MMDB v2");

    if let DataValue::Map(map) = &metadata {
        println!();
        println!("Metadata:");

        if let Some(db_type) = map.get("database_type").and_then(DataValue::as_str) {
            println!("  Database type:   {}", db_type);
        }

        if let Some(desc_map) = map.get("description").and_then(DataValue::as_map) {
            println!("  Description:");
            for (lang, text) in desc_map {
                if let Some(text) = text.as_str() {
                    println!("    {}: {}", lang, text);
                }
            }
        }

        if let Some(epoch) = map.get("build_epoch").and_then(DataValue::as_u64) {
            println!(
                "  Build time:      {} ({})",
                format_unix_timestamp(epoch),
                epoch
            );
        }
        if let Some(version) = map.get("ip_version").and_then(DataValue::as_u64) {
            println!("  IP version:      IPv{}", version);
        }
        if let Some(count) = map.get("node_count").and_then(DataValue::as_u64) {
            println!("  Node count:      {}", count);
        }
        if let Some(size) = map.get("record_size").and_then(DataValue::as_u64) {
            println!("  Record size:     {} bits", size);
        }
    }

    if verbose {
        println!();
        println!("Sizes:");
        println!("  File:            {}", format_bytes(db.size() as u64));
        println!(
            "  Data section:    {}",
            format_bytes(db.data_section_size() as u64)
        );
        println!();
        println!("Full metadata:");
        println!(
            "{}",
            serde_json::to_string_pretty(&data_value_to_json(&metadata))?
        );
    }

    Ok(())
}
