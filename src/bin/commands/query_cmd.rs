use anyhow::{Context, Result};
use asn_mmdb::Database;
use serde_json::json;
use std::net::IpAddr;
use std::path::PathBuf;

use crate::cli_utils::data_value_to_json;

pub fn cmd_query(database: PathBuf, ip: String, quiet: bool) -> Result<()> {
    let db = Database::open(&database)
        .with_context(|| format!("Failed to load database: {}", database.display()))?;

    let addr: IpAddr = ip
        .trim()
        .parse()
        .with_context(|| format!("Invalid IP address: {}", ip))?;

    let result = db
        .lookup(addr)
        .with_context(|| format!("Query failed for: {}", ip))?;
    let found = result.is_some();

    if quiet {
        std::process::exit(if found { 0 } else { 1 });
    }

    // Always an array, empty when nothing matched
    match result {
        Some(hit) => {
            let mut record = data_value_to_json(&hit.data);
            if let serde_json::Value::Object(ref mut map) = record {
                map.insert("network".to_string(), json!(hit.network.to_string()));
                map.insert("prefix_len".to_string(), json!(hit.network.prefix_len()));
            }
            println!("{}", serde_json::to_string_pretty(&json!([record]))?);
        }
        None => println!("[]"),
    }

    std::process::exit(if found { 0 } else { 1 });
}
