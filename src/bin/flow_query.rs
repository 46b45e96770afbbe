//! Flow Query
//!
//! Scans the archive configured through `FLOW_ARCHIVE_*` (or the TOML file in
//! `FLOW_ARCHIVE_CONFIG`) and prints matching results as JSON.
//!
//! ```text
//! flow-query flows       [SEARCH_QUERY_JSON]
//! flow-query metrics     [SEARCH_QUERY_JSON] [FILTER_JSON]
//! flow-query raw-packets [SEARCH_QUERY_JSON] [FILTER_JSON]
//! ```
//!
//! Example: `flow-query flows '{"filter":{"gte":{"key":"Last","value":1700000000000}}}'`

use flow_archive::flow::{Filter, SearchQuery};
use flow_archive::observability::init_tracing;
use flow_archive::streaming::{ArchiveConfig, FlowArchive};
use std::path::PathBuf;
use tracing::info;

const USAGE: &str = "usage: flow-query <flows|metrics|raw-packets> [SEARCH_QUERY_JSON] [FILTER_JSON]";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    };

    let query: SearchQuery = match args.get(1) {
        Some(raw) => serde_json::from_str(raw)?,
        None => SearchQuery::default(),
    };
    let filter: Option<Filter> = match args.get(2) {
        Some(raw) => Some(serde_json::from_str(raw)?),
        None => None,
    };

    let config_path = std::env::var("FLOW_ARCHIVE_CONFIG").ok().map(PathBuf::from);
    let config = ArchiveConfig::load(config_path.as_deref())?;
    init_tracing(&config.logging)?;

    let archive = FlowArchive::from_config(&config)?;

    let output = match command.as_str() {
        "flows" => {
            let (set, stats) = archive.search_flows_with_stats(&query).await?;
            info!(
                "Scanned {} objects, skipped {}, matched {} flows",
                stats.objects_listed,
                stats.objects_skipped,
                set.len()
            );
            serde_json::to_string_pretty(&set.flows)?
        }
        "metrics" => {
            let metrics = archive.search_metrics(&query, filter.as_ref()).await?;
            serde_json::to_string_pretty(&metrics)?
        }
        "raw-packets" => {
            let packets = archive.search_raw_packets(&query, filter.as_ref()).await?;
            serde_json::to_string_pretty(&packets)?
        }
        other => {
            eprintln!("unknown command '{}'\n{}", other, USAGE);
            std::process::exit(2);
        }
    };

    println!("{}", output);
    Ok(())
}
