//! Flow Archiver
//!
//! Accepts length-delimited JSON messages over TCP and archives every
//! `store` batch into the configured object store.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | FLOW_ARCHIVE_CONFIG | - | TOML configuration file |
//! | FLOW_ARCHIVE_STORE | memory | memory, localfs, or s3 |
//! | FLOW_ARCHIVE_LOCAL_PATH | - | LocalFs base directory |
//! | FLOW_ARCHIVE_BUCKET | flows | Bucket name |
//! | FLOW_ARCHIVE_OBJECT_PREFIX | derived | Key prefix |
//! | FLOW_ARCHIVE_ENDPOINT | - | S3-compatible endpoint URL |
//! | FLOW_ARCHIVE_REGION | us-east-1 | S3 region |
//! | FLOW_ARCHIVE_ACCESS_KEY | AWS_ACCESS_KEY_ID | S3 credentials |
//! | FLOW_ARCHIVE_SECRET_KEY | AWS_SECRET_ACCESS_KEY | S3 credentials |
//! | FLOW_ARCHIVE_MAX_SECONDS_PER_STREAM | 86400 | Stream lifetime |
//! | FLOW_ARCHIVE_LISTEN_ADDR | 127.0.0.1:8091 | Ingest listener |
//! | FLOW_ARCHIVE_LOG_LEVEL | info | Log filter (RUST_LOG wins) |
//! | FLOW_ARCHIVE_LOG_FORMAT | plain | plain or json |

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use flow_archive::observability::init_tracing;
use flow_archive::streaming::{serve_tcp, spawn_ingest_worker, ArchiveConfig, FlowArchive, ObjectStoreType};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config_path = std::env::var("FLOW_ARCHIVE_CONFIG").ok().map(PathBuf::from);
    let config = ArchiveConfig::load(config_path.as_deref())?;
    init_tracing(&config.logging)?;

    println!("Flow Archiver");
    println!("=============");
    println!();
    println!("Configuration:");
    println!("  Listen: {}", config.listen_addr);
    println!("  Store: {:?}", config.store_type);
    println!("  Bucket: {}", config.bucket);
    println!("  Prefix: {}", config.object_prefix());
    println!("  Max stream: {}s", config.max_stream_duration.as_secs());
    match config.store_type {
        ObjectStoreType::LocalFs => {
            if let Some(path) = &config.local_path {
                println!("  Path: {}", path.display());
            }
        }
        ObjectStoreType::S3 => {
            if let Some(endpoint) = &config.s3.endpoint {
                println!("  Endpoint: {}", endpoint);
            }
            println!("  Region: {}", config.s3.region);
        }
        ObjectStoreType::Memory => {}
    }
    println!();

    if let (ObjectStoreType::LocalFs, Some(path)) = (config.store_type, &config.local_path) {
        std::fs::create_dir_all(path)?;
    }

    let archive = FlowArchive::from_config(&config)?;
    let adapter = Arc::new(archive.ingest_adapter());
    let (handle, worker) = spawn_ingest_worker(adapter.clone());

    let listener = TcpListener::bind(&config.listen_addr).await?;

    tokio::select! {
        result = serve_tcp(listener, handle.clone()) => {
            if let Err(e) = result {
                error!("Ingest listener failed: {}", e);
            }
        }
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    handle.shutdown().await;
    if let Err(e) = worker.await {
        error!("Ingest worker panicked: {}", e);
    }

    let stats = adapter.stats();
    info!(
        "Archiver stopped: received={} stored={} empty={} ignored={} dropped={} failed={}",
        stats.received, stats.stored, stats.empty, stats.ignored, stats.dropped, stats.failed
    );
    Ok(())
}
