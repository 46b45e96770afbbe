//! Streaming Flow Archive
//!
//! Persists batches of flows into an object store, one gzip'd JSON object per
//! batch, grouped into time-bounded streams with gap-free sequence numbers.
//!
//! ## Architecture
//!
//! ```text
//! ingest ──► BatchWriter ──► ObjectStore (S3 / LocalFs / InMemory)
//!                                  │
//! caller ──► QueryEngine ◄── list + read every object
//! ```
//!
//! ## Key Layout
//!
//! ```text
//! {prefix}/{stream opened at, UTC YYYYMMDDTHHMMSSZ}/{sequence:08}.gz
//! ```
//!
//! Each object carries `first-timestamp`, `last-timestamp` and `num-records`
//! metadata. Queries have no index and scan every object under the prefix.

pub mod archive;
pub mod clock;
pub mod config;
pub mod dst;
pub mod error;
pub mod ingest;
pub mod object_store;
pub mod query;
#[cfg(feature = "s3")]
pub mod s3_store;
pub mod simulated_store;
pub mod stream;
pub mod writer;

pub use archive::{build_store, FlowArchive, SharedStore};
pub use clock::{ArchiveClock, ProductionClock, SimulatedClock, UnixMillis};
pub use config::{
    ArchiveConfig, LogFormat, LoggingConfig, ObjectStoreType, PrefixConfig, S3Config,
};
pub use dst::{run_dst_batch, summarize_batch, ArchiveDSTConfig, ArchiveDSTHarness, ArchiveDSTResult};
pub use error::{ArchiveError, ArchiveResult};
pub use ingest::{
    spawn_ingest_worker, serve_tcp, IngestAdapter, IngestHandle, IngestMessage, IngestOutcome,
    IngestStats,
};
pub use object_store::{
    InMemoryObjectStore, LocalFsObjectStore, ObjectAttributes, ObjectStore, StoredObject,
    WriteRecord,
};
pub use query::{decode_object, QueryEngine, QueryStats};
#[cfg(feature = "s3")]
pub use s3_store::S3ObjectStore;
pub use simulated_store::{SimulatedObjectStore, SimulatedStoreConfig, SimulatedStoreStats};
pub use stream::{object_key, should_rotate, Stream};
pub use writer::{encode_batch, BatchMetadata, BatchWriter, StoredBatch};
