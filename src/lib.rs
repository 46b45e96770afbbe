//! Flow archive: batches of network flow records persisted as gzip'd JSON
//! objects in time-bounded, sequence-numbered streams, and queried back by a
//! full listing scan.

pub mod flow;
pub mod observability;
pub mod streaming;

pub use flow::{Filter, Flow, FlowSet, SearchQuery};
pub use streaming::{ArchiveConfig, ArchiveError, ArchiveResult, FlowArchive};
