//! Flow Archive
//!
//! One writer and one query engine sharing a store, bucket and prefix. The
//! store is chosen at runtime from `ArchiveConfig`, so it is held as a trait
//! object.

use crate::flow::{Filter, Flow, FlowMetric, FlowSet, RawPackets, SearchQuery};
use crate::streaming::clock::{ArchiveClock, ProductionClock};
use crate::streaming::config::{ArchiveConfig, ObjectStoreType};
use crate::streaming::error::{ArchiveError, ArchiveResult};
use crate::streaming::ingest::IngestAdapter;
use crate::streaming::object_store::{InMemoryObjectStore, LocalFsObjectStore, ObjectStore};
use crate::streaming::query::{QueryEngine, QueryStats};
use crate::streaming::writer::{BatchWriter, StoredBatch};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Store shared by the writer and the query engine
pub type SharedStore = Arc<dyn ObjectStore>;

/// Build the configured object store
pub fn build_store(config: &ArchiveConfig) -> ArchiveResult<SharedStore> {
    match config.store_type {
        ObjectStoreType::Memory => Ok(Arc::new(InMemoryObjectStore::new())),
        ObjectStoreType::LocalFs => {
            let path = config.local_path.clone().ok_or_else(|| {
                ArchiveError::Config("local_path is required for the localfs store".to_string())
            })?;
            Ok(Arc::new(LocalFsObjectStore::new(path)))
        }
        #[cfg(feature = "s3")]
        ObjectStoreType::S3 => Ok(Arc::new(crate::streaming::s3_store::S3ObjectStore::new(
            config.s3.clone(),
        ))),
        #[cfg(not(feature = "s3"))]
        ObjectStoreType::S3 => Err(ArchiveError::Config(
            "the s3 store requires building with the `s3` feature".to_string(),
        )),
    }
}

/// Writer and query engine over one archive location
pub struct FlowArchive<C: ArchiveClock = ProductionClock> {
    store: SharedStore,
    writer: Arc<BatchWriter<dyn ObjectStore, C>>,
    query: QueryEngine<dyn ObjectStore>,
}

impl FlowArchive<ProductionClock> {
    /// Build store, writer and query engine from configuration
    pub fn from_config(config: &ArchiveConfig) -> ArchiveResult<Self> {
        config.validate()?;
        let store = build_store(config)?;
        let archive = Self::new(
            store,
            ProductionClock::new(),
            &config.bucket,
            &config.object_prefix(),
            config.max_stream_duration,
        );
        info!(
            "Flow archive ready: store={:?} bucket={} prefix='{}' max_stream={}s",
            config.store_type,
            config.bucket,
            archive.prefix(),
            config.max_stream_duration.as_secs()
        );
        Ok(archive)
    }
}

impl<C: ArchiveClock> FlowArchive<C> {
    pub fn new(
        store: SharedStore,
        clock: C,
        bucket: &str,
        prefix: &str,
        max_stream_duration: Duration,
    ) -> Self {
        let writer = BatchWriter::new(store.clone(), clock, bucket, prefix, max_stream_duration);
        let query = QueryEngine::new(store.clone(), bucket, prefix);
        FlowArchive {
            store,
            writer: Arc::new(writer),
            query,
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn writer(&self) -> &Arc<BatchWriter<dyn ObjectStore, C>> {
        &self.writer
    }

    pub fn query(&self) -> &QueryEngine<dyn ObjectStore> {
        &self.query
    }

    pub fn bucket(&self) -> &str {
        self.writer.bucket()
    }

    pub fn prefix(&self) -> &str {
        self.writer.prefix()
    }

    /// Ingest adapter feeding this archive's writer
    pub fn ingest_adapter(&self) -> IngestAdapter<dyn ObjectStore, C> {
        IngestAdapter::new(self.writer.clone())
    }

    pub async fn store_flows(&self, flows: &[Flow]) -> ArchiveResult<Option<StoredBatch>> {
        self.writer.store(flows).await
    }

    pub async fn search_flows(&self, query: &SearchQuery) -> ArchiveResult<FlowSet> {
        self.query.search_flows(query).await
    }

    pub async fn search_flows_with_stats(
        &self,
        query: &SearchQuery,
    ) -> ArchiveResult<(FlowSet, QueryStats)> {
        self.query.search_flows_with_stats(query).await
    }

    pub async fn search_metrics(
        &self,
        query: &SearchQuery,
        metric_filter: Option<&Filter>,
    ) -> ArchiveResult<HashMap<String, Vec<FlowMetric>>> {
        self.query.search_metrics(query, metric_filter).await
    }

    pub async fn search_raw_packets(
        &self,
        query: &SearchQuery,
        packet_filter: Option<&Filter>,
    ) -> ArchiveResult<HashMap<String, RawPackets>> {
        self.query.search_raw_packets(query, packet_filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::clock::SimulatedClock;

    fn flow(uuid: &str, last: i64) -> Flow {
        Flow {
            uuid: uuid.to_string(),
            last,
            ..Flow::default()
        }
    }

    #[tokio::test]
    async fn test_from_config_memory_roundtrip() {
        let archive = FlowArchive::from_config(&ArchiveConfig::test()).unwrap();
        assert_eq!(archive.bucket(), "test");
        assert_eq!(archive.prefix(), "test");

        archive.store_flows(&[flow("a", 1), flow("b", 2)]).await.unwrap();
        let all = archive.search_flows(&SearchQuery::default()).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_localfs_archive() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ArchiveConfig::local(dir.path().to_path_buf());
        config.object_prefix = Some("flows/agent".to_string());

        let archive = FlowArchive::from_config(&config).unwrap();
        let stored = archive.store_flows(&[flow("a", 7)]).await.unwrap().unwrap();
        assert!(stored.key.starts_with("flows/agent/"));
        assert!(dir.path().join("flows").join(&stored.key).exists());

        let found = archive
            .search_flows(&SearchQuery::with_filter(Filter::term("UUID", "a")))
            .await
            .unwrap();
        assert_eq!(found.flows[0].last, 7);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = ArchiveConfig::test();
        config.store_type = ObjectStoreType::LocalFs;
        assert!(matches!(
            FlowArchive::from_config(&config),
            Err(ArchiveError::Config(_))
        ));
    }

    #[cfg(not(feature = "s3"))]
    #[test]
    fn test_s3_requires_feature() {
        let mut config = ArchiveConfig::test();
        config.store_type = ObjectStoreType::S3;
        assert!(matches!(build_store(&config), Err(ArchiveError::Config(_))));
    }

    #[tokio::test]
    async fn test_ingest_adapter_shares_writer() {
        let store: SharedStore = Arc::new(InMemoryObjectStore::new());
        let archive = FlowArchive::new(
            store,
            SimulatedClock::new(0),
            "bucket",
            "p",
            Duration::from_secs(60),
        );
        let adapter = archive.ingest_adapter();

        let msg = crate::streaming::ingest::IngestMessage::store(&[flow("x", 3)]).unwrap();
        adapter.handle_message(msg).await;

        assert_eq!(archive.writer().current_stream().await.unwrap().sequence_number, 1);
        assert_eq!(archive.search_flows(&SearchQuery::default()).await.unwrap().len(), 1);
    }
}
