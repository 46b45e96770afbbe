//! Batch Writer
//!
//! Persists one batch of flows as one gzip'd JSON object:
//!
//! ```text
//! flows ──► serde_json ──► metadata ──► gzip ──┐
//!                                              ▼
//!                     lock stream ──► rotate? ──► key ──► PUT ──► commit seq
//! ```
//!
//! The stream lock is held from rotation through commit, so concurrent
//! `store` calls get distinct, gap-free sequence numbers. The sequence number
//! is only committed after the store acknowledges the PUT; a failed write
//! leaves the stream untouched and the next batch reuses the same key.

use crate::flow::Flow;
use crate::streaming::clock::ArchiveClock;
use crate::streaming::error::{ArchiveError, ArchiveResult};
use crate::streaming::object_store::{
    ObjectAttributes, ObjectStore, CONTENT_ENCODING_GZIP, CONTENT_TYPE_JSON,
};
use crate::streaming::stream::{select_stream, Stream};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Metadata key: smallest `Last` in the batch
pub const META_FIRST_TIMESTAMP: &str = "first-timestamp";
/// Metadata key: largest `Last` in the batch
pub const META_LAST_TIMESTAMP: &str = "last-timestamp";
/// Metadata key: number of flows in the object
pub const META_NUM_RECORDS: &str = "num-records";

/// Summary of a non-empty batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchMetadata {
    pub num_records: usize,
    pub first_timestamp: i64,
    pub last_timestamp: i64,
}

impl BatchMetadata {
    /// Single pass over the batch; `None` when empty
    pub fn from_flows(flows: &[Flow]) -> Option<Self> {
        let (first, rest) = flows.split_first()?;
        let mut meta = BatchMetadata {
            num_records: flows.len(),
            first_timestamp: first.timestamp(),
            last_timestamp: first.timestamp(),
        };
        for flow in rest {
            let ts = flow.timestamp();
            meta.first_timestamp = meta.first_timestamp.min(ts);
            meta.last_timestamp = meta.last_timestamp.max(ts);
        }
        Some(meta)
    }

    /// Object attributes carrying this metadata
    pub fn to_attributes(&self) -> ObjectAttributes {
        ObjectAttributes {
            content_type: CONTENT_TYPE_JSON.to_string(),
            content_encoding: CONTENT_ENCODING_GZIP.to_string(),
            metadata: BTreeMap::from([
                (META_FIRST_TIMESTAMP.to_string(), self.first_timestamp.to_string()),
                (META_LAST_TIMESTAMP.to_string(), self.last_timestamp.to_string()),
                (META_NUM_RECORDS.to_string(), self.num_records.to_string()),
            ]),
        }
    }
}

/// Serialize a batch as a JSON array and gzip it
pub fn encode_batch(flows: &[Flow]) -> ArchiveResult<Vec<u8>> {
    let json = serde_json::to_vec(flows)?;

    let mut encoder = GzEncoder::new(Vec::with_capacity(json.len() / 4), Compression::default());
    encoder.write_all(&json).map_err(ArchiveError::Compression)?;
    encoder.finish().map_err(ArchiveError::Compression)
}

/// Description of an object written by `BatchWriter::store`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBatch {
    pub key: String,
    /// Stream the object was written into, before the sequence was advanced
    pub stream: Stream,
    pub metadata: BatchMetadata,
    /// Compressed body size
    pub size_bytes: usize,
}

/// Writes batches into sequence-numbered objects of time-bounded streams
pub struct BatchWriter<S: ObjectStore + ?Sized, C: ArchiveClock> {
    store: Arc<S>,
    clock: C,
    bucket: String,
    prefix: String,
    max_stream_duration: Duration,
    /// Open stream, `None` until the first successful write
    stream: Mutex<Option<Stream>>,
}

impl<S: ObjectStore + ?Sized, C: ArchiveClock> BatchWriter<S, C> {
    pub fn new(
        store: Arc<S>,
        clock: C,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        max_stream_duration: Duration,
    ) -> Self {
        BatchWriter {
            store,
            clock,
            bucket: bucket.into(),
            prefix: prefix.into(),
            max_stream_duration,
            stream: Mutex::new(None),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn max_stream_duration(&self) -> Duration {
        self.max_stream_duration
    }

    /// Snapshot of the open stream
    pub async fn current_stream(&self) -> Option<Stream> {
        *self.stream.lock().await
    }

    /// Persist one batch as one object
    ///
    /// Returns `Ok(None)` for an empty batch without touching the store.
    pub async fn store(&self, flows: &[Flow]) -> ArchiveResult<Option<StoredBatch>> {
        let Some(metadata) = BatchMetadata::from_flows(flows) else {
            debug!("Skipping empty flow batch");
            return Ok(None);
        };

        let body = encode_batch(flows)?;
        let attributes = metadata.to_attributes();

        let mut current = self.stream.lock().await;
        let stream = select_stream(*current, self.clock.now(), self.max_stream_duration);
        if current.map(|s| s.id) != Some(stream.id) {
            if stream.sequence_number == 0 {
                info!(
                    "Opening flow stream {} under prefix '{}'",
                    stream.id.to_compact_utc(),
                    self.prefix
                );
            } else {
                debug!(
                    "Rotated within second {}, continuing at sequence {}",
                    stream.id.to_compact_utc(),
                    stream.sequence_number
                );
            }
        }

        let key = stream.object_key(&self.prefix);
        if let Err(e) = self
            .store
            .write_object(&self.bucket, &key, &body, &attributes)
            .await
        {
            error!(
                "Failed to write {} flows to {}/{}: {}",
                metadata.num_records, self.bucket, key, e
            );
            return Err(ArchiveError::Write { key, source: e });
        }

        *current = Some(stream.advanced());
        drop(current);

        debug!(
            "Stored {} flows ({} bytes) at {}",
            metadata.num_records,
            body.len(),
            key
        );

        Ok(Some(StoredBatch {
            key,
            stream,
            metadata,
            size_bytes: body.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::clock::{SimulatedClock, UnixMillis};
    use crate::streaming::object_store::InMemoryObjectStore;
    use flate2::read::GzDecoder;
    use std::future::Future;
    use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult};
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, Ordering};

    const DAY: Duration = Duration::from_secs(86_400);
    // 2024-01-02T03:04:05Z
    const T0: u64 = 1_704_164_645_000;

    fn flow(uuid: &str, last: i64) -> Flow {
        Flow {
            uuid: uuid.to_string(),
            start: last - 1,
            last,
            ..Flow::default()
        }
    }

    fn writer(
        store: &InMemoryObjectStore,
        clock: &SimulatedClock,
        max: Duration,
    ) -> BatchWriter<InMemoryObjectStore, SimulatedClock> {
        BatchWriter::new(Arc::new(store.clone()), clock.clone(), "bucket", "flows", max)
    }

    fn gunzip(body: &[u8]) -> Vec<Flow> {
        let mut json = Vec::new();
        GzDecoder::new(body).read_to_end(&mut json).unwrap();
        serde_json::from_slice(&json).unwrap()
    }

    /// Store whose writes fail while `failing` is set
    #[derive(Default)]
    struct FlakyStore {
        inner: InMemoryObjectStore,
        failing: AtomicBool,
    }

    impl ObjectStore for FlakyStore {
        fn write_object<'a>(
            &'a self,
            bucket: &'a str,
            key: &'a str,
            body: &'a [u8],
            attributes: &'a ObjectAttributes,
        ) -> Pin<Box<dyn Future<Output = IoResult<()>> + Send + 'a>> {
            if self.failing.load(Ordering::SeqCst) {
                return Box::pin(async {
                    Err(IoError::new(ErrorKind::PermissionDenied, "access denied"))
                });
            }
            self.inner.write_object(bucket, key, body, attributes)
        }

        fn list_objects<'a>(
            &'a self,
            bucket: &'a str,
            prefix: &'a str,
        ) -> Pin<Box<dyn Future<Output = IoResult<Vec<String>>> + Send + 'a>> {
            self.inner.list_objects(bucket, prefix)
        }

        fn read_object<'a>(
            &'a self,
            bucket: &'a str,
            key: &'a str,
        ) -> Pin<Box<dyn Future<Output = IoResult<Vec<u8>>> + Send + 'a>> {
            self.inner.read_object(bucket, key)
        }
    }

    #[test]
    fn test_metadata_min_max() {
        let flows = vec![flow("a", 7), flow("b", 3), flow("c", 11), flow("d", 5)];
        let meta = BatchMetadata::from_flows(&flows).unwrap();
        assert_eq!(meta.num_records, 4);
        assert_eq!(meta.first_timestamp, 3);
        assert_eq!(meta.last_timestamp, 11);

        let attrs = meta.to_attributes();
        assert_eq!(attrs.content_type, "application/json");
        assert_eq!(attrs.content_encoding, "gzip");
        assert_eq!(attrs.metadata["first-timestamp"], "3");
        assert_eq!(attrs.metadata["last-timestamp"], "11");
        assert_eq!(attrs.metadata["num-records"], "4");

        assert!(BatchMetadata::from_flows(&[]).is_none());
    }

    #[tokio::test]
    async fn test_store_writes_one_object() {
        let store = InMemoryObjectStore::new();
        let clock = SimulatedClock::new(T0);
        let writer = writer(&store, &clock, DAY);

        let batch = vec![flow("a", 10), flow("b", 12)];
        let stored = writer.store(&batch).await.unwrap().unwrap();

        assert_eq!(stored.key, "flows/20240102T030405Z/00000000.gz");
        assert_eq!(stored.stream.id, UnixMillis(T0));
        assert_eq!(store.write_count(), 1);

        let object = store.object("bucket", &stored.key).unwrap();
        assert_eq!(object.data.len(), stored.size_bytes);
        assert_eq!(object.attributes.metadata["num-records"], "2");
        assert_eq!(gunzip(&object.data), batch);

        let current = writer.current_stream().await.unwrap();
        assert_eq!(current.id, UnixMillis(T0));
        assert_eq!(current.sequence_number, 1);
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let store = InMemoryObjectStore::new();
        let clock = SimulatedClock::new(T0);
        let writer = writer(&store, &clock, DAY);

        assert!(writer.store(&[]).await.unwrap().is_none());
        assert_eq!(store.write_count(), 0);
        assert!(writer.current_stream().await.is_none());
    }

    #[tokio::test]
    async fn test_sequence_within_stream_and_rotation() {
        let store = InMemoryObjectStore::new();
        let clock = SimulatedClock::new(T0);
        let writer = writer(&store, &clock, Duration::from_secs(60));

        let first = writer.store(&[flow("a", 1)]).await.unwrap().unwrap();
        clock.advance_ms(59_999);
        let second = writer.store(&[flow("b", 2)]).await.unwrap().unwrap();
        clock.advance_ms(1);
        let third = writer.store(&[flow("c", 3)]).await.unwrap().unwrap();

        assert_eq!(first.stream.id, second.stream.id);
        assert_eq!(first.stream.sequence_number, 0);
        assert_eq!(second.stream.sequence_number, 1);

        assert_eq!(third.stream.id, UnixMillis(T0 + 60_000));
        assert_eq!(third.stream.sequence_number, 0);
        assert_eq!(third.key, "flows/20240102T030505Z/00000000.gz");
    }

    #[tokio::test]
    async fn test_zero_duration_same_second_keeps_both_batches() {
        let store = InMemoryObjectStore::new();
        let clock = SimulatedClock::new(T0);
        let writer = writer(&store, &clock, Duration::ZERO);

        let first = writer.store(&[flow("a", 1)]).await.unwrap().unwrap();
        clock.advance_ms(400);
        let second = writer.store(&[flow("b", 2)]).await.unwrap().unwrap();
        clock.advance_ms(600);
        let third = writer.store(&[flow("c", 3)]).await.unwrap().unwrap();

        assert_eq!(first.key, "flows/20240102T030405Z/00000000.gz");
        assert_eq!(second.key, "flows/20240102T030405Z/00000001.gz");
        assert_eq!(second.stream.id, UnixMillis(T0 + 400));
        assert_eq!(third.key, "flows/20240102T030406Z/00000000.gz");

        assert_eq!(store.len(), 3);
        assert_eq!(gunzip(&store.object("bucket", &first.key).unwrap().data), vec![flow("a", 1)]);
        assert_eq!(gunzip(&store.object("bucket", &second.key).unwrap().data), vec![flow("b", 2)]);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_sequence() {
        let store = Arc::new(FlakyStore::default());
        let clock = SimulatedClock::new(T0);
        let writer = BatchWriter::new(store.clone(), clock.clone(), "bucket", "flows", DAY);

        writer.store(&[flow("a", 1)]).await.unwrap();

        store.failing.store(true, Ordering::SeqCst);
        let err = writer.store(&[flow("b", 2)]).await.unwrap_err();
        match &err {
            ArchiveError::Write { key, source } => {
                assert_eq!(key, "flows/20240102T030405Z/00000001.gz");
                assert_eq!(source.kind(), ErrorKind::PermissionDenied);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(writer.current_stream().await.unwrap().sequence_number, 1);

        store.failing.store(false, Ordering::SeqCst);
        let stored = writer.store(&[flow("c", 3)]).await.unwrap().unwrap();
        assert_eq!(stored.key, "flows/20240102T030405Z/00000001.gz");
        assert_eq!(store.inner.write_count(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_stores_get_distinct_sequences() {
        let store = InMemoryObjectStore::new();
        let clock = SimulatedClock::new(T0);
        let writer = Arc::new(writer(&store, &clock, DAY));

        let mut tasks = Vec::new();
        for i in 0..16 {
            let writer = writer.clone();
            tasks.push(tokio::spawn(async move {
                writer.store(&[flow(&format!("f{i}"), i)]).await
            }));
        }

        let mut sequences = Vec::new();
        for task in tasks {
            let stored = task.await.unwrap().unwrap().unwrap();
            sequences.push(stored.stream.sequence_number);
        }
        sequences.sort_unstable();

        assert_eq!(sequences, (0..16).collect::<Vec<u64>>());
        assert_eq!(store.len(), 16);
    }
}
