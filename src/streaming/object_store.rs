//! Object Store Abstraction
//!
//! The archive talks to storage through exactly three operations: write one
//! object with attributes, list keys under a prefix, read one object. No
//! retries, pagination handling or backoff live behind this trait beyond what
//! a backend does on its own.
//!
//! Implementations:
//! - `InMemoryObjectStore`: For unit tests (records every write)
//! - `LocalFsObjectStore`: For development and local testing
//! - `S3ObjectStore`: For production (feature-gated)
//! - `SimulatedObjectStore`: Fault-injecting wrapper around any of the above

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

/// Content type of every archived object
pub const CONTENT_TYPE_JSON: &str = "application/json";
/// Content encoding of every archived object
pub const CONTENT_ENCODING_GZIP: &str = "gzip";

/// Attributes stored alongside an object body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectAttributes {
    pub content_type: String,
    pub content_encoding: String,
    /// User metadata (string key/value pairs)
    pub metadata: BTreeMap<String, String>,
}

/// Object store capability consumed by the writer and the query engine
pub trait ObjectStore: Send + Sync + 'static {
    /// Store a single object, replacing any previous object at `key`
    fn write_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        body: &'a [u8],
        attributes: &'a ObjectAttributes,
    ) -> Pin<Box<dyn Future<Output = IoResult<()>> + Send + 'a>>;

    /// List full object keys starting with `prefix`, sorted
    fn list_objects<'a>(
        &'a self,
        bucket: &'a str,
        prefix: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<Vec<String>>> + Send + 'a>>;

    /// Read one object's body
    fn read_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<Vec<u8>>> + Send + 'a>>;
}

// ============================================================================
// InMemoryObjectStore - For tests
// ============================================================================

/// An object held by `InMemoryObjectStore`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub attributes: ObjectAttributes,
}

/// One `write_object` call observed by `InMemoryObjectStore`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub bucket: String,
    pub key: String,
    pub size_bytes: usize,
    pub attributes: ObjectAttributes,
}

#[derive(Debug, Default)]
struct InMemoryState {
    objects: BTreeMap<(String, String), StoredObject>,
    writes: Vec<WriteRecord>,
}

/// In-memory object store; clones share contents
#[derive(Debug, Clone, Default)]
pub struct InMemoryObjectStore {
    state: Arc<RwLock<InMemoryState>>,
}

impl InMemoryObjectStore {
    /// Create a new in-memory object store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects across all buckets
    pub fn len(&self) -> usize {
        self.state.read().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().objects.is_empty()
    }

    /// Number of `write_object` calls so far
    pub fn write_count(&self) -> usize {
        self.state.read().writes.len()
    }

    /// The most recent `write_object` call
    pub fn last_write(&self) -> Option<WriteRecord> {
        self.state.read().writes.last().cloned()
    }

    /// Every `write_object` call in order
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.state.read().writes.clone()
    }

    /// Fetch a stored object with its attributes
    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.state
            .read()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Drop all objects and the write log
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.objects.clear();
        state.writes.clear();
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn write_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        body: &'a [u8],
        attributes: &'a ObjectAttributes,
    ) -> Pin<Box<dyn Future<Output = IoResult<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.state.write();
            state.writes.push(WriteRecord {
                bucket: bucket.to_string(),
                key: key.to_string(),
                size_bytes: body.len(),
                attributes: attributes.clone(),
            });
            state.objects.insert(
                (bucket.to_string(), key.to_string()),
                StoredObject {
                    data: body.to_vec(),
                    attributes: attributes.clone(),
                },
            );
            Ok(())
        })
    }

    fn list_objects<'a>(
        &'a self,
        bucket: &'a str,
        prefix: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<Vec<String>>> + Send + 'a>> {
        Box::pin(async move {
            // BTreeMap order is (bucket, key), so keys come out sorted
            Ok(self
                .state
                .read()
                .objects
                .keys()
                .filter(|(b, k)| b == bucket && k.starts_with(prefix))
                .map(|(_, k)| k.clone())
                .collect())
        })
    }

    fn read_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<Vec<u8>>> + Send + 'a>> {
        Box::pin(async move {
            self.state
                .read()
                .objects
                .get(&(bucket.to_string(), key.to_string()))
                .map(|obj| obj.data.clone())
                .ok_or_else(|| IoError::new(ErrorKind::NotFound, format!("Key not found: {}", key)))
        })
    }
}

// ============================================================================
// LocalFsObjectStore - For development
// ============================================================================

/// Directory under the base path holding attribute sidecars
const ATTRIBUTES_DIR: &str = ".attributes";

/// Local filesystem object store
///
/// Bodies live at `<base>/<bucket>/<key>`, attributes as JSON at
/// `<base>/.attributes/<bucket>/<key>.json`.
#[derive(Debug, Clone)]
pub struct LocalFsObjectStore {
    base_path: PathBuf,
}

impl LocalFsObjectStore {
    /// Create a new local filesystem object store
    pub fn new(base_path: PathBuf) -> Self {
        LocalFsObjectStore { base_path }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn body_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.base_path.join(bucket).join(key)
    }

    fn attributes_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.base_path
            .join(ATTRIBUTES_DIR)
            .join(bucket)
            .join(format!("{}.json", key))
    }

    /// Attributes written with an object, if any
    pub async fn read_attributes(&self, bucket: &str, key: &str) -> IoResult<ObjectAttributes> {
        let raw = tokio::fs::read(self.attributes_path(bucket, key)).await?;
        serde_json::from_slice(&raw).map_err(|e| IoError::new(ErrorKind::InvalidData, e))
    }

    async fn ensure_parent(path: &Path) -> IoResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

fn walk_dir(dir: &Path, root: &Path, prefix: &str, keys: &mut Vec<String>) -> IoResult<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            walk_dir(&path, root, prefix, keys)?;
        } else if path.is_file() {
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
    }
    Ok(())
}

impl ObjectStore for LocalFsObjectStore {
    fn write_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        body: &'a [u8],
        attributes: &'a ObjectAttributes,
    ) -> Pin<Box<dyn Future<Output = IoResult<()>> + Send + 'a>> {
        Box::pin(async move {
            let attrs = serde_json::to_vec(attributes)
                .map_err(|e| IoError::new(ErrorKind::InvalidInput, e))?;

            let attrs_path = self.attributes_path(bucket, key);
            Self::ensure_parent(&attrs_path).await?;
            tokio::fs::write(&attrs_path, attrs).await?;

            let path = self.body_path(bucket, key);
            Self::ensure_parent(&path).await?;
            tokio::fs::write(&path, body).await
        })
    }

    fn list_objects<'a>(
        &'a self,
        bucket: &'a str,
        prefix: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<Vec<String>>> + Send + 'a>> {
        Box::pin(async move {
            let root = self.base_path.join(bucket);
            if !root.exists() {
                return Ok(Vec::new());
            }

            let mut keys = Vec::new();
            walk_dir(&root, &root, prefix, &mut keys)?;
            keys.sort();
            Ok(keys)
        })
    }

    fn read_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<Vec<u8>>> + Send + 'a>> {
        Box::pin(async move { tokio::fs::read(self.body_path(bucket, key)).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(records: &str) -> ObjectAttributes {
        ObjectAttributes {
            content_type: CONTENT_TYPE_JSON.to_string(),
            content_encoding: CONTENT_ENCODING_GZIP.to_string(),
            metadata: BTreeMap::from([("num-records".to_string(), records.to_string())]),
        }
    }

    #[tokio::test]
    async fn test_inmemory_write_read() {
        let store = InMemoryObjectStore::new();

        store
            .write_object("bucket", "flows/a.gz", b"hello world", &attrs("1"))
            .await
            .unwrap();
        let data = store.read_object("bucket", "flows/a.gz").await.unwrap();

        assert_eq!(data, b"hello world");
        assert_eq!(store.write_count(), 1);
        let last = store.last_write().unwrap();
        assert_eq!(last.key, "flows/a.gz");
        assert_eq!(last.size_bytes, 11);
        assert_eq!(last.attributes.metadata["num-records"], "1");
    }

    #[tokio::test]
    async fn test_inmemory_read_missing() {
        let store = InMemoryObjectStore::new();
        let err = store.read_object("bucket", "missing").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_inmemory_list_is_scoped_and_sorted() {
        let store = InMemoryObjectStore::new();

        store.write_object("b", "flows/2.gz", b"2", &attrs("1")).await.unwrap();
        store.write_object("b", "flows/1.gz", b"1", &attrs("1")).await.unwrap();
        store.write_object("b", "other/1.gz", b"x", &attrs("1")).await.unwrap();
        store.write_object("c", "flows/3.gz", b"3", &attrs("1")).await.unwrap();

        let keys = store.list_objects("b", "flows/").await.unwrap();
        assert_eq!(keys, vec!["flows/1.gz", "flows/2.gz"]);
    }

    #[tokio::test]
    async fn test_inmemory_clones_share_state() {
        let store = InMemoryObjectStore::new();
        let clone = store.clone();

        clone.write_object("b", "k", b"v", &attrs("1")).await.unwrap();
        assert_eq!(store.len(), 1);

        store.clear();
        assert!(clone.is_empty());
        assert_eq!(clone.write_count(), 0);
    }

    #[tokio::test]
    async fn test_localfs_write_read_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFsObjectStore::new(dir.path().to_path_buf());

        store
            .write_object("bucket", "flows/20240101T000000Z/00000001.gz", b"one", &attrs("3"))
            .await
            .unwrap();
        store
            .write_object("bucket", "flows/20240101T000000Z/00000000.gz", b"zero", &attrs("2"))
            .await
            .unwrap();
        store
            .write_object("bucket", "elsewhere/x.gz", b"x", &attrs("1"))
            .await
            .unwrap();

        let keys = store.list_objects("bucket", "flows/").await.unwrap();
        assert_eq!(
            keys,
            vec![
                "flows/20240101T000000Z/00000000.gz",
                "flows/20240101T000000Z/00000001.gz",
            ]
        );

        let data = store
            .read_object("bucket", "flows/20240101T000000Z/00000001.gz")
            .await
            .unwrap();
        assert_eq!(data, b"one");

        let stored = store
            .read_attributes("bucket", "flows/20240101T000000Z/00000000.gz")
            .await
            .unwrap();
        assert_eq!(stored, attrs("2"));
    }

    #[tokio::test]
    async fn test_localfs_list_missing_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFsObjectStore::new(dir.path().to_path_buf());
        assert!(store.list_objects("nope", "").await.unwrap().is_empty());
    }
}
