//! S3 Object Store Implementation
//!
//! S3-compatible store built on the `object_store` crate from the Arrow
//! ecosystem. Works against AWS S3 and S3-compatible services (MinIO, Ceph,
//! LocalStack) through a custom endpoint.
//!
//! `object_store` clients are bound to a single bucket, so one client is
//! built lazily per bucket and cached.

use crate::streaming::config::S3Config;
use crate::streaming::object_store::{ObjectAttributes, ObjectStore};
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, Attributes, ObjectStore as ObjectStoreTrait, PutOptions};
use parking_lot::RwLock;
use std::borrow::Cow;
use std::collections::HashMap;
use std::future::Future;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

/// S3 object store for production deployments
pub struct S3ObjectStore {
    config: S3Config,
    clients: RwLock<HashMap<String, Arc<dyn ObjectStoreTrait>>>,
}

impl S3ObjectStore {
    /// Create a store; clients are built on first use of each bucket
    ///
    /// Missing credentials fall back to the standard `AWS_*` environment
    /// variables.
    pub fn new(config: S3Config) -> Self {
        S3ObjectStore {
            config,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Use an existing client for `bucket` (for tests against `InMemory`)
    pub fn with_client(self, bucket: &str, client: Arc<dyn ObjectStoreTrait>) -> Self {
        self.clients.write().insert(bucket.to_string(), client);
        self
    }

    fn client(&self, bucket: &str) -> IoResult<Arc<dyn ObjectStoreTrait>> {
        if let Some(client) = self.clients.read().get(bucket) {
            return Ok(client.clone());
        }

        let mut clients = self.clients.write();
        if let Some(client) = clients.get(bucket) {
            return Ok(client.clone());
        }

        let client: Arc<dyn ObjectStoreTrait> = Arc::new(self.build_client(bucket)?);
        clients.insert(bucket.to_string(), client.clone());
        debug!("Created S3 client for bucket {}", bucket);
        Ok(client)
    }

    fn build_client(&self, bucket: &str) -> IoResult<object_store::aws::AmazonS3> {
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .with_region(&self.config.region)
            .with_virtual_hosted_style_request(false);

        // Custom endpoint for S3-compatible services
        if let Some(endpoint) = &self.config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }
        if let Some(access_key) = &self.config.access_key {
            builder = builder.with_access_key_id(access_key);
        }
        if let Some(secret_key) = &self.config.secret_key {
            builder = builder.with_secret_access_key(secret_key);
        }

        builder.build().map_err(|e| {
            IoError::new(
                ErrorKind::InvalidInput,
                format!("Failed to create S3 client for bucket {}: {}", bucket, e),
            )
        })
    }

    /// Convert object_store errors to IoError
    fn map_error(err: object_store::Error) -> IoError {
        match &err {
            object_store::Error::NotFound { .. } => {
                IoError::new(ErrorKind::NotFound, err.to_string())
            }
            object_store::Error::AlreadyExists { .. } => {
                IoError::new(ErrorKind::AlreadyExists, err.to_string())
            }
            object_store::Error::Precondition { .. } => {
                IoError::new(ErrorKind::InvalidInput, err.to_string())
            }
            _ => IoError::new(ErrorKind::Other, err.to_string()),
        }
    }
}

/// `object_store` lists by whole path segments; split a free-form key prefix
/// into the directory to list and the remaining text to match
fn split_list_prefix(prefix: &str) -> (Option<ObjectPath>, &str) {
    match prefix.rfind('/') {
        Some(idx) => (Some(ObjectPath::from(&prefix[..idx])), prefix),
        None => (None, prefix),
    }
}

fn put_attributes(attributes: &ObjectAttributes) -> Attributes {
    let mut attrs = Attributes::new();
    if !attributes.content_type.is_empty() {
        attrs.insert(Attribute::ContentType, attributes.content_type.clone().into());
    }
    if !attributes.content_encoding.is_empty() {
        attrs.insert(
            Attribute::ContentEncoding,
            attributes.content_encoding.clone().into(),
        );
    }
    for (key, value) in &attributes.metadata {
        attrs.insert(Attribute::Metadata(Cow::Owned(key.clone())), value.clone().into());
    }
    attrs
}

impl std::fmt::Debug for S3ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ObjectStore")
            .field("endpoint", &self.config.endpoint)
            .field("region", &self.config.region)
            .finish()
    }
}

impl ObjectStore for S3ObjectStore {
    fn write_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        body: &'a [u8],
        attributes: &'a ObjectAttributes,
    ) -> Pin<Box<dyn Future<Output = IoResult<()>> + Send + 'a>> {
        Box::pin(async move {
            let client = self.client(bucket)?;
            let opts = PutOptions {
                attributes: put_attributes(attributes),
                ..PutOptions::default()
            };
            client
                .put_opts(
                    &ObjectPath::from(key),
                    bytes::Bytes::copy_from_slice(body).into(),
                    opts,
                )
                .await
                .map_err(Self::map_error)?;
            Ok(())
        })
    }

    fn list_objects<'a>(
        &'a self,
        bucket: &'a str,
        prefix: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<Vec<String>>> + Send + 'a>> {
        Box::pin(async move {
            use futures::TryStreamExt;

            let client = self.client(bucket)?;
            let (dir, prefix) = split_list_prefix(prefix);

            // The client follows continuation tokens, so this is every page
            let objects: Vec<_> = client
                .list(dir.as_ref())
                .try_collect()
                .await
                .map_err(Self::map_error)?;

            let mut keys: Vec<String> = objects
                .into_iter()
                .map(|meta| meta.location.to_string())
                .filter(|key| key.starts_with(prefix))
                .collect();
            keys.sort();
            Ok(keys)
        })
    }

    fn read_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<Vec<u8>>> + Send + 'a>> {
        Box::pin(async move {
            let client = self.client(bucket)?;
            let result = client
                .get(&ObjectPath::from(key))
                .await
                .map_err(Self::map_error)?;
            let data = result.bytes().await.map_err(Self::map_error)?;
            Ok(data.to_vec())
        })
    }
}
