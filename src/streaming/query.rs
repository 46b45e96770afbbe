//! Query Engine
//!
//! Every query lists all objects under the archive prefix, reads each one,
//! decodes it and evaluates the search over the merged flows. There is no
//! index: cost grows linearly with the number of archived objects.
//!
//! Listing and read failures abort the query. An object that cannot be
//! decoded is logged, counted in `QueryStats` and skipped.

use crate::flow::{Filter, Flow, FlowMetric, FlowSet, LinkType, RawPackets, SearchQuery};
use crate::streaming::error::{ArchiveError, ArchiveResult};
use crate::streaming::object_store::ObjectStore;
use flate2::read::GzDecoder;
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Leading bytes of a gzip member
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Decode one object body into its flows
///
/// Bodies are normally gzip'd. Some S3 gateways hand back the decoded body
/// when `Content-Encoding: gzip` is set, so plain JSON is accepted too.
pub fn decode_object(key: &str, body: &[u8]) -> ArchiveResult<Vec<Flow>> {
    let decode_err = |reason: String| ArchiveError::Decode {
        key: key.to_string(),
        reason,
    };

    if body.starts_with(&GZIP_MAGIC) {
        let mut json = Vec::with_capacity(body.len() * 4);
        GzDecoder::new(body)
            .read_to_end(&mut json)
            .map_err(|e| decode_err(format!("gzip: {}", e)))?;
        serde_json::from_slice(&json).map_err(|e| decode_err(format!("json: {}", e)))
    } else {
        serde_json::from_slice(body).map_err(|e| decode_err(format!("json: {}", e)))
    }
}

/// Counters for one full scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryStats {
    pub objects_listed: usize,
    pub objects_decoded: usize,
    pub objects_skipped: usize,
    pub flows_scanned: usize,
}

/// Listing-based query engine over one bucket and prefix
pub struct QueryEngine<S: ObjectStore + ?Sized> {
    store: Arc<S>,
    bucket: String,
    prefix: String,
}

impl<S: ObjectStore + ?Sized> QueryEngine<S> {
    pub fn new(store: Arc<S>, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        QueryEngine {
            store,
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Listing prefix: the archive prefix as a directory, so `flows` does not
    /// match `flows-old/...`
    fn list_prefix(&self) -> String {
        let prefix = self.prefix.trim_end_matches('/');
        if prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", prefix)
        }
    }

    /// Read and decode every archived object
    pub async fn load_all(&self) -> ArchiveResult<(FlowSet, QueryStats)> {
        let prefix = self.list_prefix();
        let keys = match self.store.list_objects(&self.bucket, &prefix).await {
            Ok(keys) => keys,
            Err(e) => {
                error!("Failed to list objects under {}/{}: {}", self.bucket, prefix, e);
                return Err(ArchiveError::List { prefix, source: e });
            }
        };

        let mut stats = QueryStats {
            objects_listed: keys.len(),
            ..QueryStats::default()
        };
        let mut set = FlowSet::new();

        for key in keys {
            let body = match self.store.read_object(&self.bucket, &key).await {
                Ok(body) => body,
                Err(e) => {
                    error!("Failed to read object {}/{}: {}", self.bucket, key, e);
                    return Err(ArchiveError::Read { key, source: e });
                }
            };

            match decode_object(&key, &body) {
                Ok(flows) => {
                    stats.objects_decoded += 1;
                    stats.flows_scanned += flows.len();
                    set.extend(flows);
                }
                Err(e) => {
                    warn!("Skipping undecodable object: {}", e);
                    stats.objects_skipped += 1;
                }
            }
        }

        debug!(
            "Scanned {} objects ({} skipped), {} flows",
            stats.objects_listed, stats.objects_skipped, stats.flows_scanned
        );

        Ok((set, stats))
    }

    /// Flows matching the query, together with scan counters
    pub async fn search_flows_with_stats(
        &self,
        query: &SearchQuery,
    ) -> ArchiveResult<(FlowSet, QueryStats)> {
        let (set, stats) = self.load_all().await?;
        Ok((set.search_query(query), stats))
    }

    /// Flows matching the query
    pub async fn search_flows(&self, query: &SearchQuery) -> ArchiveResult<FlowSet> {
        Ok(self.search_flows_with_stats(query).await?.0)
    }

    /// Metrics per flow UUID, one entry per matching record in result order
    ///
    /// Records without a metric contribute a zeroed one.
    pub async fn search_metrics(
        &self,
        query: &SearchQuery,
        metric_filter: Option<&Filter>,
    ) -> ArchiveResult<HashMap<String, Vec<FlowMetric>>> {
        let set = self.search_flows(query).await?;
        let set = match metric_filter {
            Some(filter) => set.filter(filter),
            None => set,
        };

        let mut metrics: HashMap<String, Vec<FlowMetric>> = HashMap::new();
        for flow in set {
            metrics
                .entry(flow.uuid)
                .or_default()
                .push(flow.metric.unwrap_or_default());
        }
        Ok(metrics)
    }

    /// Raw packets per flow UUID, accumulated across records
    ///
    /// The link type comes from the first record seen for a UUID, `Null` if
    /// it cannot be determined.
    pub async fn search_raw_packets(
        &self,
        query: &SearchQuery,
        packet_filter: Option<&Filter>,
    ) -> ArchiveResult<HashMap<String, RawPackets>> {
        let set = self.search_flows(query).await?;
        let set = match packet_filter {
            Some(filter) => set.filter(filter),
            None => set,
        };

        let mut packets: HashMap<String, RawPackets> = HashMap::new();
        for flow in set {
            let link_type = flow.link_type();
            packets
                .entry(flow.uuid)
                .or_insert_with(|| RawPackets {
                    link_type: link_type.unwrap_or(LinkType::Null),
                    raw_packets: Vec::new(),
                })
                .raw_packets
                .extend(flow.last_raw_packets);
        }
        Ok(packets)
    }
}
