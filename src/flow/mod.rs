//! Flow Records
//!
//! The record schema persisted by the archive. Field names on the wire are
//! PascalCase so archived objects stay readable by the analyzer tooling that
//! produced the batches.
//!
//! - `Flow`: one observed conversation, keyed by `UUID`
//! - `Filter`: predicate language applied to decoded flows
//! - `FlowSet`: in-memory collection with search query evaluation

pub mod filter;
pub mod set;

pub use filter::{FieldValue, Filter, FlowPredicate, TermValue};
pub use set::{FlowSet, Pagination, SearchQuery, SortOrder};

use serde::{Deserialize, Serialize};

/// Link, network or other addressed layer of a flow
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct FlowLayer {
    pub protocol: String,
    pub a: String,
    pub b: String,
    #[serde(rename = "ID")]
    pub id: i64,
}

/// Transport layer, endpoints are ports
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct TransportLayer {
    pub protocol: String,
    pub a: i64,
    pub b: i64,
    #[serde(rename = "ID")]
    pub id: i64,
}

/// Packet and byte counters in both directions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowMetric {
    #[serde(rename = "ABPackets")]
    pub ab_packets: i64,
    #[serde(rename = "ABBytes")]
    pub ab_bytes: i64,
    #[serde(rename = "BAPackets")]
    pub ba_packets: i64,
    #[serde(rename = "BABytes")]
    pub ba_bytes: i64,
    #[serde(rename = "Start")]
    pub start: i64,
    #[serde(rename = "Last")]
    pub last: i64,
}

/// A captured packet attached to a flow
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct RawPacket {
    pub timestamp: i64,
    pub index: i64,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// Link type of captured packets, needed to decode `RawPacket::data`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkType {
    Null,
    Ethernet,
    Raw,
}

/// Raw packets accumulated for one flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawPackets {
    pub link_type: LinkType,
    pub raw_packets: Vec<RawPacket>,
}

/// One flow record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Flow {
    #[serde(rename = "UUID")]
    pub uuid: String,
    pub layers_path: String,
    pub application: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<FlowLayer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<FlowLayer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportLayer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric: Option<FlowMetric>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub last_raw_packets: Vec<RawPacket>,
    pub start: i64,
    pub last: i64,
    #[serde(rename = "NodeTID")]
    pub node_tid: String,
}

impl Flow {
    /// Timestamp used for object metadata and time-range filtering
    pub fn timestamp(&self) -> i64 {
        self.last
    }

    /// Link type derived from the outermost layer of `LayersPath`
    pub fn link_type(&self) -> Option<LinkType> {
        let first = self.layers_path.split('/').next().unwrap_or_default();
        match first {
            "Ethernet" => Some(LinkType::Ethernet),
            "IPv4" | "IPv6" => Some(LinkType::Raw),
            _ => None,
        }
    }

    /// Look up a field by its dotted wire name, e.g. `Network.A` or `Metric.ABBytes`
    pub fn field(&self, key: &str) -> Option<FieldValue<'_>> {
        match key.split_once('.') {
            None => match key {
                "UUID" => Some(FieldValue::Str(&self.uuid)),
                "LayersPath" => Some(FieldValue::Str(&self.layers_path)),
                "Application" => Some(FieldValue::Str(&self.application)),
                "NodeTID" => Some(FieldValue::Str(&self.node_tid)),
                "Start" => Some(FieldValue::Int(self.start)),
                "Last" => Some(FieldValue::Int(self.last)),
                _ => None,
            },
            Some(("Link", sub)) => self.link.as_ref().and_then(|l| l.field(sub)),
            Some(("Network", sub)) => self.network.as_ref().and_then(|l| l.field(sub)),
            Some(("Transport", sub)) => {
                let t = self.transport.as_ref()?;
                match sub {
                    "Protocol" => Some(FieldValue::Str(&t.protocol)),
                    "A" => Some(FieldValue::Int(t.a)),
                    "B" => Some(FieldValue::Int(t.b)),
                    "ID" => Some(FieldValue::Int(t.id)),
                    _ => None,
                }
            }
            Some(("Metric", sub)) => {
                let m = self.metric.as_ref()?;
                let v = match sub {
                    "ABPackets" => m.ab_packets,
                    "ABBytes" => m.ab_bytes,
                    "BAPackets" => m.ba_packets,
                    "BABytes" => m.ba_bytes,
                    "Start" => m.start,
                    "Last" => m.last,
                    _ => return None,
                };
                Some(FieldValue::Int(v))
            }
            Some(_) => None,
        }
    }
}

impl FlowLayer {
    fn field(&self, key: &str) -> Option<FieldValue<'_>> {
        match key {
            "Protocol" => Some(FieldValue::Str(&self.protocol)),
            "A" => Some(FieldValue::Str(&self.a)),
            "B" => Some(FieldValue::Str(&self.b)),
            "ID" => Some(FieldValue::Int(self.id)),
            _ => None,
        }
    }
}

/// Packet bytes travel as standard base64 strings
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
