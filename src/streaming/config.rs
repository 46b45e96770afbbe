//! Archive Configuration
//!
//! Loaded from a TOML file, then overridden by `FLOW_ARCHIVE_*` environment
//! variables:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `FLOW_ARCHIVE_STORE` | `store_type` (`memory`, `localfs`, `s3`) |
//! | `FLOW_ARCHIVE_LOCAL_PATH` | `local_path` |
//! | `FLOW_ARCHIVE_ENDPOINT` | `s3.endpoint` |
//! | `FLOW_ARCHIVE_REGION` | `s3.region` |
//! | `FLOW_ARCHIVE_ACCESS_KEY` | `s3.access_key` |
//! | `FLOW_ARCHIVE_SECRET_KEY` | `s3.secret_key` |
//! | `FLOW_ARCHIVE_BUCKET` | `bucket` |
//! | `FLOW_ARCHIVE_OBJECT_PREFIX` | `object_prefix` |
//! | `FLOW_ARCHIVE_MAX_SECONDS_PER_STREAM` | `max_seconds_per_stream` |
//! | `FLOW_ARCHIVE_LISTEN_ADDR` | `listen_addr` |
//! | `FLOW_ARCHIVE_LOG_LEVEL` | `logging.level` |
//! | `FLOW_ARCHIVE_LOG_FORMAT` | `logging.format` (`plain`, `json`) |

use crate::streaming::error::{ArchiveError, ArchiveResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix of every environment override
pub const ENV_PREFIX: &str = "FLOW_ARCHIVE_";

/// Default stream lifetime: one day
pub const DEFAULT_MAX_SECONDS_PER_STREAM: u64 = 86_400;

/// Main archive configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Object store backend
    pub store_type: ObjectStoreType,
    /// Base directory (for the `localfs` store)
    pub local_path: Option<PathBuf>,
    /// Connection settings (for the `s3` store)
    pub s3: S3Config,
    pub bucket: String,
    /// Explicit key prefix; derived from `prefix` when unset
    pub object_prefix: Option<String>,
    /// Parts the key prefix is derived from
    pub prefix: PrefixConfig,
    /// Maximum stream lifetime before a new stream is opened
    #[serde(rename = "max_seconds_per_stream", with = "duration_secs")]
    pub max_stream_duration: Duration,
    /// Ingest listener address
    pub listen_addr: String,
    pub logging: LoggingConfig,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        ArchiveConfig {
            store_type: ObjectStoreType::Memory,
            local_path: None,
            s3: S3Config::default(),
            bucket: "flows".to_string(),
            object_prefix: None,
            prefix: PrefixConfig::default(),
            max_stream_duration: Duration::from_secs(DEFAULT_MAX_SECONDS_PER_STREAM),
            listen_addr: "127.0.0.1:8091".to_string(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ArchiveConfig {
    /// Local development against a directory
    pub fn local(path: PathBuf) -> Self {
        ArchiveConfig {
            store_type: ObjectStoreType::LocalFs,
            local_path: Some(path),
            ..ArchiveConfig::default()
        }
    }

    /// In-memory configuration for tests
    pub fn test() -> Self {
        ArchiveConfig {
            bucket: "test".to_string(),
            object_prefix: Some("test".to_string()),
            listen_addr: "127.0.0.1:0".to_string(),
            ..ArchiveConfig::default()
        }
    }

    pub fn from_toml_str(raw: &str) -> ArchiveResult<Self> {
        toml::from_str(raw).map_err(|e| ArchiveError::Config(format!("invalid TOML: {}", e)))
    }

    pub fn from_file(path: &Path) -> ArchiveResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ArchiveError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Optional file, then environment overrides, then validation
    pub fn load(path: Option<&Path>) -> ArchiveResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `FLOW_ARCHIVE_*` overrides from the process environment
    pub fn apply_env(&mut self) -> ArchiveResult<()> {
        self.apply_overrides(|name| std::env::var(format!("{}{}", ENV_PREFIX, name)).ok())
    }

    /// Apply overrides from `lookup`, called with the variable name minus
    /// `FLOW_ARCHIVE_`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> ArchiveResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("STORE") {
            self.store_type = v.parse()?;
        }
        if let Some(v) = lookup("LOCAL_PATH") {
            self.local_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("ENDPOINT") {
            self.s3.endpoint = Some(v);
        }
        if let Some(v) = lookup("REGION") {
            self.s3.region = v;
        }
        if let Some(v) = lookup("ACCESS_KEY") {
            self.s3.access_key = Some(v);
        }
        if let Some(v) = lookup("SECRET_KEY") {
            self.s3.secret_key = Some(v);
        }
        if let Some(v) = lookup("BUCKET") {
            self.bucket = v;
        }
        if let Some(v) = lookup("OBJECT_PREFIX") {
            self.object_prefix = Some(v);
        }
        if let Some(v) = lookup("MAX_SECONDS_PER_STREAM") {
            let secs: u64 = v.parse().map_err(|_| {
                ArchiveError::Config(format!("MAX_SECONDS_PER_STREAM must be an integer, got '{}'", v))
            })?;
            self.max_stream_duration = Duration::from_secs(secs);
        }
        if let Some(v) = lookup("LISTEN_ADDR") {
            self.listen_addr = v;
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("LOG_FORMAT") {
            self.logging.format = v.parse()?;
        }
        Ok(())
    }

    /// Key prefix objects are written under
    pub fn object_prefix(&self) -> String {
        match &self.object_prefix {
            Some(prefix) => prefix.trim_end_matches('/').to_string(),
            None => self.prefix.derive(),
        }
    }

    pub fn validate(&self) -> ArchiveResult<()> {
        if self.bucket.is_empty() {
            return Err(ArchiveError::Config("bucket must not be empty".to_string()));
        }
        match self.store_type {
            ObjectStoreType::Memory => {}
            ObjectStoreType::LocalFs => {
                if self.local_path.is_none() {
                    return Err(ArchiveError::Config(
                        "local_path is required for the localfs store".to_string(),
                    ));
                }
            }
            ObjectStoreType::S3 => {
                if self.s3.region.is_empty() {
                    return Err(ArchiveError::Config(
                        "s3.region is required for the s3 store".to_string(),
                    ));
                }
                if self.s3.access_key.is_some() != self.s3.secret_key.is_some() {
                    return Err(ArchiveError::Config(
                        "s3.access_key and s3.secret_key must be set together".to_string(),
                    ));
                }
            }
        }
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(ArchiveError::Config(format!(
                "listen_addr '{}' is not a socket address",
                self.listen_addr
            )));
        }
        Ok(())
    }
}

/// Type of object store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectStoreType {
    /// In-memory store (for tests)
    #[default]
    Memory,
    /// Local filesystem
    LocalFs,
    /// Amazon S3 or compatible (requires the `s3` feature)
    S3,
}

impl std::str::FromStr for ObjectStoreType {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" | "inmemory" => Ok(ObjectStoreType::Memory),
            "localfs" | "local" => Ok(ObjectStoreType::LocalFs),
            "s3" => Ok(ObjectStoreType::S3),
            other => Err(ArchiveError::Config(format!("unknown store type '{}'", other))),
        }
    }
}

/// S3 connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    /// Custom endpoint (for S3-compatible services like MinIO)
    pub endpoint: Option<String>,
    pub region: String,
    /// Falls back to `AWS_ACCESS_KEY_ID` when unset
    pub access_key: Option<String>,
    /// Falls back to `AWS_SECRET_ACCESS_KEY` when unset
    pub secret_key: Option<String>,
}

impl Default for S3Config {
    fn default() -> Self {
        S3Config {
            endpoint: None,
            region: "us-east-1".to_string(),
            access_key: None,
            secret_key: None,
        }
    }
}

/// Key prefix parts, joined with `/` in this order; empty parts are skipped
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefixConfig {
    pub root_dir: String,
    pub collector_type: String,
    pub region: String,
    pub entity_id: String,
    pub collector_id: String,
}

impl PrefixConfig {
    pub fn derive(&self) -> String {
        [
            &self.root_dir,
            &self.collector_type,
            &self.region,
            &self.entity_id,
            &self.collector_id,
        ]
        .iter()
        .map(|part| part.trim_matches('/'))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/")
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plain" | "text" => Ok(LogFormat::Plain),
            "json" => Ok(LogFormat::Json),
            other => Err(ArchiveError::Config(format!("unknown log format '{}'", other))),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            format: LogFormat::Plain,
        }
    }
}

/// Serde helper for Duration as whole seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = ArchiveConfig::default();
        assert_eq!(config.store_type, ObjectStoreType::Memory);
        assert_eq!(config.max_stream_duration, Duration::from_secs(86_400));
        assert_eq!(config.object_prefix(), "");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml() {
        let config = ArchiveConfig::from_toml_str(
            r#"
            store_type = "s3"
            bucket = "skydive-flows"
            max_seconds_per_stream = 3600

            [s3]
            endpoint = "http://127.0.0.1:9000"
            region = "eu-west-1"
            access_key = "minio"
            secret_key = "minio123"

            [prefix]
            root_dir = "flows"
            collector_type = "agent"
            collector_id = "host-1"

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.store_type, ObjectStoreType::S3);
        assert_eq!(config.bucket, "skydive-flows");
        assert_eq!(config.max_stream_duration, Duration::from_secs(3600));
        assert_eq!(config.s3.endpoint.as_deref(), Some("http://127.0.0.1:9000"));
        assert_eq!(config.object_prefix(), "flows/agent/host-1");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_toml() {
        let err = ArchiveConfig::from_toml_str("store_type = \"ftp\"").unwrap_err();
        assert!(matches!(err, ArchiveError::Config(_)));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("STORE", "localfs"),
            ("LOCAL_PATH", "/var/lib/flows"),
            ("OBJECT_PREFIX", "archive/"),
            ("MAX_SECONDS_PER_STREAM", "60"),
            ("LOG_FORMAT", "json"),
        ]);
        let mut config = ArchiveConfig::default();
        config
            .apply_overrides(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.store_type, ObjectStoreType::LocalFs);
        assert_eq!(config.local_path, Some(PathBuf::from("/var/lib/flows")));
        assert_eq!(config.object_prefix(), "archive");
        assert_eq!(config.max_stream_duration, Duration::from_secs(60));
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_bad_override() {
        let mut config = ArchiveConfig::default();
        let err = config
            .apply_overrides(|name| (name == "MAX_SECONDS_PER_STREAM").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Config(_)));
    }

    #[test]
    fn test_prefix_derivation_skips_empty_parts() {
        let prefix = PrefixConfig {
            root_dir: "/flows/".to_string(),
            region: "us-south".to_string(),
            collector_id: "c1".to_string(),
            ..PrefixConfig::default()
        };
        assert_eq!(prefix.derive(), "flows/us-south/c1");
        assert_eq!(PrefixConfig::default().derive(), "");
    }

    #[test]
    fn test_validate() {
        let mut config = ArchiveConfig::test();
        assert!(config.validate().is_ok());

        config.store_type = ObjectStoreType::LocalFs;
        assert!(config.validate().is_err());
        config.local_path = Some(PathBuf::from("/tmp/flows"));
        assert!(config.validate().is_ok());

        config.store_type = ObjectStoreType::S3;
        config.s3.access_key = Some("key".to_string());
        assert!(config.validate().is_err());
        config.s3.secret_key = Some("secret".to_string());
        assert!(config.validate().is_ok());

        config.bucket.clear();
        assert!(config.validate().is_err());
    }
}
