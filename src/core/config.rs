//! Store configuration
//!
//! Every component receives its configuration explicitly at construction;
//! there is no global settings object. Defaults come from
//! [`crate::core::constants`] and an optional mounted JSON file can override
//! individual keys (unknown keys are logged and ignored).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::constants::{
    DEFAULT_ANALYTICS_STICKY_SECS, DEFAULT_BATCH_SIZE, DEFAULT_CACHE_TTL_SECS,
    DEFAULT_COLUMNAR_BUCKET, DEFAULT_COLUMNAR_ENDPOINT, DEFAULT_COLUMNAR_SCHEMA,
    DEFAULT_COLUMNAR_TIMEOUT_SECS, DEFAULT_HEALTH_CHECK_INTERVAL_SECS, DEFAULT_MAX_RETRIES,
    DEFAULT_MAX_WORKERS, DEFAULT_METRICS_HISTORY_CAP, DEFAULT_PRESIGNED_URL_TIMEOUT_SECS,
    DEFAULT_ROUND_ROBIN_INTERVAL_SECS, DEFAULT_SEGMENT_BUCKET, DEFAULT_SLOW_QUERY_THRESHOLD_SECS,
    PARALLEL_THRESHOLD,
};

/// Columnar engine connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnarConfig {
    /// Engine endpoints; the pool tracks health per endpoint
    pub endpoints: Vec<String>,
    pub access_key: String,
    pub secret_key: String,
    /// Bucket holding the metadata schema
    pub bucket: String,
    /// Schema (namespace) for the entity tables
    pub schema: String,
    /// Network operation timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ColumnarConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![DEFAULT_COLUMNAR_ENDPOINT.to_string()],
            access_key: String::new(),
            secret_key: String::new(),
            bucket: DEFAULT_COLUMNAR_BUCKET.to_string(),
            schema: DEFAULT_COLUMNAR_SCHEMA.to_string(),
            timeout_secs: DEFAULT_COLUMNAR_TIMEOUT_SECS,
        }
    }
}

/// Payload storage backend for segment objects
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadBackend {
    Filesystem,
    #[default]
    S3,
}

impl std::fmt::Display for PayloadBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PayloadBackend::Filesystem => write!(f, "filesystem"),
            PayloadBackend::S3 => write!(f, "s3"),
        }
    }
}

/// Storage backend descriptor advertised on presigned URLs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageBackendInfo {
    pub store_type: String,
    pub provider: String,
    pub region: String,
    pub availability_zone: Option<String>,
    pub store_product: String,
    pub storage_id: String,
}

impl Default for StorageBackendInfo {
    fn default() -> Self {
        Self {
            store_type: "http_object_store".to_string(),
            provider: "S3-Compatible".to_string(),
            region: "default".to_string(),
            availability_zone: None,
            store_product: "S3-Compatible Storage".to_string(),
            storage_id: "default".to_string(),
        }
    }
}

/// Object store (S3-compatible) settings for segment payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectStoreConfig {
    /// Payload backend implementation
    pub backend_kind: PayloadBackend,
    /// Root directory for the filesystem backend
    pub filesystem_root: Option<std::path::PathBuf>,
    /// Custom endpoint URL; `None` uses the SDK default resolution
    pub endpoint_url: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
    pub region: Option<String>,
    pub use_ssl: bool,
    /// Presigned URL lifetime in seconds
    pub presigned_url_timeout_secs: u64,
    /// Backend descriptor attached to presigned URL responses
    pub backend: StorageBackendInfo,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            backend_kind: PayloadBackend::default(),
            filesystem_root: None,
            endpoint_url: None,
            access_key_id: String::new(),
            secret_access_key: String::new(),
            bucket_name: DEFAULT_SEGMENT_BUCKET.to_string(),
            region: None,
            use_ssl: false,
            presigned_url_timeout_secs: DEFAULT_PRESIGNED_URL_TIMEOUT_SECS,
            backend: StorageBackendInfo::default(),
        }
    }
}

/// Batch insertion tuning
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Rows per batch
    pub batch_size: usize,
    /// Bounded worker pool size for parallel dispatch
    pub max_workers: usize,
    /// Batch count above which parallel dispatch kicks in
    pub parallel_threshold: usize,
    /// Retry rounds for failed batches in transactional mode
    pub max_retries: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_workers: DEFAULT_MAX_WORKERS,
            parallel_threshold: PARALLEL_THRESHOLD,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Metadata cache tuning
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Per-table entry TTL in seconds
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_CACHE_TTL_SECS,
        }
    }
}

/// Query metrics tuning
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Ring buffer capacity
    pub history_cap: usize,
    /// Execution time above which a query is logged as slow, in seconds
    pub slow_query_threshold_secs: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            history_cap: DEFAULT_METRICS_HISTORY_CAP,
            slow_query_threshold_secs: DEFAULT_SLOW_QUERY_THRESHOLD_SECS,
        }
    }
}

/// Endpoint selection tuning
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// Prefer the fastest healthy endpoint for reads (round-robin otherwise)
    pub prefer_fastest: bool,
    pub round_robin_interval_secs: u64,
    /// How long the analytics endpoint stays sticky before refresh
    pub analytics_sticky_secs: u64,
    pub health_check_interval_secs: u64,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            prefer_fastest: true,
            round_robin_interval_secs: DEFAULT_ROUND_ROBIN_INTERVAL_SECS,
            analytics_sticky_secs: DEFAULT_ANALYTICS_STICKY_SECS,
            health_check_interval_secs: DEFAULT_HEALTH_CHECK_INTERVAL_SECS,
        }
    }
}

/// Top-level store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub columnar: ColumnarConfig,
    pub object_store: ObjectStoreConfig,
    pub batch: BatchConfig,
    pub cache: CacheConfig,
    pub metrics: MetricsConfig,
    pub balancer: BalancerConfig,
}

impl AppConfig {
    /// Recognized top-level keys in the mounted config file
    const KNOWN_KEYS: &'static [&'static str] = &[
        "columnar",
        "object_store",
        "batch",
        "cache",
        "metrics",
        "balancer",
    ];

    /// Load configuration: defaults overlaid with the mounted JSON file when
    /// it exists. A missing file is not an error; a malformed file degrades
    /// to defaults with a warning.
    pub fn load(path: Option<&Path>) -> Self {
        let mut config = Self::default();
        let Some(path) = path else {
            return config;
        };
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No mounted config file, using defaults");
            return config;
        }
        match Self::apply_overlay(&mut config, path) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "Applied mounted config overlay");
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Could not load mounted config file, using defaults"
                );
            }
        }
        config
    }

    fn apply_overlay(config: &mut Self, path: &Path) -> Result<()> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let overlay: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(&raw).context("parsing config file as a JSON object")?;

        for (key, value) in overlay {
            if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                tracing::warn!(key = %key, "Unknown config key ignored");
                continue;
            }
            let result = match key.as_str() {
                "columnar" => serde_json::from_value(value).map(|v| config.columnar = v),
                "object_store" => serde_json::from_value(value).map(|v| config.object_store = v),
                "batch" => serde_json::from_value(value).map(|v| config.batch = v),
                "cache" => serde_json::from_value(value).map(|v| config.cache = v),
                "metrics" => serde_json::from_value(value).map(|v| config.metrics = v),
                "balancer" => serde_json::from_value(value).map(|v| config.balancer = v),
                _ => unreachable!(),
            };
            if let Err(e) = result {
                tracing::warn!(key = %key, error = %e, "Invalid config section ignored");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let config = AppConfig::default();
        assert_eq!(config.batch.batch_size, 100);
        assert_eq!(config.batch.max_workers, 4);
        assert_eq!(config.batch.parallel_threshold, 10);
        assert_eq!(config.batch.max_retries, 3);
        assert_eq!(config.columnar.timeout_secs, 30);
        assert_eq!(config.cache.ttl_secs, 1_800);
        assert_eq!(config.metrics.history_cap, 1_000);
    }

    #[test]
    fn load_without_path_uses_defaults() {
        let config = AppConfig::load(None);
        assert_eq!(config.columnar.bucket, "tams-db");
    }

    #[test]
    fn overlay_overrides_known_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"batch": {{"batch_size": 500}}, "cache": {{"ttl_secs": 60}}}}"#
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path()));
        assert_eq!(config.batch.batch_size, 500);
        // Unspecified fields inside an overridden section fall back to defaults
        assert_eq!(config.batch.max_workers, 4);
        assert_eq!(config.cache.ttl_secs, 60);
    }

    #[test]
    fn overlay_ignores_unknown_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"not_a_section": true, "batch": {{"max_retries": 5}}}}"#
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path()));
        assert_eq!(config.batch.max_retries, 5);
    }

    #[test]
    fn malformed_file_degrades_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json at all").unwrap();

        let config = AppConfig::load(Some(file.path()));
        assert_eq!(config.batch.batch_size, 100);
    }
}
