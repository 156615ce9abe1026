//! Core store infrastructure

pub mod config;
pub mod constants;

pub use config::{
    AppConfig, BalancerConfig, BatchConfig, CacheConfig, ColumnarConfig, MetricsConfig,
    ObjectStoreConfig, PayloadBackend, StorageBackendInfo,
};
