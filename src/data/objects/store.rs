//! Payload store trait and shared segment-object types
//!
//! Defines the interface for segment payload backends (S3-compatible,
//! filesystem) and the deterministic key derivation they share:
//! `{flow_id}/{YYYY}/{MM}/{DD}/{segment_id}`, dated from the timerange
//! start. Unparseable timeranges fall back to the current date.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use chrono::{Datelike, Utc};
use serde::Serialize;

use super::error::ObjectStoreError;
use crate::utils::timerange::TimeRange;

/// Presignable object-store operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresignOp {
    Get,
    Put,
    Delete,
}

impl PresignOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get_object",
            Self::Put => "put_object",
            Self::Delete => "delete_object",
        }
    }
}

/// Segment payload accepted by [`PayloadStore::store_segment`]
pub enum SegmentPayload {
    Bytes(Vec<u8>),
    /// Path to a file opened and read at upload time
    File(PathBuf),
    /// Pre-built stream handed straight to the store
    Stream(ByteStream),
}

impl From<Vec<u8>> for SegmentPayload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<&[u8]> for SegmentPayload {
    fn from(bytes: &[u8]) -> Self {
        Self::Bytes(bytes.to_vec())
    }
}

impl SegmentPayload {
    /// Read the payload into memory.
    pub(crate) async fn into_bytes(self) -> Result<Vec<u8>, ObjectStoreError> {
        match self {
            Self::Bytes(bytes) => Ok(bytes),
            Self::File(path) => tokio::fs::read(&path).await.map_err(|e| {
                ObjectStoreError::Payload(format!("cannot read {}: {}", path.display(), e))
            }),
            Self::Stream(stream) => Ok(stream
                .collect()
                .await
                .map_err(|e| ObjectStoreError::Payload(e.to_string()))?
                .into_bytes()
                .to_vec()),
        }
    }

    pub(crate) async fn into_byte_stream(self) -> Result<ByteStream, ObjectStoreError> {
        match self {
            Self::Bytes(bytes) => Ok(ByteStream::from(bytes)),
            Self::File(path) => ByteStream::from_path(&path).await.map_err(|e| {
                ObjectStoreError::Payload(format!("cannot read {}: {}", path.display(), e))
            }),
            Self::Stream(stream) => Ok(stream),
        }
    }
}

/// Descriptor fields of a segment being stored, attached as object metadata
#[derive(Debug, Clone, Default)]
pub struct SegmentDescriptor {
    pub segment_id: String,
    pub timerange: String,
    pub ts_offset: Option<String>,
    pub last_duration: Option<String>,
    pub sample_offset: i64,
    pub sample_count: i64,
    pub key_frame_count: i64,
}

/// Access URL enriched with the storage-backend descriptor
#[derive(Debug, Clone, Serialize)]
pub struct GetUrl {
    pub url: String,
    pub store_type: String,
    pub provider: String,
    pub region: String,
    pub availability_zone: Option<String>,
    pub store_product: String,
    pub storage_id: String,
    pub presigned: bool,
    pub label: String,
    pub controlled: bool,
}

/// Trait for segment payload backends.
///
/// All implementations must be thread-safe for use in async contexts. Keys
/// are derived with [`segment_key`] so that any backend addresses the same
/// payload identically.
#[async_trait]
pub trait PayloadStore: Send + Sync {
    /// Store a segment payload; returns the storage key it landed under.
    async fn store_segment(
        &self,
        flow_id: &str,
        descriptor: &SegmentDescriptor,
        payload: SegmentPayload,
        content_type: Option<&str>,
    ) -> Result<String, ObjectStoreError>;

    /// Fetch a segment payload; `None` when the key does not exist.
    async fn get_segment(
        &self,
        flow_id: &str,
        segment_id: &str,
        timerange: &str,
    ) -> Result<Option<Vec<u8>>, ObjectStoreError>;

    /// Stored metadata enriched with size/content-type details; `None` when
    /// missing.
    async fn get_segment_metadata(
        &self,
        flow_id: &str,
        segment_id: &str,
        timerange: &str,
    ) -> Result<Option<HashMap<String, String>>, ObjectStoreError>;

    /// Delete a segment payload; missing keys are treated as success.
    async fn delete_segment(
        &self,
        flow_id: &str,
        segment_id: &str,
        timerange: &str,
    ) -> Result<(), ObjectStoreError>;

    /// Delete an object directly by its storage path; idempotent.
    async fn delete_object(&self, storage_path: &str) -> Result<(), ObjectStoreError>;

    /// Mint an access URL for an explicit storage path.
    async fn presigned_url_for_key(
        &self,
        key: &str,
        op: PresignOp,
        expires_in: Option<Duration>,
    ) -> Result<String, ObjectStoreError>;

    /// Mint an access URL for a derived segment key.
    async fn presigned_url(
        &self,
        flow_id: &str,
        segment_id: &str,
        timerange: &str,
        op: PresignOp,
        expires_in: Option<Duration>,
    ) -> Result<String, ObjectStoreError> {
        let key = segment_key(flow_id, segment_id, timerange);
        self.presigned_url_for_key(&key, op, expires_in).await
    }

    /// Access URLs wrapped in the configured storage-backend descriptor.
    async fn get_urls(
        &self,
        flow_id: &str,
        segment_id: &str,
        timerange: &str,
        storage_path: Option<&str>,
    ) -> Result<Vec<GetUrl>, ObjectStoreError>;
}

/// Deterministic object key for a segment.
pub fn segment_key(flow_id: &str, segment_id: &str, timerange: &str) -> String {
    let (year, month, day) = match TimeRange::parse(timerange) {
        Ok(range) => range.start_date_components().unwrap_or_else(today),
        Err(e) => {
            tracing::warn!(
                timerange = %timerange,
                error = %e,
                "Unparseable timerange, keying segment by current date"
            );
            today()
        }
    };
    format!(
        "{}/{:04}/{:02}/{:02}/{}",
        flow_id, year, month, day, segment_id
    )
}

pub(crate) fn today() -> (i32, u32, u32) {
    let now = Utc::now();
    (now.year(), now.month(), now.day())
}

/// Stringified metadata map attached to stored segments.
pub(crate) fn segment_metadata(
    flow_id: &str,
    descriptor: &SegmentDescriptor,
    content_type: &str,
) -> HashMap<String, String> {
    let mut metadata = HashMap::new();
    metadata.insert("flow_id".to_string(), flow_id.to_string());
    metadata.insert("segment_id".to_string(), descriptor.segment_id.clone());
    metadata.insert("timerange".to_string(), descriptor.timerange.clone());
    metadata.insert(
        "ts_offset".to_string(),
        descriptor.ts_offset.clone().unwrap_or_default(),
    );
    metadata.insert(
        "last_duration".to_string(),
        descriptor.last_duration.clone().unwrap_or_default(),
    );
    metadata.insert(
        "sample_offset".to_string(),
        descriptor.sample_offset.to_string(),
    );
    metadata.insert(
        "sample_count".to_string(),
        descriptor.sample_count.to_string(),
    );
    metadata.insert(
        "key_frame_count".to_string(),
        descriptor.key_frame_count.to_string(),
    );
    metadata.insert("created".to_string(), Utc::now().to_rfc3339());
    metadata.insert("content_type".to_string(), content_type.to_string());
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_key_is_deterministic() {
        let a = segment_key("flow-1", "seg-1", "[0:0_10:0)");
        let b = segment_key("flow-1", "seg-1", "[0:0_10:0)");
        assert_eq!(a, b);
    }

    #[test]
    fn segment_key_uses_timerange_start_date() {
        // 2024-01-01 00:00:00 UTC
        let key = segment_key("flow-1", "seg-1", "[1704067200:0_1704067210:0)");
        assert_eq!(key, "flow-1/2024/01/01/seg-1");
    }

    #[test]
    fn segment_key_epoch_start() {
        let key = segment_key("flow-1", "seg-1", "[0:0_10:0)");
        assert_eq!(key, "flow-1/1970/01/01/seg-1");
    }

    #[test]
    fn segment_key_falls_back_to_today_on_parse_failure() {
        let key = segment_key("flow-1", "seg-1", "not-a-range");
        let (year, _, _) = today();
        assert!(key.starts_with(&format!("flow-1/{:04}/", year)));
        assert!(key.ends_with("/seg-1"));
    }

    #[test]
    fn metadata_values_are_stringified() {
        let descriptor = SegmentDescriptor {
            segment_id: "seg-1".to_string(),
            timerange: "[0:0_10:0)".to_string(),
            ts_offset: None,
            last_duration: Some("0:2".to_string()),
            sample_offset: 0,
            sample_count: 1_000,
            key_frame_count: 10,
        };
        let metadata = segment_metadata("flow-1", &descriptor, "video/mp2t");

        assert_eq!(metadata["flow_id"], "flow-1");
        assert_eq!(metadata["sample_count"], "1000");
        assert_eq!(metadata["ts_offset"], "");
        assert_eq!(metadata["last_duration"], "0:2");
        assert_eq!(metadata["content_type"], "video/mp2t");
        assert!(metadata.contains_key("created"));
    }

    #[test]
    fn presign_op_names() {
        assert_eq!(PresignOp::Get.as_str(), "get_object");
        assert_eq!(PresignOp::Put.as_str(), "put_object");
        assert_eq!(PresignOp::Delete.as_str(), "delete_object");
    }

    #[tokio::test]
    async fn payload_into_bytes() {
        let payload: SegmentPayload = b"XYZ".as_slice().into();
        assert_eq!(payload.into_bytes().await.unwrap(), b"XYZ");
    }
}
