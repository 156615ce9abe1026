//! Filesystem segment payload store
//!
//! Stores payloads under `{root}/{segment key}` with a JSON metadata sidecar
//! next to each payload. Single-node deployments and the test suite use
//! this backend; access URLs are `file://` paths and therefore not
//! presigned.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;

use super::error::ObjectStoreError;
use super::store::{
    GetUrl, PayloadStore, PresignOp, SegmentDescriptor, SegmentPayload, segment_key,
    segment_metadata,
};
use crate::core::config::StorageBackendInfo;
use crate::core::constants::DEFAULT_SEGMENT_CONTENT_TYPE;

const METADATA_SUFFIX: &str = ".meta.json";

/// Filesystem-backed payload store
#[derive(Debug, Clone)]
pub struct FilesystemPayloadStore {
    root: PathBuf,
    backend: StorageBackendInfo,
}

impl FilesystemPayloadStore {
    pub fn new(root: PathBuf, backend: StorageBackendInfo) -> Self {
        Self { root, backend }
    }

    fn payload_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn metadata_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}{}", key, METADATA_SUFFIX))
    }

    async fn ensure_parent_dirs(path: &Path) -> Result<(), ObjectStoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl PayloadStore for FilesystemPayloadStore {
    async fn store_segment(
        &self,
        flow_id: &str,
        descriptor: &SegmentDescriptor,
        payload: SegmentPayload,
        content_type: Option<&str>,
    ) -> Result<String, ObjectStoreError> {
        let key = segment_key(flow_id, &descriptor.segment_id, &descriptor.timerange);
        let content_type = content_type.unwrap_or(DEFAULT_SEGMENT_CONTENT_TYPE);
        let metadata = segment_metadata(flow_id, descriptor, content_type);
        let data = payload.into_bytes().await?;

        let path = self.payload_path(&key);
        Self::ensure_parent_dirs(&path).await?;
        fs::write(&path, &data).await?;
        fs::write(
            self.metadata_path(&key),
            serde_json::to_vec(&metadata).unwrap_or_default(),
        )
        .await?;

        tracing::debug!(
            flow_id = %flow_id,
            segment_id = %descriptor.segment_id,
            key = %key,
            size = data.len(),
            "Stored segment payload"
        );
        Ok(key)
    }

    async fn get_segment(
        &self,
        flow_id: &str,
        segment_id: &str,
        timerange: &str,
    ) -> Result<Option<Vec<u8>>, ObjectStoreError> {
        let key = segment_key(flow_id, segment_id, timerange);
        // Read directly; ENOENT maps to a miss rather than a separate exists
        // check, which would race with concurrent deletes.
        match fs::read(self.payload_path(&key)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(key = %key, "Segment payload not found");
                Ok(None)
            }
            Err(e) => Err(ObjectStoreError::Io(e)),
        }
    }

    async fn get_segment_metadata(
        &self,
        flow_id: &str,
        segment_id: &str,
        timerange: &str,
    ) -> Result<Option<HashMap<String, String>>, ObjectStoreError> {
        let key = segment_key(flow_id, segment_id, timerange);
        let raw = match fs::read(self.metadata_path(&key)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ObjectStoreError::Io(e)),
        };
        let mut metadata: HashMap<String, String> =
            serde_json::from_slice(&raw).unwrap_or_default();

        if let Ok(file_meta) = fs::metadata(self.payload_path(&key)).await {
            metadata.insert("size".to_string(), file_meta.len().to_string());
        }
        Ok(Some(metadata))
    }

    async fn delete_segment(
        &self,
        flow_id: &str,
        segment_id: &str,
        timerange: &str,
    ) -> Result<(), ObjectStoreError> {
        let key = segment_key(flow_id, segment_id, timerange);
        self.delete_object(&key).await
    }

    async fn delete_object(&self, storage_path: &str) -> Result<(), ObjectStoreError> {
        for path in [
            self.payload_path(storage_path),
            self.metadata_path(storage_path),
        ] {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(ObjectStoreError::Io(e)),
            }
        }
        tracing::debug!(key = %storage_path, "Deleted object");
        Ok(())
    }

    async fn presigned_url_for_key(
        &self,
        key: &str,
        _op: PresignOp,
        _expires_in: Option<Duration>,
    ) -> Result<String, ObjectStoreError> {
        Ok(format!("file://{}", self.payload_path(key).display()))
    }

    async fn get_urls(
        &self,
        flow_id: &str,
        segment_id: &str,
        timerange: &str,
        storage_path: Option<&str>,
    ) -> Result<Vec<GetUrl>, ObjectStoreError> {
        let key = match storage_path {
            Some(path) => path.to_string(),
            None => segment_key(flow_id, segment_id, timerange),
        };
        let url = self.presigned_url_for_key(&key, PresignOp::Get, None).await?;

        Ok(vec![GetUrl {
            url,
            store_type: self.backend.store_type.clone(),
            provider: self.backend.provider.clone(),
            region: self.backend.region.clone(),
            availability_zone: self.backend.availability_zone.clone(),
            store_product: self.backend.store_product.clone(),
            storage_id: self.backend.storage_id.clone(),
            presigned: false,
            label: format!("Direct access for segment {}", segment_id),
            controlled: true,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, FilesystemPayloadStore) {
        let dir = tempfile::TempDir::new().unwrap();
        let store = FilesystemPayloadStore::new(
            dir.path().to_path_buf(),
            StorageBackendInfo::default(),
        );
        (dir, store)
    }

    fn descriptor() -> SegmentDescriptor {
        SegmentDescriptor {
            segment_id: "seg-1".to_string(),
            timerange: "[0:0_10:0)".to_string(),
            sample_offset: 0,
            sample_count: 1_000,
            key_frame_count: 10,
            ..SegmentDescriptor::default()
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips_bytes() {
        let (_dir, store) = store();
        let key = store
            .store_segment("flow-1", &descriptor(), b"XYZ".as_slice().into(), None)
            .await
            .unwrap();
        assert_eq!(key, "flow-1/1970/01/01/seg-1");

        let data = store
            .get_segment("flow-1", "seg-1", "[0:0_10:0)")
            .await
            .unwrap();
        assert_eq!(data, Some(b"XYZ".to_vec()));
    }

    #[tokio::test]
    async fn get_missing_segment_is_none() {
        let (_dir, store) = store();
        let data = store
            .get_segment("flow-1", "missing", "[0:0_10:0)")
            .await
            .unwrap();
        assert_eq!(data, None);
    }

    #[tokio::test]
    async fn metadata_round_trips_with_size() {
        let (_dir, store) = store();
        store
            .store_segment(
                "flow-1",
                &descriptor(),
                b"XYZ".as_slice().into(),
                Some("video/mp2t"),
            )
            .await
            .unwrap();

        let metadata = store
            .get_segment_metadata("flow-1", "seg-1", "[0:0_10:0)")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(metadata["flow_id"], "flow-1");
        assert_eq!(metadata["content_type"], "video/mp2t");
        assert_eq!(metadata["size"], "3");
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (_dir, store) = store();
        store
            .store_segment("flow-1", &descriptor(), b"XYZ".as_slice().into(), None)
            .await
            .unwrap();

        store
            .delete_segment("flow-1", "seg-1", "[0:0_10:0)")
            .await
            .unwrap();
        // Second delete of a missing key also succeeds
        store
            .delete_segment("flow-1", "seg-1", "[0:0_10:0)")
            .await
            .unwrap();

        let data = store
            .get_segment("flow-1", "seg-1", "[0:0_10:0)")
            .await
            .unwrap();
        assert_eq!(data, None);
    }

    #[tokio::test]
    async fn get_urls_wrap_backend_descriptor() {
        let (_dir, store) = store();
        store
            .store_segment("flow-1", &descriptor(), b"XYZ".as_slice().into(), None)
            .await
            .unwrap();

        let urls = store
            .get_urls("flow-1", "seg-1", "[0:0_10:0)", None)
            .await
            .unwrap();
        assert_eq!(urls.len(), 1);
        assert!(urls[0].url.starts_with("file://"));
        assert!(!urls[0].presigned);
        assert!(urls[0].controlled);
        assert_eq!(urls[0].store_type, "http_object_store");
    }

    #[tokio::test]
    async fn presigned_url_uses_derived_key() {
        let (_dir, store) = store();
        let url = store
            .presigned_url("flow-1", "seg-1", "[0:0_10:0)", PresignOp::Get, None)
            .await
            .unwrap();
        assert!(url.ends_with("flow-1/1970/01/01/seg-1"));
    }

    #[tokio::test]
    async fn stored_path_overrides_key_derivation() {
        let (_dir, store) = store();
        let urls = store
            .get_urls("flow-1", "seg-1", "[0:0_10:0)", Some("custom/path/seg-1"))
            .await
            .unwrap();
        assert!(urls[0].url.ends_with("custom/path/seg-1"));
    }
}
