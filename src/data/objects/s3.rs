//! S3-compatible segment payload store
//!
//! Stores segment payloads in AWS S3 or any S3-compatible service (MinIO,
//! VAST S3) under the deterministic segment key, with presigned URL minting
//! for direct client access.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::presigning::PresigningConfig;

use super::error::ObjectStoreError;
use super::store::{
    GetUrl, PayloadStore, PresignOp, SegmentDescriptor, SegmentPayload, segment_key,
    segment_metadata,
};
use crate::core::config::ObjectStoreConfig;
use crate::core::constants::DEFAULT_SEGMENT_CONTENT_TYPE;

/// S3-compatible store for segment payloads
pub struct SegmentObjectStore {
    client: Client,
    config: ObjectStoreConfig,
}

impl SegmentObjectStore {
    /// Build the client and ensure the configured bucket exists.
    pub async fn connect(config: ObjectStoreConfig) -> Result<Self, ObjectStoreError> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        let region = config
            .region
            .clone()
            .unwrap_or_else(|| "us-east-1".to_string());
        loader = loader.region(aws_sdk_s3::config::Region::new(region));
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(ref endpoint) = config.endpoint_url {
            // Path-style addressing for S3-compatible services
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        if !config.access_key_id.is_empty() {
            builder = builder.credentials_provider(aws_sdk_s3::config::Credentials::new(
                config.access_key_id.clone(),
                config.secret_access_key.clone(),
                None,
                None,
                "object-store-config",
            ));
        }

        let store = Self {
            client: Client::from_conf(builder.build()),
            config,
        };
        store.ensure_bucket().await?;
        tracing::debug!(
            bucket = %store.config.bucket_name,
            endpoint = ?store.config.endpoint_url,
            "Segment object store initialized"
        );
        Ok(store)
    }

    /// Ensure the bucket exists, creating it when missing.
    pub async fn ensure_bucket(&self) -> Result<(), ObjectStoreError> {
        let bucket = &self.config.bucket_name;
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => {
                tracing::trace!(bucket = %bucket, "Bucket exists");
                Ok(())
            }
            Err(err) => {
                let service_err = err.into_service_error();
                if !service_err.is_not_found() {
                    return Err(ObjectStoreError::BucketUnavailable {
                        bucket: bucket.clone(),
                        message: service_err.to_string(),
                    });
                }
                self.client
                    .create_bucket()
                    .bucket(bucket)
                    .send()
                    .await
                    .map_err(|e| ObjectStoreError::BucketUnavailable {
                        bucket: bucket.clone(),
                        message: e.to_string(),
                    })?;
                tracing::debug!(bucket = %bucket, "Created bucket");
                Ok(())
            }
        }
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket_name
    }
}

#[async_trait]
impl PayloadStore for SegmentObjectStore {
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
        let body = payload.into_byte_stream().await?;

        let mut request = self
            .client
            .put_object()
            .bucket(&self.config.bucket_name)
            .key(&key)
            .set_metadata(Some(metadata))
            .body(body);
        if content_type != DEFAULT_SEGMENT_CONTENT_TYPE {
            request = request.content_type(content_type);
        }

        request
            .send()
            .await
            .map_err(|e| ObjectStoreError::backend("put_object", &key, e.into_service_error()))?;

        tracing::debug!(
            flow_id = %flow_id,
            segment_id = %descriptor.segment_id,
            key = %key,
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
        let response = match self
            .client
            .get_object()
            .bucket(&self.config.bucket_name)
            .key(&key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_no_such_key() {
                    tracing::warn!(key = %key, "Segment payload not found");
                    return Ok(None);
                }
                return Err(ObjectStoreError::backend("get_object", &key, service_err));
            }
        };

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| ObjectStoreError::backend("get_object", &key, e))?
            .into_bytes()
            .to_vec();
        Ok(Some(data))
    }

    async fn get_segment_metadata(
        &self,
        flow_id: &str,
        segment_id: &str,
        timerange: &str,
    ) -> Result<Option<HashMap<String, String>>, ObjectStoreError> {
        let key = segment_key(flow_id, segment_id, timerange);
        let response = match self
            .client
            .head_object()
            .bucket(&self.config.bucket_name)
            .key(&key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_not_found() {
                    return Ok(None);
                }
                return Err(ObjectStoreError::backend("head_object", &key, service_err));
            }
        };

        let mut metadata: HashMap<String, String> = response
            .metadata()
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        metadata.insert(
            "size".to_string(),
            response.content_length().unwrap_or(0).to_string(),
        );
        if let Some(modified) = response.last_modified() {
            metadata.insert("last_modified".to_string(), modified.to_string());
        }
        if let Some(content_type) = response.content_type() {
            metadata.insert("content_type".to_string(), content_type.to_string());
        }
        if let Some(etag) = response.e_tag() {
            metadata.insert("etag".to_string(), etag.trim_matches('"').to_string());
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
        // S3 delete_object succeeds for missing keys, giving the idempotent
        // delete the interface promises.
        self.client
            .delete_object()
            .bucket(&self.config.bucket_name)
            .key(storage_path)
            .send()
            .await
            .map_err(|e| {
                ObjectStoreError::backend("delete_object", storage_path, e.into_service_error())
            })?;
        tracing::debug!(key = %storage_path, "Deleted object");
        Ok(())
    }

    async fn presigned_url_for_key(
        &self,
        key: &str,
        op: PresignOp,
        expires_in: Option<Duration>,
    ) -> Result<String, ObjectStoreError> {
        let expires_in =
            expires_in.unwrap_or(Duration::from_secs(self.config.presigned_url_timeout_secs));
        let presigning =
            PresigningConfig::expires_in(expires_in).map_err(|e| ObjectStoreError::Presign {
                op: op.as_str(),
                key: key.to_string(),
                message: e.to_string(),
            })?;

        let bucket = &self.config.bucket_name;
        let presigned = match op {
            PresignOp::Get => self
                .client
                .get_object()
                .bucket(bucket)
                .key(key)
                .presigned(presigning)
                .await
                .map_err(|e| e.to_string()),
            PresignOp::Put => self
                .client
                .put_object()
                .bucket(bucket)
                .key(key)
                .presigned(presigning)
                .await
                .map_err(|e| e.to_string()),
            PresignOp::Delete => self
                .client
                .delete_object()
                .bucket(bucket)
                .key(key)
                .presigned(presigning)
                .await
                .map_err(|e| e.to_string()),
        };

        presigned
            .map(|request| request.uri().to_string())
            .map_err(|message| ObjectStoreError::Presign {
                op: op.as_str(),
                key: key.to_string(),
                message,
            })
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
        let url = self
            .presigned_url_for_key(&key, PresignOp::Get, None)
            .await?;

        let backend = &self.config.backend;
        Ok(vec![GetUrl {
            url,
            store_type: backend.store_type.clone(),
            provider: backend.provider.clone(),
            region: backend.region.clone(),
            availability_zone: backend.availability_zone.clone(),
            store_product: backend.store_product.clone(),
            storage_id: backend.storage_id.clone(),
            presigned: true,
            label: format!("Direct access for segment {}", segment_id),
            controlled: true,
        }])
    }
}
