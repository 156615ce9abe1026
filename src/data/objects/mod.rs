//! Object-store segment layer
//!
//! Opaque segment payloads addressed by a deterministic content path:
//! `{flow_id}/{YYYY}/{MM}/{DD}/{segment_id}`.
//!
//! - `store` - the `PayloadStore` trait, key derivation and shared types
//! - `s3` - S3-compatible backend with presigned URLs
//! - `filesystem` - local backend for single-node deployments and tests
//! - `error` - backend error type

pub mod error;
pub mod filesystem;
pub mod s3;
pub mod store;

pub use error::ObjectStoreError;
pub use filesystem::FilesystemPayloadStore;
pub use s3::SegmentObjectStore;
pub use store::{
    GetUrl, PayloadStore, PresignOp, SegmentDescriptor, SegmentPayload, segment_key,
};
