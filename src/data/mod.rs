//! Storage layer
//!
//! - `columnar` - columnar-table manager: metadata cache, predicate
//!   compilation, query planning, row-id DML, batch ingestion, projections,
//!   endpoint health and query metrics
//! - `analytics` - pushdown time-series analytics and the hybrid embedded
//!   engine
//! - `objects` - S3-compatible segment payload store with deterministic keys
//!   and presigned URLs
//! - `error` - unified error type across the backends

pub mod analytics;
pub mod columnar;
pub mod error;
pub mod objects;

pub use columnar::{ColumnSet, ColumnarStore, DataType, Field, Predicate, TableSchema};
pub use error::StoreError;
pub use objects::{FilesystemPayloadStore, ObjectStoreError, PayloadStore, SegmentObjectStore};
