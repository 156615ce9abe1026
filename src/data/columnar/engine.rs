//! Columnar engine seam
//!
//! The store consumes the columnar engine through these traits: a connector
//! opens one session per endpoint, and a session exposes table DDL, batch
//! DML keyed by the engine's internal `$row_id`, projection management and
//! pushdown aggregation. Every session operation is transactional on the
//! engine side; release is guaranteed on all exit paths.
//!
//! The embedded implementation lives in
//! [`super::duckdb::DuckdbConnector`]; a remote engine adapter implements
//! the same traits out of tree.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::planner::QueryConfig;
use super::types::{ColumnSet, Field, TableSchema, TableStats};
use crate::data::error::StoreError;

/// Opens engine sessions bound to `(endpoint, credentials, timeout)`.
#[async_trait]
pub trait EngineConnector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        timeout: Duration,
    ) -> Result<Arc<dyn EngineSession>, StoreError>;
}

/// A session against one engine endpoint.
#[async_trait]
pub trait EngineSession: Send + Sync {
    /// Ensure the bucket/schema namespace exists, creating the schema when
    /// missing.
    async fn ensure_schema(&self, bucket: &str, schema: &str) -> Result<(), StoreError>;

    async fn list_tables(&self) -> Result<Vec<String>, StoreError>;

    async fn table_schema(&self, table: &str) -> Result<TableSchema, StoreError>;

    async fn table_stats(&self, table: &str) -> Result<TableStats, StoreError>;

    async fn create_table(&self, table: &str, schema: &TableSchema) -> Result<(), StoreError>;

    async fn drop_table(&self, table: &str) -> Result<(), StoreError>;

    async fn add_column(&self, table: &str, field: &Field) -> Result<(), StoreError>;

    async fn create_projection(
        &self,
        table: &str,
        name: &str,
        sorted_columns: &[String],
        unsorted_columns: &[String],
    ) -> Result<(), StoreError>;

    async fn drop_projection(&self, table: &str, name: &str) -> Result<(), StoreError>;

    async fn list_projections(&self, table: &str) -> Result<Vec<String>, StoreError>;

    /// Append a column-major batch; returns rows written.
    async fn insert(&self, table: &str, batch: &ColumnSet) -> Result<usize, StoreError>;

    /// Predicate select. With `with_row_ids` the engine materializes its
    /// internal row identifier as a `$row_id` column alongside the user
    /// columns.
    async fn select(
        &self,
        table: &str,
        columns: Option<&[String]>,
        filter: Option<&str>,
        with_row_ids: bool,
        config: &QueryConfig,
    ) -> Result<ColumnSet, StoreError>;

    /// In-place update. The batch schema is `[$row_id] + updated columns`;
    /// returns rows touched.
    async fn update(&self, table: &str, batch: &ColumnSet) -> Result<usize, StoreError>;

    /// Delete by materialized row ids; returns rows removed.
    async fn delete(&self, table: &str, row_ids: &[u64]) -> Result<usize, StoreError>;

    /// Pushdown aggregation: `SELECT exprs FROM table [WHERE filter]
    /// [GROUP BY ...] [ORDER BY ...] [LIMIT n]`. Output columns are named by
    /// their `AS` aliases.
    async fn aggregate(
        &self,
        table: &str,
        exprs: &[String],
        filter: Option<&str>,
        group_by: Option<&str>,
        order_by: Option<&str>,
        limit: Option<usize>,
    ) -> Result<ColumnSet, StoreError>;

    /// Close the session; idempotent.
    async fn close(&self) -> Result<(), StoreError>;
}
