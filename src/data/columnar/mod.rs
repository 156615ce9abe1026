//! Columnar-table manager
//!
//! Central service over the columnar engine: cached table metadata,
//! predicate-compiled selects with split/subsplit planning, row-id based
//! UPDATE/DELETE, transactional batch ingestion, projection lifecycle and
//! query metrics. Every operation selects an endpoint through the load
//! balancer and reports its outcome back to the health pool.

pub mod balancer;
mod batch;
pub mod cache;
pub mod duckdb;
pub mod endpoints;
pub mod engine;
pub mod metrics;
pub mod planner;
pub mod predicate;
pub mod session;
pub mod types;

pub use batch::{BatchDetail, BatchReport, BatchStatus, TransactionalInsertOptions};
pub use predicate::{Condition, Predicate};
pub use types::{ColumnSet, DataType, Field, ROW_ID_COLUMN, TableSchema, TableStats};

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::core::config::AppConfig;
use crate::data::error::StoreError;
use balancer::{LoadBalancer, OpKind};
use cache::{CacheStats, MetadataCache};
use endpoints::{EndpointPool, PoolStats};
use engine::{EngineConnector, EngineSession};
use metrics::PerformanceMonitor;
use planner::{QueryConfig, QueryPlanner};

/// Columnar store service
pub struct ColumnarStore {
    sessions: session::SessionManager,
    pool: Arc<EndpointPool>,
    balancer: LoadBalancer,
    cache: Arc<MetadataCache>,
    planner: QueryPlanner,
    monitor: Arc<PerformanceMonitor>,
    batch_config: crate::core::config::BatchConfig,
}

impl ColumnarStore {
    /// Connect to the engine through `connector`, bootstrap the schema and
    /// discover existing tables into the metadata cache.
    pub async fn init(
        connector: Arc<dyn EngineConnector>,
        config: &AppConfig,
    ) -> Result<Self, StoreError> {
        let pool = Arc::new(EndpointPool::new(
            &config.columnar.endpoints,
            Duration::from_secs(config.balancer.health_check_interval_secs),
        ));
        let cache = Arc::new(MetadataCache::new(Duration::from_secs(
            config.cache.ttl_secs,
        )));
        let store = Self {
            sessions: session::SessionManager::new(connector, config.columnar.clone()),
            balancer: LoadBalancer::new(Arc::clone(&pool), config.balancer),
            pool,
            planner: QueryPlanner::new(Arc::clone(&cache)),
            cache,
            monitor: Arc::new(PerformanceMonitor::new(
                config.metrics.history_cap,
                config.metrics.slow_query_threshold_secs,
            )),
            batch_config: config.batch,
        };

        store.sessions.connect().await?;
        store.discover_tables().await?;
        tracing::debug!(
            endpoints = store.sessions.endpoints().len(),
            tables = store.cache.list_tables().len(),
            "ColumnarStore initialized"
        );
        Ok(store)
    }

    /// Cache every existing table's schema and row count.
    async fn discover_tables(&self) -> Result<(), StoreError> {
        let (_endpoint, session) = self.acquire(OpKind::Read).await?;
        let tables = session.list_tables().await?;
        for table in &tables {
            let schema = session.table_schema(table).await?;
            let stats = session.table_stats(table).await?;
            self.cache.update(table, schema, stats.total_rows);
            tracing::trace!(table = %table, rows = stats.total_rows, "Discovered table");
        }
        tracing::debug!(count = tables.len(), "Discovered and cached tables");
        Ok(())
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    /// Table names known to the metadata cache.
    pub fn tables(&self) -> Vec<String> {
        let mut tables = self.cache.list_tables();
        tables.sort();
        tables
    }

    /// Table schema, from cache or fetched (and cached) from the engine.
    pub async fn table_columns(&self, table: &str) -> Result<TableSchema, StoreError> {
        if let Some(schema) = self.cache.get_columns(table) {
            return Ok(schema);
        }
        self.refresh_table_metadata(table).await?;
        self.cache
            .get_columns(table)
            .ok_or_else(|| StoreError::not_found("table", table))
    }

    /// Table stats, from cache or fetched (and cached) from the engine.
    pub async fn table_stats(&self, table: &str) -> Result<TableStats, StoreError> {
        if let Some(stats) = self.cache.get_stats(table) {
            return Ok(stats);
        }
        self.refresh_table_metadata(table).await?;
        self.cache
            .get_stats(table)
            .ok_or_else(|| StoreError::not_found("table", table))
    }

    /// Re-read one table's metadata; invalidates the entry on failure.
    pub async fn refresh_table_metadata(&self, table: &str) -> Result<(), StoreError> {
        let result = self
            .execute(OpKind::Read, |session| {
                let table = table.to_string();
                async move {
                    let schema = session.table_schema(&table).await?;
                    let stats = session.table_stats(&table).await?;
                    Ok((schema, stats))
                }
            })
            .await;

        match result {
            Ok((schema, stats)) => {
                self.cache.update(table, schema, stats.total_rows);
                Ok(())
            }
            Err(e) => {
                self.cache.invalidate(table);
                Err(e)
            }
        }
    }

    // =========================================================================
    // Table operations
    // =========================================================================

    /// Create a table, or evolve an existing one.
    ///
    /// Existing table with a satisfied schema: no-op. Existing table missing
    /// columns: the new columns are added (type mismatches on existing
    /// columns are logged, never destructive). Missing table: created with
    /// the given projections. Any column whose name contains `time` /
    /// `timestamp` sorts in its projection.
    pub async fn create_table(
        &self,
        table: &str,
        schema: &TableSchema,
        projections: Option<&[(String, Vec<String>)]>,
    ) -> Result<(), StoreError> {
        let (endpoint, session) = self.acquire(OpKind::Write).await?;
        let start = Instant::now();
        let result = self
            .create_table_inner(&session, table, schema, projections)
            .await;
        self.balancer
            .report(&endpoint, start.elapsed().as_secs_f64(), result.is_ok());
        result
    }

    async fn create_table_inner(
        &self,
        session: &Arc<dyn EngineSession>,
        table: &str,
        schema: &TableSchema,
        projections: Option<&[(String, Vec<String>)]>,
    ) -> Result<(), StoreError> {
        let existing_tables = session.list_tables().await?;

        if existing_tables.iter().any(|t| t == table) {
            let current = session.table_schema(table).await?;
            if schema.satisfied_by(&current) {
                tracing::debug!(table = %table, "Table exists with matching schema");
            } else {
                self.evolve_table(session, table, &current, schema).await;
            }
        } else {
            session.create_table(table, schema).await?;
            if let Some(projections) = projections {
                for (name, columns) in projections {
                    let (sorted, unsorted) = split_projection_columns(columns);
                    if let Err(e) = session
                        .create_projection(table, name, &sorted, &unsorted)
                        .await
                    {
                        tracing::warn!(
                            table = %table,
                            projection = %name,
                            error = %e,
                            "Failed to add projection"
                        );
                    }
                }
            }
            tracing::debug!(
                table = %table,
                projections = projections.map(<[_]>::len).unwrap_or(0),
                "Created table"
            );
        }

        let stored = session.table_schema(table).await?;
        let stats = session.table_stats(table).await?;
        self.cache.update(table, stored, stats.total_rows);
        Ok(())
    }

    /// Add the new schema's missing columns; type changes on existing
    /// columns are a logged no-op.
    async fn evolve_table(
        &self,
        session: &Arc<dyn EngineSession>,
        table: &str,
        current: &TableSchema,
        desired: &TableSchema,
    ) {
        for field in desired.fields.iter() {
            match current.field(&field.name) {
                None => match session.add_column(table, field).await {
                    Ok(()) => {
                        tracing::debug!(
                            table = %table,
                            column = %field.name,
                            data_type = %field.data_type,
                            "Added column"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(
                            table = %table,
                            column = %field.name,
                            error = %e,
                            "Failed to add column"
                        );
                    }
                },
                Some(existing) if existing.data_type.as_str() != field.data_type.as_str() => {
                    tracing::warn!(
                        table = %table,
                        column = %field.name,
                        current = %existing.data_type,
                        requested = %field.data_type,
                        "Column type change ignored"
                    );
                }
                Some(_) => {}
            }
        }
    }

    pub async fn drop_table(&self, table: &str) -> Result<(), StoreError> {
        self.execute(OpKind::Write, |session| {
            let table = table.to_string();
            async move { session.drop_table(&table).await }
        })
        .await?;
        self.cache.invalidate(table);
        Ok(())
    }

    pub async fn add_projection(
        &self,
        table: &str,
        name: &str,
        columns: &[String],
    ) -> Result<(), StoreError> {
        let (sorted, unsorted) = split_projection_columns(columns);
        self.execute(OpKind::Write, |session| {
            let (table, name) = (table.to_string(), name.to_string());
            async move {
                session
                    .create_projection(&table, &name, &sorted, &unsorted)
                    .await
            }
        })
        .await
    }

    pub async fn drop_projection(&self, table: &str, name: &str) -> Result<(), StoreError> {
        self.execute(OpKind::Write, |session| {
            let (table, name) = (table.to_string(), name.to_string());
            async move { session.drop_projection(&table, &name).await }
        })
        .await
    }

    pub async fn list_projections(&self, table: &str) -> Result<Vec<String>, StoreError> {
        self.execute(OpKind::Read, |session| {
            let table = table.to_string();
            async move { session.list_projections(&table).await }
        })
        .await
    }

    // =========================================================================
    // Data operations
    // =========================================================================

    /// Insert one row.
    pub async fn insert_single(
        &self,
        table: &str,
        row: &serde_json::Map<String, Value>,
    ) -> Result<(), StoreError> {
        let batch = ColumnSet::from_rows(std::slice::from_ref(row));
        self.insert_batch_metered(table, batch, "insert_single")
            .await?;
        Ok(())
    }

    /// Insert a list of rows.
    pub async fn insert_rows(
        &self,
        table: &str,
        rows: &[serde_json::Map<String, Value>],
    ) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let batch = ColumnSet::from_rows(rows);
        self.insert_batch_metered(table, batch, "insert_list").await
    }

    /// Canonical column-oriented insert; updates the cached row count.
    pub async fn insert_columns(&self, table: &str, data: ColumnSet) -> Result<usize, StoreError> {
        self.insert_batch_metered(table, data, "insert").await
    }

    async fn insert_batch_metered(
        &self,
        table: &str,
        data: ColumnSet,
        query_type: &str,
    ) -> Result<usize, StoreError> {
        let schema = self.table_columns(table).await?;
        for name in data.names() {
            if !schema.contains(name) {
                let message = format!("unknown column '{}' for table '{}'", name, table);
                self.record_failure(query_type, table, 0.0, &message);
                return Err(StoreError::Validation(message));
            }
        }

        let batch = data.canonicalized();
        let row_count = batch.num_rows();
        let start = Instant::now();
        let result = self
            .execute(OpKind::Write, |session| {
                let table = table.to_string();
                let batch = batch.clone();
                async move { session.insert(&table, &batch).await }
            })
            .await;
        let elapsed = start.elapsed().as_secs_f64();

        match result {
            Ok(inserted) => {
                self.cache.apply_row_delta(table, inserted as i64);
                self.monitor
                    .record(query_type, table, elapsed, inserted, 1, 1, true, None);
                tracing::debug!(table = %table, rows = inserted, "Inserted rows");
                Ok(inserted)
            }
            Err(e) => {
                self.record_failure(query_type, table, elapsed, &e.to_string());
                tracing::error!(table = %table, rows = row_count, error = %e, "Insert failed");
                Err(e)
            }
        }
    }

    /// Predicate select returning a column-major result.
    ///
    /// `include_row_ids` materializes the engine's `$row_id` column alongside
    /// the user columns.
    pub async fn select(
        &self,
        table: &str,
        predicate: Option<&Predicate>,
        columns: Option<&[String]>,
        limit: Option<usize>,
        include_row_ids: bool,
    ) -> Result<ColumnSet, StoreError> {
        let filter = predicate.map(Predicate::compile).filter(|f| !f.is_empty());
        let config = self.planner.optimize(
            QueryConfig {
                limit,
                ..QueryConfig::default()
            },
            table,
        );

        let start = Instant::now();
        let result = self
            .execute(OpKind::Read, |session| {
                let table = table.to_string();
                let columns: Option<Vec<String>> = columns.map(<[String]>::to_vec);
                let filter = filter.clone();
                let config = config.clone();
                async move {
                    session
                        .select(
                            &table,
                            columns.as_deref(),
                            filter.as_deref(),
                            include_row_ids,
                            &config,
                        )
                        .await
                }
            })
            .await;
        let elapsed = start.elapsed().as_secs_f64();

        match result {
            Ok(mut set) => {
                if let Some(limit) = limit {
                    set.truncate(limit);
                }
                self.monitor.record(
                    "select",
                    table,
                    elapsed,
                    set.num_rows(),
                    config.num_splits.unwrap_or(1),
                    config.num_sub_splits,
                    true,
                    None,
                );
                Ok(set)
            }
            Err(e) => {
                self.record_failure("select", table, elapsed, &e.to_string());
                Err(e)
            }
        }
    }

    /// Row-major convenience over [`Self::select`].
    pub async fn select_rows(
        &self,
        table: &str,
        predicate: Option<&Predicate>,
        columns: Option<&[String]>,
        limit: Option<usize>,
    ) -> Result<Vec<serde_json::Map<String, Value>>, StoreError> {
        let set = self.select(table, predicate, columns, limit, false).await?;
        Ok(set.to_rows())
    }

    /// Update matched rows in place.
    ///
    /// Column names are validated against the schema first; a missing or
    /// empty predicate affects nothing and returns 0.
    pub async fn update(
        &self,
        table: &str,
        values: &serde_json::Map<String, Value>,
        predicate: Option<&Predicate>,
    ) -> Result<usize, StoreError> {
        let Some(predicate) = predicate.filter(|p| !p.is_empty()) else {
            tracing::warn!(table = %table, "Update requires a predicate");
            return Ok(0);
        };
        if values.is_empty() {
            return Ok(0);
        }

        let schema = self.table_columns(table).await?;
        let unknown: Vec<&String> = values
            .keys()
            .filter(|name| !schema.contains(name))
            .collect();
        if !unknown.is_empty() {
            tracing::error!(
                table = %table,
                columns = ?unknown,
                available = ?schema.field_names(),
                "Invalid columns for update"
            );
            return Ok(0);
        }

        let row_ids = self.materialize_row_ids(table, predicate, &schema).await?;
        if row_ids.is_empty() {
            tracing::debug!(table = %table, "No rows matched update predicate");
            return Ok(0);
        }
        let matched = row_ids.len();

        // Update batch: [$row_id] + updated columns, new value repeated
        // across all matched rows.
        let mut batch = ColumnSet::new();
        batch.push_column(ROW_ID_COLUMN, row_ids);
        for (column, value) in values {
            batch.push_column(column.clone(), vec![value.clone(); matched]);
        }
        let batch = batch.canonicalized();

        let start = Instant::now();
        let result = self
            .execute(OpKind::Write, |session| {
                let table = table.to_string();
                let batch = batch.clone();
                async move { session.update(&table, &batch).await }
            })
            .await;
        let elapsed = start.elapsed().as_secs_f64();

        match result {
            Ok(updated) => {
                self.monitor
                    .record("update", table, elapsed, updated, 1, 1, true, None);
                tracing::debug!(table = %table, rows = updated, "Updated rows");
                Ok(updated)
            }
            Err(e) => {
                self.record_failure("update", table, elapsed, &e.to_string());
                Err(e)
            }
        }
    }

    /// Delete matched rows; updates the cached row count.
    pub async fn delete(
        &self,
        table: &str,
        predicate: Option<&Predicate>,
    ) -> Result<usize, StoreError> {
        let Some(predicate) = predicate.filter(|p| !p.is_empty()) else {
            tracing::warn!(table = %table, "Delete requires a predicate");
            return Ok(0);
        };

        let schema = self.table_columns(table).await?;
        let row_ids = self.materialize_row_ids(table, predicate, &schema).await?;
        if row_ids.is_empty() {
            tracing::debug!(table = %table, "No rows matched delete predicate");
            return Ok(0);
        }
        let ids: Vec<u64> = row_ids.iter().filter_map(Value::as_u64).collect();

        let start = Instant::now();
        let result = self
            .execute(OpKind::Write, |session| {
                let table = table.to_string();
                let ids = ids.clone();
                async move { session.delete(&table, &ids).await }
            })
            .await;
        let elapsed = start.elapsed().as_secs_f64();

        match result {
            Ok(deleted) => {
                self.cache.apply_row_delta(table, -(deleted as i64));
                self.monitor
                    .record("delete", table, elapsed, deleted, 1, 1, true, None);
                tracing::debug!(table = %table, rows = deleted, "Deleted rows");
                Ok(deleted)
            }
            Err(e) => {
                self.record_failure("delete", table, elapsed, &e.to_string());
                Err(e)
            }
        }
    }

    /// Materialize `$row_id` for the matched rows, fetching only the
    /// cheapest column alongside the ids.
    async fn materialize_row_ids(
        &self,
        table: &str,
        predicate: &Predicate,
        schema: &TableSchema,
    ) -> Result<Vec<Value>, StoreError> {
        let cheap_column = smallest_column(schema);
        let columns = cheap_column.map(|c| vec![c.to_string()]);
        let mut matched = self
            .select(table, Some(predicate), columns.as_deref(), None, true)
            .await?;
        Ok(matched.take_column(ROW_ID_COLUMN).unwrap_or_default())
    }

    // =========================================================================
    // Analytics pushdown
    // =========================================================================

    /// Engine-side aggregation on the sticky analytics endpoint.
    pub async fn aggregate(
        &self,
        table: &str,
        exprs: &[String],
        filter: Option<&str>,
        group_by: Option<&str>,
        order_by: Option<&str>,
        limit: Option<usize>,
    ) -> Result<ColumnSet, StoreError> {
        let config = self
            .planner
            .optimize_aggregation(QueryConfig::default(), table);

        let start = Instant::now();
        let result = self
            .execute(OpKind::Analytics, |session| {
                let table = table.to_string();
                let exprs = exprs.to_vec();
                let filter = filter.map(str::to_string);
                let group_by = group_by.map(str::to_string);
                let order_by = order_by.map(str::to_string);
                async move {
                    session
                        .aggregate(
                            &table,
                            &exprs,
                            filter.as_deref(),
                            group_by.as_deref(),
                            order_by.as_deref(),
                            limit,
                        )
                        .await
                }
            })
            .await;
        let elapsed = start.elapsed().as_secs_f64();

        match result {
            Ok(set) => {
                self.monitor.record(
                    "aggregate",
                    table,
                    elapsed,
                    set.num_rows(),
                    config.num_splits.unwrap_or(1),
                    config.num_sub_splits,
                    true,
                    None,
                );
                Ok(set)
            }
            Err(e) => {
                self.record_failure("aggregate", table, elapsed, &e.to_string());
                Err(e)
            }
        }
    }

    // =========================================================================
    // Observability
    // =========================================================================

    pub fn performance(&self) -> &PerformanceMonitor {
        &self.monitor
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn endpoint_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub(crate) fn batch_config(&self) -> &crate::core::config::BatchConfig {
        &self.batch_config
    }

    pub(crate) fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    /// Close every engine session. Idempotent.
    pub async fn close(&self) {
        self.sessions.disconnect().await;
        tracing::debug!("ColumnarStore closed");
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn acquire(&self, op: OpKind) -> Result<(String, Arc<dyn EngineSession>), StoreError> {
        let endpoint = self
            .balancer
            .select(op)
            .ok_or(StoreError::NoHealthyEndpoint { op: op.as_str() })?;
        let session = self.sessions.session_for(&endpoint).await?;
        Ok((endpoint, session))
    }

    /// Run an operation against a balancer-selected endpoint, reporting the
    /// outcome back to the health pool.
    async fn execute<T, F, Fut>(&self, op: OpKind, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(Arc<dyn EngineSession>) -> Fut,
        Fut: std::future::Future<Output = Result<T, StoreError>>,
    {
        let endpoint = self
            .balancer
            .select(op)
            .ok_or(StoreError::NoHealthyEndpoint { op: op.as_str() })?;
        let session = self.sessions.session_for(&endpoint).await?;

        let start = Instant::now();
        let result = f(session).await;
        self.balancer
            .report(&endpoint, start.elapsed().as_secs_f64(), result.is_ok());
        result
    }

    fn record_failure(&self, query_type: &str, table: &str, elapsed: f64, error: &str) {
        self.monitor.record(
            query_type,
            table,
            elapsed,
            0,
            1,
            1,
            false,
            Some(error.to_string()),
        );
    }
}

/// Projection column split: names containing `time`/`timestamp` sort.
fn split_projection_columns(columns: &[String]) -> (Vec<String>, Vec<String>) {
    let mut sorted = Vec::new();
    let mut unsorted = Vec::new();
    for column in columns {
        let lower = column.to_ascii_lowercase();
        if lower.contains("time") || lower.contains("timestamp") {
            sorted.push(column.clone());
        } else {
            unsorted.push(column.clone());
        }
    }
    (sorted, unsorted)
}

/// Column with the smallest fixed byte width, for cheap row-id
/// materialization. Falls back to the first column.
fn smallest_column(schema: &TableSchema) -> Option<&str> {
    let width = |data_type: DataType| -> Option<u8> {
        match data_type {
            DataType::Boolean => Some(1),
            DataType::Int64 | DataType::Float64 | DataType::Timestamp => Some(8),
            DataType::String => None,
        }
    };
    schema
        .fields
        .iter()
        .filter_map(|f| width(f.data_type).map(|w| (w, f.name.as_str())))
        .min_by_key(|(w, _)| *w)
        .map(|(_, name)| name)
        .or_else(|| schema.fields.first().map(|f| f.name.as_str()))
}
