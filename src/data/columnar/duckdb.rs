//! Embedded columnar engine backed by DuckDB
//!
//! Implements the engine seam for single-node deployments and the test
//! suite. All endpoints of a connector share one database (they are access
//! paths to the same store); the connection is guarded by a mutex and every
//! operation runs on the blocking pool under a timeout.
//!
//! `$row_id` maps to DuckDB's `rowid` pseudo-column. Projections are kept in
//! an internal catalog table and realized as indexes over their sorted
//! columns.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use duckdb::Connection;
use duckdb::types::{TimeUnit, Value as DuckValue};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use super::engine::{EngineConnector, EngineSession};
use super::planner::QueryConfig;
use super::types::{ColumnSet, DataType, Field, ROW_ID_COLUMN, TableSchema, TableStats};
use crate::data::error::StoreError;

/// Internal catalog table for projection metadata
const PROJECTION_CATALOG: &str = "__projections";

type SharedConn = Mutex<Option<Connection>>;

/// Connector for the embedded engine.
///
/// All endpoints share one database: `db_path` when set, otherwise a single
/// in-memory database living for the connector's lifetime.
pub struct DuckdbConnector {
    db_path: Option<PathBuf>,
    shared: Mutex<Option<Arc<SharedConn>>>,
}

impl DuckdbConnector {
    /// On-disk database at `path`.
    pub fn new(path: PathBuf) -> Self {
        Self {
            db_path: Some(path),
            shared: Mutex::new(None),
        }
    }

    /// In-memory database (non-durable; test and scratch use).
    pub fn in_memory() -> Self {
        Self {
            db_path: None,
            shared: Mutex::new(None),
        }
    }

    fn open_connection(&self) -> Result<Connection, duckdb::Error> {
        let conn = match &self.db_path {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        conn.execute_batch(
            "SET autoinstall_known_extensions = false;
             SET autoload_known_extensions = false;",
        )?;
        Ok(conn)
    }
}

#[async_trait]
impl EngineConnector for DuckdbConnector {
    async fn connect(
        &self,
        endpoint: &str,
        _access_key: &str,
        _secret_key: &str,
        timeout: Duration,
    ) -> Result<Arc<dyn EngineSession>, StoreError> {
        let mut shared = self.shared.lock();
        let conn = match shared.as_ref() {
            Some(conn) => Arc::clone(conn),
            None => {
                let opened = self
                    .open_connection()
                    .map_err(|e| StoreError::engine("connect", endpoint, e))?;
                let conn = Arc::new(Mutex::new(Some(opened)));
                *shared = Some(Arc::clone(&conn));
                tracing::debug!(
                    endpoint = %endpoint,
                    path = ?self.db_path,
                    "Opened embedded engine database"
                );
                conn
            }
        };

        Ok(Arc::new(DuckdbEngine {
            conn,
            schema: RwLock::new("main".to_string()),
            timeout,
        }))
    }
}

/// One embedded-engine session
pub struct DuckdbEngine {
    conn: Arc<SharedConn>,
    /// Namespace set by `ensure_schema`
    schema: RwLock<String>,
    timeout: Duration,
}

impl DuckdbEngine {
    /// Run a blocking closure against the connection with a timeout.
    async fn run<T, F>(&self, op: &'static str, table: &str, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, duckdb::Error> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let table = table.to_string();
        let timeout_secs = self.timeout.as_secs();

        let task = tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            let Some(conn) = guard.as_ref() else {
                return Err(StoreError::engine(op, &table, "session closed"));
            };
            f(conn).map_err(|e| StoreError::engine(op, &table, e))
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(joined) => joined.map_err(|e| {
                StoreError::Io(std::io::Error::other(format!("engine task failed: {}", e)))
            })?,
            Err(_) => {
                tracing::warn!(op, "Embedded engine operation timed out");
                Err(StoreError::timeout(op, timeout_secs))
            }
        }
    }

    fn qualified(&self, table: &str) -> String {
        format!("{}.{}", quote_ident(&self.schema.read()), quote_ident(table))
    }

    fn schema_name(&self) -> String {
        self.schema.read().clone()
    }
}

#[async_trait]
impl EngineSession for DuckdbEngine {
    async fn ensure_schema(&self, bucket: &str, schema: &str) -> Result<(), StoreError> {
        *self.schema.write() = schema.to_string();
        let create_schema = format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema));
        let create_catalog = format!(
            "CREATE TABLE IF NOT EXISTS {}.{} (
                table_name VARCHAR NOT NULL,
                projection_name VARCHAR NOT NULL,
                sorted_columns VARCHAR NOT NULL,
                unsorted_columns VARCHAR NOT NULL,
                created TIMESTAMP DEFAULT now()
            )",
            quote_ident(schema),
            quote_ident(PROJECTION_CATALOG)
        );
        let bucket = bucket.to_string();
        let schema_owned = schema.to_string();
        self.run("ensure_schema", schema, move |conn| {
            conn.execute_batch(&create_schema)?;
            conn.execute_batch(&create_catalog)?;
            tracing::debug!(bucket = %bucket, schema = %schema_owned, "Schema ready");
            Ok(())
        })
        .await
    }

    async fn list_tables(&self) -> Result<Vec<String>, StoreError> {
        let schema = self.schema_name();
        self.run("list_tables", &schema.clone(), move |conn| {
            let mut stmt = conn.prepare(
                "SELECT table_name FROM information_schema.tables
                 WHERE table_schema = ? AND table_name != ? ORDER BY table_name",
            )?;
            let rows = stmt.query_map([schema.as_str(), PROJECTION_CATALOG], |row| {
                row.get::<_, String>(0)
            })?;
            rows.collect()
        })
        .await
    }

    async fn table_schema(&self, table: &str) -> Result<TableSchema, StoreError> {
        let schema = self.schema_name();
        let table_owned = table.to_string();
        self.run("table_schema", table, move |conn| {
            let mut stmt = conn.prepare(
                "SELECT column_name, data_type FROM information_schema.columns
                 WHERE table_schema = ? AND table_name = ? ORDER BY ordinal_position",
            )?;
            let rows = stmt.query_map([schema.as_str(), table_owned.as_str()], |row| {
                let name: String = row.get(0)?;
                let sql_type: String = row.get(1)?;
                Ok(Field::new(name, data_type_from_sql(&sql_type)))
            })?;
            let fields: Result<Vec<Field>, _> = rows.collect();
            Ok(TableSchema::new(fields?))
        })
        .await
    }

    async fn table_stats(&self, table: &str) -> Result<TableStats, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.qualified(table));
        self.run("table_stats", table, move |conn| {
            let total_rows: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
            Ok(TableStats {
                total_rows: total_rows.max(0) as u64,
            })
        })
        .await
    }

    async fn create_table(&self, table: &str, schema: &TableSchema) -> Result<(), StoreError> {
        let columns: Vec<String> = schema
            .fields
            .iter()
            .map(|f| format!("{} {}", quote_ident(&f.name), sql_type(f.data_type)))
            .collect();
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.qualified(table),
            columns.join(", ")
        );
        self.run("create_table", table, move |conn| {
            conn.execute_batch(&sql)?;
            Ok(())
        })
        .await
    }

    async fn drop_table(&self, table: &str) -> Result<(), StoreError> {
        let drop_table = format!("DROP TABLE IF EXISTS {}", self.qualified(table));
        let clear_catalog = format!(
            "DELETE FROM {}.{} WHERE table_name = ?",
            quote_ident(&self.schema_name()),
            quote_ident(PROJECTION_CATALOG)
        );
        let table_owned = table.to_string();
        self.run("drop_table", table, move |conn| {
            conn.execute_batch(&drop_table)?;
            conn.execute(&clear_catalog, [table_owned.as_str()])?;
            Ok(())
        })
        .await
    }

    async fn add_column(&self, table: &str, field: &Field) -> Result<(), StoreError> {
        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            self.qualified(table),
            quote_ident(&field.name),
            sql_type(field.data_type)
        );
        self.run("add_column", table, move |conn| {
            conn.execute_batch(&sql)?;
            Ok(())
        })
        .await
    }

    async fn create_projection(
        &self,
        table: &str,
        name: &str,
        sorted_columns: &[String],
        unsorted_columns: &[String],
    ) -> Result<(), StoreError> {
        // Indexes realize the sorted component; the catalog row records the
        // full projection definition.
        let index_columns: Vec<&String> = if sorted_columns.is_empty() {
            unsorted_columns.iter().collect()
        } else {
            sorted_columns.iter().collect()
        };
        let index_sql = if index_columns.is_empty() {
            None
        } else {
            let cols: Vec<String> = index_columns
                .iter()
                .map(|c| quote_ident(c))
                .collect();
            Some(format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                quote_ident(&projection_index_name(table, name)),
                self.qualified(table),
                cols.join(", ")
            ))
        };
        let insert_sql = format!(
            "INSERT INTO {}.{} (table_name, projection_name, sorted_columns, unsorted_columns)
             VALUES (?, ?, ?, ?)",
            quote_ident(&self.schema_name()),
            quote_ident(PROJECTION_CATALOG)
        );

        let table_owned = table.to_string();
        let name_owned = name.to_string();
        let sorted_json = serde_json::to_string(sorted_columns).unwrap_or_default();
        let unsorted_json = serde_json::to_string(unsorted_columns).unwrap_or_default();
        self.run("create_projection", table, move |conn| {
            if let Some(sql) = index_sql {
                conn.execute_batch(&sql)?;
            }
            conn.execute(
                &insert_sql,
                [
                    table_owned.as_str(),
                    name_owned.as_str(),
                    sorted_json.as_str(),
                    unsorted_json.as_str(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn drop_projection(&self, table: &str, name: &str) -> Result<(), StoreError> {
        let drop_index = format!(
            "DROP INDEX IF EXISTS {}.{}",
            quote_ident(&self.schema_name()),
            quote_ident(&projection_index_name(table, name))
        );
        let delete_sql = format!(
            "DELETE FROM {}.{} WHERE table_name = ? AND projection_name = ?",
            quote_ident(&self.schema_name()),
            quote_ident(PROJECTION_CATALOG)
        );
        let table_owned = table.to_string();
        let name_owned = name.to_string();
        self.run("drop_projection", table, move |conn| {
            conn.execute_batch(&drop_index)?;
            conn.execute(&delete_sql, [table_owned.as_str(), name_owned.as_str()])?;
            Ok(())
        })
        .await
    }

    async fn list_projections(&self, table: &str) -> Result<Vec<String>, StoreError> {
        let sql = format!(
            "SELECT projection_name FROM {}.{} WHERE table_name = ? ORDER BY projection_name",
            quote_ident(&self.schema_name()),
            quote_ident(PROJECTION_CATALOG)
        );
        let table_owned = table.to_string();
        self.run("list_projections", table, move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([table_owned.as_str()], |row| row.get::<_, String>(0))?;
            rows.collect()
        })
        .await
    }

    async fn insert(&self, table: &str, batch: &ColumnSet) -> Result<usize, StoreError> {
        if batch.is_empty() {
            return Ok(0);
        }
        let names: Vec<String> = batch.names().to_vec();
        let quoted: Vec<String> = names.iter().map(|n| quote_ident(n)).collect();
        let placeholders: Vec<&str> = names.iter().map(|_| "?").collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.qualified(table),
            quoted.join(", "),
            placeholders.join(", ")
        );
        let rows = batch.to_rows();

        self.run("insert", table, move |conn| {
            in_transaction(conn, |conn| {
                let mut stmt = conn.prepare(&sql)?;
                for row in &rows {
                    let params: Vec<DuckValue> = names
                        .iter()
                        .map(|name| to_duck_value(row.get(name).unwrap_or(&Value::Null)))
                        .collect();
                    stmt.execute(duckdb::params_from_iter(params))?;
                }
                Ok(rows.len())
            })
        })
        .await
    }

    async fn select(
        &self,
        table: &str,
        columns: Option<&[String]>,
        filter: Option<&str>,
        with_row_ids: bool,
        config: &QueryConfig,
    ) -> Result<ColumnSet, StoreError> {
        // Resolve the output column list upfront so results keep an explicit
        // schema regardless of engine-side column ordering.
        let user_columns: Vec<String> = match columns {
            Some(cols) => cols.to_vec(),
            None => self
                .table_schema(table)
                .await?
                .fields
                .into_iter()
                .map(|f| f.name)
                .collect(),
        };

        let mut select_parts: Vec<String> = Vec::with_capacity(user_columns.len() + 1);
        let mut output_names: Vec<String> = Vec::with_capacity(user_columns.len() + 1);
        if with_row_ids {
            select_parts.push(format!("rowid AS {}", quote_ident(ROW_ID_COLUMN)));
            output_names.push(ROW_ID_COLUMN.to_string());
        }
        for column in &user_columns {
            select_parts.push(quote_ident(column));
            output_names.push(column.clone());
        }

        let mut sql = format!(
            "SELECT {} FROM {}",
            select_parts.join(", "),
            self.qualified(table)
        );
        if let Some(filter) = filter
            && !filter.is_empty()
        {
            sql.push_str(" WHERE ");
            sql.push_str(filter);
        }
        if let Some(limit) = config.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        self.run("select", table, move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let column_count = output_names.len();
            let mut columns: Vec<Vec<Value>> = vec![Vec::new(); column_count];

            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                for (idx, column) in columns.iter_mut().enumerate() {
                    let cell: DuckValue = row.get(idx)?;
                    column.push(from_duck_value(cell));
                }
            }

            Ok(ColumnSet::from_columns(
                output_names.into_iter().zip(columns).collect(),
            ))
        })
        .await
    }

    async fn update(&self, table: &str, batch: &ColumnSet) -> Result<usize, StoreError> {
        let mut batch = batch.clone();
        let Some(row_ids) = batch.take_column(ROW_ID_COLUMN) else {
            return Err(StoreError::Validation(format!(
                "update batch for '{}' is missing the {} column",
                table, ROW_ID_COLUMN
            )));
        };
        if row_ids.is_empty() {
            return Ok(0);
        }

        let names: Vec<String> = batch.names().to_vec();
        let assignments: Vec<String> = names
            .iter()
            .map(|n| format!("{} = ?", quote_ident(n)))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE rowid = ?",
            self.qualified(table),
            assignments.join(", ")
        );
        let rows = batch.to_rows();

        self.run("update", table, move |conn| {
            in_transaction(conn, |conn| {
                let mut stmt = conn.prepare(&sql)?;
                for (row, row_id) in rows.iter().zip(row_ids.iter()) {
                    let mut params: Vec<DuckValue> = names
                        .iter()
                        .map(|name| to_duck_value(row.get(name).unwrap_or(&Value::Null)))
                        .collect();
                    params.push(to_duck_value(row_id));
                    stmt.execute(duckdb::params_from_iter(params))?;
                }
                Ok(row_ids.len())
            })
        })
        .await
    }

    async fn delete(&self, table: &str, row_ids: &[u64]) -> Result<usize, StoreError> {
        if row_ids.is_empty() {
            return Ok(0);
        }
        let id_list: Vec<String> = row_ids.iter().map(u64::to_string).collect();
        let sql = format!(
            "DELETE FROM {} WHERE rowid IN ({})",
            self.qualified(table),
            id_list.join(", ")
        );
        self.run("delete", table, move |conn| {
            conn.execute(&sql, [])
        })
        .await
    }

    async fn aggregate(
        &self,
        table: &str,
        exprs: &[String],
        filter: Option<&str>,
        group_by: Option<&str>,
        order_by: Option<&str>,
        limit: Option<usize>,
    ) -> Result<ColumnSet, StoreError> {
        let output_names: Vec<String> = exprs.iter().map(|e| expr_alias(e)).collect();

        let mut sql = format!("SELECT {} FROM {}", exprs.join(", "), self.qualified(table));
        if let Some(filter) = filter
            && !filter.is_empty()
        {
            sql.push_str(" WHERE ");
            sql.push_str(filter);
        }
        if let Some(group_by) = group_by {
            sql.push_str(" GROUP BY ");
            sql.push_str(group_by);
        }
        if let Some(order_by) = order_by {
            sql.push_str(" ORDER BY ");
            sql.push_str(order_by);
        }
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        self.run("aggregate", table, move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let column_count = output_names.len();
            let mut columns: Vec<Vec<Value>> = vec![Vec::new(); column_count];

            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                for (idx, column) in columns.iter_mut().enumerate() {
                    let cell: DuckValue = row.get(idx)?;
                    column.push(from_duck_value(cell));
                }
            }

            Ok(ColumnSet::from_columns(
                output_names.into_iter().zip(columns).collect(),
            ))
        })
        .await
    }

    async fn close(&self) -> Result<(), StoreError> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            if let Some(conn) = guard.take() {
                if let Err((_, e)) = conn.close() {
                    tracing::warn!(error = %e, "Embedded engine close failed");
                } else {
                    tracing::debug!("Embedded engine connection closed");
                }
            }
        })
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))?;
        Ok(())
    }
}

/// Execute a closure within a transaction, rolling back on error.
fn in_transaction<T, F>(conn: &Connection, f: F) -> Result<T, duckdb::Error>
where
    F: FnOnce(&Connection) -> Result<T, duckdb::Error>,
{
    conn.execute_batch("BEGIN TRANSACTION")?;
    match f(conn) {
        Ok(val) => {
            conn.execute_batch("COMMIT")?;
            Ok(val)
        }
        Err(e) => {
            if let Err(rollback_err) = conn.execute_batch("ROLLBACK") {
                tracing::warn!(error = %rollback_err, "ROLLBACK failed after transaction error");
            }
            Err(e)
        }
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn projection_index_name(table: &str, projection: &str) -> String {
    format!("idx_{}_{}", table, projection)
}

fn sql_type(data_type: DataType) -> &'static str {
    match data_type {
        DataType::String => "VARCHAR",
        DataType::Int64 => "BIGINT",
        DataType::Float64 => "DOUBLE",
        DataType::Boolean => "BOOLEAN",
        DataType::Timestamp => "TIMESTAMP",
    }
}

fn data_type_from_sql(sql: &str) -> DataType {
    match sql.to_ascii_uppercase().as_str() {
        "BIGINT" | "INTEGER" | "SMALLINT" | "TINYINT" | "HUGEINT" | "UBIGINT" | "UINTEGER" => {
            DataType::Int64
        }
        "DOUBLE" | "FLOAT" | "REAL" | "DECIMAL" => DataType::Float64,
        "BOOLEAN" => DataType::Boolean,
        s if s.starts_with("TIMESTAMP") => DataType::Timestamp,
        _ => DataType::String,
    }
}

/// Alias of a select expression: the text after its final ` AS `, or the
/// whole expression when un-aliased.
fn expr_alias(expr: &str) -> String {
    let lower = expr.to_ascii_lowercase();
    match lower.rfind(" as ") {
        Some(idx) => expr[idx + 4..].trim().trim_matches('"').to_string(),
        None => expr.trim().to_string(),
    }
}

pub(crate) fn to_duck_value(value: &Value) -> DuckValue {
    match value {
        Value::Null => DuckValue::Null,
        Value::Bool(b) => DuckValue::Boolean(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                DuckValue::BigInt(i)
            } else if let Some(u) = n.as_u64() {
                DuckValue::UBigInt(u)
            } else {
                DuckValue::Double(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => DuckValue::Text(s.clone()),
        // Nested values are canonicalized to JSON text before insert; this
        // is the safety net.
        other => DuckValue::Text(serde_json::to_string(other).unwrap_or_default()),
    }
}

pub(crate) fn from_duck_value(value: DuckValue) -> Value {
    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(b) => Value::Bool(b),
        DuckValue::TinyInt(v) => Value::from(v as i64),
        DuckValue::SmallInt(v) => Value::from(v as i64),
        DuckValue::Int(v) => Value::from(v as i64),
        DuckValue::BigInt(v) => Value::from(v),
        DuckValue::HugeInt(v) => Value::from(v as i64),
        DuckValue::UTinyInt(v) => Value::from(v as u64),
        DuckValue::USmallInt(v) => Value::from(v as u64),
        DuckValue::UInt(v) => Value::from(v as u64),
        DuckValue::UBigInt(v) => Value::from(v),
        DuckValue::Float(v) => Value::from(v as f64),
        DuckValue::Double(v) => Value::from(v),
        DuckValue::Text(s) => Value::String(s),
        DuckValue::Timestamp(unit, raw) => Value::String(format_timestamp(unit, raw)),
        other => Value::String(format!("{:?}", other)),
    }
}

fn format_timestamp(unit: TimeUnit, raw: i64) -> String {
    let micros = match unit {
        TimeUnit::Second => raw.saturating_mul(1_000_000),
        TimeUnit::Millisecond => raw.saturating_mul(1_000),
        TimeUnit::Microsecond => raw,
        TimeUnit::Nanosecond => raw / 1_000,
    };
    chrono::DateTime::from_timestamp_micros(micros)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn session() -> Arc<dyn EngineSession> {
        let connector = DuckdbConnector::in_memory();
        let session = connector
            .connect("local", "", "", Duration::from_secs(30))
            .await
            .expect("connect");
        session
            .ensure_schema("test-bucket", "tams")
            .await
            .expect("ensure schema");
        session
    }

    fn sample_schema() -> TableSchema {
        TableSchema::new(vec![
            Field::new("id", DataType::String),
            Field::new("size", DataType::Int64),
            Field::new("live", DataType::Boolean),
        ])
    }

    fn sample_batch() -> ColumnSet {
        ColumnSet::from_columns(vec![
            (
                "id".to_string(),
                vec![json!("a"), json!("b"), json!("c")],
            ),
            ("size".to_string(), vec![json!(1), json!(2), json!(3)]),
            (
                "live".to_string(),
                vec![json!(true), json!(false), json!(true)],
            ),
        ])
    }

    #[tokio::test]
    async fn create_insert_select_round_trip() {
        let session = session().await;
        session.create_table("items", &sample_schema()).await.unwrap();

        let inserted = session.insert("items", &sample_batch()).await.unwrap();
        assert_eq!(inserted, 3);

        let result = session
            .select("items", None, None, false, &QueryConfig::default())
            .await
            .unwrap();
        assert_eq!(result.num_rows(), 3);
        assert_eq!(result.cell("id", 0), Some(&json!("a")));
        assert_eq!(result.cell("size", 2), Some(&json!(3)));
        assert_eq!(result.cell("live", 1), Some(&json!(false)));
    }

    #[tokio::test]
    async fn select_with_filter_and_row_ids() {
        let session = session().await;
        session.create_table("items", &sample_schema()).await.unwrap();
        session.insert("items", &sample_batch()).await.unwrap();

        let result = session
            .select(
                "items",
                Some(&["id".to_string()]),
                Some("size >= 2"),
                true,
                &QueryConfig::default(),
            )
            .await
            .unwrap();

        assert_eq!(result.num_rows(), 2);
        assert_eq!(result.names()[0], ROW_ID_COLUMN);
        assert!(result.column(ROW_ID_COLUMN).unwrap().iter().all(Value::is_number));
    }

    #[tokio::test]
    async fn select_respects_limit() {
        let session = session().await;
        session.create_table("items", &sample_schema()).await.unwrap();
        session.insert("items", &sample_batch()).await.unwrap();

        let config = QueryConfig {
            limit: Some(2),
            ..QueryConfig::default()
        };
        let result = session
            .select("items", None, None, false, &config)
            .await
            .unwrap();
        assert_eq!(result.num_rows(), 2);
    }

    #[tokio::test]
    async fn update_by_row_ids() {
        let session = session().await;
        session.create_table("items", &sample_schema()).await.unwrap();
        session.insert("items", &sample_batch()).await.unwrap();

        let matched = session
            .select("items", Some(&["id".to_string()]), Some("size < 3"), true, &QueryConfig::default())
            .await
            .unwrap();
        let row_ids = matched.column(ROW_ID_COLUMN).unwrap().clone();
        let count = row_ids.len();

        let update = ColumnSet::from_columns(vec![
            (ROW_ID_COLUMN.to_string(), row_ids),
            ("size".to_string(), vec![json!(99); count]),
        ]);
        let updated = session.update("items", &update).await.unwrap();
        assert_eq!(updated, 2);

        let check = session
            .select("items", None, Some("size = 99"), false, &QueryConfig::default())
            .await
            .unwrap();
        assert_eq!(check.num_rows(), 2);
    }

    #[tokio::test]
    async fn update_without_row_ids_is_a_validation_error() {
        let session = session().await;
        session.create_table("items", &sample_schema()).await.unwrap();

        let update = ColumnSet::from_columns(vec![("size".to_string(), vec![json!(1)])]);
        let result = session.update("items", &update).await;
        assert!(matches!(result, Err(StoreError::Validation(_))));
    }

    #[tokio::test]
    async fn delete_by_row_ids() {
        let session = session().await;
        session.create_table("items", &sample_schema()).await.unwrap();
        session.insert("items", &sample_batch()).await.unwrap();

        let matched = session
            .select("items", Some(&["id".to_string()]), Some("live = TRUE"), true, &QueryConfig::default())
            .await
            .unwrap();
        let row_ids: Vec<u64> = matched
            .column(ROW_ID_COLUMN)
            .unwrap()
            .iter()
            .filter_map(Value::as_u64)
            .collect();

        let deleted = session.delete("items", &row_ids).await.unwrap();
        assert_eq!(deleted, 2);

        let stats = session.table_stats("items").await.unwrap();
        assert_eq!(stats.total_rows, 1);
    }

    #[tokio::test]
    async fn delete_with_no_ids_is_noop() {
        let session = session().await;
        session.create_table("items", &sample_schema()).await.unwrap();
        assert_eq!(session.delete("items", &[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn schema_discovery_round_trips_types() {
        let session = session().await;
        session.create_table("items", &sample_schema()).await.unwrap();

        let schema = session.table_schema("items").await.unwrap();
        assert_eq!(schema.fields.len(), 3);
        assert_eq!(schema.field("id").unwrap().data_type, DataType::String);
        assert_eq!(schema.field("size").unwrap().data_type, DataType::Int64);
        assert_eq!(schema.field("live").unwrap().data_type, DataType::Boolean);
    }

    #[tokio::test]
    async fn add_column_evolves_schema() {
        let session = session().await;
        session.create_table("items", &sample_schema()).await.unwrap();
        session
            .add_column("items", &Field::new("label", DataType::String))
            .await
            .unwrap();

        let schema = session.table_schema("items").await.unwrap();
        assert!(schema.contains("label"));
    }

    #[tokio::test]
    async fn projection_catalog_round_trip() {
        let session = session().await;
        session.create_table("items", &sample_schema()).await.unwrap();

        session
            .create_projection("items", "by_size", &["size".to_string()], &["id".to_string()])
            .await
            .unwrap();
        assert_eq!(
            session.list_projections("items").await.unwrap(),
            vec!["by_size".to_string()]
        );

        session.drop_projection("items", "by_size").await.unwrap();
        assert!(session.list_projections("items").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_tables_excludes_catalog() {
        let session = session().await;
        session.create_table("items", &sample_schema()).await.unwrap();
        session.create_table("others", &sample_schema()).await.unwrap();

        let tables = session.list_tables().await.unwrap();
        assert_eq!(tables, vec!["items".to_string(), "others".to_string()]);
    }

    #[tokio::test]
    async fn aggregate_with_group_by() {
        let session = session().await;
        session.create_table("items", &sample_schema()).await.unwrap();
        session.insert("items", &sample_batch()).await.unwrap();

        let result = session
            .aggregate(
                "items",
                &[
                    "live".to_string(),
                    "COUNT(*) as count".to_string(),
                    "AVG(size) as avg_size".to_string(),
                ],
                None,
                Some("live"),
                Some("count DESC"),
                None,
            )
            .await
            .unwrap();

        assert_eq!(result.num_rows(), 2);
        assert_eq!(result.names(), &["live", "count", "avg_size"]);
        assert_eq!(result.cell("count", 0), Some(&json!(2)));
    }

    #[tokio::test]
    async fn sessions_share_one_database() {
        let connector = DuckdbConnector::in_memory();
        let a = connector
            .connect("http://a", "", "", Duration::from_secs(30))
            .await
            .unwrap();
        let b = connector
            .connect("http://b", "", "", Duration::from_secs(30))
            .await
            .unwrap();
        a.ensure_schema("bucket", "tams").await.unwrap();
        b.ensure_schema("bucket", "tams").await.unwrap();

        a.create_table("items", &sample_schema()).await.unwrap();
        a.insert("items", &sample_batch()).await.unwrap();

        let stats = b.table_stats("items").await.unwrap();
        assert_eq!(stats.total_rows, 3);
    }

    #[tokio::test]
    async fn on_disk_database_persists_between_connectors() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("engine.duckdb");

        {
            let connector = DuckdbConnector::new(path.clone());
            let session = connector
                .connect("local", "", "", Duration::from_secs(30))
                .await
                .unwrap();
            session.ensure_schema("bucket", "tams").await.unwrap();
            session.create_table("items", &sample_schema()).await.unwrap();
            session.insert("items", &sample_batch()).await.unwrap();
            session.close().await.unwrap();
        }

        let connector = DuckdbConnector::new(path);
        let session = connector
            .connect("local", "", "", Duration::from_secs(30))
            .await
            .unwrap();
        session.ensure_schema("bucket", "tams").await.unwrap();
        assert_eq!(session.table_stats("items").await.unwrap().total_rows, 3);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let session = session().await;
        session.close().await.unwrap();
        session.close().await.unwrap();

        let result = session.list_tables().await;
        assert!(result.is_err());
    }

    #[test]
    fn expr_alias_extraction() {
        assert_eq!(expr_alias("AVG(size) as avg_size"), "avg_size");
        assert_eq!(expr_alias("COUNT(*) AS \"count\""), "count");
        assert_eq!(expr_alias("live"), "live");
    }
}
