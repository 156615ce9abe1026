//! Hybrid analytics: columnar extraction + embedded processing
//!
//! For analytics the primary store cannot express efficiently (advanced
//! windowing, continuous percentiles, Pearson correlation on filtered
//! subsets): extract only the needed columns through the data-ops select,
//! materialize them into a uniquely-named temporary table inside a private
//! embedded engine, run the analytic SQL there and drop the temporary table
//! on every exit path.
//!
//! The embedded handle is single-threaded; concurrent calls serialize on its
//! mutex. If the engine fails to initialize, hybrid analytics are disabled
//! and every call reports that - there is no silent fallback.

use std::sync::Arc;

use duckdb::Connection;
use duckdb::types::Value as DuckValue;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use super::timeseries::{WindowGrain, WindowPoint};
use crate::core::constants::EMBEDDED_QUERY_TIMEOUT_SECS;
use crate::data::columnar::duckdb::{from_duck_value, to_duck_value};
use crate::data::columnar::{ColumnSet, ColumnarStore, Predicate};
use crate::data::error::StoreError;

/// Percentile report from the embedded engine
#[derive(Debug, Clone, Serialize)]
pub struct PercentileReport {
    pub percentiles: Vec<(String, f64)>,
    pub total_count: u64,
    pub mean: f64,
    pub stddev: f64,
}

/// Correlation report from the embedded engine
#[derive(Debug, Clone, Serialize)]
pub struct CorrelationReport {
    pub correlation: f64,
    pub sample_count: u64,
    pub avg_col1: f64,
    pub avg_col2: f64,
    pub std_col1: f64,
    pub std_col2: f64,
}

/// Hybrid analytics service
pub struct HybridAnalytics {
    store: Arc<ColumnarStore>,
    conn: Arc<Mutex<Option<Connection>>>,
}

impl HybridAnalytics {
    /// Initialize with a private embedded engine; on failure the service is
    /// constructed disabled and every call reports it.
    pub fn new(store: Arc<ColumnarStore>) -> Self {
        let conn = match Connection::open_in_memory() {
            Ok(conn) => {
                tracing::debug!("Initialized embedded engine for hybrid analytics");
                Some(conn)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to initialize embedded engine; hybrid analytics disabled");
                None
            }
        };
        Self {
            store,
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    #[cfg(test)]
    fn disabled(store: Arc<ColumnarStore>) -> Self {
        Self {
            store,
            conn: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_available(&self) -> bool {
        self.conn.lock().is_some()
    }

    /// Moving average with full window statistics, computed in the embedded
    /// engine. `time_column` is bound explicitly into the window SQL.
    pub async fn moving_average(
        &self,
        table: &str,
        value_column: &str,
        time_column: &str,
        window: WindowGrain,
        predicate: Option<&Predicate>,
    ) -> Result<Vec<WindowPoint>, StoreError> {
        let columns = vec![time_column.to_string(), value_column.to_string()];
        let extracted = self
            .store
            .select(table, predicate, Some(&columns), None, false)
            .await?;
        if extracted.is_empty() {
            tracing::debug!(table = %table, "No data extracted for hybrid moving average");
            return Ok(Vec::new());
        }

        let temp = temp_table_name(table);
        let sql = format!(
            "SELECT
                DATE_TRUNC('{grain}', CAST({time} AS TIMESTAMP)) as window_start,
                AVG({value}) as moving_avg,
                COUNT(*) as sample_count,
                MIN({value}) as min_value,
                MAX({value}) as max_value,
                STDDEV({value}) as std_dev
             FROM {temp}
             GROUP BY window_start
             ORDER BY window_start",
            grain = window.as_str(),
            time = quote_ident(time_column),
            value = quote_ident(value_column),
            temp = quote_ident(&temp),
        );
        let output = vec![
            "window_start".to_string(),
            "moving_avg".to_string(),
            "sample_count".to_string(),
            "min_value".to_string(),
            "max_value".to_string(),
            "std_dev".to_string(),
        ];

        let result = self.run_in_temp_table(temp, extracted, sql, output).await?;
        let points = (0..result.num_rows())
            .map(|row| WindowPoint {
                window_start: result
                    .cell("window_start", row)
                    .cloned()
                    .unwrap_or(Value::Null),
                avg: cell_f64(&result, "moving_avg", row),
                count: cell_f64(&result, "sample_count", row) as u64,
                min: cell_f64(&result, "min_value", row),
                max: cell_f64(&result, "max_value", row),
                stddev: cell_f64(&result, "std_dev", row),
            })
            .collect();
        Ok(points)
    }

    /// Continuous percentiles over a filtered subset.
    pub async fn percentiles(
        &self,
        table: &str,
        value_column: &str,
        percentiles: &[f64],
        predicate: Option<&Predicate>,
    ) -> Result<PercentileReport, StoreError> {
        let columns = vec![value_column.to_string()];
        let extracted = self
            .store
            .select(table, predicate, Some(&columns), None, false)
            .await?;
        if extracted.is_empty() {
            return Ok(PercentileReport {
                percentiles: Vec::new(),
                total_count: 0,
                mean: 0.0,
                stddev: 0.0,
            });
        }

        let keys: Vec<String> = percentiles
            .iter()
            .map(|p| format!("p{}", p.trunc() as u64))
            .collect();
        let mut exprs: Vec<String> = percentiles
            .iter()
            .zip(&keys)
            .map(|(p, key)| {
                format!(
                    "quantile_cont({}, {}) as {}",
                    quote_ident(value_column),
                    p / 100.0,
                    key
                )
            })
            .collect();
        exprs.push("COUNT(*) as total_count".to_string());
        exprs.push(format!("AVG({}) as mean_value", quote_ident(value_column)));
        exprs.push(format!("STDDEV({}) as std_dev", quote_ident(value_column)));

        let temp = temp_table_name(table);
        let sql = format!("SELECT {} FROM {}", exprs.join(", "), quote_ident(&temp));
        let mut output = keys.clone();
        output.push("total_count".to_string());
        output.push("mean_value".to_string());
        output.push("std_dev".to_string());

        let result = self.run_in_temp_table(temp, extracted, sql, output).await?;
        if result.is_empty() {
            return Ok(PercentileReport {
                percentiles: Vec::new(),
                total_count: 0,
                mean: 0.0,
                stddev: 0.0,
            });
        }

        Ok(PercentileReport {
            percentiles: keys
                .iter()
                .map(|key| (key.clone(), cell_f64(&result, key, 0)))
                .collect(),
            total_count: cell_f64(&result, "total_count", 0) as u64,
            mean: cell_f64(&result, "mean_value", 0),
            stddev: cell_f64(&result, "std_dev", 0),
        })
    }

    /// Pearson correlation over a filtered subset, using the embedded
    /// engine's native aggregate.
    pub async fn correlation(
        &self,
        table: &str,
        column1: &str,
        column2: &str,
        predicate: Option<&Predicate>,
    ) -> Result<CorrelationReport, StoreError> {
        let columns = vec![column1.to_string(), column2.to_string()];
        let extracted = self
            .store
            .select(table, predicate, Some(&columns), None, false)
            .await?;
        if extracted.is_empty() {
            return Ok(CorrelationReport {
                correlation: 0.0,
                sample_count: 0,
                avg_col1: 0.0,
                avg_col2: 0.0,
                std_col1: 0.0,
                std_col2: 0.0,
            });
        }

        let temp = temp_table_name(table);
        let sql = format!(
            "SELECT
                CORR({c1}, {c2}) as correlation,
                COUNT(*) as sample_count,
                AVG({c1}) as avg_col1,
                AVG({c2}) as avg_col2,
                STDDEV({c1}) as std_col1,
                STDDEV({c2}) as std_col2
             FROM {temp}
             WHERE {c1} IS NOT NULL AND {c2} IS NOT NULL",
            c1 = quote_ident(column1),
            c2 = quote_ident(column2),
            temp = quote_ident(&temp),
        );
        let output = vec![
            "correlation".to_string(),
            "sample_count".to_string(),
            "avg_col1".to_string(),
            "avg_col2".to_string(),
            "std_col1".to_string(),
            "std_col2".to_string(),
        ];

        let result = self.run_in_temp_table(temp, extracted, sql, output).await?;
        Ok(CorrelationReport {
            correlation: cell_f64(&result, "correlation", 0),
            sample_count: cell_f64(&result, "sample_count", 0) as u64,
            avg_col1: cell_f64(&result, "avg_col1", 0),
            avg_col2: cell_f64(&result, "avg_col2", 0),
            std_col1: cell_f64(&result, "std_col1", 0),
            std_col2: cell_f64(&result, "std_col2", 0),
        })
    }

    /// Materialize `data` into `temp`, run `sql`, and drop the temporary
    /// table whether or not the analytic succeeded.
    async fn run_in_temp_table(
        &self,
        temp: String,
        data: ColumnSet,
        sql: String,
        output_names: Vec<String>,
    ) -> Result<ColumnSet, StoreError> {
        let conn = Arc::clone(&self.conn);
        let timeout = std::time::Duration::from_secs(EMBEDDED_QUERY_TIMEOUT_SECS);

        let task = tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            let Some(conn) = guard.as_ref() else {
                return Err(StoreError::EmbeddedUnavailable(
                    "embedded engine not initialized".to_string(),
                ));
            };

            let result = (|| -> Result<ColumnSet, duckdb::Error> {
                materialize(conn, &temp, &data)?;
                query_columns(conn, &sql, &output_names)
            })();

            // Temp tables are per-call; drop on every exit path.
            if let Err(e) = conn.execute_batch(&format!(
                "DROP TABLE IF EXISTS {}",
                quote_ident(&temp)
            )) {
                tracing::warn!(temp = %temp, error = %e, "Failed to drop temporary table");
            }
            result.map_err(StoreError::from)
        });

        match tokio::time::timeout(timeout, task).await {
            Ok(joined) => joined.map_err(|e| {
                StoreError::Io(std::io::Error::other(format!("hybrid task failed: {}", e)))
            })?,
            Err(_) => Err(StoreError::timeout(
                "hybrid_analytics",
                EMBEDDED_QUERY_TIMEOUT_SECS,
            )),
        }
    }
}

/// Create and fill the temporary table from a column-major set.
fn materialize(conn: &Connection, temp: &str, data: &ColumnSet) -> Result<(), duckdb::Error> {
    let names: Vec<String> = data.names().to_vec();
    let column_defs: Vec<String> = names
        .iter()
        .map(|name| {
            let sql_type = infer_sql_type(data.column(name).map(Vec::as_slice).unwrap_or(&[]));
            format!("{} {}", quote_ident(name), sql_type)
        })
        .collect();
    conn.execute_batch(&format!(
        "CREATE TABLE {} ({})",
        quote_ident(temp),
        column_defs.join(", ")
    ))?;

    let placeholders: Vec<&str> = names.iter().map(|_| "?").collect();
    let insert_sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(temp),
        names
            .iter()
            .map(|n| quote_ident(n))
            .collect::<Vec<_>>()
            .join(", "),
        placeholders.join(", ")
    );
    let mut stmt = conn.prepare(&insert_sql)?;
    for row in data.to_rows() {
        let params: Vec<DuckValue> = names
            .iter()
            .map(|name| to_duck_value(row.get(name).unwrap_or(&Value::Null)))
            .collect();
        stmt.execute(duckdb::params_from_iter(params))?;
    }
    Ok(())
}

fn query_columns(
    conn: &Connection,
    sql: &str,
    output_names: &[String],
) -> Result<ColumnSet, duckdb::Error> {
    let mut stmt = conn.prepare(sql)?;
    let mut columns: Vec<Vec<Value>> = vec![Vec::new(); output_names.len()];

    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        for (idx, column) in columns.iter_mut().enumerate() {
            let cell: DuckValue = row.get(idx)?;
            column.push(from_duck_value(cell));
        }
    }

    Ok(ColumnSet::from_columns(
        output_names.iter().cloned().zip(columns).collect(),
    ))
}

/// Column type for materialization, inferred from the values.
fn infer_sql_type(values: &[Value]) -> &'static str {
    let mut saw_int = false;
    for value in values {
        match value {
            Value::Bool(_) => return "BOOLEAN",
            Value::Number(n) => {
                if n.as_i64().is_none() && n.as_u64().is_none() {
                    return "DOUBLE";
                }
                saw_int = true;
            }
            Value::String(_) => return "VARCHAR",
            Value::Null => continue,
            _ => return "VARCHAR",
        }
    }
    if saw_int { "BIGINT" } else { "VARCHAR" }
}

fn temp_table_name(table: &str) -> String {
    format!("temp_{}_{}", table, Uuid::new_v4().simple())
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn cell_f64(set: &ColumnSet, column: &str, row: usize) -> f64 {
    set.cell(column, row).and_then(Value::as_f64).unwrap_or(0.0)
}
