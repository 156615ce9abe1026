//! Query performance monitoring
//!
//! Append-only ring buffer of query metrics with a size cap. Recording a
//! query past the slow-query threshold logs a warning as a side effect.
//! The buffer is process-local; readers take a consistent snapshot under the
//! lock.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// One recorded query execution
#[derive(Debug, Clone, Serialize)]
pub struct QueryMetric {
    pub query_type: String,
    pub table_name: String,
    /// Execution time in seconds
    pub execution_time: f64,
    pub rows_returned: usize,
    pub splits_used: u32,
    pub subsplits_used: u32,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub error_message: Option<String>,
}

/// Per-query-type rollup
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryTypeStats {
    pub count: usize,
    pub avg_time: f64,
    pub total_rows: usize,
}

/// Windowed performance summary
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSummary {
    pub time_window_secs: u64,
    pub total_queries: usize,
    pub successful_queries: usize,
    pub failed_queries: usize,
    pub success_rate: f64,
    pub avg_execution_time: f64,
    pub max_execution_time: f64,
    pub total_rows_processed: usize,
    pub query_types: Vec<(String, QueryTypeStats)>,
}

/// Windowed per-table rollup
#[derive(Debug, Clone, Serialize)]
pub struct TablePerformance {
    pub table_name: String,
    pub time_window_secs: u64,
    pub total_queries: usize,
    pub successful_queries: usize,
    pub success_rate: f64,
    pub avg_execution_time: f64,
    pub total_rows_processed: usize,
    pub avg_rows_per_query: f64,
}

/// Bounded ring of query metrics
pub struct PerformanceMonitor {
    metrics: Mutex<VecDeque<QueryMetric>>,
    history_cap: usize,
    slow_query_threshold: f64,
}

impl PerformanceMonitor {
    pub fn new(history_cap: usize, slow_query_threshold: f64) -> Self {
        Self {
            metrics: Mutex::new(VecDeque::with_capacity(history_cap.min(1_024))),
            history_cap,
            slow_query_threshold,
        }
    }

    /// Record one query execution, evicting the oldest entry at capacity.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        query_type: &str,
        table_name: &str,
        execution_time: f64,
        rows_returned: usize,
        splits_used: u32,
        subsplits_used: u32,
        success: bool,
        error_message: Option<String>,
    ) {
        if execution_time > self.slow_query_threshold {
            tracing::warn!(
                query_type = %query_type,
                table = %table_name,
                execution_time,
                "Slow query detected"
            );
        }

        let metric = QueryMetric {
            query_type: query_type.to_string(),
            table_name: table_name.to_string(),
            execution_time,
            rows_returned,
            splits_used,
            subsplits_used,
            timestamp: Utc::now(),
            success,
            error_message,
        };

        let mut metrics = self.metrics.lock();
        if metrics.len() >= self.history_cap {
            metrics.pop_front();
        }
        metrics.push_back(metric);
    }

    /// Summary over the trailing window.
    pub fn summary(&self, window: Duration) -> PerformanceSummary {
        let cutoff = Utc::now() - chrono::Duration::from_std(window).unwrap_or_default();
        let metrics = self.metrics.lock();
        let recent: Vec<&QueryMetric> =
            metrics.iter().filter(|m| m.timestamp >= cutoff).collect();

        let total = recent.len();
        let successful: Vec<&&QueryMetric> = recent.iter().filter(|m| m.success).collect();
        let times: Vec<f64> = successful.iter().map(|m| m.execution_time).collect();

        let mut by_type: Vec<(String, QueryTypeStats)> = Vec::new();
        for metric in &recent {
            let idx = match by_type.iter().position(|(t, _)| *t == metric.query_type) {
                Some(idx) => idx,
                None => {
                    by_type.push((metric.query_type.clone(), QueryTypeStats::default()));
                    by_type.len() - 1
                }
            };
            let stats = &mut by_type[idx].1;
            stats.count += 1;
            if metric.success {
                stats.total_rows += metric.rows_returned;
            }
        }
        for (query_type, stats) in &mut by_type {
            let type_times: Vec<f64> = recent
                .iter()
                .filter(|m| m.success && m.query_type == *query_type)
                .map(|m| m.execution_time)
                .collect();
            if !type_times.is_empty() {
                stats.avg_time = type_times.iter().sum::<f64>() / type_times.len() as f64;
            }
        }

        PerformanceSummary {
            time_window_secs: window.as_secs(),
            total_queries: total,
            successful_queries: successful.len(),
            failed_queries: total - successful.len(),
            success_rate: if total > 0 {
                successful.len() as f64 / total as f64 * 100.0
            } else {
                0.0
            },
            avg_execution_time: if times.is_empty() {
                0.0
            } else {
                times.iter().sum::<f64>() / times.len() as f64
            },
            max_execution_time: times.iter().copied().fold(0.0, f64::max),
            total_rows_processed: successful.iter().map(|m| m.rows_returned).sum(),
            query_types: by_type,
        }
    }

    /// Queries above `threshold` seconds, slowest first.
    pub fn slow_queries(&self, threshold: f64, limit: usize) -> Vec<QueryMetric> {
        let metrics = self.metrics.lock();
        let mut slow: Vec<QueryMetric> = metrics
            .iter()
            .filter(|m| m.execution_time > threshold)
            .cloned()
            .collect();
        slow.sort_by(|a, b| {
            b.execution_time
                .partial_cmp(&a.execution_time)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        slow.truncate(limit);
        slow
    }

    /// Windowed rollup for one table.
    pub fn table_performance(&self, table_name: &str, window: Duration) -> TablePerformance {
        let cutoff = Utc::now() - chrono::Duration::from_std(window).unwrap_or_default();
        let metrics = self.metrics.lock();
        let table_metrics: Vec<&QueryMetric> = metrics
            .iter()
            .filter(|m| m.table_name == table_name && m.timestamp >= cutoff)
            .collect();

        let total = table_metrics.len();
        let successful: Vec<&&QueryMetric> =
            table_metrics.iter().filter(|m| m.success).collect();
        let times: Vec<f64> = successful.iter().map(|m| m.execution_time).collect();
        let total_rows: usize = successful.iter().map(|m| m.rows_returned).sum();

        TablePerformance {
            table_name: table_name.to_string(),
            time_window_secs: window.as_secs(),
            total_queries: total,
            successful_queries: successful.len(),
            success_rate: if total > 0 {
                successful.len() as f64 / total as f64 * 100.0
            } else {
                0.0
            },
            avg_execution_time: if times.is_empty() {
                0.0
            } else {
                times.iter().sum::<f64>() / times.len() as f64
            },
            total_rows_processed: total_rows,
            avg_rows_per_query: if successful.is_empty() {
                0.0
            } else {
                total_rows as f64 / successful.len() as f64
            },
        }
    }

    /// Full snapshot for external ingestion.
    pub fn export(&self) -> Vec<QueryMetric> {
        self.metrics.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.metrics.lock().clear();
        tracing::debug!("Cleared performance metrics");
    }

    pub fn len(&self) -> usize {
        self.metrics.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.lock().is_empty()
    }
}
