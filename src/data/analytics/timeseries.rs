//! Pushdown time-series and aggregation analytics
//!
//! Every operation here compiles to a single engine aggregate query; the
//! engine handles predicate pushdown and scan fan-out. Operations accept an
//! optional pre-compiled filter string to scope the dataset.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::data::columnar::{ColumnSet, ColumnarStore};
use crate::data::error::StoreError;

/// Time window grain for truncated-timestamp grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowGrain {
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

impl WindowGrain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        }
    }

    /// Lenient parse of window descriptions such as `"1 hour"` or
    /// `"30 minutes"`; unknown units default to hourly.
    pub fn parse(window: &str) -> Self {
        let lower = window.to_ascii_lowercase();
        if lower.contains("minute") {
            Self::Minute
        } else if lower.contains("day") {
            Self::Day
        } else if lower.contains("week") {
            Self::Week
        } else if lower.contains("month") {
            Self::Month
        } else {
            Self::Hour
        }
    }
}

/// One aggregated time window
#[derive(Debug, Clone, Serialize)]
pub struct WindowPoint {
    pub window_start: Value,
    pub avg: f64,
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub stddev: f64,
}

/// Trend direction over the averaged series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
    InsufficientData,
}

/// Trend reduction of a windowed series
#[derive(Debug, Clone, Serialize)]
pub struct TrendResult {
    pub trend: TrendDirection,
    pub slope: f64,
    pub periods: usize,
    pub first_value: f64,
    pub last_value: f64,
    pub change_percent: f64,
}

/// A row flagged as anomalous
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyPoint {
    pub timestamp: Value,
    pub value: f64,
    pub z_score: f64,
}

/// One histogram bucket
#[derive(Debug, Clone, Serialize)]
pub struct HistogramBin {
    pub bin: usize,
    pub range: String,
    pub count: u64,
    pub percentage: f64,
}

/// Pushdown analytics over the columnar store
pub struct TimeSeriesAnalytics {
    store: Arc<ColumnarStore>,
}

impl TimeSeriesAnalytics {
    pub fn new(store: Arc<ColumnarStore>) -> Self {
        Self { store }
    }

    /// Moving average over truncated time windows.
    pub async fn moving_average(
        &self,
        table: &str,
        value_column: &str,
        time_column: &str,
        window: WindowGrain,
        filter: Option<&str>,
    ) -> Result<Vec<WindowPoint>, StoreError> {
        let exprs = vec![
            format!(
                "DATE_TRUNC('{}', CAST({} AS TIMESTAMP)) as window_start",
                window.as_str(),
                time_column
            ),
            format!("AVG({}) as moving_avg", value_column),
            "COUNT(*) as sample_count".to_string(),
            format!("MIN({}) as min_value", value_column),
            format!("MAX({}) as max_value", value_column),
            format!("STDDEV({}) as std_dev", value_column),
        ];
        let result = self
            .store
            .aggregate(
                table,
                &exprs,
                filter,
                Some("window_start"),
                Some("window_start"),
                None,
            )
            .await?;

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
        tracing::debug!(
            table = %table,
            value_column = %value_column,
            window = window.as_str(),
            "Calculated moving average"
        );
        Ok(points)
    }

    /// Reduce the windowed average series into a trend report.
    pub async fn trend(
        &self,
        table: &str,
        value_column: &str,
        time_column: &str,
        period: WindowGrain,
        filter: Option<&str>,
    ) -> Result<TrendResult, StoreError> {
        let series = self
            .moving_average(table, value_column, time_column, period, filter)
            .await?;

        if series.len() < 2 {
            return Ok(TrendResult {
                trend: TrendDirection::InsufficientData,
                slope: 0.0,
                periods: series.len(),
                first_value: series.first().map(|p| p.avg).unwrap_or(0.0),
                last_value: series.last().map(|p| p.avg).unwrap_or(0.0),
                change_percent: 0.0,
            });
        }

        let first = series.first().map(|p| p.avg).unwrap_or(0.0);
        let last = series.last().map(|p| p.avg).unwrap_or(0.0);
        let (trend, slope) = if last == first {
            (TrendDirection::Stable, 0.0)
        } else if last > first {
            (TrendDirection::Increasing, (last - first) / series.len() as f64)
        } else {
            (TrendDirection::Decreasing, (last - first) / series.len() as f64)
        };

        tracing::debug!(
            table = %table,
            value_column = %value_column,
            trend = ?trend,
            slope,
            "Calculated trend"
        );
        Ok(TrendResult {
            trend,
            slope,
            periods: series.len(),
            first_value: first,
            last_value: last,
            change_percent: if first != 0.0 {
                (last - first) / first * 100.0
            } else {
                0.0
            },
        })
    }

    /// Statistical anomaly detection: rows where
    /// `|x - mean| > threshold * stddev`, returned with z-scores.
    pub async fn detect_anomalies(
        &self,
        table: &str,
        value_column: &str,
        time_column: &str,
        threshold: f64,
        filter: Option<&str>,
    ) -> Result<Vec<AnomalyPoint>, StoreError> {
        let stats_exprs = vec![
            format!("AVG({}) as mean_value", value_column),
            format!("STDDEV({}) as std_dev", value_column),
        ];
        let stats = self
            .store
            .aggregate(table, &stats_exprs, filter, None, None, None)
            .await?;
        if stats.is_empty() {
            return Ok(Vec::new());
        }
        let mean = cell_f64(&stats, "mean_value", 0);
        let std_dev = cell_f64(&stats, "std_dev", 0);
        if std_dev == 0.0 {
            tracing::warn!(table = %table, "Cannot detect anomalies: no variance in data");
            return Ok(Vec::new());
        }

        let low = mean - threshold * std_dev;
        let high = mean + threshold * std_dev;
        let anomaly_filter = format!(
            "({col} < {low} OR {col} > {high})",
            col = value_column,
            low = low,
            high = high
        );
        let combined = match filter {
            Some(f) if !f.is_empty() => format!("({}) AND {}", f, anomaly_filter),
            _ => anomaly_filter,
        };

        let exprs = vec![
            format!("{} as ts", time_column),
            format!("{} as value", value_column),
            format!(
                "({col} - {mean}) / {std} as z_score",
                col = value_column,
                mean = mean,
                std = std_dev
            ),
        ];
        let result = self
            .store
            .aggregate(table, &exprs, Some(&combined), None, Some("ts"), None)
            .await?;

        let anomalies: Vec<AnomalyPoint> = (0..result.num_rows())
            .map(|row| AnomalyPoint {
                timestamp: result.cell("ts", row).cloned().unwrap_or(Value::Null),
                value: cell_f64(&result, "value", row),
                z_score: cell_f64(&result, "z_score", row),
            })
            .collect();
        tracing::debug!(
            table = %table,
            value_column = %value_column,
            anomalies = anomalies.len(),
            "Detected anomalies"
        );
        Ok(anomalies)
    }

    /// Engine-native percentiles for a numeric column.
    pub async fn percentiles(
        &self,
        table: &str,
        value_column: &str,
        percentiles: &[f64],
        filter: Option<&str>,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        let exprs: Vec<String> = percentiles
            .iter()
            .map(|p| {
                format!(
                    "quantile_cont({}, {}) as p{}",
                    value_column,
                    p / 100.0,
                    p.trunc() as u64
                )
            })
            .collect();
        let result = self
            .store
            .aggregate(table, &exprs, filter, None, None, None)
            .await?;
        if result.is_empty() {
            return Ok(Vec::new());
        }

        Ok(percentiles
            .iter()
            .map(|p| {
                let key = format!("p{}", p.trunc() as u64);
                let value = cell_f64(&result, &key, 0);
                (key, value)
            })
            .collect())
    }

    /// Pearson correlation between two numeric columns, computed from
    /// engine-side aggregates.
    pub async fn correlation(
        &self,
        table: &str,
        column1: &str,
        column2: &str,
        filter: Option<&str>,
    ) -> Result<(f64, u64), StoreError> {
        let exprs = vec![
            format!("AVG({}) as avg_col1", column1),
            format!("AVG({}) as avg_col2", column2),
            format!("AVG({} * {}) as avg_product", column1, column2),
            format!("STDDEV({}) as std_col1", column1),
            format!("STDDEV({}) as std_col2", column2),
            "COUNT(*) as sample_count".to_string(),
        ];
        let result = self
            .store
            .aggregate(table, &exprs, filter, None, None, None)
            .await?;
        if result.is_empty() {
            return Ok((0.0, 0));
        }

        let std1 = cell_f64(&result, "std_col1", 0);
        let std2 = cell_f64(&result, "std_col2", 0);
        let count = cell_f64(&result, "sample_count", 0) as u64;
        let correlation = if std1 > 0.0 && std2 > 0.0 && count > 1 {
            let covariance = cell_f64(&result, "avg_product", 0)
                - cell_f64(&result, "avg_col1", 0) * cell_f64(&result, "avg_col2", 0);
            covariance / (std1 * std2)
        } else {
            0.0
        };
        Ok((correlation, count))
    }

    /// Histogram distribution with computed bin boundaries.
    pub async fn distribution(
        &self,
        table: &str,
        value_column: &str,
        num_bins: usize,
        filter: Option<&str>,
    ) -> Result<Vec<HistogramBin>, StoreError> {
        let num_bins = num_bins.max(1);
        let bounds_exprs = vec![
            format!("MIN({}) as min_val", value_column),
            format!("MAX({}) as max_val", value_column),
            "COUNT(*) as total_count".to_string(),
        ];
        let bounds = self
            .store
            .aggregate(table, &bounds_exprs, filter, None, None, None)
            .await?;
        if bounds.is_empty() {
            return Ok(Vec::new());
        }
        let total_count = cell_f64(&bounds, "total_count", 0) as u64;
        if total_count == 0 {
            return Ok(Vec::new());
        }
        let min_val = cell_f64(&bounds, "min_val", 0);
        let max_val = cell_f64(&bounds, "max_val", 0);

        if min_val == max_val {
            return Ok(vec![HistogramBin {
                bin: 0,
                range: format!("{}", min_val),
                count: total_count,
                percentage: 100.0,
            }]);
        }

        let bin_width = (max_val - min_val) / num_bins as f64;
        let mut cases: Vec<String> = Vec::with_capacity(num_bins);
        for bin in 0..num_bins {
            let bin_start = min_val + bin as f64 * bin_width;
            let bin_end = min_val + (bin + 1) as f64 * bin_width;
            if bin == num_bins - 1 {
                // Last bin includes the max value
                cases.push(format!("WHEN {} >= {} THEN {}", value_column, bin_start, bin));
            } else {
                cases.push(format!(
                    "WHEN {col} >= {start} AND {col} < {end} THEN {bin}",
                    col = value_column,
                    start = bin_start,
                    end = bin_end,
                    bin = bin
                ));
            }
        }
        let case_expr = format!("CASE {} ELSE {} END", cases.join(" "), num_bins);

        let exprs = vec![
            format!("{} as bin", case_expr),
            "COUNT(*) as count".to_string(),
        ];
        let result = self
            .store
            .aggregate(table, &exprs, filter, Some("bin"), Some("bin"), None)
            .await?;

        let mut distribution = Vec::new();
        for row in 0..result.num_rows() {
            let bin = cell_f64(&result, "bin", row) as usize;
            if bin >= num_bins {
                continue;
            }
            let count = cell_f64(&result, "count", row) as u64;
            let bin_start = min_val + bin as f64 * bin_width;
            let bin_end = min_val + (bin + 1) as f64 * bin_width;
            distribution.push(HistogramBin {
                bin,
                range: format!("{:.2} - {:.2}", bin_start, bin_end),
                count,
                percentage: count as f64 / total_count as f64 * 100.0,
            });
        }
        tracing::debug!(
            table = %table,
            value_column = %value_column,
            bins = distribution.len(),
            "Calculated distribution"
        );
        Ok(distribution)
    }

    /// Top-N groups by row count, with value aggregates per group.
    pub async fn top_values(
        &self,
        table: &str,
        value_column: &str,
        group_by_column: &str,
        top_n: usize,
        filter: Option<&str>,
    ) -> Result<ColumnSet, StoreError> {
        let exprs = vec![
            group_by_column.to_string(),
            "COUNT(*) as count".to_string(),
            format!("AVG({}) as avg_value", value_column),
            format!("MIN({}) as min_value", value_column),
            format!("MAX({}) as max_value", value_column),
        ];
        self.store
            .aggregate(
                table,
                &exprs,
                filter,
                Some(group_by_column),
                Some("count DESC"),
                Some(top_n),
            )
            .await
    }
}

fn cell_f64(set: &ColumnSet, column: &str, row: usize) -> f64 {
    set.cell(column, row).and_then(Value::as_f64).unwrap_or(0.0)
}
