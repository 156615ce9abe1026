//! Query planning from cached table statistics
//!
//! Tunes split/subsplit fan-out and per-subsplit row limits from the cached
//! row count. The planner never inspects predicates; predicate pushdown is
//! the engine's job.

use std::sync::Arc;

use super::cache::MetadataCache;
use crate::core::constants::{DEFAULT_ROWS_PER_SPLIT, DEFAULT_ROWS_PER_SUB_SPLIT, MAX_AUTO_SPLITS};

const LARGE_TABLE_ROWS: u64 = 10_000_000;
const MEDIUM_TABLE_ROWS: u64 = 1_000_000;
const SMALL_TABLE_ROWS: u64 = 100_000;
const SMALL_TABLE_SUB_SPLIT_LIMIT: u64 = 10_000;

/// Engine scan configuration
#[derive(Debug, Clone, PartialEq)]
pub struct QueryConfig {
    /// Scan splits; `None` lets the planner derive it from cached stats
    pub num_splits: Option<u32>,
    pub num_sub_splits: u32,
    pub rows_per_split: u64,
    pub limit_rows_per_sub_split: u64,
    /// Advertise semi-sorted projections to the engine
    pub use_semi_sorted_projections: bool,
    /// Optional row limit applied to the result
    pub limit: Option<usize>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            num_splits: None,
            num_sub_splits: 4,
            rows_per_split: DEFAULT_ROWS_PER_SPLIT,
            limit_rows_per_sub_split: DEFAULT_ROWS_PER_SUB_SPLIT,
            use_semi_sorted_projections: true,
            limit: None,
        }
    }
}

/// Derives scan configuration from cached table statistics
pub struct QueryPlanner {
    cache: Arc<MetadataCache>,
}

impl QueryPlanner {
    pub fn new(cache: Arc<MetadataCache>) -> Self {
        Self { cache }
    }

    /// General-purpose tuning for a predicate select.
    pub fn optimize(&self, mut config: QueryConfig, table: &str) -> QueryConfig {
        let total_rows = self.total_rows(table);

        if config.num_splits.is_none() {
            config.num_splits = Some(auto_splits(total_rows, config.rows_per_split));
        }

        config.num_sub_splits = if total_rows > LARGE_TABLE_ROWS {
            8
        } else if total_rows > MEDIUM_TABLE_ROWS {
            4
        } else {
            2
        };

        if total_rows < SMALL_TABLE_ROWS {
            config.limit_rows_per_sub_split = SMALL_TABLE_SUB_SPLIT_LIMIT;
        }

        tracing::debug!(
            table = %table,
            total_rows,
            splits = ?config.num_splits,
            sub_splits = config.num_sub_splits,
            "Planned query config"
        );
        config
    }

    /// Time-range scans push subsplit parallelism higher; short windows
    /// reduce split fan-out.
    pub fn optimize_time_series(
        &self,
        mut config: QueryConfig,
        table: &str,
        window_seconds: f64,
    ) -> QueryConfig {
        let total_rows = self.total_rows(table);

        config.num_sub_splits = if total_rows > MEDIUM_TABLE_ROWS { 8 } else { 4 };
        config.num_splits = Some(if window_seconds < 3_600.0 {
            auto_splits(total_rows, MEDIUM_TABLE_ROWS)
        } else {
            auto_splits(total_rows, config.rows_per_split)
        });

        tracing::debug!(
            table = %table,
            window_seconds,
            splits = ?config.num_splits,
            sub_splits = config.num_sub_splits,
            "Planned time-series query config"
        );
        config
    }

    /// Aggregations run fewer splits with more subsplits and a reduced
    /// memory high-water mark.
    pub fn optimize_aggregation(&self, mut config: QueryConfig, table: &str) -> QueryConfig {
        let total_rows = self.total_rows(table);

        let (splits, sub_splits) = if total_rows > LARGE_TABLE_ROWS {
            (4, 8)
        } else if total_rows > MEDIUM_TABLE_ROWS {
            (2, 6)
        } else {
            (1, 4)
        };
        config.num_splits = Some(splits);
        config.num_sub_splits = sub_splits;
        config.limit_rows_per_sub_split = config.limit_rows_per_sub_split.min(64 * 1024);

        tracing::debug!(
            table = %table,
            total_rows,
            splits,
            sub_splits,
            "Planned aggregation query config"
        );
        config
    }

    fn total_rows(&self, table: &str) -> u64 {
        self.cache
            .get_stats(table)
            .map(|s| s.total_rows)
            .unwrap_or(0)
    }
}

fn auto_splits(total_rows: u64, rows_per_split: u64) -> u32 {
    let per_split = rows_per_split.max(1);
    ((total_rows / per_split).max(1)).min(MAX_AUTO_SPLITS as u64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::columnar::types::TableSchema;
    use std::time::Duration;

    fn planner_with_rows(total_rows: u64) -> QueryPlanner {
        let cache = Arc::new(MetadataCache::new(Duration::from_secs(1_800)));
        cache.update("t", TableSchema::default(), total_rows);
        QueryPlanner::new(cache)
    }

    #[test]
    fn small_table_lands_on_one_split() {
        let planner = planner_with_rows(500);
        let config = planner.optimize(QueryConfig::default(), "t");
        assert_eq!(config.num_splits, Some(1));
        assert_eq!(config.num_sub_splits, 2);
        assert_eq!(config.limit_rows_per_sub_split, 10_000);
    }

    #[test]
    fn large_table_gets_max_fanout() {
        let planner = planner_with_rows(100_000_000);
        let config = planner.optimize(QueryConfig::default(), "t");
        assert_eq!(config.num_splits, Some(8));
        assert_eq!(config.num_sub_splits, 8);
        assert_eq!(config.limit_rows_per_sub_split, DEFAULT_ROWS_PER_SUB_SPLIT);
    }

    #[test]
    fn medium_table_defaults() {
        let planner = planner_with_rows(5_000_000);
        let config = planner.optimize(QueryConfig::default(), "t");
        assert_eq!(config.num_splits, Some(1));
        assert_eq!(config.num_sub_splits, 4);
    }

    #[test]
    fn explicit_splits_are_respected() {
        let planner = planner_with_rows(100_000_000);
        let config = planner.optimize(
            QueryConfig {
                num_splits: Some(2),
                ..QueryConfig::default()
            },
            "t",
        );
        assert_eq!(config.num_splits, Some(2));
    }

    #[test]
    fn uncached_table_plans_conservatively() {
        let cache = Arc::new(MetadataCache::new(Duration::from_secs(1_800)));
        let planner = QueryPlanner::new(cache);
        let config = planner.optimize(QueryConfig::default(), "missing");
        assert_eq!(config.num_splits, Some(1));
        assert_eq!(config.num_sub_splits, 2);
    }

    #[test]
    fn short_time_windows_reduce_split_fanout() {
        let planner = planner_with_rows(4_000_000);
        let short = planner.optimize_time_series(QueryConfig::default(), "t", 60.0);
        let long = planner.optimize_time_series(QueryConfig::default(), "t", 86_400.0);

        assert_eq!(short.num_splits, Some(4));
        assert_eq!(long.num_splits, Some(1));
        assert_eq!(short.num_sub_splits, 8);
    }

    #[test]
    fn aggregations_trade_splits_for_sub_splits() {
        let planner = planner_with_rows(20_000_000);
        let config = planner.optimize_aggregation(QueryConfig::default(), "t");
        assert_eq!(config.num_splits, Some(4));
        assert_eq!(config.num_sub_splits, 8);
        assert_eq!(config.limit_rows_per_sub_split, 64 * 1024);
    }

    #[test]
    fn projections_are_advertised_by_default() {
        assert!(QueryConfig::default().use_semi_sorted_projections);
    }
}
