//! Per-table metadata cache
//!
//! Caches each table's schema and row count with a TTL. The cache is
//! authoritative between refreshes: successful inserts and deletes apply row
//! deltas in place, DDL invalidates the entry, and expired entries are
//! dropped on read. Updates are serialized per table through the map's
//! per-entry locking.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

use super::types::{TableSchema, TableStats};

#[derive(Debug, Clone)]
struct TableEntry {
    schema: TableSchema,
    total_rows: u64,
    last_updated: Instant,
}

impl TableEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.last_updated.elapsed() > ttl
    }
}

/// Cache snapshot for observability
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub table_names: Vec<String>,
}

/// Process-local table metadata cache
pub struct MetadataCache {
    entries: DashMap<String, TableEntry>,
    ttl: Duration,
}

impl MetadataCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Cached schema for a table, or `None` on miss/expiry.
    pub fn get_columns(&self, table: &str) -> Option<TableSchema> {
        if self.expire_if_stale(table) {
            return None;
        }
        let entry = self.entries.get(table)?;
        tracing::trace!(table = %table, "Metadata cache hit (schema)");
        Some(entry.schema.clone())
    }

    /// Cached stats for a table, or `None` on miss/expiry.
    pub fn get_stats(&self, table: &str) -> Option<TableStats> {
        if self.expire_if_stale(table) {
            return None;
        }
        let entry = self.entries.get(table)?;
        Some(TableStats {
            total_rows: entry.total_rows,
        })
    }

    /// Install or replace a table entry, refreshing its TTL.
    pub fn update(&self, table: &str, schema: TableSchema, total_rows: u64) {
        self.entries.insert(
            table.to_string(),
            TableEntry {
                schema,
                total_rows,
                last_updated: Instant::now(),
            },
        );
        tracing::debug!(table = %table, total_rows, "Updated metadata cache");
    }

    /// Apply a row-count delta from a successful insert or delete. A
    /// negative delta saturates at zero. No-op for uncached tables.
    pub fn apply_row_delta(&self, table: &str, delta: i64) {
        if let Some(mut entry) = self.entries.get_mut(table) {
            entry.total_rows = if delta.is_negative() {
                entry.total_rows.saturating_sub(delta.unsigned_abs())
            } else {
                entry.total_rows + delta as u64
            };
            entry.last_updated = Instant::now();
            tracing::trace!(table = %table, delta, total = entry.total_rows, "Applied row delta");
        }
    }

    /// Drop a table entry (DDL, refresh failure).
    pub fn invalidate(&self, table: &str) {
        if self.entries.remove(table).is_some() {
            tracing::debug!(table = %table, "Invalidated metadata cache entry");
        }
    }

    pub fn list_tables(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn clear(&self) {
        self.entries.clear();
        tracing::debug!("Cleared metadata cache");
    }

    pub fn stats(&self) -> CacheStats {
        let mut table_names = self.list_tables();
        table_names.sort();
        CacheStats {
            total_entries: table_names.len(),
            table_names,
        }
    }

    /// Remove the entry when expired; returns whether it was removed.
    fn expire_if_stale(&self, table: &str) -> bool {
        let expired = self
            .entries
            .get(table)
            .is_some_and(|e| e.is_expired(self.ttl));
        if expired {
            self.entries.remove(table);
            tracing::debug!(table = %table, "Metadata cache entry expired");
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::columnar::types::{DataType, Field};

    fn schema() -> TableSchema {
        TableSchema::new(vec![
            Field::new("id", DataType::String),
            Field::new("size", DataType::Int64),
        ])
    }

    fn cache() -> MetadataCache {
        MetadataCache::new(Duration::from_secs(1_800))
    }

    #[test]
    fn miss_returns_none() {
        let cache = cache();
        assert!(cache.get_columns("segments").is_none());
        assert!(cache.get_stats("segments").is_none());
    }

    #[test]
    fn update_then_read() {
        let cache = cache();
        cache.update("segments", schema(), 42);

        assert_eq!(cache.get_columns("segments").unwrap().fields.len(), 2);
        assert_eq!(cache.get_stats("segments").unwrap().total_rows, 42);
    }

    #[test]
    fn row_delta_applies_in_place() {
        let cache = cache();
        cache.update("segments", schema(), 100);

        cache.apply_row_delta("segments", 50);
        assert_eq!(cache.get_stats("segments").unwrap().total_rows, 150);

        cache.apply_row_delta("segments", -200);
        assert_eq!(cache.get_stats("segments").unwrap().total_rows, 0);
    }

    #[test]
    fn delta_on_uncached_table_is_noop() {
        let cache = cache();
        cache.apply_row_delta("segments", 10);
        assert!(cache.get_stats("segments").is_none());
    }

    #[test]
    fn invalidate_removes_entry() {
        let cache = cache();
        cache.update("segments", schema(), 1);
        cache.invalidate("segments");
        assert!(cache.get_stats("segments").is_none());
    }

    #[test]
    fn expired_entries_drop_on_read() {
        let cache = MetadataCache::new(Duration::ZERO);
        cache.update("segments", schema(), 1);
        std::thread::sleep(Duration::from_millis(5));

        assert!(cache.get_columns("segments").is_none());
        assert!(cache.list_tables().is_empty());
    }

    #[test]
    fn stats_lists_tables() {
        let cache = cache();
        cache.update("sources", schema(), 1);
        cache.update("flows", schema(), 2);

        let stats = cache.stats();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(
            stats.table_names,
            vec!["flows".to_string(), "sources".to_string()]
        );
    }
}
