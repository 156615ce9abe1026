// =============================================================================
// Application Identity
// =============================================================================

/// Application name in lowercase (for paths and identifiers)
pub const APP_NAME_LOWER: &str = "tams-store";

// =============================================================================
// Configuration Files
// =============================================================================

/// Default mounted config file path (JSON overlay over built-in defaults)
pub const DEFAULT_CONFIG_FILE: &str = "/etc/tams/config.json";

/// Environment variable for config file path
pub const ENV_CONFIG: &str = "TAMS_CONFIG";

// =============================================================================
// Columnar Engine Defaults
// =============================================================================

/// Default columnar engine endpoint
pub const DEFAULT_COLUMNAR_ENDPOINT: &str = "http://127.0.0.1:9090";

/// Default bucket holding the metadata schema
pub const DEFAULT_COLUMNAR_BUCKET: &str = "tams-db";

/// Default schema (namespace) for the entity tables
pub const DEFAULT_COLUMNAR_SCHEMA: &str = "tams";

/// Connection/operation timeout against the columnar engine, in seconds
pub const DEFAULT_COLUMNAR_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// Batch Insert Defaults
// =============================================================================

/// Default rows per insert batch
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default number of parallel workers for batch operations
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Batch count above which parallel dispatch is used
pub const PARALLEL_THRESHOLD: usize = 10;

/// Default maximum retry rounds for failed batches
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Pause between parallel retry rounds, in milliseconds
pub const RETRY_ROUND_PAUSE_MS: u64 = 1_000;

/// Pause between sequential retry attempts, in milliseconds
pub const RETRY_ATTEMPT_PAUSE_MS: u64 = 100;

// =============================================================================
// Metadata Cache Defaults
// =============================================================================

/// Per-table metadata cache TTL, in seconds (30 minutes)
pub const DEFAULT_CACHE_TTL_SECS: u64 = 1_800;

// =============================================================================
// Performance Monitor Defaults
// =============================================================================

/// Maximum retained query metrics (ring buffer capacity)
pub const DEFAULT_METRICS_HISTORY_CAP: usize = 1_000;

/// Execution time above which a query is logged as slow, in seconds
pub const DEFAULT_SLOW_QUERY_THRESHOLD_SECS: f64 = 5.0;

// =============================================================================
// Endpoint Pool / Load Balancer Defaults
// =============================================================================

/// Consecutive errors before an endpoint is marked unhealthy
pub const ENDPOINT_ERROR_THRESHOLD: u32 = 3;

/// Round-robin rotation interval, in seconds
pub const DEFAULT_ROUND_ROBIN_INTERVAL_SECS: u64 = 1;

/// Sticky analytics endpoint refresh interval, in seconds
pub const DEFAULT_ANALYTICS_STICKY_SECS: u64 = 5;

/// Background health-check cadence, in seconds (5 minutes)
pub const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: u64 = 300;

// =============================================================================
// Query Planner Defaults
// =============================================================================

/// Default rows per split when auto-calculating split count
pub const DEFAULT_ROWS_PER_SPLIT: u64 = 4_000_000;

/// Upper bound on auto-calculated splits
pub const MAX_AUTO_SPLITS: u32 = 8;

/// Default row limit per subsplit
pub const DEFAULT_ROWS_PER_SUB_SPLIT: u64 = 128 * 1024;

// =============================================================================
// Object Store Defaults
// =============================================================================

/// Default segment payload bucket
pub const DEFAULT_SEGMENT_BUCKET: &str = "tams-segments";

/// Default presigned URL lifetime, in seconds (1 hour)
pub const DEFAULT_PRESIGNED_URL_TIMEOUT_SECS: u64 = 3_600;

/// Default content type for segment payloads
pub const DEFAULT_SEGMENT_CONTENT_TYPE: &str = "application/octet-stream";

// =============================================================================
// Embedded Analytics Defaults
// =============================================================================

/// Timeout for blocking embedded-engine queries, in seconds
pub const EMBEDDED_QUERY_TIMEOUT_SECS: u64 = 30;
