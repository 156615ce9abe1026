//! Unified error type for the storage layer
//!
//! Wraps failures from the columnar engine, the embedded analytical engine
//! and the object store while preserving enough context (`kind`, entity, op,
//! cause) for callers to act on. Recoverable conditions are absorbed into
//! return values by the operations themselves; only terminal failures
//! surface as `StoreError`.

use thiserror::Error;

use crate::data::objects::ObjectStoreError;
use crate::utils::timerange::TimeRangeError;

/// Unified storage-layer error
#[derive(Error, Debug)]
pub enum StoreError {
    /// Columnar engine rejected or failed an operation
    #[error("Engine {op} on '{table}' failed: {message}")]
    Engine {
        op: &'static str,
        table: String,
        message: String,
    },

    /// Embedded analytical engine error
    #[error("Embedded engine error: {0}")]
    Embedded(#[from] duckdb::Error),

    /// Embedded analytical engine could not be initialized; hybrid analytics
    /// are disabled rather than silently falling back
    #[error("Embedded analytical engine unavailable: {0}")]
    EmbeddedUnavailable(String),

    /// Object store error
    #[error("Object store error: {0}")]
    ObjectStore(#[from] ObjectStoreError),

    /// No healthy endpoint available for the requested operation
    #[error("No healthy endpoint available for {op} operations")]
    NoHealthyEndpoint { op: &'static str },

    /// Operation exceeded its timeout
    #[error("{op} timed out after {timeout_secs}s")]
    Timeout { op: &'static str, timeout_secs: u64 },

    /// Input failed validation (unknown column, malformed predicate, ...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Malformed timerange
    #[error("Timerange error: {0}")]
    TimeRange(#[from] TimeRangeError),

    /// Entity lookup miss surfaced as an error (writes that require the
    /// referenced entity to exist)
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    /// Referential conflict (live references, duplicate keys)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Engine failure with operation and table context
    pub fn engine(op: &'static str, table: impl Into<String>, message: impl ToString) -> Self {
        Self::Engine {
            op,
            table: table.into(),
            message: message.to_string(),
        }
    }

    pub fn timeout(op: &'static str, timeout_secs: u64) -> Self {
        Self::Timeout { op, timeout_secs }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Whether the failure might succeed on retry
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::NoHealthyEndpoint { .. } => true,
            Self::Engine { message, .. } => {
                message.contains("connection")
                    || message.contains("timeout")
                    || message.contains("network")
            }
            Self::Io(_) => true,
            _ => false,
        }
    }

    /// Short error kind tag used in metrics and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Engine { .. } => "engine",
            Self::Embedded(_) => "embedded",
            Self::EmbeddedUnavailable(_) => "embedded_unavailable",
            Self::ObjectStore(_) => "object_store",
            Self::NoHealthyEndpoint { .. } => "no_healthy_endpoint",
            Self::Timeout { .. } => "timeout",
            Self::Validation(_) => "validation",
            Self::TimeRange(_) => "timerange",
            Self::NotFound { .. } => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_error_display() {
        let err = StoreError::engine("select", "segments", "socket closed");
        assert_eq!(
            err.to_string(),
            "Engine select on 'segments' failed: socket closed"
        );
    }

    #[test]
    fn timeout_error_display() {
        let err = StoreError::timeout("select", 30);
        assert_eq!(err.to_string(), "select timed out after 30s");
    }

    #[test]
    fn transient_detection() {
        assert!(StoreError::timeout("insert", 30).is_transient());
        assert!(StoreError::NoHealthyEndpoint { op: "read" }.is_transient());
        assert!(StoreError::engine("select", "t", "connection reset").is_transient());
        assert!(!StoreError::Validation("bad column".into()).is_transient());
        assert!(!StoreError::not_found("source", "abc").is_transient());
    }

    #[test]
    fn kind_tags() {
        assert_eq!(StoreError::engine("op", "t", "m").kind(), "engine");
        assert_eq!(StoreError::Validation("x".into()).kind(), "validation");
        assert_eq!(StoreError::not_found("flow", "id").kind(), "not_found");
    }
}
