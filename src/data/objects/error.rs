//! Error types for the object-store segment adapter

use thiserror::Error;

/// Object store operation failure
#[derive(Error, Debug)]
pub enum ObjectStoreError {
    /// Backend (S3 API) error with operation context
    #[error("Object store {op} failed for key '{key}': {message}")]
    Backend {
        op: &'static str,
        key: String,
        message: String,
    },

    /// Bucket missing and could not be created
    #[error("Bucket '{bucket}' unavailable: {message}")]
    BucketUnavailable { bucket: String, message: String },

    /// Object not found
    #[error("Object not found: {key}")]
    NotFound { key: String },

    /// Payload could not be read (file path or stream)
    #[error("Unreadable segment payload: {0}")]
    Payload(String),

    /// Presigned URL minting failed
    #[error("Presigning {op} for key '{key}' failed: {message}")]
    Presign {
        op: &'static str,
        key: String,
        message: String,
    },

    /// IO error reading a payload from disk
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ObjectStoreError {
    pub fn backend(op: &'static str, key: impl Into<String>, message: impl ToString) -> Self {
        Self::Backend {
            op,
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// Whether the failure is a missing-object condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_display() {
        let err = ObjectStoreError::backend("put_object", "flow/2024/01/01/seg", "access denied");
        assert_eq!(
            err.to_string(),
            "Object store put_object failed for key 'flow/2024/01/01/seg': access denied"
        );
    }

    #[test]
    fn not_found_detection() {
        assert!(
            ObjectStoreError::NotFound {
                key: "k".to_string()
            }
            .is_not_found()
        );
        assert!(!ObjectStoreError::backend("get_object", "k", "boom").is_not_found());
    }
}
