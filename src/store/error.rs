//! Token store error types.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by [`TokenStore`](super::TokenStore) operations.
///
/// # Classification
///
/// Exactly one variant, [`StoreError::AlreadyClaimed`], describes a legitimate
/// duplicate. Every other variant is an infrastructure or lifecycle fault and
/// must never be reported to a client as a duplicate (and vice versa).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("request key is already claimed")]
    AlreadyClaimed,

    #[error("token store backend error: {0}")]
    Backend(String),

    #[error("token store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("store resource '{0}' isn't configured")]
    NotConfigured(String),

    #[error("token store is not initialized")]
    NotInitialized,

    #[error("token store is already initialized")]
    AlreadyInitialized,

    #[error("token store has been destroyed")]
    Destroyed,
}

impl StoreError {
    /// Whether this error reports a duplicate claim rather than a fault.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::AlreadyClaimed)
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// Convenience type alias for Results with StoreError.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_already_claimed_is_conflict() {
        assert!(StoreError::AlreadyClaimed.is_conflict());
        assert!(!StoreError::Backend("connection refused".into()).is_conflict());
        assert!(!StoreError::Timeout(Duration::from_millis(50)).is_conflict());
        assert!(!StoreError::NotConfigured("redis".into()).is_conflict());
        assert!(!StoreError::NotInitialized.is_conflict());
        assert!(!StoreError::Destroyed.is_conflict());
    }

    #[test]
    fn test_redis_error_maps_to_backend() {
        let err: StoreError =
            redis::RedisError::from((redis::ErrorKind::IoError, "connection refused")).into();
        assert!(matches!(err, StoreError::Backend(msg) if msg.contains("connection refused")));
    }
}
