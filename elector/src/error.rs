use std::time::Duration;
use thiserror::Error;

/// Transport-level failure talking to the lease backend.
///
/// A store that answers "not the owner" returns `Ok(false)`, never one of
/// these. Every variant is treated as transient by the election loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Lease store unavailable: {0}")]
    Unavailable(String),

    #[error("Lease store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Lease store backend error: {0}")]
    Backend(String),
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_timeout()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
        {
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::Backend(err.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Lease ttl must be between one millisecond and one year")]
    InvalidTtl,

    #[error("Coordination key must not be empty")]
    InvalidKey,

    #[error("Elector did not finish draining before the stop deadline")]
    StopTimeout,

    #[error("Elector is still draining a previous run")]
    Draining,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
