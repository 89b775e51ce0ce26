//! The atomic primitives an election backend has to provide.

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

use crate::StoreError;
use async_trait::async_trait;
use std::time::Duration;

/// Conditional operations over a single lease key.
///
/// Each call must be one atomic round trip on the backend: no other writer
/// may observe or change the key between the ownership check and the write.
/// `Ok(false)` is a definitive answer from the backend; `Err` means the
/// answer is unknown.
#[async_trait]
pub trait LeaseStore: Send + Sync + std::fmt::Debug {
    /// Sets `key` to `owner` with expiry `ttl`, only if the key is absent.
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Resets the expiry of `key` to `ttl`, only if it is currently held by `owner`.
    async fn renew_if_owner(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Deletes `key`, only if it is currently held by `owner`.
    async fn release_if_owner(&self, key: &str, owner: &str) -> Result<(), StoreError>;
}
