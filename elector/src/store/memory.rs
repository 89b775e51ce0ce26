use super::LeaseStore;
use crate::StoreError;
use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use std::time::Duration;
use tokio::time::Instant;

/// Stand-in expiry for ttls too large to add to the clock.
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

fn deadline(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl).unwrap_or(now + FAR_FUTURE)
}

#[derive(Debug, Clone)]
struct StoredLease {
    owner: String,
    expires_at: Instant,
}

impl StoredLease {
    fn new(owner: &str, ttl: Duration) -> Self {
        Self {
            owner: owner.to_string(),
            expires_at: deadline(Instant::now(), ttl),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Lease store living in process memory.
///
/// Useful when every competing elector shares one process, and as the
/// backend for tests. Expiry follows the tokio clock, so a paused test
/// runtime controls it.
#[derive(Debug, Default)]
pub struct InMemoryLeaseStore {
    leases: DashMap<String, StoredLease>,
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self {
            leases: DashMap::new(),
        }
    }

    /// Current live owner of `key`, if any.
    pub fn holder(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.leases
            .get(key)
            .filter(|lease| lease.is_live(now))
            .map(|lease| lease.owner.clone())
    }

    /// Overwrites `key` unconditionally, as a competing writer would after a takeover.
    pub fn force_owner(&self, key: &str, owner: &str, ttl: Duration) {
        self.leases.insert(key.to_string(), StoredLease::new(owner, ttl));
    }

    /// Number of live leases.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.leases.iter().filter(|entry| entry.value().is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        match self.leases.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_live(now) {
                    return Ok(false);
                }
                entry.insert(StoredLease::new(owner, ttl));
                Ok(true)
            }
            Entry::Vacant(entry) => {
                entry.insert(StoredLease::new(owner, ttl));
                Ok(true)
            }
        }
    }

    async fn renew_if_owner(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        match self.leases.get_mut(key) {
            Some(mut lease) if lease.owner == owner && lease.is_live(now) => {
                lease.expires_at = deadline(now, ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_if_owner(&self, key: &str, owner: &str) -> Result<(), StoreError> {
        self.leases.remove_if(key, |_, lease| lease.owner == owner);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(3);

    #[tokio::test(start_paused = true)]
    async fn test_acquire_is_exclusive_while_lease_is_live() {
        let store = InMemoryLeaseStore::new();

        assert!(store.try_acquire("lock:job", "a", TTL).await.unwrap());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!store.try_acquire("lock:job", "b", TTL).await.unwrap());
        assert_eq!(store.holder("lock:job").as_deref(), Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lease_can_be_taken_over() {
        let store = InMemoryLeaseStore::new();

        assert!(store.try_acquire("lock:job", "a", TTL).await.unwrap());
        tokio::time::advance(TTL).await;

        assert_eq!(store.holder("lock:job"), None);
        assert!(store.try_acquire("lock:job", "b", TTL).await.unwrap());
        assert!(!store.renew_if_owner("lock:job", "a", TTL).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_renew_extends_only_the_owners_lease() {
        let store = InMemoryLeaseStore::new();
        store.try_acquire("lock:job", "a", TTL).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.renew_if_owner("lock:job", "a", TTL).await.unwrap());
        assert!(!store.renew_if_owner("lock:job", "b", TTL).await.unwrap());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.holder("lock:job").as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_release_ignores_other_owners() {
        let store = InMemoryLeaseStore::new();
        store.try_acquire("lock:job", "a", TTL).await.unwrap();

        store.release_if_owner("lock:job", "b").await.unwrap();
        assert_eq!(store.holder("lock:job").as_deref(), Some("a"));

        store.release_if_owner("lock:job", "a").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_unbounded_ttl_does_not_overflow_the_clock() {
        let store = InMemoryLeaseStore::new();
        assert!(store.try_acquire("lock:job", "a", Duration::MAX).await.unwrap());
        assert!(store.renew_if_owner("lock:job", "a", Duration::MAX).await.unwrap());
        assert_eq!(store.holder("lock:job").as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_renew_of_missing_key_is_denied() {
        let store = InMemoryLeaseStore::new();
        assert!(!store.renew_if_owner("lock:job", "a", TTL).await.unwrap());
    }
}
