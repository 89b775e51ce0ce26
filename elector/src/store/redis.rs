use super::LeaseStore;
use crate::StoreError;
use async_trait::async_trait;
use ::redis::{
    aio::{ConnectionLike, ConnectionManager},
    cluster::ClusterClient,
    cluster_async::ClusterConnection,
    IntoConnectionInfo, Script,
};
use std::time::Duration;

const RENEW_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
";

const RELEASE_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
";

/// Lease store backed by a Redis key.
///
/// Acquire is a plain `SET NX PX`; renew and release compare the stored
/// owner and act on it inside one server-side script. Any cloneable async
/// connection works, a single node through [`ConnectionManager`] or a
/// cluster through [`ClusterConnection`]. The key touches one slot only,
/// so the scripts are cluster-safe.
pub struct RedisLeaseStore<C = ConnectionManager> {
    conn: C,
    renew: Script,
    release: Script,
}

impl<C> RedisLeaseStore<C> {
    pub fn new(conn: C) -> Self {
        Self {
            conn,
            renew: Script::new(RENEW_SCRIPT),
            release: Script::new(RELEASE_SCRIPT),
        }
    }
}

impl RedisLeaseStore {
    /// Opens a managed connection to `url` (e.g. `redis://127.0.0.1:6379/0`).
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = ::redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn))
    }
}

impl RedisLeaseStore<ClusterConnection> {
    /// Connects to a Redis Cluster through any of its `nodes`.
    pub async fn connect_cluster<T>(nodes: impl IntoIterator<Item = T>) -> Result<Self, StoreError>
    where
        T: IntoConnectionInfo,
    {
        let client = ClusterClient::new(nodes)?;
        let conn = client.get_async_connection().await?;
        Ok(Self::new(conn))
    }
}

impl<C> std::fmt::Debug for RedisLeaseStore<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLeaseStore").finish_non_exhaustive()
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl<C> LeaseStore for RedisLeaseStore<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = ::redis::cmd("SET")
            .arg(key)
            .arg(owner)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn renew_if_owner(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let renewed: i64 = self
            .renew
            .key(key)
            .arg(owner)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(renewed == 1)
    }

    async fn release_if_owner(&self, key: &str, owner: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = self
            .release
            .key(key)
            .arg(owner)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }
}
