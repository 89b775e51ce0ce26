//! Fault injection and call recording for exercising electors in tests.

use crate::{
    store::{memory::InMemoryLeaseStore, LeaseStore},
    supervisor::Callbacks,
    StoreError,
};
use async_trait::async_trait;
use dashmap::DashSet;
use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Ordered log shared between stores and callbacks under test.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Number of entries equal to `entry`.
    pub fn count(&self, entry: &str) -> usize {
        self.entries.lock().iter().filter(|e| *e == entry).count()
    }

    /// Index of the first entry equal to `entry`.
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries.lock().iter().position(|e| e == entry)
    }
}

/// Wraps a lease store with per-owner partitions, latency, and a call journal.
///
/// Calls are journaled as `"<op>:<owner>"` with `op` one of `try_acquire`,
/// `renew`, `release`, before latency or partitions apply.
#[derive(Debug)]
pub struct SimulatedStore {
    inner: Arc<dyn LeaseStore>,
    partitioned: DashSet<String>,
    latency: Mutex<Duration>,
    journal: Journal,
}

impl SimulatedStore {
    pub fn new(inner: Arc<dyn LeaseStore>) -> Self {
        Self {
            inner,
            partitioned: DashSet::new(),
            latency: Mutex::new(Duration::ZERO),
            journal: Journal::new(),
        }
    }

    /// A simulated store over a fresh in-memory store, returning both.
    pub fn in_memory() -> (Arc<Self>, Arc<InMemoryLeaseStore>) {
        let memory = Arc::new(InMemoryLeaseStore::new());
        let simulated = Arc::new(Self::new(memory.clone()));
        (simulated, memory)
    }

    #[must_use]
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Makes every call on behalf of `owner` fail as unreachable.
    pub fn partition(&self, owner: &str) {
        self.partitioned.insert(owner.to_string());
    }

    pub fn heal(&self, owner: &str) {
        self.partitioned.remove(owner);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Number of calls of kind `op` made on behalf of `owner`.
    pub fn calls(&self, op: &str, owner: &str) -> usize {
        self.journal.count(&format!("{op}:{owner}"))
    }

    async fn simulate(&self, op: &str, owner: &str) -> Result<(), StoreError> {
        self.journal.record(format!("{op}:{owner}"));

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            sleep(latency).await;
        }

        if self.partitioned.contains(owner) {
            return Err(StoreError::Unavailable(format!(
                "{owner} is partitioned from the store"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl LeaseStore for SimulatedStore {
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.simulate("try_acquire", owner).await?;
        self.inner.try_acquire(key, owner, ttl).await
    }

    async fn renew_if_owner(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.simulate("renew", owner).await?;
        self.inner.renew_if_owner(key, owner, ttl).await
    }

    async fn release_if_owner(&self, key: &str, owner: &str) -> Result<(), StoreError> {
        self.simulate("release", owner).await?;
        self.inner.release_if_owner(key, owner).await
    }
}

/// Callbacks that write their lifecycle into `journal` under `name`.
///
/// Records `on_acquired:<name>` when work starts and `work_stopped:<name>`
/// once the work scope is cancelled. `on_lost` first records
/// `scope_cancelled:<name>` if the last work scope was already cancelled,
/// then `on_lost:<name>`.
pub fn recording_callbacks(journal: &Journal, name: &str) -> Callbacks {
    let last_scope: Arc<Mutex<Option<CancellationToken>>> = Arc::new(Mutex::new(None));

    let acquired_journal = journal.clone();
    let acquired_name = name.to_string();
    let acquired_scope = last_scope.clone();
    let lost_journal = journal.clone();
    let lost_name = name.to_string();

    Callbacks::new()
        .on_acquired(move |scope: CancellationToken| {
            acquired_journal.record(format!("on_acquired:{acquired_name}"));
            *acquired_scope.lock() = Some(scope.clone());

            let journal = acquired_journal.clone();
            let name = acquired_name.clone();
            async move {
                scope.cancelled().await;
                journal.record(format!("work_stopped:{name}"));
            }
        })
        .on_lost(move |_scope: CancellationToken| {
            let cancelled = last_scope
                .lock()
                .as_ref()
                .is_some_and(CancellationToken::is_cancelled);
            if cancelled {
                lost_journal.record(format!("scope_cancelled:{lost_name}"));
            }
            lost_journal.record(format!("on_lost:{lost_name}"));
            async {}
        })
}
