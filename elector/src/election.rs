//! The acquire / renew / release state machine.
//!
//! One loop runs per elector and issues every store call for its key, so
//! transitions are serialized without any locking. Work is always stopped
//! before the lease is given up, and `on_lost` fires only after `on_acquired`.

use crate::{
    config::ElectorConfig, store::LeaseStore, supervisor::WorkSupervisor, Identity, StoreError,
};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, sleep, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElectionState {
    /// Trying to acquire the lease.
    Seeking,
    /// Holding the lease; guarded work is running.
    Leading,
    /// Shutting down; work stopped, lease being released.
    Draining,
    /// Not running.
    Stopped,
}

impl ElectionState {
    pub fn is_leader(self) -> bool {
        self == ElectionState::Leading
    }
}

impl std::fmt::Display for ElectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ElectionState::Seeking => "seeking",
            ElectionState::Leading => "leading",
            ElectionState::Draining => "draining",
            ElectionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

pub(crate) struct ElectionLoop {
    key: String,
    owner: String,
    ttl: Duration,
    renew_every: Duration,
    op_timeout: Duration,
    backoff: Duration,
    max_jitter: Duration,
    store: Arc<dyn LeaseStore>,
    supervisor: WorkSupervisor,
    state: Arc<watch::Sender<ElectionState>>,
    /// Set while the store may still hold the key under our identity.
    holding: bool,
    /// Earliest moment the store may drop our lease. The store set the
    /// expiry no earlier than this, since it is measured from when the last
    /// successful call was sent.
    expires_at: Instant,
}

impl ElectionLoop {
    pub(crate) fn new(
        config: &ElectorConfig,
        identity: Identity,
        store: Arc<dyn LeaseStore>,
        supervisor: WorkSupervisor,
        state: Arc<watch::Sender<ElectionState>>,
    ) -> Self {
        Self {
            key: config.key.clone(),
            owner: identity.to_string(),
            ttl: config.ttl,
            renew_every: config.effective_renew_interval(),
            op_timeout: config.effective_op_timeout(),
            backoff: config.backoff,
            max_jitter: config.max_jitter,
            store,
            supervisor,
            state,
            holding: false,
            expires_at: Instant::now(),
        }
    }

    /// Drives the election until `root` is cancelled and shutdown has drained.
    pub(crate) async fn run(mut self, root: CancellationToken) {
        info!(
            key = %self.key,
            owner = %self.owner,
            "leader loop started, ttl={:?} renew={:?}",
            self.ttl,
            self.renew_every
        );

        let mut state = ElectionState::Seeking;
        self.publish(state);
        loop {
            state = match state {
                ElectionState::Seeking => self.seek(&root).await,
                ElectionState::Leading => self.lead(&root).await,
                ElectionState::Draining => self.drain().await,
                ElectionState::Stopped => break,
            };
        }

        self.publish(ElectionState::Stopped);
        info!(key = %self.key, owner = %self.owner, "leader loop stopped");
    }

    async fn seek(&mut self, root: &CancellationToken) -> ElectionState {
        if root.is_cancelled() {
            return ElectionState::Draining;
        }

        let sent_at = Instant::now();
        match self.call(self.store.try_acquire(&self.key, &self.owner, self.ttl)).await {
            Ok(true) => {
                self.holding = true;
                self.expires_at = sent_at + self.ttl;
                if root.is_cancelled() {
                    debug!(key = %self.key, "lease acquired during shutdown, releasing");
                    return ElectionState::Draining;
                }
                info!(key = %self.key, owner = %self.owner, "acquired leadership");
                self.publish(ElectionState::Leading);
                self.supervisor.start(root);
                return ElectionState::Leading;
            }
            Ok(false) => debug!(key = %self.key, "lease held by another instance"),
            Err(e) => warn!(key = %self.key, "acquire error: {}", e),
        }

        tokio::select! {
            () = root.cancelled() => ElectionState::Draining,
            () = sleep(self.backoff_with_jitter()) => ElectionState::Seeking,
        }
    }

    async fn lead(&mut self, root: &CancellationToken) -> ElectionState {
        let mut ticker = interval_at(Instant::now() + self.renew_every, self.renew_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = root.cancelled() => return ElectionState::Draining,
                () = sleep_until(self.expires_at) => {
                    warn!(key = %self.key, "lease expired without a successful renew");
                    self.step_down();
                    return ElectionState::Seeking;
                }
                _ = ticker.tick() => {}
            }

            let sent_at = Instant::now();
            match self
                .call(self.store.renew_if_owner(&self.key, &self.owner, self.ttl))
                .await
            {
                Ok(true) => {
                    self.expires_at = sent_at + self.ttl;
                    debug!(key = %self.key, "lease renewed");
                }
                Ok(false) => {
                    warn!(key = %self.key, owner = %self.owner, "lost leadership");
                    self.step_down();
                    return ElectionState::Seeking;
                }
                Err(e) => {
                    // Not a definitive answer, keep leading until the lease runs out.
                    warn!(key = %self.key, "renew error: {}", e);
                }
            }
        }
    }

    /// Leaves `Leading` after the store stopped vouching for us. Nothing to release.
    fn step_down(&mut self) {
        self.holding = false;
        self.supervisor.stop();
        self.publish(ElectionState::Seeking);
    }

    async fn drain(&mut self) -> ElectionState {
        self.supervisor.stop();
        self.publish(ElectionState::Draining);

        if self.holding {
            self.holding = false;
            match self
                .call(self.store.release_if_owner(&self.key, &self.owner))
                .await
            {
                Ok(()) => info!(key = %self.key, "lease released"),
                Err(e) => warn!(
                    key = %self.key,
                    "release error, lease will expire after {:?}: {}",
                    self.ttl,
                    e
                ),
            }
        }

        ElectionState::Stopped
    }

    async fn call<T>(
        &self,
        op: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.op_timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.op_timeout)),
        }
    }

    fn backoff_with_jitter(&self) -> Duration {
        let max_jitter_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter_ms = rand::thread_rng().gen_range(0..=max_jitter_ms);
        self.backoff + Duration::from_millis(jitter_ms)
    }

    fn publish(&self, state: ElectionState) {
        self.state.send_replace(state);
    }
}
